use btleplug::platform::PeripheralId;
use serde::{Deserialize, Serialize};

/// One normalized force reading, independent of which transport produced it.
///
/// `device_timestamp` is the device-local monotonic counter in microseconds.
/// It wraps; consumers must diff with `wrapping_sub`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimestampedSample {
    pub weight_kg: f64,
    pub device_timestamp: u32,
}

/// Which wire protocol a discovered peripheral speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolKind {
    /// Notification-batched dynamometer (tag + count header, 8-byte records).
    Progressor,
    /// Connected training board streaming raw 3-byte samples.
    Board,
    /// Broadcast-only crane scale; never connected, driven by advertisements.
    AdvertScale,
}

impl ProtocolKind {
    /// Whether this protocol requires a GATT connection at all.
    pub fn connects(&self) -> bool {
        !matches!(self, ProtocolKind::AdvertScale)
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            ProtocolKind::Progressor => "progressor",
            ProtocolKind::Board => "board",
            ProtocolKind::AdvertScale => "scale",
        };

        write!(f, "{}", result)
    }
}

/// Opaque peripheral identity, stable across rediscoveries on one adapter.
pub type DeviceId = PeripheralId;

/// A peripheral seen while scanning. Signal strength is updated in place
/// while the device stays visible; the whole entry is discarded when
/// scanning restarts.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub name: String,
    pub protocol: ProtocolKind,
    pub signal_strength: Option<i16>,
}

/// Connection lifecycle as observed from outside the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Initializing,
    Disconnected,
    Scanning,
    Connecting,
    Connected,
    Error(String),
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Initializing => write!(f, "initializing"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Scanning => write!(f, "scanning"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Error(message) => write!(f, "error: {}", message),
        }
    }
}

/// Everything the supervisor publishes to its consumers.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    StateChange(ConnectionState),
    Discovered(DeviceDescriptor),
    Sample(TimestampedSample),
}
