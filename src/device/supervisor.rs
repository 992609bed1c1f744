//! BLE discovery/connect/retry lifecycle.
//!
//! The supervisor owns the adapter: it scans, classifies discovered
//! peripherals, connects the right transport and forwards its normalized
//! sample stream to the consumers. Connection failures are never fatal;
//! the unbounded capped-backoff retry loop is the system's only recovery
//! mechanism.

use std::time::Instant;

use btleplug::api::{
    Central, CentralEvent, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter,
    Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::{SinkExt, StreamExt};
use indexmap::IndexMap;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;

use crate::device::constants::{
    make_board_data_uuid, make_board_service_uuid, make_progressor_control_uuid,
    make_progressor_data_uuid, make_progressor_service_uuid, retry_delay, ADVERT_STALE_TIMEOUT,
    DISCOVERY_TIMEOUT, INACTIVITY_TIMEOUT, PROGRESSOR_CMD_START_MEASUREMENT,
    SCALE_MANUFACTURER_ID, SCALE_NAME_FRAGMENT, WRITE_DEADLINE,
};
use crate::device::transport::{AdvertScaleTransport, BoardTransport, ProgressorTransport};
use crate::device::types::{
    ConnectionState, DeviceDescriptor, DeviceEvent, DeviceId, ProtocolKind, TimestampedSample,
};
use crate::error::DeviceError;

/// Commands accepted by the supervisor task.
#[derive(Debug, Clone)]
pub enum SupervisorCommand {
    /// Restrict discovery to one protocol (and restart scanning).
    SetDeviceFilter(Option<ProtocolKind>),
    /// Connect to a previously discovered peripheral.
    Connect(DeviceId),
    /// Tear down the active connection. With `preserve_auto_reconnect` the
    /// last-connected-device memory survives (background-inactivity mode);
    /// without it the memory is cleared and a fresh scan starts.
    Disconnect { preserve_auto_reconnect: bool },
}

enum ActiveLink {
    Gatt {
        peripheral: Peripheral,
        reader_cancel: CancellationToken,
        reader: JoinHandle<Result<(), DeviceError>>,
    },
    Advert {
        id: DeviceId,
        transport: AdvertScaleTransport,
        last_seen: Instant,
    },
}

struct Supervisor {
    adapter: Adapter,
    senders: Vec<Sender<DeviceEvent>>,
    sample_sender: Sender<TimestampedSample>,
    filter: Option<ProtocolKind>,
    discovered: IndexMap<DeviceId, DeviceDescriptor>,
    state: ConnectionState,
    link: Option<ActiveLink>,
    /// Identity and protocol of the last successfully connected device.
    last_connected: Option<(DeviceId, ProtocolKind)>,
    auto_reconnect: bool,
    retry_count: u32,
    retry_at: Option<tokio::time::Instant>,
    connecting: Option<DeviceId>,
    last_sample_at: Instant,
}

/// Spawns the supervisor. Returns its command channel and join handle;
/// device events flow out through `senders`.
pub fn supervisor_task(
    cancel: CancellationToken,
    senders: Vec<Sender<DeviceEvent>>,
) -> (Sender<SupervisorCommand>, JoinHandle<()>) {
    let (command_sender, command_receiver) = channel::<SupervisorCommand>(16);

    let handle = spawn(async move {
        if let Err(err) = supervise(cancel, senders, command_receiver).await {
            warn!("Connection supervisor stopped: {}", err);
        }
    });

    (command_sender, handle)
}

async fn supervise(
    cancel: CancellationToken,
    senders: Vec<Sender<DeviceEvent>>,
    mut commands: Receiver<SupervisorCommand>,
) -> Result<(), DeviceError> {
    let manager = Manager::new().await?;
    let adapter = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or(DeviceError::NoAdapter)?;
    info!(
        "Using adapter {}",
        adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string())
    );

    let mut central_events = adapter.events().await?;
    let (sample_sender, mut samples) = channel::<TimestampedSample>(256);

    let mut supervisor = Supervisor {
        adapter,
        senders,
        sample_sender,
        filter: None,
        discovered: IndexMap::new(),
        state: ConnectionState::Initializing,
        link: None,
        last_connected: None,
        auto_reconnect: false,
        retry_count: 0,
        retry_at: None,
        connecting: None,
        last_sample_at: Instant::now(),
    };

    supervisor.publish_state(ConnectionState::Initializing).await;
    supervisor.start_scanning().await;

    let mut tick = tokio::time::interval(Duration::from_secs(1));

    loop {
        let retry_at = supervisor.retry_at;

        tokio::select! {
            _ = cancel.cancelled() => {
                supervisor.teardown_link().await;
                break;
            },
            Some(command) = commands.next() => {
                supervisor.handle_command(command).await;
            },
            Some(event) = central_events.next() => {
                supervisor.handle_central_event(event).await;
            },
            Some(sample) = samples.next() => {
                supervisor.forward_sample(sample).await;
            },
            _ = tick.tick() => {
                supervisor.handle_tick().await;
            },
            _ = sleep_until_opt(retry_at) => {
                supervisor.handle_retry_due().await;
            },
        }
    }

    Ok(())
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl Supervisor {
    async fn publish(&mut self, event: DeviceEvent) {
        for sender in &mut self.senders {
            if let Err(err) = sender.send(event.clone()).await {
                warn!("Failed to send device event: {}", err);
            }
        }
    }

    async fn publish_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        info!("Connection state: {} -> {}", self.state, state);
        self.state = state.clone();
        self.publish(DeviceEvent::StateChange(state)).await;
    }

    async fn forward_sample(&mut self, sample: TimestampedSample) {
        self.last_sample_at = Instant::now();
        self.publish(DeviceEvent::Sample(sample)).await;
    }

    async fn start_scanning(&mut self) {
        // Restarting the scan invalidates everything seen so far.
        self.discovered.clear();

        let filter = match self.filter {
            Some(ProtocolKind::Progressor) => ScanFilter {
                services: vec![make_progressor_service_uuid()],
            },
            Some(ProtocolKind::Board) => ScanFilter {
                services: vec![make_board_service_uuid()],
            },
            // The advertising scale carries no service UUID; scan everything.
            Some(ProtocolKind::AdvertScale) | None => ScanFilter::default(),
        };

        match self.adapter.start_scan(filter).await {
            Ok(()) => {
                if self.link.is_none() {
                    self.publish_state(ConnectionState::Scanning).await;
                }
            }
            Err(err) => {
                warn!("Scanning failed: {:?}", err);
                self.publish_state(ConnectionState::Error(format!("scan failed: {}", err)))
                    .await;
            }
        }
    }

    async fn handle_command(&mut self, command: SupervisorCommand) {
        match command {
            SupervisorCommand::SetDeviceFilter(filter) => {
                debug!("Device filter set to {:?}", filter);
                self.filter = filter;
                if self.link.is_none() {
                    self.start_scanning().await;
                }
            }
            SupervisorCommand::Connect(id) => {
                self.retry_at = None;
                self.retry_count = 0;
                self.connect_to(id).await;
            }
            SupervisorCommand::Disconnect {
                preserve_auto_reconnect,
            } => {
                self.disconnect(preserve_auto_reconnect).await;
            }
        }
    }

    async fn handle_tick(&mut self) {
        match &self.link {
            Some(ActiveLink::Advert { last_seen, .. }) => {
                // Broadcast devices have no disconnect event; silence means
                // out of range.
                if last_seen.elapsed() >= ADVERT_STALE_TIMEOUT {
                    warn!("No advertisement within {:?}, device presumed out of range", ADVERT_STALE_TIMEOUT);
                    self.handle_connection_lost("advertisements stopped".to_string())
                        .await;
                    return;
                }
            }
            Some(ActiveLink::Gatt { .. }) => {}
            None => return,
        }

        if self.last_sample_at.elapsed() >= INACTIVITY_TIMEOUT {
            info!(
                "No samples for {:?}, disconnecting (auto-reconnect preserved)",
                INACTIVITY_TIMEOUT
            );
            self.disconnect(true).await;
        }
    }

    async fn handle_retry_due(&mut self) {
        self.retry_at = None;

        let (id, _) = match (&self.last_connected, self.auto_reconnect) {
            (Some(pair), true) => pair.clone(),
            _ => return,
        };

        self.connect_to(id).await;
    }

    async fn handle_central_event(&mut self, event: CentralEvent) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                self.upsert_descriptor(id).await;
            }
            CentralEvent::ManufacturerDataAdvertisement {
                id,
                manufacturer_data,
            } => {
                let tracked = match &mut self.link {
                    Some(ActiveLink::Advert {
                        id: tracked,
                        transport,
                        last_seen,
                    }) if *tracked == id => {
                        // btleplug keys manufacturer data by company id, so
                        // the vendor prefix is already stripped.
                        let sample = manufacturer_data
                            .get(&SCALE_MANUFACTURER_ID)
                            .and_then(|data| {
                                transport.parse_advertisement(data, false, Instant::now())
                            });
                        if sample.is_some() {
                            *last_seen = Instant::now();
                        }
                        sample
                    }
                    _ => None,
                };

                if let Some(sample) = tracked {
                    self.forward_sample(sample).await;
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                let ours = matches!(
                    &self.link,
                    Some(ActiveLink::Gatt { peripheral, .. }) if peripheral.id() == id
                );
                if ours {
                    warn!("Connection lost");
                    self.handle_connection_lost("connection lost".to_string()).await;
                } else if self.connecting.as_ref() == Some(&id) {
                    debug!("Peripheral dropped while connecting");
                }
            }
            _ => {}
        }
    }

    async fn upsert_descriptor(&mut self, id: DeviceId) {
        let peripheral = match self.adapter.peripheral(&id).await {
            Ok(v) => v,
            Err(err) => {
                debug!("Could not resolve discovered peripheral: {:?}", err);
                return;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(v)) => v,
            Ok(None) => {
                debug!("Peripheral has no properties");
                return;
            }
            Err(err) => {
                debug!("Could not query peripheral properties: {:?}", err);
                return;
            }
        };

        let protocol = match classify_peripheral(&properties) {
            Some(v) => v,
            None => return,
        };

        if let Some(filter) = self.filter {
            if protocol != filter {
                return;
            }
        }

        let name = properties
            .local_name
            .unwrap_or_else(|| format!("{}", properties.address));

        let changed = match self.discovered.get_mut(&id) {
            Some(descriptor) => {
                // Same identity seen again: refresh signal strength only.
                let changed = descriptor.signal_strength != properties.rssi;
                descriptor.signal_strength = properties.rssi;
                changed
            }
            None => {
                info!(
                    "Discovered {} ({}) rssi={:?}",
                    name, protocol, properties.rssi
                );
                self.discovered.insert(
                    id.clone(),
                    DeviceDescriptor {
                        id: id.clone(),
                        name,
                        protocol,
                        signal_strength: properties.rssi,
                    },
                );
                true
            }
        };

        if changed {
            let descriptor = self.discovered[&id].clone();
            self.publish(DeviceEvent::Discovered(descriptor)).await;
        }

        // Rediscovery of the remembered device while disconnected wins over
        // any pending backoff timer.
        let remembered = self
            .last_connected
            .as_ref()
            .map(|(last_id, _)| *last_id == id)
            .unwrap_or(false);
        if remembered && self.auto_reconnect && self.link.is_none() && self.connecting.is_none() {
            info!("Rediscovered last connected device, reconnecting");
            self.retry_at = None;
            self.connect_to(id).await;
        }
    }

    async fn connect_to(&mut self, id: DeviceId) {
        let protocol = match self
            .discovered
            .get(&id)
            .map(|d| d.protocol)
            .or_else(|| match &self.last_connected {
                Some((last_id, protocol)) if *last_id == id => Some(*protocol),
                _ => None,
            }) {
            Some(v) => v,
            None => {
                warn!("Connect requested for unknown peripheral");
                return;
            }
        };

        self.connecting = Some(id.clone());
        self.publish_state(ConnectionState::Connecting).await;

        let result = if protocol.connects() {
            self.connect_gatt(&id, protocol).await
        } else {
            // Advertisement-only device: nothing to connect, just track it.
            self.link = Some(ActiveLink::Advert {
                id: id.clone(),
                transport: AdvertScaleTransport::new(),
                last_seen: Instant::now(),
            });
            Ok(())
        };

        self.connecting = None;

        match result {
            Ok(()) => {
                info!("Peripheral ready ({})", protocol);
                self.last_connected = Some((id, protocol));
                self.auto_reconnect = true;
                self.retry_count = 0;
                self.retry_at = None;
                self.last_sample_at = Instant::now();
                self.publish_state(ConnectionState::Connected).await;
            }
            Err(err) => {
                warn!("Connecting to peripheral failed: {}", err);
                self.publish_state(ConnectionState::Error(err.to_string())).await;
                // Remember the target so the backoff retry can reach it even
                // though the connection never completed.
                if self.auto_reconnect || self.last_connected.is_none() {
                    self.last_connected = Some((id, protocol));
                    self.auto_reconnect = true;
                }
                self.schedule_retry();
                self.start_scanning().await;
            }
        }
    }

    async fn connect_gatt(&mut self, id: &DeviceId, protocol: ProtocolKind) -> Result<(), DeviceError> {
        let peripheral = self.adapter.peripheral(id).await?;

        info!("Connecting to peripheral...");
        peripheral.connect().await?;

        info!("Connected; discovering services...");
        match timeout(DISCOVERY_TIMEOUT, subscribe_data_characteristic(&peripheral, protocol)).await
        {
            Ok(result) => result?,
            Err(_) => {
                // Distinct from a connect failure so callers know the link
                // was up but discovery stalled; either way we retry.
                let _ = peripheral.disconnect().await;
                return Err(DeviceError::DiscoveryTimeout);
            }
        }

        let reader_cancel = CancellationToken::new();
        let reader = read_notifications_task(
            reader_cancel.clone(),
            &peripheral,
            protocol,
            self.sample_sender.clone(),
        );

        self.link = Some(ActiveLink::Gatt {
            peripheral,
            reader_cancel,
            reader,
        });
        Ok(())
    }

    fn schedule_retry(&mut self) {
        let delay = retry_delay(self.retry_count);
        info!(
            "Scheduling reconnect attempt {} in {:?}",
            self.retry_count + 1,
            delay
        );
        self.retry_at = Some(tokio::time::Instant::now() + delay);
        self.retry_count += 1;
    }

    async fn handle_connection_lost(&mut self, message: String) {
        self.teardown_link().await;
        self.publish_state(ConnectionState::Error(message)).await;

        if self.auto_reconnect {
            self.schedule_retry();
        }
        self.start_scanning().await;
    }

    async fn disconnect(&mut self, preserve_auto_reconnect: bool) {
        self.retry_at = None;
        self.teardown_link().await;

        if preserve_auto_reconnect {
            // Keep the last-device memory; a later command (or rediscovery
            // once scanning resumes) brings the connection back.
            if let Err(err) = self.adapter.stop_scan().await {
                debug!("Failed to stop scanning: {:?}", err);
            }
            self.publish_state(ConnectionState::Disconnected).await;
        } else {
            self.last_connected = None;
            self.auto_reconnect = false;
            self.retry_count = 0;
            self.publish_state(ConnectionState::Disconnected).await;
            self.start_scanning().await;
        }
    }

    async fn teardown_link(&mut self) {
        let link = match self.link.take() {
            Some(v) => v,
            None => return,
        };

        match link {
            ActiveLink::Gatt {
                peripheral,
                reader_cancel,
                reader,
            } => {
                reader_cancel.cancel();
                match reader.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => debug!("Notification reader ended with error: {}", err),
                    Err(err) => warn!("Failed to join notification reader: {:?}", err),
                }
                if let Err(err) = peripheral.disconnect().await {
                    debug!("Disconnect failed (peripheral may already be gone): {:?}", err);
                }
            }
            ActiveLink::Advert { .. } => {}
        }
    }
}

fn classify_peripheral(properties: &PeripheralProperties) -> Option<ProtocolKind> {
    if properties.services.contains(&make_progressor_service_uuid()) {
        return Some(ProtocolKind::Progressor);
    }
    if properties.services.contains(&make_board_service_uuid()) {
        return Some(ProtocolKind::Board);
    }

    let named_scale = properties
        .local_name
        .as_deref()
        .map(|name| name.contains(SCALE_NAME_FRAGMENT))
        .unwrap_or(false);
    if named_scale || properties.manufacturer_data.contains_key(&SCALE_MANUFACTURER_ID) {
        return Some(ProtocolKind::AdvertScale);
    }

    None
}

async fn subscribe_data_characteristic(
    peripheral: &Peripheral,
    protocol: ProtocolKind,
) -> Result<(), DeviceError> {
    peripheral.discover_services().await?;

    let (service_uuid, data_uuid) = match protocol {
        ProtocolKind::Progressor => (make_progressor_service_uuid(), make_progressor_data_uuid()),
        ProtocolKind::Board => (make_board_service_uuid(), make_board_data_uuid()),
        ProtocolKind::AdvertScale => return Ok(()),
    };

    for service in peripheral.services() {
        if !service.uuid.eq(&service_uuid) {
            continue;
        }

        for characteristic in &service.characteristics {
            if !characteristic.uuid.eq(&data_uuid) {
                continue;
            }

            info!(
                "Subscribing to characteristic {:?} {:?}",
                service.uuid, characteristic.uuid
            );
            peripheral.subscribe(characteristic).await?;

            if protocol == ProtocolKind::Progressor {
                start_measurement(peripheral, &service).await;
            }
            return Ok(());
        }
    }

    Err(DeviceError::MissingCharacteristic)
}

/// Tells a Progressor to start streaming. Best effort: some firmware
/// revisions stream without being asked.
async fn start_measurement(peripheral: &Peripheral, service: &Service) {
    let control_uuid = make_progressor_control_uuid();
    let control = match service
        .characteristics
        .iter()
        .find(|c| c.uuid == control_uuid)
    {
        Some(v) => v,
        None => {
            debug!("No control characteristic; assuming device streams unprompted");
            return;
        }
    };

    let fut = peripheral.write(
        control,
        &PROGRESSOR_CMD_START_MEASUREMENT,
        WriteType::WithResponse,
    );

    tokio::select! {
        _ = sleep(WRITE_DEADLINE) => {
            warn!("Sending to control characteristic took too long");
        }
        result = fut => {
            if let Err(err) = result {
                warn!("Failed to send start command: {:?}", err);
            }
        }
    };
}

fn read_notifications_task(
    cancel: CancellationToken,
    peripheral: &Peripheral,
    protocol: ProtocolKind,
    mut sample_sender: Sender<TimestampedSample>,
) -> JoinHandle<Result<(), DeviceError>> {
    let peripheral = peripheral.clone();
    let data_uuid = match protocol {
        ProtocolKind::Progressor => make_progressor_data_uuid(),
        ProtocolKind::Board => make_board_data_uuid(),
        ProtocolKind::AdvertScale => make_board_data_uuid(), // never spawned for adverts
    };

    spawn(async move {
        let mut notifications = peripheral.notifications().await?;
        let mut board = BoardTransport::new();

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                notification = notifications.next() => {
                    let data = match notification {
                        Some(v) => v,
                        None => break 'mainloop,
                    };
                    if !data.uuid.eq(&data_uuid) {
                        continue;
                    }

                    let samples = match protocol {
                        ProtocolKind::Progressor => {
                            ProgressorTransport::parse_notification(&data.value)
                        }
                        ProtocolKind::Board => board.parse_notification(&data.value),
                        ProtocolKind::AdvertScale => Vec::new(),
                    };

                    for sample in samples {
                        if sample_sender.send(sample).await.is_err() {
                            break 'mainloop;
                        }
                    }
                },
            }
        }

        Ok(())
    })
}
