//! Headless session runner: wires the connection supervisor to the session
//! task, connects to the first matching device and logs everything the
//! engine produces until interrupted.

use futures::channel::mpsc::channel;
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::types::EngineConfig;
use crate::device::constants::KG_TO_LBS;
use crate::device::supervisor::{supervisor_task, SupervisorCommand};
use crate::device::types::{DeviceEvent, ProtocolKind};
use crate::engine::machine::GripEvent;
use crate::engine::session::session_task;
use crate::error::{AppRunError, DeviceError};

/// Options for one run of the headless session.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub config: EngineConfig,
    /// Only consider devices speaking this protocol.
    pub device_filter: Option<ProtocolKind>,
    /// Report weights in pounds instead of kilograms.
    pub use_lbs: bool,
}

pub fn run_app(options: RunOptions) -> Result<(), AppRunError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(session_loop(options))?;
    Ok(())
}

fn format_weight(kg: f64, lbs: bool) -> String {
    if lbs {
        format!("{:.2}lbs", kg * KG_TO_LBS)
    } else {
        format!("{:.2}kg", kg)
    }
}

async fn session_loop(options: RunOptions) -> Result<(), DeviceError> {
    let cancel = CancellationToken::new();

    let (grip_sender, mut grip_events) = channel::<GripEvent>(64);
    let (device_sender, session_commands, session_handle) =
        session_task(cancel.clone(), options.config, vec![grip_sender]);
    drop(session_commands);

    let (monitor_sender, mut device_events) = channel::<DeviceEvent>(64);
    let (mut supervisor_commands, supervisor_handle) =
        supervisor_task(cancel.clone(), vec![device_sender, monitor_sender]);

    if let Some(protocol) = options.device_filter {
        supervisor_commands
            .send(SupervisorCommand::SetDeviceFilter(Some(protocol)))
            .await?;
    }

    let lbs = options.use_lbs;
    let mut connect_requested = false;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    warn!("Failed to listen for ctrl-c: {}", err);
                }
                info!("Shutting down");
                cancel.cancel();
                break;
            },
            Some(event) = device_events.next() => {
                match event {
                    DeviceEvent::StateChange(state) => {
                        info!("Device: {}", state);
                    },
                    DeviceEvent::Discovered(descriptor) => {
                        info!(
                            "Found {} ({}) rssi={:?}",
                            descriptor.name, descriptor.protocol, descriptor.signal_strength
                        );
                        if !connect_requested {
                            connect_requested = true;
                            supervisor_commands
                                .send(SupervisorCommand::Connect(descriptor.id))
                                .await?;
                        }
                    },
                    DeviceEvent::Sample(_) => {},
                }
            },
            Some(event) = grip_events.next() => {
                match event {
                    GripEvent::StateChanged(kind) => info!("State: {:?}", kind),
                    GripEvent::CalibrationComplete { baseline } => {
                        info!("Calibrated, baseline {}", format_weight(baseline, lbs));
                    },
                    GripEvent::GripStarted => info!("Grip started"),
                    GripEvent::GripFailed(rep) => {
                        info!(
                            "Grip ended: {:.2}s, {} samples, mean {} (holding {})",
                            rep.duration.as_secs_f64(),
                            rep.samples.len(),
                            format_weight(rep.raw_mean(), lbs),
                            format_weight(rep.filtered_mean(), lbs),
                        );
                    },
                    GripEvent::WeightMeasured { weight_kg } => {
                        info!("Measured weight: {}", format_weight(weight_kg, lbs));
                    },
                    GripEvent::OffTarget { difference } => {
                        let side = if difference > 0.0 { "heavy" } else { "light" };
                        info!("Off target: {} too {}", format_weight(difference.abs(), lbs), side);
                    },
                    GripEvent::OffTargetCleared => info!("Back on target"),
                }
            },
        }
    }

    let _ = session_handle.await;
    let _ = supervisor_handle.await;
    Ok(())
}
