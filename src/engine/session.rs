//! The session task: the single logical execution context that owns the
//! grip state machine.
//!
//! BLE notifications arrive on transport-owned contexts; everything is
//! serialized through one mpsc channel into this task before touching
//! engine state, so the state machine is never entered reentrantly. The
//! off-target repeat timer lives here too and therefore cannot race a
//! sample-processing step.

use futures::channel::mpsc::{channel, Sender};
use futures::{SinkExt, StreamExt};
use log::warn;
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, Interval};
use tokio_util::sync::CancellationToken;

use crate::config::types::EngineConfig;
use crate::device::types::DeviceEvent;
use crate::engine::machine::{GripEvent, GripStateMachine};

/// How often the off-target feedback event repeats while still off-target.
pub const OFF_TARGET_REPEAT_INTERVAL: Duration = Duration::from_millis(500);

/// Commands accepted by the session task between samples.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Swap in a new configuration snapshot.
    SetConfig(EngineConfig),
}

/// Spawns the session loop. Device events go in through the first sender,
/// configuration updates through the second; grip events come out through
/// `event_senders`.
pub fn session_task(
    cancel: CancellationToken,
    config: EngineConfig,
    event_senders: Vec<Sender<GripEvent>>,
) -> (Sender<DeviceEvent>, Sender<SessionCommand>, JoinHandle<()>) {
    let (device_sender, mut device_receiver) = channel::<DeviceEvent>(128);
    let (command_sender, mut command_receiver) = channel::<SessionCommand>(8);

    let handle = spawn(async move {
        let mut machine = GripStateMachine::new(config);
        let mut event_senders = event_senders;
        let mut repeat_timer: Option<Interval> = None;

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                Some(event) = device_receiver.next() => {
                    if let DeviceEvent::Sample(sample) = event {
                        let grip_events = machine.handle_sample(sample);
                        send_all(&mut event_senders, grip_events).await;

                        // Re-arm or drop the repeat timer to follow the
                        // machine's off-target flag; replacing the timer is
                        // what cancels the previous one.
                        match (machine.off_target(), &repeat_timer) {
                            (Some(_), None) => {
                                repeat_timer = Some(interval_at(
                                    Instant::now() + OFF_TARGET_REPEAT_INTERVAL,
                                    OFF_TARGET_REPEAT_INTERVAL,
                                ));
                            },
                            (None, Some(_)) => {
                                repeat_timer = None;
                            },
                            _ => {},
                        }
                    }
                },
                Some(command) = command_receiver.next() => {
                    match command {
                        SessionCommand::SetConfig(new_config) => {
                            machine.update_config(new_config);
                        },
                    }
                },
                _ = tick_opt(&mut repeat_timer) => {
                    if let Some(difference) = machine.off_target() {
                        send_all(
                            &mut event_senders,
                            vec![GripEvent::OffTarget { difference }],
                        ).await;
                    } else {
                        repeat_timer = None;
                    }
                },
            }
        }
    });

    (device_sender, command_sender, handle)
}

async fn tick_opt(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn send_all(senders: &mut [Sender<GripEvent>], events: Vec<GripEvent>) {
    for event in events {
        for sender in senders.iter_mut() {
            if let Err(err) = sender.send(event.clone()).await {
                warn!("Failed to send grip event: {}", err);
            }
        }
    }
}
