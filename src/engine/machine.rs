//! The grip detection state machine.
//!
//! Consumes the normalized sample stream plus an [`EngineConfig`] snapshot
//! and produces discrete states and events. Engage/fail decisions compare
//! the tared value (raw minus the calibrated baseline); everything else a
//! consumer sees (recorded samples, live statistics, off-target comparison,
//! display force) uses the raw value. The baseline exists only to separate
//! hardware zero-drift from an actual grip.

use std::time::{Duration, SystemTime};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::types::EngineConfig;
use crate::device::types::TimestampedSample;
use crate::engine::thresholds::ThresholdKind;
use crate::stats;
use crate::stats::rep::RepResult;

/// Maps device-local microsecond timestamps onto wall-clock display times.
///
/// The first sample of a session pins `(device_timestamp, wall clock)`;
/// every later sample is placed relative to that pair, which spaces out
/// batch-delivered samples instead of stamping them all with arrival time.
#[derive(Debug, Clone, Copy)]
pub struct Timebase {
    device_start: u32,
    wall_start: SystemTime,
}

impl Timebase {
    pub fn new(device_timestamp: u32, wall_clock: SystemTime) -> Self {
        Timebase {
            device_start: device_timestamp,
            wall_start: wall_clock,
        }
    }

    pub fn display_time(&self, device_timestamp: u32) -> SystemTime {
        let delta = device_timestamp.wrapping_sub(self.device_start);
        self.wall_start + Duration::from_micros(delta as u64)
    }
}

/// Authoritative session state. Exactly one instance is live at a time; the
/// sample buffer inside a variant is owned by that variant until the state
/// transitions away.
#[derive(Debug)]
pub enum GripState {
    /// Nothing received yet.
    WaitingForSamples,
    /// Accumulating the zero-drift baseline window.
    Calibrating { start_ts: u32, samples: Vec<f64> },
    /// Calibrated, waiting for a grip or a weight to measure.
    Idle { baseline: f64 },
    /// An active grip.
    Gripping {
        baseline: f64,
        start_ts: u32,
        samples: Vec<f64>,
    },
    /// A weight is being held for measurement, not trained against.
    WeightCalibration {
        baseline: f64,
        samples: Vec<f64>,
        holding: bool,
    },
}

/// Data-free projection of [`GripState`] for observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GripStateKind {
    WaitingForSamples,
    Calibrating,
    Idle,
    Gripping,
    WeightCalibration,
}

impl GripState {
    pub fn kind(&self) -> GripStateKind {
        match self {
            GripState::WaitingForSamples => GripStateKind::WaitingForSamples,
            GripState::Calibrating { .. } => GripStateKind::Calibrating,
            GripState::Idle { .. } => GripStateKind::Idle,
            GripState::Gripping { .. } => GripStateKind::Gripping,
            GripState::WeightCalibration { .. } => GripStateKind::WeightCalibration,
        }
    }
}

/// Events emitted while processing samples, in emission order.
#[derive(Debug, Clone)]
pub enum GripEvent {
    StateChanged(GripStateKind),
    CalibrationComplete { baseline: f64 },
    GripStarted,
    GripFailed(RepResult),
    WeightMeasured { weight_kg: f64 },
    /// Entered off-target. `difference` is raw minus target: positive means
    /// too heavy, negative too light.
    OffTarget { difference: f64 },
    /// Back on-target (or target cleared).
    OffTargetCleared,
}

/// Live statistics over the raw samples of the grip in progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiveStats {
    pub mean: f64,
    pub std_deviation: f64,
}

/// The central detection engine. Not safe for concurrent mutation: all
/// samples and configuration updates must arrive on one logical execution
/// context (see the session task).
pub struct GripStateMachine {
    state: GripState,
    config: EngineConfig,
    timebase: Option<Timebase>,
    off_target: Option<f64>,
}

impl GripStateMachine {
    pub fn new(config: EngineConfig) -> Self {
        config.thresholds.validate();
        GripStateMachine {
            state: GripState::WaitingForSamples,
            config,
            timebase: None,
            off_target: None,
        }
    }

    /// Swaps in a new configuration snapshot. Must be called between
    /// samples, never concurrently with `handle_sample`.
    pub fn update_config(&mut self, config: EngineConfig) {
        config.thresholds.validate();
        self.config = config;
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state_kind(&self) -> GripStateKind {
        self.state.kind()
    }

    /// The current signed off-target difference, if off-target right now.
    pub fn off_target(&self) -> Option<f64> {
        self.off_target
    }

    /// Mean and standard deviation of the raw samples of the active grip.
    pub fn live_stats(&self) -> Option<LiveStats> {
        match &self.state {
            GripState::Gripping { samples, .. } => Some(LiveStats {
                mean: stats::mean(samples),
                std_deviation: stats::std_deviation(samples),
            }),
            _ => None,
        }
    }

    pub fn timebase(&self) -> Option<Timebase> {
        self.timebase
    }

    /// Processes one sample against the current state. Total: every sample
    /// is handled by exactly one incoming state.
    pub fn handle_sample(&mut self, sample: TimestampedSample) -> Vec<GripEvent> {
        self.handle_sample_at(sample, SystemTime::now())
    }

    /// Like [`handle_sample`](Self::handle_sample), with an explicit wall
    /// clock for the timebase reference (tests pin this).
    pub fn handle_sample_at(
        &mut self,
        sample: TimestampedSample,
        wall_clock: SystemTime,
    ) -> Vec<GripEvent> {
        if self.timebase.is_none() {
            self.timebase = Some(Timebase::new(sample.device_timestamp, wall_clock));
        }

        let mut events = Vec::new();
        let state = std::mem::replace(&mut self.state, GripState::WaitingForSamples);

        self.state = match state {
            GripState::WaitingForSamples => {
                if self.config.calibration_enabled {
                    debug!("First sample received, starting baseline calibration");
                    let next = GripState::Calibrating {
                        start_ts: sample.device_timestamp,
                        samples: vec![sample.weight_kg],
                    };
                    events.push(GripEvent::StateChanged(next.kind()));
                    next
                } else {
                    events.push(GripEvent::StateChanged(GripStateKind::Idle));
                    self.process_idle(0.0, sample, &mut events)
                }
            }
            GripState::Calibrating { start_ts, mut samples } => {
                samples.push(sample.weight_kg);

                let elapsed_micros = sample.device_timestamp.wrapping_sub(start_ts);
                let elapsed_secs = elapsed_micros as f64 / 1_000_000.0;
                if elapsed_secs >= self.config.calibration_duration_secs {
                    let baseline = stats::mean(&samples);
                    info!(
                        "Baseline calibration complete: {:.3}kg over {} samples",
                        baseline,
                        samples.len()
                    );
                    events.push(GripEvent::CalibrationComplete { baseline });
                    events.push(GripEvent::StateChanged(GripStateKind::Idle));
                    GripState::Idle { baseline }
                } else {
                    GripState::Calibrating { start_ts, samples }
                }
            }
            GripState::Idle { baseline } => self.process_idle(baseline, sample, &mut events),
            GripState::Gripping {
                baseline,
                start_ts,
                mut samples,
            } => {
                samples.push(sample.weight_kg);

                let tared = sample.weight_kg - baseline;
                let fail = self.config.thresholds.effective(ThresholdKind::Disengage);
                // Strict comparison: a tared value exactly at the fail
                // threshold keeps the grip alive.
                if tared < fail {
                    let rep = self.finish_rep(start_ts, sample.device_timestamp, samples);
                    info!(
                        "Grip failed after {:.2}s ({} samples)",
                        rep.duration.as_secs_f64(),
                        rep.samples.len()
                    );
                    // Keep the off-target event stream symmetric: a grip
                    // that ends while off-target clears it explicitly.
                    if self.off_target.take().is_some() {
                        events.push(GripEvent::OffTargetCleared);
                    }
                    events.push(GripEvent::GripFailed(rep));
                    events.push(GripEvent::StateChanged(GripStateKind::Idle));
                    GripState::Idle { baseline }
                } else {
                    self.evaluate_off_target(sample.weight_kg, &mut events);
                    GripState::Gripping {
                        baseline,
                        start_ts,
                        samples,
                    }
                }
            }
            GripState::WeightCalibration {
                baseline,
                mut samples,
                mut holding,
            } => {
                let tared = sample.weight_kg - baseline;
                let engage = self.config.thresholds.effective(ThresholdKind::Engage);
                let fail = self.config.thresholds.effective(ThresholdKind::Disengage);

                if self.config.can_engage && tared >= engage {
                    events.push(GripEvent::GripStarted);
                    events.push(GripEvent::StateChanged(GripStateKind::Gripping));
                    GripState::Gripping {
                        baseline,
                        start_ts: sample.device_timestamp,
                        samples: vec![sample.weight_kg],
                    }
                } else {
                    if holding {
                        if tared >= self.config.weight_calibration_threshold_kg {
                            samples.push(sample.weight_kg);
                        } else {
                            // The weight came off the hook: freeze the
                            // estimate, do not keep averaging the release.
                            let measured =
                                stats::trimmed_median(&samples, stats::DEFAULT_TRIM_FRACTION);
                            info!("Measured held weight: {:.2}kg", measured);
                            events.push(GripEvent::WeightMeasured { weight_kg: measured });
                            holding = false;
                        }
                    }

                    if tared < fail {
                        events.push(GripEvent::StateChanged(GripStateKind::Idle));
                        GripState::Idle { baseline }
                    } else {
                        GripState::WeightCalibration {
                            baseline,
                            samples,
                            holding,
                        }
                    }
                }
            }
        };

        events
    }

    fn process_idle(
        &mut self,
        baseline: f64,
        sample: TimestampedSample,
        events: &mut Vec<GripEvent>,
    ) -> GripState {
        let tared = sample.weight_kg - baseline;
        let engage = self.config.thresholds.effective(ThresholdKind::Engage);

        // Inclusive comparison: a tared value exactly at the engage
        // threshold starts the grip.
        if self.config.can_engage && tared >= engage {
            events.push(GripEvent::GripStarted);
            events.push(GripEvent::StateChanged(GripStateKind::Gripping));
            return GripState::Gripping {
                baseline,
                start_ts: sample.device_timestamp,
                samples: vec![sample.weight_kg],
            };
        }

        if tared >= self.config.weight_calibration_threshold_kg {
            debug!("Entering weight calibration at {:.2}kg", sample.weight_kg);
            events.push(GripEvent::StateChanged(GripStateKind::WeightCalibration));
            return GripState::WeightCalibration {
                baseline,
                samples: vec![sample.weight_kg],
                holding: true,
            };
        }

        GripState::Idle { baseline }
    }

    /// Off-target is compared on the raw value, never the tared one.
    fn evaluate_off_target(&mut self, raw: f64, events: &mut Vec<GripEvent>) {
        let target = match self.config.thresholds.target_weight {
            Some(target) => target,
            None => {
                if self.off_target.take().is_some() {
                    events.push(GripEvent::OffTargetCleared);
                }
                return;
            }
        };

        let difference = raw - target;
        let tolerance = self.config.thresholds.effective(ThresholdKind::Tolerance);

        if difference.abs() >= tolerance {
            if self.off_target.is_none() {
                events.push(GripEvent::OffTarget { difference });
            }
            self.off_target = Some(difference);
        } else if self.off_target.take().is_some() {
            events.push(GripEvent::OffTargetCleared);
        }
    }

    fn finish_rep(&self, start_ts: u32, end_ts: u32, samples: Vec<f64>) -> RepResult {
        let duration = Duration::from_micros(end_ts.wrapping_sub(start_ts) as u64);
        let start_time = match &self.timebase {
            Some(timebase) => timebase.display_time(start_ts),
            None => SystemTime::now(),
        };
        RepResult::new(
            start_time,
            duration,
            samples,
            self.config.thresholds.target_weight,
        )
    }
}
