use clap::{Parser, ValueEnum};
use log::info;

use gripmeter::app::RunOptions;
use gripmeter::config::types::EngineConfig;
use gripmeter::device::types::ProtocolKind;
use gripmeter::error::AppRunError;
use gripmeter::{init_logging, run};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DeviceChoice {
    Progressor,
    Board,
    Scale,
}

impl From<DeviceChoice> for ProtocolKind {
    fn from(choice: DeviceChoice) -> Self {
        match choice {
            DeviceChoice::Progressor => ProtocolKind::Progressor,
            DeviceChoice::Board => ProtocolKind::Board,
            DeviceChoice::Scale => ProtocolKind::AdvertScale,
        }
    }
}

/// Grip-force telemetry: connects to a sensor and logs detection events.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// Only consider devices speaking this protocol.
    #[arg(long, value_enum)]
    device: Option<DeviceChoice>,

    /// Target weight in kg; enables off-target feedback.
    #[arg(long)]
    target: Option<f64>,

    /// Resolve thresholds as percentages of the target weight.
    #[arg(long)]
    percentage_mode: bool,

    /// Skip the baseline calibration window.
    #[arg(long)]
    no_calibration: bool,

    /// Report weights in pounds instead of kilograms.
    #[arg(long)]
    lbs: bool,
}

fn main() -> Result<(), AppRunError> {
    init_logging();
    info!(concat!("gripmeter ", env!("CARGO_PKG_VERSION")));

    let cli = Cli::parse();

    let mut config = EngineConfig::default();
    config.calibration_enabled = !cli.no_calibration;
    config.thresholds.target_weight = cli.target;
    config.thresholds.percentage_mode = cli.percentage_mode;

    run(RunOptions {
        config,
        device_filter: cli.device.map(Into::into),
        use_lbs: cli.lbs,
    })
}
