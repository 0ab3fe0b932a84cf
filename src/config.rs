//! Command line
//!
//! Raw arguments are turned into validated run settings here, before any port is opened.

use std::{ path::PathBuf, time::Duration };
use clap::{ Args, Parser, Subcommand };

use crate::{
    classify::MarkerSet,
    orchestrator::{ AnomalyPolicy, CycleSettings },
    plan::{ ConfigError, VoltagePlan },
    supply::SupplyLimits,
    toggle::ToggleSettings,
    units::Volt,
};

pub const DEFAULT_LOG_FILE: &str = "voltage_test.log";

#[derive(Debug, Parser)]
#[command(name = "boot-sweep", version, about = "Power cycle a device across a voltage sweep and classify its boots")]
pub struct Cli
{
    #[command(subcommand)]
    pub command: Command,

    /// Log file, truncated at start
    #[arg(long, global = true, default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum Command
{
    /// Sweep the supply voltage down, power cycling the DUT at each level
    Sweep(SweepArgs),
    /// Toggle the supply output through a few levels
    Toggle(ToggleArgs),
}

/// The bench supply powering the DUT
#[derive(Debug, Args)]
pub struct SupplyArgs
{
    /// Serial port of the supply's control channel
    #[arg(long)]
    pub supply_port: String,

    #[arg(long, default_value_t = 9600)]
    pub supply_baud: u32,

    /// Lowest voltage the supply may be programmed to
    #[arg(long, default_value = "0.8")]
    pub supply_min: Volt,

    /// Highest voltage the supply may be programmed to
    #[arg(long, default_value = "5.0")]
    pub supply_max: Volt,

    /// Current sampling interval in milliseconds
    #[arg(long, default_value_t = 10)]
    pub sample_interval_ms: u64,
}

impl SupplyArgs
{
    pub fn limits(&self) -> SupplyLimits
    {
        SupplyLimits {
            voltage_min: self.supply_min,
            voltage_max: self.supply_max,
        }
    }

    pub fn sample_interval(&self) -> Duration
    {
        Duration::from_millis(self.sample_interval_ms)
    }
}

#[derive(Debug, Args)]
pub struct SweepArgs
{
    #[command(flatten)]
    pub supply: SupplyArgs,

    /// First voltage of the sweep
    #[arg(long, default_value = "3.1")]
    pub start: Volt,

    /// Last voltage of the sweep
    #[arg(long, default_value = "2.6")]
    pub end: Volt,

    #[arg(long, default_value = "0.1")]
    pub step: Volt,

    /// Power cycles per voltage level
    #[arg(long, default_value_t = 50)]
    pub retries: u32,

    /// Seconds allowed per cycle to connect and see a decisive line
    #[arg(long, default_value_t = 20)]
    pub timeout_secs: u64,

    /// Time the output stays off before each power on
    #[arg(long, default_value_t = 2000)]
    pub settle_ms: u64,

    #[arg(long, default_value_t = 1000)]
    pub level_pause_ms: u64,

    /// DUT serial baud rate
    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,

    /// Candidate DUT ports in priority order. `*` matches a run starting with a digit.
    #[arg(long = "port", default_values = ["/dev/cu.usbmodem*", "/dev/tty.usbmodem*"])]
    pub ports: Vec<String>,

    /// Directory for traces and the outcome log
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// What to do when the DUT boots without reaching its application state
    #[arg(long, value_enum, default_value_t = AnomalyPolicy::Continue)]
    pub on_misconfigured: AnomalyPolicy,

    /// Additional line meaning the DUT reached its application state
    #[arg(long = "success-marker")]
    pub success_markers: Vec<String>,

    /// Additional line meaning the DUT booted but halted on its configuration
    #[arg(long = "halted-marker")]
    pub halted_markers: Vec<String>,

    /// Additional line meaning the boot failed
    #[arg(long = "fatal-marker")]
    pub fatal_markers: Vec<String>,
}

impl SweepArgs
{
    /// The sweep levels, checked against the supply's range
    pub fn plan(&self) -> Result<VoltagePlan, ConfigError>
    {
        let plan = VoltagePlan::sweep(self.start, self.end, self.step)?;
        plan.check_within(&self.supply.limits())?;
        Ok(plan)
    }

    pub fn settings(&self) -> Result<CycleSettings, ConfigError>
    {
        let settings = CycleSettings::default()
            .retries(self.retries)
            .cycle_timeout(Duration::from_secs(self.timeout_secs))
            .settle(Duration::from_millis(self.settle_ms))
            .level_pause(Duration::from_millis(self.level_pause_ms))
            .policy(self.on_misconfigured);

        settings.validate()?;
        Ok(settings)
    }

    /// The default markers plus any given on the command line
    pub fn markers(&self) -> MarkerSet
    {
        let markers = self.success_markers.iter().fold(MarkerSet::default(), |set, marker| set.success(marker.as_str()));
        let markers = self.halted_markers.iter().fold(markers, |set, marker| set.halted(marker.as_str()));
        self.fatal_markers.iter().fold(markers, |set, marker| set.fatal(marker.as_str()))
    }

    pub fn candidates(&self) -> Result<Vec<String>, ConfigError>
    {
        if self.ports.is_empty() {
            return Err(ConfigError::NoCandidates);
        }
        Ok(self.ports.clone())
    }
}

#[derive(Debug, Args)]
pub struct ToggleArgs
{
    #[command(flatten)]
    pub supply: SupplyArgs,

    /// Voltage levels visited each round
    #[arg(long = "level", default_values = ["0", "1.5", "3.0"])]
    pub levels: Vec<Volt>,

    #[arg(long, default_value_t = 3000)]
    pub hold_ms: u64,

    #[arg(long, default_value_t = 2000)]
    pub off_ms: u64,

    /// Stop after this many rounds instead of running until interrupted
    #[arg(long)]
    pub rounds: Option<u32>,
}

impl ToggleArgs
{
    pub fn settings(&self) -> Result<ToggleSettings, ConfigError>
    {
        let settings = ToggleSettings {
            levels: self.levels.clone(),
            hold: Duration::from_millis(self.hold_ms),
            off: Duration::from_millis(self.off_ms),
            rounds: self.rounds,
        };

        settings.validate(&self.supply.limits())?;
        Ok(settings)
    }
}
