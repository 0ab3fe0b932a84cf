//! Plain output toggling, for checking the supply wiring before a sweep

use std::time::Duration;
use tracing::{ info, warn };

use crate::{
    cancel::Cancel,
    orchestrator::RunError,
    plan::ConfigError,
    supply::{ PowerSource, SupplyLimits },
    units::Volt,
};

#[derive(Debug, Clone)]
pub struct ToggleSettings
{
    /// Visited in order each round
    pub levels: Vec<Volt>,
    /// How long each level is held with the output on
    pub hold: Duration,
    /// How long the output stays off after each level
    pub off: Duration,
    /// `None` toggles until cancelled
    pub rounds: Option<u32>,
}

impl Default for ToggleSettings
{
    fn default() -> Self
    {
        Self {
            levels: vec![Volt::from_millivolts(0), Volt::from_millivolts(1_500), Volt::from_millivolts(3_000)],
            hold: Duration::from_secs(3),
            off: Duration::from_secs(2),
            rounds: None,
        }
    }
}

impl ToggleSettings
{
    /// Levels must be zero or within `limits`
    pub fn validate(&self, limits: &SupplyLimits) -> Result<(), ConfigError>
    {
        if self.levels.is_empty() {
            return Err(ConfigError::NoLevels);
        }

        match self.levels.iter().find(|voltage| !voltage.is_zero() && !limits.contains(**voltage)) {
            Some(voltage) => Err(ConfigError::OutOfRange {
                voltage: *voltage,
                min: limits.voltage_min,
                max: limits.voltage_max,
            }),
            None => Ok(()),
        }
    }
}

async fn toggle_rounds<P: PowerSource>(power: &mut P, settings: &ToggleSettings) -> u32
{
    let mut round = 0;

    while settings.rounds.map_or(true, |rounds| round < rounds) {
        round += 1;
        info!(round, "toggle round");

        for &voltage in settings.levels.iter() {
            if let Err(err) = power.set_voltage(voltage).await {
                warn!(%err, %voltage, "unable to set voltage");
            }
            if let Err(err) = power.set_output(true).await {
                warn!(%err, "unable to switch output on");
            }
            info!(%voltage, "output on");
            tokio::time::sleep(settings.hold).await;

            if let Err(err) = power.set_output(false).await {
                warn!(%err, "unable to switch output off");
            }
            info!("output off");
            tokio::time::sleep(settings.off).await;
        }
    }

    round
}

/// Cycles the output through `settings.levels`
///
/// Returns the number of completed rounds. Supply errors are logged and toggling carries on. The
/// output is switched off before returning, also when cancelled.
pub async fn run_toggle<P>(power: &mut P, settings: &ToggleSettings, cancel: &Cancel) -> Result<u32, RunError>
    where P: PowerSource
{
    if settings.levels.is_empty() {
        return Err(ConfigError::NoLevels.into());
    }

    let result = tokio::select! {
        rounds = toggle_rounds(&mut *power, settings) => Ok(rounds),
        _ = cancel.cancelled() => Err(RunError::Cancelled),
    };

    if let Err(err) = power.set_output(false).await {
        warn!(%err, "unable to switch output off during teardown");
    }

    result
}
