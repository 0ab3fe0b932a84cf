//! Voltage sweep planning and run configuration errors

use thiserror::Error;

use crate::{
    supply::SupplyLimits,
    units::Volt,
};

/// Invalid run configuration
///
/// These are the only errors which prevent a run from starting and they are all raised before any
/// hardware is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError
{
    #[error("voltage step must be greater than zero")]
    NonPositiveStep,
    #[error("retries per voltage level must be at least one")]
    NoRetries,
    #[error("cycle timeout must be greater than zero")]
    ZeroCycleTimeout,
    #[error("no voltage levels given")]
    NoLevels,
    #[error("no candidate DUT serial ports given")]
    NoCandidates,
    #[error("{voltage} is outside of the supply's range {min} to {max}")]
    OutOfRange
    {
        voltage: Volt,
        min: Volt,
        max: Volt,
    },
    #[error("supply range is inverted ({min} is above {max})")]
    InvertedRange
    {
        min: Volt,
        max: Volt,
    },
}

/// The ordered voltage levels of a sweep
///
/// A sweep always runs from the higher bound down to the lower bound, whichever order the bounds
/// were given in. Levels are strictly decreasing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoltagePlan
{
    levels: Vec<Volt>,
}

impl VoltagePlan
{
    /// Levels from `max(start, end)` down to the last value not below `min(start, end)`
    pub fn sweep(start: Volt, end: Volt, step: Volt) -> Result<Self, ConfigError>
    {
        if step.is_zero() {
            return Err(ConfigError::NonPositiveStep);
        }

        let (high, low) = if start >= end { (start, end) } else { (end, start) };
        let mut levels = Vec::new();
        let mut next = Some(high);

        while let Some(voltage) = next.filter(|voltage| *voltage >= low) {
            levels.push(voltage);
            next = voltage.checked_sub(step);
        }

        Ok(Self { levels })
    }

    pub fn levels(&self) -> &[Volt]
    {
        &self.levels
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Volt>
    {
        self.levels.iter()
    }

    pub fn len(&self) -> usize
    {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.levels.is_empty()
    }

    /// Rejects the plan if any level cannot be programmed on the supply
    pub fn check_within(&self, limits: &SupplyLimits) -> Result<(), ConfigError>
    {
        if limits.voltage_min > limits.voltage_max {
            return Err(ConfigError::InvertedRange {
                min: limits.voltage_min,
                max: limits.voltage_max,
            });
        }

        match self.levels.iter().find(|voltage| !limits.contains(**voltage)) {
            Some(voltage) => Err(ConfigError::OutOfRange {
                voltage: *voltage,
                min: limits.voltage_min,
                max: limits.voltage_max,
            }),
            None => Ok(()),
        }
    }
}

impl <'a> IntoIterator for &'a VoltagePlan
{
    type Item = &'a Volt;
    type IntoIter = std::slice::Iter<'a, Volt>;

    fn into_iter(self) -> Self::IntoIter
    {
        self.levels.iter()
    }
}
