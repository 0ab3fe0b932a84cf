//! Per-cycle results

use std::time::Duration;

use crate::{
    classify::BootOutcome,
    supply::Sample,
    units::Volt,
};

/// The current samples captured during one boot, and the voltage they were captured at
///
/// Built once when the cycle ends and never modified afterwards. A cycle which captured nothing
/// has an empty trace, not a missing one.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerTrace
{
    voltage: Volt,
    samples: Vec<Sample>,
}

impl PowerTrace
{
    pub fn captured(voltage: Volt, samples: Vec<Sample>) -> Self
    {
        Self { voltage, samples }
    }

    pub fn empty(voltage: Volt) -> Self
    {
        Self::captured(voltage, Vec::new())
    }

    pub fn voltage(&self) -> Volt
    {
        self.voltage
    }

    pub fn samples(&self) -> &[Sample]
    {
        &self.samples
    }

    pub fn len(&self) -> usize
    {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.samples.is_empty()
    }
}

/// One power cycle at one voltage level
#[derive(Debug, Clone)]
pub struct CycleAttempt
{
    pub voltage: Volt,
    /// Zero based index of the retry at this voltage
    pub cycle: u32,
    pub trace: PowerTrace,
    pub outcome: BootOutcome,
    /// From switching the output on until the outcome was known
    pub elapsed: Duration,
}

impl CycleAttempt
{
    /// One based cycle number as shown to people and used in file names
    pub fn number(&self) -> u32
    {
        self.cycle + 1
    }

    /// Elapsed time in whole milliseconds, saturating
    pub fn elapsed_ms(&self) -> u64
    {
        u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}
