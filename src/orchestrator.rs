//! The voltage sweep
//!
//! # Cycle
//! For each level of a [`VoltagePlan`], and for each retry at that level, the orchestrator:
//!
//! 1. programs the level
//! 2. switches the output off and waits out the settle interval
//! 3. switches the output on, which reboots the device
//! 4. starts current sampling
//! 5. acquires a link to the device and classifies its boot, both out of one per-cycle budget
//! 6. stops sampling and drains the trace
//! 7. hands the attempt to the recorder
//! 8. applies the [`AnomalyPolicy`]
//!
//! Nothing that goes wrong inside a cycle ends the run. Supply errors are logged and the cycle goes
//! on with whatever trace was captured, link errors only consume budget, and recorder errors are
//! counted. The run ends early only on cancellation or when the policy says to abort.
//!
//! # Teardown
//! However the run ends, sampling is stopped, the output is switched off and the recorder is
//! flushed before [`CycleOrchestrator::run`] returns. A link held by an interrupted cycle is
//! released when the cycle's future is dropped.

use std::{ fmt, time::Duration };
use thiserror::Error;
use tokio::time::Instant;
use tracing::{ error, info, warn };

use crate::{
    attempt::{ CycleAttempt, PowerTrace },
    budget::Deadline,
    cancel::Cancel,
    classify::{ BootClassifier, BootOutcome },
    link::{ AddressSource, LinkAcquirer, LinkOpener },
    plan::{ ConfigError, VoltagePlan },
    record::TelemetryRecorder,
    supply::{ PowerSource, SupplyError },
    units::Volt,
};

pub const DEFAULT_RETRIES: u32 = 50;
pub const DEFAULT_CYCLE_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(2);
pub const DEFAULT_LEVEL_PAUSE: Duration = Duration::from_secs(1);

/// What to do when a device boots but does not reach its application state
///
/// That condition usually means missing or invalid credentials on the device, which no supply
/// voltage will fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum AnomalyPolicy
{
    /// Mark the run degraded and keep sweeping
    #[default]
    Continue,
    /// Stop the sweep once the attempt is recorded
    Abort,
}

#[derive(Debug, Clone)]
pub struct CycleSettings
{
    retries: u32,
    cycle_timeout: Duration,
    settle: Duration,
    level_pause: Duration,
    policy: AnomalyPolicy,
}

impl Default for CycleSettings
{
    fn default() -> Self
    {
        Self {
            retries: DEFAULT_RETRIES,
            cycle_timeout: DEFAULT_CYCLE_TIMEOUT,
            settle: DEFAULT_SETTLE,
            level_pause: DEFAULT_LEVEL_PAUSE,
            policy: AnomalyPolicy::default(),
        }
    }
}

impl CycleSettings
{
    /// Power cycles per voltage level
    pub fn retries(mut self, retries: u32) -> Self
    {
        self.retries = retries;
        self
    }

    /// Budget for link acquisition and classification together, counted from power on
    pub fn cycle_timeout(mut self, timeout: Duration) -> Self
    {
        self.cycle_timeout = timeout;
        self
    }

    /// Time the output stays off before each power on
    pub fn settle(mut self, settle: Duration) -> Self
    {
        self.settle = settle;
        self
    }

    /// Pause between two voltage levels
    pub fn level_pause(mut self, pause: Duration) -> Self
    {
        self.level_pause = pause;
        self
    }

    pub fn policy(mut self, policy: AnomalyPolicy) -> Self
    {
        self.policy = policy;
        self
    }

    pub fn get_retries(&self) -> u32
    {
        self.retries
    }

    pub fn get_cycle_timeout(&self) -> Duration
    {
        self.cycle_timeout
    }

    pub fn get_policy(&self) -> AnomalyPolicy
    {
        self.policy
    }

    pub fn validate(&self) -> Result<(), ConfigError>
    {
        if self.retries == 0 {
            return Err(ConfigError::NoRetries);
        }
        if self.cycle_timeout.is_zero() {
            return Err(ConfigError::ZeroCycleTimeout);
        }

        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RunError
{
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("run cancelled")]
    Cancelled,
    #[error("DUT booted without reaching its application state at {voltage}, cycle {cycle}")]
    MisconfiguredDut
    {
        voltage: Volt,
        cycle: u32,
    },
}

/// Outcome counts at one voltage level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSummary
{
    pub voltage: Volt,
    pub attempts: u32,
    pub booted: u32,
    pub halted: u32,
    pub failed: u32,
    pub timed_out: u32,
}

impl LevelSummary
{
    fn new(voltage: Volt) -> Self
    {
        Self {
            voltage,
            attempts: 0,
            booted: 0,
            halted: 0,
            failed: 0,
            timed_out: 0,
        }
    }

    fn count(&mut self, outcome: &BootOutcome)
    {
        self.attempts += 1;
        match outcome {
            BootOutcome::Success { reached_application_state: true } => self.booted += 1,
            BootOutcome::Success { reached_application_state: false } => self.halted += 1,
            BootOutcome::DefiniteFailure { .. } => self.failed += 1,
            BootOutcome::Timeout => self.timed_out += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary
{
    /// In sweep order
    pub levels: Vec<LevelSummary>,
    /// Attempts the recorder failed to persist
    pub record_failures: u32,
    /// Set when any device booted without reaching its application state
    pub degraded: bool,
}

impl RunSummary
{
    fn count(&mut self, attempt: &CycleAttempt)
    {
        let level = match self.levels.iter().position(|level| level.voltage == attempt.voltage) {
            Some(index) => &mut self.levels[index],
            None => {
                self.levels.push(LevelSummary::new(attempt.voltage));
                let last = self.levels.len() - 1;
                &mut self.levels[last]
            }
        };

        level.count(&attempt.outcome);
    }

    pub fn level(&self, voltage: Volt) -> Option<&LevelSummary>
    {
        self.levels.iter().find(|level| level.voltage == voltage)
    }

    fn total(&self, field: impl Fn(&LevelSummary) -> u32) -> u32
    {
        self.levels.iter().map(field).sum()
    }

    pub fn attempts(&self) -> u32
    {
        self.total(|level| level.attempts)
    }

    pub fn booted(&self) -> u32
    {
        self.total(|level| level.booted)
    }

    pub fn halted(&self) -> u32
    {
        self.total(|level| level.halted)
    }

    pub fn failed(&self) -> u32
    {
        self.total(|level| level.failed)
    }

    pub fn timed_out(&self) -> u32
    {
        self.total(|level| level.timed_out)
    }
}

impl fmt::Display for RunSummary
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        writeln!(f, "{:>8} {:>8} {:>8} {:>8} {:>8} {:>8}", "Voltage", "Attempts", "Booted", "Halted", "Failed", "Timeout")?;

        for level in self.levels.iter() {
            writeln!(
                f,
                "{:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
                format!("{:.2}", level.voltage),
                level.attempts,
                level.booted,
                level.halted,
                level.failed,
                level.timed_out,
            )?;
        }

        writeln!(
            f,
            "{:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
            "Total",
            self.attempts(),
            self.booted(),
            self.halted(),
            self.failed(),
            self.timed_out(),
        )?;

        if self.record_failures > 0 {
            writeln!(f, "{} attempt(s) could not be recorded", self.record_failures)?;
        }
        if self.degraded {
            writeln!(f, "run degraded: DUT booted without reaching its application state")?;
        }

        Ok(())
    }
}

fn log_supply_error(operation: &'static str, result: Result<(), SupplyError>)
{
    if let Err(err) = result {
        warn!(%err, operation, "supply command failed");
    }
}

/// Drives a voltage sweep over one supply and one device
pub struct CycleOrchestrator<P, O, A>
{
    power: P,
    acquirer: LinkAcquirer<O, A>,
    classifier: BootClassifier,
    settings: CycleSettings,
    summary: RunSummary,
}

impl <P, O, A> CycleOrchestrator<P, O, A>
    where P: PowerSource,
          O: LinkOpener,
          A: AddressSource,
{
    pub fn new(power: P, acquirer: LinkAcquirer<O, A>, classifier: BootClassifier, settings: CycleSettings) -> Self
    {
        Self {
            power,
            acquirer,
            classifier,
            settings,
            summary: RunSummary::default(),
        }
    }

    /// Counts of the most recent run, complete or not
    pub fn summary(&self) -> &RunSummary
    {
        &self.summary
    }

    pub fn power(&self) -> &P
    {
        &self.power
    }

    pub fn into_power(self) -> P
    {
        self.power
    }

    /// Runs the whole sweep, streaming every attempt to `recorder`
    ///
    /// Configuration is checked before anything is sent to the supply. Teardown runs on every other
    /// exit path.
    pub async fn run<R>(&mut self, plan: &VoltagePlan, recorder: &mut R, cancel: &Cancel) -> Result<(), RunError>
        where R: TelemetryRecorder
    {
        self.settings.validate()?;
        if plan.is_empty() {
            return Err(ConfigError::NoLevels.into());
        }
        if self.acquirer.candidates().is_empty() {
            return Err(ConfigError::NoCandidates.into());
        }

        self.summary = RunSummary::default();
        info!(
            levels = plan.len(),
            retries = self.settings.retries,
            cycle_timeout_secs = self.settings.cycle_timeout.as_secs_f64(),
            "starting voltage sweep"
        );

        let result = tokio::select! {
            result = self.sweep(plan, &mut *recorder) => result,
            _ = cancel.cancelled() => {
                warn!("cancellation requested, stopping sweep");
                Err(RunError::Cancelled)
            }
        };

        self.teardown(recorder).await;
        result
    }

    async fn sweep<R>(&mut self, plan: &VoltagePlan, recorder: &mut R) -> Result<(), RunError>
        where R: TelemetryRecorder
    {
        for (index, &voltage) in plan.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.settings.level_pause).await;
            }
            info!(%voltage, "testing voltage level");

            for cycle in 0..self.settings.retries {
                let attempt = self.run_cycle(voltage, cycle).await;

                if let Err(err) = recorder.record(&attempt).await {
                    error!(%err, %voltage, cycle = attempt.number(), "failed to record attempt");
                    self.summary.record_failures += 1;
                }
                self.summary.count(&attempt);

                self.apply_policy(&attempt)?;
            }
        }

        info!("voltage sweep complete");
        Ok(())
    }

    async fn run_cycle(&mut self, voltage: Volt, cycle: u32) -> CycleAttempt
    {
        info!(%voltage, cycle = cycle + 1, retries = self.settings.retries, "power cycle");

        log_supply_error("set voltage", self.power.set_voltage(voltage).await);
        log_supply_error("output off", self.power.set_output(false).await);
        tokio::time::sleep(self.settings.settle).await;

        log_supply_error("output on", self.power.set_output(true).await);
        let powered_on = Instant::now();
        let deadline = Deadline::after(self.settings.cycle_timeout);
        log_supply_error("start sampling", self.power.start_sampling().await);

        let link = self.acquirer.acquire(deadline).await;
        let outcome = self.classifier.classify(link, &self.acquirer, deadline).await;
        let elapsed = powered_on.elapsed();

        log_supply_error("stop sampling", self.power.stop_sampling().await);
        let samples = match self.power.drain_samples().await {
            Ok(samples) => samples,
            Err(err) => {
                warn!(%err, "unable to drain samples, recording an empty trace");
                Vec::new()
            }
        };

        CycleAttempt {
            voltage,
            cycle,
            trace: PowerTrace::captured(voltage, samples),
            outcome,
            elapsed,
        }
    }

    fn apply_policy(&mut self, attempt: &CycleAttempt) -> Result<(), RunError>
    {
        let (voltage, cycle, elapsed_ms) = (attempt.voltage, attempt.number(), attempt.elapsed_ms());

        match &attempt.outcome {
            BootOutcome::Success { reached_application_state: true } => {
                info!(%voltage, cycle, elapsed_ms, "boot successful");
            }
            BootOutcome::Success { reached_application_state: false } => {
                self.summary.degraded = true;
                error!(
                    %voltage,
                    cycle,
                    "DUT booted but did not reach its application state, check its credentials"
                );

                if self.settings.policy == AnomalyPolicy::Abort {
                    return Err(RunError::MisconfiguredDut { voltage, cycle });
                }
            }
            BootOutcome::DefiniteFailure { reason } => warn!(%voltage, cycle, %reason, "boot failed"),
            BootOutcome::Timeout => warn!(%voltage, cycle, elapsed_ms, "boot timed out"),
        }

        Ok(())
    }

    async fn teardown<R>(&mut self, recorder: &mut R)
        where R: TelemetryRecorder
    {
        log_supply_error("stop sampling", self.power.stop_sampling().await);
        if let Err(err) = self.power.drain_samples().await {
            warn!(%err, "unable to discard leftover samples");
        }
        log_supply_error("output off", self.power.set_output(false).await);

        if let Err(err) = recorder.flush().await {
            error!(%err, "failed to flush recorded attempts");
        }
        info!("teardown complete");
    }
}
