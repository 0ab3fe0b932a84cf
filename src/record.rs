//! Persisting cycle attempts
//!
//! Every attempt produces two artifacts: a per-cycle CSV of the current trace, and one JSON line
//! appended to `outcomes.jsonl` in the output directory. A failure to persist one attempt is
//! reported to the caller, which counts it and moves on.

use std::{
    io,
    path::{ Path, PathBuf },
};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::{
    fs::{ self, File },
    io::{ AsyncWriteExt, BufWriter },
};
use tracing::info;

use crate::{
    attempt::{ CycleAttempt, PowerTrace },
    classify::BootOutcome,
    units::Base,
};

pub const TRACE_HEADER: &str = "Timestamp,Voltage,Current";
pub const OUTCOMES_FILE: &str = "outcomes.jsonl";

#[derive(Debug, Error)]
pub enum RecordError
{
    #[error("unable to write {}: {source}", path.display())]
    Io
    {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to encode outcome record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Sink for completed cycle attempts
#[async_trait]
pub trait TelemetryRecorder: Send
{
    async fn record(&mut self, attempt: &CycleAttempt) -> Result<(), RecordError>;

    /// Pushes anything buffered out to storage
    async fn flush(&mut self) -> Result<(), RecordError>
    {
        Ok(())
    }
}

/// Name of the trace file for cycle `number` (one based) at `voltage`
///
/// The voltage is written to the millivolt so every level of a sweep gets its own file.
pub fn trace_file_name(attempt: &CycleAttempt) -> String
{
    format!("power_data_{:.3}V_cycle_{}.csv", attempt.voltage.display_anon::<Base>(), attempt.number())
}

/// Renders `trace` as CSV. An empty trace still gets its header.
pub fn render_trace(trace: &PowerTrace) -> String
{
    let mut out = format!("{}\n", TRACE_HEADER);

    for sample in trace.samples() {
        out.push_str(&format!(
            "{}.{:06},{:.3},{}\n",
            sample.timestamp.timestamp(),
            sample.timestamp.timestamp_subsec_micros(),
            trace.voltage().display_anon::<Base>(),
            sample.microamps,
        ));
    }

    out
}

#[derive(Debug, Serialize)]
struct OutcomeRecord<'a>
{
    voltage_mv: u32,
    cycle: u32,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    elapsed_ms: u64,
    samples: usize,
}

impl <'a> From<&'a CycleAttempt> for OutcomeRecord<'a>
{
    fn from(attempt: &'a CycleAttempt) -> Self
    {
        let reason = match &attempt.outcome {
            BootOutcome::DefiniteFailure { reason } => Some(reason.as_str()),
            _ => None,
        };

        Self {
            voltage_mv: attempt.voltage.millivolts(),
            cycle: attempt.number(),
            outcome: attempt.outcome.label(),
            reason,
            elapsed_ms: attempt.elapsed_ms(),
            samples: attempt.trace.len(),
        }
    }
}

/// Records attempts as files in one directory
pub struct CsvRecorder
{
    dir: PathBuf,
    outcomes_path: PathBuf,
    outcomes: BufWriter<File>,
}

impl CsvRecorder
{
    /// Creates `dir` if needed and starts a fresh outcome log inside it
    pub async fn create(dir: impl Into<PathBuf>) -> Result<Self, RecordError>
    {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| RecordError::Io { path: dir.clone(), source })?;

        let outcomes_path = dir.join(OUTCOMES_FILE);
        let outcomes = File::create(&outcomes_path)
            .await
            .map_err(|source| RecordError::Io { path: outcomes_path.clone(), source })?;

        Ok(Self {
            dir,
            outcomes_path,
            outcomes: BufWriter::new(outcomes),
        })
    }

    pub fn dir(&self) -> &Path
    {
        &self.dir
    }

    async fn write_trace_file(&self, attempt: &CycleAttempt) -> Result<(), RecordError>
    {
        let path = self.dir.join(trace_file_name(attempt));

        fs::write(&path, render_trace(&attempt.trace))
            .await
            .map_err(|source| RecordError::Io { path, source })
    }

    async fn append_outcome(&mut self, attempt: &CycleAttempt) -> Result<(), RecordError>
    {
        let mut line = serde_json::to_string(&OutcomeRecord::from(attempt))?;
        line.push('\n');

        self.outcomes
            .write_all(line.as_bytes())
            .await
            .map_err(|source| RecordError::Io { path: self.outcomes_path.clone(), source })
    }
}

#[async_trait]
impl TelemetryRecorder for CsvRecorder
{
    /// Writes both artifacts even if the first fails, then reports the first failure
    async fn record(&mut self, attempt: &CycleAttempt) -> Result<(), RecordError>
    {
        info!(
            voltage = %attempt.voltage,
            cycle = attempt.number(),
            outcome = attempt.outcome.label(),
            elapsed_ms = attempt.elapsed_ms(),
            samples = attempt.trace.len(),
            "recording attempt",
        );

        let trace = self.write_trace_file(attempt).await;
        let outcome = self.append_outcome(attempt).await;

        trace.and(outcome)
    }

    async fn flush(&mut self) -> Result<(), RecordError>
    {
        self.outcomes
            .flush()
            .await
            .map_err(|source| RecordError::Io { path: self.outcomes_path.clone(), source })
    }
}
