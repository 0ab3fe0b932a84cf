//! SCPI supply protocol handling and command execution

use std::{ io, mem, time::Duration };
use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::{
    io::{ AsyncRead, AsyncWrite, AsyncWriteExt },
    sync::oneshot,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{ debug, warn };

use crate::{
    lines::LineReader,
    supply::{ cmd::CmdSet, PowerSource, Sample, SupplyError },
    units::Volt,
};

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);
/// How long a late answer to a timed out command is waited for before it is assumed lost
pub const DEFAULT_RESYNC_TIMEOUT: Duration = Duration::from_secs(2);

/// Answer of the operation-complete query
const OPC_ACK: &str = "1";

/// A parsing error caused by a supply response of unexpected or invalid format
#[derive(Debug, Error)]
#[error("`{raw_data}`: {mesg}")]
pub struct FormatError
{
    /// The line returned by the supply
    pub raw_data: String,
    mesg: &'static str,
    #[source]
    maybe_cause: Option<std::num::ParseFloatError>,
}

/// Parses a `MEAS:CURR?` answer (amperes, e.g. `1.2345E-03`) into microamps
pub fn parse_current_microamps(response: &str) -> Result<f64, FormatError>
{
    let token = response.trim();
    let format_error = |mesg, maybe_cause| FormatError {
        raw_data: response.to_string(),
        mesg,
        maybe_cause,
    };

    if token.is_empty() {
        return Err(format_error("Expected a current but the response was empty", None));
    }

    let amps = token
        .trim_end_matches('A')
        .trim_end()
        .parse::<f64>()
        .map_err(|err| format_error("Expected a current in amperes", Some(err)))?;

    if !amps.is_finite() {
        return Err(format_error("Current is not a finite number", None));
    }

    Ok(amps * 1_000_000.0)
}

struct Executor<T>
{
    line_ending: &'static str,
    reader: LineReader<T>,
    response_timeout: Duration,
    resync_timeout: Duration,
    /// Commands sent whose one line answer has not been read yet
    unanswered: usize,
}

impl <T> Executor<T>
    where T: AsyncRead + AsyncWrite + Unpin + Send
{
    fn with(line_ending: &'static str, io_handle: T) -> Self
    {
        Self {
            line_ending,
            reader: LineReader::new(io_handle),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            resync_timeout: DEFAULT_RESYNC_TIMEOUT,
            unanswered: 0,
        }
    }

    /// Reads and throws away the answers still owed for earlier commands
    ///
    /// Every command is answered with exactly one line, so once the owed lines are consumed the
    /// next line read belongs to the next command. An answer which does not turn up within
    /// `resync_timeout` is taken to be lost.
    async fn resync(&mut self) -> Result<(), SupplyError>
    {
        while self.unanswered > 0 {
            match tokio::time::timeout(self.resync_timeout, self.reader.next_line()).await {
                Ok(line) => {
                    let line = line?;
                    debug!(%line, "discarding late supply response");
                    self.unanswered -= 1;
                }
                Err(_) => {
                    warn!(unanswered = self.unanswered, "supply never answered, assuming the responses were lost");
                    self.unanswered = 0;
                }
            }
        }

        Ok(())
    }

    /// Executes the given command, sending it to the supply and returning its one line response
    ///
    /// Non-query commands are chained with `*OPC?` and must be answered with `1`, otherwise the
    /// command counts as rejected.
    ///
    /// # Cancel Safety
    /// A command cancelled after it was sent, or one which timed out, still owes its answer. That
    /// answer is consumed before the next command is sent so responses never shift onto later
    /// commands.
    async fn exec_cmd(&mut self, cmd: CmdSet) -> Result<String, SupplyError>
    {
        self.resync().await?;

        let serialized = if cmd.is_query() {
            format!("{}{}", cmd.display_scpi(), self.line_ending)
        }
        else {
            format!("{};*OPC?{}", cmd.display_scpi(), self.line_ending)
        };
        self.unanswered += 1;
        self.reader.get_mut().write_all(serialized.as_bytes()).await?;

        let response = match tokio::time::timeout(self.response_timeout, self.reader.next_line()).await {
            Ok(response) => response?,
            Err(_) => return Err(SupplyError::Io(io::Error::from(io::ErrorKind::TimedOut))),
        };
        self.unanswered -= 1;

        if !cmd.is_query() && response.trim() != OPC_ACK {
            return Err(SupplyError::Rejected {
                command: cmd.display_scpi().to_string(),
                response,
            });
        }

        Ok(response)
    }

    async fn measure_current(&mut self) -> Result<f64, SupplyError>
    {
        let response = self.exec_cmd(CmdSet::MeasureCurrent).await?;
        Ok(parse_current_microamps(&response)?)
    }
}

/// What the sampling task hands back when it ends
type SamplerOutput<T> = (Executor<T>, Vec<Sample>, Option<SupplyError>);

/// Who currently owns the command channel
enum Channel<T>
{
    Idle(Executor<T>),
    /// `stop` is taken once stopping has begun. The task stays here until it has been joined.
    Sampling
    {
        stop: Option<oneshot::Sender<()>>,
        task: JoinHandle<SamplerOutput<T>>,
    },
    Lost,
}

async fn sample_loop<T>(
    mut executor: Executor<T>,
    interval: Duration,
    mut stop: oneshot::Receiver<()>,
)
    -> SamplerOutput<T>

    where T: AsyncRead + AsyncWrite + Unpin + Send
{
    let mut samples = Vec::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = ticker.tick() => {
                // the measurement runs outside of the select so a stop request never splits it
                match executor.measure_current().await {
                    Ok(microamps) => samples.push(Sample { timestamp: Utc::now(), microamps }),
                    Err(err) => return (executor, samples, Some(err)),
                }
            }
        }
    }

    (executor, samples, None)
}

/// A programmable bench supply speaking SCPI over a line-oriented stream
///
/// While sampling, the command channel is owned by a background task which polls the output
/// current. Other commands are rejected with [`SupplyError::Busy`] until sampling stops.
pub struct ScpiSupply<T>
{
    channel: Channel<T>,
    sample_interval: Duration,
    samples: Vec<Sample>,
}

impl <T> ScpiSupply<T>
    where T: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    pub fn with(io_handle: T) -> Self
    {
        Self {
            channel: Channel::Idle(Executor::with("\n", io_handle)),
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            samples: Vec::new(),
        }
    }

    pub fn sample_interval(mut self, interval: Duration) -> Self
    {
        self.sample_interval = interval;
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self
    {
        if let Channel::Idle(executor) = &mut self.channel {
            executor.response_timeout = timeout;
        }
        self
    }

    fn executor(&mut self) -> Result<&mut Executor<T>, SupplyError>
    {
        match &mut self.channel {
            Channel::Idle(executor) => Ok(executor),
            Channel::Sampling { .. } => Err(SupplyError::Busy),
            Channel::Lost => Err(SupplyError::ChannelLost("a previous sampling task failed".to_string())),
        }
    }

    /// Returns the instrument's `*IDN?` string
    pub async fn identify(&mut self) -> Result<String, SupplyError>
    {
        self.executor()?.exec_cmd(CmdSet::Identify).await
    }

    pub fn is_sampling(&self) -> bool
    {
        matches!(self.channel, Channel::Sampling { .. })
    }
}

#[async_trait]
impl <T> PowerSource for ScpiSupply<T>
    where T: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    async fn set_voltage(&mut self, voltage: Volt) -> Result<(), SupplyError>
    {
        self.executor()?.exec_cmd(CmdSet::SetVoltage(voltage)).await?;
        Ok(())
    }

    async fn set_output(&mut self, enabled: bool) -> Result<(), SupplyError>
    {
        self.executor()?.exec_cmd(CmdSet::Output(enabled)).await?;
        Ok(())
    }

    async fn start_sampling(&mut self) -> Result<(), SupplyError>
    {
        match mem::replace(&mut self.channel, Channel::Lost) {
            Channel::Idle(executor) => {
                let (stop, stop_rx) = oneshot::channel();
                let task = tokio::spawn(sample_loop(executor, self.sample_interval, stop_rx));
                self.channel = Channel::Sampling { stop: Some(stop), task };
                debug!(interval = ?self.sample_interval, "sampling started");
                Ok(())
            }
            Channel::Sampling { stop, task } => {
                let stopping = stop.is_none();
                self.channel = Channel::Sampling { stop, task };

                if stopping { Err(SupplyError::Busy) } else { Ok(()) }
            }
            Channel::Lost => Err(SupplyError::ChannelLost("a previous sampling task failed".to_string())),
        }
    }

    /// Cancel safe: if cancelled while waiting for the sampling task, the task is kept and the
    /// next call waits for it again.
    async fn stop_sampling(&mut self) -> Result<(), SupplyError>
    {
        let joined = match &mut self.channel {
            Channel::Sampling { stop, task } => {
                // the task may already have ended on an error, in which case nobody is listening
                if let Some(stop) = stop.take() {
                    let _ = stop.send(());
                }
                task.await
            }
            Channel::Idle(_) => return Ok(()),
            Channel::Lost => return Err(SupplyError::ChannelLost("a previous sampling task failed".to_string())),
        };

        match joined {
            Ok((executor, samples, failure)) => {
                self.channel = Channel::Idle(executor);
                debug!(samples = samples.len(), "sampling stopped");
                self.samples.extend(samples);

                match failure {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            }
            Err(join_err) => {
                self.channel = Channel::Lost;
                warn!(%join_err, "sampling task did not finish");
                Err(SupplyError::ChannelLost(join_err.to_string()))
            }
        }
    }

    async fn drain_samples(&mut self) -> Result<Vec<Sample>, SupplyError>
    {
        Ok(mem::take(&mut self.samples))
    }
}

#[cfg(test)]
mod tests
{
    use super::{ parse_current_microamps, ScpiSupply };
    use crate::{
        lines::LineReader,
        supply::{ PowerSource, SupplyError },
        units::Volt,
    };
    use std::time::Duration;
    use tokio::io::{ AsyncWriteExt, DuplexStream };

    /// Plays the instrument: answers `*OPC?` chains with `opc_answer` and current queries with
    /// 1.5 mA, recording every command it receives
    fn spawn_instrument(end: DuplexStream, opc_answer: &'static str) -> tokio::task::JoinHandle<Vec<String>>
    {
        spawn_slow_instrument(end, opc_answer, Vec::new())
    }

    /// Like `spawn_instrument`, but the n-th answer is held back by `delays[n]`
    fn spawn_slow_instrument(
        end: DuplexStream,
        opc_answer: &'static str,
        delays: Vec<Duration>,
    )
        -> tokio::task::JoinHandle<Vec<String>>
    {
        tokio::spawn(async move {
            let mut reader = LineReader::new(end);
            let mut received = Vec::new();

            while let Ok(line) = reader.next_line().await {
                if let Some(delay) = delays.get(received.len()) {
                    tokio::time::sleep(*delay).await;
                }

                let answer = if line == "MEAS:CURR?" {
                    "1.500000E-03\n".to_string()
                }
                else if line == "*IDN?" {
                    "ACME,PS-3005,0,1.0\n".to_string()
                }
                else {
                    format!("{}\n", opc_answer)
                };
                received.push(line);

                if reader.get_mut().write_all(answer.as_bytes()).await.is_err() {
                    break;
                }
            }

            received
        })
    }

    #[test]
    fn parse_currents()
    {
        assert_eq!(parse_current_microamps("1.5E-03").unwrap(), 1_500.0);
        assert_eq!(parse_current_microamps(" 0.000250A\r").unwrap(), 250.0);
        assert_eq!(parse_current_microamps("-2E-06").unwrap(), -2.0);
        assert!(parse_current_microamps("").is_err());
        assert!(parse_current_microamps("ERR").is_err());
        assert!(parse_current_microamps("NaN").is_err());
    }

    #[tokio::test]
    async fn set_commands_wait_for_acknowledgement()
    {
        let (ours, theirs) = tokio::io::duplex(256);
        let instrument = spawn_instrument(theirs, "1");
        let mut supply = ScpiSupply::with(ours);

        assert_eq!(supply.identify().await.unwrap(), "ACME,PS-3005,0,1.0");
        supply.set_voltage(Volt::from_millivolts(3_100)).await.unwrap();
        supply.set_output(true).await.unwrap();
        drop(supply);

        assert_eq!(
            instrument.await.unwrap(),
            vec!["*IDN?", "VOLT 3.100;*OPC?", "OUTP ON;*OPC?"]
        );
    }

    #[tokio::test]
    async fn negative_acknowledgement_is_rejected()
    {
        let (ours, theirs) = tokio::io::duplex(256);
        let _instrument = spawn_instrument(theirs, "0");
        let mut supply = ScpiSupply::with(ours);

        match supply.set_output(false).await {
            Err(SupplyError::Rejected { command, response }) => {
                assert_eq!(command, "OUTP OFF");
                assert_eq!(response, "0");
            }
            other => panic!("expected a rejection, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_supply_times_out()
    {
        let (ours, _theirs) = tokio::io::duplex(256);
        let mut supply = ScpiSupply::with(ours).response_timeout(Duration::from_millis(200));

        match supply.set_voltage(Volt::from_base(3)).await {
            Err(SupplyError::Io(err)) => assert_eq!(err.kind(), std::io::ErrorKind::TimedOut),
            other => panic!("expected a timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn sampling_collects_current_and_blocks_commands()
    {
        let (ours, theirs) = tokio::io::duplex(256);
        let _instrument = spawn_instrument(theirs, "1");
        let mut supply = ScpiSupply::with(ours).sample_interval(Duration::from_millis(5));

        supply.start_sampling().await.unwrap();
        assert!(supply.is_sampling());
        assert!(matches!(supply.set_output(false).await, Err(SupplyError::Busy)));

        tokio::time::sleep(Duration::from_millis(60)).await;
        supply.stop_sampling().await.unwrap();
        assert!(!supply.is_sampling());

        let samples = supply.drain_samples().await.unwrap();
        assert!(!samples.is_empty());
        assert!(samples.iter().all(|sample| sample.microamps == 1_500.0));
        assert!(samples.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));

        // drained samples are gone and the channel is usable again
        assert!(supply.drain_samples().await.unwrap().is_empty());
        supply.set_output(false).await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_start_is_harmless()
    {
        let (ours, _theirs) = tokio::io::duplex(256);
        let mut supply = ScpiSupply::with(ours);

        supply.stop_sampling().await.unwrap();
        assert!(supply.drain_samples().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn late_answer_is_not_taken_for_the_next_one()
    {
        let (ours, theirs) = tokio::io::duplex(256);
        let instrument = spawn_slow_instrument(theirs, "1", vec![Duration::from_millis(300)]);
        let mut supply = ScpiSupply::with(ours).response_timeout(Duration::from_millis(100));

        match supply.set_voltage(Volt::from_millivolts(2_900)).await {
            Err(SupplyError::Io(err)) => assert_eq!(err.kind(), std::io::ErrorKind::TimedOut),
            other => panic!("expected a timeout, got {:?}", other),
        }

        assert_eq!(supply.identify().await.unwrap(), "ACME,PS-3005,0,1.0");
        supply.set_output(true).await.unwrap();
        drop(supply);

        assert_eq!(
            instrument.await.unwrap(),
            vec!["VOLT 2.900;*OPC?", "*IDN?", "OUTP ON;*OPC?"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_stop_still_allows_output_off()
    {
        let (ours, theirs) = tokio::io::duplex(256);
        // the first measurement is still in flight when stopping begins
        let instrument = spawn_slow_instrument(theirs, "1", vec![Duration::from_millis(300)]);
        let mut supply = ScpiSupply::with(ours).sample_interval(Duration::from_millis(5));

        supply.start_sampling().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let interrupted = tokio::time::timeout(Duration::from_millis(50), supply.stop_sampling()).await;
        assert!(interrupted.is_err());
        assert!(matches!(supply.start_sampling().await, Err(SupplyError::Busy)));

        supply.stop_sampling().await.unwrap();
        assert!(!supply.is_sampling());
        assert_eq!(supply.drain_samples().await.unwrap().len(), 1);

        supply.set_output(false).await.unwrap();
        drop(supply);

        let received = instrument.await.unwrap();
        assert_eq!(received.first().map(String::as_str), Some("MEAS:CURR?"));
        assert_eq!(received.last().map(String::as_str), Some("OUTP OFF;*OPC?"));
    }
}
