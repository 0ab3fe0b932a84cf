//! Scripted stand-ins for the bench hardware

#![allow(dead_code)]

use std::{
    collections::{ HashSet, VecDeque },
    io,
    sync::{ Arc, Mutex },
    time::Duration,
};
use async_trait::async_trait;
use chrono::Utc;

use boot_sweep::{
    attempt::CycleAttempt,
    link::{ AddressSource, LineRead, LinkError, LinkOpener, SerialLink },
    record::{ RecordError, TelemetryRecorder },
    supply::{ PowerSource, Sample, SupplyError },
    units::Volt,
};

pub const SUCCESS_LINE: &str = "Connected to WiFi!";
pub const CREDENTIALS_LINE: &str = "ERROR: Invalid IO credentials";

pub fn mv(millis: u32) -> Volt
{
    Volt::from_millivolts(millis)
}

#[derive(Debug, Clone, PartialEq)]
pub enum SupplyCall
{
    SetVoltage(Volt),
    Output(bool),
    StartSampling,
    StopSampling,
    Drain,
}

/// Records every call. Each sampling window yields `samples_per_window` samples.
#[derive(Debug, Default)]
pub struct FakeSupply
{
    pub calls: Vec<SupplyCall>,
    pub samples_per_window: usize,
    /// Zero based indices of drain calls which fail
    pub failing_drains: HashSet<usize>,
    drains: usize,
    buffered: Vec<Sample>,
}

impl FakeSupply
{
    pub fn with_samples(samples_per_window: usize) -> Self
    {
        Self {
            samples_per_window,
            ..Self::default()
        }
    }

    pub fn last_call(&self) -> Option<&SupplyCall>
    {
        self.calls.last()
    }
}

#[async_trait]
impl PowerSource for FakeSupply
{
    async fn set_voltage(&mut self, voltage: Volt) -> Result<(), SupplyError>
    {
        self.calls.push(SupplyCall::SetVoltage(voltage));
        Ok(())
    }

    async fn set_output(&mut self, enabled: bool) -> Result<(), SupplyError>
    {
        self.calls.push(SupplyCall::Output(enabled));
        Ok(())
    }

    async fn start_sampling(&mut self) -> Result<(), SupplyError>
    {
        self.calls.push(SupplyCall::StartSampling);
        for index in 0..self.samples_per_window {
            self.buffered.push(Sample {
                timestamp: Utc::now(),
                microamps: 1_000.0 + index as f64,
            });
        }
        Ok(())
    }

    async fn stop_sampling(&mut self) -> Result<(), SupplyError>
    {
        self.calls.push(SupplyCall::StopSampling);
        Ok(())
    }

    async fn drain_samples(&mut self) -> Result<Vec<Sample>, SupplyError>
    {
        self.calls.push(SupplyCall::Drain);
        let index = self.drains;
        self.drains += 1;
        let samples = std::mem::take(&mut self.buffered);

        if self.failing_drains.contains(&index) {
            Err(SupplyError::ChannelLost("sampler vanished".to_string()))
        }
        else {
            Ok(samples)
        }
    }
}

/// What a scripted device does on its console
#[derive(Debug, Clone)]
pub enum Step
{
    Line(&'static str),
    Disconnect,
    Silence(Duration),
}

#[derive(Debug, Default)]
struct BusState
{
    scripts: VecDeque<Vec<Step>>,
    default_script: Vec<Step>,
    failing_opens: usize,
    opens: Vec<String>,
    open_links: usize,
    leftovers: Vec<usize>,
}

/// The device side of every link, shared by the opener and the links it hands out
#[derive(Debug, Clone, Default)]
pub struct Bus
{
    state: Arc<Mutex<BusState>>,
}

impl Bus
{
    /// A bus whose links all play `script` unless a queued script takes precedence
    pub fn new(script: Vec<Step>) -> Self
    {
        let bus = Self::default();
        bus.state.lock().unwrap().default_script = script;
        bus
    }

    /// Queues `script` for the next successful open
    pub fn push_script(&self, script: Vec<Step>)
    {
        self.state.lock().unwrap().scripts.push_back(script);
    }

    /// The next `count` opens fail
    pub fn fail_opens(&self, count: usize)
    {
        self.state.lock().unwrap().failing_opens = count;
    }

    /// Addresses of every open attempt, failed ones included
    pub fn opens(&self) -> Vec<String>
    {
        self.state.lock().unwrap().opens.clone()
    }

    pub fn open_links(&self) -> usize
    {
        self.state.lock().unwrap().open_links
    }

    /// Unplayed steps of each closed link, in closing order
    pub fn leftovers(&self) -> Vec<usize>
    {
        self.state.lock().unwrap().leftovers.clone()
    }

    pub fn opener(&self) -> ScriptedOpener
    {
        ScriptedOpener {
            bus: self.clone(),
            open_delay: Duration::ZERO,
        }
    }
}

pub struct ScriptedOpener
{
    bus: Bus,
    pub open_delay: Duration,
}

impl ScriptedOpener
{
    pub fn open_delay(mut self, delay: Duration) -> Self
    {
        self.open_delay = delay;
        self
    }
}

#[async_trait]
impl LinkOpener for ScriptedOpener
{
    type Link = ScriptedLink;

    async fn open(&self, address: &str, _baud_rate: u32, _timeout: Duration) -> Result<ScriptedLink, LinkError>
    {
        tokio::time::sleep(self.open_delay).await;

        let mut state = self.bus.state.lock().unwrap();
        state.opens.push(address.to_string());

        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(LinkError::Open {
                address: address.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such device"),
            });
        }

        let script = match state.scripts.pop_front() {
            Some(script) => script,
            None => state.default_script.clone(),
        };
        state.open_links += 1;

        Ok(ScriptedLink {
            address: address.to_string(),
            steps: script.into(),
            bus: self.bus.clone(),
        })
    }
}

pub struct ScriptedLink
{
    pub address: String,
    steps: VecDeque<Step>,
    bus: Bus,
}

impl Drop for ScriptedLink
{
    fn drop(&mut self)
    {
        let mut state = self.bus.state.lock().unwrap();
        state.open_links -= 1;
        state.leftovers.push(self.steps.len());
    }
}

#[async_trait]
impl SerialLink for ScriptedLink
{
    async fn read_line(&mut self, timeout: Duration) -> Result<LineRead, LinkError>
    {
        match self.steps.pop_front() {
            Some(Step::Line(line)) => Ok(LineRead::Line(line.to_string())),
            Some(Step::Disconnect) => Err(LinkError::Disconnected(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "device re-enumerated",
            ))),
            Some(Step::Silence(quiet)) => {
                if quiet > timeout {
                    self.steps.push_front(Step::Silence(quiet - timeout));
                    tokio::time::sleep(timeout).await;
                }
                else {
                    tokio::time::sleep(quiet).await;
                }
                Ok(LineRead::TimedOut)
            }
            None => {
                tokio::time::sleep(timeout).await;
                Ok(LineRead::TimedOut)
            }
        }
    }

    async fn discard_input(&mut self) -> Result<(), LinkError>
    {
        Ok(())
    }

    async fn close(self)
    {
        drop(self);
    }
}

/// A fixed list of enumerable ports
#[derive(Debug, Clone, Default)]
pub struct FixedPorts(pub Vec<String>);

impl FixedPorts
{
    pub fn of(ports: &[&str]) -> Self
    {
        Self(ports.iter().map(|port| port.to_string()).collect())
    }
}

impl AddressSource for FixedPorts
{
    fn list_available(&self) -> io::Result<Vec<String>>
    {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Default)]
pub struct MemoryRecorder
{
    pub attempts: Vec<CycleAttempt>,
    pub fail_writes: bool,
    pub flushes: usize,
}

#[async_trait]
impl TelemetryRecorder for MemoryRecorder
{
    async fn record(&mut self, attempt: &CycleAttempt) -> Result<(), RecordError>
    {
        self.attempts.push(attempt.clone());

        if self.fail_writes {
            Err(RecordError::Io {
                path: "memory".into(),
                source: io::Error::new(io::ErrorKind::Other, "disk full"),
            })
        }
        else {
            Ok(())
        }
    }

    async fn flush(&mut self) -> Result<(), RecordError>
    {
        self.flushes += 1;
        Ok(())
    }
}
