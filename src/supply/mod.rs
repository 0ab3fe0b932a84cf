//! Programmable power source capability
//!
//! # Purpose
//! The harness needs five things from the instrument powering the device under test: program a
//! voltage, switch the output, and capture a current trace (start, stop, drain). [`PowerSource`]
//! is that capability. The orchestrator is written once against it so that any instrument which
//! can provide these operations can drive a sweep.
//!
//! [`scpi::ScpiSupply`] implements it for line-oriented SCPI bench supplies.
//!
//! # Error containment
//! A failing supply call during a cycle is logged by the caller and the cycle carries on with
//! whatever trace was captured. Nothing here aborts a run.

pub mod cmd;
pub mod scpi;

use std::io;
use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use thiserror::Error;

use crate::units::Volt;

pub use scpi::{ FormatError, ScpiSupply };

/// One current reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample
{
    pub timestamp: DateTime<Utc>,
    pub microamps: f64,
}

/// The output range an instrument can be programmed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupplyLimits
{
    pub voltage_min: Volt,
    pub voltage_max: Volt,
}

impl Default for SupplyLimits
{
    fn default() -> Self
    {
        Self {
            voltage_min: Volt::from_millivolts(800),
            voltage_max: Volt::from_millivolts(5_000),
        }
    }
}

impl SupplyLimits
{
    pub fn contains(&self, voltage: Volt) -> bool
    {
        self.voltage_min <= voltage && voltage <= self.voltage_max
    }
}

#[derive(Debug, Error)]
pub enum SupplyError
{
    #[error("failed to communicate with supply: {0}")]
    Io(#[from] io::Error),
    /// The supply answered a command with something other than an acknowledgement
    #[error("supply rejected `{command}` (answered `{response}`)")]
    Rejected
    {
        command: String,
        response: String,
    },
    #[error("unable to interpret supply response. {0}")]
    InvalidResponse(#[from] FormatError),
    /// The command channel is owned by the sampling task until sampling stops
    #[error("supply is busy sampling")]
    Busy,
    /// The command channel could not be recovered from the sampling task
    #[error("supply command channel lost: {0}")]
    ChannelLost(String),
}

#[async_trait]
pub trait PowerSource: Send
{
    async fn set_voltage(&mut self, voltage: Volt) -> Result<(), SupplyError>;

    /// Switches the supply to the device under test on or off
    async fn set_output(&mut self, enabled: bool) -> Result<(), SupplyError>;

    async fn start_sampling(&mut self) -> Result<(), SupplyError>;

    /// Stops sampling. Captured samples stay buffered until drained. Stopping while not sampling
    /// is not an error.
    async fn stop_sampling(&mut self) -> Result<(), SupplyError>;

    /// Takes all buffered samples, oldest first
    async fn drain_samples(&mut self) -> Result<Vec<Sample>, SupplyError>;
}
