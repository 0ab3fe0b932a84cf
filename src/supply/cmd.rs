//! Supply command definition and serialization

use std::fmt;
use crate::units::{ Base, Volt };

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmdSet
{
    /// Query the instrument's identity
    ///
    /// Command: `*IDN?`
    Identify,
    /// Program the output voltage
    ///
    /// Command: `VOLT <volts>`
    SetVoltage(Volt),
    /// Switch the output on or off
    ///
    /// Command: `OUTP <ON|OFF>`
    Output(bool),
    /// Measure the output current. The instrument answers in amperes.
    ///
    /// Command: `MEAS:CURR?`
    MeasureCurrent,
}

impl CmdSet
{
    /// Whether the instrument answers this command with data
    ///
    /// Commands which are not queries produce no answer of their own and are chained with an
    /// operation-complete query so that every command has exactly one line of response.
    pub fn is_query(&self) -> bool
    {
        match self {
            Self::Identify | Self::MeasureCurrent => true,
            Self::SetVoltage(_) | Self::Output(_) => false,
        }
    }

    pub fn display_scpi(&self) -> ScpiDisplay
    {
        ScpiDisplay::from(self.clone())
    }
}

pub struct ScpiDisplay
{
    cmd: CmdSet,
}

impl fmt::Display for ScpiDisplay
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match &self.cmd {
            CmdSet::Identify => f.write_str("*IDN?"),
            CmdSet::SetVoltage(voltage) => write!(f, "VOLT {:.3}", voltage.display_anon::<Base>()),
            CmdSet::Output(enabled) => write!(f, "OUTP {}", if *enabled { "ON" } else { "OFF" }),
            CmdSet::MeasureCurrent => f.write_str("MEAS:CURR?"),
        }
    }
}

impl From<CmdSet> for ScpiDisplay
{
    fn from(cmd: CmdSet) -> Self
    {
        Self { cmd }
    }
}

#[cfg(test)]
mod tests
{
    use super::CmdSet;
    use crate::units::Volt;

    #[test]
    fn serialize_scpi()
    {
        assert_eq!(&format!("{}", CmdSet::Identify.display_scpi()), "*IDN?");
        assert_eq!(&format!("{}", CmdSet::SetVoltage(Volt::from_millivolts(3_100)).display_scpi()), "VOLT 3.100");
        assert_eq!(&format!("{}", CmdSet::SetVoltage(Volt::from_millivolts(805)).display_scpi()), "VOLT 0.805");
        assert_eq!(&format!("{}", CmdSet::Output(true).display_scpi()), "OUTP ON");
        assert_eq!(&format!("{}", CmdSet::Output(false).display_scpi()), "OUTP OFF");
        assert_eq!(&format!("{}", CmdSet::MeasureCurrent.display_scpi()), "MEAS:CURR?");
    }

    #[test]
    fn only_measurements_and_identity_are_queries()
    {
        assert!(CmdSet::Identify.is_query());
        assert!(CmdSet::MeasureCurrent.is_query());
        assert!(!CmdSet::Output(true).is_query());
        assert!(!CmdSet::SetVoltage(Volt::from_base(3)).is_query());
    }
}
