//! Electrical units with fixed decimal precision

use std::{
    fmt::{ self, Write },
    str::FromStr,
};
use thiserror::Error;

/// Defines a scalar prefix type for displaying units without changing the underlying value e.g.
/// "milli-" or "kilo-"
///
/// # Implementation
/// Values are stored with millivolt resolution, so only prefixes of magnitude `-3` or larger can be
/// represented. Users should not implement this trait.
pub trait Scalar
{
    /// Return the power of 10 of this scalar
    ///
    /// For example, a prefix of "milli-" should return -3.
    fn magnitude() -> i32;

    /// Return this scalar's written shorthand notation
    ///
    /// For example, a prefix of "milli-" should return "m"
    fn notation() -> &'static str;
}

macro_rules! impl_prefix
{
    { $name:ident, $magnitude:literal, $notation:literal } => {
        pub struct $name {}

        impl $name
        {
            pub const MAGNITUDE: i32 = $magnitude;
            pub const NOTATION: &'static str = $notation;
        }

        impl Scalar for $name
        {
            fn magnitude() -> i32
            {
                Self::MAGNITUDE
            }

            fn notation() -> &'static str
            {
                Self::NOTATION
            }
        }
    }
}

impl_prefix!{ Milli, -3, "m" }
impl_prefix!{ Base, 0, "" }

/// Number of millivolts in one unit of the given scalar
fn millis_per<S: Scalar>() -> u32
{
    10u32.pow((3 + S::magnitude()) as u32)
}

pub struct UnitDisplay
{
    symbol: &'static str,
    notation: &'static str,
    divisor: u32,
    millis: u32,
    hide_unit: bool,
}

impl fmt::Display for UnitDisplay
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let mut divisor = self.divisor;
        let whole = self.millis / divisor;
        let mut fraction = self.millis % divisor;
        write!(f, "{}", whole)?;

        if let Some(precision) = f.precision() {
            if precision != 0 {
                f.write_char('.')?;
            }

            for _index in 0..precision {
                if fraction == 0 || divisor <= 1 {
                    f.write_char('0')?;
                }
                else {
                    divisor /= 10;
                    let digit = fraction / divisor;
                    fraction %= divisor;
                    f.write_char(char::from_digit(digit, 10).unwrap_or('0'))?;
                }
            }
        }
        else {
            if fraction != 0 {
                f.write_char('.')?;
            }
            while fraction != 0 {
                divisor /= 10;
                let digit = fraction / divisor;
                fraction %= divisor;
                f.write_char(char::from_digit(digit, 10).unwrap_or('0'))?;
            }
        }

        if self.hide_unit {
            Ok(())
        }
        else {
            f.write_str(self.notation)?;
            f.write_str(self.symbol)
        }
    }
}

/// A voltage value with millivolt precision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Volt
{
    millis: u32,
}

impl Volt
{
    /// The written shorthand symbol
    pub const SYMBOL: &'static str = "V";

    pub const fn from_millivolts(millis: u32) -> Self
    {
        Self { millis }
    }

    /// Constructs a new value from a whole number of units of the given scalar
    ///
    /// Saturates at the largest representable voltage.
    pub fn from<S: Scalar>(num: u32) -> Self
    {
        Self { millis: num.saturating_mul(millis_per::<S>()) }
    }

    /// Constructs a new value from a whole number of volts
    pub fn from_base(num: u32) -> Self
    {
        Self::from::<Base>(num)
    }

    pub fn millivolts(&self) -> u32
    {
        self.millis
    }

    pub fn as_f64<S: Scalar>(&self) -> f64
    {
        self.millis as f64 / millis_per::<S>() as f64
    }

    pub fn is_zero(&self) -> bool
    {
        self.millis == 0
    }

    /// Subtracts `rhs`, returning `None` if the result would be negative
    pub fn checked_sub(self, rhs: Self) -> Option<Self>
    {
        self.millis.checked_sub(rhs.millis).map(Self::from_millivolts)
    }

    /// Displays the value with a given scalar prefix
    pub fn display<S: Scalar>(&self) -> UnitDisplay
    {
        UnitDisplay {
            symbol: Self::SYMBOL,
            notation: S::notation(),
            divisor: millis_per::<S>(),
            millis: self.millis,
            hide_unit: false,
        }
    }

    /// Displays the value with a given scalar prefix but hides the symbol and prefix in the output
    pub fn display_anon<S: Scalar>(&self) -> UnitDisplay
    {
        UnitDisplay {
            hide_unit: true,
            ..self.display::<S>()
        }
    }
}

impl fmt::Display for Volt
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::Display::fmt(&self.display::<Base>(), f)
    }
}

/// An error describing why a string could not be read as a voltage
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseVoltError
{
    #[error("no voltage given")]
    Empty,
    #[error("`{0}` is not a non-negative decimal number")]
    InvalidNumber(String),
    #[error("`{0}` is finer than one millivolt")]
    TooPrecise(String),
    #[error("`{0}` is too large")]
    Overflow(String),
}

/// Parses an unsigned decimal string into an integer scaled by `10^frac_digits`
///
/// Trailing zeros after the decimal point do not count against the precision.
fn parse_scaled(num: &str, frac_digits: u32) -> Result<u32, ParseVoltError>
{
    let invalid = || ParseVoltError::InvalidNumber(num.to_string());
    let (whole, fraction) = match num.split_once('.') {
        Some((whole, fraction)) => (whole, fraction.trim_end_matches('0')),
        None => (num, ""),
    };

    if whole.is_empty() && fraction.is_empty() && !num.contains('0') {
        return Err(invalid());
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if fraction.len() > frac_digits as usize {
        return Err(ParseVoltError::TooPrecise(num.to_string()));
    }

    let overflow = || ParseVoltError::Overflow(num.to_string());
    let mut value: u32 = 0;
    for digit in whole.bytes().chain(fraction.bytes()) {
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((digit - b'0') as u32))
            .ok_or_else(overflow)?;
    }

    value
        .checked_mul(10u32.pow(frac_digits - fraction.len() as u32))
        .ok_or_else(overflow)
}

impl FromStr for Volt
{
    type Err = ParseVoltError;

    /// Accepts `3.1`, `3.1V` and `3100mV` style values
    fn from_str(data_str: &str) -> Result<Self, Self::Err>
    {
        let trimmed = data_str.trim();
        if trimmed.is_empty() {
            return Err(ParseVoltError::Empty);
        }

        let lower = trimmed.to_ascii_lowercase();
        let millis = if let Some(num) = lower.strip_suffix("mv") {
            parse_scaled(num.trim_end(), 0)?
        }
        else {
            let num = lower.strip_suffix('v').unwrap_or(&lower);
            parse_scaled(num.trim_end(), 3)?
        };

        Ok(Self::from_millivolts(millis))
    }
}
