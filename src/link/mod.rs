//! Serial links to the device under test
//!
//! # Purpose
//! The device under test reboots on every cycle. When it is a USB device its serial port vanishes
//! during the reboot and re-enumerates, sometimes under a different name. This module models the
//! link as a single-use resource:
//!   - [`LinkOpener`] turns a concrete address into an open [`SerialLink`]
//!   - [`AddressSource`] lists the addresses that currently exist
//!   - [`resolve`] maps a wildcard pattern onto one of those addresses
//!   - [`LinkAcquirer`] polls the above until a link opens or the cycle budget runs out
//!
//! Once a link reports an error it is dead. It is closed and a new one must be acquired.
//!
//! # Ownership
//! A link is owned by exactly one stage at a time and is moved, never shared, between the acquirer
//! and the boot classifier. Dropping a link releases the underlying port, so a link is released on
//! every exit path including cancellation.

pub mod acquire;
pub mod serial;

use std::{ io, time::Duration };
use async_trait::async_trait;
use thiserror::Error;

pub use acquire::LinkAcquirer;

/// Marks the part of an address pattern which is matched against enumerated port numbers
pub const WILDCARD: char = '*';

/// Transient failures of the link to the device under test
///
/// None of these are fatal to a run. They are retried within the cycle budget.
#[derive(Debug, Error)]
pub enum LinkError
{
    /// The port does not exist yet, or is busy, or permission was denied
    #[error("unable to open {address}: {source}")]
    Open
    {
        address: String,
        #[source]
        source: io::Error,
    },
    /// The port went away or failed while in use
    #[error("link disconnected: {0}")]
    Disconnected(#[source] io::Error),
}

/// Result of a single bounded read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead
{
    Line(String),
    /// Nothing complete arrived within the read timeout. The link is still usable.
    TimedOut,
}

#[async_trait]
pub trait SerialLink: Send + Sized
{
    /// Reads one line, waiting at most `timeout`
    ///
    /// An `Err` means the link is dead and must be closed.
    async fn read_line(&mut self, timeout: Duration) -> Result<LineRead, LinkError>;

    /// Discards anything received but not yet read
    async fn discard_input(&mut self) -> Result<(), LinkError>;

    /// Closes the link. Dropping the link has the same effect.
    async fn close(self);
}

#[async_trait]
pub trait LinkOpener: Send + Sync
{
    type Link: SerialLink;

    /// Attempts to open `address`. Implementations must give up after `timeout`.
    async fn open(&self, address: &str, baud_rate: u32, timeout: Duration) -> Result<Self::Link, LinkError>;
}

/// Enumerates the serial addresses which currently exist on the host
pub trait AddressSource: Send + Sync
{
    fn list_available(&self) -> io::Result<Vec<String>>;
}

pub fn has_wildcard(pattern: &str) -> bool
{
    pattern.contains(WILDCARD)
}

/// Resolves an address pattern to a concrete address
///
/// A pattern without a wildcard resolves to itself. A pattern such as `/dev/ttyACM*` resolves to
/// the lowest available address made of the text before the `*`, a run starting with a digit, and
/// the text after the `*`. The reserved address (the supply's own control port) never resolves.
pub fn resolve(pattern: &str, available: &[String], reserved: Option<&str>) -> Option<String>
{
    let is_reserved = |address: &str| reserved == Some(address);

    match pattern.split_once(WILDCARD) {
        None => (!is_reserved(pattern)).then(|| pattern.to_string()),
        Some((prefix, suffix)) => available
            .iter()
            .filter(|address| !is_reserved(address.as_str()) && matches_wildcard(address.as_str(), prefix, suffix))
            .min()
            .cloned(),
    }
}

fn matches_wildcard(address: &str, prefix: &str, suffix: &str) -> bool
{
    address
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(suffix))
        .map_or(false, |number| number.starts_with(|c: char| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests
{
    use super::resolve;

    fn ports(names: &[&str]) -> Vec<String>
    {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn literal_pattern_resolves_to_itself()
    {
        assert_eq!(resolve("/dev/ttyUSB0", &[], None), Some("/dev/ttyUSB0".to_string()));
        assert_eq!(resolve("/dev/ttyUSB0", &[], Some("/dev/ttyUSB0")), None);
    }

    #[test]
    fn wildcard_matches_numbered_ports()
    {
        let available = ports(&["/dev/ttyS0", "/dev/cu.usbmodem14201", "/dev/cu.usbmodem14101"]);

        assert_eq!(
            resolve("/dev/cu.usbmodem*", &available, None),
            Some("/dev/cu.usbmodem14101".to_string())
        );
    }

    #[test]
    fn wildcard_requires_a_number()
    {
        let available = ports(&["/dev/tty.usbmodemFDAA3F960F322"]);

        assert_eq!(resolve("/dev/tty.usbmodem*", &available, None), None);
    }

    #[test]
    fn wildcard_skips_reserved_address()
    {
        let available = ports(&["/dev/ttyACM0", "/dev/ttyACM1"]);

        assert_eq!(
            resolve("/dev/ttyACM*", &available, Some("/dev/ttyACM0")),
            Some("/dev/ttyACM1".to_string())
        );
        assert_eq!(resolve("/dev/ttyACM*", &ports(&["/dev/ttyACM0"]), Some("/dev/ttyACM0")), None);
    }

    #[test]
    fn wildcard_honours_suffix()
    {
        let available = ports(&["COM3", "usb-3-if00", "usb-4-if02"]);

        assert_eq!(resolve("usb-*-if02", &available, None), Some("usb-4-if02".to_string()));
        assert_eq!(resolve("usb-*", &available, None), Some("usb-3-if00".to_string()));
    }

    #[test]
    fn nothing_available_resolves_nothing()
    {
        assert_eq!(resolve("/dev/ttyACM*", &[], None), None);
    }
}
