//! Boot outcome classification from the device's serial output

use std::{ fmt, time::Duration };
use tracing::{ debug, info };

use crate::{
    budget::Deadline,
    link::{ AddressSource, LineRead, LinkAcquirer, LinkOpener, SerialLink },
};

/// Upper bound on a single read while waiting for a decisive line
pub const DEFAULT_READ_SLICE: Duration = Duration::from_secs(3);

pub const DEFAULT_SUCCESS_MARKERS: &[&str] = &[
    "Performing a WiFi scan for SSID...",
    "Connected to WiFi!",
];

pub const DEFAULT_HALTED_MARKERS: &[&str] = &[
    "ERROR: Unable to parse secrets.json file",
    "ERROR: Invalid IO credentials",
];

pub const DEFAULT_FATAL_MARKERS: &[&str] = &[
    "Fatal Error: Halted execution",
    "reset your board",
];

/// Classification of one boot attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootOutcome
{
    /// The device booted and printed a recognised line
    ///
    /// `reached_application_state` is `false` when the device booted cleanly but stopped short of
    /// the application, e.g. because its stored credentials are missing or invalid. That is a fault
    /// of the device's configuration, not of its supply.
    Success { reached_application_state: bool },
    /// The device printed a line which means it cannot boot on this attempt
    DefiniteFailure { reason: String },
    /// Nothing decisive was seen before the deadline
    Timeout,
}

impl BootOutcome
{
    pub fn reached_application(&self) -> bool
    {
        matches!(self, Self::Success { reached_application_state: true })
    }

    /// Booted cleanly without reaching the application state
    pub fn is_halted(&self) -> bool
    {
        matches!(self, Self::Success { reached_application_state: false })
    }

    /// Short machine friendly name of the outcome class
    pub fn label(&self) -> &'static str
    {
        match self {
            Self::Success { reached_application_state: true } => "booted",
            Self::Success { reached_application_state: false } => "halted_without_application",
            Self::DefiniteFailure { .. } => "definite_failure",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for BootOutcome
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Success { reached_application_state: true } => f.write_str("boot successful"),
            Self::Success { reached_application_state: false } => {
                f.write_str("boot successful but application state not reached")
            }
            Self::DefiniteFailure { reason } => write!(f, "boot failed ({})", reason),
            Self::Timeout => f.write_str("boot timed out"),
        }
    }
}

/// The lines which end classification, checked in priority order: success, halted, fatal
///
/// Lines match by substring.
#[derive(Debug, Clone)]
pub struct MarkerSet
{
    success: Vec<String>,
    halted: Vec<String>,
    fatal: Vec<String>,
}

impl Default for MarkerSet
{
    fn default() -> Self
    {
        let owned = |markers: &[&str]| markers.iter().map(|marker| marker.to_string()).collect();

        Self {
            success: owned(DEFAULT_SUCCESS_MARKERS),
            halted: owned(DEFAULT_HALTED_MARKERS),
            fatal: owned(DEFAULT_FATAL_MARKERS),
        }
    }
}

impl MarkerSet
{
    /// A set with no markers at all
    pub fn empty() -> Self
    {
        Self {
            success: Vec::new(),
            halted: Vec::new(),
            fatal: Vec::new(),
        }
    }

    /// Adds a marker meaning the device reached its application state
    pub fn success(mut self, marker: impl Into<String>) -> Self
    {
        self.success.push(marker.into());
        self
    }

    /// Adds a marker meaning the device booted but halted on a configuration problem
    pub fn halted(mut self, marker: impl Into<String>) -> Self
    {
        self.halted.push(marker.into());
        self
    }

    /// Adds a marker meaning the boot failed outright
    pub fn fatal(mut self, marker: impl Into<String>) -> Self
    {
        self.fatal.push(marker.into());
        self
    }

    /// The decisive outcome signalled by `line`, if any
    pub fn classify_line(&self, line: &str) -> Option<BootOutcome>
    {
        let found = |markers: &[String]| markers.iter().find(|marker| line.contains(marker.as_str())).cloned();

        if found(&self.success).is_some() {
            Some(BootOutcome::Success { reached_application_state: true })
        }
        else if found(&self.halted).is_some() {
            Some(BootOutcome::Success { reached_application_state: false })
        }
        else {
            found(&self.fatal).map(|reason| BootOutcome::DefiniteFailure { reason })
        }
    }
}

/// Watches a link for a decisive line until a deadline
pub struct BootClassifier
{
    markers: MarkerSet,
    read_slice: Duration,
}

impl BootClassifier
{
    pub fn new(markers: MarkerSet) -> Self
    {
        Self {
            markers,
            read_slice: DEFAULT_READ_SLICE,
        }
    }

    /// Caps each individual read at `slice` of the remaining budget
    pub fn read_slice(mut self, slice: Duration) -> Self
    {
        self.read_slice = slice;
        self
    }

    pub fn markers(&self) -> &MarkerSet
    {
        &self.markers
    }

    /// Classifies the boot observed on `link`
    ///
    /// Stops reading at the first decisive line. Without a link nothing can be observed and the
    /// result is `Timeout` straight away. If the link dies, one re-acquisition is attempted with
    /// the remaining budget. If that fails, or the replacement dies as well, nothing more can be
    /// observed and the rest of the budget is waited out before returning `Timeout`, so a lost
    /// link costs as much time as a silent one. The link held at return is always closed. Never
    /// fails.
    pub async fn classify<O, A>(
        &self,
        link: Option<O::Link>,
        acquirer: &LinkAcquirer<O, A>,
        deadline: Deadline,
    )
        -> BootOutcome

        where O: LinkOpener,
              A: AddressSource,
    {
        let mut link = match link {
            Some(link) => link,
            None => {
                debug!("no serial connection to DUT, boot cannot be observed");
                return BootOutcome::Timeout;
            }
        };

        if let Err(err) = link.discard_input().await {
            debug!(%err, "failed to reset serial input buffer");
        }

        let mut reacquired = false;

        loop {
            if deadline.is_expired() {
                link.close().await;
                return BootOutcome::Timeout;
            }

            match link.read_line(deadline.slice(self.read_slice)).await {
                Ok(LineRead::Line(line)) => {
                    info!(%line, "serial output");

                    if let Some(outcome) = self.markers.classify_line(&line) {
                        link.close().await;
                        return outcome;
                    }
                }
                Ok(LineRead::TimedOut) => {}
                Err(err) => {
                    debug!(%err, "serial read error");
                    link.close().await;

                    if reacquired {
                        debug!("serial connection lost again, waiting out the attempt");
                        tokio::time::sleep_until(deadline.instant()).await;
                        return BootOutcome::Timeout;
                    }
                    reacquired = true;

                    match acquirer.acquire(deadline).await {
                        Some(replacement) => link = replacement,
                        None => return BootOutcome::Timeout,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::{ BootOutcome, MarkerSet };

    #[test]
    fn success_marker_wins()
    {
        let markers = MarkerSet::default();

        assert_eq!(
            markers.classify_line("code.py output: Connected to WiFi!"),
            Some(BootOutcome::Success { reached_application_state: true })
        );
        assert_eq!(
            markers.classify_line("Performing a WiFi scan for SSID..."),
            Some(BootOutcome::Success { reached_application_state: true })
        );
    }

    #[test]
    fn credential_markers_are_halted_boots()
    {
        let markers = MarkerSet::default();

        assert_eq!(
            markers.classify_line("ERROR: Unable to parse secrets.json file"),
            Some(BootOutcome::Success { reached_application_state: false })
        );
        assert_eq!(
            markers.classify_line("ERROR: Invalid IO credentials"),
            Some(BootOutcome::Success { reached_application_state: false })
        );
    }

    #[test]
    fn fatal_markers_carry_reason()
    {
        let markers = MarkerSet::default();

        assert_eq!(
            markers.classify_line("Press any key to enter the REPL. Use CTRL-D to reload. Please reset your board."),
            Some(BootOutcome::DefiniteFailure { reason: "reset your board".to_string() })
        );
    }

    #[test]
    fn priority_is_success_then_halted_then_fatal()
    {
        let markers = MarkerSet::empty().success("OK").halted("HALT").fatal("DEAD");

        assert!(markers.classify_line("DEAD HALT OK").unwrap().reached_application());
        assert!(markers.classify_line("DEAD HALT").unwrap().is_halted());
        assert_eq!(
            markers.classify_line("DEAD"),
            Some(BootOutcome::DefiniteFailure { reason: "DEAD".to_string() })
        );
    }

    #[test]
    fn unrelated_lines_are_not_decisive()
    {
        let markers = MarkerSet::default();

        assert_eq!(markers.classify_line("Adafruit CircuitPython 8.2.0 on 2023-07-05"), None);
        assert_eq!(markers.classify_line(""), None);
        assert_eq!(MarkerSet::empty().classify_line("Connected to WiFi!"), None);
    }

    #[test]
    fn labels()
    {
        assert_eq!(BootOutcome::Timeout.label(), "timeout");
        assert_eq!(BootOutcome::Success { reached_application_state: false }.label(), "halted_without_application");
        assert_eq!(BootOutcome::DefiniteFailure { reason: "x".to_string() }.to_string(), "boot failed (x)");
    }
}
