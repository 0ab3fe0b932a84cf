//! Bounded polling for a link to a rebooting device

use std::time::Duration;
use tracing::{ debug, info, warn };

use crate::{
    budget::Deadline,
    link::{ has_wildcard, resolve, AddressSource, LinkOpener },
};

/// Backoff between failed attempts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Upper bound on a single open attempt
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(3);

/// Repeatedly tries to open a link on an ordered list of candidate address patterns
///
/// Earlier patterns take priority over later (fallback) patterns. A failed open is never fatal; the
/// acquirer backs off briefly and tries again until the deadline passes.
pub struct LinkAcquirer<O, A>
{
    opener: O,
    addresses: A,
    candidates: Vec<String>,
    reserved: Option<String>,
    baud_rate: u32,
    poll_interval: Duration,
    open_timeout: Duration,
}

impl <O, A> LinkAcquirer<O, A>
    where O: LinkOpener,
          A: AddressSource
{
    pub fn new(opener: O, addresses: A, candidates: Vec<String>, baud_rate: u32) -> Self
    {
        Self {
            opener,
            addresses,
            candidates,
            reserved: None,
            baud_rate,
            poll_interval: DEFAULT_POLL_INTERVAL,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
        }
    }

    /// Never resolve to `address`, e.g. the supply's own control port
    pub fn reserve(mut self, address: impl Into<String>) -> Self
    {
        self.reserved = Some(address.into());
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self
    {
        self.poll_interval = interval;
        self
    }

    pub fn open_timeout(mut self, timeout: Duration) -> Self
    {
        self.open_timeout = timeout;
        self
    }

    pub fn candidates(&self) -> &[String]
    {
        &self.candidates
    }

    pub fn baud_rate(&self) -> u32
    {
        self.baud_rate
    }

    /// The first candidate which resolves to a concrete address right now, in priority order
    fn resolve_first(&self) -> Option<String>
    {
        let available = if self.candidates.iter().any(|pattern| has_wildcard(pattern)) {
            self.addresses.list_available().unwrap_or_else(|err| {
                debug!(%err, "unable to enumerate serial ports");
                Vec::new()
            })
        }
        else {
            Vec::new()
        };

        self.candidates
            .iter()
            .find_map(|pattern| resolve(pattern, &available, self.reserved.as_deref()))
    }

    /// Polls until a link opens or `deadline` passes
    ///
    /// Returns `None` when no candidate could be opened in time. Every wait inside is sized from the
    /// remaining budget so this returns no later than the deadline plus one poll interval.
    pub async fn acquire(&self, deadline: Deadline) -> Option<O::Link>
    {
        debug!(
            candidates = ?self.candidates,
            baud_rate = self.baud_rate,
            "initializing serial connection to DUT"
        );
        let mut attempts = 0u32;

        while !deadline.is_expired() {
            if let Some(address) = self.resolve_first() {
                attempts += 1;
                let open_budget = deadline.slice(self.open_timeout);
                let opening = self.opener.open(&address, self.baud_rate, open_budget);

                match tokio::time::timeout(open_budget, opening).await {
                    Ok(Ok(link)) => {
                        info!(%address, baud_rate = self.baud_rate, attempts, "serial connection established");
                        return Some(link);
                    }
                    Ok(Err(err)) => debug!(%err, "serial connection failed, retrying"),
                    Err(_) => debug!(%address, "serial open timed out, retrying"),
                }
            }
            else {
                debug!(candidates = ?self.candidates, "no matching serial port found");
            }

            tokio::time::sleep(deadline.slice(self.poll_interval)).await;
        }

        warn!(candidates = ?self.candidates, attempts, "no serial connection to DUT before deadline");
        None
    }
}
