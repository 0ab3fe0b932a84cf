//! Time budgets for bounded waits
//!
//! Link acquisition and boot classification share a single budget per cycle. Instead of each stage
//! re-reading the wall clock against its own start time, the cycle creates one [`Deadline`] and
//! threads it through every call that may wait.

use std::time::Duration;
use tokio::time::Instant;

/// A point in time by which an operation must give up
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline
{
    at: Instant,
}

impl Deadline
{
    /// A deadline `budget` from now
    pub fn after(budget: Duration) -> Self
    {
        Self { at: Instant::now() + budget }
    }

    pub fn at(instant: Instant) -> Self
    {
        Self { at: instant }
    }

    pub fn instant(&self) -> Instant
    {
        self.at
    }

    /// Time left before the deadline, zero once it has passed
    pub fn remaining(&self) -> Duration
    {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool
    {
        self.remaining().is_zero()
    }

    /// The remaining budget, capped at `max`
    ///
    /// Used to size a single bounded wait (one read, one open attempt, one backoff) so that it can
    /// never outlive the deadline.
    pub fn slice(&self, max: Duration) -> Duration
    {
        self.remaining().min(max)
    }
}
