//! Per-widget data feeds.
//!
//! Every feed follows the same commit protocol: capture a [`LoadToken`]
//! ticket before the request, check it again after the response arrives, and
//! drop the response if the ticket was superseded in between.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ScreenError;

pub mod chart;
pub mod live;
pub mod refresh;
pub mod table;

pub use chart::{cap_points, ChartFeed, ChartSeries, SeriesPoint};
pub use live::LiveFeed;
pub use refresh::aligned_delay;
pub use table::{pivot, PivotedTable, TableFeed};

/// Result of one fetch attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Response committed to the feed.
    Applied,
    /// Response arrived after a newer load started; dropped.
    Stale,
    /// Nothing to fetch (precondition unmet or no more pages).
    Skipped,
    /// Request failed; previous data kept.
    Failed(ScreenError),
}

/// Monotonic generation counter for cooperative fetch cancellation.
#[derive(Debug)]
pub struct LoadToken {
    generation: AtomicU64,
}

impl Default for LoadToken {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadToken {
    /// Creates a token at generation 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            generation: AtomicU64::new(1),
        }
    }

    /// Starts a load and supersedes every older one.
    pub fn begin(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Current generation, for loads that must not supersede others.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Returns true if `ticket` was superseded.
    #[must_use]
    pub fn is_cancelled(&self, ticket: u64) -> bool {
        self.generation.load(Ordering::Acquire) != ticket
    }

    /// Supersedes the current load without starting a new one.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_load_cancels_older_ticket() {
        let token = LoadToken::new();
        let first = token.begin();
        assert!(!token.is_cancelled(first));
        let second = token.begin();
        assert!(token.is_cancelled(first));
        assert!(!token.is_cancelled(second));
        token.cancel();
        assert!(token.is_cancelled(second));
    }
}
