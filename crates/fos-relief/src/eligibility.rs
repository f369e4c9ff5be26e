//! Whether this process is a safe target for an out-of-memory kill.

use crate::pages::PageSnapshot;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// Navigations newer than this keep the process alive.
pub const RECENT_NAVIGATION_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Result of a kill eligibility query. Computed fresh on every query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KillEligibility {
    pub has_visible_pages: bool,
    pub has_audible_pages: bool,
    pub has_recent_navigation: bool,
}

impl KillEligibility {
    /// Fold page snapshots observed at `now`.
    ///
    /// A navigation counts as recent when it completed at most `window`
    /// before `now`. Navigations stamped after `now` count as recent.
    pub fn evaluate<I>(snapshots: I, now: Instant, window: Duration) -> Self
    where
        I: IntoIterator<Item = PageSnapshot>,
    {
        snapshots
            .into_iter()
            .fold(Self::default(), |mut acc, snapshot| {
                acc.has_visible_pages |= snapshot.is_visible;
                acc.has_audible_pages |= snapshot.is_audible;
                if let Some(at) = snapshot.time_of_last_completed_navigation {
                    acc.has_recent_navigation |= now.saturating_duration_since(at) <= window;
                }
                acc
            })
    }

    pub fn is_eligible(&self) -> bool {
        !(self.has_visible_pages || self.has_audible_pages || self.has_recent_navigation)
    }

    /// Human-readable reasons the process must not be killed.
    pub fn reasons(&self) -> Vec<&'static str> {
        let mut reasons = Vec::new();
        if self.has_visible_pages {
            reasons.push("has visible pages");
        }
        if self.has_audible_pages {
            reasons.push("has audible pages");
        }
        if self.has_recent_navigation {
            reasons.push("main frame navigated recently");
        }
        reasons
    }
}

impl fmt::Display for KillEligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "visible_pages={}, audible_pages={}, recent_navigation={}",
            self.has_visible_pages, self.has_audible_pages, self.has_recent_navigation
        )
    }
}
