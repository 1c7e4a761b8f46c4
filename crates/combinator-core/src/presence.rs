//! Presence tracking with grace-period hysteresis
//!
//! A parent is "present" from the first tick it is seen running until it
//! has been continuously missing for longer than its grace period. Only the
//! supervision loop owns a tracker, so no synchronization is needed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Result of feeding one lookup into the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Absent → Present: start companions
    Appeared,
    /// Still present; last-seen stamp refreshed
    Refreshed,
    /// Missing, but within the grace period (or no grace period is set)
    Graced { missing_for: Duration },
    /// Present → Absent: stop companions. The record has been removed.
    Vanished { missing_for: Duration },
    /// Not running and not tracked
    Idle,
}

/// Last-seen instants keyed by parent name
#[derive(Debug, Default, Clone)]
pub struct PresenceTracker {
    last_seen: HashMap<String, Instant>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one lookup for `name` observed at `now`.
    ///
    /// `grace` of `None` means the parent is never considered gone.
    pub fn observe(
        &mut self,
        name: &str,
        running: bool,
        now: Instant,
        grace: Option<Duration>,
    ) -> Observation {
        match (running, self.last_seen.get(name).copied()) {
            (true, None) => {
                self.last_seen.insert(name.to_string(), now);
                Observation::Appeared
            }
            (true, Some(_)) => {
                self.last_seen.insert(name.to_string(), now);
                Observation::Refreshed
            }
            (false, Some(seen)) => {
                let missing_for = now.saturating_duration_since(seen);
                if grace.is_some_and(|grace| missing_for > grace) {
                    self.last_seen.remove(name);
                    Observation::Vanished { missing_for }
                } else {
                    Observation::Graced { missing_for }
                }
            }
            (false, None) => Observation::Idle,
        }
    }

    pub fn last_seen(&self, name: &str) -> Option<Instant> {
        self.last_seen.get(name).copied()
    }

    pub fn is_present(&self, name: &str) -> bool {
        self.last_seen.contains_key(name)
    }

    /// Number of parents currently considered present
    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}
