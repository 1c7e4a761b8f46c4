//! In-memory event sink for testing and diagnostics

use crate::event::{EventSink, SupervisorEvent};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Collects events in arrival order (non-persistent)
#[derive(Clone)]
pub struct MemorySink {
    events: Arc<DashMap<u64, SupervisorEvent>>,
    sequence: Arc<AtomicU64>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self {
            events: Arc::new(DashMap::new()),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// All events recorded so far, oldest first
    pub fn events(&self) -> Vec<SupervisorEvent> {
        let mut events: Vec<(u64, SupervisorEvent)> = self
            .events
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        events.sort_by_key(|(seq, _)| *seq);
        events.into_iter().map(|(_, event)| event).collect()
    }

    /// Events with the given name (`"parentStarted"`, `"launchFailed"`, ...)
    pub fn named(&self, name: &str) -> Vec<SupervisorEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.name() == name)
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events
            .iter()
            .filter(|entry| entry.value().name() == name)
            .count()
    }

    /// Events in a time range, oldest first
    pub fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<SupervisorEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.timestamp() >= start && event.timestamp() <= end)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&self) {
        self.events.clear();
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: SupervisorEvent) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.events.insert(seq, event);
    }
}
