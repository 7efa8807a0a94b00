//! Bounded history of connection state transitions

use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;
use tether_core::config::DEFAULT_HISTORY_CAPACITY;
use tether_core::time::current_time_millis;
use tether_core::{ConnectionState, StateTransitionRecord, TransitionMetadata};

/// Statistics derived from the recorded history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatistics {
    /// Records in the history
    pub total_events: usize,
    /// Transitions that left `Open`
    pub disconnects: usize,
    /// Transitions caused by an error
    pub errors: usize,
    /// `errors / total_events`, 0 when empty
    pub error_rate: f64,
    /// Most recently recorded state
    pub last_state: Option<ConnectionState>,
}

impl ConnectionStatistics {
    /// Last state as text, `"unknown"` when nothing was recorded
    pub fn last_state_label(&self) -> String {
        self.last_state
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

impl fmt::Display for ConnectionStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} events, {} disconnects, {} errors ({:.1}% error rate), last state {}",
            self.total_events,
            self.disconnects,
            self.errors,
            self.error_rate * 100.0,
            self.last_state_label()
        )
    }
}

/// Ring buffer of [`StateTransitionRecord`]s
///
/// Purely observational: recording never triggers any connection behaviour.
#[derive(Debug)]
pub struct ConnectionStateTracker {
    records: VecDeque<StateTransitionRecord>,
    capacity: usize,
}

impl ConnectionStateTracker {
    /// Create a tracker keeping at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a transition into `state`, evicting the oldest record when full
    pub fn record_state(&mut self, state: ConnectionState, metadata: TransitionMetadata) {
        let from = self.records.back().map(|r| r.to);
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(StateTransitionRecord {
            timestamp: current_time_millis(),
            from,
            to: state,
            metadata,
        });
    }

    /// The most recent `n` records, newest last
    pub fn history(&self, n: usize) -> Vec<StateTransitionRecord> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).cloned().collect()
    }

    /// Counts and rates over the retained history
    pub fn statistics(&self) -> ConnectionStatistics {
        let total_events = self.records.len();
        let disconnects = self
            .records
            .iter()
            .filter(|r| r.from == Some(ConnectionState::Open) && r.to != ConnectionState::Open)
            .count();
        let errors = self
            .records
            .iter()
            .filter(|r| r.metadata.error.is_some())
            .count();
        let error_rate = if total_events == 0 {
            0.0
        } else {
            errors as f64 / total_events as f64
        };

        ConnectionStatistics {
            total_events,
            disconnects,
            errors,
            error_rate,
            last_state: self.records.back().map(|r| r.to),
        }
    }

    /// Number of retained records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for ConnectionStateTracker {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
