//! Maintenance Event History
//!
//! Capped, newest-first log of rule outcomes with lifetime counters.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Success,
    Failure,
}

/// Outcome of one rule evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceEvent {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub timestamp: DateTime<Utc>,
    pub status: EventStatus,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Totals over every event ever recorded, not only the retained window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceSummary {
    pub total_runs: u64,
    pub successes: u64,
    pub failures: u64,
    /// successes / total_runs, 0.0 before any run
    pub success_rate: f64,
}

// == Event History ==
#[derive(Debug)]
pub struct EventHistory {
    events: VecDeque<MaintenanceEvent>,
    limit: usize,
    next_id: u64,
    successes: u64,
    failures: u64,
}

impl EventHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(limit),
            limit,
            next_id: 1,
            successes: 0,
            failures: 0,
        }
    }

    /// Records an outcome at the front, dropping the oldest past the limit.
    pub fn record(
        &mut self,
        rule_id: &str,
        rule_name: &str,
        status: EventStatus,
        action: &str,
        details: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> MaintenanceEvent {
        let event = MaintenanceEvent {
            id: format!("evt-{}", self.next_id),
            rule_id: rule_id.to_string(),
            rule_name: rule_name.to_string(),
            timestamp,
            status,
            action: action.to_string(),
            details,
        };
        self.next_id += 1;
        match status {
            EventStatus::Success => self.successes += 1,
            EventStatus::Failure => self.failures += 1,
        }

        self.events.push_front(event.clone());
        self.events.truncate(self.limit);
        event
    }

    /// Up to `n` most recent events, newest first.
    pub fn recent(&self, n: usize) -> Vec<MaintenanceEvent> {
        self.events.iter().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn summary(&self) -> MaintenanceSummary {
        let total_runs = self.successes + self.failures;
        MaintenanceSummary {
            total_runs,
            successes: self.successes,
            failures: self.failures,
            success_rate: if total_runs == 0 {
                0.0
            } else {
                self.successes as f64 / total_runs as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(history: &mut EventHistory, status: EventStatus) -> MaintenanceEvent {
        history.record("rule", "Rule", status, "act", None, Utc::now())
    }

    #[test]
    fn test_newest_first() {
        let mut history = EventHistory::new(10);
        let first = record(&mut history, EventStatus::Success);
        let second = record(&mut history, EventStatus::Failure);

        let recent = history.recent(10);
        assert_eq!(recent[0].id, second.id);
        assert_eq!(recent[1].id, first.id);
        assert_eq!(history.recent(1).len(), 1);
    }

    #[test]
    fn test_window_capped_counts_kept() {
        let mut history = EventHistory::new(3);
        for _ in 0..4 {
            record(&mut history, EventStatus::Success);
        }
        record(&mut history, EventStatus::Failure);

        assert_eq!(history.len(), 3);
        assert_eq!(history.recent(10)[2].id, "evt-3");

        let summary = history.summary();
        assert_eq!(summary.total_runs, 5);
        assert_eq!(summary.successes, 4);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.success_rate, 0.8);
    }

    #[test]
    fn test_empty_summary() {
        let history = EventHistory::new(5);
        assert!(history.is_empty());
        assert_eq!(history.summary(), MaintenanceSummary::default());
    }

    #[test]
    fn test_event_serialization() {
        let mut history = EventHistory::new(5);
        let event = history.record(
            "error-rate",
            "Error Rate",
            EventStatus::Failure,
            "Invalidate",
            Some("boom".to_string()),
            Utc::now(),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["ruleId"], "error-rate");
        assert_eq!(json["details"], "boom");
    }
}
