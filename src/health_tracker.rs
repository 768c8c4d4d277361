// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Cadence Systems
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::work_unit::UnitId;

/// Success rate at or above which a unit with no consecutive failures is healthy
const HEALTHY_SUCCESS_RATE: f64 = 0.95;

/// Success rate at or above which a unit is at worst degraded
const DEGRADED_SUCCESS_RATE: f64 = 0.80;

/// Consecutive-failure count at or below which a unit is at worst degraded
const DEGRADED_MAX_CONSECUTIVE_FAILURES: u32 = 2;

/// Outcome of a single unit invocation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success,
    Failure,
    Timeout,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success)
    }
}

/// Immutable record of one invocation attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Record unique identifier
    pub id: String,

    /// Unit this attempt belongs to
    pub unit_id: UnitId,

    /// Attempt number within the invocation, starting at 1
    pub attempt: u32,

    /// When the attempt started
    pub started_at: DateTime<Utc>,

    /// When the attempt finished (or was abandoned)
    pub finished_at: DateTime<Utc>,

    /// Attempt outcome
    pub outcome: ExecutionOutcome,

    /// Error detail for failed attempts
    pub error: Option<String>,
}

impl ExecutionRecord {
    pub fn new(
        unit_id: &str,
        attempt: u32,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        outcome: ExecutionOutcome,
        error: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            unit_id: unit_id.to_string(),
            attempt,
            started_at,
            finished_at,
            outcome,
            error,
        }
    }

    /// Wall-clock duration of the attempt in milliseconds
    pub fn duration_ms(&self) -> f64 {
        (self.finished_at - self.started_at)
            .num_microseconds()
            .map(|us| us as f64 / 1_000.0)
            .unwrap_or(f64::MAX)
    }
}

/// Derived health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Rolling health statistics for a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Unit identifier
    pub unit_id: UnitId,

    /// Success rate over the rolling window (0.0-1.0)
    pub success_rate: f64,

    /// Failures since the most recent success
    pub consecutive_failures: u32,

    /// Average duration of successful attempts in milliseconds
    pub avg_duration_ms: f64,

    /// Number of records in the window
    pub executions: usize,

    /// Derived classification
    pub state: HealthState,
}

/// Health tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthTrackerConfig {
    /// Number of most recent executions considered per unit
    pub window: usize,
}

impl Default for HealthTrackerConfig {
    fn default() -> Self {
        Self { window: 20 }
    }
}

/// Tracks per-unit execution records and classifies unit health
///
/// Writes are serialized behind a lock because the concurrent phase records
/// from multiple workers; reads take a consistent snapshot of the window.
pub struct HealthTracker {
    config: HealthTrackerConfig,
    histories: RwLock<HashMap<UnitId, VecDeque<ExecutionRecord>>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::with_config(HealthTrackerConfig::default())
    }

    pub fn with_config(config: HealthTrackerConfig) -> Self {
        Self {
            config,
            histories: RwLock::new(HashMap::new()),
        }
    }

    /// Record one invocation attempt
    pub fn record(&self, record: ExecutionRecord) {
        debug!(
            "health record: unit={} attempt={} outcome={:?}",
            record.unit_id, record.attempt, record.outcome
        );

        let mut histories = self.histories.write();
        let history = histories.entry(record.unit_id.clone()).or_default();
        history.push_back(record);

        while history.len() > self.config.window {
            history.pop_front();
        }
    }

    /// Current health status for a unit, or `None` when nothing was recorded
    ///
    /// A pure function of the unit's recorded window: repeated calls without
    /// new records return an identical status.
    pub fn status(&self, unit_id: &str) -> Option<HealthStatus> {
        let histories = self.histories.read();
        let history = histories.get(unit_id)?;
        if history.is_empty() {
            return None;
        }
        Some(Self::evaluate(unit_id, history))
    }

    /// Health status for every tracked unit
    pub fn all_statuses(&self) -> Vec<HealthStatus> {
        let histories = self.histories.read();
        let mut statuses: Vec<HealthStatus> = histories
            .iter()
            .filter(|(_, history)| !history.is_empty())
            .map(|(unit_id, history)| Self::evaluate(unit_id, history))
            .collect();
        statuses.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        statuses
    }

    fn evaluate(unit_id: &str, history: &VecDeque<ExecutionRecord>) -> HealthStatus {
        let executions = history.len();
        let successes = history.iter().filter(|r| r.outcome.is_success()).count();
        let success_rate = successes as f64 / executions as f64;

        let consecutive_failures = history
            .iter()
            .rev()
            .take_while(|r| !r.outcome.is_success())
            .count() as u32;

        let avg_duration_ms = if successes > 0 {
            history
                .iter()
                .filter(|r| r.outcome.is_success())
                .map(ExecutionRecord::duration_ms)
                .sum::<f64>()
                / successes as f64
        } else {
            0.0
        };

        HealthStatus {
            unit_id: unit_id.to_string(),
            success_rate,
            consecutive_failures,
            avg_duration_ms,
            executions,
            state: classify(success_rate, consecutive_failures),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify health from window statistics
///
/// Deterministic and side-effect free so a classification can always be
/// re-derived from the record log.
pub fn classify(success_rate: f64, consecutive_failures: u32) -> HealthState {
    if success_rate >= HEALTHY_SUCCESS_RATE && consecutive_failures == 0 {
        HealthState::Healthy
    } else if success_rate >= DEGRADED_SUCCESS_RATE
        || consecutive_failures <= DEGRADED_MAX_CONSECUTIVE_FAILURES
    {
        HealthState::Degraded
    } else {
        HealthState::Unhealthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(unit_id: &str, outcome: ExecutionOutcome, duration_ms: i64) -> ExecutionRecord {
        let started = Utc::now();
        ExecutionRecord::new(
            unit_id,
            1,
            started,
            started + Duration::milliseconds(duration_ms),
            outcome,
            match outcome {
                ExecutionOutcome::Success => None,
                _ => Some("boom".to_string()),
            },
        )
    }

    #[test]
    fn nineteen_of_twenty_with_isolated_failure_is_healthy() {
        let tracker = HealthTracker::new();

        for i in 0..20 {
            let outcome = if i == 10 {
                ExecutionOutcome::Failure
            } else {
                ExecutionOutcome::Success
            };
            tracker.record(record("scanner", outcome, 100));
        }

        let status = tracker.status("scanner").unwrap();
        assert_eq!(status.executions, 20);
        assert!((status.success_rate - 0.95).abs() < 1e-9);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.state, HealthState::Healthy);
    }

    #[test]
    fn three_trailing_failures_of_five_is_unhealthy() {
        let tracker = HealthTracker::new();

        tracker.record(record("scanner", ExecutionOutcome::Success, 100));
        tracker.record(record("scanner", ExecutionOutcome::Success, 100));
        tracker.record(record("scanner", ExecutionOutcome::Failure, 100));
        tracker.record(record("scanner", ExecutionOutcome::Failure, 100));
        tracker.record(record("scanner", ExecutionOutcome::Timeout, 100));

        let status = tracker.status("scanner").unwrap();
        assert_eq!(status.consecutive_failures, 3);
        assert_eq!(status.state, HealthState::Unhealthy);
    }

    #[test]
    fn status_is_idempotent_without_new_records() {
        let tracker = HealthTracker::new();
        tracker.record(record("scanner", ExecutionOutcome::Success, 120));
        tracker.record(record("scanner", ExecutionOutcome::Failure, 80));

        let first = tracker.status("scanner").unwrap();
        let second = tracker.status("scanner").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn window_evicts_old_records() {
        let tracker = HealthTracker::with_config(HealthTrackerConfig { window: 3 });

        tracker.record(record("scanner", ExecutionOutcome::Failure, 100));
        for _ in 0..3 {
            tracker.record(record("scanner", ExecutionOutcome::Success, 100));
        }

        let status = tracker.status("scanner").unwrap();
        assert_eq!(status.executions, 3);
        assert!((status.success_rate - 1.0).abs() < 1e-9);
        assert_eq!(status.state, HealthState::Healthy);
    }

    #[test]
    fn unknown_unit_has_no_status() {
        let tracker = HealthTracker::new();
        assert!(tracker.status("ghost").is_none());
    }

    #[test]
    fn timeouts_count_as_failures() {
        let tracker = HealthTracker::new();
        tracker.record(record("scanner", ExecutionOutcome::Timeout, 300_000));

        let status = tracker.status("scanner").unwrap();
        assert_eq!(status.success_rate, 0.0);
        assert_eq!(status.consecutive_failures, 1);
    }

    #[test]
    fn average_duration_covers_successes_only() {
        let tracker = HealthTracker::new();
        tracker.record(record("scanner", ExecutionOutcome::Success, 100));
        tracker.record(record("scanner", ExecutionOutcome::Success, 300));
        tracker.record(record("scanner", ExecutionOutcome::Failure, 10_000));

        let status = tracker.status("scanner").unwrap();
        assert!((status.avg_duration_ms - 200.0).abs() < 1.0);
    }
}
