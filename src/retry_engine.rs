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

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::health_tracker::{ExecutionOutcome, ExecutionRecord};
use crate::work_unit::{ErrorKind, UnitContext, UnitError, UnitOutput, WorkUnit};

/// Retry policy for the critical path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retry attempts beyond the first invocation
    pub max_retries: u32,

    /// Base delay in milliseconds before the first retry
    pub base_delay_ms: u64,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,

    /// Upper bound on a single backoff delay in milliseconds
    pub max_delay_ms: u64,

    /// Error classes eligible for retry
    pub retryable: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 2_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 60_000,
            retryable: HashSet::from([ErrorKind::Transient, ErrorKind::Timeout]),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before the given 1-based attempt
    ///
    /// Attempt 1 carries no delay; attempt k (k >= 2) waits
    /// `base_delay_ms * backoff_multiplier^(k-2)`, capped at `max_delay_ms`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let raw = self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32 - 2);
        Duration::from_millis(raw.min(self.max_delay_ms as f64) as u64)
    }

    /// Total invocation attempts this policy allows
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    fn is_retryable(&self, kind: ErrorKind) -> bool {
        // Validation failures are never retried, regardless of configuration
        kind != ErrorKind::Validation && self.retryable.contains(&kind)
    }
}

/// Terminal error of a retried invocation
#[derive(Debug, Error)]
pub enum RetryError {
    /// Retry budget exhausted; carries the total attempts made
    #[error("unit '{unit_id}' failed after {attempts} attempts: {last_error}")]
    Exhausted {
        unit_id: String,
        attempts: u32,
        last_error: String,
    },

    /// A non-retryable error surfaced; the budget was not consumed
    #[error("unit '{unit_id}' failed on attempt {attempt}: {source}")]
    NonRetryable {
        unit_id: String,
        attempt: u32,
        #[source]
        source: UnitError,
    },
}

impl RetryError {
    /// Total attempts made before the invocation gave up
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::NonRetryable { attempt, .. } => *attempt,
        }
    }
}

/// Result of a retried invocation plus the record of every attempt
#[derive(Debug)]
pub struct RetryOutcome {
    pub result: Result<UnitOutput, RetryError>,
    pub attempts: Vec<ExecutionRecord>,
}

enum AttemptError {
    Unit(UnitError),
    TimedOut(Duration),
}

impl AttemptError {
    fn message(&self) -> String {
        match self {
            AttemptError::Unit(e) => e.to_string(),
            AttemptError::TimedOut(limit) => {
                format!("timed out after {}ms", limit.as_millis())
            }
        }
    }
}

/// Wraps a unit invocation with bounded exponential-backoff retries
///
/// An explicit collaborator rather than a decorator so ordering and timeouts
/// stay visible in the call graph.
pub struct RetryEngine {
    policy: RetryPolicy,
}

impl RetryEngine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke a unit, retrying retryable failures with exponential backoff
    ///
    /// Each attempt is bounded by `attempt_timeout`. The backoff sleep is a
    /// cooperative wait that holds no locks. Every attempt, including the
    /// final one, is returned as an `ExecutionRecord` for the health tracker.
    pub async fn invoke(
        &self,
        unit: &Arc<dyn WorkUnit>,
        ctx: &UnitContext,
        attempt_timeout: Duration,
    ) -> RetryOutcome {
        let mut attempts = Vec::new();
        let mut last_error: Option<AttemptError> = None;

        for attempt in 1..=self.policy.max_attempts() {
            let delay = self.policy.delay_for_attempt(attempt);
            if !delay.is_zero() {
                debug!(
                    "retrying unit '{}' (attempt {}/{}) after {}ms backoff",
                    unit.id(),
                    attempt,
                    self.policy.max_attempts(),
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let started_at = Utc::now();
            let attempt_result = tokio::time::timeout(attempt_timeout, unit.execute(ctx)).await;
            let finished_at = Utc::now();

            match attempt_result {
                Ok(Ok(output)) => {
                    attempts.push(ExecutionRecord::new(
                        unit.id(),
                        attempt,
                        started_at,
                        finished_at,
                        ExecutionOutcome::Success,
                        None,
                    ));
                    return RetryOutcome {
                        result: Ok(output),
                        attempts,
                    };
                }
                Ok(Err(error)) => {
                    attempts.push(ExecutionRecord::new(
                        unit.id(),
                        attempt,
                        started_at,
                        finished_at,
                        ExecutionOutcome::Failure,
                        Some(error.to_string()),
                    ));

                    if !self.policy.is_retryable(error.kind()) {
                        warn!(
                            "unit '{}' failed with non-retryable error on attempt {}: {}",
                            unit.id(),
                            attempt,
                            error
                        );
                        return RetryOutcome {
                            result: Err(RetryError::NonRetryable {
                                unit_id: unit.id().to_string(),
                                attempt,
                                source: error,
                            }),
                            attempts,
                        };
                    }

                    last_error = Some(AttemptError::Unit(error));
                }
                Err(_elapsed) => {
                    let attempt_error = AttemptError::TimedOut(attempt_timeout);
                    warn!(
                        "unit '{}' timed out after {}ms (attempt {})",
                        unit.id(),
                        attempt_timeout.as_millis(),
                        attempt
                    );
                    attempts.push(ExecutionRecord::new(
                        unit.id(),
                        attempt,
                        started_at,
                        finished_at,
                        ExecutionOutcome::Timeout,
                        Some(attempt_error.message()),
                    ));

                    if !self.policy.is_retryable(ErrorKind::Timeout) {
                        return RetryOutcome {
                            result: Err(RetryError::Exhausted {
                                unit_id: unit.id().to_string(),
                                attempts: attempt,
                                last_error: attempt_error.message(),
                            }),
                            attempts,
                        };
                    }

                    last_error = Some(attempt_error);
                }
            }
        }

        let total_attempts = self.policy.max_attempts();
        let last_error = last_error
            .map(|e| e.message())
            .unwrap_or_else(|| "unknown error".to_string());
        warn!(
            "unit '{}' exhausted retry budget after {} attempts: {}",
            unit.id(),
            total_attempts,
            last_error
        );

        RetryOutcome {
            result: Err(RetryError::Exhausted {
                unit_id: unit.id().to_string(),
                attempts: total_attempts,
                last_error,
            }),
            attempts,
        }
    }
}
