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

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::health_tracker::{ExecutionOutcome, ExecutionRecord, HealthTracker};
use crate::metrics_exporter::MetricsExporter;
use crate::retry_engine::{RetryEngine, RetryPolicy};
use crate::risk_engine::GateDecision;
use crate::work_unit::{Capability, CapabilitySet, UnitContext, UnitOutput, UnitRegistry, WorkUnit};

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum concurrent workers in the second phase
    pub pool_width: usize,

    /// Timeout per unit invocation in milliseconds
    pub unit_timeout_ms: u64,

    /// Sleep between cycles in milliseconds
    pub cycle_interval_ms: u64,

    /// Skip the concurrent phase entirely when a risk threshold is breached,
    /// instead of only disabling the trading capability
    pub hard_stop_on_breach: bool,

    /// Critical-path retry policy
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_width: 4,
            unit_timeout_ms: 300_000,
            cycle_interval_ms: 900_000, // 15 minutes
            hard_stop_on_breach: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of one unit within a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitCycleResult {
    /// Unit identifier
    pub unit_id: String,

    /// Final outcome of the invocation
    pub outcome: ExecutionOutcome,

    /// Total wall-clock time across attempts in milliseconds
    pub duration_ms: f64,

    /// Attempts made (greater than 1 only on the critical path)
    pub attempts: u32,
}

/// Metrics for one completed cycle
///
/// Created at cycle start, finalized at cycle end, exported and then dropped
/// from live memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleMetrics {
    /// Cycle index, starting at 1
    pub cycle: u64,

    /// Cycle unique identifier
    pub cycle_id: String,

    /// When the cycle started
    pub started_at: DateTime<Utc>,

    /// When the cycle finished
    pub finished_at: DateTime<Utc>,

    /// Whether the cycle degraded (risk assessment exhausted its retries)
    pub degraded: bool,

    /// Gate decision for the cycle, when the risk assessment succeeded
    pub gate: Option<GateDecision>,

    /// Per-unit outcomes, critical path first
    pub unit_results: Vec<UnitCycleResult>,

    /// Units executed in the concurrent phase
    pub phase2_executed: usize,

    /// Fraction of unit invocations that succeeded
    pub success_rate: f64,
}

/// Drives the recurring two-phase cycle
///
/// Phase one runs the risk unit sequentially through the retry engine; its
/// assessment gates phase two, a bounded pool of independently timed-out
/// workers. Unit failures never propagate out of the cycle.
pub struct CycleScheduler {
    registry: UnitRegistry,
    risk_unit: Arc<dyn WorkUnit>,
    retry: RetryEngine,
    health: Arc<HealthTracker>,
    exporter: Arc<MetricsExporter>,
    config: SchedulerConfig,
    cycle_counter: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl CycleScheduler {
    pub fn new(
        registry: UnitRegistry,
        risk_unit: Arc<dyn WorkUnit>,
        health: Arc<HealthTracker>,
        exporter: Arc<MetricsExporter>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            risk_unit,
            retry: RetryEngine::new(config.retry.clone()),
            health,
            exporter,
            config,
            cycle_counter: AtomicU64::new(0),
            shutdown,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Request a graceful stop after the current cycle
    pub fn shutdown(&self) {
        info!("scheduler shutdown requested");
        let _ = self.shutdown.send(true);
    }

    /// Run cycles forever, sleeping the configured interval between them
    pub async fn run(&self) {
        info!(
            "scheduler starting: {} units registered, interval {}ms",
            self.registry.len(),
            self.config.cycle_interval_ms
        );

        let mut shutdown = self.shutdown.subscribe();
        loop {
            if *shutdown.borrow() {
                break;
            }

            let metrics = self.run_cycle().await;
            debug!(
                "cycle {} finished: {} unit(s), success rate {:.0}%",
                metrics.cycle,
                metrics.unit_results.len(),
                metrics.success_rate * 100.0
            );

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.config.cycle_interval_ms)) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!("scheduler stopped");
    }

    /// Execute one full cycle and return its metrics
    pub async fn run_cycle(&self) -> CycleMetrics {
        let cycle = self.cycle_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let cycle_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let unit_timeout = Duration::from_millis(self.config.unit_timeout_ms);
        let mut unit_results: Vec<UnitCycleResult> = Vec::new();

        info!("cycle {} starting", cycle);

        // Phase 1: risk assessment, sequential, retried
        let phase1_ctx = UnitContext::initial(cycle);
        let outcome = self
            .retry
            .invoke(&self.risk_unit, &phase1_ctx, unit_timeout)
            .await;

        for record in &outcome.attempts {
            self.health.record(record.clone());
            self.exporter.observe_execution(record);
        }
        if let Some(last) = outcome.attempts.last() {
            unit_results.push(UnitCycleResult {
                unit_id: self.risk_unit.id().to_string(),
                outcome: last.outcome,
                duration_ms: outcome.attempts.iter().map(ExecutionRecord::duration_ms).sum(),
                attempts: outcome.attempts.len() as u32,
            });
        }

        let snapshot = match outcome.result {
            Ok(UnitOutput::RiskAssessment(snapshot)) => Some(Arc::new(*snapshot)),
            Ok(UnitOutput::Report(_)) => {
                error!(
                    "critical unit '{}' returned a report instead of a risk assessment",
                    self.risk_unit.id()
                );
                None
            }
            Err(e) => {
                error!("risk assessment failed for cycle {}: {}", cycle, e);
                None
            }
        };

        // Fail safe: no analysis or trading without a risk signal
        let Some(snapshot) = snapshot else {
            warn!("cycle {} degraded: concurrent phase skipped", cycle);
            return self
                .finalize(cycle, cycle_id, started_at, true, None, unit_results, 0)
                .await;
        };

        // Gate evaluation: map the assessment onto this cycle's capabilities
        let gate = snapshot.gate.clone();
        let mut capabilities = CapabilitySet::concurrent();
        if !gate.trading_enabled {
            warn!("cycle {}: trading capability disabled by risk gate", cycle);
            capabilities.disable(Capability::Trading);
        }
        if !gate.is_clear() && self.config.hard_stop_on_breach {
            warn!(
                "cycle {}: hard stop, {} threshold breach(es), concurrent phase skipped",
                cycle,
                gate.breaches.len()
            );
            return self
                .finalize(cycle, cycle_id, started_at, false, Some(gate), unit_results, 0)
                .await;
        }

        // Phase 2: bounded pool, one timeout per unit, no retries
        let units = self.registry.resolve(&capabilities);
        let phase2_count = units.len();
        debug!(
            "cycle {}: {} unit(s) in concurrent phase (pool width {})",
            cycle, phase2_count, self.config.pool_width
        );

        let ctx = Arc::new(UnitContext {
            cycle,
            capabilities,
            risk: Some(snapshot),
        });
        let semaphore = Arc::new(Semaphore::new(self.config.pool_width.max(1)));
        let mut handles = Vec::with_capacity(units.len());

        for unit in units {
            let semaphore = Arc::clone(&semaphore);
            let ctx = Arc::clone(&ctx);
            let health = Arc::clone(&self.health);
            let exporter = Arc::clone(&self.exporter);
            let unit_id = unit.id().to_string();

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return UnitCycleResult {
                            unit_id: unit.id().to_string(),
                            outcome: ExecutionOutcome::Failure,
                            duration_ms: 0.0,
                            attempts: 0,
                        }
                    }
                };

                let started = Utc::now();
                let result = tokio::time::timeout(unit_timeout, unit.execute(&ctx)).await;
                let finished = Utc::now();

                let (outcome, error) = match &result {
                    Ok(Ok(_)) => (ExecutionOutcome::Success, None),
                    Ok(Err(e)) => (ExecutionOutcome::Failure, Some(e.to_string())),
                    Err(_) => (
                        ExecutionOutcome::Timeout,
                        Some(format!("timed out after {}ms", unit_timeout.as_millis())),
                    ),
                };

                match outcome {
                    ExecutionOutcome::Success => {
                        debug!("unit '{}' completed", unit.id());
                    }
                    ExecutionOutcome::Failure => {
                        warn!(
                            "unit '{}' failed: {}",
                            unit.id(),
                            error.as_deref().unwrap_or("unknown error")
                        );
                    }
                    ExecutionOutcome::Timeout => {
                        warn!(
                            "unit '{}' abandoned after {}ms timeout",
                            unit.id(),
                            unit_timeout.as_millis()
                        );
                    }
                }

                let record =
                    ExecutionRecord::new(unit.id(), 1, started, finished, outcome, error);
                health.record(record.clone());
                exporter.observe_execution(&record);

                UnitCycleResult {
                    unit_id: unit.id().to_string(),
                    outcome,
                    duration_ms: record.duration_ms(),
                    attempts: 1,
                }
            });

            handles.push((unit_id, handle));
        }

        let joined = futures::future::join_all(
            handles
                .into_iter()
                .map(|(unit_id, handle)| async move { (unit_id, handle.await) }),
        )
        .await;

        for (unit_id, outcome) in joined {
            match outcome {
                Ok(result) => unit_results.push(result),
                Err(e) => {
                    // A panicked unit is isolated and recorded as a failure
                    error!("unit '{}' task aborted: {}", unit_id, e);
                    let now = Utc::now();
                    let record = ExecutionRecord::new(
                        &unit_id,
                        1,
                        now,
                        now,
                        ExecutionOutcome::Failure,
                        Some(e.to_string()),
                    );
                    self.health.record(record.clone());
                    self.exporter.observe_execution(&record);
                    unit_results.push(UnitCycleResult {
                        unit_id,
                        outcome: ExecutionOutcome::Failure,
                        duration_ms: 0.0,
                        attempts: 1,
                    });
                }
            }
        }

        self.finalize(
            cycle,
            cycle_id,
            started_at,
            false,
            Some(gate),
            unit_results,
            phase2_count,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn finalize(
        &self,
        cycle: u64,
        cycle_id: String,
        started_at: DateTime<Utc>,
        degraded: bool,
        gate: Option<GateDecision>,
        unit_results: Vec<UnitCycleResult>,
        phase2_executed: usize,
    ) -> CycleMetrics {
        let successes = unit_results
            .iter()
            .filter(|r| r.outcome.is_success())
            .count();
        let success_rate = if unit_results.is_empty() {
            0.0
        } else {
            successes as f64 / unit_results.len() as f64
        };

        let metrics = CycleMetrics {
            cycle,
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            degraded,
            gate,
            unit_results,
            phase2_executed,
            success_rate,
        };

        info!(
            "cycle {} complete: {} unit(s), {} success(es), degraded={}",
            cycle,
            metrics.unit_results.len(),
            successes,
            degraded
        );

        self.exporter.observe_cycle(metrics.clone());
        self.exporter.export();

        metrics
    }
}
