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

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_histogram, gauge, histogram};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cycle_scheduler::CycleMetrics;
use crate::health_tracker::{ExecutionOutcome, ExecutionRecord};

/// Metrics export errors
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Cumulative statistics for one unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitStats {
    /// Total invocation attempts observed
    pub executions: u64,

    /// Successful attempts
    pub successes: u64,

    /// Failed attempts (errors)
    pub failures: u64,

    /// Attempts abandoned on timeout
    pub timeouts: u64,

    /// Total duration across all attempts in milliseconds
    pub total_duration_ms: f64,

    /// Average duration per attempt in milliseconds
    pub avg_duration_ms: f64,
}

impl UnitStats {
    fn observe(&mut self, record: &ExecutionRecord) {
        self.executions += 1;
        match record.outcome {
            ExecutionOutcome::Success => self.successes += 1,
            ExecutionOutcome::Failure => self.failures += 1,
            ExecutionOutcome::Timeout => self.timeouts += 1,
        }
        self.total_duration_ms += record.duration_ms();
        self.avg_duration_ms = self.total_duration_ms / self.executions as f64;
    }
}

/// Serializable snapshot of cumulative and latest-cycle metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// When the snapshot was generated
    pub generated_at: DateTime<Utc>,

    /// Cycles completed since startup
    pub cycles_completed: u64,

    /// Cumulative per-unit statistics
    pub unit_stats: HashMap<String, UnitStats>,

    /// The most recently completed cycle
    pub last_cycle: Option<CycleMetrics>,
}

/// Destination for metrics snapshots
///
/// Write failures must be non-fatal to the caller.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn write(&self, snapshot: &MetricsSnapshot) -> Result<(), ExportError>;
}

/// Sink writing one pretty-printed JSON file per export
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).unwrap_or_else(|e| {
            warn!("failed to create metrics directory {:?}: {}", dir, e);
        });
        Self { dir }
    }
}

#[async_trait]
impl MetricsSink for JsonFileSink {
    async fn write(&self, snapshot: &MetricsSnapshot) -> Result<(), ExportError> {
        let filename = format!(
            "metrics_{}_{}.json",
            snapshot.cycles_completed,
            snapshot.generated_at.format("%Y%m%d_%H%M%S")
        );
        let path = self.dir.join(filename);

        let payload = serde_json::to_string_pretty(snapshot)?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        writeln!(file, "{payload}")?;

        debug!("metrics snapshot written to {:?}", path);
        Ok(())
    }
}

/// Sink emitting the snapshot to the log stream
pub struct LogSink;

#[async_trait]
impl MetricsSink for LogSink {
    async fn write(&self, snapshot: &MetricsSnapshot) -> Result<(), ExportError> {
        info!("metrics snapshot: {}", serde_json::to_string(snapshot)?);
        Ok(())
    }
}

/// Aggregates execution and cycle statistics and exports them best-effort
///
/// Mutated from concurrent workers; writes serialize behind a lock while
/// snapshots read a consistent copy. Export runs on a spawned task so a slow
/// or failing sink never delays the next cycle.
pub struct MetricsExporter {
    state: RwLock<ExporterState>,
    sink: Arc<dyn MetricsSink>,
}

#[derive(Default)]
struct ExporterState {
    cycles_completed: u64,
    unit_stats: HashMap<String, UnitStats>,
    last_cycle: Option<CycleMetrics>,
}

impl MetricsExporter {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        describe_counter!(
            "unit_executions_total",
            "Total unit invocation attempts by unit and outcome"
        );
        describe_histogram!(
            "unit_duration_milliseconds",
            "Unit invocation duration in milliseconds"
        );
        describe_counter!("cycles_total", "Orchestration cycles completed");

        Self {
            state: RwLock::new(ExporterState::default()),
            sink,
        }
    }

    /// Record one invocation attempt
    pub fn observe_execution(&self, record: &ExecutionRecord) {
        {
            let mut state = self.state.write();
            state
                .unit_stats
                .entry(record.unit_id.clone())
                .or_default()
                .observe(record);
        }

        let outcome = match record.outcome {
            ExecutionOutcome::Success => "success",
            ExecutionOutcome::Failure => "failure",
            ExecutionOutcome::Timeout => "timeout",
        };
        counter!(
            "unit_executions_total",
            1,
            "unit" => record.unit_id.clone(),
            "outcome" => outcome
        );
        histogram!(
            "unit_duration_milliseconds",
            record.duration_ms(),
            "unit" => record.unit_id.clone()
        );
    }

    /// Record a completed cycle
    pub fn observe_cycle(&self, cycle: CycleMetrics) {
        counter!("cycles_total", 1);
        gauge!("cycle_success_rate", cycle.success_rate);

        let mut state = self.state.write();
        state.cycles_completed += 1;
        state.last_cycle = Some(cycle);
    }

    /// Consistent snapshot of everything aggregated so far
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.read();
        MetricsSnapshot {
            generated_at: Utc::now(),
            cycles_completed: state.cycles_completed,
            unit_stats: state.unit_stats.clone(),
            last_cycle: state.last_cycle.clone(),
        }
    }

    /// Export the current snapshot without blocking the caller
    ///
    /// Failures are logged and swallowed; export is best-effort by contract.
    pub fn export(self: &Arc<Self>) {
        let exporter = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = exporter.export_now().await {
                warn!("metrics export failed (non-fatal): {}", e);
            }
        });
    }

    /// Export the current snapshot and surface the sink result
    pub async fn export_now(&self) -> Result<(), ExportError> {
        let snapshot = self.snapshot();
        self.sink.write(&snapshot).await
    }
}
