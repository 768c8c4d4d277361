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

pub mod correlation;
pub mod cycle_scheduler;
pub mod drawdown;
pub mod health_tracker;
pub mod metrics_exporter;
pub mod position_sizer;
pub mod retry_engine;
pub mod risk_engine;
pub mod work_unit;

#[cfg(test)]
mod tests;

// Re-export common types
pub use correlation::{
    check_concentration, correlation_matrix, pearson_correlation, ConcentrationOutcome,
    ConcentrationReport, CorrelatedGroup, CorrelationMatrix, CorrelationOutcome,
};
pub use cycle_scheduler::{CycleMetrics, CycleScheduler, SchedulerConfig, UnitCycleResult};
pub use drawdown::{EquityPoint, EquityWindow};
pub use health_tracker::{
    classify, ExecutionOutcome, ExecutionRecord, HealthState, HealthStatus, HealthTracker,
    HealthTrackerConfig,
};
pub use metrics_exporter::{
    ExportError, JsonFileSink, LogSink, MetricsExporter, MetricsSink, MetricsSnapshot, UnitStats,
};
pub use position_sizer::{
    kelly_size, risk_parity_size, volatility_target_size, SizerConfig, SizingError,
};
pub use retry_engine::{RetryEngine, RetryError, RetryOutcome, RetryPolicy};
pub use risk_engine::{
    BreachKind, Estimate, GateDecision, PositionProvider, PositionSnapshot, ProviderError,
    RiskAssessmentUnit, RiskEngine, RiskEngineConfig, RiskError, RiskSnapshot, RiskThresholds,
    ThresholdBreach,
};
pub use work_unit::{
    Capability, CapabilitySet, ErrorKind, UnitContext, UnitError, UnitId, UnitOutput,
    UnitRegistry, WorkUnit,
};

use std::sync::Arc;

/// Create a health tracker with the default rolling window
pub fn create_health_tracker() -> Arc<HealthTracker> {
    Arc::new(HealthTracker::new())
}

/// Create a health tracker with a custom configuration
pub fn create_health_tracker_with_config(config: HealthTrackerConfig) -> Arc<HealthTracker> {
    Arc::new(HealthTracker::with_config(config))
}

/// Create a risk engine
pub fn create_risk_engine(
    config: RiskEngineConfig,
    thresholds: RiskThresholds,
) -> Arc<RiskEngine> {
    Arc::new(RiskEngine::new(config, thresholds))
}

/// Create the critical-path risk unit from an engine and a position provider
pub fn create_risk_unit(
    engine: Arc<RiskEngine>,
    provider: Arc<dyn PositionProvider>,
) -> Arc<dyn WorkUnit> {
    Arc::new(RiskAssessmentUnit::new(engine, provider))
}

/// Create a metrics exporter writing JSON snapshots under the given directory
pub fn create_metrics_exporter(dir: &str) -> Arc<MetricsExporter> {
    Arc::new(MetricsExporter::new(Arc::new(JsonFileSink::new(dir))))
}

/// Create a metrics exporter with a custom sink
pub fn create_metrics_exporter_with_sink(sink: Arc<dyn MetricsSink>) -> Arc<MetricsExporter> {
    Arc::new(MetricsExporter::new(sink))
}

/// Create a fully wired cycle scheduler
pub fn create_cycle_scheduler(
    registry: UnitRegistry,
    risk_unit: Arc<dyn WorkUnit>,
    health: Arc<HealthTracker>,
    exporter: Arc<MetricsExporter>,
    config: SchedulerConfig,
) -> Arc<CycleScheduler> {
    Arc::new(CycleScheduler::new(
        registry, risk_unit, health, exporter, config,
    ))
}
