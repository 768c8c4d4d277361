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

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::risk_engine::RiskSnapshot;

/// Unit identifier
pub type UnitId = String;

/// Errors a work unit can raise during execution
#[derive(Debug, Error)]
pub enum UnitError {
    /// Transient failure (network/API hiccup); eligible for retry
    #[error("transient failure: {0}")]
    Transient(String),

    /// Malformed input; never retried
    #[error("validation failure: {0}")]
    Validation(String),

    /// Unexpected internal failure
    #[error("internal failure: {0}")]
    Internal(String),
}

impl UnitError {
    /// Classification used by the retry policy
    pub fn kind(&self) -> ErrorKind {
        match self {
            UnitError::Transient(_) => ErrorKind::Transient,
            UnitError::Validation(_) => ErrorKind::Validation,
            UnitError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Error classes recognized by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Validation,
    Internal,
    /// Attempt exceeded its timeout; produced by the invoker, not the unit
    Timeout,
}

/// Capability tag for a work unit
///
/// The scheduler resolves which capabilities run in a given cycle; the risk
/// gate can strip `Trading` without affecting read-only analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Portfolio risk assessment (critical path, runs first)
    Risk,

    /// Read-only market/portfolio analysis
    Analysis,

    /// Sentiment and narrative analysis
    Sentiment,

    /// Order placement and position management
    Trading,
}

/// Set of capabilities enabled for a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet(HashSet<Capability>);

impl CapabilitySet {
    /// Every capability, including the critical path
    pub fn all() -> Self {
        Self(HashSet::from([
            Capability::Risk,
            Capability::Analysis,
            Capability::Sentiment,
            Capability::Trading,
        ]))
    }

    /// The capabilities eligible for the concurrent phase
    pub fn concurrent() -> Self {
        Self(HashSet::from([
            Capability::Analysis,
            Capability::Sentiment,
            Capability::Trading,
        ]))
    }

    /// No capabilities enabled
    pub fn empty() -> Self {
        Self(HashSet::new())
    }

    pub fn enable(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    pub fn disable(&mut self, capability: Capability) {
        self.0.remove(&capability);
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self::all()
    }
}

/// Execution context handed to every unit invocation
///
/// Read-only for the duration of a cycle; units must not share mutable state
/// through it.
#[derive(Debug, Clone)]
pub struct UnitContext {
    /// Cycle index, starting at 1
    pub cycle: u64,

    /// Capabilities enabled for this cycle
    pub capabilities: CapabilitySet,

    /// Risk assessment for this cycle, once the critical path has produced one
    pub risk: Option<Arc<RiskSnapshot>>,
}

impl UnitContext {
    /// Context for the critical-path phase, before any assessment exists
    pub fn initial(cycle: u64) -> Self {
        Self {
            cycle,
            capabilities: CapabilitySet::all(),
            risk: None,
        }
    }
}

/// Result payload of a unit execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UnitOutput {
    /// Free-form analysis payload, opaque to the scheduler
    Report(serde_json::Value),

    /// Portfolio risk assessment; gates the remainder of the cycle
    RiskAssessment(Box<RiskSnapshot>),
}

/// A pluggable analysis/decision unit driven by the scheduler
#[async_trait]
pub trait WorkUnit: Send + Sync {
    /// Stable identifier, used for health tracking and metrics
    fn id(&self) -> &str;

    /// Capability this unit belongs to
    fn capability(&self) -> Capability;

    /// Whether the unit is part of the sequential critical path
    fn critical(&self) -> bool {
        self.capability() == Capability::Risk
    }

    /// Execute one invocation of the unit
    async fn execute(&self, ctx: &UnitContext) -> Result<UnitOutput, UnitError>;
}

/// Typed registry mapping capabilities to work units
///
/// Resolved once at cycle start so the "which units run this cycle" decision
/// is explicit and testable.
pub struct UnitRegistry {
    units: HashMap<Capability, Vec<Arc<dyn WorkUnit>>>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self {
            units: HashMap::new(),
        }
    }

    /// Register a unit under its capability
    pub fn register(&mut self, unit: Arc<dyn WorkUnit>) {
        self.units.entry(unit.capability()).or_default().push(unit);
    }

    /// Units eligible for the concurrent phase under the given capability set
    ///
    /// The critical path is never resolved here; it is invoked separately.
    pub fn resolve(&self, capabilities: &CapabilitySet) -> Vec<Arc<dyn WorkUnit>> {
        let mut resolved = Vec::new();
        for (capability, units) in &self.units {
            if capabilities.contains(*capability) {
                resolved.extend(units.iter().filter(|u| !u.critical()).cloned());
            }
        }
        resolved.sort_by(|a, b| a.id().cmp(b.id()));
        resolved
    }

    /// Total number of registered units
    pub fn len(&self) -> usize {
        self.units.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubUnit {
        id: String,
        capability: Capability,
    }

    #[async_trait]
    impl WorkUnit for StubUnit {
        fn id(&self) -> &str {
            &self.id
        }

        fn capability(&self) -> Capability {
            self.capability
        }

        async fn execute(&self, _ctx: &UnitContext) -> Result<UnitOutput, UnitError> {
            Ok(UnitOutput::Report(serde_json::json!({ "ok": true })))
        }
    }

    fn unit(id: &str, capability: Capability) -> Arc<dyn WorkUnit> {
        Arc::new(StubUnit {
            id: id.to_string(),
            capability,
        })
    }

    #[test]
    fn resolve_respects_capability_set() {
        let mut registry = UnitRegistry::new();
        registry.register(unit("alpha-analysis", Capability::Analysis));
        registry.register(unit("narrative", Capability::Sentiment));
        registry.register(unit("executor", Capability::Trading));

        let mut capabilities = CapabilitySet::concurrent();
        capabilities.disable(Capability::Trading);

        let resolved = registry.resolve(&capabilities);
        let ids: Vec<&str> = resolved.iter().map(|u| u.id()).collect();

        assert_eq!(ids, vec!["alpha-analysis", "narrative"]);
    }

    #[test]
    fn resolve_never_returns_the_critical_path() {
        let mut registry = UnitRegistry::new();
        registry.register(unit("portfolio-risk", Capability::Risk));
        registry.register(unit("alpha-analysis", Capability::Analysis));

        let resolved = registry.resolve(&CapabilitySet::all());
        let ids: Vec<&str> = resolved.iter().map(|u| u.id()).collect();

        assert_eq!(ids, vec!["alpha-analysis"]);
    }

    #[test]
    fn validation_errors_are_not_retryable() {
        assert_eq!(
            UnitError::Validation("bad input".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            UnitError::Transient("econnreset".into()).kind(),
            ErrorKind::Transient
        );
    }
}
