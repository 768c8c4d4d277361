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

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::correlation::{
    check_concentration, correlation_matrix, ConcentrationOutcome, CorrelationOutcome,
};
use crate::drawdown::{EquityPoint, EquityWindow};
use crate::work_unit::{Capability, UnitContext, UnitError, UnitOutput, WorkUnit};

/// Composite score weight for normalized volatility
const SCORE_WEIGHT_VOLATILITY: f64 = 40.0;

/// Composite score weight for correlation with the portfolio
const SCORE_WEIGHT_CORRELATION: f64 = 30.0;

/// Composite score weight for recent performance (losses only)
const SCORE_WEIGHT_PERFORMANCE: f64 = 30.0;

/// Risk engine errors
#[derive(Debug, Error)]
pub enum RiskError {
    /// Malformed position list; rejected before any computation
    #[error("invalid position list: {0}")]
    InvalidPositions(String),

    /// Position provider failure
    #[error("position provider failure: {0}")]
    Provider(#[from] ProviderError),
}

/// Failure reported by a position/market data provider
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ProviderError(pub String);

/// External supplier of position snapshots and portfolio equity
///
/// May fail or return partial data; short or missing series surface
/// downstream as insufficient data, never as fabricated defaults.
#[async_trait]
pub trait PositionProvider: Send + Sync {
    async fn positions(&self) -> Result<Vec<PositionSnapshot>, ProviderError>;

    async fn portfolio_equity(&self) -> Result<f64, ProviderError>;
}

/// One held position and its periodic return history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Token/asset identifier
    pub token: String,

    /// Market value in USD
    pub market_value: f64,

    /// Periodic returns, most recent last
    pub returns: Vec<f64>,
}

/// A risk metric that may be unknowable from the available history
///
/// Downstream consumers must treat `InsufficientData` as unknown, never as
/// zero risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Estimate {
    Available { value: f64 },
    InsufficientData { required: usize, available: usize },
}

impl Estimate {
    pub fn value(&self) -> Option<f64> {
        match self {
            Estimate::Available { value } => Some(*value),
            Estimate::InsufficientData { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Estimate::Available { .. })
    }
}

/// Threshold breached by the current assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachKind {
    DailyLoss,
    MinimumBalance,
    RiskScore,
}

/// A breached risk threshold with its actual and limit values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBreach {
    pub kind: BreachKind,
    pub description: String,
    pub actual: f64,
    pub limit: f64,
}

/// Gate decision attached to every assessment
///
/// A breach is fatal to the trading capability for the current cycle only;
/// the next cycle re-evaluates independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    /// Whether order placement may proceed this cycle
    pub trading_enabled: bool,

    /// Thresholds breached by this assessment
    pub breaches: Vec<ThresholdBreach>,
}

impl GateDecision {
    /// True when no threshold was breached
    pub fn is_clear(&self) -> bool {
        self.breaches.is_empty()
    }
}

/// Portfolio risk assessment, computed fresh every cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSnapshot {
    /// When the assessment was computed
    pub timestamp: DateTime<Utc>,

    /// Total market value of the assessed positions
    pub portfolio_value: f64,

    /// Annualized portfolio volatility
    pub volatility: Estimate,

    /// Value at Risk at 95% confidence, as a positive USD loss magnitude
    pub var_95: Estimate,

    /// Conditional VaR at 95% confidence; always >= VaR when both are known
    pub cvar_95: Estimate,

    /// Annualized Sharpe ratio
    pub sharpe_ratio: Estimate,

    /// Deepest drawdown in the rolling equity history (0.0-1.0)
    pub max_drawdown: Estimate,

    /// Loss in USD over the configured lookback; positive values are losses
    pub daily_loss_usd: Estimate,

    /// Pairwise correlation analysis
    pub correlation: CorrelationOutcome,

    /// Correlated-exposure concentration analysis
    pub concentration: ConcentrationOutcome,

    /// Composite risk score, 0-100, higher is riskier
    pub risk_score: Estimate,

    /// Gate decision against the configured thresholds
    pub gate: GateDecision,
}

/// Risk engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEngineConfig {
    /// Rolling window for volatility and recent-performance calculations
    pub volatility_window: usize,

    /// Trading periods per year for annualization (15-minute periods)
    pub periods_per_year: u32,

    /// Confidence level for VaR/CVaR (0.0-1.0)
    pub confidence: f64,

    /// Minimum overlapping observations for tail and correlation metrics
    pub min_observations: usize,

    /// Pairwise correlation above which positions are grouped
    pub correlation_threshold: f64,

    /// Maximum portfolio fraction allowed in one correlated group
    pub max_correlated_exposure: f64,

    /// Annualized volatility mapping to a full volatility score
    pub max_volatility_norm: f64,

    /// Average correlation mapping to a full correlation score
    pub max_correlation_norm: f64,

    /// Window loss mapping to a full recent-performance penalty (0.20 = -20%)
    pub max_loss_norm: f64,

    /// Annual risk-free rate for the Sharpe ratio
    pub risk_free_rate: f64,

    /// Maximum equity observations retained for drawdown tracking
    pub equity_window: usize,

    /// Lookback in hours for the daily-loss check
    pub loss_lookback_hours: i64,
}

impl Default for RiskEngineConfig {
    fn default() -> Self {
        Self {
            volatility_window: 20,
            periods_per_year: 35_040,
            confidence: 0.95,
            min_observations: 20,
            correlation_threshold: 0.70,
            max_correlated_exposure: 0.40,
            max_volatility_norm: 1.0,
            max_correlation_norm: 0.80,
            max_loss_norm: 0.20,
            risk_free_rate: 0.02,
            equity_window: 2_000,
            loss_lookback_hours: 24,
        }
    }
}

/// Thresholds evaluated by the gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskThresholds {
    /// Maximum loss over the lookback before trading halts, in USD
    pub max_daily_loss_usd: f64,

    /// Minimum portfolio equity below which trading halts, in USD
    pub minimum_balance_usd: f64,

    /// Maximum composite risk score before trading halts
    pub max_risk_score: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            max_daily_loss_usd: 25.0,
            minimum_balance_usd: 50.0,
            max_risk_score: 70.0,
        }
    }
}

/// Computes portfolio risk metrics and the trading gate decision
///
/// Stateless across cycles except for the rolling equity history backing
/// drawdown and daily-loss tracking.
pub struct RiskEngine {
    config: RiskEngineConfig,
    thresholds: RiskThresholds,
    equity: RwLock<EquityWindow>,
}

impl RiskEngine {
    pub fn new(config: RiskEngineConfig, thresholds: RiskThresholds) -> Self {
        let equity_window = EquityWindow::new(config.equity_window);
        Self {
            config,
            thresholds,
            equity: RwLock::new(equity_window),
        }
    }

    pub fn config(&self) -> &RiskEngineConfig {
        &self.config
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    /// Record a portfolio equity observation for drawdown/loss tracking
    pub async fn record_equity(&self, equity: f64) {
        let mut window = self.equity.write().await;
        window.push(EquityPoint {
            timestamp: Utc::now(),
            equity,
        });
    }

    /// Assess the portfolio and produce a gate decision
    ///
    /// Malformed inputs are rejected before computation; short histories
    /// yield explicit insufficient-data states rather than zeros.
    pub async fn assess(
        &self,
        positions: &[PositionSnapshot],
    ) -> Result<RiskSnapshot, RiskError> {
        Self::validate(positions)?;

        let portfolio_value: f64 = positions.iter().map(|p| p.market_value).sum();
        let portfolio_returns = Self::portfolio_returns(positions);

        let volatility = self.annualized_volatility(&portfolio_returns);
        let (var_95, cvar_95) = self.var_cvar(&portfolio_returns, portfolio_value);
        let sharpe_ratio = self.sharpe(&portfolio_returns);

        let (max_drawdown, daily_loss_usd, balance) = {
            let window = self.equity.read().await;
            let max_drawdown = match window.max_drawdown_pct() {
                Some(value) => Estimate::Available { value },
                None => Estimate::InsufficientData {
                    required: 2,
                    available: window.len(),
                },
            };
            let daily_loss_usd = match window
                .loss_since(Duration::hours(self.config.loss_lookback_hours), Utc::now())
            {
                Some(value) => Estimate::Available { value },
                None => Estimate::InsufficientData {
                    required: 1,
                    available: 0,
                },
            };
            let balance = window.current_equity().unwrap_or(portfolio_value);
            (max_drawdown, daily_loss_usd, balance)
        };

        let correlation = correlation_matrix(positions, self.config.min_observations);
        let concentration = match &correlation {
            CorrelationOutcome::Computed { matrix } => ConcentrationOutcome::Computed {
                report: check_concentration(
                    positions,
                    matrix,
                    self.config.correlation_threshold,
                    self.config.max_correlated_exposure,
                ),
            },
            CorrelationOutcome::InsufficientData {
                positions: eligible,
                min_observations,
            } => ConcentrationOutcome::InsufficientData {
                positions: *eligible,
                min_observations: *min_observations,
            },
        };

        let risk_score = self.composite_score(&volatility, &correlation, &portfolio_returns);
        let gate = self.evaluate_gate(&risk_score, &daily_loss_usd, balance);

        if let Some(score) = risk_score.value() {
            info!(
                "risk assessment: value={:.2} score={:.1} trading_enabled={} breaches={}",
                portfolio_value,
                score,
                gate.trading_enabled,
                gate.breaches.len()
            );
        } else {
            info!(
                "risk assessment: value={:.2} score=unknown trading_enabled={}",
                portfolio_value, gate.trading_enabled
            );
        }

        Ok(RiskSnapshot {
            timestamp: Utc::now(),
            portfolio_value,
            volatility,
            var_95,
            cvar_95,
            sharpe_ratio,
            max_drawdown,
            daily_loss_usd,
            correlation,
            concentration,
            risk_score,
            gate,
        })
    }

    fn validate(positions: &[PositionSnapshot]) -> Result<(), RiskError> {
        let mut seen = HashSet::new();
        for position in positions {
            if position.token.trim().is_empty() {
                return Err(RiskError::InvalidPositions(
                    "position with empty token id".to_string(),
                ));
            }
            if !seen.insert(position.token.as_str()) {
                return Err(RiskError::InvalidPositions(format!(
                    "duplicate token id '{}'",
                    position.token
                )));
            }
            if position.market_value < 0.0 || !position.market_value.is_finite() {
                return Err(RiskError::InvalidPositions(format!(
                    "position '{}' has invalid market value {}",
                    position.token, position.market_value
                )));
            }
            if position.returns.iter().any(|r| !r.is_finite()) {
                return Err(RiskError::InvalidPositions(format!(
                    "position '{}' has non-finite returns",
                    position.token
                )));
            }
        }
        Ok(())
    }

    /// Value-weighted portfolio returns, tail-aligned across positions
    fn portfolio_returns(positions: &[PositionSnapshot]) -> Vec<f64> {
        let total: f64 = positions.iter().map(|p| p.market_value).sum();
        if total <= 0.0 || positions.is_empty() {
            return Vec::new();
        }

        let aligned = match positions.iter().map(|p| p.returns.len()).min() {
            Some(len) if len > 0 => len,
            _ => return Vec::new(),
        };

        (0..aligned)
            .map(|offset| {
                positions
                    .iter()
                    .map(|p| {
                        let weight = p.market_value / total;
                        let index = p.returns.len() - aligned + offset;
                        weight * p.returns[index]
                    })
                    .sum::<f64>()
            })
            .collect()
    }

    fn annualized_volatility(&self, returns: &[f64]) -> Estimate {
        let window = self.config.volatility_window;
        if returns.len() < window.max(2) {
            return Estimate::InsufficientData {
                required: window.max(2),
                available: returns.len(),
            };
        }

        let tail = &returns[returns.len() - window..];
        let volatility = sample_std_dev(tail) * (self.config.periods_per_year as f64).sqrt();
        Estimate::Available { value: volatility }
    }

    fn var_cvar(&self, returns: &[f64], portfolio_value: f64) -> (Estimate, Estimate) {
        let required = self.config.min_observations;
        if returns.len() < required {
            let insufficient = Estimate::InsufficientData {
                required,
                available: returns.len(),
            };
            return (insufficient.clone(), insufficient);
        }

        let mut sorted = returns.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let threshold = percentile(&sorted, 1.0 - self.config.confidence);
        let var = (-threshold).max(0.0) * portfolio_value;

        let tail: Vec<f64> = sorted.iter().copied().filter(|r| *r <= threshold).collect();
        let tail_mean = tail.iter().sum::<f64>() / tail.len() as f64;
        let cvar = (-tail_mean).max(0.0) * portfolio_value;

        debug!(
            "tail risk: threshold={:.6} var={:.2} cvar={:.2} (n={})",
            threshold,
            var,
            cvar,
            returns.len()
        );

        (
            Estimate::Available { value: var },
            Estimate::Available { value: cvar },
        )
    }

    fn sharpe(&self, returns: &[f64]) -> Estimate {
        if returns.len() < 2 {
            return Estimate::InsufficientData {
                required: 2,
                available: returns.len(),
            };
        }

        let periods = self.config.periods_per_year as f64;
        let period_rf = self.config.risk_free_rate / periods;
        let excess: Vec<f64> = returns.iter().map(|r| r - period_rf).collect();

        let std_dev = sample_std_dev(&excess);
        if std_dev == 0.0 {
            return Estimate::Available { value: 0.0 };
        }

        let mean = excess.iter().sum::<f64>() / excess.len() as f64;
        Estimate::Available {
            value: mean / std_dev * periods.sqrt(),
        }
    }

    /// Composite 0-100 risk score: 40% volatility, 30% correlation, 30%
    /// recent performance (losses only)
    fn composite_score(
        &self,
        volatility: &Estimate,
        correlation: &CorrelationOutcome,
        returns: &[f64],
    ) -> Estimate {
        let annualized = match volatility.value() {
            Some(value) => value,
            None => {
                return Estimate::InsufficientData {
                    required: self.config.volatility_window,
                    available: returns.len(),
                }
            }
        };

        let volatility_score =
            (annualized / self.config.max_volatility_norm).min(1.0) * SCORE_WEIGHT_VOLATILITY;

        // A portfolio without a computable matrix carries no correlation
        // component; a single position has nothing to correlate with
        let correlation_score = match correlation.matrix() {
            Some(matrix) => {
                let n = matrix.len();
                let mut sum = 0.0;
                let mut count = 0;
                for i in 0..n {
                    for j in (i + 1)..n {
                        sum += matrix.matrix[i][j].abs();
                        count += 1;
                    }
                }
                let avg = if count > 0 { sum / count as f64 } else { 0.0 };
                (avg / self.config.max_correlation_norm).min(1.0) * SCORE_WEIGHT_CORRELATION
            }
            None => 0.0,
        };

        let window = self.config.volatility_window.min(returns.len());
        let recent: f64 = returns[returns.len() - window..].iter().sum();
        let performance_score = if recent < 0.0 {
            (recent.abs() / self.config.max_loss_norm).min(1.0) * SCORE_WEIGHT_PERFORMANCE
        } else {
            0.0
        };

        Estimate::Available {
            value: (volatility_score + correlation_score + performance_score).min(100.0),
        }
    }

    fn evaluate_gate(
        &self,
        risk_score: &Estimate,
        daily_loss: &Estimate,
        balance: f64,
    ) -> GateDecision {
        let mut breaches = Vec::new();

        if let Some(loss) = daily_loss.value() {
            if loss > self.thresholds.max_daily_loss_usd {
                breaches.push(ThresholdBreach {
                    kind: BreachKind::DailyLoss,
                    description: format!(
                        "daily loss ${:.2} exceeds limit ${:.2}",
                        loss, self.thresholds.max_daily_loss_usd
                    ),
                    actual: loss,
                    limit: self.thresholds.max_daily_loss_usd,
                });
            }
        }

        if balance < self.thresholds.minimum_balance_usd {
            breaches.push(ThresholdBreach {
                kind: BreachKind::MinimumBalance,
                description: format!(
                    "balance ${:.2} below minimum ${:.2}",
                    balance, self.thresholds.minimum_balance_usd
                ),
                actual: balance,
                limit: self.thresholds.minimum_balance_usd,
            });
        }

        match risk_score.value() {
            Some(score) => {
                if score > self.thresholds.max_risk_score {
                    breaches.push(ThresholdBreach {
                        kind: BreachKind::RiskScore,
                        description: format!(
                            "risk score {:.1} exceeds limit {:.1}",
                            score, self.thresholds.max_risk_score
                        ),
                        actual: score,
                        limit: self.thresholds.max_risk_score,
                    });
                }
            }
            None => {
                // Unknown risk is not zero risk: keep trading off until the
                // score is computable
                warn!("composite risk score unavailable; trading disabled for this cycle");
                return GateDecision {
                    trading_enabled: false,
                    breaches,
                };
            }
        }

        for breach in &breaches {
            warn!("risk threshold breached: {}", breach.description);
        }

        GateDecision {
            trading_enabled: breaches.is_empty(),
            breaches,
        }
    }
}

/// Sample standard deviation (n-1 denominator)
fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
        / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Linear-interpolated percentile of an ascending-sorted series, q in [0, 1]
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let weight = rank - lo as f64;
        sorted[lo] * (1.0 - weight) + sorted[hi] * weight
    }
}

/// Critical-path work unit that produces the cycle's risk assessment
///
/// Fetches positions and equity from the provider, records equity for
/// drawdown tracking, and runs the engine.
pub struct RiskAssessmentUnit {
    id: String,
    engine: Arc<RiskEngine>,
    provider: Arc<dyn PositionProvider>,
}

impl RiskAssessmentUnit {
    pub fn new(engine: Arc<RiskEngine>, provider: Arc<dyn PositionProvider>) -> Self {
        Self {
            id: "portfolio-risk".to_string(),
            engine,
            provider,
        }
    }
}

#[async_trait]
impl WorkUnit for RiskAssessmentUnit {
    fn id(&self) -> &str {
        &self.id
    }

    fn capability(&self) -> Capability {
        Capability::Risk
    }

    async fn execute(&self, _ctx: &UnitContext) -> Result<UnitOutput, UnitError> {
        let positions = self
            .provider
            .positions()
            .await
            .map_err(|e| UnitError::Transient(e.to_string()))?;
        let equity = self
            .provider
            .portfolio_equity()
            .await
            .map_err(|e| UnitError::Transient(e.to_string()))?;

        self.engine.record_equity(equity).await;

        let snapshot = self.engine.assess(&positions).await.map_err(|e| match e {
            RiskError::InvalidPositions(_) => UnitError::Validation(e.to_string()),
            RiskError::Provider(_) => UnitError::Transient(e.to_string()),
        })?;

        Ok(UnitOutput::RiskAssessment(Box::new(snapshot)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> RiskEngine {
        RiskEngine::new(RiskEngineConfig::default(), RiskThresholds::default())
    }

    fn position(token: &str, value: f64, returns: Vec<f64>) -> PositionSnapshot {
        PositionSnapshot {
            token: token.to_string(),
            market_value: value,
            returns,
        }
    }

    /// Mixed series with both gains and losses
    fn noisy_returns(len: usize, scale: f64) -> Vec<f64> {
        (0..len)
            .map(|i| {
                let phase = (i % 7) as f64 - 3.0;
                scale * phase / 3.0
            })
            .collect()
    }

    #[tokio::test]
    async fn cvar_is_at_least_var() {
        let engine = engine();
        let positions = vec![
            position("SOL", 6_000.0, noisy_returns(60, 0.02)),
            position("BTC", 4_000.0, noisy_returns(60, 0.01)),
        ];

        let snapshot = engine.assess(&positions).await.unwrap();

        let var = snapshot.var_95.value().unwrap();
        let cvar = snapshot.cvar_95.value().unwrap();
        assert!(var > 0.0);
        assert!(cvar >= var, "cvar {cvar} < var {var}");
    }

    #[tokio::test]
    async fn short_history_yields_insufficient_data() {
        let engine = engine();
        let positions = vec![position("SOL", 6_000.0, noisy_returns(5, 0.02))];

        let snapshot = engine.assess(&positions).await.unwrap();

        assert!(!snapshot.volatility.is_available());
        assert!(!snapshot.var_95.is_available());
        assert!(!snapshot.risk_score.is_available());
        assert!(matches!(
            snapshot.correlation,
            CorrelationOutcome::InsufficientData { .. }
        ));
        // Unknown risk must not enable trading
        assert!(!snapshot.gate.trading_enabled);
    }

    #[tokio::test]
    async fn duplicate_tokens_are_rejected() {
        let engine = engine();
        let positions = vec![
            position("SOL", 6_000.0, noisy_returns(30, 0.02)),
            position("SOL", 4_000.0, noisy_returns(30, 0.02)),
        ];

        match engine.assess(&positions).await {
            Err(RiskError::InvalidPositions(message)) => {
                assert!(message.contains("duplicate"));
            }
            other => panic!("expected InvalidPositions, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn negative_market_value_is_rejected() {
        let engine = engine();
        let positions = vec![position("SOL", -1.0, noisy_returns(30, 0.02))];

        assert!(matches!(
            engine.assess(&positions).await,
            Err(RiskError::InvalidPositions(_))
        ));
    }

    #[tokio::test]
    async fn correlated_pair_flags_concentration() {
        let engine = engine();
        let base = noisy_returns(40, 0.02);
        let shadow: Vec<f64> = base.iter().map(|r| r * 0.95 + 0.0002).collect();
        let independent: Vec<f64> = (0..40)
            .map(|i| if i % 2 == 0 { 0.017 } else { -0.013 })
            .collect();

        let positions = vec![
            position("SOL", 4_000.0, base),
            position("BTC", 3_500.0, shadow),
            position("RAY", 2_500.0, independent),
        ];

        let snapshot = engine.assess(&positions).await.unwrap();
        let report = snapshot.concentration.report().expect("report");

        assert!(report.concentrated);
        let mut tokens = report.groups[0].tokens.clone();
        tokens.sort();
        assert_eq!(tokens, vec!["BTC", "SOL"]);
    }

    #[tokio::test]
    async fn daily_loss_breach_disables_trading() {
        let engine = engine();
        engine.record_equity(1_000.0).await;
        engine.record_equity(900.0).await;

        let positions = vec![
            position("SOL", 540.0, noisy_returns(40, 0.005)),
            position("RAY", 360.0, {
                (0..40)
                    .map(|i| if i % 2 == 0 { 0.004 } else { -0.003 })
                    .collect()
            }),
        ];

        let snapshot = engine.assess(&positions).await.unwrap();

        assert!((snapshot.daily_loss_usd.value().unwrap() - 100.0).abs() < 1e-9);
        assert!(!snapshot.gate.trading_enabled);
        assert!(snapshot
            .gate
            .breaches
            .iter()
            .any(|b| b.kind == BreachKind::DailyLoss));
    }

    #[tokio::test]
    async fn minimum_balance_breach_is_reported() {
        let engine = engine();
        engine.record_equity(40.0).await;

        let positions = vec![position("SOL", 40.0, noisy_returns(40, 0.001))];
        let snapshot = engine.assess(&positions).await.unwrap();

        assert!(snapshot
            .gate
            .breaches
            .iter()
            .any(|b| b.kind == BreachKind::MinimumBalance));
        assert!(!snapshot.gate.trading_enabled);
    }

    #[tokio::test]
    async fn calm_portfolio_clears_the_gate() {
        let engine = engine();
        engine.record_equity(10_000.0).await;
        engine.record_equity(10_005.0).await;

        let positions = vec![
            position("SOL", 5_000.0, noisy_returns(40, 0.001)),
            position("USDC-LP", 5_000.0, {
                (0..40)
                    .map(|i| if i % 3 == 0 { -0.0008 } else { 0.0011 })
                    .collect()
            }),
        ];

        let snapshot = engine.assess(&positions).await.unwrap();

        assert!(snapshot.gate.is_clear());
        assert!(snapshot.gate.trading_enabled);
        assert!(snapshot.risk_score.value().unwrap() < 70.0);
    }

    #[tokio::test]
    async fn high_volatility_raises_the_score() {
        let config = RiskEngineConfig {
            max_volatility_norm: 0.5,
            ..RiskEngineConfig::default()
        };
        let engine = RiskEngine::new(config, RiskThresholds::default());

        let calm = vec![position("SOL", 1_000.0, noisy_returns(40, 0.0005))];
        let wild = vec![position("SOL", 1_000.0, noisy_returns(40, 0.05))];

        let calm_score = engine
            .assess(&calm)
            .await
            .unwrap()
            .risk_score
            .value()
            .unwrap();
        let wild_score = engine
            .assess(&wild)
            .await
            .unwrap()
            .risk_score
            .value()
            .unwrap();

        assert!(wild_score > calm_score);
    }

    #[test]
    fn percentile_interpolates_between_order_statistics() {
        let sorted = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 1.0), 5.0);
        assert_eq!(percentile(&sorted, 0.5), 3.0);
        assert!((percentile(&sorted, 0.05) - 1.2).abs() < 1e-9);
    }
}
