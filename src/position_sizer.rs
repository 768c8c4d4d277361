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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Position sizing errors
#[derive(Debug, Error)]
pub enum SizingError {
    #[error("non-positive portfolio value: {0}")]
    InvalidPortfolioValue(f64),

    #[error("non-positive asset volatility: {0}")]
    InvalidVolatility(f64),

    #[error("invalid win statistics: {0}")]
    InvalidWinStatistics(String),
}

/// Position sizing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizerConfig {
    /// Target portfolio volatility per period (e.g. 0.02 = 2% daily)
    pub target_volatility: f64,

    /// Fraction of full Kelly to apply (e.g. 0.25 for quarter Kelly)
    pub kelly_fraction: f64,

    /// Risk budget allocated to each position for risk parity sizing
    pub risk_budget_per_position: f64,

    /// Hard cap on any position as a fraction of portfolio value
    pub max_position_fraction: f64,

    /// Floor on volatility-targeted positions as a fraction of portfolio value
    pub min_position_fraction: f64,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            target_volatility: 0.02,
            kelly_fraction: 0.25,
            risk_budget_per_position: 0.10,
            max_position_fraction: 0.20,
            min_position_fraction: 0.01,
        }
    }
}

impl SizerConfig {
    fn cap(&self, portfolio_value: f64, size: f64) -> f64 {
        size.min(portfolio_value * self.max_position_fraction)
    }
}

/// Volatility-targeted position size in USD
///
/// `portfolio_value * target_volatility / asset_volatility`, floored at the
/// minimum fraction and capped at the maximum fraction of portfolio value.
pub fn volatility_target_size(
    portfolio_value: f64,
    asset_volatility: f64,
    config: &SizerConfig,
) -> Result<f64, SizingError> {
    if portfolio_value <= 0.0 {
        return Err(SizingError::InvalidPortfolioValue(portfolio_value));
    }
    if asset_volatility <= 0.0 || !asset_volatility.is_finite() {
        return Err(SizingError::InvalidVolatility(asset_volatility));
    }

    let raw = portfolio_value * config.target_volatility / asset_volatility;
    let size = config
        .cap(portfolio_value, raw)
        .max(portfolio_value * config.min_position_fraction);

    debug!(
        "volatility-target size: raw={:.2} sized={:.2} (vol={:.4})",
        raw, size, asset_volatility
    );
    Ok(size)
}

/// Fractional-Kelly position size in USD
///
/// `portfolio_value * kelly_fraction * ((win_rate*avg_win - loss_rate*avg_loss) / avg_win)`,
/// floored at zero when the edge is negative and capped at the maximum
/// fraction of portfolio value.
pub fn kelly_size(
    portfolio_value: f64,
    win_rate: f64,
    avg_win: f64,
    avg_loss: f64,
    config: &SizerConfig,
) -> Result<f64, SizingError> {
    if portfolio_value <= 0.0 {
        return Err(SizingError::InvalidPortfolioValue(portfolio_value));
    }
    if !(0.0..=1.0).contains(&win_rate) {
        return Err(SizingError::InvalidWinStatistics(format!(
            "win rate {win_rate} outside [0, 1]"
        )));
    }
    if avg_win <= 0.0 || avg_loss <= 0.0 {
        return Err(SizingError::InvalidWinStatistics(format!(
            "average win {avg_win} and loss {avg_loss} must be positive"
        )));
    }

    let loss_rate = 1.0 - win_rate;
    let edge = (win_rate * avg_win - loss_rate * avg_loss) / avg_win;
    let raw = portfolio_value * config.kelly_fraction * edge.max(0.0);

    Ok(config.cap(portfolio_value, raw))
}

/// Risk-parity position size in USD
///
/// `portfolio_value * risk_budget_per_position / asset_volatility`, capped at
/// the maximum fraction of portfolio value.
pub fn risk_parity_size(
    portfolio_value: f64,
    asset_volatility: f64,
    config: &SizerConfig,
) -> Result<f64, SizingError> {
    if portfolio_value <= 0.0 {
        return Err(SizingError::InvalidPortfolioValue(portfolio_value));
    }
    if asset_volatility <= 0.0 || !asset_volatility.is_finite() {
        return Err(SizingError::InvalidVolatility(asset_volatility));
    }

    let raw = portfolio_value * config.risk_budget_per_position / asset_volatility;
    Ok(config.cap(portfolio_value, raw))
}
