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

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::risk_engine::PositionSnapshot;

/// Pairwise Pearson correlation matrix over held positions
///
/// Always symmetric with a unit diagonal; entries clamped to [-1, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    /// Tokens included in the matrix, in matrix order
    pub tokens: Vec<String>,

    /// Matrix data: [i][j] -> correlation between tokens i and j
    pub matrix: Vec<Vec<f64>>,

    /// Smallest number of overlapping observations used for any pair
    pub observations: usize,
}

impl CorrelationMatrix {
    /// Correlation between two tokens, if both are in the matrix
    pub fn get(&self, token_a: &str, token_b: &str) -> Option<f64> {
        let i = self.tokens.iter().position(|t| t == token_a)?;
        let j = self.tokens.iter().position(|t| t == token_b)?;
        Some(self.matrix[i][j])
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Correlation computation result
///
/// Insufficient input yields an explicit state instead of a zero-filled
/// matrix, so consumers can distinguish "unknown" from "uncorrelated".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CorrelationOutcome {
    Computed { matrix: CorrelationMatrix },
    InsufficientData {
        /// Positions with enough history to participate
        positions: usize,
        /// Observations required per series
        min_observations: usize,
    },
}

impl CorrelationOutcome {
    pub fn matrix(&self) -> Option<&CorrelationMatrix> {
        match self {
            CorrelationOutcome::Computed { matrix } => Some(matrix),
            CorrelationOutcome::InsufficientData { .. } => None,
        }
    }
}

/// A group of positions whose pairwise correlations exceed the threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedGroup {
    /// Tokens in the group
    pub tokens: Vec<String>,

    /// Combined market value of the group
    pub combined_value: f64,

    /// Group value as a fraction of total portfolio value
    pub exposure_fraction: f64,

    /// Strongest pairwise correlation inside the group
    pub max_pairwise_correlation: f64,
}

/// Portfolio concentration analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcentrationReport {
    /// Whether any correlated group breaches the exposure limit
    pub concentrated: bool,

    /// Correlated groups found, largest exposure first
    pub groups: Vec<CorrelatedGroup>,

    /// Fraction of the portfolio held in any correlated group
    pub correlated_exposure_fraction: f64,
}

/// Concentration analysis result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConcentrationOutcome {
    Computed { report: ConcentrationReport },
    InsufficientData {
        positions: usize,
        min_observations: usize,
    },
}

impl ConcentrationOutcome {
    pub fn report(&self) -> Option<&ConcentrationReport> {
        match self {
            ConcentrationOutcome::Computed { report } => Some(report),
            ConcentrationOutcome::InsufficientData { .. } => None,
        }
    }
}

/// Pearson correlation coefficient between two equally long series
pub fn pearson_correlation(series1: &[f64], series2: &[f64]) -> f64 {
    if series1.len() != series2.len() || series1.is_empty() {
        return 0.0;
    }

    let n = series1.len() as f64;
    let mean1: f64 = series1.iter().sum::<f64>() / n;
    let mean2: f64 = series2.iter().sum::<f64>() / n;

    let variance1: f64 = series1.iter().map(|&x| (x - mean1).powi(2)).sum::<f64>() / n;
    let variance2: f64 = series2.iter().map(|&x| (x - mean2).powi(2)).sum::<f64>() / n;

    if variance1 <= 0.0 || variance2 <= 0.0 {
        return 0.0;
    }

    let covariance: f64 = series1
        .iter()
        .zip(series2.iter())
        .map(|(&x, &y)| (x - mean1) * (y - mean2))
        .sum::<f64>()
        / n;

    (covariance / (variance1.sqrt() * variance2.sqrt())).clamp(-1.0, 1.0)
}

/// Compute the pairwise correlation matrix for the given positions
///
/// Series are aligned on their most recent observations. Requires at least
/// two positions each carrying `min_observations` return points.
pub fn correlation_matrix(
    positions: &[PositionSnapshot],
    min_observations: usize,
) -> CorrelationOutcome {
    let eligible: Vec<&PositionSnapshot> = positions
        .iter()
        .filter(|p| p.returns.len() >= min_observations)
        .collect();

    if eligible.len() < 2 {
        debug!(
            "correlation skipped: {} of {} positions have >= {} observations",
            eligible.len(),
            positions.len(),
            min_observations
        );
        return CorrelationOutcome::InsufficientData {
            positions: eligible.len(),
            min_observations,
        };
    }

    let n = eligible.len();
    let mut matrix = vec![vec![0.0; n]; n];
    let mut observations = usize::MAX;

    for i in 0..n {
        matrix[i][i] = 1.0;
    }

    for i in 0..n {
        for j in (i + 1)..n {
            let overlap = eligible[i].returns.len().min(eligible[j].returns.len());
            let series1 = &eligible[i].returns[eligible[i].returns.len() - overlap..];
            let series2 = &eligible[j].returns[eligible[j].returns.len() - overlap..];

            let correlation = pearson_correlation(series1, series2);
            matrix[i][j] = correlation;
            matrix[j][i] = correlation;
            observations = observations.min(overlap);
        }
    }

    CorrelationOutcome::Computed {
        matrix: CorrelationMatrix {
            tokens: eligible.iter().map(|p| p.token.clone()).collect(),
            matrix,
            observations,
        },
    }
}

/// Group positions by high pairwise correlation and flag over-exposure
///
/// Groups are connected components of the graph whose edges are pairs with
/// |correlation| >= `correlation_threshold`; the portfolio is concentrated
/// when any group's value fraction exceeds `max_correlated_exposure`.
pub fn check_concentration(
    positions: &[PositionSnapshot],
    matrix: &CorrelationMatrix,
    correlation_threshold: f64,
    max_correlated_exposure: f64,
) -> ConcentrationReport {
    let total_value: f64 = positions.iter().map(|p| p.market_value).sum();
    if total_value <= 0.0 || matrix.len() < 2 {
        return ConcentrationReport {
            concentrated: false,
            groups: Vec::new(),
            correlated_exposure_fraction: 0.0,
        };
    }

    let values: HashMap<&str, f64> = positions
        .iter()
        .map(|p| (p.token.as_str(), p.market_value))
        .collect();

    let n = matrix.len();
    let mut component = vec![usize::MAX; n];
    let mut next_component = 0;

    for start in 0..n {
        if component[start] != usize::MAX {
            continue;
        }
        let mut stack = vec![start];
        component[start] = next_component;
        while let Some(i) = stack.pop() {
            for j in 0..n {
                if component[j] == usize::MAX
                    && matrix.matrix[i][j].abs() >= correlation_threshold
                {
                    component[j] = next_component;
                    stack.push(j);
                }
            }
        }
        next_component += 1;
    }

    let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
    for (index, id) in component.iter().enumerate() {
        members.entry(*id).or_default().push(index);
    }

    let mut groups = Vec::new();
    let mut correlated_value = 0.0;

    for indices in members.values() {
        if indices.len() < 2 {
            continue;
        }

        let tokens: Vec<String> = indices.iter().map(|&i| matrix.tokens[i].clone()).collect();
        let combined_value: f64 = tokens
            .iter()
            .map(|t| values.get(t.as_str()).copied().unwrap_or(0.0))
            .sum();

        let mut max_pairwise = 0.0_f64;
        for (a, &i) in indices.iter().enumerate() {
            for &j in indices.iter().skip(a + 1) {
                max_pairwise = max_pairwise.max(matrix.matrix[i][j].abs());
            }
        }

        correlated_value += combined_value;
        groups.push(CorrelatedGroup {
            tokens,
            combined_value,
            exposure_fraction: combined_value / total_value,
            max_pairwise_correlation: max_pairwise,
        });
    }

    groups.sort_by(|a, b| {
        b.exposure_fraction
            .partial_cmp(&a.exposure_fraction)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let concentrated = groups
        .iter()
        .any(|g| g.exposure_fraction > max_correlated_exposure);

    ConcentrationReport {
        concentrated,
        groups,
        correlated_exposure_fraction: correlated_value / total_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(token: &str, value: f64, returns: Vec<f64>) -> PositionSnapshot {
        PositionSnapshot {
            token: token.to_string(),
            market_value: value,
            returns,
        }
    }

    fn trending(len: usize, slope: f64) -> Vec<f64> {
        (0..len).map(|i| slope * (i as f64 % 5.0 - 2.0)).collect()
    }

    #[test]
    fn pearson_detects_perfect_correlation() {
        let series1 = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let series2 = vec![2.0, 4.0, 6.0, 8.0, 10.0];
        assert!((pearson_correlation(&series1, &series2) - 1.0).abs() < 1e-9);

        let series3 = vec![5.0, 4.0, 3.0, 2.0, 1.0];
        assert!((pearson_correlation(&series1, &series3) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn pearson_is_zero_for_flat_series() {
        let series1 = vec![1.0, 1.0, 1.0, 1.0];
        let series2 = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(pearson_correlation(&series1, &series2), 0.0);
    }

    #[test]
    fn matrix_is_symmetric_with_unit_diagonal() {
        let positions = vec![
            position("SOL", 4_000.0, trending(30, 0.01)),
            position("BTC", 3_500.0, trending(30, 0.02)),
            position("ETH", 2_500.0, trending(30, -0.015)),
        ];

        let matrix = match correlation_matrix(&positions, 20) {
            CorrelationOutcome::Computed { matrix } => matrix,
            other => panic!("expected matrix, got {other:?}"),
        };

        assert_eq!(matrix.len(), 3);
        for i in 0..3 {
            assert!((matrix.matrix[i][i] - 1.0).abs() < 1e-12);
            for j in 0..3 {
                assert_eq!(matrix.matrix[i][j], matrix.matrix[j][i]);
                assert!(matrix.matrix[i][j] >= -1.0 && matrix.matrix[i][j] <= 1.0);
            }
        }
    }

    #[test]
    fn single_position_reports_insufficient_data() {
        let positions = vec![position("SOL", 4_000.0, trending(30, 0.01))];

        match correlation_matrix(&positions, 20) {
            CorrelationOutcome::InsufficientData {
                positions: eligible,
                min_observations,
            } => {
                assert_eq!(eligible, 1);
                assert_eq!(min_observations, 20);
            }
            other => panic!("expected insufficient data, got {other:?}"),
        }
    }

    #[test]
    fn short_history_reports_insufficient_data() {
        let positions = vec![
            position("SOL", 4_000.0, trending(5, 0.01)),
            position("BTC", 3_500.0, trending(5, 0.02)),
        ];

        assert!(matches!(
            correlation_matrix(&positions, 20),
            CorrelationOutcome::InsufficientData { positions: 0, .. }
        ));
    }

    #[test]
    fn concentrated_pair_is_flagged_with_its_group() {
        // SOL and BTC move together; RAY is independent
        let sol_returns: Vec<f64> = trending(40, 0.01);
        let btc_returns: Vec<f64> = sol_returns.iter().map(|r| r * 0.9 + 0.0001).collect();
        let ray_returns: Vec<f64> = (0..40)
            .map(|i| if i % 2 == 0 { 0.013 } else { -0.011 })
            .collect();

        let positions = vec![
            position("SOL", 4_000.0, sol_returns),
            position("BTC", 3_500.0, btc_returns),
            position("RAY", 2_500.0, ray_returns),
        ];

        let matrix = match correlation_matrix(&positions, 20) {
            CorrelationOutcome::Computed { matrix } => matrix,
            other => panic!("expected matrix, got {other:?}"),
        };
        assert!(matrix.get("SOL", "BTC").unwrap() > 0.70);

        let report = check_concentration(&positions, &matrix, 0.70, 0.40);

        assert!(report.concentrated);
        assert_eq!(report.groups.len(), 1);
        let group = &report.groups[0];
        let mut tokens = group.tokens.clone();
        tokens.sort();
        assert_eq!(tokens, vec!["BTC", "SOL"]);
        assert!((group.exposure_fraction - 0.75).abs() < 1e-9);
    }

    #[test]
    fn uncorrelated_portfolio_is_not_concentrated() {
        let a: Vec<f64> = (0..40)
            .map(|i| if i % 2 == 0 { 0.01 } else { -0.012 })
            .collect();
        let b: Vec<f64> = (0..40)
            .map(|i| if i % 3 == 0 { -0.009 } else { 0.004 })
            .collect();

        let positions = vec![
            position("SOL", 5_000.0, a),
            position("BTC", 5_000.0, b),
        ];

        let matrix = match correlation_matrix(&positions, 20) {
            CorrelationOutcome::Computed { matrix } => matrix,
            other => panic!("expected matrix, got {other:?}"),
        };

        assert!(matrix.get("SOL", "BTC").unwrap().abs() < 0.70);

        let report = check_concentration(&positions, &matrix, 0.70, 0.40);
        assert!(!report.concentrated);
        assert!(report.groups.is_empty());
        assert_eq!(report.correlated_exposure_fraction, 0.0);
    }
}
