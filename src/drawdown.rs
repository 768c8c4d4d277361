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

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One observation of portfolio equity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    /// Observation time
    pub timestamp: DateTime<Utc>,

    /// Portfolio equity in USD
    pub equity: f64,
}

/// Rolling window of equity observations for drawdown and loss tracking
///
/// The only risk state carried across cycles; everything else is recomputed
/// fresh from position inputs.
#[derive(Debug, Clone)]
pub struct EquityWindow {
    max_points: usize,
    points: VecDeque<EquityPoint>,
    peak_equity: f64,
}

impl EquityWindow {
    pub fn new(max_points: usize) -> Self {
        Self {
            max_points,
            points: VecDeque::with_capacity(max_points),
            peak_equity: 0.0,
        }
    }

    /// Record an equity observation
    pub fn push(&mut self, point: EquityPoint) {
        if point.equity > self.peak_equity {
            self.peak_equity = point.equity;
        }

        self.points.push_back(point);

        if self.points.len() > self.max_points {
            self.points.pop_front();

            // Recompute the peak if the evicted point held it
            if self.points.iter().all(|p| p.equity < self.peak_equity) {
                self.peak_equity = self
                    .points
                    .iter()
                    .map(|p| p.equity)
                    .fold(0.0, f64::max);
            }
        }
    }

    /// Most recent equity observation
    pub fn current_equity(&self) -> Option<f64> {
        self.points.back().map(|p| p.equity)
    }

    /// Peak equity seen inside the window
    pub fn peak_equity(&self) -> f64 {
        self.peak_equity
    }

    /// Drawdown from the window peak to the latest observation (0.0-1.0)
    pub fn current_drawdown_pct(&self) -> f64 {
        if self.points.is_empty() || self.peak_equity <= 0.0 {
            return 0.0;
        }
        let current = self.points.back().map(|p| p.equity).unwrap_or(0.0);
        ((self.peak_equity - current) / self.peak_equity).max(0.0)
    }

    /// Deepest peak-to-trough drawdown inside the window (0.0-1.0)
    pub fn max_drawdown_pct(&self) -> Option<f64> {
        if self.points.len() < 2 {
            return None;
        }

        let mut running_peak = f64::MIN;
        let mut max_drawdown = 0.0_f64;

        for point in &self.points {
            running_peak = running_peak.max(point.equity);
            if running_peak > 0.0 {
                let drawdown = (running_peak - point.equity) / running_peak;
                max_drawdown = max_drawdown.max(drawdown);
            }
        }

        Some(max_drawdown)
    }

    /// Loss in USD since the start of the lookback period
    ///
    /// Positive values are losses. The reference point is the most recent
    /// observation at or before the lookback start, falling back to the
    /// oldest observation when history is shorter than the lookback.
    pub fn loss_since(&self, lookback: Duration, now: DateTime<Utc>) -> Option<f64> {
        let current = self.points.back()?;
        let cutoff = now - lookback;

        let reference = self
            .points
            .iter()
            .rev()
            .find(|p| p.timestamp <= cutoff)
            .or_else(|| self.points.front())?;

        Some(reference.equity - current.equity)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_from(equities: &[f64]) -> EquityWindow {
        let mut window = EquityWindow::new(100);
        let start = Utc::now();
        for (i, &equity) in equities.iter().enumerate() {
            window.push(EquityPoint {
                timestamp: start + Duration::minutes(i as i64),
                equity,
            });
        }
        window
    }

    #[test]
    fn max_drawdown_finds_the_deepest_trough() {
        let window = window_from(&[100.0, 120.0, 90.0, 110.0, 80.0, 95.0]);

        // Peak 120 -> trough 80 = 33.3%
        let max_dd = window.max_drawdown_pct().unwrap();
        assert!((max_dd - (120.0 - 80.0) / 120.0).abs() < 1e-9);
    }

    #[test]
    fn drawdown_is_zero_on_new_highs() {
        let window = window_from(&[100.0, 105.0, 110.0, 120.0]);
        assert_eq!(window.current_drawdown_pct(), 0.0);
        assert_eq!(window.max_drawdown_pct().unwrap(), 0.0);
    }

    #[test]
    fn peak_recomputes_after_eviction() {
        let mut window = EquityWindow::new(3);
        let start = Utc::now();
        for (i, equity) in [200.0, 100.0, 110.0, 105.0].iter().enumerate() {
            window.push(EquityPoint {
                timestamp: start + Duration::minutes(i as i64),
                equity: *equity,
            });
        }

        // The 200.0 peak fell out of the window
        assert_eq!(window.len(), 3);
        assert!((window.peak_equity() - 110.0).abs() < 1e-9);
    }

    #[test]
    fn loss_since_uses_the_lookback_reference() {
        let mut window = EquityWindow::new(100);
        let start = Utc::now() - Duration::hours(30);
        for i in 0..30 {
            window.push(EquityPoint {
                timestamp: start + Duration::hours(i),
                equity: 1_000.0 - i as f64 * 10.0,
            });
        }

        let now = start + Duration::hours(29);
        // Reference is the observation 24h before the latest point
        let loss = window.loss_since(Duration::hours(24), now).unwrap();
        assert!((loss - 240.0).abs() < 1e-9);
    }

    #[test]
    fn loss_since_falls_back_to_oldest_point() {
        let window = window_from(&[500.0, 480.0]);
        let loss = window
            .loss_since(Duration::hours(24), Utc::now())
            .unwrap();
        assert!((loss - 20.0).abs() < 1e-9);
    }

    #[test]
    fn empty_window_has_no_metrics() {
        let window = EquityWindow::new(10);
        assert!(window.current_equity().is_none());
        assert!(window.max_drawdown_pct().is_none());
        assert!(window.loss_since(Duration::hours(24), Utc::now()).is_none());
    }
}
