use analysis_core::{years_before, Horizon, HorizonMetrics, PerformanceMetrics, PriceSeries};
use chrono::NaiveDate;

use crate::time_series::{annualized_return, ar_mdd_ratio, drawdown_of};

/// Fewest points a drawdown window may contain
pub const MIN_DRAWDOWN_POINTS: usize = 30;
/// Fewest points in the whole series before any return is reported
pub const MIN_RETURN_POINTS: usize = 100;

/// Computes the 3/5/10-year return, drawdown and AR/MDD bundle for one symbol.
#[derive(Debug, Clone, Copy)]
pub struct PerformanceAnalyzer {
    pub min_drawdown_points: usize,
    pub min_return_points: usize,
}

impl PerformanceAnalyzer {
    pub fn new() -> Self {
        Self {
            min_drawdown_points: MIN_DRAWDOWN_POINTS,
            min_return_points: MIN_RETURN_POINTS,
        }
    }

    /// Whether `series` has enough points for any metric at all.
    pub fn is_sufficient(&self, series: &PriceSeries) -> bool {
        series.len() >= self.min_drawdown_points
    }

    /// Only points on or before `as_of` are used. A horizon's drawdown is
    /// reported only when the series reaches back to the start of its window.
    pub fn analyze(&self, series: &PriceSeries, as_of: NaiveDate) -> PerformanceMetrics {
        let series = series.up_to(as_of);
        let mut metrics = PerformanceMetrics::default();
        if !self.is_sufficient(&series) {
            return metrics;
        }

        for horizon in Horizon::ALL {
            metrics.set_horizon(horizon, self.analyze_horizon(&series, horizon, as_of));
        }
        metrics
    }

    fn analyze_horizon(&self, series: &PriceSeries, horizon: Horizon, as_of: NaiveDate) -> HorizonMetrics {
        let Some(window_start) = years_before(as_of, horizon.years()) else {
            return HorizonMetrics::default();
        };
        let covered = series.first().is_some_and(|p| p.date <= window_start);

        let annualized_return = if series.len() >= self.min_return_points {
            annualized_return(series, horizon.years(), as_of)
        } else {
            None
        };

        let window = series.since(window_start);
        let max_drawdown = (covered && window.len() >= self.min_drawdown_points).then(|| drawdown_of(window));

        let ar_mdd_ratio = match (annualized_return, max_drawdown) {
            (Some(r), Some(dd)) => ar_mdd_ratio(r, dd),
            _ => None,
        };

        HorizonMetrics { annualized_return, max_drawdown, ar_mdd_ratio }
    }
}

impl Default for PerformanceAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
