use analysis_core::{ValuationAssumptions, IMPLIED_GROWTH_BRACKET};

use crate::dcf::enterprise_value;

pub const MAX_ITERATIONS: u32 = 100;
/// Convergence tolerance as a fraction of the target value
pub const RELATIVE_TOLERANCE: f64 = 1e-4;

/// Outcome of a reverse-DCF search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpliedGrowth {
    /// Growth rate as a fraction
    pub rate: f64,
    /// `false` when the iteration budget ran out or the target lies outside the
    /// bracket. `rate` is then the best estimate, not a verified root.
    pub converged: bool,
    pub iterations: u32,
}

/// Growth rate at which the forward DCF of `latest_fcf` reproduces
/// `target_value`, found by bisection over [`IMPLIED_GROWTH_BRACKET`].
///
/// Returns `None` for a non-positive target or cash flow, or assumptions the
/// DCF rejects. A target beyond what the bracket can reach yields that bracket
/// edge with `converged = false`.
pub fn solve(target_value: f64, latest_fcf: f64, assumptions: &ValuationAssumptions) -> Option<ImpliedGrowth> {
    if !(target_value.is_finite() && target_value > 0.0) {
        return None;
    }

    let (low, high) = IMPLIED_GROWTH_BRACKET;
    let tolerance = RELATIVE_TOLERANCE * target_value;

    let floor = enterprise_value(latest_fcf, low, assumptions)?;
    if floor - target_value > tolerance {
        return Some(ImpliedGrowth { rate: low, converged: false, iterations: 0 });
    }
    let ceiling = enterprise_value(latest_fcf, high, assumptions)?;
    if target_value - ceiling > tolerance {
        return Some(ImpliedGrowth { rate: high, converged: false, iterations: 0 });
    }

    bisect(target_value, tolerance, low, high, MAX_ITERATIONS, |g| {
        enterprise_value(latest_fcf, g, assumptions)
    })
}

/// Bisection on an increasing `value_at`. Without convergence, returns the
/// midpoint whose value came closest to `target_value`.
fn bisect(
    target_value: f64,
    tolerance: f64,
    mut low: f64,
    mut high: f64,
    max_iterations: u32,
    value_at: impl Fn(f64) -> Option<f64>,
) -> Option<ImpliedGrowth> {
    let mut best: Option<(f64, f64)> = None;
    for iteration in 1..=max_iterations {
        let mid = (low + high) / 2.0;
        let value = value_at(mid)?;
        let miss = (value - target_value).abs();

        if miss <= tolerance {
            return Some(ImpliedGrowth { rate: mid, converged: true, iterations: iteration });
        }
        if best.map_or(true, |(_, closest)| miss < closest) {
            best = Some((mid, miss));
        }
        if value > target_value {
            high = mid;
        } else {
            low = mid;
        }
    }

    let rate = best.map_or((low + high) / 2.0, |(mid, _)| mid);
    Some(ImpliedGrowth { rate, converged: false, iterations: max_iterations })
}

/// `1 - market / enterprise`, floored at -1. Both inputs must be finite and
/// strictly positive.
pub fn margin_of_safety(enterprise_value: f64, market_value: f64) -> Option<f64> {
    let positive = |v: f64| v.is_finite() && v > 0.0;
    if !positive(enterprise_value) || !positive(market_value) {
        return None;
    }
    Some((1.0 - market_value / enterprise_value).max(-1.0))
}
