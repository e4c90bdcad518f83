use analysis_core::{CashFlowHistory, ValuationAssumptions, ValuationResult};

use crate::dcf::enterprise_value;
use crate::implied_growth::{margin_of_safety, solve};

/// Runs forward DCF, margin of safety and reverse DCF for one symbol under a
/// fixed set of assumptions.
#[derive(Debug, Clone, Copy)]
pub struct ValuationEngine {
    assumptions: ValuationAssumptions,
}

impl ValuationEngine {
    pub fn new(assumptions: ValuationAssumptions) -> Self {
        Self { assumptions }
    }

    pub fn assumptions(&self) -> &ValuationAssumptions {
        &self.assumptions
    }

    /// Forward growth: historical FCF CAGR when defined, the configured default
    /// otherwise, clamped either way.
    pub fn growth_estimate(&self, history: &CashFlowHistory) -> Option<f64> {
        let a = &self.assumptions;
        if !(a.growth_clamp_min.is_finite() && a.growth_clamp_max.is_finite()) || a.growth_clamp_min > a.growth_clamp_max {
            return None;
        }
        let raw = history
            .historical_growth(a.growth_lookback_years)
            .unwrap_or(a.default_growth_rate);
        raw.is_finite().then(|| a.clamp_growth(raw))
    }

    /// Each output is computed independently. A missing market value still
    /// yields an enterprise value; a non-positive latest FCF yields nothing.
    pub fn evaluate(&self, history: &CashFlowHistory, market_value: Option<f64>) -> ValuationResult {
        let mut result = ValuationResult::default();

        let Some(latest_fcf) = history.latest_fcf().filter(|fcf| *fcf > 0.0) else {
            return result;
        };
        if !self.assumptions.is_computable() {
            return result;
        }

        if let Some(growth) = self.growth_estimate(history) {
            result.growth_rate_used = Some(growth);
            result.enterprise_value = enterprise_value(latest_fcf, growth, &self.assumptions);
        }

        let market_value = market_value.filter(|v| v.is_finite() && *v > 0.0);
        if let (Some(ev), Some(mv)) = (result.enterprise_value, market_value) {
            result.margin_of_safety = margin_of_safety(ev, mv);
        }
        if let Some(implied) = market_value.and_then(|mv| solve(mv, latest_fcf, &self.assumptions)) {
            result.implied_growth_rate = Some(implied.rate);
            result.implied_growth_converged = Some(implied.converged);
        }

        result
    }
}

impl Default for ValuationEngine {
    fn default() -> Self {
        Self::new(ValuationAssumptions::default())
    }
}
