use analysis_core::ValuationAssumptions;

/// Breakdown of one forward DCF run. All values in the cash-flow currency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DcfProjection {
    /// Sum of the discounted yearly cash flows
    pub discounted_cash_flows: f64,
    pub discounted_terminal_value: f64,
    pub enterprise_value: f64,
}

/// Projects `latest_fcf` forward at `growth_rate` for the configured number of
/// years, discounts each year and adds a discounted perpetuity terminal value.
///
/// `growth_rate` is used as given; callers clamp it first. Returns `None` when
/// the base cash flow is not strictly positive, when the assumptions cannot
/// produce a terminal value, or when the arithmetic overflows.
pub fn project(latest_fcf: f64, growth_rate: f64, assumptions: &ValuationAssumptions) -> Option<DcfProjection> {
    if !(latest_fcf.is_finite() && latest_fcf > 0.0) || !growth_rate.is_finite() || growth_rate <= -1.0 {
        return None;
    }
    if !assumptions.is_computable() {
        return None;
    }

    let r = assumptions.discount_rate;
    let tg = assumptions.terminal_growth_rate;
    let years = assumptions.projection_years as i32;

    let mut discounted_cash_flows = 0.0;
    let mut projected = latest_fcf;
    for t in 1..=years {
        projected = latest_fcf * (1.0 + growth_rate).powi(t);
        discounted_cash_flows += projected / (1.0 + r).powi(t);
    }

    let terminal_value = projected * (1.0 + tg) / (r - tg);
    let discounted_terminal_value = terminal_value / (1.0 + r).powi(years);
    let enterprise_value = discounted_cash_flows + discounted_terminal_value;

    enterprise_value.is_finite().then_some(DcfProjection {
        discounted_cash_flows,
        discounted_terminal_value,
        enterprise_value,
    })
}

/// Enterprise value only. See [`project`].
pub fn enterprise_value(latest_fcf: f64, growth_rate: f64, assumptions: &ValuationAssumptions) -> Option<f64> {
    project(latest_fcf, growth_rate, assumptions).map(|p| p.enterprise_value)
}
