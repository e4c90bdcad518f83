//! Pure price-series math: annualized return, max drawdown, AR/MDD ratio.
//! Stateless, no I/O. Results are percentages (12.34 = 12.34%) except the ratio.

use analysis_core::{years_before, PricePoint, PriceSeries};
use chrono::NaiveDate;

/// Annualized return over `horizon_years` ending at the latest price on or
/// before `as_of`.
///
/// The start price is the point nearest to `as_of - horizon_years` (ties go to
/// the earlier point). Returns `None` when the series does not reach back to
/// that date, when `horizon_years` is zero, or when a price is not positive.
pub fn annualized_return(series: &PriceSeries, horizon_years: u32, as_of: NaiveDate) -> Option<f64> {
    if horizon_years == 0 {
        return None;
    }

    let points = &series.points()[..series.points().partition_point(|p| p.date <= as_of)];
    let end = points.last()?;
    let target = years_before(as_of, horizon_years)?;

    // No silent fallback to the oldest point
    if points.first()?.date > target {
        return None;
    }

    let start = nearest_to(points, target)?;
    let (start_price, end_price) = (start.price(), end.price());
    if !(start_price > 0.0 && end_price > 0.0) {
        return None;
    }

    let growth = (end_price / start_price).powf(1.0 / horizon_years as f64) - 1.0;
    let pct = growth * 100.0;
    pct.is_finite().then_some(pct)
}

fn nearest_to(points: &[PricePoint], target: NaiveDate) -> Option<&PricePoint> {
    let mut best: Option<(&PricePoint, i64)> = None;
    for point in points {
        let distance = (point.date - target).num_days().abs();
        match best {
            Some((_, d)) if distance >= d => {}
            _ => best = Some((point, distance)),
        }
    }
    best.map(|(p, _)| p)
}

/// Largest peak-to-trough decline, optionally limited to the trailing
/// `window_years` before the series' last point. Non-negative percentage;
/// zero for fewer than two points.
pub fn max_drawdown(series: &PriceSeries, window_years: Option<u32>) -> f64 {
    let points = match (window_years, series.last()) {
        (Some(years), Some(last)) => match years_before(last.date, years) {
            Some(start) => series.since(start),
            None => series.points(),
        },
        _ => series.points(),
    };
    drawdown_of(points)
}

/// Max drawdown of already-ordered points, in percent.
pub(crate) fn drawdown_of(points: &[PricePoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    let mut peak = points[0].price();
    let mut max_dd = 0.0_f64;
    for point in points {
        let price = point.price();
        if price > peak {
            peak = price;
        }
        if peak > 0.0 {
            let dd = (peak - price) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }

    max_dd * 100.0
}

/// Annualized return divided by max drawdown. `None` unless the drawdown is
/// strictly positive, so no infinity or NaN can leak out.
pub fn ar_mdd_ratio(annualized_return: f64, max_drawdown: f64) -> Option<f64> {
    if !(max_drawdown > 0.0) || !annualized_return.is_finite() {
        return None;
    }
    let ratio = annualized_return / max_drawdown;
    ratio.is_finite().then_some(ratio)
}
