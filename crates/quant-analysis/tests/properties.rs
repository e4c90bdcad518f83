//! Property tests for the price-series metrics.
//!
//! 1. Drawdown is a percentage in [0, 100]
//! 2. Drawdown is zero exactly for non-decreasing series
//! 3. A flat series has a zero return over every covered horizon
//! 4. The ratio never leaks NaN or infinity

use analysis_core::{PricePoint, PriceSeries};
use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use quant_analysis::{annualized_return, ar_mdd_ratio, max_drawdown};

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2010, 1, 4).unwrap()
}

fn daily(prices: &[f64]) -> PriceSeries {
    PriceSeries::from_points(
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| PricePoint::new(start() + Duration::days(i as i64), p)),
    )
}

fn arb_prices() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.01..10_000.0_f64, 0..400)
}

proptest! {
    #[test]
    fn drawdown_is_bounded(prices in arb_prices()) {
        let dd = max_drawdown(&daily(&prices), None);
        prop_assert!(dd >= 0.0);
        prop_assert!(dd < 100.0);
    }

    #[test]
    fn drawdown_zero_iff_non_decreasing(prices in arb_prices()) {
        let series = daily(&prices);
        let non_decreasing = series.points().windows(2).all(|w| w[1].price() >= w[0].price());
        prop_assert_eq!(max_drawdown(&series, None) == 0.0, non_decreasing);
    }

    #[test]
    fn sorted_prices_have_no_drawdown(mut prices in arb_prices()) {
        prices.sort_by(|a, b| a.total_cmp(b));
        prop_assert_eq!(max_drawdown(&daily(&prices), None), 0.0);
    }

    #[test]
    fn flat_series_returns_zero(price in 0.5..5_000.0_f64, years in 1u32..=10) {
        let days = 366 * 11;
        let series = daily(&vec![price; days]);
        let as_of = start() + Duration::days(days as i64 - 1);
        prop_assert_eq!(annualized_return(&series, years, as_of), Some(0.0));
    }

    #[test]
    fn ratio_is_finite_or_absent(ret in -100.0..1_000.0_f64, dd in 0.0..100.0_f64) {
        match ar_mdd_ratio(ret, dd) {
            Some(r) => prop_assert!(r.is_finite()),
            None => prop_assert!(dd == 0.0 || !(ret / dd).is_finite()),
        }
    }
}
