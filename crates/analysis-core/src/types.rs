use std::collections::BTreeMap;

use chrono::{Months, NaiveDate};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::AnalysisError;

/// Growth-rate bracket searched by the implied growth solver.
pub const IMPLIED_GROWTH_BRACKET: (f64, f64) = (-0.50, 1.00);

/// One daily close
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
    #[serde(default)]
    pub adjusted_close: Option<f64>,
}

impl PricePoint {
    pub fn new(date: NaiveDate, close: f64) -> Self {
        Self { date, close, adjusted_close: None }
    }

    /// Adjusted close when the provider supplied one, raw close otherwise.
    pub fn price(&self) -> f64 {
        self.adjusted_close.unwrap_or(self.close)
    }
}

/// Price points with unique dates in ascending order.
///
/// The only way to build one is [`PriceSeries::from_points`], so every
/// analyzer can rely on the ordering without re-checking it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriceSeries {
    points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Drops points with a non-finite or non-positive price, sorts by date and
    /// collapses duplicate dates (the last one supplied wins).
    pub fn from_points(points: impl IntoIterator<Item = PricePoint>) -> Self {
        let mut by_date: BTreeMap<NaiveDate, PricePoint> = BTreeMap::new();
        for point in points {
            let price = point.price();
            if price.is_finite() && price > 0.0 {
                by_date.insert(point.date, point);
            }
        }
        Self { points: by_date.into_values().collect() }
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&PricePoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    /// Points dated on or before `as_of`.
    pub fn up_to(&self, as_of: NaiveDate) -> PriceSeries {
        let end = self.points.partition_point(|p| p.date <= as_of);
        Self { points: self.points[..end].to_vec() }
    }

    /// Points dated on or after `start`.
    pub fn since(&self, start: NaiveDate) -> &[PricePoint] {
        let begin = self.points.partition_point(|p| p.date < start);
        &self.points[begin..]
    }
}

/// `date` minus whole calendar years, clamped to the end of the month.
pub fn years_before(date: NaiveDate, years: u32) -> Option<NaiveDate> {
    date.checked_sub_months(Months::new(years.checked_mul(12)?))
}

/// Free cash flow for one fiscal year. May be negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CashFlowRecord {
    pub fiscal_year: i32,
    pub free_cash_flow: f64,
}

/// Annual free cash flow, latest fiscal year first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CashFlowHistory {
    records: Vec<CashFlowRecord>,
}

impl CashFlowHistory {
    /// Accepts records in any order. Non-finite values are dropped and each
    /// fiscal year is kept once (the last one supplied wins).
    pub fn normalize(records: impl IntoIterator<Item = CashFlowRecord>) -> Self {
        let mut by_year: BTreeMap<i32, CashFlowRecord> = BTreeMap::new();
        for record in records {
            if record.free_cash_flow.is_finite() {
                by_year.insert(record.fiscal_year, record);
            }
        }
        Self { records: by_year.into_values().rev().collect() }
    }

    pub fn records(&self) -> &[CashFlowRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn latest(&self) -> Option<&CashFlowRecord> {
        self.records.first()
    }

    pub fn latest_fcf(&self) -> Option<f64> {
        self.latest().map(|r| r.free_cash_flow)
    }

    /// Compound annual growth between the latest record and the oldest record
    /// at most `lookback_years` fiscal years earlier.
    ///
    /// Defined only when both endpoints are strictly positive and at least one
    /// fiscal year apart.
    pub fn historical_growth(&self, lookback_years: u32) -> Option<f64> {
        let latest = self.latest()?;
        let earliest_year = latest.fiscal_year - lookback_years as i32;
        let oldest = self
            .records
            .iter()
            .filter(|r| r.fiscal_year >= earliest_year)
            .last()?;

        let years = latest.fiscal_year - oldest.fiscal_year;
        if years < 1 || latest.free_cash_flow <= 0.0 || oldest.free_cash_flow <= 0.0 {
            return None;
        }

        let growth = (latest.free_cash_flow / oldest.free_cash_flow).powf(1.0 / years as f64) - 1.0;
        growth.is_finite().then_some(growth)
    }
}

/// Current market quote for a symbol
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketValue {
    pub price: Option<f64>,
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub shares_outstanding: Option<f64>,
}

impl MarketValue {
    /// Market capitalization, or price × shares when the provider has no cap.
    pub fn value(&self) -> Option<f64> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        match self.market_cap {
            Some(cap) if positive(cap) => Some(cap),
            _ => match (self.price, self.shares_outstanding) {
                (Some(price), Some(shares)) if positive(price) && positive(shares) => {
                    Some(price * shares).filter(|v| positive(*v))
                }
                _ => None,
            },
        }
    }
}

/// DCF assumptions, fixed for a whole run. Rates are fractions (0.10 = 10%).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValuationAssumptions {
    pub discount_rate: f64,
    pub terminal_growth_rate: f64,
    pub projection_years: u32,
    pub growth_clamp_min: f64,
    pub growth_clamp_max: f64,
    /// Used when the cash-flow history gives no growth estimate.
    pub default_growth_rate: f64,
    /// How many fiscal years back the historical growth estimate may reach.
    pub growth_lookback_years: u32,
}

impl Default for ValuationAssumptions {
    fn default() -> Self {
        Self {
            discount_rate: 0.10,
            terminal_growth_rate: 0.025,
            projection_years: 10,
            growth_clamp_min: -0.05,
            growth_clamp_max: 0.25,
            default_growth_rate: 0.03,
            growth_lookback_years: 5,
        }
    }
}

impl ValuationAssumptions {
    /// Terminal value is only defined for a finite positive discount rate that
    /// exceeds the terminal growth rate.
    pub fn is_computable(&self) -> bool {
        self.discount_rate.is_finite()
            && self.terminal_growth_rate.is_finite()
            && self.discount_rate > 0.0
            && self.discount_rate > self.terminal_growth_rate
            && self.projection_years >= 1
    }

    pub fn clamp_growth(&self, growth: f64) -> f64 {
        growth.clamp(self.growth_clamp_min, self.growth_clamp_max)
    }

    /// Startup check for statically configured assumptions.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        let all_finite = [
            self.discount_rate,
            self.terminal_growth_rate,
            self.growth_clamp_min,
            self.growth_clamp_max,
            self.default_growth_rate,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !all_finite {
            return Err(AnalysisError::InvalidConfig("valuation assumptions must be finite".into()));
        }
        if self.discount_rate <= 0.0 {
            return Err(AnalysisError::InvalidConfig(format!(
                "discount rate must be positive, got {}",
                self.discount_rate
            )));
        }
        if self.discount_rate <= self.terminal_growth_rate {
            return Err(AnalysisError::InvalidConfig(format!(
                "discount rate {} must exceed terminal growth rate {}",
                self.discount_rate, self.terminal_growth_rate
            )));
        }
        if self.projection_years == 0 {
            return Err(AnalysisError::InvalidConfig("projection years must be at least 1".into()));
        }
        if self.growth_lookback_years == 0 {
            return Err(AnalysisError::InvalidConfig("growth lookback must be at least 1 year".into()));
        }
        if self.growth_clamp_min > self.growth_clamp_max {
            return Err(AnalysisError::InvalidConfig(format!(
                "growth clamp min {} exceeds max {}",
                self.growth_clamp_min, self.growth_clamp_max
            )));
        }
        let (low, high) = IMPLIED_GROWTH_BRACKET;
        if self.growth_clamp_min < low || self.growth_clamp_max > high {
            return Err(AnalysisError::InvalidConfig(format!(
                "growth clamp [{}, {}] must lie inside [{}, {}]",
                self.growth_clamp_min, self.growth_clamp_max, low, high
            )));
        }
        Ok(())
    }
}

/// Valuation outputs for one symbol. Rates and margin of safety are fractions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ValuationResult {
    pub enterprise_value: Option<f64>,
    /// `1 - market / enterprise`, floored at -1.
    pub margin_of_safety: Option<f64>,
    pub implied_growth_rate: Option<f64>,
    /// `Some(false)` when the solver ran out of iterations.
    pub implied_growth_converged: Option<bool>,
    /// Clamped forward growth that produced `enterprise_value`.
    pub growth_rate_used: Option<f64>,
}

/// Look-back horizons reported for every symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Horizon {
    ThreeYears,
    FiveYears,
    TenYears,
}

impl Horizon {
    pub const ALL: [Horizon; 3] = [Horizon::ThreeYears, Horizon::FiveYears, Horizon::TenYears];

    pub fn years(&self) -> u32 {
        match self {
            Horizon::ThreeYears => 3,
            Horizon::FiveYears => 5,
            Horizon::TenYears => 10,
        }
    }
}

/// Return, drawdown and their ratio over one horizon. Percent units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HorizonMetrics {
    pub annualized_return: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub ar_mdd_ratio: Option<f64>,
}

/// Price-derived metrics. Returns and drawdowns are percentages (12.34 = 12.34%).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub return_3y: Option<f64>,
    pub return_5y: Option<f64>,
    pub return_10y: Option<f64>,
    pub max_drawdown_3y: Option<f64>,
    pub max_drawdown_5y: Option<f64>,
    pub max_drawdown_10y: Option<f64>,
    pub ar_mdd_ratio_3y: Option<f64>,
    pub ar_mdd_ratio_5y: Option<f64>,
    pub ar_mdd_ratio_10y: Option<f64>,
}

impl PerformanceMetrics {
    pub fn horizon(&self, horizon: Horizon) -> HorizonMetrics {
        let (annualized_return, max_drawdown, ar_mdd_ratio) = match horizon {
            Horizon::ThreeYears => (self.return_3y, self.max_drawdown_3y, self.ar_mdd_ratio_3y),
            Horizon::FiveYears => (self.return_5y, self.max_drawdown_5y, self.ar_mdd_ratio_5y),
            Horizon::TenYears => (self.return_10y, self.max_drawdown_10y, self.ar_mdd_ratio_10y),
        };
        HorizonMetrics { annualized_return, max_drawdown, ar_mdd_ratio }
    }

    pub fn set_horizon(&mut self, horizon: Horizon, metrics: HorizonMetrics) {
        let (ret, dd, ratio) = match horizon {
            Horizon::ThreeYears => (&mut self.return_3y, &mut self.max_drawdown_3y, &mut self.ar_mdd_ratio_3y),
            Horizon::FiveYears => (&mut self.return_5y, &mut self.max_drawdown_5y, &mut self.ar_mdd_ratio_5y),
            Horizon::TenYears => (&mut self.return_10y, &mut self.max_drawdown_10y, &mut self.ar_mdd_ratio_10y),
        };
        *ret = metrics.annualized_return;
        *dd = metrics.max_drawdown;
        *ratio = metrics.ar_mdd_ratio;
    }

    pub fn is_empty(&self) -> bool {
        Horizon::ALL.iter().all(|h| self.horizon(*h) == HorizonMetrics::default())
    }
}

/// Unit a persisted field is stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricUnit {
    /// 12.34 means 12.34%
    Percent,
    Ratio,
    Currency,
}

/// Every column the engine may write
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MetricField {
    #[serde(rename = "return_3y")]
    Return3y,
    #[serde(rename = "return_5y")]
    Return5y,
    #[serde(rename = "return_10y")]
    Return10y,
    #[serde(rename = "max_drawdown_3y")]
    MaxDrawdown3y,
    #[serde(rename = "max_drawdown_5y")]
    MaxDrawdown5y,
    #[serde(rename = "max_drawdown_10y")]
    MaxDrawdown10y,
    #[serde(rename = "ar_mdd_ratio_3y")]
    ArMddRatio3y,
    #[serde(rename = "ar_mdd_ratio_5y")]
    ArMddRatio5y,
    #[serde(rename = "ar_mdd_ratio_10y")]
    ArMddRatio10y,
    #[serde(rename = "enterprise_value")]
    EnterpriseValue,
    #[serde(rename = "margin_of_safety")]
    MarginOfSafety,
    #[serde(rename = "implied_growth_rate")]
    ImpliedGrowthRate,
}

impl MetricField {
    pub const ALL: [MetricField; 12] = [
        MetricField::Return3y,
        MetricField::Return5y,
        MetricField::Return10y,
        MetricField::MaxDrawdown3y,
        MetricField::MaxDrawdown5y,
        MetricField::MaxDrawdown10y,
        MetricField::ArMddRatio3y,
        MetricField::ArMddRatio5y,
        MetricField::ArMddRatio10y,
        MetricField::EnterpriseValue,
        MetricField::MarginOfSafety,
        MetricField::ImpliedGrowthRate,
    ];

    /// Column name in the metrics store.
    pub fn column(&self) -> &'static str {
        match self {
            MetricField::Return3y => "return_3y",
            MetricField::Return5y => "return_5y",
            MetricField::Return10y => "return_10y",
            MetricField::MaxDrawdown3y => "max_drawdown_3y",
            MetricField::MaxDrawdown5y => "max_drawdown_5y",
            MetricField::MaxDrawdown10y => "max_drawdown_10y",
            MetricField::ArMddRatio3y => "ar_mdd_ratio_3y",
            MetricField::ArMddRatio5y => "ar_mdd_ratio_5y",
            MetricField::ArMddRatio10y => "ar_mdd_ratio_10y",
            MetricField::EnterpriseValue => "enterprise_value",
            MetricField::MarginOfSafety => "margin_of_safety",
            MetricField::ImpliedGrowthRate => "implied_growth_rate",
        }
    }

    pub fn unit(&self) -> MetricUnit {
        match self {
            MetricField::ArMddRatio3y | MetricField::ArMddRatio5y | MetricField::ArMddRatio10y => MetricUnit::Ratio,
            MetricField::EnterpriseValue => MetricUnit::Currency,
            _ => MetricUnit::Percent,
        }
    }

    pub fn decimal_places(&self) -> u32 {
        match self.unit() {
            MetricUnit::Currency => 2,
            MetricUnit::Percent | MetricUnit::Ratio => 4,
        }
    }

    fn for_horizon(horizon: Horizon) -> [MetricField; 3] {
        match horizon {
            Horizon::ThreeYears => [MetricField::Return3y, MetricField::MaxDrawdown3y, MetricField::ArMddRatio3y],
            Horizon::FiveYears => [MetricField::Return5y, MetricField::MaxDrawdown5y, MetricField::ArMddRatio5y],
            Horizon::TenYears => [MetricField::Return10y, MetricField::MaxDrawdown10y, MetricField::ArMddRatio10y],
        }
    }
}

/// Fraction to percent (0.1234 -> 12.34)
pub fn to_percent(fraction: f64) -> f64 {
    fraction * 100.0
}

/// Partial set of metric columns produced by one run for one symbol.
///
/// Values are rounded decimals in the unit given by [`MetricField::unit`].
/// Fields that were not computed are absent and must be left untouched by the
/// store; NaN and infinities can never get in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsUpdate {
    pub as_of: NaiveDate,
    values: BTreeMap<MetricField, Decimal>,
}

impl MetricsUpdate {
    pub fn new(as_of: NaiveDate) -> Self {
        Self { as_of, values: BTreeMap::new() }
    }

    /// Stores `value` (already in the field's unit). Returns `false` and leaves
    /// the field absent when the value cannot be represented.
    pub fn set(&mut self, field: MetricField, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match Decimal::from_f64(value) {
            Some(d) => {
                self.values.insert(field, d.round_dp(field.decimal_places()).normalize());
                true
            }
            None => false,
        }
    }

    fn set_opt(&mut self, field: MetricField, value: Option<f64>) {
        if let Some(v) = value {
            self.set(field, v);
        }
    }

    pub fn with_performance(mut self, metrics: &PerformanceMetrics) -> Self {
        for horizon in Horizon::ALL {
            let m = metrics.horizon(horizon);
            let [ret, dd, ratio] = MetricField::for_horizon(horizon);
            self.set_opt(ret, m.annualized_return);
            self.set_opt(dd, m.max_drawdown);
            self.set_opt(ratio, m.ar_mdd_ratio);
        }
        self
    }

    /// Converts the fractional valuation outputs to percent on the way in.
    pub fn with_valuation(mut self, valuation: &ValuationResult) -> Self {
        self.set_opt(MetricField::EnterpriseValue, valuation.enterprise_value);
        self.set_opt(MetricField::MarginOfSafety, valuation.margin_of_safety.map(to_percent));
        self.set_opt(MetricField::ImpliedGrowthRate, valuation.implied_growth_rate.map(to_percent));
        self
    }

    pub fn get(&self, field: MetricField) -> Option<Decimal> {
        self.values.get(&field).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn fields(&self) -> Vec<MetricField> {
        self.values.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetricField, Decimal)> + '_ {
        self.values.iter().map(|(f, v)| (*f, *v))
    }
}
