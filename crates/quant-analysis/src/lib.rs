//! Price-history metrics: annualized return, max drawdown and the AR/MDD
//! ratio, individually and as a per-horizon bundle.

pub mod performance;
pub mod time_series;

pub use performance::{PerformanceAnalyzer, MIN_DRAWDOWN_POINTS, MIN_RETURN_POINTS};
pub use time_series::{annualized_return, ar_mdd_ratio, max_drawdown};
