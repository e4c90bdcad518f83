use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{AnalysisError, CashFlowRecord, MarketValue, MetricsUpdate, PricePoint};

/// Source of historical prices and fundamentals for a symbol.
///
/// Failures must carry enough information for [`AnalysisError::is_retryable`]
/// to tell rate limiting and server errors apart from fatal ones.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Daily prices between `from` and `to` (inclusive). Order is not guaranteed.
    async fn fetch_historical_prices(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PricePoint>, AnalysisError>;

    /// Annual free cash flow for up to `years_back` fiscal years.
    async fn fetch_annual_free_cash_flow(
        &self,
        symbol: &str,
        years_back: u32,
    ) -> Result<Vec<CashFlowRecord>, AnalysisError>;

    /// Current price and market capitalization.
    async fn fetch_current_market_value(&self, symbol: &str) -> Result<MarketValue, AnalysisError>;
}

/// Read side (worklist) and write side (metrics) of the metrics store.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn list_symbols_needing_metrics(&self, index_name: &str) -> Result<Vec<String>, AnalysisError>;

    /// Partial-column update: only the fields present in `update` change.
    async fn update_metrics(&self, symbol: &str, update: &MetricsUpdate) -> Result<(), AnalysisError>;
}
