use analysis_core::{AnalysisError, CashFlowRecord, DataProvider, MarketValue, PricePoint};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const BASE_URL: &str = "https://api.polygon.io";

/// Longest error body kept in an `AnalysisError::Http` message
const MAX_ERROR_BODY: usize = 200;

/// Thin Polygon.io REST client.
///
/// Every call is a single attempt. Pacing and retries belong to the caller,
/// which sees a status-coded [`AnalysisError::Http`] for non-2xx responses.
#[derive(Clone)]
pub struct PolygonClient {
    api_key: String,
    client: Client,
    base_url: String,
}

impl PolygonClient {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key,
            client,
            base_url: BASE_URL.to_string(),
        }
    }

    /// Point the client at another host (a proxy or a local stub).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, AnalysisError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(&[("apiKey", self.api_key.as_str())])
            .query(query)
            .send()
            .await
            .map_err(|e| AnalysisError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            if message.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY).rev().find(|i| message.is_char_boundary(*i)).unwrap_or(0);
                message.truncate(cut);
            }
            tracing::debug!("Polygon {} -> HTTP {}", path, status.as_u16());
            return Err(AnalysisError::Http { status: status.as_u16(), message });
        }

        let body = response
            .text()
            .await
            .map_err(|e| AnalysisError::Network(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| AnalysisError::Decode(format!("{}: {}", path, e)))
    }

    /// Split-adjusted daily closes between `from` and `to` inclusive.
    pub async fn get_daily_prices(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PricePoint>, AnalysisError> {
        let path = format!(
            "/v2/aggs/ticker/{}/range/1/day/{}/{}",
            symbol,
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        );
        let response: AggregateResponse = self
            .get_json(
                &path,
                &[
                    ("adjusted", "true".to_string()),
                    ("sort", "asc".to_string()),
                    ("limit", "50000".to_string()),
                ],
            )
            .await?;

        Ok(response.into_price_points())
    }

    /// Annual free cash flow, newest fiscal year first, at most `limit` years.
    pub async fn get_annual_cash_flows(&self, symbol: &str, limit: u32) -> Result<Vec<CashFlowRecord>, AnalysisError> {
        let response: FinancialsResponse = self
            .get_json(
                "/vX/reference/financials",
                &[
                    ("ticker", symbol.to_string()),
                    ("timeframe", "annual".to_string()),
                    ("order", "desc".to_string()),
                    ("limit", limit.max(1).to_string()),
                ],
            )
            .await?;

        Ok(response.into_cash_flows())
    }

    pub async fn get_ticker_details(&self, symbol: &str) -> Result<TickerDetails, AnalysisError> {
        let path = format!("/v3/reference/tickers/{}", symbol);
        let response: TickerDetailsResponse = self.get_json(&path, &[]).await?;
        Ok(response.results)
    }

    /// Near-real-time last trade, today's bar and the previous day's bar
    pub async fn get_snapshot(&self, symbol: &str) -> Result<SnapshotTicker, AnalysisError> {
        let path = format!("/v2/snapshot/locale/us/markets/stocks/tickers/{}", symbol);
        let response: SnapshotResponse = self.get_json(&path, &[]).await?;
        Ok(response.ticker)
    }
}

#[async_trait]
impl DataProvider for PolygonClient {
    async fn fetch_historical_prices(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PricePoint>, AnalysisError> {
        self.get_daily_prices(symbol, from, to).await
    }

    async fn fetch_annual_free_cash_flow(
        &self,
        symbol: &str,
        years_back: u32,
    ) -> Result<Vec<CashFlowRecord>, AnalysisError> {
        self.get_annual_cash_flows(symbol, years_back).await
    }

    /// Market cap from ticker details. The snapshot is only requested when
    /// the details carry no market cap and a price is needed for the
    /// price × shares fallback.
    async fn fetch_current_market_value(&self, symbol: &str) -> Result<MarketValue, AnalysisError> {
        let details = self.get_ticker_details(symbol).await?;
        let mut value = details.market_value();
        if value.market_cap.is_some() {
            return Ok(value);
        }

        match self.get_snapshot(symbol).await {
            Ok(snapshot) => value.price = snapshot.price(),
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => tracing::debug!("{}: no snapshot price ({})", symbol, e),
        }
        Ok(value)
    }
}

// Response structures
#[derive(Debug, Deserialize)]
struct AggregateResponse {
    #[serde(default)]
    results: Vec<AggregateResult>,
}

#[derive(Debug, Deserialize)]
struct AggregateResult {
    t: i64, // timestamp (ms)
    c: f64, // close
}

impl AggregateResponse {
    fn into_price_points(self) -> Vec<PricePoint> {
        self.results
            .into_iter()
            .filter_map(|r| {
                let date = DateTime::from_timestamp_millis(r.t)?.date_naive();
                Some(PricePoint::new(date, r.c))
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct FinancialsResponse {
    #[serde(default)]
    results: Vec<FinancialResult>,
}

#[derive(Debug, Deserialize)]
struct FinancialResult {
    #[serde(default)]
    fiscal_year: Option<String>,
    financials: FinancialStatements,
}

#[derive(Debug, Deserialize)]
struct FinancialStatements {
    #[serde(default)]
    cash_flow_statement: HashMap<String, serde_json::Value>,
}

impl FinancialStatements {
    fn cash_flow(&self, key: &str) -> Option<f64> {
        self.cash_flow_statement.get(key).and_then(|v| v.get("value")).and_then(|v| v.as_f64())
    }
}

impl FinancialsResponse {
    /// FCF = operating cash flow + investing cash flow. Filings missing
    /// either line or a parseable fiscal year are dropped.
    fn into_cash_flows(self) -> Vec<CashFlowRecord> {
        self.results
            .into_iter()
            .filter_map(|r| {
                let fiscal_year = r.fiscal_year.as_deref()?.trim().parse().ok()?;
                let ocf = r.financials.cash_flow("net_cash_flow_from_operating_activities")?;
                let cfi = r.financials.cash_flow("net_cash_flow_from_investing_activities")?;
                Some(CashFlowRecord { fiscal_year, free_cash_flow: ocf + cfi })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct TickerDetailsResponse {
    results: TickerDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerDetails {
    pub ticker: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub share_class_shares_outstanding: Option<f64>,
    #[serde(default)]
    pub weighted_shares_outstanding: Option<f64>,
}

impl TickerDetails {
    pub fn market_value(&self) -> MarketValue {
        MarketValue {
            price: None,
            market_cap: self.market_cap.filter(|c| *c > 0.0),
            shares_outstanding: self.weighted_shares_outstanding.or(self.share_class_shares_outstanding),
        }
    }
}

// Snapshot types
#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    ticker: SnapshotTicker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotTicker {
    pub day: Option<SnapshotDay>,
    #[serde(rename = "lastTrade")]
    pub last_trade: Option<SnapshotLastTrade>,
    #[serde(rename = "prevDay")]
    pub prev_day: Option<SnapshotDay>,
}

impl SnapshotTicker {
    /// Last trade, else today's close, else yesterday's close. Zero prices
    /// (pre-market snapshots) are skipped.
    pub fn price(&self) -> Option<f64> {
        let positive = |p: Option<f64>| p.filter(|v| *v > 0.0);
        positive(self.last_trade.as_ref().and_then(|t| t.p))
            .or_else(|| positive(self.day.as_ref().and_then(|d| d.c)))
            .or_else(|| positive(self.prev_day.as_ref().and_then(|d| d.c)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDay {
    pub c: Option<f64>,
    pub v: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotLastTrade {
    pub p: Option<f64>,
    pub t: Option<i64>,
}
