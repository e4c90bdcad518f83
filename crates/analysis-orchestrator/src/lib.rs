//! Batch driver: fetches prices and fundamentals per symbol, runs the pure
//! analyzers and writes the fields that were computed.

use analysis_core::{
    years_before, AnalysisError, CashFlowHistory, DataProvider, Horizon, MetricField, MetricsUpdate,
    PersistenceGateway, PriceSeries,
};
use chrono::{Duration, NaiveDate};
use fundamental_analysis::ValuationEngine;
use futures_util::FutureExt;
use quant_analysis::PerformanceAnalyzer;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub mod config;
pub mod db;
pub mod rate_limit;
pub mod retry;


pub use config::{LoaderConfig, OrchestratorConfig, MAX_CONCURRENCY};
pub use db::{SqliteMetricsStore, StoredMetrics};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;

/// Extra days fetched before the longest look-back date, so a point on or
/// before it exists even when the date falls on a market holiday.
const PRICE_LOOKBACK_PADDING_DAYS: i64 = 10;

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Cooperative stop signal, checked before each symbol starts.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Terminal state of one symbol in a batch
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolOutcome {
    /// A non-empty partial update was persisted.
    Updated {
        fields: Vec<MetricField>,
        /// The implied growth written is a non-converged best estimate.
        approximate_valuation: bool,
    },
    /// Some fields were persisted but at least one fetch group failed; the
    /// first failure is kept. Counts as an error.
    Partial {
        fields: Vec<MetricField>,
        approximate_valuation: bool,
        error: AnalysisError,
    },
    /// Nothing was computable and no fetch failed.
    Skipped { reason: String },
    /// Nothing was written because a fetch or the write failed.
    Failed { error: AnalysisError },
    /// The batch was cancelled before this symbol started.
    NotStarted,
}

impl std::fmt::Display for SymbolOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolOutcome::Updated { fields, approximate_valuation } => {
                write!(f, "{} fields", fields.len())?;
                if *approximate_valuation {
                    write!(f, " (approximate implied growth)")?;
                }
                Ok(())
            }
            SymbolOutcome::Partial { fields, error, .. } => {
                write!(f, "{} fields, partial: {}", fields.len(), error)
            }
            SymbolOutcome::Skipped { reason } => write!(f, "skipped: {}", reason),
            SymbolOutcome::Failed { error } => write!(f, "failed: {}", error),
            SymbolOutcome::NotStarted => write!(f, "not started"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub index_name: String,
    pub as_of: NaiveDate,
    pub updated: usize,
    pub skipped: usize,
    /// Failed and partial symbols
    pub errors: usize,
    /// Symbols written despite a failed fetch group (also in `errors`)
    pub partial: usize,
    pub approximate_valuations: usize,
    pub not_started: usize,
    pub cancelled: bool,
    /// Worklist order
    pub outcomes: Vec<(String, SymbolOutcome)>,
}

impl BatchSummary {
    fn new(index_name: &str, as_of: NaiveDate) -> Self {
        Self {
            index_name: index_name.to_string(),
            as_of,
            updated: 0,
            skipped: 0,
            errors: 0,
            partial: 0,
            approximate_valuations: 0,
            not_started: 0,
            cancelled: false,
            outcomes: Vec::new(),
        }
    }

    fn record(&mut self, symbol: String, outcome: SymbolOutcome) {
        match &outcome {
            SymbolOutcome::Updated { approximate_valuation, .. } => {
                self.updated += 1;
                if *approximate_valuation {
                    self.approximate_valuations += 1;
                }
            }
            SymbolOutcome::Partial { approximate_valuation, .. } => {
                self.errors += 1;
                self.partial += 1;
                if *approximate_valuation {
                    self.approximate_valuations += 1;
                }
            }
            SymbolOutcome::Skipped { .. } => self.skipped += 1,
            SymbolOutcome::Failed { .. } => self.errors += 1,
            SymbolOutcome::NotStarted => self.not_started += 1,
        }
        self.outcomes.push((symbol, outcome));
    }

    /// Symbols that reached a terminal state
    pub fn processed(&self) -> usize {
        self.updated + self.skipped + self.errors
    }

    /// True when at least one symbol ran and every one of them failed or
    /// was only partially updated.
    pub fn all_failed(&self) -> bool {
        self.errors > 0 && self.updated == 0 && self.skipped == 0
    }

    pub fn outcome(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.outcomes.iter().find(|(s, _)| s == symbol).map(|(_, o)| o)
    }
}

/// Applies the metric pipeline to every symbol of an index.
///
/// Holds no per-run state, so one instance can serve many runs. Clones share
/// the provider, gateway and rate limiter.
#[derive(Clone)]
pub struct MetricsOrchestrator {
    provider: Arc<dyn DataProvider>,
    gateway: Arc<dyn PersistenceGateway>,
    limiter: RateLimiter,
    config: OrchestratorConfig,
    performance: PerformanceAnalyzer,
    valuation: ValuationEngine,
}

impl MetricsOrchestrator {
    pub fn new(
        provider: Arc<dyn DataProvider>,
        gateway: Arc<dyn PersistenceGateway>,
        limiter: RateLimiter,
        config: OrchestratorConfig,
    ) -> Self {
        let valuation = ValuationEngine::new(config.assumptions);
        Self {
            provider,
            gateway,
            limiter,
            config,
            performance: PerformanceAnalyzer::new(),
            valuation,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Processes the index's worklist. Invalid configuration and a failure to
    /// read the worklist are errors; per-symbol failures end up in the summary.
    pub async fn run(
        &self,
        index_name: &str,
        as_of: NaiveDate,
        cancel: &CancellationFlag,
    ) -> Result<BatchSummary, AnalysisError> {
        self.config.validate()?;

        let symbols = self.gateway.list_symbols_needing_metrics(index_name).await?;
        let total = symbols.len();
        let concurrency = self.config.concurrency;
        tracing::info!(
            "{}: {} symbols, as_of={}, concurrency={}",
            index_name,
            total,
            as_of,
            concurrency
        );

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();
        let mut slots: Vec<Option<SymbolOutcome>> = vec![None; total];
        let mut cancelled = false;

        for (position, symbol) in symbols.iter().enumerate() {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let worker = self.clone();
            let symbol = symbol.clone();
            let completed = Arc::clone(&completed);
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(worker.process_symbol(&symbol, as_of))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| SymbolOutcome::Failed {
                        error: AnalysisError::TaskFailed(format!("panicked: {}", panic_message(payload.as_ref()))),
                    });

                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                match &outcome {
                    SymbolOutcome::Failed { .. } | SymbolOutcome::Partial { .. } => {
                        tracing::warn!("[{}/{}] {} => {}", done, total, symbol, outcome)
                    }
                    _ => tracing::info!("[{}/{}] {} => {}", done, total, symbol, outcome),
                }
                (position, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, outcome)) => slots[position] = Some(outcome),
                Err(e) => tracing::error!("symbol task aborted: {}", e),
            }
        }

        let mut summary = BatchSummary::new(index_name, as_of);
        summary.cancelled = cancelled;
        for (symbol, slot) in symbols.into_iter().zip(slots) {
            let outcome = match slot {
                Some(outcome) => outcome,
                None if cancelled => SymbolOutcome::NotStarted,
                None => SymbolOutcome::Failed {
                    error: AnalysisError::TaskFailed("did not complete".into()),
                },
            };
            summary.record(symbol, outcome);
        }

        if cancelled {
            tracing::warn!("{}: cancelled, {} symbols not started", index_name, summary.not_started);
        }
        tracing::info!(
            "{}: done. updated={}, skipped={}, errors={} ({} partial), approximate={}, not_started={}",
            index_name,
            summary.updated,
            summary.skipped,
            summary.errors,
            summary.partial,
            summary.approximate_valuations,
            summary.not_started
        );
        Ok(summary)
    }

    /// Fetch, compute and persist one symbol. Never panics on bad data and
    /// never returns an error: every failure becomes an outcome.
    pub async fn process_symbol(&self, symbol: &str, as_of: NaiveDate) -> SymbolOutcome {
        let longest = Horizon::TenYears.years();
        let from = years_before(as_of, longest).unwrap_or(as_of) - Duration::days(PRICE_LOOKBACK_PADDING_DAYS);

        let prices = self
            .fetch(symbol, "prices", || self.provider.fetch_historical_prices(symbol, from, as_of))
            .await;
        let cash_flows = self
            .fetch(symbol, "cash flow", || {
                self.provider.fetch_annual_free_cash_flow(symbol, self.config.cash_flow_years)
            })
            .await;
        let market = self
            .fetch(symbol, "market value", || self.provider.fetch_current_market_value(symbol))
            .await;

        let mut failures = Vec::new();
        let mut skip_reasons = Vec::new();
        let mut update = MetricsUpdate::new(as_of);

        match prices {
            Ok(points) => {
                let series = PriceSeries::from_points(points).up_to(as_of);
                if self.performance.is_sufficient(&series) {
                    update = update.with_performance(&self.performance.analyze(&series, as_of));
                } else {
                    skip_reasons.push(format!("only {} usable price points", series.len()));
                }
            }
            Err(e) => failures.push(("prices", e)),
        }

        let market_value = match market {
            Ok(value) => value.value(),
            Err(e) => {
                failures.push(("market value", e));
                None
            }
        };

        let mut approximate_valuation = false;
        match cash_flows {
            Ok(records) => {
                let history = CashFlowHistory::normalize(records);
                match history.latest_fcf() {
                    Some(fcf) if fcf > 0.0 => {
                        let valuation = self.valuation.evaluate(&history, market_value);
                        match (valuation.implied_growth_rate, valuation.implied_growth_converged) {
                            (Some(rate), Some(false)) => {
                                approximate_valuation = true;
                                tracing::warn!(
                                    "{}: implied growth did not converge, keeping best estimate {:.4}",
                                    symbol,
                                    rate
                                );
                            }
                            (Some(rate), _) => tracing::debug!("{}: implied growth {:.4} converged", symbol, rate),
                            _ => {}
                        }
                        update = update.with_valuation(&valuation);
                    }
                    Some(fcf) => skip_reasons.push(format!("latest free cash flow {} is not positive", fcf)),
                    None => skip_reasons.push("no free cash flow history".to_string()),
                }
            }
            Err(e) => failures.push(("cash flow", e)),
        }

        for (what, e) in &failures {
            tracing::warn!("{}: {} fetch failed: {}", symbol, what, e);
        }

        if update.is_empty() {
            if let Some((_, error)) = failures.into_iter().next() {
                return SymbolOutcome::Failed { error };
            }
            let reason = if skip_reasons.is_empty() {
                "no metric was computable".to_string()
            } else {
                skip_reasons.join("; ")
            };
            return SymbolOutcome::Skipped { reason };
        }

        let approximate_valuation = approximate_valuation && update.get(MetricField::ImpliedGrowthRate).is_some();
        if let Err(error) = self.gateway.update_metrics(symbol, &update).await {
            return SymbolOutcome::Failed { error };
        }
        match failures.into_iter().next() {
            Some((_, error)) => SymbolOutcome::Partial { fields: update.fields(), approximate_valuation, error },
            None => SymbolOutcome::Updated { fields: update.fields(), approximate_valuation },
        }
    }

    /// One provider call group: every attempt takes a rate-limiter slot.
    async fn fetch<T, F, Fut>(&self, symbol: &str, what: &str, mut call: F) -> Result<T, AnalysisError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AnalysisError>>,
    {
        let label = format!("{} {}", symbol, what);
        self.config
            .retry
            .run(&label, || {
                let request = call();
                let limiter = &self.limiter;
                async move {
                    limiter.acquire().await;
                    request.await
                }
            })
            .await
    }
}
