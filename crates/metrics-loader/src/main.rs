//! metrics-loader: compute return, drawdown and valuation metrics for every
//! constituent of an index and upsert them into `company_metrics`.
//!
//! Usage:
//!   cargo run -p metrics-loader -- --index SP500
//!   cargo run -p metrics-loader -- --index SP500 --symbols AAPL MSFT GOOGL
//!   cargo run -p metrics-loader -- --index SP500 --as-of 2024-06-28 --dry-run

use analysis_core::{AnalysisError, MetricsUpdate, PersistenceGateway};
use analysis_orchestrator::{CancellationFlag, LoaderConfig, MetricsOrchestrator, SqliteMetricsStore, MAX_CONCURRENCY};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use polygon_client::PolygonClient;
use std::sync::Arc;

const DEFAULT_INDEX: &str = "SP500";

#[derive(Debug, Clone, PartialEq)]
struct CliArgs {
    index: String,
    db: Option<String>,
    concurrency: Option<usize>,
    as_of: Option<NaiveDate>,
    symbols: Vec<String>,
    dry_run: bool,
}

impl CliArgs {
    fn parse(args: &[String]) -> anyhow::Result<Self> {
        let value_of = |flag: &str| args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1));

        let concurrency = match value_of("--concurrency") {
            Some(raw) => Some(
                raw.parse()
                    .map_err(|_| anyhow::anyhow!("--concurrency expects a number, got {:?}", raw))?,
            ),
            None => None,
        };
        let as_of = match value_of("--as-of") {
            Some(raw) => Some(
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map_err(|_| anyhow::anyhow!("--as-of expects YYYY-MM-DD, got {:?}", raw))?,
            ),
            None => None,
        };
        let symbols = match args.iter().position(|a| a == "--symbols") {
            Some(idx) => args[idx + 1..]
                .iter()
                .take_while(|a| !a.starts_with("--"))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        Ok(Self {
            index: value_of("--index").cloned().unwrap_or_else(|| DEFAULT_INDEX.to_string()),
            db: value_of("--db").cloned(),
            concurrency,
            as_of,
            symbols,
            dry_run: args.iter().any(|a| a == "--dry-run"),
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  metrics-loader --index NAME               Update metrics for every constituent of NAME");
    eprintln!("");
    eprintln!("Options:");
    eprintln!("  --symbols AAPL MSFT ...   Add constituents to the index before running");
    eprintln!("  --as-of YYYY-MM-DD        Evaluation date (default: today, UTC)");
    eprintln!("  --db URL                  SQLite URL (default: $DATABASE_URL or sqlite:metrics.db)");
    eprintln!("  --concurrency N           Symbols in flight, 1..={} (default: $METRICS_CONCURRENCY or 1)", MAX_CONCURRENCY);
    eprintln!("  --dry-run                 Compute and log metrics without writing them");
}

/// Reads the worklist from the store but only logs the updates.
struct DryRunGateway {
    store: Arc<SqliteMetricsStore>,
}

#[async_trait]
impl PersistenceGateway for DryRunGateway {
    async fn list_symbols_needing_metrics(&self, index_name: &str) -> Result<Vec<String>, AnalysisError> {
        self.store.list_symbols_needing_metrics(index_name).await
    }

    async fn update_metrics(&self, symbol: &str, update: &MetricsUpdate) -> Result<(), AnalysisError> {
        let rendered = serde_json::to_string(update).map_err(|e| AnalysisError::InvalidData(e.to_string()))?;
        tracing::info!("(dry run) {} => {}", symbol, rendered);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "metrics_loader=info,analysis_orchestrator=info,polygon_client=warn".into()
            }),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }
    let cli = CliArgs::parse(&args)?;

    let mut config = LoaderConfig::from_env()?;
    if let Some(db) = &cli.db {
        config.database_url = db.clone();
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    config.validate()?;

    let as_of = cli.as_of.unwrap_or_else(|| Utc::now().date_naive());
    tracing::info!(
        "metrics-loader: index={}, as_of={}, db={}, dry_run={}, concurrency={}",
        cli.index,
        as_of,
        config.database_url,
        cli.dry_run,
        config.concurrency
    );

    let store = Arc::new(SqliteMetricsStore::new(&config.database_url).await?);
    if !cli.symbols.is_empty() {
        let added = store.add_constituents(&cli.index, &cli.symbols).await?;
        tracing::info!("{}: added {} of {} constituents", cli.index, added, cli.symbols.len());
    }

    let gateway: Arc<dyn PersistenceGateway> = if cli.dry_run {
        Arc::new(DryRunGateway { store: Arc::clone(&store) })
    } else {
        store
    };
    let polygon = Arc::new(PolygonClient::new(config.polygon_api_key.clone()));
    let orchestrator = MetricsOrchestrator::new(polygon, gateway, config.rate_limiter(), config.orchestrator());

    let cancel = CancellationFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, finishing in-flight symbols...");
                cancel.cancel();
            }
        });
    }

    let summary = orchestrator.run(&cli.index, as_of, &cancel).await?;

    println!(
        "{} as of {}: {} updated, {} skipped, {} errors ({} partial), {} approximate valuations, {} not started{}",
        summary.index_name,
        summary.as_of,
        summary.updated,
        summary.skipped,
        summary.errors,
        summary.partial,
        summary.approximate_valuations,
        summary.not_started,
        if summary.cancelled { " (cancelled)" } else { "" }
    );

    if summary.all_failed() {
        anyhow::bail!("every symbol in {} failed", summary.index_name);
    }
    Ok(())
}
