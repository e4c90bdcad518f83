use analysis_core::{AnalysisError, MetricField, MetricsUpdate, PersistenceGateway};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::BTreeMap;
use std::str::FromStr;

fn db_error(e: sqlx::Error) -> AnalysisError {
    AnalysisError::DatabaseError(e.to_string())
}

/// One `company_metrics` row as stored
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMetrics {
    pub symbol: String,
    pub values: BTreeMap<MetricField, f64>,
    pub metrics_as_of: Option<NaiveDate>,
    pub updated_at: Option<String>,
}

impl StoredMetrics {
    pub fn get(&self, field: MetricField) -> Option<f64> {
        self.values.get(&field).copied()
    }
}

/// SQLite-backed worklist and metrics store.
#[derive(Clone)]
pub struct SqliteMetricsStore {
    pool: SqlitePool,
}

impl SqliteMetricsStore {
    /// Open (creating if needed) the database and apply the schema.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true);

        // Each connection to an in-memory database is its own database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;

        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        let schema = include_str!("../../../schema.sql");

        // sqlx runs one statement per query
        for statement in schema.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&self.pool).await?;
            }
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Adds symbols to an index. Returns how many were new.
    pub async fn add_constituents(&self, index_name: &str, symbols: &[String]) -> Result<u64, AnalysisError> {
        let mut added = 0;
        for symbol in symbols {
            let result = sqlx::query("INSERT OR IGNORE INTO index_constituents (index_name, symbol) VALUES (?, ?)")
                .bind(index_name)
                .bind(symbol.trim().to_uppercase())
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
            added += result.rows_affected();
        }
        Ok(added)
    }

    pub async fn fetch_metrics(&self, symbol: &str) -> Result<Option<StoredMetrics>, AnalysisError> {
        let row = sqlx::query("SELECT * FROM company_metrics WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut values = BTreeMap::new();
        for field in MetricField::ALL {
            let value: Option<f64> = row.try_get(field.column()).map_err(db_error)?;
            if let Some(v) = value {
                values.insert(field, v);
            }
        }

        Ok(Some(StoredMetrics {
            symbol: row.try_get("symbol").map_err(db_error)?,
            values,
            metrics_as_of: row.try_get("metrics_as_of").map_err(db_error)?,
            updated_at: row.try_get("updated_at").map_err(db_error)?,
        }))
    }
}

#[async_trait]
impl PersistenceGateway for SqliteMetricsStore {
    /// Every constituent of the index, stalest first. Symbols never written
    /// come before all others; ties break alphabetically.
    async fn list_symbols_needing_metrics(&self, index_name: &str) -> Result<Vec<String>, AnalysisError> {
        let rows = sqlx::query(
            "SELECT c.symbol FROM index_constituents c \
             LEFT JOIN company_metrics m ON m.symbol = c.symbol \
             WHERE c.index_name = ? \
             ORDER BY m.updated_at IS NOT NULL, m.updated_at, c.symbol",
        )
        .bind(index_name)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("symbol").map_err(db_error))
            .collect()
    }

    async fn update_metrics(&self, symbol: &str, update: &MetricsUpdate) -> Result<(), AnalysisError> {
        if update.is_empty() {
            return Ok(());
        }

        let mut columns = Vec::with_capacity(update.len());
        let mut values = Vec::with_capacity(update.len());
        for (field, value) in update.iter() {
            let value = value
                .to_f64()
                .ok_or_else(|| AnalysisError::InvalidData(format!("{} = {} is not representable", field.column(), value)))?;
            columns.push(field.column());
            values.push(value);
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        let assignments: Vec<String> = columns.iter().map(|c| format!("{c} = excluded.{c}")).collect();
        let sql = format!(
            "INSERT INTO company_metrics (symbol, {}, metrics_as_of, updated_at) VALUES (?, {}, ?, ?) \
             ON CONFLICT(symbol) DO UPDATE SET {}, metrics_as_of = excluded.metrics_as_of, updated_at = excluded.updated_at",
            columns.join(", "),
            placeholders,
            assignments.join(", ")
        );

        let mut query = sqlx::query(&sql).bind(symbol);
        for value in values {
            query = query.bind(value);
        }
        query
            .bind(update.as_of)
            .bind(Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(())
    }
}
