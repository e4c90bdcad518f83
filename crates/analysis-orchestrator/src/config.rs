use analysis_core::{AnalysisError, ValuationAssumptions};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;

/// Upper bound on symbols processed at once
pub const MAX_CONCURRENCY: usize = 10;

/// Per-run knobs for [`crate::MetricsOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Symbols in flight at once (1..=10)
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub assumptions: ValuationAssumptions,
    /// Fiscal years of cash flow requested per symbol
    pub cash_flow_years: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let assumptions = ValuationAssumptions::default();
        Self {
            concurrency: 1,
            retry: RetryPolicy::default(),
            cash_flow_years: assumptions.growth_lookback_years + 1,
            assumptions,
        }
    }
}

impl OrchestratorConfig {
    /// Checked once per run, before the worklist is read.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !(1..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(AnalysisError::InvalidConfig(format!(
                "concurrency must be between 1 and {}, got {}",
                MAX_CONCURRENCY, self.concurrency
            )));
        }
        if self.cash_flow_years == 0 {
            return Err(AnalysisError::InvalidConfig("cash flow years must be at least 1".into()));
        }
        self.assumptions.validate()
    }
}

/// Deployment configuration for the `metrics-loader` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(skip_serializing)]
    pub polygon_api_key: String,
    pub database_url: String,
    pub max_requests_per_minute: usize,
    pub request_delay_ms: u64,
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub assumptions: ValuationAssumptions,
}

impl LoaderConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`LoaderConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = ValuationAssumptions::default();
        let config = Self {
            polygon_api_key: lookup("POLYGON_API_KEY").unwrap_or_default(),
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| "sqlite:metrics.db".to_string()),
            max_requests_per_minute: parse_var(&lookup, "POLYGON_RATE_LIMIT", 300)?,
            request_delay_ms: parse_var(&lookup, "REQUEST_DELAY_MS", 250)?,
            concurrency: parse_var(&lookup, "METRICS_CONCURRENCY", 1)?,
            max_retries: parse_var(&lookup, "MAX_RETRIES", 3)?,
            retry_base_delay_ms: parse_var(&lookup, "RETRY_BASE_DELAY_MS", 1000)?,
            assumptions: ValuationAssumptions {
                discount_rate: parse_var(&lookup, "DISCOUNT_RATE", defaults.discount_rate)?,
                terminal_growth_rate: parse_var(&lookup, "TERMINAL_GROWTH_RATE", defaults.terminal_growth_rate)?,
                projection_years: parse_var(&lookup, "PROJECTION_YEARS", defaults.projection_years)?,
                growth_clamp_min: parse_var(&lookup, "GROWTH_CLAMP_MIN", defaults.growth_clamp_min)?,
                growth_clamp_max: parse_var(&lookup, "GROWTH_CLAMP_MAX", defaults.growth_clamp_max)?,
                default_growth_rate: parse_var(&lookup, "DEFAULT_GROWTH_RATE", defaults.default_growth_rate)?,
                growth_lookback_years: defaults.growth_lookback_years,
            },
        };
        Ok(config)
    }

    /// Startup check. Any error here must abort the run before a symbol is
    /// touched.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.polygon_api_key.trim().is_empty() {
            return Err(AnalysisError::InvalidConfig("POLYGON_API_KEY must be set".into()));
        }
        if self.max_requests_per_minute == 0 {
            return Err(AnalysisError::InvalidConfig("POLYGON_RATE_LIMIT must be at least 1".into()));
        }
        self.orchestrator().validate()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::per_minute(self.max_requests_per_minute)
            .with_min_interval(Duration::from_millis(self.request_delay_ms))
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            concurrency: self.concurrency,
            retry: self.retry_policy(),
            assumptions: self.assumptions,
            cash_flow_years: self.assumptions.growth_lookback_years + 1,
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<LoaderConfig> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        LoaderConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("POLYGON_API_KEY", "abc")]).unwrap();
        assert_eq!(config.database_url, "sqlite:metrics.db");
        assert_eq!(config.max_requests_per_minute, 300);
        assert_eq!(config.request_delay_ms, 250);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.assumptions, ValuationAssumptions::default());
        assert!(config.validate().is_ok());

        let orchestrator = config.orchestrator();
        assert_eq!(orchestrator.retry.base_delay, Duration::from_millis(1000));
        assert_eq!(orchestrator.cash_flow_years, 6);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("POLYGON_API_KEY", "abc"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("METRICS_CONCURRENCY", "4"),
            ("DISCOUNT_RATE", "0.09"),
            ("PROJECTION_YEARS", "5"),
            ("REQUEST_DELAY_MS", " 100 "),
        ])
        .unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.assumptions.discount_rate, 0.09);
        assert_eq!(config.assumptions.projection_years, 5);
        assert_eq!(config.request_delay_ms, 100);

        let limiter = config.rate_limiter();
        assert_eq!(limiter.max_requests(), 300);
        assert_eq!(limiter.min_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_orchestrator_config_validation() {
        assert!(OrchestratorConfig::default().validate().is_ok());

        let idle = OrchestratorConfig { concurrency: 0, ..Default::default() };
        assert!(matches!(idle.validate(), Err(AnalysisError::InvalidConfig(_))));

        let inverted = OrchestratorConfig {
            assumptions: ValuationAssumptions { discount_rate: 0.02, terminal_growth_rate: 0.03, ..Default::default() },
            ..Default::default()
        };
        assert!(matches!(inverted.validate(), Err(AnalysisError::InvalidConfig(_))));
    }

    #[test]
    fn test_malformed_number_is_an_error() {
        let err = config_from(&[("POLYGON_API_KEY", "abc"), ("MAX_RETRIES", "three")]).unwrap_err();
        assert!(err.to_string().contains("MAX_RETRIES"));
    }

    #[test]
    fn test_validation_failures() {
        let missing_key = config_from(&[]).unwrap();
        assert!(matches!(missing_key.validate(), Err(AnalysisError::InvalidConfig(_))));

        let inverted = config_from(&[
            ("POLYGON_API_KEY", "abc"),
            ("DISCOUNT_RATE", "0.02"),
            ("TERMINAL_GROWTH_RATE", "0.03"),
        ])
        .unwrap();
        assert!(inverted.validate().is_err());

        let too_wide = config_from(&[("POLYGON_API_KEY", "abc"), ("METRICS_CONCURRENCY", "11")]).unwrap();
        assert!(too_wide.validate().is_err());

        let zero_rate = config_from(&[("POLYGON_API_KEY", "abc"), ("POLYGON_RATE_LIMIT", "0")]).unwrap();
        assert!(zero_rate.validate().is_err());
    }
}
