//! Extractor contract shared by every vendor and mode.

use crate::application::gate::{ExecutionGate, Gate, GateOutcome, GateWindow, RunMode};
use crate::application::router::OutputRouter;
use crate::config::{ExtractEnvConfig, VendorEnvConfig};
use crate::domain::errors::{ConfigurationError, ExtractError, ResolutionError};
use crate::domain::ports::SymbolResolver;
use crate::domain::series::{DataSource, ExtractorKind, InstrumentSeries};
use crate::infrastructure::observability::Metrics;
use async_trait::async_trait;
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Weekday};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Extractor-scoped parameters handed out by the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractorParams {
    pub window: GateWindow,
    pub poll_interval: Duration,
    pub join_timeout: Duration,
    /// Historical only; both default to the prior business day
    pub start_range: Option<NaiveDate>,
    pub end_range: Option<NaiveDate>,
    /// Overrides the default historical quota (one job per resolved series)
    pub job_quota: Option<u64>,
}

impl ExtractorParams {
    pub fn new(window: GateWindow) -> Self {
        Self {
            window,
            poll_interval: Duration::from_secs(1),
            join_timeout: Duration::from_secs(10),
            start_range: None,
            end_range: None,
            job_quota: None,
        }
    }

    pub fn from_config(config: &ExtractEnvConfig) -> Result<Self, ConfigurationError> {
        Ok(Self::new(config.window()?)
            .with_poll_interval(config.poll_interval())
            .with_join_timeout(config.join_timeout())
            .with_job_quota(config.job_quota))
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_join_timeout(mut self, join_timeout: Duration) -> Self {
        self.join_timeout = join_timeout;
        self
    }

    pub fn with_range(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start_range = start;
        self.end_range = end;
        self
    }

    pub fn with_job_quota(mut self, quota: Option<u64>) -> Self {
        self.job_quota = quota;
        self
    }

    /// Inclusive date range for historical requests
    pub fn date_range(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let default = prior_business_day(today);
        let start = self.start_range.unwrap_or(default);
        let end = self.end_range.unwrap_or(start.max(default));
        (start, end)
    }
}

/// Last weekday strictly before `today`
pub fn prior_business_day(today: NaiveDate) -> NaiveDate {
    let mut day = today - ChronoDuration::days(1);
    while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
        day -= ChronoDuration::days(1);
    }
    day
}

/// Everything a registry factory needs to build one extractor
#[derive(Clone)]
pub struct ExtractorContext {
    pub series: Vec<InstrumentSeries>,
    pub params: ExtractorParams,
    pub router: Arc<OutputRouter>,
    pub vendors: VendorEnvConfig,
    pub shutdown: CancellationToken,
    pub metrics: Option<Metrics>,
}

impl ExtractorContext {
    /// Execution gate wired to the orchestrator's shutdown signal and join timeout
    pub fn execution_gate(
        &self,
        name: &str,
        gate: Arc<dyn Gate>,
        mode: RunMode,
    ) -> ExecutionGate {
        ExecutionGate::new(name, gate, mode)
            .with_join_timeout(self.params.join_timeout)
            .with_stop_token(&self.shutdown)
    }
}

/// One extractor per (kind, vendor) group.
///
/// Only [`ConfigurationError`] may escape construction; steady-state failures are handled at
/// the smallest scope (series, record) and logged.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> ExtractorKind;

    fn source(&self) -> DataSource;

    /// Whether the start routine needs its own worker task
    fn run_mode(&self) -> RunMode;

    fn series(&self) -> &[InstrumentSeries];

    fn gate(&self) -> &ExecutionGate;

    fn is_connected(&self) -> bool;

    /// Idempotent
    async fn connect(&mut self) -> Result<(), ExtractError>;

    /// Idempotent and infallible, also when `connect` never succeeded
    async fn disconnect(&mut self);

    /// Resolves raw symbols; returns how many series remain eligible for this run
    async fn resolve_symbols(&mut self) -> usize;

    /// Connects, resolves and runs the gated extraction
    async fn start(&mut self) -> Result<GateOutcome, ExtractError>;

    /// Best-effort graceful stop
    async fn stop(&mut self) {
        self.gate().request_stop();
        self.disconnect().await;
    }
}

/// Resolves `series` through `resolver`, batching by the `scope_param` additional param.
///
/// Sets `resolved_symbol` on every series that resolved and returns those, in order.
/// Each failure is logged with its series id; the series is excluded from the run.
pub async fn resolve_series(
    component: &str,
    resolver: &dyn SymbolResolver,
    series: &mut [InstrumentSeries],
    scope_param: Option<&str>,
    metrics: Option<&Metrics>,
) -> Vec<InstrumentSeries> {
    let mut batches: BTreeMap<Option<String>, Vec<usize>> = BTreeMap::new();
    for (idx, s) in series.iter().enumerate() {
        let scope = scope_param.and_then(|p| s.param_str(p)).map(str::to_string);
        batches.entry(scope).or_default().push(idx);
    }

    let mut resolved = Vec::new();
    let mut failures = 0u64;
    for (scope, indices) in batches {
        let ids: Vec<String> = indices
            .iter()
            .map(|&i| series[i].series_id().to_string())
            .collect();
        let mut resolution = resolver.resolve(&ids, scope.as_deref()).await;

        for idx in indices {
            let id = series[idx].series_id().to_string();
            let outcome = resolution.remove(&id).unwrap_or_else(|| {
                Err(ResolutionError::MissingHop {
                    series_id: id.clone(),
                    stage: "raw_symbol".to_string(),
                    key: id.clone(),
                })
            });
            match outcome {
                Ok(symbol) => {
                    series[idx].set_resolved_symbol(symbol);
                    resolved.push(idx);
                }
                Err(e) => {
                    failures += 1;
                    error!("{}: Excluding series {}: {}", component, id, e);
                }
            }
        }
    }

    if failures > 0
        && let Some(m) = metrics
        && let Some(first) = series.first()
    {
        m.inc_resolution_failures(first.data_source().as_str(), failures);
    }

    resolved.sort_unstable();
    info!(
        "{}: Resolved {}/{} series",
        component,
        resolved.len(),
        series.len()
    );
    resolved.into_iter().map(|i| series[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Resolution;

    struct TableResolver;

    #[async_trait]
    impl SymbolResolver for TableResolver {
        async fn resolve(&self, series_ids: &[String], scope: Option<&str>) -> Resolution {
            series_ids
                .iter()
                .map(|id| {
                    let result = match (id.as_str(), scope) {
                        ("CME.CL.1", Some("GLBX.MDP3")) => Ok("CLH5".to_string()),
                        ("CME.NG.1", Some("GLBX.MDP3")) => Ok("NGH5".to_string()),
                        _ => Err(ResolutionError::Vendor {
                            series_id: id.clone(),
                            reason: "not found".to_string(),
                        }),
                    };
                    (id.clone(), result)
                })
                .collect()
        }
    }

    fn series(id: &str) -> InstrumentSeries {
        InstrumentSeries::builder(id)
            .destination("db_primary")
            .param("dataset", serde_json::json!("GLBX.MDP3"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_prior_business_day_skips_weekend() {
        let monday = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        assert_eq!(
            prior_business_day(monday),
            NaiveDate::from_ymd_opt(2025, 1, 3).unwrap()
        );
        let friday = NaiveDate::from_ymd_opt(2025, 1, 3).unwrap();
        assert_eq!(
            prior_business_day(friday),
            NaiveDate::from_ymd_opt(2025, 1, 2).unwrap()
        );
    }

    #[test]
    fn test_date_range_defaults_and_overrides() {
        let window = GateWindow::starting_now(Duration::from_secs(60)).unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let friday = NaiveDate::from_ymd_opt(2025, 1, 3).unwrap();

        let params = ExtractorParams::new(window);
        assert_eq!(params.date_range(today), (friday, friday));

        let day = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let params = ExtractorParams::new(window).with_range(Some(day), Some(day));
        assert_eq!(params.date_range(today), (day, day));
    }

    #[tokio::test]
    async fn test_unresolvable_series_is_excluded() {
        let mut owned = vec![series("CME.CL.1"), series("CME.XX.1"), series("CME.NG.1")];
        let metrics = Metrics::new().unwrap();

        let resolved =
            resolve_series("Test", &TableResolver, &mut owned, Some("dataset"), Some(&metrics))
                .await;

        let ids: Vec<&str> = resolved.iter().map(|s| s.series_id()).collect();
        assert_eq!(ids, vec!["CME.CL.1", "CME.NG.1"]);
        assert_eq!(owned[0].resolved_symbol(), Some("CLH5"));
        assert_eq!(owned[1].resolved_symbol(), None);
        assert_eq!(owned[2].resolved_symbol(), Some("NGH5"));
        assert_eq!(
            metrics
                .resolution_failures_total
                .with_label_values(&["databento"])
                .get(),
            1.0
        );
    }
}
