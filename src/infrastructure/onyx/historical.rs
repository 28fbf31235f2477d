use super::client::OnyxClient;
use super::normalizer::normalize_ohlc;
use super::symbology::OnyxSymbolResolver;
use crate::application::extractor::{Extractor, ExtractorContext, ExtractorParams, resolve_series};
use crate::application::gate::{
    ExecutionGate, GateOutcome, InlineWork, RunMode, RunStatus, TimeAndJobGate,
    make_time_and_job_gate,
};
use crate::application::router::OutputRouter;
use crate::domain::errors::{ConfigurationError, ExtractError};
use crate::domain::ports::SymbolResolver;
use crate::domain::series::{DataSchema, DataSource, ExtractorKind, InstrumentSeries};
use crate::infrastructure::observability::Metrics;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Onyx bar period for a schema
pub fn onyx_period(schema: DataSchema) -> Option<&'static str> {
    match schema {
        DataSchema::Ohlcv1d => Some("1d"),
        DataSchema::Ohlcv1h => Some("1h"),
        DataSchema::Ohlcv1m => Some("1m"),
        DataSchema::Mbp1 | DataSchema::Mbo => None,
    }
}

/// Pulls one bounded range of bars per series and routes every bar.
pub struct OnyxHistoricalExtractor {
    series: Vec<InstrumentSeries>,
    resolved: Vec<InstrumentSeries>,
    client: Arc<OnyxClient>,
    resolver: Arc<dyn SymbolResolver>,
    router: Arc<OutputRouter>,
    params: ExtractorParams,
    gates: TimeAndJobGate,
    gate: ExecutionGate,
    metrics: Option<Metrics>,
    connected: bool,
}

impl OnyxHistoricalExtractor {
    pub fn new(context: ExtractorContext) -> Result<Self, ConfigurationError> {
        for s in &context.series {
            if onyx_period(s.data_schema()).is_none() {
                return Err(ConfigurationError::InvalidValue {
                    field: "data_schema".to_string(),
                    reason: format!(
                        "{} uses {}, Onyx history only serves ohlcv schemas",
                        s.series_id(),
                        s.data_schema()
                    ),
                });
            }
        }

        let client = Arc::new(OnyxClient::new(
            &context.vendors.onyx,
            context.vendors.http_max_retries,
        ));
        let resolver: Arc<dyn SymbolResolver> = Arc::new(OnyxSymbolResolver::new(client.clone()));
        let gates = make_time_and_job_gate(
            context.params.window,
            context.params.job_quota,
            context.params.poll_interval,
        );
        let gate = context.execution_gate("OnyxHistorical", gates.gate.clone(), RunMode::Inline);

        Ok(Self {
            series: context.series,
            resolved: Vec::new(),
            client,
            resolver,
            router: context.router,
            params: context.params,
            gates,
            gate,
            metrics: context.metrics,
            connected: false,
        })
    }

    pub fn boxed(context: ExtractorContext) -> Result<Box<dyn Extractor>, ConfigurationError> {
        Ok(Box::new(Self::new(context)?))
    }

    /// Replaces the contract-list resolver
    pub fn with_resolver(mut self, resolver: Arc<dyn SymbolResolver>) -> Self {
        self.resolver = resolver;
        self
    }
}

/// One pass over every resolved series for the date range
struct HistoricalPass<'a> {
    client: &'a OnyxClient,
    router: &'a OutputRouter,
    series: &'a [InstrumentSeries],
    start: NaiveDate,
    end: NaiveDate,
}

#[async_trait]
impl InlineWork for HistoricalPass<'_> {
    async fn run_once(&mut self) -> Result<u64, ExtractError> {
        let mut routed = 0u64;

        for series in self.series {
            let (Some(symbol), Some(period)) =
                (series.resolved_symbol(), onyx_period(series.data_schema()))
            else {
                continue;
            };

            let records = match self.client.ohlc(symbol, period, self.start, self.end).await {
                Ok(records) => records,
                Err(e) => {
                    error!(
                        "OnyxHistoricalExtractor: Error fetching {} ({}): {}",
                        series.series_id(),
                        symbol,
                        e
                    );
                    continue;
                }
            };

            for record in &records {
                match normalize_ohlc(record, series) {
                    Ok(message) => {
                        if self.router.route(&message, series).await.is_routed() {
                            routed += 1;
                        }
                    }
                    Err(e) => warn!(
                        "OnyxHistoricalExtractor: Skipping malformed record for {}: {}",
                        series.series_id(),
                        e
                    ),
                }
            }
        }

        info!(
            "OnyxHistoricalExtractor: Routed {} records for {} -> {}",
            routed, self.start, self.end
        );
        Ok(routed)
    }
}

#[async_trait]
impl Extractor for OnyxHistoricalExtractor {
    fn name(&self) -> &'static str {
        "OnyxHistoricalExtractor"
    }

    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Historical
    }

    fn source(&self) -> DataSource {
        DataSource::Onyx
    }

    fn run_mode(&self) -> RunMode {
        RunMode::Inline
    }

    fn series(&self) -> &[InstrumentSeries] {
        &self.series
    }

    fn gate(&self) -> &ExecutionGate {
        &self.gate
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), ExtractError> {
        if !self.connected {
            if !self.client.has_credentials() {
                warn!("OnyxHistoricalExtractor: ONYX_API_KEY is empty, requests will be unauthenticated");
            }
            self.connected = true;
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    async fn resolve_symbols(&mut self) -> usize {
        self.resolved = resolve_series(
            self.name(),
            self.resolver.as_ref(),
            &mut self.series,
            None,
            self.metrics.as_ref(),
        )
        .await;
        self.resolved.len()
    }

    async fn start(&mut self) -> Result<GateOutcome, ExtractError> {
        self.connect().await?;
        let eligible = self.resolve_symbols().await;
        if eligible == 0 {
            warn!("OnyxHistoricalExtractor: No resolvable series, nothing to extract");
            return Ok(GateOutcome {
                status: RunStatus::Skipped,
                iterations: 0,
                jobs_done: 0,
            });
        }

        let quota = self.params.job_quota.unwrap_or(eligible as u64);
        self.gates.jobs.set_quota(Some(quota));

        let (start, end) = self.params.date_range(Utc::now().date_naive());
        info!(
            "OnyxHistoricalExtractor: Extracting {} series for {} -> {} (quota {})",
            eligible, start, end, quota
        );

        let mut pass = HistoricalPass {
            client: &self.client,
            router: &self.router,
            series: &self.resolved,
            start,
            end,
        };
        self.gate.run_inline(&mut pass).await
    }
}
