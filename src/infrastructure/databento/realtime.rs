use super::hist_client::DatabentoHistClient;
use super::live_client::{DatabentoLiveConnector, LiveFeed, LiveFeedConnector, LiveRecord};
use super::normalizer::{normalize_mbp1, normalize_ohlcv};
use super::symbology::DatabentoSymbolResolver;
use crate::application::extractor::{Extractor, ExtractorContext, resolve_series};
use crate::application::gate::{
    ExecutionGate, GateOutcome, RunMode, RunStatus, TimeWindowGate, WorkerContext,
};
use crate::application::router::OutputRouter;
use crate::domain::errors::{ConfigurationError, ExtractError};
use crate::domain::message::NormalizedMessage;
use crate::domain::ports::SymbolResolver;
use crate::domain::series::{DataSchema, DataSource, ExtractorKind, InstrumentSeries};
use crate::infrastructure::observability::Metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DATASET_PARAM: &str = "dataset";
const MAX_BACKOFF_SECS: u64 = 60;

/// Streams Databento live sessions, one per `(dataset, schema)` channel.
pub struct DatabentoRealtimeExtractor {
    series: Vec<InstrumentSeries>,
    resolved: Vec<InstrumentSeries>,
    api_key: String,
    connector: Arc<dyn LiveFeedConnector>,
    resolver: Arc<dyn SymbolResolver>,
    router: Arc<OutputRouter>,
    gate: ExecutionGate,
    metrics: Option<Metrics>,
    connected: bool,
}

impl DatabentoRealtimeExtractor {
    pub fn new(context: ExtractorContext) -> Result<Self, ConfigurationError> {
        for s in &context.series {
            if s.param_str(DATASET_PARAM).is_none() {
                return Err(ConfigurationError::MissingParameter {
                    parameter: DATASET_PARAM.to_string(),
                    context: s.series_id().to_string(),
                });
            }
            if s.data_schema() == DataSchema::Mbo {
                return Err(ConfigurationError::InvalidValue {
                    field: "data_schema".to_string(),
                    reason: format!("{} uses mbo, which has no sink record type", s.series_id()),
                });
            }
        }

        let databento = &context.vendors.databento;
        let hist = Arc::new(DatabentoHistClient::new(
            databento,
            context.vendors.http_max_retries,
        ));
        let time = TimeWindowGate::new(context.params.window, context.params.poll_interval)
            .with_quota(context.params.job_quota);
        let gate =
            context.execution_gate("DatabentoRealtime", Arc::new(time), RunMode::Detached);

        Ok(Self {
            series: context.series,
            resolved: Vec::new(),
            api_key: databento.api_key.clone(),
            connector: Arc::new(DatabentoLiveConnector::new(databento.api_key.clone())),
            resolver: Arc::new(DatabentoSymbolResolver::new(hist)),
            router: context.router,
            gate,
            metrics: context.metrics,
            connected: false,
        })
    }

    pub fn boxed(context: ExtractorContext) -> Result<Box<dyn Extractor>, ConfigurationError> {
        Ok(Box::new(Self::new(context)?))
    }

    pub fn with_connector(mut self, connector: Arc<dyn LiveFeedConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn SymbolResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Resolved raw symbols per `(dataset, schema)` channel
    pub fn subscriptions(&self) -> BTreeMap<(String, DataSchema), Vec<String>> {
        let mut channels: BTreeMap<(String, DataSchema), Vec<String>> = BTreeMap::new();
        for s in &self.resolved {
            let (Some(dataset), Some(symbol)) = (s.param_str(DATASET_PARAM), s.resolved_symbol())
            else {
                continue;
            };
            let symbols = channels
                .entry((dataset.to_string(), s.data_schema()))
                .or_default();
            if !symbols.iter().any(|existing| existing == symbol) {
                symbols.push(symbol.to_string());
            }
        }
        channels
    }

    fn sessions(&self) -> Vec<StreamSession> {
        self.subscriptions()
            .into_iter()
            .map(|((dataset, schema), symbols)| {
                let mut by_symbol: HashMap<String, Vec<InstrumentSeries>> = HashMap::new();
                for s in &self.resolved {
                    if s.param_str(DATASET_PARAM) == Some(dataset.as_str())
                        && s.data_schema() == schema
                        && let Some(symbol) = s.resolved_symbol()
                    {
                        by_symbol.entry(symbol.to_string()).or_default().push(s.clone());
                    }
                }
                StreamSession {
                    dataset,
                    schema,
                    symbols,
                    by_symbol,
                    connector: self.connector.clone(),
                    router: self.router.clone(),
                    metrics: self.metrics.clone(),
                    symbol_cache: HashMap::new(),
                }
            })
            .collect()
    }
}

/// Receive loop for one channel. Owns its instrument-id cache.
pub(crate) struct StreamSession {
    dataset: String,
    schema: DataSchema,
    symbols: Vec<String>,
    by_symbol: HashMap<String, Vec<InstrumentSeries>>,
    connector: Arc<dyn LiveFeedConnector>,
    router: Arc<OutputRouter>,
    metrics: Option<Metrics>,
    symbol_cache: HashMap<u32, String>,
}

impl StreamSession {
    fn label(&self) -> String {
        format!("{}/{}", self.dataset, self.schema)
    }

    async fn route_all<F>(&self, instrument_id: u32, normalize: F) -> u64
    where
        F: Fn(&str, &InstrumentSeries) -> Result<NormalizedMessage, String>,
    {
        let Some(symbol) = self.symbol_cache.get(&instrument_id) else {
            debug!(
                "DatabentoRealtimeExtractor: {} record for unmapped instrument {}",
                self.label(),
                instrument_id
            );
            return 0;
        };
        let Some(targets) = self.by_symbol.get(symbol) else {
            return 0;
        };

        let mut routed = 0;
        for series in targets {
            match normalize(symbol, series) {
                Ok(message) => {
                    if self.router.route(&message, series).await.is_routed() {
                        routed += 1;
                    }
                }
                Err(e) => warn!(
                    "DatabentoRealtimeExtractor: Skipping record for {}: {}",
                    series.series_id(),
                    e
                ),
            }
        }
        routed
    }

    /// Dispatches one record; returns how many messages were routed
    pub(crate) async fn handle(&mut self, record: LiveRecord) -> u64 {
        match record {
            LiveRecord::System(msg) => {
                debug!("DatabentoRealtimeExtractor: {} system: {}", self.label(), msg);
                0
            }
            LiveRecord::Error(msg) => {
                error!("DatabentoRealtimeExtractor: {} gateway error: {}", self.label(), msg);
                0
            }
            LiveRecord::SymbolMapping {
                instrument_id,
                raw_symbol,
            } => {
                debug!(
                    "DatabentoRealtimeExtractor: {} maps {} -> {}",
                    self.label(),
                    instrument_id,
                    raw_symbol
                );
                self.symbol_cache.insert(instrument_id, raw_symbol);
                0
            }
            LiveRecord::Mbp1(book) if self.schema == DataSchema::Mbp1 => {
                self.route_all(book.instrument_id, |symbol, series| {
                    Ok(normalize_mbp1(&book, symbol, series))
                })
                .await
            }
            LiveRecord::Ohlcv(bar) if self.schema.is_ohlcv() => {
                self.route_all(bar.instrument_id, |symbol, series| {
                    normalize_ohlcv(&bar, symbol, series)
                })
                .await
            }
            LiveRecord::Mbp1(_) | LiveRecord::Ohlcv(_) | LiveRecord::Other => 0,
        }
    }

    async fn open(&self) -> Result<Box<dyn LiveFeed>, ExtractError> {
        let mut feed = self.connector.open(&self.dataset).await?;
        feed.subscribe(self.schema, &self.symbols).await?;
        feed.start().await?;
        info!(
            "DatabentoRealtimeExtractor: Streaming {} symbols on {}",
            self.symbols.len(),
            self.label()
        );
        Ok(feed)
    }

    /// Streams until the session ends, fails, or the worker is cancelled
    async fn stream(
        &mut self,
        feed: &mut Box<dyn LiveFeed>,
        ctx: &WorkerContext,
        last_seen: &mut Option<DateTime<Utc>>,
    ) -> Result<(), ExtractError> {
        loop {
            let next = tokio::select! {
                next = feed.next_record() => next,
                _ = ctx.cancelled() => return Ok(()),
            };
            match next? {
                Some(record) => {
                    *last_seen = Some(Utc::now());
                    let routed = self.handle(record).await;
                    ctx.report_jobs(routed);
                }
                None => {
                    warn!("DatabentoRealtimeExtractor: {} session ended by gateway", self.label());
                    return Ok(());
                }
            }
        }
    }

    async fn run(mut self, ctx: WorkerContext) -> Result<(), ExtractError> {
        let mut backoff = 1;
        let mut last_seen: Option<DateTime<Utc>> = None;
        // Set once a session has streamed; only then is a retry a reconnect
        let mut streamed = false;

        while !ctx.is_cancelled() {
            match self.open().await {
                Ok(mut feed) => {
                    if streamed {
                        let gap_start = last_seen
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "unknown".to_string());
                        warn!(
                            "DatabentoRealtimeExtractor: Reconnected {}, possible data gap {} -> {}",
                            self.label(),
                            gap_start,
                            Utc::now().to_rfc3339()
                        );
                    }
                    streamed = true;
                    backoff = 1;
                    let result = self.stream(&mut feed, &ctx, &mut last_seen).await;
                    feed.close().await;
                    if let Err(e) = result {
                        error!("DatabentoRealtimeExtractor: {} stream error: {}", self.label(), e);
                    }
                }
                Err(e) => error!("DatabentoRealtimeExtractor: {} connect failed: {}", self.label(), e),
            }

            if ctx.is_cancelled() {
                break;
            }
            if streamed && let Some(m) = &self.metrics {
                m.inc_reconnects(DataSource::Databento.as_str());
            }
            let jitter = rand::rng().random_range(0..500);
            let delay = Duration::from_secs(backoff) + Duration::from_millis(jitter);
            warn!(
                "DatabentoRealtimeExtractor: {} {} in {:?}",
                if streamed { "Reconnecting" } else { "Retrying connect for" },
                self.label(),
                delay
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancelled() => break,
            }
            backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
        }

        info!("DatabentoRealtimeExtractor: {} stopped", self.label());
        Ok(())
    }
}

#[async_trait]
impl Extractor for DatabentoRealtimeExtractor {
    fn name(&self) -> &'static str {
        "DatabentoRealtimeExtractor"
    }

    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Realtime
    }

    fn source(&self) -> DataSource {
        DataSource::Databento
    }

    fn run_mode(&self) -> RunMode {
        RunMode::Detached
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
        if self.connected {
            return Ok(());
        }
        if self.api_key.is_empty() {
            return Err(ExtractError::connection(
                DataSource::Databento.as_str(),
                "DATABENTO_API_KEY is not set",
            ));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.connected {
            info!("DatabentoRealtimeExtractor: Disconnected");
        }
        self.connected = false;
    }

    async fn resolve_symbols(&mut self) -> usize {
        self.resolved = resolve_series(
            self.name(),
            self.resolver.as_ref(),
            &mut self.series,
            Some(DATASET_PARAM),
            self.metrics.as_ref(),
        )
        .await;
        self.resolved.len()
    }

    async fn start(&mut self) -> Result<GateOutcome, ExtractError> {
        let skipped = GateOutcome {
            status: RunStatus::Skipped,
            iterations: 0,
            jobs_done: 0,
        };
        if let Err(e) = self.connect().await {
            error!("DatabentoRealtimeExtractor: {}", e);
            return Ok(skipped);
        }
        if self.resolve_symbols().await == 0 {
            warn!("DatabentoRealtimeExtractor: No resolvable series, nothing to stream");
            return Ok(skipped);
        }

        let sessions = self.sessions();
        info!(
            "DatabentoRealtimeExtractor: {} channels for {} series",
            sessions.len(),
            self.resolved.len()
        );
        self.gate
            .run_detached(move |ctx| async move {
                join_all(sessions.into_iter().map(|s| s.run(ctx.clone()))).await;
                Ok(())
            })
            .await
    }
}
