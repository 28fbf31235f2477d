use super::client::OnyxClient;
use super::normalizer::normalize_live;
use crate::application::extractor::{Extractor, ExtractorContext};
use crate::application::gate::{
    ExecutionGate, GateOutcome, RunMode, RunStatus, TimeWindowGate, WorkerContext,
};
use crate::application::router::OutputRouter;
use crate::domain::errors::{ConfigurationError, ExtractError};
use crate::domain::series::{DataSource, ExtractorKind, InstrumentSeries};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const ROOT_PAUSE: Duration = Duration::from_secs(1);

/// Polls the Onyx live ticker endpoint per root id.
///
/// No resolution hop: a record is routed when its `symbol` matches the series' configured
/// symbol, or its series id when none is configured.
pub struct OnyxRealtimeExtractor {
    series: Vec<InstrumentSeries>,
    client: Arc<OnyxClient>,
    router: Arc<OutputRouter>,
    gate: ExecutionGate,
    by_symbol: Arc<HashMap<String, InstrumentSeries>>,
    roots: Vec<String>,
    connected: bool,
}

impl OnyxRealtimeExtractor {
    pub fn new(context: ExtractorContext) -> Result<Self, ConfigurationError> {
        let client = Arc::new(OnyxClient::new(
            &context.vendors.onyx,
            context.vendors.http_max_retries,
        ));
        let time = TimeWindowGate::new(context.params.window, context.params.poll_interval)
            .with_quota(context.params.job_quota);
        let gate = context.execution_gate("OnyxRealtime", Arc::new(time), RunMode::Detached);

        Ok(Self {
            series: context.series,
            client,
            router: context.router,
            gate,
            by_symbol: Arc::new(HashMap::new()),
            roots: Vec::new(),
            connected: false,
        })
    }

    pub fn boxed(context: ExtractorContext) -> Result<Box<dyn Extractor>, ConfigurationError> {
        Ok(Box::new(Self::new(context)?))
    }

    /// Root ids polled each round, in order
    pub fn roots(&self) -> &[String] {
        &self.roots
    }
}

struct LivePoller {
    client: Arc<OnyxClient>,
    router: Arc<OutputRouter>,
    by_symbol: Arc<HashMap<String, InstrumentSeries>>,
    roots: Vec<String>,
}

impl LivePoller {
    async fn route_records(&self, records: &[Value]) -> u64 {
        let mut routed = 0;
        for record in records {
            let Some(symbol) = record.get("symbol").and_then(Value::as_str) else {
                continue;
            };
            let Some(series) = self.by_symbol.get(symbol) else {
                debug!("OnyxRealtimeExtractor: No series for live symbol {}", symbol);
                continue;
            };
            match normalize_live(record, series) {
                Ok(message) => {
                    if self.router.route(&message, series).await.is_routed() {
                        routed += 1;
                    }
                }
                Err(e) => warn!(
                    "OnyxRealtimeExtractor: Skipping malformed live record for {}: {}",
                    symbol, e
                ),
            }
        }
        routed
    }

    async fn run(self, ctx: WorkerContext) -> Result<(), ExtractError> {
        info!(
            "OnyxRealtimeExtractor: Polling {} roots for {} symbols",
            self.roots.len(),
            self.by_symbol.len()
        );
        while !ctx.is_cancelled() {
            for root in &self.roots {
                if ctx.is_cancelled() {
                    break;
                }
                match self.client.live(root).await {
                    Ok(records) => {
                        let routed = self.route_records(&records).await;
                        debug!(
                            "OnyxRealtimeExtractor: {} -> {} of {} records routed",
                            root,
                            routed,
                            records.len()
                        );
                        ctx.report_jobs(routed);
                    }
                    Err(e) => error!("OnyxRealtimeExtractor: Live poll for {} failed: {}", root, e),
                }

                tokio::select! {
                    _ = tokio::time::sleep(ROOT_PAUSE) => {}
                    _ = ctx.cancelled() => break,
                }
            }
        }
        info!("OnyxRealtimeExtractor: Poll loop stopped");
        Ok(())
    }
}

#[async_trait]
impl Extractor for OnyxRealtimeExtractor {
    fn name(&self) -> &'static str {
        "OnyxRealtimeExtractor"
    }

    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Realtime
    }

    fn source(&self) -> DataSource {
        DataSource::Onyx
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
        if !self.connected {
            if !self.client.has_credentials() {
                warn!("OnyxRealtimeExtractor: ONYX_API_KEY is empty, requests will be unauthenticated");
            }
            self.connected = true;
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    async fn resolve_symbols(&mut self) -> usize {
        let mut by_symbol = HashMap::new();
        let mut roots = BTreeSet::new();
        for series in &mut self.series {
            let symbol = series
                .resolved_symbol()
                .unwrap_or(series.series_id())
                .to_string();
            series.set_resolved_symbol(symbol.clone());
            if series.root_id().is_empty() {
                warn!(
                    "OnyxRealtimeExtractor: Series {} has no root id, not polled",
                    series.series_id()
                );
                continue;
            }
            roots.insert(series.root_id().to_string());
            by_symbol.insert(symbol, series.clone());
        }
        self.by_symbol = Arc::new(by_symbol);
        self.roots = roots.into_iter().collect();
        self.by_symbol.len()
    }

    async fn start(&mut self) -> Result<GateOutcome, ExtractError> {
        self.connect().await?;
        if self.resolve_symbols().await == 0 {
            warn!("OnyxRealtimeExtractor: No series with a root id, nothing to poll");
            return Ok(GateOutcome {
                status: RunStatus::Skipped,
                iterations: 0,
                jobs_done: 0,
            });
        }

        let poller = LivePoller {
            client: self.client.clone(),
            router: self.router.clone(),
            by_symbol: self.by_symbol.clone(),
            roots: self.roots.clone(),
        };
        self.gate.run_detached(move |ctx| poller.run(ctx)).await
    }
}
