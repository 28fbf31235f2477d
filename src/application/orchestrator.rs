//! Groups series by (extractor kind, vendor) and drives one extractor per group.

use crate::application::extractor::{Extractor, ExtractorContext, ExtractorParams};
use crate::application::gate::{GateOutcome, RunStatus};
use crate::application::router::OutputRouter;
use crate::config::VendorEnvConfig;
use crate::domain::errors::ConfigurationError;
use crate::domain::series::{DataSource, ExtractorKind, InstrumentSeries};
use crate::infrastructure::observability::Metrics;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub type ExtractorFactoryFn =
    Arc<dyn Fn(ExtractorContext) -> Result<Box<dyn Extractor>, ConfigurationError> + Send + Sync>;

/// Init-time table from `(kind, vendor)` to an extractor constructor
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    factories: HashMap<(ExtractorKind, DataSource), ExtractorFactoryFn>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, kind: ExtractorKind, source: DataSource, factory: F) -> Self
    where
        F: Fn(ExtractorContext) -> Result<Box<dyn Extractor>, ConfigurationError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert((kind, source), Arc::new(factory));
        self
    }

    pub fn contains(&self, kind: ExtractorKind, source: DataSource) -> bool {
        self.factories.contains_key(&(kind, source))
    }

    pub fn create(
        &self,
        kind: ExtractorKind,
        source: DataSource,
        context: ExtractorContext,
    ) -> Result<Box<dyn Extractor>, ConfigurationError> {
        let factory = self.factories.get(&(kind, source)).ok_or_else(|| {
            ConfigurationError::UnknownExtractor {
                kind: kind.to_string(),
                data_source: source.to_string(),
            }
        })?;
        factory(context)
    }

    pub fn keys(&self) -> Vec<(ExtractorKind, DataSource)> {
        let mut keys: Vec<_> = self.factories.keys().copied().collect();
        keys.sort();
        keys
    }
}

/// Result of starting one service group
#[derive(Debug)]
pub struct GroupReport {
    pub extractor: &'static str,
    pub kind: ExtractorKind,
    pub source: DataSource,
    pub series: usize,
    pub outcome: Result<GateOutcome, String>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub groups: Vec<GroupReport>,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.groups.iter().filter(|g| g.outcome.is_err()).count()
    }

    pub fn jobs_done(&self) -> u64 {
        self.groups
            .iter()
            .filter_map(|g| g.outcome.as_ref().ok())
            .map(|o| o.jobs_done)
            .sum()
    }
}

/// Lifecycle owner of all extractors in one run.
///
/// Initialize once, start, then stop on every exit path. `run` does all three.
pub struct ServiceOrchestrator {
    registry: ExtractorRegistry,
    params: ExtractorParams,
    router: Arc<OutputRouter>,
    vendors: VendorEnvConfig,
    metrics: Option<Metrics>,
    shutdown: CancellationToken,
    concurrent: bool,
    extractors: Vec<Box<dyn Extractor>>,
    initialized: bool,
}

pub struct ServiceOrchestratorBuilder {
    registry: ExtractorRegistry,
    params: Option<ExtractorParams>,
    router: Option<Arc<OutputRouter>>,
    vendors: VendorEnvConfig,
    metrics: Option<Metrics>,
    shutdown: Option<CancellationToken>,
    concurrent: bool,
}

impl ServiceOrchestratorBuilder {
    pub fn registry(mut self, registry: ExtractorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn params(mut self, params: ExtractorParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn router(mut self, router: Arc<OutputRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn vendors(mut self, vendors: VendorEnvConfig) -> Self {
        self.vendors = vendors;
        self
    }

    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Start groups concurrently instead of one after another
    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn build(self) -> Result<ServiceOrchestrator, ConfigurationError> {
        let missing = |parameter: &str| ConfigurationError::MissingParameter {
            parameter: parameter.to_string(),
            context: "ServiceOrchestrator".to_string(),
        };

        Ok(ServiceOrchestrator {
            registry: self.registry,
            params: self.params.ok_or_else(|| missing("params"))?,
            router: self.router.ok_or_else(|| missing("router"))?,
            vendors: self.vendors,
            metrics: self.metrics,
            shutdown: self.shutdown.unwrap_or_default(),
            concurrent: self.concurrent,
            extractors: Vec::new(),
            initialized: false,
        })
    }
}

impl ServiceOrchestrator {
    pub fn builder() -> ServiceOrchestratorBuilder {
        ServiceOrchestratorBuilder {
            registry: ExtractorRegistry::new(),
            params: None,
            router: None,
            vendors: VendorEnvConfig::default(),
            metrics: None,
            shutdown: None,
            concurrent: false,
        }
    }

    /// Token that stops every gate of this orchestrator when cancelled
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn extractors(&self) -> &[Box<dyn Extractor>] {
        &self.extractors
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Builds one extractor per `(kind, vendor)` group.
    ///
    /// An unknown key fails the whole initialization. A second call is rejected.
    pub fn initialize(&mut self, series: Vec<InstrumentSeries>) -> Result<usize, ConfigurationError> {
        if self.initialized {
            return Err(ConfigurationError::AlreadyInitialized);
        }
        if series.is_empty() {
            warn!("ServiceOrchestrator: No series configured, nothing to run");
            self.initialized = true;
            return Ok(0);
        }

        let mut groups: BTreeMap<(ExtractorKind, DataSource), Vec<InstrumentSeries>> =
            BTreeMap::new();
        for s in series {
            groups
                .entry((s.extractor_kind(), s.data_source()))
                .or_default()
                .push(s);
        }

        let mut extractors = Vec::with_capacity(groups.len());
        for ((kind, source), group) in groups {
            let size = group.len();
            let context = ExtractorContext {
                series: group,
                params: self.params.clone(),
                router: self.router.clone(),
                vendors: self.vendors.clone(),
                shutdown: self.shutdown.clone(),
                metrics: self.metrics.clone(),
            };
            let extractor = self.registry.create(kind, source, context).inspect_err(|e| {
                error!("ServiceOrchestrator: Initialization failed: {}", e);
            })?;
            info!(
                "ServiceOrchestrator: Group ({}, {}) -> {} with {} series",
                kind,
                source,
                extractor.name(),
                size
            );
            extractors.push(extractor);
        }

        info!("ServiceOrchestrator: {} services initialized", extractors.len());
        self.extractors = extractors;
        self.initialized = true;
        Ok(self.extractors.len())
    }

    async fn start_one(extractor: &mut dyn Extractor, metrics: Option<&Metrics>) -> GroupReport {
        info!(
            "ServiceOrchestrator: Starting {} ({} series)",
            extractor.name(),
            extractor.series().len()
        );
        if let Some(m) = metrics {
            m.active_extractors.inc();
        }
        let result = extractor.start().await;
        if let Some(m) = metrics {
            m.active_extractors.dec();
        }

        let outcome = match result {
            Ok(outcome) => {
                if outcome.status == RunStatus::Skipped {
                    warn!("ServiceOrchestrator: {} skipped by its gate", extractor.name());
                } else {
                    info!(
                        "ServiceOrchestrator: {} finished, {} jobs done",
                        extractor.name(),
                        outcome.jobs_done
                    );
                }
                Ok(outcome)
            }
            Err(e) => {
                error!("ServiceOrchestrator: {} failed: {}", extractor.name(), e);
                Err(e.to_string())
            }
        };

        GroupReport {
            extractor: extractor.name(),
            kind: extractor.kind(),
            source: extractor.source(),
            series: extractor.series().len(),
            outcome,
        }
    }

    /// Starts every group. A failing group is logged and never blocks the others.
    pub async fn start(&mut self) -> RunSummary {
        let metrics = self.metrics.clone();
        let groups = if self.concurrent {
            join_all(
                self.extractors
                    .iter_mut()
                    .map(|e| Self::start_one(e.as_mut(), metrics.as_ref())),
            )
            .await
        } else {
            let mut reports = Vec::with_capacity(self.extractors.len());
            for extractor in self.extractors.iter_mut() {
                reports.push(Self::start_one(extractor.as_mut(), metrics.as_ref()).await);
            }
            reports
        };
        RunSummary { groups }
    }

    /// Stops every extractor, each bounded by the join timeout
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        let timeout = self.params.join_timeout;
        for extractor in self.extractors.iter_mut() {
            let name = extractor.name();
            if tokio::time::timeout(timeout, extractor.stop()).await.is_err() {
                warn!(
                    "ServiceOrchestrator: {} did not stop within {:?}",
                    name, timeout
                );
            } else {
                info!("ServiceOrchestrator: Service {} stopped", name);
            }
        }
    }

    /// Scoped run: initialize, start, and always stop
    pub async fn run(
        mut self,
        series: Vec<InstrumentSeries>,
    ) -> Result<RunSummary, ConfigurationError> {
        if let Err(e) = self.initialize(series) {
            self.stop().await;
            return Err(e);
        }
        let summary = self.start().await;
        self.stop().await;
        Ok(summary)
    }
}

impl Drop for ServiceOrchestrator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
