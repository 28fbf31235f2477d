use async_trait::async_trait;
use dataflow::application::extractor::{Extractor, ExtractorContext, ExtractorParams};
use dataflow::application::gate::{
    ExecutionGate, GateOutcome, GateWindow, RunMode, RunStatus, TimeWindowGate,
};
use dataflow::application::orchestrator::{ExtractorRegistry, ServiceOrchestrator};
use dataflow::application::router::OutputRouter;
use dataflow::domain::errors::{ConfigurationError, ExtractError};
use dataflow::domain::series::{DataSchema, DataSource, ExtractorKind, InstrumentSeries};
use dataflow::infrastructure::observability::Metrics;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Journal {
    created: Vec<(ExtractorKind, DataSource, usize)>,
    stopped: Vec<DataSource>,
}

// Mock extractor: reports one job per series, or fails when asked to
struct MockExtractor {
    kind: ExtractorKind,
    source: DataSource,
    series: Vec<InstrumentSeries>,
    gate: ExecutionGate,
    journal: Arc<Mutex<Journal>>,
    fail: bool,
    connected: bool,
}

#[async_trait]
impl Extractor for MockExtractor {
    fn name(&self) -> &'static str {
        "MockExtractor"
    }
    fn kind(&self) -> ExtractorKind {
        self.kind
    }
    fn source(&self) -> DataSource {
        self.source
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
        self.connected = true;
        Ok(())
    }
    async fn disconnect(&mut self) {
        if self.connected {
            self.journal.lock().unwrap().stopped.push(self.source);
        }
        self.connected = false;
    }
    async fn resolve_symbols(&mut self) -> usize {
        self.series.len()
    }
    async fn start(&mut self) -> Result<GateOutcome, ExtractError> {
        self.connect().await?;
        if self.fail {
            return Err(ExtractError::connection("onyx", "refused"));
        }
        Ok(GateOutcome {
            status: RunStatus::Completed,
            iterations: 1,
            jobs_done: self.series.len() as u64,
        })
    }
}

fn mock_factory(
    journal: Arc<Mutex<Journal>>,
    fail: bool,
) -> impl Fn(ExtractorContext) -> Result<Box<dyn Extractor>, ConfigurationError> + Send + Sync {
    move |context: ExtractorContext| {
        let first = &context.series[0];
        let (kind, source) = (first.extractor_kind(), first.data_source());
        journal
            .lock()
            .unwrap()
            .created
            .push((kind, source, context.series.len()));
        let gate = context.execution_gate(
            "Mock",
            Arc::new(TimeWindowGate::new(context.params.window, Duration::from_millis(10))),
            RunMode::Inline,
        );
        let extractor: Box<dyn Extractor> = Box::new(MockExtractor {
            kind,
            source,
            series: context.series,
            gate,
            journal: journal.clone(),
            fail,
            connected: false,
        });
        Ok(extractor)
    }
}

fn series(id: &str, kind: ExtractorKind, source: DataSource) -> InstrumentSeries {
    InstrumentSeries::builder(id)
        .extractor_kind(kind)
        .data_source(source)
        .data_schema(if kind == ExtractorKind::Historical {
            DataSchema::Ohlcv1d
        } else {
            DataSchema::Mbp1
        })
        .destination("db_primary")
        .build()
        .unwrap()
}

fn mixed_series() -> Vec<InstrumentSeries> {
    vec![
        series("ONYX.NAPEW.1", ExtractorKind::Historical, DataSource::Onyx),
        series("CME.CL.1", ExtractorKind::Realtime, DataSource::Databento),
        series("ONYX.NAPEW.2", ExtractorKind::Historical, DataSource::Onyx),
        series("ONYX.EBOB.1", ExtractorKind::Historical, DataSource::Onyx),
        series("CME.NG.1", ExtractorKind::Realtime, DataSource::Databento),
    ]
}

fn orchestrator(registry: ExtractorRegistry) -> ServiceOrchestrator {
    let window = GateWindow::starting_now(Duration::from_secs(5)).unwrap();
    ServiceOrchestrator::builder()
        .registry(registry)
        .params(ExtractorParams::new(window).with_join_timeout(Duration::from_secs(1)))
        .router(Arc::new(OutputRouter::builder().build()))
        .build()
        .unwrap()
}

fn registry(journal: &Arc<Mutex<Journal>>, fail_onyx: bool) -> ExtractorRegistry {
    ExtractorRegistry::new()
        .register(
            ExtractorKind::Historical,
            DataSource::Onyx,
            mock_factory(journal.clone(), fail_onyx),
        )
        .register(
            ExtractorKind::Realtime,
            DataSource::Databento,
            mock_factory(journal.clone(), false),
        )
}

#[tokio::test]
async fn test_series_are_grouped_by_kind_and_vendor() {
    let journal = Arc::new(Mutex::new(Journal::default()));
    let mut orchestrator = orchestrator(registry(&journal, false));

    let count = orchestrator.initialize(mixed_series()).unwrap();
    assert_eq!(count, 2);

    let mut created = journal.lock().unwrap().created.clone();
    created.sort();
    assert_eq!(
        created,
        vec![
            (ExtractorKind::Realtime, DataSource::Databento, 2),
            (ExtractorKind::Historical, DataSource::Onyx, 3),
        ]
    );

    let onyx = orchestrator
        .extractors()
        .iter()
        .find(|e| e.source() == DataSource::Onyx)
        .unwrap();
    let ids: Vec<&str> = onyx.series().iter().map(|s| s.series_id()).collect();
    assert_eq!(ids, vec!["ONYX.NAPEW.1", "ONYX.NAPEW.2", "ONYX.EBOB.1"]);
}

#[tokio::test]
async fn test_unknown_extractor_key_fails_initialization() {
    let journal = Arc::new(Mutex::new(Journal::default()));
    let mut orchestrator = orchestrator(registry(&journal, false));

    let mut all = mixed_series();
    all.push(series("BBG.CO.1", ExtractorKind::Realtime, DataSource::Bbg));

    let err = orchestrator.initialize(all).unwrap_err();
    assert!(matches!(
        err,
        ConfigurationError::UnknownExtractor { ref data_source, .. } if data_source == "bbg"
    ));
}

#[tokio::test]
async fn test_second_initialize_is_rejected() {
    let journal = Arc::new(Mutex::new(Journal::default()));
    let mut orchestrator = orchestrator(registry(&journal, false));

    orchestrator.initialize(mixed_series()).unwrap();
    assert!(orchestrator.is_initialized());
    assert_eq!(
        orchestrator.initialize(mixed_series()).unwrap_err(),
        ConfigurationError::AlreadyInitialized
    );
}

#[tokio::test]
async fn test_empty_series_initializes_nothing() {
    let journal = Arc::new(Mutex::new(Journal::default()));
    let mut orchestrator = orchestrator(registry(&journal, false));

    assert_eq!(orchestrator.initialize(Vec::new()).unwrap(), 0);
    assert!(orchestrator.start().await.groups.is_empty());
}

#[tokio::test]
async fn test_failing_group_does_not_block_others_and_all_stop() {
    let journal = Arc::new(Mutex::new(Journal::default()));
    let metrics = Metrics::new().unwrap();
    let window = GateWindow::starting_now(Duration::from_secs(5)).unwrap();
    let orchestrator = ServiceOrchestrator::builder()
        .registry(registry(&journal, true))
        .params(ExtractorParams::new(window))
        .router(Arc::new(OutputRouter::builder().build()))
        .metrics(metrics.clone())
        .concurrent(true)
        .build()
        .unwrap();
    let shutdown = orchestrator.shutdown_handle();

    let summary = orchestrator.run(mixed_series()).await.unwrap();

    assert_eq!(summary.groups.len(), 2);
    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.jobs_done(), 2);
    assert!(shutdown.is_cancelled());
    assert_eq!(metrics.active_extractors.get(), 0.0);

    let mut stopped = journal.lock().unwrap().stopped.clone();
    stopped.sort();
    assert_eq!(stopped, vec![DataSource::Databento, DataSource::Onyx]);
}

#[test]
fn test_builder_requires_params_and_router() {
    let err = ServiceOrchestrator::builder().build().err().unwrap();
    assert!(matches!(err, ConfigurationError::MissingParameter { .. }));
}
