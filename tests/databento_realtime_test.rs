use async_trait::async_trait;
use dataflow::application::extractor::{Extractor, ExtractorContext, ExtractorParams};
use dataflow::application::gate::{GateWindow, RunStatus};
use dataflow::application::router::{OutputRouter, SinkKind};
use dataflow::config::VendorEnvConfig;
use dataflow::domain::errors::{ExtractError, ResolutionError, RoutingError};
use dataflow::domain::message::NormalizedMessage;
use dataflow::domain::ports::{OutputManager, Resolution, SymbolResolver};
use dataflow::domain::series::{DataSchema, DataSource, ExtractorKind, InstrumentSeries};
use dataflow::infrastructure::databento::normalizer::TopOfBook;
use dataflow::infrastructure::databento::{
    DatabentoRealtimeExtractor, LiveFeed, LiveFeedConnector, LiveRecord,
};
use dataflow::infrastructure::observability::Metrics;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// Mock feed: replays its records, then ends the session or stays silent
struct ScriptedFeed {
    records: VecDeque<LiveRecord>,
    hang_when_drained: bool,
    subscribed: Arc<Mutex<Vec<(DataSchema, Vec<String>)>>>,
}

#[async_trait]
impl LiveFeed for ScriptedFeed {
    async fn subscribe(&mut self, schema: DataSchema, symbols: &[String]) -> Result<(), ExtractError> {
        self.subscribed.lock().unwrap().push((schema, symbols.to_vec()));
        Ok(())
    }

    async fn start(&mut self) -> Result<(), ExtractError> {
        Ok(())
    }

    async fn next_record(&mut self) -> Result<Option<LiveRecord>, ExtractError> {
        match self.records.pop_front() {
            Some(record) => Ok(Some(record)),
            None if self.hang_when_drained => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn close(&mut self) {}
}

/// Hands out one scripted session per `open`; fails when `sessions` is empty
#[derive(Default)]
struct ScriptedConnector {
    sessions: Mutex<VecDeque<(Vec<LiveRecord>, bool)>>,
    opens: AtomicUsize,
    subscribed: Arc<Mutex<Vec<(DataSchema, Vec<String>)>>>,
}

#[async_trait]
impl LiveFeedConnector for ScriptedConnector {
    async fn open(&self, _dataset: &str) -> Result<Box<dyn LiveFeed>, ExtractError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let Some((records, hang_when_drained)) = self.sessions.lock().unwrap().pop_front() else {
            return Err(ExtractError::connection("databento", "gateway unreachable"));
        };
        Ok(Box::new(ScriptedFeed {
            records: records.into(),
            hang_when_drained,
            subscribed: self.subscribed.clone(),
        }))
    }
}

struct FixedResolver;

#[async_trait]
impl SymbolResolver for FixedResolver {
    async fn resolve(&self, series_ids: &[String], _scope: Option<&str>) -> Resolution {
        series_ids
            .iter()
            .map(|id| {
                let outcome = match id.as_str() {
                    "CME.CL.1" => Ok("CLH5".to_string()),
                    _ => Err(ResolutionError::Vendor {
                        series_id: id.clone(),
                        reason: "unknown".to_string(),
                    }),
                };
                (id.clone(), outcome)
            })
            .collect()
    }
}

struct Capture {
    saved: Arc<Mutex<Vec<NormalizedMessage>>>,
}

#[async_trait]
impl OutputManager for Capture {
    fn name(&self) -> &'static str {
        "capture"
    }

    async fn save(
        &self,
        _destination: &str,
        message: &NormalizedMessage,
        _series: &InstrumentSeries,
    ) -> Result<(), RoutingError> {
        self.saved.lock().unwrap().push(message.clone());
        Ok(())
    }
}

fn book(bid_px: i64) -> LiveRecord {
    LiveRecord::Mbp1(TopOfBook {
        instrument_id: 42,
        ts_event: 1_735_819_200_000_000_000,
        bid_px,
        ask_px: bid_px + 10_000_000,
        bid_sz: 3,
        ask_sz: 4,
        bid_ct: 1,
        ask_ct: 1,
    })
}

fn mapping() -> LiveRecord {
    LiveRecord::SymbolMapping {
        instrument_id: 42,
        raw_symbol: "CLH5".to_string(),
    }
}

fn extractor(
    connector: Arc<ScriptedConnector>,
    saved: Arc<Mutex<Vec<NormalizedMessage>>>,
    metrics: &Metrics,
    window: Duration,
    quota: Option<u64>,
) -> DatabentoRealtimeExtractor {
    let series = InstrumentSeries::builder("CME.CL.1")
        .extractor_kind(ExtractorKind::Realtime)
        .data_source(DataSource::Databento)
        .data_schema(DataSchema::Mbp1)
        .destination("db_primary")
        .param("dataset", serde_json::json!("GLBX.MDP3"))
        .build()
        .unwrap();
    let router = OutputRouter::builder()
        .manager(SinkKind::Database, Arc::new(Capture { saved }))
        .metrics(metrics.clone())
        .build();
    let vendors = VendorEnvConfig::from_vars(&HashMap::from([(
        "DATABENTO_API_KEY".to_string(),
        "db-test".to_string(),
    )]));

    DatabentoRealtimeExtractor::new(ExtractorContext {
        series: vec![series],
        params: ExtractorParams::new(GateWindow::starting_now(window).unwrap())
            .with_poll_interval(Duration::from_millis(50))
            .with_join_timeout(Duration::from_secs(2))
            .with_job_quota(quota),
        router: Arc::new(router),
        vendors,
        shutdown: CancellationToken::new(),
        metrics: Some(metrics.clone()),
    })
    .unwrap()
    .with_connector(connector)
    .with_resolver(Arc::new(FixedResolver))
}

fn reconnects(metrics: &Metrics) -> f64 {
    metrics
        .stream_reconnects_total
        .with_label_values(&["databento"])
        .get()
}

#[tokio::test]
async fn test_session_reconnects_after_gateway_ends_stream() {
    let connector = Arc::new(ScriptedConnector::default());
    connector.sessions.lock().unwrap().extend([
        (vec![mapping(), book(71_250_000_000)], false),
        (vec![mapping(), book(71_300_000_000)], true),
    ]);
    let saved = Arc::new(Mutex::new(Vec::new()));
    let metrics = Metrics::new().unwrap();
    let mut extractor = extractor(
        connector.clone(),
        saved.clone(),
        &metrics,
        Duration::from_secs(20),
        Some(2),
    );

    let outcome = tokio::time::timeout(Duration::from_secs(10), extractor.start())
        .await
        .expect("quota should close the gate and stop the session")
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.jobs_done, 2);
    assert_eq!(connector.opens.load(Ordering::SeqCst), 2);
    assert_eq!(reconnects(&metrics), 1.0);

    let subscribed = connector.subscribed.lock().unwrap().clone();
    assert_eq!(subscribed.len(), 2);
    assert_eq!(subscribed[0], (DataSchema::Mbp1, vec!["CLH5".to_string()]));

    let saved = saved.lock().unwrap();
    assert_eq!(saved.len(), 2);
    assert!(saved.iter().all(|m| m.symbol == "CLH5"));

    extractor.stop().await;
    assert!(!extractor.is_connected());
}

#[tokio::test]
async fn test_initial_connect_failures_are_not_reconnects() {
    let connector = Arc::new(ScriptedConnector::default());
    let metrics = Metrics::new().unwrap();
    let mut extractor = extractor(
        connector.clone(),
        Arc::new(Mutex::new(Vec::new())),
        &metrics,
        Duration::from_millis(1500),
        None,
    );

    let outcome = tokio::time::timeout(Duration::from_secs(6), extractor.start())
        .await
        .expect("window end should stop the retry loop")
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.jobs_done, 0);
    assert!(connector.opens.load(Ordering::SeqCst) >= 1);
    assert_eq!(reconnects(&metrics), 0.0);
}
