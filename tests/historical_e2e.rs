mod common;

use chrono::NaiveDate;
use common::MockHttpServer;
use dataflow::application::extractor::{Extractor, ExtractorContext, ExtractorParams};
use dataflow::application::gate::{GateWindow, RunStatus};
use dataflow::config::{SinkEnvConfig, VendorEnvConfig};
use dataflow::domain::series::{DataSchema, DataSource, ExtractorKind, InstrumentSeries};
use dataflow::infrastructure::ServiceFactory;
use dataflow::infrastructure::observability::Metrics;
use dataflow::infrastructure::onyx::OnyxHistoricalExtractor;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn contracts(product: &str, months: &[&str]) -> String {
    let list: Vec<_> = months
        .iter()
        .enumerate()
        .map(|(i, month)| {
            json!({
                "symbol": format!("{}{}", product, month),
                "expiry": format!("209{}-06-30", i),
            })
        })
        .collect();
    serde_json::Value::Array(list).to_string()
}

fn bar(close: &str) -> String {
    json!([{
        "timestamp": "2025-01-02T00:00:00Z",
        "open": "70.10",
        "high": "71.25",
        "low": "69.80",
        "close": close,
        "volume": 1200
    }])
    .to_string()
}

fn routes() -> HashMap<String, String> {
    HashMap::from([
        (
            "/contracts?product_symbol=NAPEW".to_string(),
            contracts("NAPEW", &["M0", "M1"]),
        ),
        (
            "/contracts?product_symbol=EBOB".to_string(),
            contracts("EBOB", &["M0"]),
        ),
        ("/tickers/ohlc/NAPEWM0/1d".to_string(), bar("70.50")),
        ("/tickers/ohlc/NAPEWM1/1d".to_string(), bar("70.75")),
        ("/tickers/ohlc/EBOBM0/1d".to_string(), bar("81.00")),
    ])
}

fn series(id: &str) -> InstrumentSeries {
    InstrumentSeries::builder(id)
        .extractor_kind(ExtractorKind::Historical)
        .data_source(DataSource::Onyx)
        .data_schema(DataSchema::Ohlcv1d)
        .destination("file_archive")
        .build()
        .unwrap()
}

fn context(
    server: &MockHttpServer,
    storage: &std::path::Path,
    metrics: &Metrics,
    ids: &[&str],
) -> ExtractorContext {
    let vendors = VendorEnvConfig::from_vars(&HashMap::from([
        ("ONYX_URL".to_string(), server.url()),
        ("ONYX_API_KEY".to_string(), "test-key".to_string()),
    ]));
    let sinks = SinkEnvConfig::default().with_file_storage_path(storage);
    let day = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
    let window = GateWindow::starting_now(Duration::from_secs(10)).unwrap();

    ExtractorContext {
        series: ids.iter().map(|id| series(id)).collect(),
        params: ExtractorParams::new(window)
            .with_poll_interval(Duration::from_millis(50))
            .with_range(Some(day), Some(day)),
        router: Arc::new(ServiceFactory::create_router(&sinks, Some(metrics.clone()))),
        vendors,
        shutdown: CancellationToken::new(),
        metrics: Some(metrics.clone()),
    }
}

#[tokio::test]
async fn test_historical_run_routes_one_bar_per_series() {
    let server = MockHttpServer::start(routes()).await;
    let storage = tempfile::tempdir().unwrap();
    let metrics = Metrics::new().unwrap();

    let mut extractor = OnyxHistoricalExtractor::new(context(
        &server,
        storage.path(),
        &metrics,
        &["ONYX.NAPEW.1", "ONYX.NAPEW.2", "ONYX.EBOB.1"],
    ))
    .unwrap();

    let outcome = extractor.start().await.unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.jobs_done, 3);
    assert_eq!(outcome.iterations, 1);

    let resolved: Vec<Option<&str>> = extractor
        .series()
        .iter()
        .map(|s| s.resolved_symbol())
        .collect();
    assert_eq!(
        resolved,
        vec![Some("NAPEWM0"), Some("NAPEWM1"), Some("EBOBM0")]
    );

    let file = storage
        .path()
        .join("file_archive")
        .join("ohlcv-1d")
        .join("NAPEWM1.csv");
    let content = std::fs::read_to_string(file).unwrap();
    assert_eq!(content.lines().count(), 2);
    assert!(content.contains("70.75"));

    assert_eq!(server.hits("/tickers/ohlc/"), 3);
    assert!(
        server
            .requests()
            .iter()
            .any(|line| line.contains("start=2025-01-02&end=2025-01-02"))
    );
    assert_eq!(
        metrics
            .messages_routed_total
            .with_label_values(&["onyx", "file"])
            .get(),
        3.0
    );

    extractor.stop().await;
    assert!(!extractor.is_connected());
}

#[tokio::test]
async fn test_unresolvable_series_is_excluded_from_the_run() {
    let server = MockHttpServer::start(routes()).await;
    let storage = tempfile::tempdir().unwrap();
    let metrics = Metrics::new().unwrap();

    // EBOB only has one live contract
    let mut extractor = OnyxHistoricalExtractor::new(context(
        &server,
        storage.path(),
        &metrics,
        &["ONYX.NAPEW.1", "ONYX.EBOB.2"],
    ))
    .unwrap();

    let outcome = extractor.start().await.unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.jobs_done, 1);
    assert_eq!(server.hits("/tickers/ohlc/EBOB"), 0);
    assert_eq!(
        metrics
            .resolution_failures_total
            .with_label_values(&["onyx"])
            .get(),
        1.0
    );
}

#[tokio::test]
async fn test_no_resolvable_series_skips_the_gate() {
    let server = MockHttpServer::start(HashMap::new()).await;
    let storage = tempfile::tempdir().unwrap();
    let metrics = Metrics::new().unwrap();

    let mut extractor = OnyxHistoricalExtractor::new(context(
        &server,
        storage.path(),
        &metrics,
        &["ONYX.NAPEW.1", "ONYX.EBOB.1"],
    ))
    .unwrap();

    let outcome = extractor.start().await.unwrap();
    assert_eq!(outcome.status, RunStatus::Skipped);
    assert_eq!(outcome.jobs_done, 0);
    assert_eq!(server.hits("/tickers/ohlc/"), 0);
}

#[tokio::test]
async fn test_mbp1_series_is_rejected_at_construction() {
    let server = MockHttpServer::start(HashMap::new()).await;
    let storage = tempfile::tempdir().unwrap();
    let metrics = Metrics::new().unwrap();

    let mut ctx = context(&server, storage.path(), &metrics, &["ONYX.NAPEW.1"]);
    ctx.series = vec![
        InstrumentSeries::builder("ONYX.NAPEW.1")
            .extractor_kind(ExtractorKind::Historical)
            .data_source(DataSource::Onyx)
            .data_schema(DataSchema::Mbp1)
            .destination("file_archive")
            .build()
            .unwrap(),
    ];
    assert!(OnyxHistoricalExtractor::new(ctx).is_err());
}
