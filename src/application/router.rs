use crate::domain::errors::RoutingError;
use crate::domain::message::NormalizedMessage;
use crate::domain::ports::OutputManager;
use crate::domain::series::InstrumentSeries;
use crate::infrastructure::observability::Metrics;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Sink family a destination name belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SinkKind {
    Database,
    Redis,
    File,
}

impl SinkKind {
    /// Substring classification, checked in order: `database`/`db`, `redis`, `file`
    pub fn classify(destination: &str) -> Option<Self> {
        let d = destination.to_ascii_lowercase();
        if d.contains("database") || d.contains("db") {
            Some(SinkKind::Database)
        } else if d.contains("redis") {
            Some(SinkKind::Redis)
        } else if d.contains("file") {
            Some(SinkKind::File)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Database => "database",
            SinkKind::Redis => "redis",
            SinkKind::File => "file",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-destination result of routing one message
#[derive(Debug, Default)]
pub struct RouteReport {
    pub delivered: Vec<String>,
    pub failed: Vec<(String, RoutingError)>,
    pub unrecognized: Vec<String>,
}

impl RouteReport {
    /// At least one destination accepted the message
    pub fn is_routed(&self) -> bool {
        !self.delivered.is_empty()
    }
}

/// Fans normalized messages out to every destination of a series.
///
/// One instance per process, shared by all extractors. Destinations are attempted in
/// declared order and a failing destination never blocks the ones after it.
pub struct OutputRouter {
    managers: HashMap<SinkKind, Arc<dyn OutputManager>>,
    metrics: Option<Metrics>,
}

#[derive(Default)]
pub struct OutputRouterBuilder {
    managers: HashMap<SinkKind, Arc<dyn OutputManager>>,
    metrics: Option<Metrics>,
}

impl OutputRouterBuilder {
    pub fn manager(mut self, kind: SinkKind, manager: Arc<dyn OutputManager>) -> Self {
        self.managers.insert(kind, manager);
        self
    }

    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> OutputRouter {
        OutputRouter {
            managers: self.managers,
            metrics: self.metrics,
        }
    }
}

impl OutputRouter {
    pub fn builder() -> OutputRouterBuilder {
        OutputRouterBuilder::default()
    }

    pub fn has_manager(&self, kind: SinkKind) -> bool {
        self.managers.contains_key(&kind)
    }

    pub async fn route(
        &self,
        message: &NormalizedMessage,
        series: &InstrumentSeries,
    ) -> RouteReport {
        let mut report = RouteReport::default();

        for destination in series.destinations() {
            let Some(kind) = SinkKind::classify(destination) else {
                warn!(
                    "OutputRouter: Unrecognized destination '{}' for series {}, not routed",
                    destination,
                    series.series_id()
                );
                if let Some(m) = &self.metrics {
                    m.unrecognized_destinations_total.inc();
                }
                report.unrecognized.push(destination.clone());
                continue;
            };

            let result = match self.managers.get(&kind) {
                Some(manager) => manager.save(destination, message, series).await,
                None => Err(RoutingError::NoManager {
                    sink: kind.to_string(),
                }),
            };

            match result {
                Ok(()) => {
                    debug!(
                        "OutputRouter: {} {} -> {}",
                        series.series_id(),
                        message.ts_event,
                        destination
                    );
                    if let Some(m) = &self.metrics {
                        m.inc_routed(message.vendor.as_str(), kind.as_str());
                    }
                    report.delivered.push(destination.clone());
                }
                Err(e) => {
                    error!(
                        "OutputRouter: Failed to route {} ({}) to {}: {}",
                        series.series_id(),
                        message.vendor,
                        destination,
                        e
                    );
                    if let Some(m) = &self.metrics {
                        m.inc_routing_failure(kind.as_str());
                    }
                    report.failed.push((destination.clone(), e));
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::series::{DataSource, SeriesType};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct Recording {
        calls: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl OutputManager for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn save(
            &self,
            destination: &str,
            _message: &NormalizedMessage,
            _series: &InstrumentSeries,
        ) -> Result<(), RoutingError> {
            self.calls.lock().unwrap().push(destination.to_string());
            if self.fail {
                Err(RoutingError::sink(destination, "connection refused"))
            } else {
                Ok(())
            }
        }
    }

    fn message() -> NormalizedMessage {
        NormalizedMessage::new(SeriesType::Future, DataSource::Onyx, "CLH5", Utc::now())
    }

    #[test]
    fn test_classify_destinations() {
        assert_eq!(SinkKind::classify("db_primary"), Some(SinkKind::Database));
        assert_eq!(SinkKind::classify("timeseries_database"), Some(SinkKind::Database));
        assert_eq!(SinkKind::classify("redis_cache"), Some(SinkKind::Redis));
        assert_eq!(SinkKind::classify("FILE_archive"), Some(SinkKind::File));
        assert_eq!(SinkKind::classify("unknown_sink"), None);
    }

    #[tokio::test]
    async fn test_failing_destination_does_not_block_next() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let metrics = Metrics::new().unwrap();
        let router = OutputRouter::builder()
            .manager(
                SinkKind::Database,
                Arc::new(Recording {
                    calls: calls.clone(),
                    fail: true,
                }),
            )
            .manager(
                SinkKind::Redis,
                Arc::new(Recording {
                    calls: calls.clone(),
                    fail: false,
                }),
            )
            .metrics(metrics.clone())
            .build();

        let series = InstrumentSeries::builder("CME.CL.1")
            .destinations(["db_primary", "redis_cache", "unknown_sink"])
            .build()
            .unwrap();

        let report = router.route(&message(), &series).await;
        assert_eq!(*calls.lock().unwrap(), vec!["db_primary", "redis_cache"]);
        assert_eq!(report.delivered, vec!["redis_cache"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.unrecognized, vec!["unknown_sink"]);
        assert!(report.is_routed());
        assert_eq!(metrics.unrecognized_destinations_total.get(), 1);
    }

    #[tokio::test]
    async fn test_missing_manager_is_a_routing_failure() {
        let router = OutputRouter::builder().build();
        let series = InstrumentSeries::builder("CME.CL.1")
            .destination("file_archive")
            .build()
            .unwrap();

        let report = router.route(&message(), &series).await;
        assert!(!report.is_routed());
        assert!(matches!(report.failed[0].1, RoutingError::NoManager { .. }));
    }
}
