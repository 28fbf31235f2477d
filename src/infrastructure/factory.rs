use crate::application::orchestrator::ExtractorRegistry;
use crate::application::router::{OutputRouter, SinkKind};
use crate::config::SinkEnvConfig;
use crate::domain::series::{DataSource, ExtractorKind};
use crate::infrastructure::databento::DatabentoRealtimeExtractor;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::onyx::{OnyxHistoricalExtractor, OnyxRealtimeExtractor};
use crate::infrastructure::sinks::{DatabaseOutputManager, FileOutputManager, RedisOutputManager};
use std::sync::Arc;

pub struct ServiceFactory;

impl ServiceFactory {
    /// Every `(kind, vendor)` pair this build can extract
    pub fn default_registry() -> ExtractorRegistry {
        ExtractorRegistry::new()
            .register(
                ExtractorKind::Realtime,
                DataSource::Databento,
                DatabentoRealtimeExtractor::boxed,
            )
            .register(
                ExtractorKind::Realtime,
                DataSource::Onyx,
                OnyxRealtimeExtractor::boxed,
            )
            .register(
                ExtractorKind::Historical,
                DataSource::Onyx,
                OnyxHistoricalExtractor::boxed,
            )
    }

    /// Process-wide router with all three sink kinds. Sinks connect lazily.
    pub fn create_router(sinks: &SinkEnvConfig, metrics: Option<Metrics>) -> OutputRouter {
        let mut builder = OutputRouter::builder()
            .manager(
                SinkKind::Database,
                Arc::new(DatabaseOutputManager::new(sinks.clone())),
            )
            .manager(
                SinkKind::Redis,
                Arc::new(RedisOutputManager::new(sinks.clone())),
            )
            .manager(
                SinkKind::File,
                Arc::new(FileOutputManager::new(sinks.file_storage_path.clone())),
            );
        if let Some(metrics) = metrics {
            builder = builder.metrics(metrics);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_keys() {
        let registry = ServiceFactory::default_registry();
        assert!(registry.contains(ExtractorKind::Realtime, DataSource::Databento));
        assert!(registry.contains(ExtractorKind::Historical, DataSource::Onyx));
        assert!(!registry.contains(ExtractorKind::Historical, DataSource::Databento));
        assert!(!registry.contains(ExtractorKind::Realtime, DataSource::Bbg));
        assert_eq!(registry.keys().len(), 3);
    }

    #[test]
    fn test_router_has_every_sink() {
        let router = ServiceFactory::create_router(&SinkEnvConfig::default(), None);
        assert!(router.has_manager(SinkKind::Database));
        assert!(router.has_manager(SinkKind::Redis));
        assert!(router.has_manager(SinkKind::File));
    }
}
