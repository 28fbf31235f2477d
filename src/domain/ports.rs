use crate::domain::errors::{ResolutionError, RoutingError};
use crate::domain::message::NormalizedMessage;
use crate::domain::series::InstrumentSeries;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Per-series outcome of a resolution batch, keyed by canonical series id
pub type Resolution = BTreeMap<String, Result<String, ResolutionError>>;

/// Maps canonical series ids to the vendor's raw tradable symbols.
///
/// A failed hop is reported for that series only, never for the whole batch.
/// Implementations do not cache across calls.
#[async_trait]
pub trait SymbolResolver: Send + Sync {
    async fn resolve(&self, series_ids: &[String], scope: Option<&str>) -> Resolution;
}

/// Persists a routed message into one sink kind.
///
/// Each manager converts the generic message through the schema record registry and
/// serializes its own connection use per destination.
#[async_trait]
pub trait OutputManager: Send + Sync {
    fn name(&self) -> &'static str;

    async fn save(
        &self,
        destination: &str,
        message: &NormalizedMessage,
        series: &InstrumentSeries,
    ) -> Result<(), RoutingError>;
}
