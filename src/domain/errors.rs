use thiserror::Error;

/// Fatal errors raised while building extractors or gates. Halts initialization.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Unknown extractor for key ({kind}, {data_source})")]
    UnknownExtractor { kind: String, data_source: String },

    #[error("Missing required parameter '{parameter}' for {context}")]
    MissingParameter { parameter: String, context: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid gate window: {reason}")]
    InvalidWindow { reason: String },

    #[error("Orchestrator is already initialized")]
    AlreadyInitialized,
}

/// Per-series symbol resolution failure. The series is excluded from the run.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("Malformed series id {series_id}: {reason}")]
    MalformedSeriesId { series_id: String, reason: String },

    #[error("No {stage} found for {series_id} (lookup key {key})")]
    MissingHop {
        series_id: String,
        stage: String,
        key: String,
    },

    #[error("Resolver for {series_id} does not support scope {scope}")]
    UnsupportedScope { series_id: String, scope: String },

    #[error("Vendor rejected resolution of {series_id}: {reason}")]
    Vendor { series_id: String, reason: String },
}

impl ResolutionError {
    pub fn series_id(&self) -> &str {
        match self {
            Self::MalformedSeriesId { series_id, .. }
            | Self::MissingHop { series_id, .. }
            | Self::UnsupportedScope { series_id, .. }
            | Self::Vendor { series_id, .. } => series_id,
        }
    }
}

/// Steady-state extractor failures. Recovered at the smallest possible scope.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Connection to {vendor} failed: {reason}")]
    Connection { vendor: String, reason: String },

    #[error("Transport error from {vendor} ({context}): {reason}")]
    Transport {
        vendor: String,
        context: String,
        reason: String,
    },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl ExtractError {
    pub fn connection(vendor: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connection {
            vendor: vendor.into(),
            reason: reason.to_string(),
        }
    }

    pub fn transport(
        vendor: impl Into<String>,
        context: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::Transport {
            vendor: vendor.into(),
            context: context.into(),
            reason: reason.to_string(),
        }
    }
}

/// Per-destination routing failure. Other destinations are still attempted.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RoutingError {
    #[error("No output manager registered for sink {sink}")]
    NoManager { sink: String },

    #[error("Cannot convert message to {schema} record: {reason}")]
    Conversion { schema: String, reason: String },

    #[error("Save to {destination} failed: {reason}")]
    Sink { destination: String, reason: String },
}

impl RoutingError {
    pub fn sink(destination: impl Into<String>, reason: impl ToString) -> Self {
        Self::Sink {
            destination: destination.into(),
            reason: reason.to_string(),
        }
    }
}
