//! Databento: live streaming plus the historical symbology API used for resolution.

pub mod hist_client;
pub mod live_client;
pub mod normalizer;
pub mod realtime;
pub mod symbology;

pub use hist_client::DatabentoHistClient;
pub use live_client::{DatabentoLiveConnector, LiveFeed, LiveFeedConnector, LiveRecord};
pub use realtime::DatabentoRealtimeExtractor;
pub use symbology::DatabentoSymbolResolver;
