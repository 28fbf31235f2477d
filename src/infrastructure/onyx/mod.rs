//! Onyx hub: REST live polling and historical bars.

pub mod client;
pub mod historical;
pub mod normalizer;
pub mod realtime;
pub mod symbology;

pub use client::OnyxClient;
pub use historical::OnyxHistoricalExtractor;
pub use realtime::OnyxRealtimeExtractor;
pub use symbology::OnyxSymbolResolver;
