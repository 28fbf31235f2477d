//! Live session seam: the extractor talks to [`LiveFeed`], the SDK binding lives here.

use super::normalizer::{Bar, TopOfBook};
use crate::domain::errors::ExtractError;
use crate::domain::series::DataSchema;
use async_trait::async_trait;
use databento::LiveClient;
use databento::dbn::{
    ErrorMsg, Mbp1Msg, OhlcvMsg, SType, Schema, SymbolMappingMsg, SystemMsg,
};
use databento::live::Subscription;
use tracing::{debug, info};

const VENDOR: &str = "databento";

/// Vendor record kinds the extractor dispatches on
#[derive(Debug, Clone, PartialEq)]
pub enum LiveRecord {
    System(String),
    Error(String),
    SymbolMapping { instrument_id: u32, raw_symbol: String },
    Mbp1(TopOfBook),
    Ohlcv(Bar),
    /// Any record type this pipeline does not consume
    Other,
}

/// One open streaming session bound to a dataset
#[async_trait]
pub trait LiveFeed: Send {
    async fn subscribe(&mut self, schema: DataSchema, symbols: &[String]) -> Result<(), ExtractError>;

    async fn start(&mut self) -> Result<(), ExtractError>;

    /// `Ok(None)` when the session ended
    async fn next_record(&mut self) -> Result<Option<LiveRecord>, ExtractError>;

    async fn close(&mut self);
}

#[async_trait]
pub trait LiveFeedConnector: Send + Sync {
    async fn open(&self, dataset: &str) -> Result<Box<dyn LiveFeed>, ExtractError>;
}

pub fn sdk_schema(schema: DataSchema) -> Schema {
    match schema {
        DataSchema::Mbp1 => Schema::Mbp1,
        DataSchema::Mbo => Schema::Mbo,
        DataSchema::Ohlcv1m => Schema::Ohlcv1M,
        DataSchema::Ohlcv1h => Schema::Ohlcv1H,
        DataSchema::Ohlcv1d => Schema::Ohlcv1D,
    }
}

/// Opens sessions through the official Databento SDK
pub struct DatabentoLiveConnector {
    api_key: String,
}

impl DatabentoLiveConnector {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl LiveFeedConnector for DatabentoLiveConnector {
    async fn open(&self, dataset: &str) -> Result<Box<dyn LiveFeed>, ExtractError> {
        let connection = |e: databento::Error| ExtractError::connection(VENDOR, e.to_string());
        let client = LiveClient::builder()
            .key(self.api_key.clone())
            .map_err(connection)?
            .dataset(dataset.to_string())
            .build()
            .await
            .map_err(connection)?;
        info!("DatabentoLiveConnector: Session opened for {}", dataset);
        Ok(Box::new(SdkFeed {
            client,
            dataset: dataset.to_string(),
        }))
    }
}

struct SdkFeed {
    client: LiveClient,
    dataset: String,
}

impl SdkFeed {
    fn transport(&self, context: &str, e: databento::Error) -> ExtractError {
        ExtractError::transport(VENDOR, format!("{} {}", context, self.dataset), e)
    }
}

#[async_trait]
impl LiveFeed for SdkFeed {
    async fn subscribe(&mut self, schema: DataSchema, symbols: &[String]) -> Result<(), ExtractError> {
        let subscription = Subscription::builder()
            .symbols(symbols.to_vec())
            .schema(sdk_schema(schema))
            .stype_in(SType::RawSymbol)
            .build();
        debug!(
            "DatabentoLiveFeed: Subscribing {} {} symbols on {}",
            symbols.len(),
            schema,
            self.dataset
        );
        match self.client.subscribe(subscription).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.transport("subscribe", e)),
        }
    }

    async fn start(&mut self) -> Result<(), ExtractError> {
        match self.client.start().await {
            Ok(_) => Ok(()),
            Err(e) => Err(self.transport("start", e)),
        }
    }

    async fn next_record(&mut self) -> Result<Option<LiveRecord>, ExtractError> {
        let record = match self.client.next_record().await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(e) => return Err(ExtractError::transport(VENDOR, "next_record", e)),
        };

        let converted = if let Some(msg) = record.get::<Mbp1Msg>() {
            let level = &msg.levels[0];
            LiveRecord::Mbp1(TopOfBook {
                instrument_id: msg.hd.instrument_id,
                ts_event: msg.hd.ts_event,
                bid_px: level.bid_px,
                ask_px: level.ask_px,
                bid_sz: level.bid_sz,
                ask_sz: level.ask_sz,
                bid_ct: level.bid_ct,
                ask_ct: level.ask_ct,
            })
        } else if let Some(msg) = record.get::<OhlcvMsg>() {
            LiveRecord::Ohlcv(Bar {
                instrument_id: msg.hd.instrument_id,
                ts_event: msg.hd.ts_event,
                open: msg.open,
                high: msg.high,
                low: msg.low,
                close: msg.close,
                volume: msg.volume,
            })
        } else if let Some(msg) = record.get::<SymbolMappingMsg>() {
            LiveRecord::SymbolMapping {
                instrument_id: msg.hd.instrument_id,
                raw_symbol: msg.stype_out_symbol().unwrap_or_default().to_string(),
            }
        } else if let Some(msg) = record.get::<SystemMsg>() {
            LiveRecord::System(msg.msg().unwrap_or_default().to_string())
        } else if let Some(msg) = record.get::<ErrorMsg>() {
            LiveRecord::Error(msg.err().unwrap_or_default().to_string())
        } else {
            LiveRecord::Other
        };
        Ok(Some(converted))
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.close().await {
            debug!("DatabentoLiveFeed: Close on {} reported: {}", self.dataset, e);
        }
    }
}
