//! Schema-specific record types and the `data_schema` -> record registry used by sinks.

use crate::domain::errors::RoutingError;
use crate::domain::message::NormalizedMessage;
use crate::domain::series::DataSchema;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Top-of-book record (`mbp-1`), level 0 only
#[derive(Debug, Clone, PartialEq)]
pub struct Mbp1Record {
    pub vendor: String,
    pub asset_type: String,
    pub symbol: String,
    pub ts_event: DateTime<Utc>,
    pub bid_px_00: Option<Decimal>,
    pub ask_px_00: Option<Decimal>,
    pub bid_sz_00: Option<i64>,
    pub ask_sz_00: Option<i64>,
    pub bid_ct_00: Option<i64>,
    pub ask_ct_00: Option<i64>,
    pub mid_px_00: Option<Decimal>,
}

/// Bar record shared by every `ohlcv-*` schema
#[derive(Debug, Clone, PartialEq)]
pub struct OhlcvRecord {
    pub vendor: String,
    pub asset_type: String,
    pub symbol: String,
    pub ts_event: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaRecord {
    Mbp1(Mbp1Record),
    Ohlcv {
        schema: DataSchema,
        record: OhlcvRecord,
    },
}

impl SchemaRecord {
    /// Converts a generic message into the record type registered for `schema`
    pub fn from_message(
        schema: DataSchema,
        message: &NormalizedMessage,
    ) -> Result<Self, RoutingError> {
        match schema {
            DataSchema::Mbp1 => Ok(SchemaRecord::Mbp1(mbp1_from(message))),
            DataSchema::Ohlcv1m | DataSchema::Ohlcv1h | DataSchema::Ohlcv1d => {
                Ok(SchemaRecord::Ohlcv {
                    schema,
                    record: ohlcv_from(schema, message)?,
                })
            }
            DataSchema::Mbo => Err(RoutingError::Conversion {
                schema: schema.to_string(),
                reason: "no record type registered".to_string(),
            }),
        }
    }

    pub fn schema(&self) -> DataSchema {
        match self {
            SchemaRecord::Mbp1(_) => DataSchema::Mbp1,
            SchemaRecord::Ohlcv { schema, .. } => *schema,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            SchemaRecord::Mbp1(r) => &r.symbol,
            SchemaRecord::Ohlcv { record, .. } => &record.symbol,
        }
    }

    pub fn vendor(&self) -> &str {
        match self {
            SchemaRecord::Mbp1(r) => &r.vendor,
            SchemaRecord::Ohlcv { record, .. } => &record.vendor,
        }
    }

    pub fn ts_event(&self) -> DateTime<Utc> {
        match self {
            SchemaRecord::Mbp1(r) => r.ts_event,
            SchemaRecord::Ohlcv { record, .. } => record.ts_event,
        }
    }

    /// SQL table the relational sink writes to
    pub fn table(&self) -> &'static str {
        match self {
            SchemaRecord::Mbp1(_) => "mbp1",
            SchemaRecord::Ohlcv { schema, .. } => match schema {
                DataSchema::Ohlcv1m => "ohlcv_1m",
                DataSchema::Ohlcv1h => "ohlcv_1h",
                _ => "ohlcv_1d",
            },
        }
    }

    /// Key of the capped Redis stream: `<schema>:<vendor>:<symbol>`
    pub fn stream_name(&self) -> String {
        format!("{}:{}:{}", self.schema(), self.vendor(), self.symbol())
    }

    /// Flat, ordered column list; `None` marks an absent vendor value
    pub fn columns(&self) -> Vec<(&'static str, Option<String>)> {
        fn opt<T: ToString>(v: &Option<T>) -> Option<String> {
            v.as_ref().map(ToString::to_string)
        }

        match self {
            SchemaRecord::Mbp1(r) => vec![
                ("vendor", Some(r.vendor.clone())),
                ("asset_type", Some(r.asset_type.clone())),
                ("symbol", Some(r.symbol.clone())),
                ("ts_event", Some(r.ts_event.to_rfc3339())),
                ("bid_px_00", opt(&r.bid_px_00)),
                ("ask_px_00", opt(&r.ask_px_00)),
                ("bid_sz_00", opt(&r.bid_sz_00)),
                ("ask_sz_00", opt(&r.ask_sz_00)),
                ("bid_ct_00", opt(&r.bid_ct_00)),
                ("ask_ct_00", opt(&r.ask_ct_00)),
                ("mid_px_00", opt(&r.mid_px_00)),
            ],
            SchemaRecord::Ohlcv { record: r, .. } => vec![
                ("vendor", Some(r.vendor.clone())),
                ("asset_type", Some(r.asset_type.clone())),
                ("symbol", Some(r.symbol.clone())),
                ("ts_event", Some(r.ts_event.to_rfc3339())),
                ("open", Some(r.open.to_string())),
                ("high", Some(r.high.to_string())),
                ("low", Some(r.low.to_string())),
                ("close", Some(r.close.to_string())),
                ("volume", opt(&r.volume)),
            ],
        }
    }
}

fn mbp1_from(message: &NormalizedMessage) -> Mbp1Record {
    let bid = message.decimal("bid_px_00");
    let ask = message.decimal("ask_px_00");
    let mid = message.decimal("mid_px_00").or(match (bid, ask) {
        (Some(b), Some(a)) => Some((b + a) / Decimal::TWO),
        _ => None,
    });

    Mbp1Record {
        vendor: message.vendor.to_string(),
        asset_type: message.asset_type.to_string(),
        symbol: message.symbol.clone(),
        ts_event: message.ts_event,
        bid_px_00: bid,
        ask_px_00: ask,
        bid_sz_00: message.integer("bid_sz_00"),
        ask_sz_00: message.integer("ask_sz_00"),
        bid_ct_00: message.integer("bid_ct_00"),
        ask_ct_00: message.integer("ask_ct_00"),
        mid_px_00: mid,
    }
}

fn ohlcv_from(
    schema: DataSchema,
    message: &NormalizedMessage,
) -> Result<OhlcvRecord, RoutingError> {
    let required = |name: &str| {
        message.decimal(name).ok_or_else(|| RoutingError::Conversion {
            schema: schema.to_string(),
            reason: format!("missing field '{}'", name),
        })
    };

    Ok(OhlcvRecord {
        vendor: message.vendor.to_string(),
        asset_type: message.asset_type.to_string(),
        symbol: message.symbol.clone(),
        ts_event: message.ts_event,
        open: required("open")?,
        high: required("high")?,
        low: required("low")?,
        close: required("close")?,
        volume: message.integer("volume"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::series::{DataSource, SeriesType};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn base() -> NormalizedMessage {
        NormalizedMessage::new(
            SeriesType::Future,
            DataSource::Databento,
            "CLH5",
            Utc.with_ymd_and_hms(2025, 1, 2, 14, 30, 0).unwrap(),
        )
    }

    #[test]
    fn test_mbp1_derives_mid_when_absent() {
        let msg = base()
            .with_decimal("bid_px_00", dec!(73.10))
            .with_decimal("ask_px_00", dec!(73.12))
            .with_integer("bid_sz_00", 4);
        let record = SchemaRecord::from_message(DataSchema::Mbp1, &msg).unwrap();
        match &record {
            SchemaRecord::Mbp1(r) => {
                assert_eq!(r.mid_px_00, Some(dec!(73.11)));
                assert_eq!(r.bid_sz_00, Some(4));
                assert_eq!(r.ask_sz_00, None);
            }
            other => panic!("unexpected record {:?}", other),
        }
        assert_eq!(record.table(), "mbp1");
        assert_eq!(record.stream_name(), "mbp-1:databento:CLH5");
    }

    #[test]
    fn test_ohlcv_requires_prices() {
        let msg = base()
            .with_decimal("open", dec!(1))
            .with_decimal("high", dec!(2));
        let err = SchemaRecord::from_message(DataSchema::Ohlcv1d, &msg).unwrap_err();
        assert!(err.to_string().contains("low"));
    }

    #[test]
    fn test_ohlcv_columns() {
        let msg = base()
            .with_decimal("open", dec!(1))
            .with_decimal("high", dec!(2))
            .with_decimal("low", dec!(0.5))
            .with_decimal("close", dec!(1.5));
        let record = SchemaRecord::from_message(DataSchema::Ohlcv1d, &msg).unwrap();
        assert_eq!(record.table(), "ohlcv_1d");
        let columns = record.columns();
        assert_eq!(columns[4], ("open", Some("1".to_string())));
        assert_eq!(columns[8], ("volume", None));
    }

    #[test]
    fn test_mbo_has_no_record_type() {
        assert!(SchemaRecord::from_message(DataSchema::Mbo, &base()).is_err());
    }
}
