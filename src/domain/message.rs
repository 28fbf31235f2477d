use crate::domain::series::{DataSource, SeriesType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Schema-specific value carried by a [`NormalizedMessage`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Decimal(Decimal),
    Integer(i64),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Decimal(d) => write!(f, "{}", d),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

/// Vendor-agnostic market-data record handed to the output router.
///
/// Built fresh per inbound vendor record. `(symbol, ts_event)` is the only identity it has.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedMessage {
    pub asset_type: SeriesType,
    pub vendor: DataSource,
    pub symbol: String,
    pub ts_event: DateTime<Utc>,
    #[serde(flatten)]
    fields: BTreeMap<String, FieldValue>,
}

impl NormalizedMessage {
    pub fn new(
        asset_type: SeriesType,
        vendor: DataSource,
        symbol: impl Into<String>,
        ts_event: DateTime<Utc>,
    ) -> Self {
        Self {
            asset_type,
            vendor,
            symbol: symbol.into(),
            ts_event,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_decimal(mut self, name: &str, value: Decimal) -> Self {
        self.fields
            .insert(name.to_string(), FieldValue::Decimal(value));
        self
    }

    /// Inserts the value only when present; absent vendor fields stay absent
    pub fn with_optional_decimal(self, name: &str, value: Option<Decimal>) -> Self {
        match value {
            Some(v) => self.with_decimal(name, v),
            None => self,
        }
    }

    pub fn with_integer(mut self, name: &str, value: i64) -> Self {
        self.fields
            .insert(name.to_string(), FieldValue::Integer(value));
        self
    }

    pub fn with_text(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields
            .insert(name.to_string(), FieldValue::Text(value.into()));
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn decimal(&self, name: &str) -> Option<Decimal> {
        match self.fields.get(name)? {
            FieldValue::Decimal(d) => Some(*d),
            FieldValue::Integer(i) => Some(Decimal::from(*i)),
            FieldValue::Text(s) => s.parse().ok(),
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.fields.get(name)? {
            FieldValue::Integer(i) => Some(*i),
            FieldValue::Text(s) => s.parse().ok(),
            FieldValue::Decimal(_) => None,
        }
    }

    /// Any named value rendered as text, including the core fields
    pub fn scalar(&self, name: &str) -> Option<String> {
        match name {
            "asset_type" => Some(self.asset_type.to_string()),
            "vendor" => Some(self.vendor.to_string()),
            "symbol" => Some(self.symbol.clone()),
            "ts_event" => Some(self.ts_event.to_rfc3339()),
            other => self.fields.get(other).map(ToString::to_string),
        }
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn message() -> NormalizedMessage {
        NormalizedMessage::new(
            SeriesType::Future,
            DataSource::Onyx,
            "CLH5",
            Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
        )
        .with_decimal("close", dec!(73.25))
        .with_integer("volume", 1200)
        .with_optional_decimal("open", None)
    }

    #[test]
    fn test_field_accessors() {
        let msg = message();
        assert_eq!(msg.decimal("close"), Some(dec!(73.25)));
        assert_eq!(msg.decimal("volume"), Some(dec!(1200)));
        assert_eq!(msg.integer("volume"), Some(1200));
        assert!(msg.field("open").is_none());
    }

    #[test]
    fn test_scalar_covers_core_fields() {
        let msg = message();
        assert_eq!(msg.scalar("symbol").as_deref(), Some("CLH5"));
        assert_eq!(msg.scalar("vendor").as_deref(), Some("onyx"));
        assert_eq!(msg.scalar("close").as_deref(), Some("73.25"));
        assert!(msg.scalar("missing").is_none());
    }

    #[test]
    fn test_serializes_flat() {
        let json = serde_json::to_value(message()).unwrap();
        assert_eq!(json["symbol"], "CLH5");
        assert_eq!(json["asset_type"], "fut");
        assert_eq!(json["close"], "73.25");
        assert_eq!(json["volume"], 1200);
    }
}
