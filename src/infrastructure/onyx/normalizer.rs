//! Onyx JSON records -> [`NormalizedMessage`].

use crate::domain::message::NormalizedMessage;
use crate::domain::series::InstrumentSeries;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Live ticker keys renamed to their top-of-book names
const LIVE_FIELD_NAMES: &[(&str, &str)] = &[
    ("bid", "bid_px_00"),
    ("ask", "ask_px_00"),
    ("mid", "mid_px_00"),
    ("bid_size", "bid_sz_00"),
    ("ask_size", "ask_sz_00"),
];

pub fn decimal_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .ok()
        }
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Accepts RFC 3339, naive datetimes (UTC), plain dates and epoch seconds or milliseconds
pub fn timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(dt.and_utc());
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
                return Some(dt.and_utc());
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        }
        Value::Number(n) => {
            let raw = n.as_i64()?;
            // Anything past year 2286 in seconds is taken as milliseconds
            if raw.abs() > 9_999_999_999 {
                DateTime::from_timestamp_millis(raw)
            } else {
                DateTime::from_timestamp(raw, 0)
            }
        }
        _ => None,
    }
}

fn base_message(series: &InstrumentSeries, symbol: &str, ts_event: DateTime<Utc>) -> NormalizedMessage {
    NormalizedMessage::new(series.series_type(), series.data_source(), symbol, ts_event)
}

/// Historical bar: `timestamp`, `open`, `high`, `low`, `close`, optional `volume`
pub fn normalize_ohlc(record: &Value, series: &InstrumentSeries) -> Result<NormalizedMessage, String> {
    let symbol = series
        .resolved_symbol()
        .ok_or_else(|| format!("{} has no resolved symbol", series.series_id()))?;
    let ts_event = record
        .get("timestamp")
        .and_then(timestamp_value)
        .ok_or_else(|| "missing or invalid 'timestamp'".to_string())?;

    let mut message = base_message(series, symbol, ts_event);
    for field in ["open", "high", "low", "close"] {
        let value = record
            .get(field)
            .and_then(decimal_value)
            .ok_or_else(|| format!("missing or invalid '{}'", field))?;
        message = message.with_decimal(field, value);
    }
    if let Some(volume) = record.get("volume").and_then(Value::as_i64) {
        message = message.with_integer("volume", volume);
    }
    Ok(message)
}

/// Live ticker record. Known quote keys get their top-of-book names, other scalars pass through.
pub fn normalize_live(record: &Value, series: &InstrumentSeries) -> Result<NormalizedMessage, String> {
    let object = record
        .as_object()
        .ok_or_else(|| "live record is not an object".to_string())?;
    let symbol = object
        .get("symbol")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing 'symbol'".to_string())?;
    let ts_event = object
        .get("timestamp")
        .and_then(timestamp_value)
        .unwrap_or_else(Utc::now);

    let mut message = base_message(series, symbol, ts_event);
    for (key, value) in object {
        if matches!(key.as_str(), "symbol" | "timestamp") {
            continue;
        }
        let name = LIVE_FIELD_NAMES
            .iter()
            .find(|(from, _)| from == key)
            .map(|(_, to)| *to)
            .unwrap_or(key.as_str());

        message = match value {
            Value::Number(n) if n.is_i64() && name.contains("_sz_") => {
                message.with_integer(name, n.as_i64().unwrap_or_default())
            }
            Value::Number(_) => match decimal_value(value) {
                Some(d) => message.with_decimal(name, d),
                None => message,
            },
            Value::String(s) => message.with_text(name, s.clone()),
            _ => message,
        };
    }
    Ok(message)
}
