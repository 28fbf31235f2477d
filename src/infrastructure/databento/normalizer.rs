//! Databento fixed-point records to [`NormalizedMessage`].
//!
//! Prices arrive as `i64` with 9 implied decimals; `i64::MAX` is the "undefined" sentinel.
//! Timestamps are nanoseconds since the UNIX epoch.

use crate::domain::message::NormalizedMessage;
use crate::domain::series::InstrumentSeries;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

pub const PRICE_SCALE: u32 = 9;
pub const UNDEF_PRICE: i64 = i64::MAX;

/// Level-0 book snapshot as delivered by the `mbp-1` schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopOfBook {
    pub instrument_id: u32,
    pub ts_event: u64,
    pub bid_px: i64,
    pub ask_px: i64,
    pub bid_sz: u32,
    pub ask_sz: u32,
    pub bid_ct: u32,
    pub ask_ct: u32,
}

/// One `ohlcv-*` bar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bar {
    pub instrument_id: u32,
    pub ts_event: u64,
    pub open: i64,
    pub high: i64,
    pub low: i64,
    pub close: i64,
    pub volume: u64,
}

pub fn price(raw: i64) -> Option<Decimal> {
    (raw != UNDEF_PRICE).then(|| Decimal::new(raw, PRICE_SCALE))
}

/// `(bid + ask) / 2`, summed in 128 bits so extreme raw values cannot overflow
pub fn mid_price(bid: i64, ask: i64) -> Option<Decimal> {
    if bid == UNDEF_PRICE || ask == UNDEF_PRICE {
        return None;
    }
    let sum = Decimal::try_from_i128_with_scale(bid as i128 + ask as i128, PRICE_SCALE).ok()?;
    Some(sum / Decimal::TWO)
}

pub fn timestamp(nanos: u64) -> DateTime<Utc> {
    let nanos = i64::try_from(nanos).unwrap_or(i64::MAX);
    DateTime::from_timestamp_nanos(nanos)
}

pub fn normalize_mbp1(
    book: &TopOfBook,
    symbol: &str,
    series: &InstrumentSeries,
) -> NormalizedMessage {
    NormalizedMessage::new(
        series.series_type(),
        series.data_source(),
        symbol,
        timestamp(book.ts_event),
    )
    .with_optional_decimal("bid_px_00", price(book.bid_px))
    .with_optional_decimal("ask_px_00", price(book.ask_px))
    .with_integer("bid_sz_00", i64::from(book.bid_sz))
    .with_integer("ask_sz_00", i64::from(book.ask_sz))
    .with_integer("bid_ct_00", i64::from(book.bid_ct))
    .with_integer("ask_ct_00", i64::from(book.ask_ct))
    .with_optional_decimal("mid_px_00", mid_price(book.bid_px, book.ask_px))
}

pub fn normalize_ohlcv(
    bar: &Bar,
    symbol: &str,
    series: &InstrumentSeries,
) -> Result<NormalizedMessage, String> {
    let mut message = NormalizedMessage::new(
        series.series_type(),
        series.data_source(),
        symbol,
        timestamp(bar.ts_event),
    );
    for (field, raw) in [
        ("open", bar.open),
        ("high", bar.high),
        ("low", bar.low),
        ("close", bar.close),
    ] {
        let value = price(raw).ok_or_else(|| format!("undefined '{}' price", field))?;
        message = message.with_decimal(field, value);
    }
    let volume = i64::try_from(bar.volume).map_err(|_| "volume out of range".to_string())?;
    Ok(message.with_integer("volume", volume))
}
