//! Canonical instrument-series configuration.
//!
//! An [`InstrumentSeries`] is the unit every extractor, resolver and sink works on. It is
//! immutable after construction except for `resolved_symbol`, which an extractor fills in
//! once the vendor's raw symbol is known.

use crate::domain::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SERVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Hands out process-unique, monotonically increasing service ids.
pub fn next_service_id() -> u64 {
    NEXT_SERVICE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Instrument family of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeriesType {
    #[serde(rename = "fut")]
    Future,
    #[serde(rename = "futopt")]
    FutureOption,
    #[serde(rename = "fx")]
    FxSpot,
    #[serde(rename = "fwd")]
    Forward,
    #[serde(rename = "index")]
    Index,
    #[serde(rename = "equity")]
    Equity,
    #[serde(rename = "spread")]
    Spread,
}

impl SeriesType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesType::Future => "fut",
            SeriesType::FutureOption => "futopt",
            SeriesType::FxSpot => "fx",
            SeriesType::Forward => "fwd",
            SeriesType::Index => "index",
            SeriesType::Equity => "equity",
            SeriesType::Spread => "spread",
        }
    }
}

impl FromStr for SeriesType {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fut" | "future" => Ok(SeriesType::Future),
            "futopt" | "future-option" => Ok(SeriesType::FutureOption),
            "fx" | "fx-spot" => Ok(SeriesType::FxSpot),
            "fwd" | "forward" => Ok(SeriesType::Forward),
            "index" => Ok(SeriesType::Index),
            "equity" => Ok(SeriesType::Equity),
            "spread" => Ok(SeriesType::Spread),
            other => Err(ConfigurationError::InvalidValue {
                field: "series_type".to_string(),
                reason: format!("unknown series type '{}'", other),
            }),
        }
    }
}

impl fmt::Display for SeriesType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire/record shape of the data a series carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataSchema {
    #[serde(rename = "mbp-1")]
    Mbp1,
    #[serde(rename = "mbo")]
    Mbo,
    #[serde(rename = "ohlcv-1m")]
    Ohlcv1m,
    #[serde(rename = "ohlcv-1h")]
    Ohlcv1h,
    #[serde(rename = "ohlcv-1d")]
    Ohlcv1d,
}

impl DataSchema {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSchema::Mbp1 => "mbp-1",
            DataSchema::Mbo => "mbo",
            DataSchema::Ohlcv1m => "ohlcv-1m",
            DataSchema::Ohlcv1h => "ohlcv-1h",
            DataSchema::Ohlcv1d => "ohlcv-1d",
        }
    }

    pub fn is_ohlcv(&self) -> bool {
        matches!(
            self,
            DataSchema::Ohlcv1m | DataSchema::Ohlcv1h | DataSchema::Ohlcv1d
        )
    }
}

impl FromStr for DataSchema {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mbp-1" | "mbp1" => Ok(DataSchema::Mbp1),
            "mbo" => Ok(DataSchema::Mbo),
            "ohlcv-1m" => Ok(DataSchema::Ohlcv1m),
            "ohlcv-1h" => Ok(DataSchema::Ohlcv1h),
            "ohlcv-1d" => Ok(DataSchema::Ohlcv1d),
            other => Err(ConfigurationError::InvalidValue {
                field: "data_schema".to_string(),
                reason: format!("unknown schema '{}'", other),
            }),
        }
    }
}

impl fmt::Display for DataSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market-data vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Databento,
    Onyx,
    Bbg,
    MktDb,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Databento => "databento",
            DataSource::Onyx => "onyx",
            DataSource::Bbg => "bbg",
            DataSource::MktDb => "mkt_db",
        }
    }
}

impl FromStr for DataSource {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "databento" => Ok(DataSource::Databento),
            "onyx" => Ok(DataSource::Onyx),
            "bbg" => Ok(DataSource::Bbg),
            "mkt_db" => Ok(DataSource::MktDb),
            other => Err(ConfigurationError::InvalidValue {
                field: "data_source".to_string(),
                reason: format!("unknown vendor '{}'", other),
            }),
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Push (stream) or pull (bounded range) extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorKind {
    Realtime,
    Historical,
}

impl ExtractorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractorKind::Realtime => "realtime",
            ExtractorKind::Historical => "historical",
        }
    }

    fn short(&self) -> &'static str {
        match self {
            ExtractorKind::Realtime => "rt",
            ExtractorKind::Historical => "hist",
        }
    }
}

impl FromStr for ExtractorKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "realtime" => Ok(ExtractorKind::Realtime),
            "historical" => Ok(ExtractorKind::Historical),
            other => Err(ConfigurationError::InvalidValue {
                field: "extractor".to_string(),
                reason: format!("unknown extractor kind '{}'", other),
            }),
        }
    }
}

impl fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the Redis sink persists a series, from `additional_params.redis`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisMode {
    /// Append to a capped stream named after the record schema
    Stream,
    /// Write one scalar field of the record
    Kv { field: String },
}

/// One canonical series configuration
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentSeries {
    service_id: u64,
    series_id: String,
    series_type: SeriesType,
    root_id: String,
    venue: String,
    data_schema: DataSchema,
    data_source: DataSource,
    destinations: Vec<String>,
    extractor_kind: ExtractorKind,
    additional_params: Map<String, Value>,
    description: Option<String>,
    resolved_symbol: Option<String>,
    active: bool,
}

impl InstrumentSeries {
    pub fn builder(series_id: impl Into<String>) -> InstrumentSeriesBuilder {
        InstrumentSeriesBuilder::new(series_id.into())
    }

    pub fn service_id(&self) -> u64 {
        self.service_id
    }

    pub fn series_id(&self) -> &str {
        &self.series_id
    }

    pub fn series_type(&self) -> SeriesType {
        self.series_type
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn venue(&self) -> &str {
        &self.venue
    }

    pub fn data_schema(&self) -> DataSchema {
        self.data_schema
    }

    pub fn data_source(&self) -> DataSource {
        self.data_source
    }

    pub fn destinations(&self) -> &[String] {
        &self.destinations
    }

    pub fn extractor_kind(&self) -> ExtractorKind {
        self.extractor_kind
    }

    pub fn additional_params(&self) -> &Map<String, Value> {
        &self.additional_params
    }

    pub fn resolved_symbol(&self) -> Option<&str> {
        self.resolved_symbol.as_deref()
    }

    pub fn set_resolved_symbol(&mut self, symbol: impl Into<String>) {
        self.resolved_symbol = Some(symbol.into());
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Contract term encoded as the last dotted component (`CME.CL.1` -> 1)
    pub fn term(&self) -> Option<u32> {
        self.series_id.rsplit('.').next()?.parse().ok()
    }

    /// String-valued entry of `additional_params`
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.additional_params.get(key).and_then(Value::as_str)
    }

    pub fn redis_mode(&self) -> Option<RedisMode> {
        let redis = self.additional_params.get("redis")?.as_object()?;
        match redis.get("type").and_then(Value::as_str)? {
            "stream" => Some(RedisMode::Stream),
            "kv" => redis
                .get("field")
                .and_then(Value::as_str)
                .map(|field| RedisMode::Kv {
                    field: field.to_string(),
                }),
            _ => None,
        }
    }

    /// One-line summary: `id | description | rt | vendor | schema:x | to:a, b`
    pub fn description(&self) -> String {
        let mut parts = vec![self.series_id.clone()];
        if let Some(desc) = &self.description {
            parts.push(desc.clone());
        }
        parts.push(self.extractor_kind.short().to_string());
        parts.push(self.data_source.to_string());
        parts.push(format!("schema:{}", self.data_schema));
        parts.push(format!("to:{}", self.destinations.join(", ")));
        parts.join(" | ")
    }
}

impl fmt::Display for InstrumentSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

pub struct InstrumentSeriesBuilder {
    service_id: Option<u64>,
    series_id: String,
    series_type: SeriesType,
    root_id: Option<String>,
    venue: Option<String>,
    data_schema: DataSchema,
    data_source: DataSource,
    destinations: Vec<String>,
    extractor_kind: ExtractorKind,
    additional_params: Map<String, Value>,
    description: Option<String>,
    resolved_symbol: Option<String>,
    active: bool,
}

impl InstrumentSeriesBuilder {
    fn new(series_id: String) -> Self {
        Self {
            service_id: None,
            series_id,
            series_type: SeriesType::Future,
            root_id: None,
            venue: None,
            data_schema: DataSchema::Mbp1,
            data_source: DataSource::Databento,
            destinations: Vec::new(),
            extractor_kind: ExtractorKind::Realtime,
            additional_params: Map::new(),
            description: None,
            resolved_symbol: None,
            active: true,
        }
    }

    pub fn service_id(mut self, service_id: u64) -> Self {
        self.service_id = Some(service_id);
        self
    }

    pub fn series_type(mut self, series_type: SeriesType) -> Self {
        self.series_type = series_type;
        self
    }

    pub fn root_id(mut self, root_id: impl Into<String>) -> Self {
        self.root_id = Some(root_id.into());
        self
    }

    pub fn venue(mut self, venue: impl Into<String>) -> Self {
        self.venue = Some(venue.into());
        self
    }

    pub fn data_schema(mut self, data_schema: DataSchema) -> Self {
        self.data_schema = data_schema;
        self
    }

    pub fn data_source(mut self, data_source: DataSource) -> Self {
        self.data_source = data_source;
        self
    }

    pub fn destination(mut self, destination: impl Into<String>) -> Self {
        self.destinations.push(destination.into());
        self
    }

    pub fn destinations<I, S>(mut self, destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.destinations
            .extend(destinations.into_iter().map(Into::into));
        self
    }

    pub fn extractor_kind(mut self, kind: ExtractorKind) -> Self {
        self.extractor_kind = kind;
        self
    }

    pub fn additional_params(mut self, params: Map<String, Value>) -> Self {
        self.additional_params = params;
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.additional_params.insert(key.into(), value);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn resolved_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.resolved_symbol = Some(symbol.into());
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn build(self) -> Result<InstrumentSeries, ConfigurationError> {
        let series_id = self.series_id.trim().to_string();
        if series_id.is_empty() {
            return Err(ConfigurationError::MissingParameter {
                parameter: "series_id".to_string(),
                context: "instrument series".to_string(),
            });
        }

        // Ordered set: first occurrence wins
        let mut seen = BTreeSet::new();
        let destinations: Vec<String> = self
            .destinations
            .into_iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty() && seen.insert(d.clone()))
            .collect();
        if destinations.is_empty() {
            return Err(ConfigurationError::MissingParameter {
                parameter: "destinations".to_string(),
                context: series_id,
            });
        }

        let mut parts = series_id.split('.');
        let default_venue = parts.next().unwrap_or_default().to_string();
        let default_root = parts.next().unwrap_or_default().to_string();

        Ok(InstrumentSeries {
            service_id: self.service_id.unwrap_or_else(next_service_id),
            root_id: self.root_id.unwrap_or(default_root),
            venue: self.venue.unwrap_or(default_venue),
            series_id,
            series_type: self.series_type,
            data_schema: self.data_schema,
            data_source: self.data_source,
            destinations,
            extractor_kind: self.extractor_kind,
            additional_params: self.additional_params,
            description: self.description.filter(|d| !d.is_empty()),
            resolved_symbol: self.resolved_symbol.filter(|s| !s.is_empty()),
            active: self.active,
        })
    }
}

/// Immutable, ordered view over a set of series with chainable filters.
///
/// Every filter returns a new query; the receiver is left untouched.
#[derive(Debug, Clone, Default)]
pub struct SeriesQuery {
    series: Vec<InstrumentSeries>,
}

impl SeriesQuery {
    pub fn new(series: Vec<InstrumentSeries>) -> Self {
        Self { series }
    }

    fn filtered(&self, predicate: impl Fn(&InstrumentSeries) -> bool) -> Self {
        Self {
            series: self.series.iter().filter(|s| predicate(s)).cloned().collect(),
        }
    }

    pub fn active(&self) -> Self {
        self.filtered(|s| s.is_active())
    }

    pub fn realtime(&self) -> Self {
        self.filtered(|s| s.extractor_kind() == ExtractorKind::Realtime)
    }

    pub fn historical(&self) -> Self {
        self.filtered(|s| s.extractor_kind() == ExtractorKind::Historical)
    }

    pub fn by_source(&self, source: DataSource) -> Self {
        self.filtered(|s| s.data_source() == source)
    }

    pub fn by_series_type(&self, series_type: SeriesType) -> Self {
        self.filtered(|s| s.series_type() == series_type)
    }

    pub fn by_schema(&self, schema: DataSchema) -> Self {
        self.filtered(|s| s.data_schema() == schema)
    }

    /// Keeps series whose root is listed; an empty list keeps everything
    pub fn by_root_ids(&self, root_ids: &[String]) -> Self {
        if root_ids.is_empty() {
            return self.clone();
        }
        self.filtered(|s| root_ids.iter().any(|r| r == s.root_id()))
    }

    pub fn extractor_kinds(&self) -> BTreeSet<ExtractorKind> {
        self.series.iter().map(|s| s.extractor_kind()).collect()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstrumentSeries> {
        self.series.iter()
    }

    pub fn into_vec(self) -> Vec<InstrumentSeries> {
        self.series
    }
}

impl From<Vec<InstrumentSeries>> for SeriesQuery {
    fn from(series: Vec<InstrumentSeries>) -> Self {
        Self::new(series)
    }
}

impl IntoIterator for SeriesQuery {
    type Item = InstrumentSeries;
    type IntoIter = std::vec::IntoIter<InstrumentSeries>;

    fn into_iter(self) -> Self::IntoIter {
        self.series.into_iter()
    }
}
