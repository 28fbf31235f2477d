//! CSV series catalog (`time_series.csv`).

use crate::domain::series::{
    DataSchema, DataSource, ExtractorKind, InstrumentSeries, SeriesQuery, SeriesType,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct CatalogRow {
    #[serde(default)]
    service_id: Option<u64>,
    series_id: String,
    series_type: String,
    #[serde(default)]
    root_id: Option<String>,
    #[serde(default)]
    venue: Option<String>,
    data_schema: String,
    data_source: String,
    destination: String,
    extractor: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    additional_params: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    active: Option<String>,
}

fn parse_active(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        None | Some("") => true,
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"),
    }
}

fn parse_params(series_id: &str, raw: Option<&str>) -> Map<String, Value> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Map::new();
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            warn!(
                "SeriesCatalog: Ignoring invalid additional_params for {}: {}",
                series_id, raw
            );
            Map::new()
        }
    }
}

impl CatalogRow {
    fn into_series(self) -> Result<InstrumentSeries> {
        let params = parse_params(&self.series_id, self.additional_params.as_deref());
        let active = parse_active(self.active.as_deref());

        let mut builder = InstrumentSeries::builder(&self.series_id)
            .series_type(self.series_type.parse::<SeriesType>()?)
            .data_schema(self.data_schema.parse::<DataSchema>()?)
            .data_source(self.data_source.parse::<DataSource>()?)
            .extractor_kind(self.extractor.parse::<ExtractorKind>()?)
            .destinations(self.destination.split(','))
            .additional_params(params)
            .active(active);
        if let Some(id) = self.service_id {
            builder = builder.service_id(id);
        }
        if let Some(root) = self.root_id.filter(|r| !r.trim().is_empty()) {
            builder = builder.root_id(root.trim());
        }
        if let Some(venue) = self.venue.filter(|v| !v.trim().is_empty()) {
            builder = builder.venue(venue.trim());
        }
        if let Some(description) = self.description {
            builder = builder.description(description);
        }
        if let Some(symbol) = self.symbol {
            builder = builder.resolved_symbol(symbol.trim());
        }
        Ok(builder.build()?)
    }
}

pub struct SeriesCatalog;

impl SeriesCatalog {
    pub fn load_csv(path: impl AsRef<Path>, active_only: bool) -> Result<SeriesQuery> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open series catalog {}", path.display()))?;
        let query = Self::from_reader(file, active_only)
            .with_context(|| format!("Failed to load series catalog {}", path.display()))?;
        info!(
            "SeriesCatalog: Loaded {} series from {}",
            query.len(),
            path.display()
        );
        Ok(query)
    }

    pub fn from_reader<R: Read>(reader: R, active_only: bool) -> Result<SeriesQuery> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut series = Vec::new();
        for (line, row) in rdr.deserialize::<CatalogRow>().enumerate() {
            let row = row.with_context(|| format!("Malformed catalog row {}", line + 1))?;
            let id = row.series_id.clone();
            let parsed = row
                .into_series()
                .with_context(|| format!("Invalid catalog entry {}", id))?;
            series.push(parsed);
        }

        let query = SeriesQuery::new(series);
        Ok(if active_only { query.active() } else { query })
    }
}
