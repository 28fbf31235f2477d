use super::client::OnyxClient;
use super::normalizer::timestamp_value;
use crate::domain::errors::ResolutionError;
use crate::domain::ports::{Resolution, SymbolResolver};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Resolves `VENUE.PRODUCT.TERM` ids against the Onyx contract list.
///
/// Live contracts (expiry today or later) are ordered by expiry; term N is the Nth one.
pub struct OnyxSymbolResolver {
    client: Arc<OnyxClient>,
    today: Option<NaiveDate>,
}

struct ParsedId {
    series_id: String,
    product: String,
    term: usize,
}

fn parse_series_id(series_id: &str) -> Result<ParsedId, ResolutionError> {
    let malformed = |reason: &str| ResolutionError::MalformedSeriesId {
        series_id: series_id.to_string(),
        reason: reason.to_string(),
    };
    let parts: Vec<&str> = series_id.split('.').collect();
    if parts.len() != 3 {
        return Err(malformed("Onyx series id must consist of 3 parts"));
    }
    let term: usize = parts[2]
        .parse()
        .map_err(|_| malformed("term is not a number"))?;
    if term == 0 {
        return Err(malformed("term starts at 1"));
    }
    Ok(ParsedId {
        series_id: series_id.to_string(),
        product: parts[1].to_string(),
        term,
    })
}

fn contract_expiry(contract: &Value) -> Option<NaiveDate> {
    contract
        .get("expiry")
        .and_then(timestamp_value)
        .map(|dt| dt.date_naive())
}

impl OnyxSymbolResolver {
    pub fn new(client: Arc<OnyxClient>) -> Self {
        Self {
            client,
            today: None,
        }
    }

    /// Pins the reference date used to drop expired contracts
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Symbols of live contracts, nearest expiry first
    fn live_symbols(contracts: &[Value], today: NaiveDate) -> Vec<String> {
        let mut live: Vec<(NaiveDate, String)> = contracts
            .iter()
            .filter_map(|c| {
                let expiry = contract_expiry(c)?;
                let symbol = c.get("symbol").and_then(Value::as_str)?;
                (expiry >= today).then(|| (expiry, symbol.to_string()))
            })
            .collect();
        live.sort();
        live.into_iter().map(|(_, symbol)| symbol).collect()
    }
}

#[async_trait]
impl SymbolResolver for OnyxSymbolResolver {
    async fn resolve(&self, series_ids: &[String], _scope: Option<&str>) -> Resolution {
        let today = self.today.unwrap_or_else(|| Utc::now().date_naive());
        let mut resolution = Resolution::new();

        let mut products: BTreeMap<String, Vec<ParsedId>> = BTreeMap::new();
        for id in series_ids {
            match parse_series_id(id) {
                Ok(parsed) => products.entry(parsed.product.clone()).or_default().push(parsed),
                Err(e) => {
                    resolution.insert(id.clone(), Err(e));
                }
            }
        }

        for (product, ids) in products {
            let contracts = match self.client.contracts(&product).await {
                Ok(contracts) => contracts,
                Err(e) => {
                    error!("OnyxSymbolResolver: Failed to fetch contracts for {}: {}", product, e);
                    for parsed in ids {
                        resolution.insert(
                            parsed.series_id.clone(),
                            Err(ResolutionError::Vendor {
                                series_id: parsed.series_id,
                                reason: e.to_string(),
                            }),
                        );
                    }
                    continue;
                }
            };

            let live = Self::live_symbols(&contracts, today);
            debug!("OnyxSymbolResolver: {} has {} live contracts", product, live.len());
            for parsed in ids {
                let outcome = live.get(parsed.term - 1).cloned().ok_or_else(|| {
                    ResolutionError::MissingHop {
                        series_id: parsed.series_id.clone(),
                        stage: "contract".to_string(),
                        key: format!("{}#{}", product, parsed.term),
                    }
                });
                resolution.insert(parsed.series_id, outcome);
            }
        }

        resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_series_id() {
        let parsed = parse_series_id("ONYX.NAPEW.2").unwrap();
        assert_eq!(parsed.product, "NAPEW");
        assert_eq!(parsed.term, 2);
        assert!(parse_series_id("ONYX.NAPEW").is_err());
        assert!(parse_series_id("ONYX.NAPEW.0").is_err());
        assert!(parse_series_id("ONYX.NAPEW.front").is_err());
    }

    #[test]
    fn test_live_symbols_ordered_by_expiry() {
        let contracts = vec![
            json!({"symbol": "NAPEWK5", "expiry": "2025-05-30"}),
            json!({"symbol": "NAPEWF5", "expiry": "2025-01-31"}),
            json!({"symbol": "NAPEWZ4", "expiry": "2024-12-31"}),
            json!({"symbol": "NAPEWH5", "expiry": "2025-03-31"}),
            json!({"symbol": "BROKEN"}),
        ];
        let today = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        assert_eq!(
            OnyxSymbolResolver::live_symbols(&contracts, today),
            vec!["NAPEWF5", "NAPEWH5", "NAPEWK5"]
        );
    }
}
