use super::hist_client::{DatabentoHistClient, SymbologyRequest};
use crate::domain::errors::ResolutionError;
use crate::domain::ports::{Resolution, SymbolResolver};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub const CME_DATASET: &str = "GLBX.MDP3";

/// Continuous-contract roll rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RollRule {
    #[default]
    Calendar,
    OpenInterest,
    Volume,
}

impl RollRule {
    pub fn code(&self) -> char {
        match self {
            RollRule::Calendar => 'c',
            RollRule::OpenInterest => 'n',
            RollRule::Volume => 'v',
        }
    }
}

/// `VENUE.ROOT.TERM` -> `ROOT.<rule>.<TERM-1>`
pub fn continuous_symbol(series_id: &str, rule: RollRule) -> Result<String, ResolutionError> {
    let malformed = |reason: &str| ResolutionError::MalformedSeriesId {
        series_id: series_id.to_string(),
        reason: reason.to_string(),
    };
    let parts: Vec<&str> = series_id.split('.').collect();
    let [_, root, term] = parts.as_slice() else {
        return Err(malformed("expected VENUE.ROOT.TERM"));
    };
    let term: u32 = term.parse().map_err(|_| malformed("term is not a number"))?;
    if term == 0 {
        return Err(malformed("term starts at 1"));
    }
    Ok(format!("{}.{}.{}", root, rule.code(), term - 1))
}

/// `result[key][0]["s"]` for every key of a symbology response
pub fn first_mappings(response: &Value) -> BTreeMap<String, String> {
    response
        .get("result")
        .and_then(Value::as_object)
        .map(|result| {
            result
                .iter()
                .filter_map(|(key, intervals)| {
                    let symbol = intervals.get(0)?.get("s")?;
                    let symbol = match symbol {
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        _ => return None,
                    };
                    Some((key.clone(), symbol))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Two-hop CME resolver: continuous symbol -> instrument id -> raw symbol,
/// both hops over the window `[today - 1 day, today]`.
pub struct DatabentoSymbolResolver {
    client: Arc<DatabentoHistClient>,
    rule: RollRule,
    today: Option<NaiveDate>,
}

impl DatabentoSymbolResolver {
    pub fn new(client: Arc<DatabentoHistClient>) -> Self {
        Self {
            client,
            rule: RollRule::default(),
            today: None,
        }
    }

    pub fn with_rule(mut self, rule: RollRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// One hop. A response without a `result` object fails the whole hop.
    async fn hop(
        &self,
        symbols: &[String],
        stype_in: &str,
        stype_out: &str,
        today: NaiveDate,
    ) -> Result<BTreeMap<String, String>, String> {
        let request = SymbologyRequest {
            dataset: CME_DATASET,
            symbols,
            stype_in,
            stype_out,
            start_date: today - Duration::days(1),
            end_date: today,
        };
        let response = self
            .client
            .symbology_resolve(&request)
            .await
            .map_err(|e| e.to_string())?;

        let message = response.get("message").and_then(Value::as_str).unwrap_or("");
        if response.get("result").and_then(Value::as_object).is_none() {
            return Err(format!("{} -> {} failed: {}", stype_in, stype_out, message));
        }
        if message != "OK" {
            warn!(
                "DatabentoSymbolResolver: {} -> {} returned '{}'",
                stype_in, stype_out, message
            );
        }
        Ok(first_mappings(&response))
    }

    async fn resolve_cme(&self, series_ids: &[String]) -> Resolution {
        let today = self.today.unwrap_or_else(|| Utc::now().date_naive());
        let mut resolution = Resolution::new();

        let mut continuous: Vec<(String, String)> = Vec::new();
        for id in series_ids {
            match continuous_symbol(id, self.rule) {
                Ok(symbol) => continuous.push((id.clone(), symbol)),
                Err(e) => {
                    resolution.insert(id.clone(), Err(e));
                }
            }
        }
        if continuous.is_empty() {
            return resolution;
        }

        let vendor_failure = |resolution: &mut Resolution, reason: &str| {
            for (id, _) in &continuous {
                resolution.insert(
                    id.clone(),
                    Err(ResolutionError::Vendor {
                        series_id: id.clone(),
                        reason: reason.to_string(),
                    }),
                );
            }
        };

        let symbols: Vec<String> = continuous.iter().map(|(_, s)| s.clone()).collect();
        let instrument_ids = match self.hop(&symbols, "continuous", "instrument_id", today).await {
            Ok(map) => map,
            Err(e) => {
                error!("DatabentoSymbolResolver: {}", e);
                vendor_failure(&mut resolution, &e);
                return resolution;
            }
        };

        let mut ids: Vec<String> = instrument_ids.values().cloned().collect();
        ids.sort();
        ids.dedup();
        let raw_symbols = if ids.is_empty() {
            BTreeMap::new()
        } else {
            match self.hop(&ids, "instrument_id", "raw_symbol", today).await {
                Ok(map) => map,
                Err(e) => {
                    error!("DatabentoSymbolResolver: {}", e);
                    vendor_failure(&mut resolution, &e);
                    return resolution;
                }
            }
        };

        for (series_id, symbol) in continuous {
            let outcome = match instrument_ids.get(&symbol) {
                None => Err(ResolutionError::MissingHop {
                    series_id: series_id.clone(),
                    stage: "instrument_id".to_string(),
                    key: symbol,
                }),
                Some(instrument_id) => match raw_symbols.get(instrument_id) {
                    None => Err(ResolutionError::MissingHop {
                        series_id: series_id.clone(),
                        stage: "raw_symbol".to_string(),
                        key: instrument_id.clone(),
                    }),
                    Some(raw) => {
                        debug!(
                            "DatabentoSymbolResolver: {} -> {} -> {} -> {}",
                            series_id, symbol, instrument_id, raw
                        );
                        Ok(raw.clone())
                    }
                },
            };
            resolution.insert(series_id, outcome);
        }
        resolution
    }
}

#[async_trait]
impl SymbolResolver for DatabentoSymbolResolver {
    async fn resolve(&self, series_ids: &[String], scope: Option<&str>) -> Resolution {
        match scope {
            Some(CME_DATASET) => self.resolve_cme(series_ids).await,
            other => {
                let scope = other.unwrap_or("<none>").to_string();
                error!("DatabentoSymbolResolver: No resolver for dataset {}", scope);
                series_ids
                    .iter()
                    .map(|id| {
                        (
                            id.clone(),
                            Err(ResolutionError::UnsupportedScope {
                                series_id: id.clone(),
                                scope: scope.clone(),
                            }),
                        )
                    })
                    .collect()
            }
        }
    }
}
