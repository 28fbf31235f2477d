use crate::config::DatabentoConfig;
use crate::domain::errors::ExtractError;
use crate::infrastructure::core::{HttpClientFactory, fetch_json};
use chrono::NaiveDate;
use reqwest::header::CONTENT_TYPE;
use reqwest_middleware::ClientWithMiddleware;
use serde_json::Value;
use tracing::debug;

const VENDOR: &str = "databento";

/// Symbology slice of the Databento historical HTTP API
pub struct DatabentoHistClient {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
}

/// One `symbology.resolve` request
#[derive(Debug, Clone)]
pub struct SymbologyRequest<'a> {
    pub dataset: &'a str,
    pub symbols: &'a [String],
    pub stype_in: &'a str,
    pub stype_out: &'a str,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl DatabentoHistClient {
    pub fn new(config: &DatabentoConfig, max_retries: u32) -> Self {
        Self {
            client: HttpClientFactory::create_client(max_retries),
            base_url: config.hist_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    /// `POST /v0/symbology.resolve`, form-encoded, API key as basic-auth user
    pub async fn symbology_resolve(
        &self,
        request: &SymbologyRequest<'_>,
    ) -> Result<Value, ExtractError> {
        let context = format!("symbology {} -> {}", request.stype_in, request.stype_out);
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("dataset", request.dataset)
            .append_pair("symbols", &request.symbols.join(","))
            .append_pair("stype_in", request.stype_in)
            .append_pair("stype_out", request.stype_out)
            .append_pair("start_date", &request.start_date.to_string())
            .append_pair("end_date", &request.end_date.to_string())
            .finish();

        let url = format!("{}/v0/symbology.resolve", self.base_url);
        debug!("DatabentoHistClient: POST {} ({})", url, context);
        fetch_json(
            VENDOR,
            &context,
            self.client
                .post(&url)
                .basic_auth(&self.api_key, Some(""))
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body),
        )
        .await
    }
}
