use crate::config::OnyxConfig;
use crate::domain::errors::ExtractError;
use crate::infrastructure::core::{HttpClientFactory, build_url_with_query, fetch_json_array};
use chrono::NaiveDate;
use reqwest_middleware::ClientWithMiddleware;
use serde_json::Value;
use tracing::debug;

const VENDOR: &str = "onyx";

/// REST client for the Onyx hub. Every call is bearer-authenticated and single-shot.
pub struct OnyxClient {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
}

impl OnyxClient {
    pub fn new(config: &OnyxConfig, max_retries: u32) -> Self {
        Self {
            client: HttpClientFactory::create_client(max_retries),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn get_array(
        &self,
        context: &str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<Value>, ExtractError> {
        let url = build_url_with_query(&format!("{}{}", self.base_url, path), params)
            .map_err(|e| ExtractError::transport(VENDOR, context, e))?;
        debug!("OnyxClient: GET {}", url);
        fetch_json_array(
            VENDOR,
            context,
            self.client.get(&url).bearer_auth(&self.api_key),
        )
        .await
    }

    /// `GET /tickers/ohlc/{symbol}/{period}?start=&end=`
    pub async fn ohlc(
        &self,
        symbol: &str,
        period: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Value>, ExtractError> {
        self.get_array(
            &format!("ohlc {}", symbol),
            &format!("/tickers/ohlc/{}/{}", symbol, period),
            &[("start", start.to_string()), ("end", end.to_string())],
        )
        .await
    }

    /// `GET /tickers/live/{root_id}`
    pub async fn live(&self, root_id: &str) -> Result<Vec<Value>, ExtractError> {
        self.get_array(
            &format!("live {}", root_id),
            &format!("/tickers/live/{}", root_id),
            &[],
        )
        .await
    }

    /// `GET /contracts?product_symbol=`
    pub async fn contracts(&self, product: &str) -> Result<Vec<Value>, ExtractError> {
        self.get_array(
            &format!("contracts {}", product),
            "/contracts",
            &[("product_symbol", product.to_string())],
        )
        .await
    }
}
