use crate::domain::errors::ExtractError;
use reqwest::{Client, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde_json::Value;
use std::time::Duration;
use url::Url;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Creates an HTTP client for vendor calls.
    ///
    /// `max_retries` only covers transient transport failures (timeouts, 5xx).
    /// Zero keeps every vendor call single-shot.
    pub fn create_client(max_retries: u32) -> ClientWithMiddleware {
        let client = Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        let builder = ClientBuilder::new(client);
        if max_retries == 0 {
            return builder.build();
        }

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        builder
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }
}

/// Builds `base_url` with query parameters appended.
/// The middleware client has no `.query()`, so the query string is encoded here.
pub fn build_url_with_query<K, V>(base_url: &str, params: &[(K, V)]) -> Result<String, String>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut url = Url::parse(base_url).map_err(|e| format!("invalid url {}: {}", base_url, e))?;
    if !params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in params {
            pairs.append_pair(k.as_ref(), v.as_ref());
        }
    }
    Ok(url.to_string())
}

/// Sends `request` and expects HTTP 200 with a JSON body.
///
/// Any other status, a transport failure or a parse failure becomes one
/// [`ExtractError::Transport`] for this call only.
pub async fn fetch_json(
    vendor: &str,
    context: &str,
    request: RequestBuilder,
) -> Result<Value, ExtractError> {
    let response = request
        .send()
        .await
        .map_err(|e| ExtractError::transport(vendor, context, e))?;

    let status = response.status();
    if status != StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        return Err(ExtractError::transport(
            vendor,
            context,
            format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>()),
        ));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| ExtractError::transport(vendor, context, format!("malformed JSON: {}", e)))
}

/// Like [`fetch_json`], but the body must be a JSON array
pub async fn fetch_json_array(
    vendor: &str,
    context: &str,
    request: RequestBuilder,
) -> Result<Vec<Value>, ExtractError> {
    match fetch_json(vendor, context, request).await? {
        Value::Array(items) => Ok(items),
        other => Err(ExtractError::transport(
            vendor,
            context,
            format!("expected JSON array, got {}", json_kind(&other)),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
