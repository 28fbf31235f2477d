//! Vendor credentials and endpoints.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct DatabentoConfig {
    pub api_key: String,
    pub hist_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnyxConfig {
    pub api_key: String,
    pub base_url: String,
}

/// Vendor environment configuration
#[derive(Debug, Clone, PartialEq)]
pub struct VendorEnvConfig {
    pub databento: DatabentoConfig,
    pub onyx: OnyxConfig,
    /// Transport-level retries for transient HTTP failures (0 disables)
    pub http_max_retries: u32,
}

impl Default for VendorEnvConfig {
    fn default() -> Self {
        Self::from_vars(&HashMap::new())
    }
}

impl VendorEnvConfig {
    pub fn from_env() -> Self {
        Self::from_vars(&std::env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let get = |key: &str, default: &str| {
            vars.get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            databento: DatabentoConfig {
                api_key: get("DATABENTO_API_KEY", ""),
                hist_url: get("DATABENTO_HIST_URL", "https://hist.databento.com"),
            },
            onyx: OnyxConfig {
                api_key: get("ONYX_API_KEY", ""),
                base_url: get("ONYX_URL", "https://api.onyxhub.com/v1"),
            },
            http_max_retries: get("HTTP_MAX_RETRIES", "0").parse::<u32>().unwrap_or(0),
        }
    }
}
