//! Gate window and polling settings for extraction runs.

use crate::application::gate::GateWindow;
use crate::domain::errors::ConfigurationError;
use std::collections::HashMap;
use std::time::Duration;

/// Extraction environment configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractEnvConfig {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub poll_seconds: f64,
    pub join_timeout_secs: u64,
    pub job_quota: Option<u64>,
}

impl Default for ExtractEnvConfig {
    fn default() -> Self {
        Self::from_vars(&HashMap::new())
    }
}

impl ExtractEnvConfig {
    pub fn from_env() -> Self {
        Self::from_vars(&std::env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let get = |key: &str| vars.get(key).filter(|v| !v.trim().is_empty()).cloned();

        Self {
            start_time: get("EXTRACT_START_TIME"),
            end_time: get("EXTRACT_END_TIME"),
            poll_seconds: get("GATE_POLL_SECONDS")
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| *v > 0.0)
                .unwrap_or(1.0),
            join_timeout_secs: get("GATE_JOIN_TIMEOUT_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(10),
            job_quota: get("EXTRACT_JOB_QUOTA").and_then(|v| v.parse::<u64>().ok()),
        }
    }

    /// Gate window from `EXTRACT_START_TIME` / `EXTRACT_END_TIME`; both are required
    pub fn window(&self) -> Result<GateWindow, ConfigurationError> {
        let missing = |parameter: &str| ConfigurationError::MissingParameter {
            parameter: parameter.to_string(),
            context: "extraction gate".to_string(),
        };
        let start = self
            .start_time
            .as_deref()
            .ok_or_else(|| missing("EXTRACT_START_TIME"))?;
        let end = self
            .end_time
            .as_deref()
            .ok_or_else(|| missing("EXTRACT_END_TIME"))?;
        GateWindow::parse(start, end)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_seconds)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }
}
