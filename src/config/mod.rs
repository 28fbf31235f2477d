//! Environment-driven configuration.
//!
//! Every sub-config reads from a plain variable map so tests never touch the process environment.

mod extract_config;
mod sink_config;
mod vendor_config;

pub use extract_config::ExtractEnvConfig;
pub use sink_config::SinkEnvConfig;
pub use vendor_config::{DatabentoConfig, OnyxConfig, VendorEnvConfig};

use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataflowConfig {
    pub vendors: VendorEnvConfig,
    pub sinks: SinkEnvConfig,
    pub extract: ExtractEnvConfig,
}

impl DataflowConfig {
    pub fn from_env() -> Self {
        Self::from_vars(&std::env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        Self {
            vendors: VendorEnvConfig::from_vars(vars),
            sinks: SinkEnvConfig::from_vars(vars),
            extract: ExtractEnvConfig::from_vars(vars),
        }
    }
}
