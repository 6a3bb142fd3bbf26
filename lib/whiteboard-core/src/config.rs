//! Registrar configuration

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistrarConfig {
    /// Refresh all wirings concurrently when a handler or publisher changes
    pub parallel_refresh: bool,
    /// Collect prometheus metrics
    pub metrics: bool,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            parallel_refresh: true,
            metrics: false,
        }
    }
}
