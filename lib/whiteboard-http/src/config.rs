//! HTTP publisher configuration

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpPublisherConfig {
    /// Scheme and authority every context path is published below
    pub base_url: String,
    /// Protocol bindings accepted for protocol handlers
    pub supported_bindings: Vec<String>,
}

impl Default for HttpPublisherConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            supported_bindings: vec!["soap".to_string()],
        }
    }
}

impl HttpPublisherConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn supports(&self, binding: &str) -> bool {
        self.supported_bindings
            .iter()
            .any(|b| b.eq_ignore_ascii_case(binding))
    }
}
