//! Runtime configuration from the environment

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// YAML manifest of implementors and handlers
    pub manifest: PathBuf,
    pub poll_interval: Duration,
    pub base_url: String,
    pub log_format: LogFormat,
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let manifest = lookup("WHITEBOARD_MANIFEST")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("whiteboard.yaml"));

        let poll_interval = match lookup("WHITEBOARD_POLL_INTERVAL_SECS") {
            Some(secs) => {
                let secs: u64 = secs
                    .trim()
                    .parse()
                    .with_context(|| format!("WHITEBOARD_POLL_INTERVAL_SECS is not a number: {secs}"))?;
                if secs == 0 {
                    bail!("WHITEBOARD_POLL_INTERVAL_SECS must be positive");
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(30),
        };

        let base_url =
            lookup("WHITEBOARD_BASE_URL").unwrap_or_else(|| "http://localhost:8080".to_string());

        let log_format = match lookup("WHITEBOARD_LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => bail!("Unknown WHITEBOARD_LOG_FORMAT: {other}"),
        };

        Ok(Self {
            manifest,
            poll_interval,
            base_url,
            log_format,
        })
    }
}
