use crate::pipeline::{PipelineOptions, StageTimeouts};
use crate::settings::SettingsPatch;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub about: AboutConfig,
    /// Initial settings, used only until settings are first persisted
    #[serde(default)]
    pub settings: SettingsPatch,
    /// Initial handler configs keyed by handler name
    #[serde(default)]
    pub handlers: HashMap<String, Value>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Public URL the read links in notifications point at
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            base_url: default_base_url(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_max_payload_bytes() -> u64 {
    1024 * 1024 // 1 MB
}

/// Ledger (fjall keyspace) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/ledger")
}

/// Enrichment worker pool and stage limits
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_summarize_timeout_secs")]
    pub summarize_timeout_secs: u64,
    #[serde(default = "default_notify_timeout_secs")]
    pub notify_timeout_secs: u64,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            channel_size: default_channel_size(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            summarize_timeout_secs: default_summarize_timeout_secs(),
            notify_timeout_secs: default_notify_timeout_secs(),
            preview_chars: default_preview_chars(),
        }
    }
}

impl PipelineConfig {
    pub fn timeouts(&self) -> StageTimeouts {
        StageTimeouts {
            fetch: Duration::from_secs(self.fetch_timeout_secs),
            summarize: Duration::from_secs(self.summarize_timeout_secs),
            notify: Duration::from_secs(self.notify_timeout_secs),
        }
    }

    /// Pipeline options for a server publishing read links under `base_url`
    pub fn options(&self, base_url: &str) -> PipelineOptions {
        PipelineOptions {
            timeouts: self.timeouts(),
            preview_chars: self.preview_chars,
            base_url: base_url.to_string(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_channel_size() -> usize {
    256
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_summarize_timeout_secs() -> u64 {
    120
}

fn default_notify_timeout_secs() -> u64 {
    15
}

fn default_preview_chars() -> usize {
    280
}

/// Values reported by `GET /about`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AboutConfig {
    /// Link shown on the about page; empty when not set
    #[serde(default)]
    pub project_url: String,
    /// Whether the process runs inside the published container image
    #[serde(default)]
    pub docker: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8000");
        assert_eq!(config.server.max_payload_bytes, 1024 * 1024);
        assert_eq!(config.pipeline.workers, 4);
        assert_eq!(config.ledger.path, PathBuf::from("data/ledger"));
        assert!(config.handlers.is_empty());
        assert_eq!(config.settings, SettingsPatch::default());
    }

    #[test]
    fn test_pipeline_options() {
        let pipeline = PipelineConfig {
            summarize_timeout_secs: 7,
            ..PipelineConfig::default()
        };
        let options = pipeline.options("http://reader.local");

        assert_eq!(options.timeouts.summarize, Duration::from_secs(7));
        assert_eq!(options.timeouts.fetch, Duration::from_secs(30));
        assert_eq!(options.preview_chars, 280);
        assert_eq!(options.base_url, "http://reader.local");
    }
}
