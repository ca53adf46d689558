use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadLensConfig {
    // Chunking params
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default)]
    pub size_metric: SizeMetric,
    #[serde(default = "default_request_count")]
    pub default_request_count: usize,

    // Analyzer settings
    #[serde(default = "default_analyzer_model")]
    pub analyzer_model: String,
    #[serde(default)]
    pub analyzer_api_key: Option<String>,
    #[serde(default = "default_analyzer_base_url")]
    pub analyzer_base_url: String,
    #[serde(default = "default_analyzer_timeout_secs")]
    pub analyzer_timeout_secs: u64,
    #[serde(default = "default_analyzer_max_attempts")]
    pub analyzer_max_attempts: u32,
    #[serde(default = "default_analyzer_backoff_ms")]
    pub analyzer_initial_backoff_ms: u64,

    // Server settings
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

/// How the serialized size of a batch is measured against `max_batch_size`.
///
/// The size ceiling exists to keep a batch inside the analyzer's context
/// window, and either counting method approximates that well enough, so the
/// metric stays configurable rather than hard-coded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeMetric {
    #[default]
    Chars,
    Words,
}

impl SizeMetric {
    pub fn measure(&self, text: &str) -> usize {
        match self {
            SizeMetric::Chars => text.chars().count(),
            SizeMetric::Words => text.split_whitespace().count(),
        }
    }
}

impl Default for ThreadLensConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            size_metric: SizeMetric::default(),
            default_request_count: default_request_count(),
            analyzer_model: default_analyzer_model(),
            analyzer_api_key: None,
            analyzer_base_url: default_analyzer_base_url(),
            analyzer_timeout_secs: default_analyzer_timeout_secs(),
            analyzer_max_attempts: default_analyzer_max_attempts(),
            analyzer_initial_backoff_ms: default_analyzer_backoff_ms(),
            port: default_port(),
            database_path: default_database_path(),
        }
    }
}

// Default value functions
fn default_max_batch_size() -> usize {
    // ~100K characters per batch keeps us inside the analyzer's limits
    100_000
}
fn default_request_count() -> usize {
    1
}
fn default_analyzer_model() -> String {
    "claude-3-opus-20240229".to_string()
}
fn default_analyzer_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_analyzer_timeout_secs() -> u64 {
    120
}
fn default_analyzer_max_attempts() -> u32 {
    3
}
fn default_analyzer_backoff_ms() -> u64 {
    2000
}
fn default_port() -> u16 {
    8096
}
fn default_database_path() -> PathBuf {
    PathBuf::from("threadlens.db")
}
