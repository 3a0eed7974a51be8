//! Process-wide engine configuration, loaded from a TOML file with every
//! field defaulting when absent — same `#[serde(default = "...")]` shape as
//! `sa_domain::config::Config`.

use serde::{Deserialize, Serialize};

fn d_default_timeout() -> f64 {
    30.0
}
fn d_max_retries() -> u32 {
    2
}
fn d_trace_limit_chars() -> usize {
    50_000
}
fn d_require_approval() -> bool {
    true
}
fn d_max_workers() -> usize {
    10
}
fn d_max_concurrent_traces() -> usize {
    4
}
fn d_primary_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn d_groq_rpm() -> u32 {
    30
}
fn d_groq_tpm() -> u32 {
    40_000
}
fn d_llm_max_retries() -> u32 {
    3
}
fn d_backoff_max_seconds() -> f64 {
    30.0
}
fn d_min_call_spacing_seconds() -> f64 {
    3.0
}
fn d_circuit_failure_threshold() -> u32 {
    10
}
fn d_circuit_recovery_seconds() -> f64 {
    30.0
}
fn d_rate_limited_penalty_seconds() -> f64 {
    5.0
}
fn d_debug_mode() -> bool {
    false
}
fn d_http_host() -> String {
    "127.0.0.1".to_string()
}
fn d_http_port() -> u16 {
    8080
}

/// Process-wide configuration for the DAG engine.
///
/// Loaded from the path in `SA_ENGINE_CONFIG` (default `engine.toml`); every
/// field defaults when the file is absent or a key is missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "d_default_timeout")]
    pub default_timeout: f64,
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
    #[serde(default = "d_trace_limit_chars")]
    pub trace_limit_chars: usize,
    #[serde(default = "d_require_approval")]
    pub require_approval: bool,
    #[serde(default = "d_max_workers")]
    pub max_workers: usize,
    #[serde(default = "d_max_concurrent_traces")]
    pub max_concurrent_traces: usize,
    #[serde(default = "d_primary_model")]
    pub primary_model: String,
    #[serde(default = "d_groq_rpm")]
    pub groq_rpm: u32,
    #[serde(default = "d_groq_tpm")]
    pub groq_tpm: u32,
    #[serde(default = "d_llm_max_retries")]
    pub llm_max_retries: u32,
    #[serde(default = "d_backoff_max_seconds")]
    pub backoff_max_seconds: f64,
    #[serde(default = "d_min_call_spacing_seconds")]
    pub min_call_spacing_seconds: f64,
    #[serde(default = "d_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,
    #[serde(default = "d_circuit_recovery_seconds")]
    pub circuit_recovery_seconds: f64,
    #[serde(default = "d_rate_limited_penalty_seconds")]
    pub rate_limited_penalty_seconds: f64,
    #[serde(default = "d_debug_mode")]
    pub debug_mode: bool,
    #[serde(default = "d_http_host")]
    pub http_host: String,
    #[serde(default = "d_http_port")]
    pub http_port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout: d_default_timeout(),
            max_retries: d_max_retries(),
            trace_limit_chars: d_trace_limit_chars(),
            require_approval: d_require_approval(),
            max_workers: d_max_workers(),
            max_concurrent_traces: d_max_concurrent_traces(),
            primary_model: d_primary_model(),
            groq_rpm: d_groq_rpm(),
            groq_tpm: d_groq_tpm(),
            llm_max_retries: d_llm_max_retries(),
            backoff_max_seconds: d_backoff_max_seconds(),
            min_call_spacing_seconds: d_min_call_spacing_seconds(),
            circuit_failure_threshold: d_circuit_failure_threshold(),
            circuit_recovery_seconds: d_circuit_recovery_seconds(),
            rate_limited_penalty_seconds: d_rate_limited_penalty_seconds(),
            debug_mode: d_debug_mode(),
            http_host: d_http_host(),
            http_port: d_http_port(),
        }
    }
}

impl EngineConfig {
    /// Load from `SA_ENGINE_CONFIG` (default `engine.toml`), falling back to
    /// defaults entirely when the file does not exist.
    pub fn load() -> crate::error::Result<Self> {
        let path = std::env::var("SA_ENGINE_CONFIG").unwrap_or_else(|_| "engine.toml".into());
        if !std::path::Path::new(&path).exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        toml::from_str(&raw).map_err(|e| crate::error::EngineError::Config(e.to_string()))
    }
}
