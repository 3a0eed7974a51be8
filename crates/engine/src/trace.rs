//! The trace: one entry per executed node, and the normalized result
//! envelope every tool invocation produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single node's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Success,
    Error,
    Skipped,
}

/// Authority-Validator-derived quality annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Correct,
    Degraded,
    Violated,
    Failed,
}

/// The normalized `{status, result|error}` shape every tool call settles
/// into, regardless of what the underlying tool returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ResultEnvelope {
    Success {
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(flatten)]
        extra: serde_json::Map<String, serde_json::Value>,
    },
    Error {
        error: String,
    },
}

impl ResultEnvelope {
    pub fn is_success(&self) -> bool {
        matches!(self, ResultEnvelope::Success { .. })
    }

    pub fn ok(result: serde_json::Value) -> Self {
        ResultEnvelope::Success { result: Some(result), extra: Default::default() }
    }

    pub fn err(message: impl Into<String>) -> Self {
        ResultEnvelope::Error { error: message.into() }
    }

    /// The payload to expose for placeholder resolution / synthesis: the
    /// `result` field on success, or a `{"error": ...}` object on failure.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            ResultEnvelope::Success { result, extra } => {
                if let Some(r) = result {
                    r.clone()
                } else {
                    serde_json::Value::Object(extra.clone())
                }
            }
            ResultEnvelope::Error { error } => {
                serde_json::json!({ "error": error })
            }
        }
    }
}

/// One executed node's complete record, written exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub step_index: usize,
    pub tool: String,
    pub function: String,
    pub status: NodeStatus,
    pub input: serde_json::Value,
    pub result: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration: f64,
    pub quality: Quality,
    pub violations: Vec<String>,
    pub depends_on: Vec<usize>,
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}
