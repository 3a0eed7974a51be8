//! Plan data model — the validated DAG the compiler produces and the
//! executor consumes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnFail {
    Halt,
    Continue,
}

/// One planned tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: u32,
    #[serde(default)]
    pub thought: String,
    pub tool: String,
    pub function: String,
    #[serde(default)]
    pub inputs: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub depends_on: Vec<u32>,
    #[serde(default)]
    pub retry: u32,
    #[serde(default = "default_on_fail")]
    pub on_fail: OnFail,
    pub timeout: f64,
}

fn default_on_fail() -> OnFail {
    OnFail::Halt
}

/// A validated (or error) plan returned by the compiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Plan {
    Success {
        nodes: Vec<PlanNode>,
        final_output_node: u32,
    },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },
}

impl Plan {
    pub fn nodes(&self) -> &[PlanNode] {
        match self {
            Plan::Success { nodes, .. } => nodes,
            Plan::Error { .. } => &[],
        }
    }
}
