//! Engine-internal error taxonomy.
//!
//! These never cross the engine's public boundary as a `Result::Err` — every
//! fallible path the executor/compiler drive is converted into an `Event` at
//! the seam (`error`, or a node-level `step_complete` with status `error`).
//! `EngineError` exists for the internal plumbing that builds those events.

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("planning: {0}")]
    Planning(String),

    #[error("scheduling: {0}")]
    Scheduling(String),

    #[error("node {step_index}: {message}")]
    Node { step_index: usize, message: String },

    #[error("throttle: {0}")]
    Throttle(String),

    #[error("config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
