//! The ordered, typed event stream pushed to callers, plus the per-run
//! context threaded through the compiler and executor.
//!
//! Mirrors the tagged-enum event style of `crates/gateway/src/runtime/runs.rs`'s
//! `RunEvent` and `crates/gateway/src/runtime/turn.rs`'s `TurnEvent`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::plan::Plan;

/// One entry in the ordered event stream. Every event carries `run_id`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Status { run_id: Uuid, message: String },
    PlanCreated { run_id: Uuid, plan: Plan },
    StepStart { run_id: Uuid, step_index: usize, tool: String, function: String, thought: Option<String> },
    DebugArgs { run_id: Uuid, step_index: usize, args: serde_json::Value },
    ApprovalRequired { run_id: Uuid, step_index: usize, tool: String, function: String },
    StepComplete {
        run_id: Uuid,
        step_index: usize,
        tool: String,
        status: crate::trace::NodeStatus,
        payload: serde_json::Value,
        duration: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
    },
    FinalAnswer { run_id: Uuid, payload: String },
    Error { run_id: Uuid, message: String },
}

/// Sink the executor/compiler write events to; the caller reads the paired
/// receiver. An unbounded channel keeps the writer (the single scheduling
/// task) from ever blocking on a slow consumer.
pub type EventSender = tokio::sync::mpsc::UnboundedSender<Event>;
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<Event>;

/// A run-scoped cancellation flag. Cloning shares the underlying state.
/// Grounded in `crates/gateway/src/runtime/cancel.rs`'s `CancelToken`.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)) }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// The human (or automated) decision on a dangerous-tool approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Denied,
}

/// Callback consulted synchronously when a dangerous tool needs approval.
/// Boxed so callers can close over UI state, a channel, or an
/// always-approve test stub.
pub type ApprovalDecider = Arc<dyn Fn(&str, &str) -> ApprovalDecision + Send + Sync>;

/// Per-run state threaded through the compiler and executor.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub trace_version: u32,
    pub events: EventSender,
    pub approval_decider: ApprovalDecider,
    pub cancellation_signal: CancelToken,
}

impl RunContext {
    pub fn new(events: EventSender, approval_decider: ApprovalDecider) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            trace_version: 1,
            events,
            approval_decider,
            cancellation_signal: CancelToken::new(),
        }
    }

    pub fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

/// An approval decider that always approves — useful for tests and for
/// deployments with `require_approval = false`.
pub fn always_approve() -> ApprovalDecider {
    Arc::new(|_tool, _function| ApprovalDecision::Approved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_lifecycle() {
        let t = CancelToken::new();
        assert!(!t.is_cancelled());
        t.cancel();
        assert!(t.is_cancelled());
    }

    #[test]
    fn cancel_token_clone_shares_state() {
        let t = CancelToken::new();
        let c = t.clone();
        t.cancel();
        assert!(c.is_cancelled());
    }

    #[tokio::test]
    async fn run_context_emits_events_in_order() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = RunContext::new(tx, always_approve());
        ctx.emit(Event::Status { run_id: ctx.run_id, message: "a".into() });
        ctx.emit(Event::Status { run_id: ctx.run_id, message: "b".into() });
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        match (first, second) {
            (Event::Status { message: m1, .. }, Event::Status { message: m2, .. }) => {
                assert_eq!(m1, "a");
                assert_eq!(m2, "b");
            }
            _ => panic!("expected status events"),
        }
    }

    #[test]
    fn always_approve_approves() {
        let decider = always_approve();
        assert_eq!((*decider)("x", "y"), ApprovalDecision::Approved);
    }
}
