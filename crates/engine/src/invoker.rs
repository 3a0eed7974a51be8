//! Bounded-execution primitive: runs one tool with a timeout and retries,
//! normalizing whatever it returns into a `ResultEnvelope`.
//!
//! Grounded in the original's `execute_with_timeout` (thread + join with
//! timeout, no kill on timeout) and re-architected per §9 as a `tokio::time::timeout`
//! race against the tool future — an abandoned future is simply dropped and
//! never observed again, making it inert by construction.

use std::time::Duration;

use async_trait::async_trait;

use crate::trace::ResultEnvelope;

/// A callable tool. Implementations own their side effects; the invoker
/// only bounds wall time, retries, and normalizes the return shape.
#[async_trait]
pub trait Tool: Send + Sync {
    async fn call(&self, args: serde_json::Value) -> ResultEnvelope;
}

/// Run `tool` with a timeout and up to `retry` additional attempts on
/// failure, sleeping 1s between attempts. Returns the last envelope either
/// way, plus the number of attempts made.
pub async fn invoke_with_retry(
    tool: &dyn Tool,
    args: serde_json::Value,
    timeout: Duration,
    retry: u32,
) -> (ResultEnvelope, u32) {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let envelope = match tokio::time::timeout(timeout, tool.call(args.clone())).await {
            Ok(envelope) => envelope,
            Err(_) => ResultEnvelope::err(format!("tool timed out after {:.1}s", timeout.as_secs_f64())),
        };

        if envelope.is_success() || attempts > retry {
            return (envelope, attempts);
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
