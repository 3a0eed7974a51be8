//! Reasoning-LLM client contract: `call(prompt, model?) -> {status, response?|error?}`.
//!
//! The engine depends only on `sa_providers::LlmProvider::chat` — never on a
//! specific provider implementation — and routes every call through the
//! Throttler's per-provider bucket/circuit plus the global minimum spacing.

use std::sync::Arc;

use sa_domain::tool::Message;
use sa_providers::{ChatRequest, LlmProvider};

use crate::throttler::{Outcome, Throttler};

/// Outcome of a single reasoning-LLM call.
pub enum LlmCallResult {
    Response(String),
    Error(String),
}

/// Call the reasoning LLM for `prompt`, through the throttler's bucket +
/// circuit breaker + global spacing for `provider_id`, retrying up to
/// `max_retries` additional times on a transient failure (1s between
/// attempts, same cadence as `invoker::invoke_with_retry`).
pub async fn call_llm(
    provider: &dyn LlmProvider,
    throttler: &Throttler,
    prompt: &str,
    estimated_tokens: f64,
    max_retries: u32,
) -> LlmCallResult {
    let provider_id = provider.provider_id().to_string();
    let req = ChatRequest {
        messages: vec![Message::user(prompt)],
        ..Default::default()
    };

    let mut attempts = 0u32;
    let mut last_error = String::new();
    loop {
        attempts += 1;

        if throttler.is_open(&provider_id) {
            return LlmCallResult::Error(format!("circuit open for provider '{provider_id}'"));
        }

        throttler.enforce_global_spacing().await;
        throttler.acquire(&provider_id, estimated_tokens).await;

        match provider.chat(req.clone()).await {
            Ok(resp) => {
                throttler.report(&provider_id, Outcome::Success);
                return LlmCallResult::Response(resp.content);
            }
            Err(e) => {
                throttler.report(&provider_id, Outcome::Failure);
                last_error = e.to_string();
            }
        }

        if attempts > max_retries {
            return LlmCallResult::Error(last_error);
        }

        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
}

/// Shared handle to a reasoning provider, cheaply cloned into a `RunContext`.
pub type SharedProvider = Arc<dyn LlmProvider>;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sa_domain::capability::LlmCapabilities;
    use sa_domain::error::{Error as DomainError, Result as DomainResult};
    use sa_domain::stream::{BoxStream, StreamEvent};
    use sa_providers::{EmbeddingsRequest, EmbeddingsResponse};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FailNTimesThenSucceed(AtomicU32, u32);

    #[async_trait]
    impl LlmProvider for FailNTimesThenSucceed {
        async fn chat(&self, _req: ChatRequest) -> DomainResult<sa_providers::ChatResponse> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            if n < self.1 {
                Err(DomainError::Other("transient".to_string()))
            } else {
                Ok(sa_providers::ChatResponse {
                    content: "ok".to_string(),
                    tool_calls: vec![],
                    usage: None,
                    model: "fake".into(),
                    finish_reason: Some("stop".into()),
                })
            }
        }
        async fn chat_stream(&self, _req: ChatRequest) -> DomainResult<BoxStream<'static, DomainResult<StreamEvent>>> {
            unimplemented!("not used in llm tests")
        }
        async fn embeddings(&self, _req: EmbeddingsRequest) -> DomainResult<EmbeddingsResponse> {
            unimplemented!("not used in llm tests")
        }
        fn capabilities(&self) -> &LlmCapabilities {
            static CAPS: std::sync::OnceLock<LlmCapabilities> = std::sync::OnceLock::new();
            CAPS.get_or_init(Default::default)
        }
        fn provider_id(&self) -> &str {
            "fake"
        }
    }

    fn test_config() -> crate::config::EngineConfig {
        crate::config::EngineConfig { min_call_spacing_seconds: 0.0, ..Default::default() }
    }

    #[tokio::test]
    async fn retries_exactly_up_to_max_retries_then_succeeds() {
        let provider = FailNTimesThenSucceed(AtomicU32::new(0), 2);
        let throttler = Throttler::new(&test_config());
        let result = call_llm(&provider, &throttler, "hi", 10.0, 2).await;
        assert!(matches!(result, LlmCallResult::Response(s) if s == "ok"));
    }

    #[tokio::test]
    async fn exhausting_retries_surfaces_last_error() {
        let provider = FailNTimesThenSucceed(AtomicU32::new(0), 99);
        let throttler = Throttler::new(&test_config());
        let result = call_llm(&provider, &throttler, "hi", 10.0, 1).await;
        assert!(matches!(result, LlmCallResult::Error(_)));
    }
}
