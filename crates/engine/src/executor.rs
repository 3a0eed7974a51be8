//! DAG Executor: topologically schedules a validated Plan across a bounded
//! worker pool, propagates dependency failure, enforces approvals, and
//! records per-node trace entries.
//!
//! Grounded in `examples/original_source/src/smith/core/orchestrator.py`'s
//! ready/wait/harvest loop, re-architected per §9 to fix the original's
//! placeholder `duration=0.0`, main-thread-blocking rate limiter, and
//! missing `step_complete` emissions on the skip path.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use sa_providers::LlmProvider;

use crate::authority;
use crate::config::EngineConfig;
use crate::descriptor::{Domain, Registry};
use crate::events::{ApprovalDecision, Event, RunContext};
use crate::invoker::{invoke_with_retry, Tool};
use crate::llm::{call_llm, LlmCallResult};
use crate::placeholder::resolve_placeholders;
use crate::plan::Plan;
use crate::throttler::{Outcome, Throttler};
use crate::trace::{NodeStatus, Quality, ResultEnvelope, TraceEntry};
use crate::util::truncate_str;

const SYNTHESIS_INSTRUCTIONS: &str = "1. Answer ONLY using information present in the trace.\n\
2. If something is missing or a tool failed, say that explicitly.\n\
3. Do not invent URLs, numbers, or tools that are not present.\n";

struct WorkerResult {
    index: usize,
    entry: TraceEntry,
}

/// Run a validated plan to completion. Returns the final trace (in
/// `step_index` order) on a clean finish; `None` slots indicate a node the
/// run never reached before a fatal error terminated it.
pub async fn run_dag(
    plan: &Plan,
    registry: &Registry,
    tools: &HashMap<String, Arc<dyn Tool>>,
    ctx: &RunContext,
    config: &EngineConfig,
    throttler: Arc<Throttler>,
    provider: Arc<dyn LlmProvider>,
) -> Vec<Option<TraceEntry>> {
    ctx.emit(Event::Status { run_id: ctx.run_id, message: "run started".into() });

    let Plan::Success { nodes, final_output_node } = plan else {
        ctx.emit(Event::Error { run_id: ctx.run_id, message: "run_dag called with a non-success plan".into() });
        return vec![];
    };

    ctx.emit(Event::PlanCreated { run_id: ctx.run_id, plan: plan.clone() });

    let n = nodes.len();
    let id_to_index: HashMap<u32, usize> = nodes.iter().enumerate().map(|(i, node)| (node.id, i)).collect();

    // Preparation: normalize depends_on ids -> indices, dropping any edge
    // that would reference a later node (would-be-cycle by construction).
    let deps_idx: Vec<Vec<usize>> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            node.depends_on
                .iter()
                .filter_map(|dep_id| id_to_index.get(dep_id).copied())
                .filter(|&dep_idx| dep_idx < i)
                .collect()
        })
        .collect();

    let mut submitted: HashSet<usize> = HashSet::new();
    let mut completed: HashSet<usize> = HashSet::new();
    let mut trace: Vec<Option<TraceEntry>> = vec![None; n];
    let mut in_flight: usize = 0;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<WorkerResult>();
    let semaphore = Arc::new(tokio::sync::Semaphore::new(config.max_workers.max(1)));

    loop {
        if completed.len() == n {
            break;
        }

        if ctx.cancellation_signal.is_cancelled() {
            ctx.emit(Event::Error { run_id: ctx.run_id, message: "run cancelled".into() });
            return trace;
        }

        // ── Ready scan ──────────────────────────────────────────────
        let mut made_progress = true;
        while made_progress {
            made_progress = false;
            for i in 0..n {
                if submitted.contains(&i) {
                    continue;
                }
                if !deps_idx[i].iter().all(|d| completed.contains(d)) {
                    continue;
                }

                let node = &nodes[i];
                let dep_failed = deps_idx[i].iter().any(|&d| {
                    trace[d].as_ref().map(|e| e.status != NodeStatus::Success).unwrap_or(true)
                });

                if dep_failed {
                    let now = Utc::now();
                    let entry = TraceEntry {
                        step_index: i,
                        tool: node.tool.clone(),
                        function: node.function.clone(),
                        status: NodeStatus::Skipped,
                        input: serde_json::Value::Object(node.inputs.clone()),
                        result: serde_json::Value::Null,
                        error: Some("Upstream dependency failed".to_string()),
                        duration: 0.0,
                        quality: Quality::Failed,
                        violations: vec![],
                        depends_on: deps_idx[i].clone(),
                        meta: Default::default(),
                        started_at: now,
                        completed_at: now,
                    };
                    ctx.emit(Event::StepComplete {
                        run_id: ctx.run_id,
                        step_index: i,
                        tool: node.tool.clone(),
                        status: NodeStatus::Skipped,
                        payload: serde_json::json!({ "error": "Upstream dependency failed" }),
                        duration: 0.0,
                        warning: None,
                    });
                    trace[i] = Some(entry);
                    submitted.insert(i);
                    completed.insert(i);
                    made_progress = true;
                    continue;
                }

                let descriptor = match registry.get(&node.tool) {
                    Some(d) => d.clone(),
                    None => {
                        let now = Utc::now();
                        let entry = TraceEntry {
                            step_index: i,
                            tool: node.tool.clone(),
                            function: node.function.clone(),
                            status: NodeStatus::Error,
                            input: serde_json::Value::Object(node.inputs.clone()),
                            result: serde_json::Value::Null,
                            error: Some("missing descriptor at execution time".to_string()),
                            duration: 0.0,
                            quality: Quality::Failed,
                            violations: vec![],
                            depends_on: deps_idx[i].clone(),
                            meta: Default::default(),
                            started_at: now,
                            completed_at: now,
                        };
                        ctx.emit(Event::StepComplete {
                            run_id: ctx.run_id,
                            step_index: i,
                            tool: node.tool.clone(),
                            status: NodeStatus::Error,
                            payload: serde_json::json!({ "error": "missing descriptor at execution time" }),
                            duration: 0.0,
                            warning: None,
                        });
                        trace[i] = Some(entry);
                        submitted.insert(i);
                        completed.insert(i);
                        made_progress = true;
                        continue;
                    }
                };

                if descriptor.dangerous && config.require_approval {
                    ctx.emit(Event::ApprovalRequired {
                        run_id: ctx.run_id,
                        step_index: i,
                        tool: node.tool.clone(),
                        function: node.function.clone(),
                    });
                    let decision = (*ctx.approval_decider)(&node.tool, &node.function);
                    if decision == ApprovalDecision::Denied {
                        ctx.emit(Event::Error {
                            run_id: ctx.run_id,
                            message: format!("approval denied for tool '{}'", node.tool),
                        });
                        return trace;
                    }
                }

                ctx.emit(Event::StepStart {
                    run_id: ctx.run_id,
                    step_index: i,
                    tool: node.tool.clone(),
                    function: node.function.clone(),
                    thought: if node.thought.is_empty() { None } else { Some(node.thought.clone()) },
                });

                let resolved_inputs = if descriptor.domain == Domain::Reasoning {
                    let mut resolved = node.inputs.clone();
                    if let Some(serde_json::Value::String(prompt)) = resolved.get("prompt").cloned() {
                        let snapshot: Vec<TraceEntry> =
                            trace.iter().filter_map(|e| e.clone()).collect();
                        resolved.insert(
                            "prompt".to_string(),
                            serde_json::Value::String(resolve_placeholders(&prompt, &snapshot)),
                        );
                    }
                    resolved
                } else {
                    node.inputs.clone()
                };

                let mut debug_args = resolved_inputs.clone();
                if descriptor.domain == Domain::Reasoning {
                    if let Some(prompt) = resolved_inputs.get("prompt").and_then(|v| v.as_str()) {
                        let fabrication_warnings = authority::check_fabrication_risk(&descriptor, prompt);
                        if !fabrication_warnings.is_empty() {
                            tracing::warn!(
                                run_id = %ctx.run_id,
                                step_index = i,
                                tool = %node.tool,
                                warnings = ?fabrication_warnings,
                                "fabrication risk"
                            );
                            debug_args.insert(
                                "_fabrication_warnings".to_string(),
                                serde_json::json!(fabrication_warnings),
                            );
                        }
                    }
                }

                ctx.emit(Event::DebugArgs {
                    run_id: ctx.run_id,
                    step_index: i,
                    args: serde_json::Value::Object(debug_args),
                });

                submitted.insert(i);
                in_flight += 1;

                let tool_impl = tools.get(&node.tool).cloned();
                let timeout = std::time::Duration::from_secs_f64(node.timeout);
                let retry = node.retry;
                let depends_on = deps_idx[i].clone();
                let tx = tx.clone();
                let sem = semaphore.clone();
                let throttler = throttler.clone();
                let provider = provider.clone();
                let config_primary_model = config.primary_model.clone();
                let node_tool = node.tool.clone();
                let node_function = node.function.clone();

                tokio::spawn(async move {
                    let _permit = sem.acquire_owned().await.ok();
                    let started_at = Utc::now();
                    let start_instant = Instant::now();

                    let prompt_for_validation = resolved_inputs
                        .get("prompt")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string());

                    let envelope = match tool_impl {
                        Some(tool) => {
                            if descriptor.domain == Domain::Reasoning {
                                throttler.enforce_global_spacing().await;
                                throttler.acquire(&config_primary_model, 1000.0).await;
                            }
                            let (envelope, _attempts) = invoke_with_retry(
                                tool.as_ref(),
                                serde_json::Value::Object(resolved_inputs.clone()),
                                timeout,
                                retry,
                            )
                            .await;
                            if descriptor.domain == Domain::Reasoning {
                                let outcome =
                                    if envelope.is_success() { Outcome::Success } else { Outcome::Failure };
                                throttler.report(&config_primary_model, outcome);
                            }
                            envelope
                        }
                        None => ResultEnvelope::err(format!(
                            "no implementation registered for tool '{node_tool}'"
                        )),
                    };

                    let verdict = authority::validate(&descriptor, prompt_for_validation.as_deref(), &envelope);
                    let duration = start_instant.elapsed().as_secs_f64();
                    let completed_at = Utc::now();

                    let status = if envelope.is_success() { NodeStatus::Success } else { NodeStatus::Error };
                    let error = match &envelope {
                        ResultEnvelope::Error { error } => Some(error.clone()),
                        _ => None,
                    };

                    let entry = TraceEntry {
                        step_index: i,
                        tool: node_tool.clone(),
                        function: node_function,
                        status,
                        input: serde_json::Value::Object(resolved_inputs),
                        result: envelope.payload(),
                        error,
                        duration,
                        quality: verdict.quality,
                        violations: verdict.violations,
                        depends_on,
                        meta: Default::default(),
                        started_at,
                        completed_at,
                    };

                    let _ = tx.send(WorkerResult { index: i, entry });
                });
            }
        }

        // ── Wait ────────────────────────────────────────────────────
        if in_flight == 0 {
            ctx.emit(Event::Error {
                run_id: ctx.run_id,
                message: format!(
                    "deadlock detected: {} of {n} nodes completed but none are ready or in flight",
                    completed.len()
                ),
            });
            return trace;
        }

        let Some(result) = rx.recv().await else {
            ctx.emit(Event::Error { run_id: ctx.run_id, message: "worker channel closed unexpectedly".into() });
            return trace;
        };
        in_flight -= 1;

        // ── Harvest ─────────────────────────────────────────────────
        let warning = crate::quality::generate_quality_warning(&result.entry);
        ctx.emit(Event::StepComplete {
            run_id: ctx.run_id,
            step_index: result.index,
            tool: result.entry.tool.clone(),
            status: result.entry.status,
            payload: result.entry.result.clone(),
            duration: result.entry.duration,
            warning,
        });
        trace[result.index] = Some(result.entry);
        completed.insert(result.index);
    }

    // ── Final synthesis ─────────────────────────────────────────────
    let completed_trace: Vec<TraceEntry> = trace.iter().filter_map(|e| e.clone()).collect();
    let quality = crate::quality::grade_execution_quality(&completed_trace);
    tracing::info!(
        run_id = %ctx.run_id,
        score = quality.score,
        overall_quality = ?quality.overall_quality,
        issues = ?quality.issues,
        "execution quality graded"
    );

    let view: Vec<serde_json::Value> = trace
        .iter()
        .filter_map(|e| e.as_ref())
        .map(|e| {
            serde_json::json!({
                "step_index": e.step_index,
                "tool": e.tool,
                "function": e.function,
                "status": e.status,
                "duration": e.duration,
                "input": e.input,
                "result": e.result,
            })
        })
        .collect();

    let serialized = serde_json::to_string(&view).unwrap_or_default();
    let truncated = truncate_str(&serialized, config.trace_limit_chars);
    let synthesis_prompt = format!(
        "{SYNTHESIS_INSTRUCTIONS}\nFinal output node: {final_output_node}\nTrace:\n{truncated}"
    );

    match call_llm(provider.as_ref(), &throttler, &synthesis_prompt, 2000.0, config.llm_max_retries).await {
        LlmCallResult::Response(answer) => {
            ctx.emit(Event::FinalAnswer { run_id: ctx.run_id, payload: answer });
        }
        LlmCallResult::Error(e) => {
            ctx.emit(Event::Error { run_id: ctx.run_id, message: format!("final synthesis failed: {e}") });
        }
    }

    trace
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanNode;
    use async_trait::async_trait;
    use sa_domain::stream::{BoxStream, StreamEvent};
    use sa_providers::{ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse};

    struct EchoDataTool;
    #[async_trait]
    impl Tool for EchoDataTool {
        async fn call(&self, args: serde_json::Value) -> ResultEnvelope {
            ResultEnvelope::ok(args)
        }
    }

    struct RaisingTool;
    #[async_trait]
    impl Tool for RaisingTool {
        async fn call(&self, _args: serde_json::Value) -> ResultEnvelope {
            ResultEnvelope::err("simulated failure")
        }
    }

    struct SleepyTool(std::time::Duration);
    #[async_trait]
    impl Tool for SleepyTool {
        async fn call(&self, _args: serde_json::Value) -> ResultEnvelope {
            tokio::time::sleep(self.0).await;
            ResultEnvelope::ok(serde_json::json!("never observed"))
        }
    }

    struct FakeProvider {
        scripted_response: String,
    }

    #[async_trait]
    impl LlmProvider for FakeProvider {
        async fn chat(&self, _req: ChatRequest) -> sa_domain::error::Result<ChatResponse> {
            Ok(ChatResponse {
                content: self.scripted_response.clone(),
                tool_calls: vec![],
                usage: None,
                model: "fake".into(),
                finish_reason: Some("stop".into()),
            })
        }
        async fn chat_stream(
            &self,
            _req: ChatRequest,
        ) -> sa_domain::error::Result<BoxStream<'static, sa_domain::error::Result<StreamEvent>>> {
            unimplemented!("not used in executor tests")
        }
        async fn embeddings(&self, _req: EmbeddingsRequest) -> sa_domain::error::Result<EmbeddingsResponse> {
            unimplemented!("not used in executor tests")
        }
        fn capabilities(&self) -> &sa_domain::capability::LlmCapabilities {
            static CAPS: std::sync::OnceLock<sa_domain::capability::LlmCapabilities> = std::sync::OnceLock::new();
            CAPS.get_or_init(Default::default)
        }
        fn provider_id(&self) -> &str {
            "fake"
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig { max_workers: 4, min_call_spacing_seconds: 0.0, ..EngineConfig::default() }
    }

    fn data_descriptor(name: &str) -> String {
        format!(
            r#"{{"name":"{name}","function_symbol":"fetch","module_symbol":"m","description":"d","domain":"data",
                "parameters":{{"properties":{{"city":{{"type":"string"}}}},"required":[]}}}}"#
        )
    }

    fn reasoning_descriptor() -> &'static str {
        r#"{"name":"llm_caller","function_symbol":"call_llm","module_symbol":"m","description":"d","domain":"reasoning",
            "prohibited_outputs":["numeric_data","factual_claims","real_time_data"],
            "parameters":{"properties":{"prompt":{"type":"string"}},"required":["prompt"]}}"#
    }

    fn node(id: u32, tool: &str, function: &str, inputs: serde_json::Value, depends_on: Vec<u32>) -> PlanNode {
        PlanNode {
            id,
            thought: String::new(),
            tool: tool.to_string(),
            function: function.to_string(),
            inputs: inputs.as_object().cloned().unwrap_or_default(),
            depends_on,
            retry: 0,
            on_fail: crate::plan::OnFail::Halt,
            timeout: 5.0,
        }
    }

    async fn drain(mut rx: crate::events::EventReceiver) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        events
    }

    #[tokio::test]
    async fn linear_chain_runs_in_dependency_order() {
        let registry = Registry::from_json(&format!(
            r#"{{"tools":[{}, {}]}}"#,
            data_descriptor("weather_fetcher"),
            reasoning_descriptor()
        ))
        .unwrap();
        let plan = Plan::Success {
            nodes: vec![
                node(0, "weather_fetcher", "fetch", serde_json::json!({"city": "Paris"}), vec![]),
                node(1, "llm_caller", "call_llm", serde_json::json!({"prompt": "Summarize the weather."}), vec![0]),
            ],
            final_output_node: 1,
        };
        let mut tools: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        tools.insert("weather_fetcher".into(), Arc::new(EchoDataTool));
        tools.insert("llm_caller".into(), Arc::new(EchoDataTool));

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = RunContext::new(tx, crate::events::always_approve());
        let throttler = Arc::new(Throttler::new(&test_config()));
        let provider: Arc<dyn LlmProvider> =
            Arc::new(FakeProvider { scripted_response: "All set.".into() });

        let trace =
            run_dag(&plan, &registry, &tools, &ctx, &test_config(), throttler, provider).await;
        drop(ctx);
        let events = drain(rx).await;

        assert_eq!(trace.len(), 2);
        assert!(trace[0].as_ref().unwrap().status == NodeStatus::Success);
        assert!(trace[1].as_ref().unwrap().status == NodeStatus::Success);
        assert!(matches!(events.last(), Some(Event::FinalAnswer { .. })));
    }

    #[tokio::test]
    async fn upstream_failure_cascades_to_skip_and_still_synthesizes() {
        let registry = Registry::from_json(&format!(
            r#"{{"tools":[{}, {}]}}"#,
            data_descriptor("flaky_fetcher"),
            reasoning_descriptor()
        ))
        .unwrap();
        let plan = Plan::Success {
            nodes: vec![
                node(0, "flaky_fetcher", "fetch", serde_json::json!({}), vec![]),
                node(1, "llm_caller", "call_llm", serde_json::json!({"prompt": "Summarize step 0."}), vec![0]),
            ],
            final_output_node: 1,
        };
        let mut tools: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        tools.insert("flaky_fetcher".into(), Arc::new(RaisingTool));
        tools.insert("llm_caller".into(), Arc::new(EchoDataTool));

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = RunContext::new(tx, crate::events::always_approve());
        let throttler = Arc::new(Throttler::new(&test_config()));
        let provider: Arc<dyn LlmProvider> = Arc::new(FakeProvider { scripted_response: "ok".into() });

        let trace =
            run_dag(&plan, &registry, &tools, &ctx, &test_config(), throttler, provider).await;
        drop(ctx);
        let events = drain(rx).await;

        assert_eq!(trace[0].as_ref().unwrap().status, NodeStatus::Error);
        assert_eq!(trace[1].as_ref().unwrap().status, NodeStatus::Skipped);
        assert_eq!(trace[1].as_ref().unwrap().error.as_deref(), Some("Upstream dependency failed"));
        assert!(matches!(events.last(), Some(Event::FinalAnswer { .. })));
    }

    #[tokio::test]
    async fn timeout_records_error_within_bound() {
        let registry = Registry::from_json(&format!(r#"{{"tools":[{}]}}"#, data_descriptor("slow_fetcher"))).unwrap();
        let mut node0 = node(0, "slow_fetcher", "fetch", serde_json::json!({}), vec![]);
        node0.timeout = 0.05;
        let plan = Plan::Success { nodes: vec![node0], final_output_node: 0 };
        let mut tools: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        tools.insert("slow_fetcher".into(), Arc::new(SleepyTool(std::time::Duration::from_millis(500))));

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = RunContext::new(tx, crate::events::always_approve());
        let throttler = Arc::new(Throttler::new(&test_config()));
        let provider: Arc<dyn LlmProvider> = Arc::new(FakeProvider { scripted_response: "ok".into() });

        let start = Instant::now();
        let trace =
            run_dag(&plan, &registry, &tools, &ctx, &test_config(), throttler, provider).await;
        let elapsed = start.elapsed().as_secs_f64();

        let entry = trace[0].as_ref().unwrap();
        assert_eq!(entry.status, NodeStatus::Error);
        assert!(entry.error.as_ref().unwrap().contains("timed out"));
        assert!(elapsed < 1.5);
    }

    #[tokio::test]
    async fn authority_violation_does_not_fail_the_node() {
        let registry = Registry::from_json(&format!(r#"{{"tools":[{}]}}"#, reasoning_descriptor())).unwrap();
        let plan = Plan::Success {
            nodes: vec![node(
                0,
                "llm_caller",
                "call_llm",
                serde_json::json!({"prompt": "synthesize"}),
                vec![],
            )],
            final_output_node: 0,
        };
        struct ViolatingTool;
        #[async_trait]
        impl Tool for ViolatingTool {
            async fn call(&self, _args: serde_json::Value) -> ResultEnvelope {
                ResultEnvelope::ok(serde_json::json!(
                    "the current price of BTC is 65000 dollars and it rose 3%"
                ))
            }
        }
        let mut tools: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        tools.insert("llm_caller".into(), Arc::new(ViolatingTool));

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = RunContext::new(tx, crate::events::always_approve());
        let throttler = Arc::new(Throttler::new(&test_config()));
        let provider: Arc<dyn LlmProvider> = Arc::new(FakeProvider { scripted_response: "ok".into() });

        let trace =
            run_dag(&plan, &registry, &tools, &ctx, &test_config(), throttler, provider).await;
        let entry = trace[0].as_ref().unwrap();
        assert_eq!(entry.status, NodeStatus::Success);
        assert_eq!(entry.quality, Quality::Violated);
        assert!(!entry.violations.is_empty());
    }

    #[tokio::test]
    async fn deadlock_between_two_mutually_dependent_nodes_is_fatal() {
        // Bypasses the compiler's acyclicity check by constructing the plan
        // directly, as the spec's deadlock scenario requires.
        let registry = Registry::from_json(&format!(r#"{{"tools":[{}]}}"#, data_descriptor("a"))).unwrap();
        let mut n0 = node(0, "a", "fetch", serde_json::json!({}), vec![]);
        let mut n1 = node(1, "a", "fetch", serde_json::json!({}), vec![]);
        // Force a cycle past normal id-ordering validation by pointing n0 at n1.
        n0.depends_on = vec![1];
        n1.depends_on = vec![0];
        let plan = Plan::Success { nodes: vec![n0, n1], final_output_node: 1 };
        let mut tools: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        tools.insert("a".into(), Arc::new(EchoDataTool));

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = RunContext::new(tx, crate::events::always_approve());
        let throttler = Arc::new(Throttler::new(&test_config()));
        let provider: Arc<dyn LlmProvider> = Arc::new(FakeProvider { scripted_response: "ok".into() });

        run_dag(&plan, &registry, &tools, &ctx, &test_config(), throttler, provider).await;
        drop(ctx);
        let events = drain(rx).await;
        assert!(matches!(events.last(), Some(Event::Error { message, .. }) if message.contains("deadlock")));
    }

    #[tokio::test]
    async fn parallel_fanout_both_starts_precede_either_completion() {
        let registry = Registry::from_json(&format!(
            r#"{{"tools":[{}, {}]}}"#,
            data_descriptor("finance_fetcher"),
            reasoning_descriptor()
        ))
        .unwrap();
        let plan = Plan::Success {
            nodes: vec![
                node(0, "finance_fetcher", "fetch", serde_json::json!({"symbol": "AAPL"}), vec![]),
                node(1, "finance_fetcher", "fetch", serde_json::json!({"symbol": "MSFT"}), vec![]),
                node(2, "llm_caller", "call_llm", serde_json::json!({"prompt": "compare step 0 and step 1"}), vec![0, 1]),
            ],
            final_output_node: 2,
        };
        let mut tools: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        tools.insert("finance_fetcher".into(), Arc::new(EchoDataTool));
        tools.insert("llm_caller".into(), Arc::new(EchoDataTool));

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = RunContext::new(tx, crate::events::always_approve());
        let throttler = Arc::new(Throttler::new(&test_config()));
        let provider: Arc<dyn LlmProvider> = Arc::new(FakeProvider { scripted_response: "ok".into() });

        run_dag(&plan, &registry, &tools, &ctx, &test_config(), throttler, provider).await;
        drop(ctx);
        let events = drain(rx).await;

        let first_complete = events
            .iter()
            .position(|e| matches!(e, Event::StepComplete { step_index, .. } if *step_index == 0 || *step_index == 1));
        let start_positions: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, Event::StepStart { step_index, .. } if *step_index == 0 || *step_index == 1))
            .map(|(idx, _)| idx)
            .collect();
        assert_eq!(start_positions.len(), 2);
        assert!(start_positions.iter().all(|&p| p < first_complete.unwrap()));
    }
}
