//! Plan Compiler: user request → validated DAG, via a reasoning LLM call
//! and a repair-prompt retry loop.
//!
//! Grounded in `examples/original_source/src/smith/core/orchestrator.py`'s
//! planner section and `src/smith/planner.py`'s `MAX_PLANNER_ATTEMPTS`.

use std::sync::OnceLock;

use regex::Regex;
use sa_providers::LlmProvider;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::descriptor::{Domain, Registry};
use crate::llm::{call_llm, LlmCallResult};
use crate::plan::{Plan, PlanNode};
use crate::throttler::Throttler;

const MAX_PLANNER_ATTEMPTS: u32 = 3;
const MAX_REASONING_NODES: usize = 3;

/// Phrase tables for the compiler's warning-only constraint checks (§4.5
/// steps 5-6), kept as data per the same "patterns as data" idiom as
/// `authority::PatternCatalog`.
struct CompilerPatterns {
    data_retrieval: Vec<Regex>,
    computation: Vec<Regex>,
    absent_capability: Vec<(&'static str, Regex)>,
}

fn patterns() -> &'static CompilerPatterns {
    static CATALOG: OnceLock<CompilerPatterns> = OnceLock::new();
    CATALOG.get_or_init(|| CompilerPatterns {
        data_retrieval: compile(&[
            r"\bcurrent\s+(price|weather|temperature|rate|score|value)\b",
            r"\b(latest|today'?s|recent)\s+(data|news|report|price|weather|score)\b",
            r"\bwhat'?s?\s+(the\s+)?(weather|price|rate|score)\b",
            r"\blook\s?up\b",
            r"\bfetch\b",
        ]),
        computation: compile(&[
            r"\bcalculate\b",
            r"\bcompute\b",
            r"\b(sum|average|total)\s+(of|up)\b",
            r"\bmultiply\b",
            r"\bdivide\b",
            r"\bconvert\b.{0,15}\b(currency|units?)\b",
        ]),
        absent_capability: vec![
            ("image", Regex::new(r"(?i)\b(image|picture|photo|diagram)s?\b").unwrap()),
            ("email", Regex::new(r"(?i)\bemail|send\s+mail\b").unwrap()),
        ],
    })
}

fn compile(raw: &[&str]) -> Vec<Regex> {
    raw.iter().map(|p| Regex::new(&format!("(?i){p}")).unwrap()).collect()
}

/// Text a node might reasonably describe its intent in: its thought plus a
/// stringified view of its inputs.
fn node_text(node: &PlanNode) -> String {
    format!("{} {}", node.thought, serde_json::Value::Object(node.inputs.clone()))
}

fn system_prompt(registry: &Registry) -> String {
    let tools: Vec<Value> = registry
        .tools()
        .iter()
        .map(|t| {
            serde_json::json!({
                "name": t.name,
                "function": t.function_symbol,
                "description": t.description,
                "parameters": { "properties": t.parameters.properties, "required": t.parameters.required },
            })
        })
        .collect();

    format!(
        "You are a planning engine. Respond with JSON only, no prose, no code fences.\n\
         Available tools:\n{}\n\
         Cost accounting: data tools cost 1, computation tools cost 2, reasoning tools cost 5.\n\
         Use at most {MAX_REASONING_NODES} reasoning-tool nodes.\n\
         Never ask a reasoning tool for real-time facts; fetch them with a data tool first.\n\
         Prefer a sub-agent delegation tool when tasks are independent.\n\
         Output format: {{\"status\":\"success\",\"nodes\":[{{\"id\":0,\"thought\":\"...\",\"tool\":\"...\",\
         \"function\":\"...\",\"inputs\":{{}},\"depends_on\":[],\"retry\":2,\"on_fail\":\"halt\",\"timeout\":45}}],\
         \"final_output_node\":0}}",
        serde_json::to_string(&tools).unwrap_or_default()
    )
}

fn repair_prompt(raw: &str, error: &str) -> String {
    format!(
        "The following JSON failed validation with error: {error}\n\
         Return ONLY corrected JSON, no prose, no code fences.\n\
         Previous output:\n{raw}"
    )
}

fn syntax_repair_prompt(raw: &str) -> String {
    format!("The following text should be JSON but failed to parse. Return ONLY corrected JSON:\n{raw}")
}

/// Strip optional code-fence wrappers and isolate the substring from the
/// first `{` to the last `}`.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

#[derive(serde::Deserialize)]
struct RawPlan {
    status: Option<String>,
    nodes: Option<Vec<RawNode>>,
    final_output_node: Option<Value>,
    error: Option<String>,
}

#[derive(serde::Deserialize)]
struct RawNode {
    id: Value,
    #[serde(default)]
    thought: String,
    tool: Option<String>,
    function: Option<String>,
    #[serde(default)]
    inputs: serde_json::Map<String, Value>,
    #[serde(default)]
    depends_on: Vec<Value>,
    #[serde(default)]
    retry: Option<Value>,
    #[serde(default)]
    on_fail: Option<String>,
    timeout: Option<Value>,
}

/// Structural + constraint validation, first-failure-wins, per §4.5 step 4-5.
fn validate_structure(raw: &RawPlan, registry: &Registry, config: &EngineConfig) -> Result<Plan, String> {
    let nodes_raw = raw.nodes.as_ref().filter(|n| !n.is_empty()).ok_or("nodes must be a non-empty array")?;

    let mut seen_ids = std::collections::HashSet::new();
    let mut nodes = Vec::with_capacity(nodes_raw.len());

    for n in nodes_raw {
        let id = n.id.as_u64().ok_or("node id must be a non-negative integer")? as u32;
        if !seen_ids.insert(id) {
            return Err(format!("duplicate node id {id}"));
        }

        let tool_name = n.tool.clone().ok_or("node missing tool")?;
        let descriptor = registry.get(&tool_name).ok_or_else(|| format!("unknown tool '{tool_name}'"))?;

        let function = n.function.clone().ok_or("node missing function")?;
        if function != descriptor.function_symbol {
            return Err(format!(
                "node {id} function '{function}' does not match descriptor '{}'",
                descriptor.function_symbol
            ));
        }

        let allowed = descriptor.allowed_properties();
        for key in n.inputs.keys() {
            if !allowed.contains(key.as_str()) {
                return Err(format!("node {id} input '{key}' is not an allowed property of '{tool_name}'"));
            }
        }
        for required in &descriptor.parameters.required {
            if !n.inputs.contains_key(required) {
                return Err(format!("node {id} missing required input '{required}'"));
            }
        }

        let mut depends_on = Vec::with_capacity(n.depends_on.len());
        for d in &n.depends_on {
            let dep = d.as_u64().ok_or("depends_on must contain integers")? as u32;
            if dep >= id {
                return Err(format!("node {id} depends_on {dep} is not strictly earlier"));
            }
            if !seen_ids.contains(&dep) {
                return Err(format!("node {id} depends_on unknown id {dep}"));
            }
            depends_on.push(dep);
        }

        // When the plan omits retry/timeout, fall back to the configured
        // per-node defaults rather than a hardcoded zero.
        let retry = match n.retry.as_ref().and_then(|v| v.as_u64()) {
            Some(v) => v as u32,
            None => config.max_retries,
        };

        let on_fail = match n.on_fail.as_deref() {
            Some("halt") | None => crate::plan::OnFail::Halt,
            Some("continue") => crate::plan::OnFail::Continue,
            Some(other) => return Err(format!("node {id} invalid on_fail '{other}'")),
        };

        let timeout = match n.timeout.as_ref().and_then(|v| v.as_f64()) {
            Some(t) if t > 0.0 => t,
            Some(_) => return Err(format!("node {id} timeout must be > 0")),
            None => config.default_timeout,
        };

        nodes.push(PlanNode {
            id,
            thought: n.thought.clone(),
            tool: tool_name,
            function,
            inputs: n.inputs.clone(),
            depends_on,
            retry,
            on_fail,
            timeout,
        });
    }

    let final_output_node = raw
        .final_output_node
        .as_ref()
        .and_then(|v| v.as_u64())
        .ok_or("final_output_node must be an id present in nodes")? as u32;
    if !seen_ids.contains(&final_output_node) {
        return Err("final_output_node is not present in nodes".to_string());
    }

    let reasoning_count = nodes
        .iter()
        .filter(|n| registry.get(&n.tool).map(|d| d.domain == Domain::Reasoning).unwrap_or(false))
        .count();
    if reasoning_count > MAX_REASONING_NODES {
        return Err(format!("plan uses {reasoning_count} reasoning nodes, max {MAX_REASONING_NODES}"));
    }

    // Step 5: a single-node plan that hands a reasoning tool what reads like
    // a data-retrieval request is suspicious but not invalid — warn only.
    if let [only] = nodes.as_slice() {
        let is_reasoning = registry.get(&only.tool).map(|d| d.domain == Domain::Reasoning).unwrap_or(false);
        if is_reasoning {
            let text = node_text(only);
            if patterns().data_retrieval.iter().any(|r| r.is_match(&text)) {
                tracing::warn!(
                    node_id = only.id,
                    tool = %only.tool,
                    "single-node plan uses a reasoning tool for what reads like a data-retrieval request; \
                     consider a data tool instead"
                );
            }
        }
    }

    // Step 6: capability-gap detection. Reasoning nodes that ask for
    // computation without citing a prior step suggest a missing computation
    // tool; mentions of capabilities the registry has nothing for (image,
    // email, ...) are logged for visibility.
    for n in &nodes {
        let is_reasoning = registry.get(&n.tool).map(|d| d.domain == Domain::Reasoning).unwrap_or(false);
        if !is_reasoning {
            continue;
        }
        let text = node_text(n);
        if n.depends_on.is_empty() && patterns().computation.iter().any(|r| r.is_match(&text)) {
            tracing::warn!(
                node_id = n.id,
                tool = %n.tool,
                "reasoning node requests computation without referencing a prior step; \
                 consider a computation tool instead"
            );
        }
    }

    for (capability, pattern) in &patterns().absent_capability {
        let mentioned = nodes.iter().any(|n| pattern.is_match(&node_text(n)));
        let available = registry
            .tools()
            .iter()
            .any(|t| pattern.is_match(&t.name) || pattern.is_match(&t.description));
        if mentioned && !available {
            tracing::warn!(capability = *capability, "plan references a capability absent from the tool registry");
        }
    }

    Ok(Plan::Success { nodes, final_output_node })
}

/// Compile a user request into a validated Plan.
pub async fn compile_plan(
    request: &str,
    registry: &Registry,
    provider: &dyn LlmProvider,
    throttler: &Throttler,
    config: &EngineConfig,
) -> Plan {
    let mut last_raw = String::new();
    let mut last_error = String::new();

    for attempt in 1..=MAX_PLANNER_ATTEMPTS {
        let prompt = if attempt == 1 {
            format!("{}\n\nUser request: {request}", system_prompt(registry))
        } else {
            repair_prompt(&last_raw, &last_error)
        };

        let raw_response = match call_llm(provider, throttler, &prompt, 2000.0, config.llm_max_retries).await {
            LlmCallResult::Response(text) => text,
            LlmCallResult::Error(e) => {
                return Plan::Error { error: format!("planner LLM call failed: {e}"), raw: None };
            }
        };

        let Some(json_slice) = extract_json_object(&raw_response) else {
            last_raw = raw_response;
            last_error = "no JSON object found in response".to_string();
            continue;
        };

        let parsed: Result<RawPlan, _> = serde_json::from_str(json_slice);
        let raw_plan = match parsed {
            Ok(p) => p,
            Err(parse_err) => {
                let repaired = match call_llm(
                    provider,
                    throttler,
                    &syntax_repair_prompt(json_slice),
                    1000.0,
                    config.llm_max_retries,
                )
                .await
                {
                    LlmCallResult::Response(text) => text,
                    LlmCallResult::Error(e) => {
                        return Plan::Error { error: format!("syntax repair LLM call failed: {e}"), raw: None };
                    }
                };
                match extract_json_object(&repaired).and_then(|s| serde_json::from_str::<RawPlan>(s).ok()) {
                    Some(p) => p,
                    None => {
                        last_raw = json_slice.to_string();
                        last_error = format!("JSON parse failed: {parse_err}");
                        continue;
                    }
                }
            }
        };

        if raw_plan.status.as_deref() == Some("error") {
            return Plan::Error {
                error: raw_plan.error.unwrap_or_else(|| "planner reported error".to_string()),
                raw: Some(json_slice.to_string()),
            };
        }

        match validate_structure(&raw_plan, registry, config) {
            Ok(plan) => return plan,
            Err(e) => {
                last_raw = json_slice.to_string();
                last_error = e;
            }
        }
    }

    Plan::Error { error: format!("plan validation failed after {MAX_PLANNER_ATTEMPTS} attempts: {last_error}"), raw: Some(last_raw) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::from_json(
            r#"{"tools": [
                {"name": "weather_fetcher", "function_symbol": "fetch_weather", "module_symbol": "m",
                 "description": "d", "domain": "data",
                 "parameters": {"properties": {"city": {"type": "string"}}, "required": ["city"]}},
                {"name": "llm_caller", "function_symbol": "call_llm", "module_symbol": "m",
                 "description": "d", "domain": "reasoning",
                 "prohibited_outputs": ["numeric_data", "factual_claims", "real_time_data"],
                 "parameters": {"properties": {"prompt": {"type": "string"}}, "required": ["prompt"]}}
            ]}"#,
        )
        .unwrap()
    }

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn extracts_json_from_code_fence_wrapper() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json_object(raw), Some("{\"a\": 1}"));
    }

    #[test]
    fn validate_structure_accepts_well_formed_plan() {
        let raw: RawPlan = serde_json::from_str(
            r#"{"status":"success","nodes":[
                {"id":0,"tool":"weather_fetcher","function":"fetch_weather","inputs":{"city":"Paris"},"depends_on":[],"retry":0,"on_fail":"halt","timeout":30}
            ],"final_output_node":0}"#,
        )
        .unwrap();
        let plan = validate_structure(&raw, &registry(), &config()).unwrap();
        assert_eq!(plan.nodes().len(), 1);
    }

    #[test]
    fn validate_structure_rejects_forward_dependency() {
        let raw: RawPlan = serde_json::from_str(
            r#"{"status":"success","nodes":[
                {"id":0,"tool":"weather_fetcher","function":"fetch_weather","inputs":{"city":"Paris"},"depends_on":[1],"retry":0,"on_fail":"halt","timeout":30},
                {"id":1,"tool":"weather_fetcher","function":"fetch_weather","inputs":{"city":"Paris"},"depends_on":[],"retry":0,"on_fail":"halt","timeout":30}
            ],"final_output_node":1}"#,
        )
        .unwrap();
        assert!(validate_structure(&raw, &registry(), &config()).is_err());
    }

    #[test]
    fn validate_structure_rejects_unknown_tool() {
        let raw: RawPlan = serde_json::from_str(
            r#"{"status":"success","nodes":[
                {"id":0,"tool":"ghost_tool","function":"f","inputs":{},"depends_on":[],"retry":0,"on_fail":"halt","timeout":30}
            ],"final_output_node":0}"#,
        )
        .unwrap();
        assert!(validate_structure(&raw, &registry(), &config()).is_err());
    }

    #[test]
    fn validate_structure_rejects_missing_required_input() {
        let raw: RawPlan = serde_json::from_str(
            r#"{"status":"success","nodes":[
                {"id":0,"tool":"weather_fetcher","function":"fetch_weather","inputs":{},"depends_on":[],"retry":0,"on_fail":"halt","timeout":30}
            ],"final_output_node":0}"#,
        )
        .unwrap();
        assert!(validate_structure(&raw, &registry(), &config()).is_err());
    }

    #[test]
    fn validate_structure_rejects_too_many_reasoning_nodes() {
        let mk = |id: u32| {
            format!(r#"{{"id":{id},"tool":"llm_caller","function":"call_llm","inputs":{{"prompt":"x"}},"depends_on":[],"retry":0,"on_fail":"halt","timeout":30}}"#)
        };
        let nodes = (0..4).map(mk).collect::<Vec<_>>().join(",");
        let json = format!(r#"{{"status":"success","nodes":[{nodes}],"final_output_node":0}}"#);
        let raw: RawPlan = serde_json::from_str(&json).unwrap();
        assert!(validate_structure(&raw, &registry(), &config()).is_err());
    }

    #[test]
    fn validate_structure_rejects_nonpositive_timeout() {
        let raw: RawPlan = serde_json::from_str(
            r#"{"status":"success","nodes":[
                {"id":0,"tool":"weather_fetcher","function":"fetch_weather","inputs":{"city":"Paris"},"depends_on":[],"retry":0,"on_fail":"halt","timeout":0}
            ],"final_output_node":0}"#,
        )
        .unwrap();
        assert!(validate_structure(&raw, &registry(), &config()).is_err());
    }

    #[test]
    fn validate_structure_fills_missing_timeout_and_retry_from_config() {
        let raw: RawPlan = serde_json::from_str(
            r#"{"status":"success","nodes":[
                {"id":0,"tool":"weather_fetcher","function":"fetch_weather","inputs":{"city":"Paris"},"depends_on":[],"on_fail":"halt"}
            ],"final_output_node":0}"#,
        )
        .unwrap();
        let cfg = EngineConfig { default_timeout: 42.0, max_retries: 7, ..EngineConfig::default() };
        let plan = validate_structure(&raw, &registry(), &cfg).unwrap();
        let node = &plan.nodes()[0];
        assert_eq!(node.timeout, 42.0);
        assert_eq!(node.retry, 7);
    }

    #[test]
    fn validate_structure_keeps_explicit_timeout_and_retry() {
        let raw: RawPlan = serde_json::from_str(
            r#"{"status":"success","nodes":[
                {"id":0,"tool":"weather_fetcher","function":"fetch_weather","inputs":{"city":"Paris"},"depends_on":[],"retry":1,"on_fail":"halt","timeout":9}
            ],"final_output_node":0}"#,
        )
        .unwrap();
        let cfg = EngineConfig { default_timeout: 42.0, max_retries: 7, ..EngineConfig::default() };
        let plan = validate_structure(&raw, &registry(), &cfg).unwrap();
        let node = &plan.nodes()[0];
        assert_eq!(node.timeout, 9.0);
        assert_eq!(node.retry, 1);
    }

    #[test]
    fn validate_structure_warns_but_accepts_single_node_data_retrieval_reasoning() {
        let raw: RawPlan = serde_json::from_str(
            r#"{"status":"success","nodes":[
                {"id":0,"tool":"llm_caller","function":"call_llm","inputs":{"prompt":"what is the current weather"},"depends_on":[],"retry":0,"on_fail":"halt","timeout":30}
            ],"final_output_node":0}"#,
        )
        .unwrap();
        let plan = validate_structure(&raw, &registry(), &config()).unwrap();
        assert_eq!(plan.nodes().len(), 1);
    }

    #[test]
    fn validate_structure_warns_but_accepts_computation_without_prior_step() {
        let raw: RawPlan = serde_json::from_str(
            r#"{"status":"success","nodes":[
                {"id":0,"tool":"llm_caller","function":"call_llm","inputs":{"prompt":"please calculate the result"},"depends_on":[],"retry":0,"on_fail":"halt","timeout":30}
            ],"final_output_node":0}"#,
        )
        .unwrap();
        let plan = validate_structure(&raw, &registry(), &config()).unwrap();
        assert_eq!(plan.nodes().len(), 1);
    }

    #[test]
    fn validate_structure_logs_but_accepts_absent_capability_mention() {
        let raw: RawPlan = serde_json::from_str(
            r#"{"status":"success","nodes":[
                {"id":0,"tool":"llm_caller","function":"call_llm","inputs":{"prompt":"send an email based on step 0"},"depends_on":[],"retry":0,"on_fail":"halt","timeout":30}
            ],"final_output_node":0}"#,
        )
        .unwrap();
        let plan = validate_structure(&raw, &registry(), &config()).unwrap();
        assert_eq!(plan.nodes().len(), 1);
    }
}
