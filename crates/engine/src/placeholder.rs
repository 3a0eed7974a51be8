//! `{{STEPS.i.path}}` placeholder resolution — the only inter-step
//! data-passing channel visible to reasoning tools.
//!
//! Grounded in `examples/original_source/src/smith/core/orchestrator.py`'s
//! `resolve_prompt_placeholders`, `_unwrap_result_container`, and `_deep_get`.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::trace::TraceEntry;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\{\{\s*STEPS\.(\d+)\.([^}]+)\}\}").unwrap())
}

/// Replace every `{{STEPS.i.path}}` token in `prompt` with the resolved
/// value from `trace`. A pure function of its inputs.
pub fn resolve_placeholders(prompt: &str, trace: &[TraceEntry]) -> String {
    placeholder_re()
        .replace_all(prompt, |caps: &regex::Captures| {
            let idx: usize = match caps[1].parse() {
                Ok(v) => v,
                Err(_) => return String::new(),
            };
            let path = caps[2].trim();

            let Some(entry) = trace.get(idx) else {
                return String::new();
            };
            let unwrapped = unwrap_result_container(&entry.result);
            let value = deep_get(&unwrapped, path);
            stringify(&value)
        })
        .into_owned()
}

/// Normalize bracket indices (`foo[0].bar`) to dot form (`foo.0.bar`), then
/// unwrap a single `result`/`results` container layer if present, per the
/// original's permissive heuristic: a mapping of at most 4 keys, one of
/// which is `result` or `results`, is transparent.
fn unwrap_result_container(value: &Value) -> Value {
    if let Value::Object(map) = value {
        if map.len() <= 4 {
            for key in ["result", "results"] {
                if let Some(inner) = map.get(key) {
                    return inner.clone();
                }
            }
        }
    }
    value.clone()
}

fn normalize_path(path: &str) -> String {
    static BRACKET_RE: OnceLock<Regex> = OnceLock::new();
    let re = BRACKET_RE.get_or_init(|| Regex::new(r"\[(\d+)\]").unwrap());
    re.replace_all(path, ".$1").into_owned()
}

/// Walk a dot-normalized path through nested dicts/lists. Missing or
/// type-mismatched segments yield `Value::Null`.
fn deep_get(value: &Value, path: &str) -> Value {
    let normalized = normalize_path(path);
    let mut current = value.clone();
    for segment in normalized.split('.').filter(|s| !s.is_empty()) {
        current = match &current {
            Value::Object(map) => map.get(segment).cloned().unwrap_or(Value::Null),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null),
            _ => Value::Null,
        };
        if current.is_null() {
            return Value::Null;
        }
    }
    current
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => value.to_string(),
        other => other.to_string(),
    }
}
