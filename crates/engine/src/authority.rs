//! Classifies a reasoning tool's output text against its declared
//! prohibited-output classes, and produces the per-node `Quality` verdict.
//!
//! Grounded in `examples/original_source/src/smith/core/validators.py`'s
//! `validate_tool_authority`/`contains_numeric_claims`/
//! `contains_factual_assertions`/`contains_time_references`/
//! `check_fabrication_risk`. The pattern catalog is kept as data (a static
//! table of label/regex pairs per §9), not inline branching.

use std::sync::OnceLock;

use regex::Regex;

use crate::descriptor::{Domain, ProhibitedOutput, ToolDescriptor};
use crate::trace::{Quality, ResultEnvelope};

struct PatternCatalog {
    numeric_data: Vec<Regex>,
    factual_claims: Vec<Regex>,
    real_time_data: Vec<Regex>,
    step_reference: Regex,
}

fn catalog() -> &'static PatternCatalog {
    static CATALOG: OnceLock<PatternCatalog> = OnceLock::new();
    CATALOG.get_or_init(|| PatternCatalog {
        numeric_data: compile(&[
            r"[$€£]\s?\d[\d,]*(\.\d+)?",
            r"\d+(\.\d+)?\s?%",
            r"\b(rose|fell|grew|dropped|increased|decreased)\b.{0,15}\d",
            r"\b\d+(\.\d+)?\s?(points?|basis points?|percent)\b",
        ]),
        factual_claims: compile(&[
            r"\b(currently|right now|today|as of)\b",
            r"\b(is|are|was|were)\b.{0,20}\b(price|value|rate)\b",
            r"\baccording to\b",
            r"\bsource[s]?:\s",
        ]),
        real_time_data: compile(&[
            r"\bas of\b",
            r"\bcurrent\s+(price|weather|temperature|rate|value)\b",
            r"\b(latest|recent)\s+(data|news|report)\b",
        ]),
        step_reference: Regex::new(r"(?i)\bstep\s+\d+\b|\bfrom step\b|\bbased on\b").unwrap(),
    })
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| Regex::new(&format!("(?i){p}")).unwrap()).collect()
}

/// Per-node authority validation result.
pub struct Verdict {
    pub quality: Quality,
    pub violations: Vec<String>,
}

/// Validate a tool's output envelope against its descriptor.
pub fn validate(descriptor: &ToolDescriptor, prompt: Option<&str>, envelope: &ResultEnvelope) -> Verdict {
    if !envelope.is_success() {
        return Verdict { quality: Quality::Failed, violations: vec![] };
    }

    if descriptor.domain != Domain::Reasoning {
        return Verdict { quality: Quality::Correct, violations: vec![] };
    }

    let text = match envelope {
        ResultEnvelope::Success { result: Some(v), .. } => stringify_for_scan(v),
        ResultEnvelope::Success { extra, .. } => serde_json::Value::Object(extra.clone()).to_string(),
        ResultEnvelope::Error { .. } => String::new(),
    };

    let cat = catalog();
    let suppress_factual = prompt.map(|p| cat.step_reference.is_match(p)).unwrap_or(false);

    let mut violations = Vec::new();
    if descriptor.prohibited_outputs.contains(&ProhibitedOutput::NumericData)
        && cat.numeric_data.iter().any(|r| r.is_match(&text))
    {
        violations.push("numeric_data".to_string());
    }
    if descriptor.prohibited_outputs.contains(&ProhibitedOutput::FactualClaims)
        && !suppress_factual
        && cat.factual_claims.iter().any(|r| r.is_match(&text))
    {
        violations.push("factual_claims".to_string());
    }
    if descriptor.prohibited_outputs.contains(&ProhibitedOutput::RealTimeData)
        && cat.real_time_data.iter().any(|r| r.is_match(&text))
    {
        violations.push("real_time_data".to_string());
    }

    let quality = match violations.len() {
        0 => Quality::Correct,
        1 => Quality::Degraded,
        _ => Quality::Violated,
    };

    Verdict { quality, violations }
}

fn stringify_for_scan(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Pre-execution advisory: does this reasoning prompt reference prior-step
/// data? If not, it's at higher risk of fabricating facts. Observability
/// only — never blocks execution.
pub fn check_fabrication_risk(descriptor: &ToolDescriptor, prompt: &str) -> Vec<String> {
    let mut warnings = Vec::new();
    if descriptor.domain == Domain::Reasoning && !catalog().step_reference.is_match(prompt) {
        warnings.push(
            "prompt does not reference any prior step; reasoning tools should synthesize from trace data"
                .to_string(),
        );
    }
    warnings
}
