//! Aggregate run-level quality scoring — a supplement grounded in
//! `examples/original_source/src/smith/core/quality.py`'s
//! `grade_execution_quality`/`generate_quality_warning`. Pure observability:
//! never changes scheduling, retries, or node status.

use serde::Serialize;

use crate::trace::{NodeStatus, Quality, TraceEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallQuality {
    Unknown,
    Excellent,
    Good,
    Degraded,
    Poor,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityMetrics {
    pub total_steps: usize,
    pub successful: usize,
    pub errors: usize,
    pub violations: usize,
    pub degraded: usize,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionQuality {
    pub overall_quality: OverallQuality,
    pub score: f64,
    pub issues: Vec<String>,
    pub metrics: QualityMetrics,
}

/// Grade a completed trace's overall execution quality.
pub fn grade_execution_quality(trace: &[TraceEntry]) -> ExecutionQuality {
    if trace.is_empty() {
        return ExecutionQuality {
            overall_quality: OverallQuality::Unknown,
            score: 0.0,
            issues: vec!["Empty trace".to_string()],
            metrics: QualityMetrics {
                total_steps: 0,
                successful: 0,
                errors: 0,
                violations: 0,
                degraded: 0,
                success_rate: 0.0,
            },
        };
    }

    let total_steps = trace.len();
    let successful = trace.iter().filter(|t| t.status == NodeStatus::Success).count();
    let errors = trace.iter().filter(|t| t.status == NodeStatus::Error).count();
    let violations = trace.iter().filter(|t| !t.violations.is_empty()).count();
    let degraded = trace.iter().filter(|t| t.quality == Quality::Degraded).count();

    let success_rate = successful as f64 / total_steps as f64 * 100.0;
    let penalty = violations as f64 * 15.0 + degraded as f64 * 10.0 + errors as f64 * 20.0;
    let score = (success_rate - penalty).max(0.0);

    let mut issues = Vec::new();
    if violations > 0 {
        issues.push(format!("{violations} authority violation(s) detected"));
    }
    if degraded > 0 {
        issues.push(format!("{degraded} degraded execution(s)"));
    }
    if errors > 0 {
        issues.push(format!("{errors} error(s)"));
    }

    let overall_quality = if score >= 90.0 && violations == 0 {
        OverallQuality::Excellent
    } else if score >= 75.0 {
        OverallQuality::Good
    } else if score >= 50.0 {
        OverallQuality::Degraded
    } else {
        OverallQuality::Poor
    };

    ExecutionQuality {
        overall_quality,
        score: (score * 10.0).round() / 10.0,
        issues,
        metrics: QualityMetrics {
            total_steps,
            successful,
            errors,
            violations,
            degraded,
            success_rate: (success_rate * 10.0).round() / 10.0,
        },
    }
}

/// A one-line human-readable warning for a single trace entry, or `None`
/// when quality is `correct`.
pub fn generate_quality_warning(entry: &TraceEntry) -> Option<String> {
    match entry.quality {
        Quality::Violated => Some(format!(
            "{}: multiple authority violations - {}",
            entry.tool,
            entry.violations.join(", ")
        )),
        Quality::Degraded => Some(format!(
            "{}: degraded quality - {}",
            entry.tool,
            entry.violations.first().cloned().unwrap_or_else(|| "unknown issue".to_string())
        )),
        Quality::Correct => None,
        Quality::Failed => Some(format!("{}: unknown quality status", entry.tool)),
    }
}
