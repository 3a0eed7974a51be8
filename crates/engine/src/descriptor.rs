//! Tool descriptors and the process-scoped registry they're loaded from.
//!
//! Grounded in `examples/original_source/src/smith/registry.py`: a static
//! JSON document with a top-level `tools` array, loaded once and cached for
//! the lifetime of the process.

use std::collections::HashSet;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// A tool's authority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Data,
    Computation,
    Reasoning,
    System,
}

/// An output category a reasoning tool is forbidden from producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProhibitedOutput {
    NumericData,
    FactualClaims,
    RealTimeData,
}

/// JSON-schema-like parameter declaration for a tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub required: Vec<String>,
}

/// Immutable, registry-supplied metadata for one callable tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub function_symbol: String,
    pub module_symbol: String,
    pub description: String,
    #[serde(default)]
    pub dangerous: bool,
    pub domain: Domain,
    #[serde(default)]
    pub output_type: String,
    #[serde(default)]
    pub prohibited_outputs: Vec<ProhibitedOutput>,
    #[serde(default)]
    pub parameters: ParameterSchema,
}

impl ToolDescriptor {
    /// A reasoning-domain descriptor must declare `prohibited_outputs`.
    pub fn validate_invariant(&self) -> Result<()> {
        if self.domain == Domain::Reasoning && self.prohibited_outputs.is_empty() {
            return Err(EngineError::Config(format!(
                "reasoning tool '{}' must declare prohibited_outputs",
                self.name
            )));
        }
        Ok(())
    }

    pub fn allowed_properties(&self) -> HashSet<&str> {
        self.parameters.properties.keys().map(String::as_str).collect()
    }
}

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    tools: Vec<ToolDescriptor>,
}

/// The process-scoped, immutable catalog of tool descriptors.
#[derive(Debug, Clone)]
pub struct Registry {
    tools: std::sync::Arc<Vec<ToolDescriptor>>,
}

static CACHE: OnceLock<Registry> = OnceLock::new();

impl Registry {
    fn from_tools(tools: Vec<ToolDescriptor>) -> Result<Self> {
        for t in &tools {
            t.validate_invariant()?;
        }
        Ok(Self { tools: std::sync::Arc::new(tools) })
    }

    /// Parse a registry document (`{"tools": [...]}`) from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self> {
        let doc: RegistryDocument = serde_json::from_str(raw)?;
        Self::from_tools(doc.tools)
    }

    /// Load (and cache for the process) the registry from a JSON file path.
    pub fn load_cached(path: &std::path::Path) -> Result<Registry> {
        if let Some(cached) = CACHE.get() {
            return Ok(cached.clone());
        }
        let raw = std::fs::read_to_string(path)?;
        let registry = Self::from_json(&raw)?;
        let _ = CACHE.set(registry.clone());
        Ok(registry)
    }

    /// Test-only: drop the process cache so a subsequent `load_cached` re-reads.
    #[cfg(test)]
    pub fn reset_cache_for_test() {
        // OnceLock has no public reset; tests construct registries directly
        // via `from_json` instead of exercising the cache.
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "tools": [
                {
                    "name": "weather_fetcher",
                    "function_symbol": "fetch_weather",
                    "module_symbol": "tools.weather",
                    "description": "Fetches current weather",
                    "domain": "data",
                    "parameters": { "properties": { "city": {"type": "string"} }, "required": ["city"] }
                },
                {
                    "name": "llm_caller",
                    "function_symbol": "call_llm",
                    "module_symbol": "tools.llm",
                    "description": "Calls the reasoning model",
                    "domain": "reasoning",
                    "prohibited_outputs": ["numeric_data", "factual_claims", "real_time_data"],
                    "parameters": { "properties": { "prompt": {"type": "string"} }, "required": ["prompt"] }
                }
            ]
        }"#
    }

    #[test]
    fn parses_top_level_tools_array() {
        let reg = Registry::from_json(sample_json()).unwrap();
        assert_eq!(reg.tools().len(), 2);
        assert!(reg.get("weather_fetcher").is_some());
    }

    #[test]
    fn unknown_tool_returns_none() {
        let reg = Registry::from_json(sample_json()).unwrap();
        assert!(reg.get("does_not_exist").is_none());
    }

    #[test]
    fn reasoning_descriptor_without_prohibitions_is_rejected() {
        let bad = r#"{"tools": [{
            "name": "bad_reasoner", "function_symbol": "f", "module_symbol": "m",
            "description": "d", "domain": "reasoning",
            "parameters": {"properties": {}, "required": []}
        }]}"#;
        assert!(Registry::from_json(bad).is_err());
    }

    #[test]
    fn allowed_properties_reflects_schema() {
        let reg = Registry::from_json(sample_json()).unwrap();
        let desc = reg.get("weather_fetcher").unwrap();
        assert!(desc.allowed_properties().contains("city"));
        assert!(!desc.allowed_properties().contains("unrelated"));
    }
}
