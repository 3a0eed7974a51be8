//! Process entry point: boots tracing, loads configuration, constructs the
//! provider registry and tool registry, then serves the HTTP surface.
//!
//! Bootstrap sequence (`init_tracing` → load config → construct providers →
//! serve) follows this codebase's established bring-up idiom.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use sa_engine::config::EngineConfig;
use sa_engine::descriptor::Registry;
use sa_engine::http::{router, AppState};
use sa_engine::throttler::Throttler;
use sa_providers::registry::ProviderRegistry;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sa_engine=debug")),
        )
        .json()
        .init();
}

/// Load `sa_domain`'s `LlmConfig` from a TOML file, defaulting entirely when
/// the file is absent — the same shape as `EngineConfig::load`, kept separate
/// because provider configuration is a `sa_domain` concern, not an engine one.
fn load_llm_config() -> anyhow::Result<sa_domain::config::LlmConfig> {
    let path = std::env::var("SA_LLM_CONFIG").unwrap_or_else(|_| "llm.toml".into());
    if !std::path::Path::new(&path).exists() {
        return Ok(sa_domain::config::LlmConfig::default());
    }
    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    toml::from_str(&raw).with_context(|| format!("parsing {path}"))
}

fn load_tool_registry() -> anyhow::Result<Registry> {
    let path = std::env::var("SA_TOOL_REGISTRY").unwrap_or_else(|_| "tools.json".into());
    Registry::load_cached(std::path::Path::new(&path))
        .with_context(|| format!("loading tool registry from {path}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(EngineConfig::load().context("loading engine config")?);
    tracing::info!(max_workers = config.max_workers, "engine config loaded");

    let llm_config = load_llm_config()?;
    let provider_registry =
        ProviderRegistry::from_config(&llm_config).context("constructing LLM provider registry")?;
    let provider = provider_registry
        .for_role("planner")
        .or_else(|| provider_registry.iter().next().map(|(_, p)| p.clone()))
        .context(
            "no LLM provider available; configure at least one provider in llm.toml \
             (see sa_domain::config::LlmConfig)",
        )?;
    tracing::info!(provider_id = provider.provider_id(), "LLM provider selected");

    let registry = load_tool_registry()?;
    tracing::info!(tool_count = registry.tools().len(), "tool registry loaded");

    let throttler = Arc::new(Throttler::new(&config));

    // No tool implementations are wired in: this codebase's engine treats
    // tool invocation as a leaf interface (`Tool`), and ships none itself.
    let tools: HashMap<String, Arc<dyn sa_engine::invoker::Tool>> = HashMap::new();

    let state = AppState::new(registry, tools, config.clone(), throttler, provider);
    let app = router(state);

    let addr = format!("{}:{}", config.http_host, config.http_port);
    tracing::info!(%addr, "serving");
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app).await.context("serving")?;

    Ok(())
}
