//! `stockdesk serve`: wire services from config and run the HTTP server.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use stockdesk::api::{start_server, AppState};
use stockdesk::gateway::Gateway;
use stockdesk::prompts::PromptLibrary;
use stockdesk::providers::{AnthropicProvider, ModelProvider};
use stockdesk::ratelimit::RateLimiter;
use stockdesk::store::VersionedStore;
use stockdesk::Config;

/// Build shared state around the given model provider.
pub(crate) async fn build_state(config: &Config, provider: Arc<dyn ModelProvider>) -> Result<AppState> {
    let prompts = PromptLibrary::load_dir(&config.gateway.prompts_dir)
        .with_context(|| format!("loading prompts from {}", config.gateway.prompts_dir.display()))?;
    let cache = Arc::new(config.cache.open());
    info!(entries = cache.len(), max_entries = config.cache.max_entries, "Response cache ready");
    let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
    let gateway = Gateway::new(
        config.gateway.clone(),
        provider,
        cache,
        limiter,
        Arc::new(prompts),
    );
    let store = VersionedStore::open(config.store.clone())
        .await
        .context("opening record store")?;
    Ok(AppState::new(Arc::new(gateway), Arc::new(store)))
}

pub(crate) async fn cmd_serve(config: Config) -> Result<()> {
    let provider = AnthropicProvider::from_config(&config.provider).context(
        "no model API key: set ANTHROPIC_API_KEY or provider.api_key in the config file",
    )?;
    info!(
        provider = "anthropic",
        model = %config.provider.model,
        single_flight = config.gateway.single_flight,
        daily_limit = config.rate_limit.daily_limit,
        "Starting stockdesk"
    );
    let state = build_state(&config, Arc::new(provider)).await?;
    start_server(&config.server, state).await?;
    Ok(())
}
