pub mod agent;
pub mod config;
pub mod errors;
pub mod events;
pub mod executor;
pub mod oracle;
pub mod perception;
pub mod session;

pub use agent::engine::{AgentEngine, ControlHandle};
pub use agent::state::{AgentAction, CaseContext, RunResult};
pub use errors::{CasePilotError, CasePilotResult};

/// Installs the tracing subscriber and loads `.env` if present. Call once
/// from the host before constructing an engine.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();
}

/// Builds the reference oracle adapter from config, with the tool catalogue
/// attached and the API key resolved from config or environment.
pub fn build_default_oracle(
    config: &config::OracleConfig,
) -> CasePilotResult<oracle::providers::openai_compatible::OpenAiCompatibleOracle> {
    let tools = oracle::protocol::load_builtin_tools()?;
    Ok(oracle::providers::openai_compatible::OpenAiCompatibleOracle::new(
        config.id.clone(),
        config.api_base.clone(),
        config.resolve_api_key(),
        config.model.clone(),
        config.temperature,
        tools,
    ))
}
