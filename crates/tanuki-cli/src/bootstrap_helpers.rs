use anyhow::Result;
use tanuki_provider::{AdapterRegistry, StreamingExecutor};
use tanuki_runtime::ProcessorConfig;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use crate::cli_args::Cli;

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Loads `--config` (or defaults) and applies command-line overrides.
pub(crate) fn load_config(cli: &Cli) -> Result<ProcessorConfig> {
    let mut config = match cli.config.as_deref() {
        Some(path) => ProcessorConfig::load(path)?,
        None => ProcessorConfig::default(),
    };
    if let Some(path) = cli.session_store.as_ref() {
        config.session_store_path = path.clone();
    }
    config.validate()?;
    Ok(config)
}

pub(crate) fn build_executor(config: &ProcessorConfig) -> StreamingExecutor {
    StreamingExecutor::new(AdapterRegistry::with_defaults(&config.provider_settings()))
        .with_health_probe_timeout(config.health_probe_timeout())
}
