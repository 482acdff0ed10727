use thiserror::Error;

use crate::types::ProviderId;

#[derive(Debug, Error)]
/// Failures raised while resolving, probing or running a provider CLI.
pub enum ProviderError {
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),
    #[error("no adapter registered for provider '{0}'")]
    AdapterMissing(ProviderId),
    #[error("{provider} cli '{binary}' is not available: {detail}")]
    CliUnavailable {
        provider: ProviderId,
        binary: String,
        detail: String,
    },
    #[error("failed to spawn {provider} cli '{binary}': {detail}")]
    Spawn {
        provider: ProviderId,
        binary: String,
        detail: String,
    },
    #[error("{provider} cli i/o failed: {source}")]
    Io {
        provider: ProviderId,
        #[source]
        source: std::io::Error,
    },
    #[error("{provider} cli failed with status {status}: {summary}")]
    NonZeroExit {
        provider: ProviderId,
        status: String,
        summary: String,
    },
}
