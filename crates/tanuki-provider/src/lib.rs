//! AI CLI provider adapters and the streaming subprocess executor.
//!
//! Each supported assistant CLI gets a [`ProviderAdapter`] that knows how to
//! build its argument vector, parse its final output and turn partial stdout
//! into human-readable progress lines. The [`StreamingExecutor`] owns the
//! subprocess lifecycle and is exposed to the orchestrator through the
//! [`AiExecutor`] trait so it can be replaced in tests.

pub mod adapter;
pub mod claude;
pub mod cli_executable;
pub mod codex;
pub mod error;
pub mod executor;
pub mod registry;
pub mod types;

pub use adapter::ProviderAdapter;
pub use claude::ClaudeAdapter;
pub use cli_executable::is_executable_available_in;
pub use codex::CodexAdapter;
pub use error::ProviderError;
pub use executor::{AiExecutor, ExecutionCallback, NoopCallback, StreamingExecutor};
pub use registry::AdapterRegistry;
pub use types::{
    ExecutionConfig, ExecutionContext, ExecutionOutcome, OutputFormat, ParsedOutput, ProviderId,
    ProviderSettings, SessionOptions,
};
