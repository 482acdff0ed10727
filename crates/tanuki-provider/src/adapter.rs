//! Provider adapter contract.

use std::collections::BTreeMap;

use crate::types::{ExecutionConfig, ExecutionContext, ParsedOutput, ProviderId, SessionOptions};

/// Per-vendor translation between a prompt payload and one CLI invocation.
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> ProviderId;

    fn binary(&self) -> &str;

    /// Environment for the subprocess, derived from the executor's base env.
    fn build_env(&self, base: &BTreeMap<String, String>) -> BTreeMap<String, String>;

    fn create_execution_config(
        &self,
        prompt: &str,
        context: &ExecutionContext,
        options: &SessionOptions,
    ) -> ExecutionConfig;

    fn parse_result(&self, raw_output: &str) -> ParsedOutput;

    /// Returns a progress line for one chunk of stdout, or an empty string
    /// when the chunk carries nothing worth showing.
    fn extract_progress_message(&self, partial: &str) -> String;

    /// Arguments for the cheap availability probe.
    fn health_check_args(&self) -> Vec<String> {
        vec!["--version".to_string()]
    }
}

/// Merges adapter-specific variables over the base environment.
pub(crate) fn merge_env(
    base: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut env = base.clone();
    env.insert("NO_COLOR".to_string(), "1".to_string());
    for (key, value) in overrides {
        env.insert(key.clone(), value.clone());
    }
    env
}

/// Prompt text handed to CLIs that have no separate system-prompt flag.
pub(crate) fn compose_prompt(system_prompt: &str, context: &str, prompt: &str) -> String {
    [system_prompt, context, prompt]
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// First non-empty line of `text`, bounded for progress display.
pub(crate) fn first_line(text: &str) -> String {
    const MAX_PROGRESS_CHARS: usize = 200;
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| tanuki_core::truncate_chars(line, MAX_PROGRESS_CHARS))
        .unwrap_or_default()
}
