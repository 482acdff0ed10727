use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Supported assistant CLI backends.
pub enum ProviderId {
    Claude,
    Codex,
}

impl ProviderId {
    pub const ALL: [ProviderId; 2] = [ProviderId::Claude, ProviderId::Codex];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
        }
    }

    /// Name shown to users in progress and result comments.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Claude => "Claude",
            Self::Codex => "Codex",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ProviderError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "claude" | "claude-code" | "anthropic" => Ok(Self::Claude),
            "codex" | "openai-codex" => Ok(Self::Codex),
            _ => Err(ProviderError::UnknownProvider(raw.trim().to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Output mode requested from the CLI. Callers always force `Json`.
pub enum OutputFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Prompt-side inputs shared by every adapter.
pub struct ExecutionContext {
    pub provider: ProviderId,
    pub system_prompt: String,
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub session_id: Option<String>,
    pub is_new_session: bool,
    pub output_format: OutputFormat,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            session_id: None,
            is_new_session: true,
            output_format: OutputFormat::Json,
        }
    }
}

impl SessionOptions {
    pub fn resume(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            is_new_session: false,
            output_format: OutputFormat::Json,
        }
    }

    /// Session id to resume, if this execution continues a conversation.
    pub fn resume_id(&self) -> Option<&str> {
        if self.is_new_session {
            return None;
        }
        self.session_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionConfig {
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// Normalized final output of one CLI run.
pub struct ParsedOutput {
    pub text: String,
    pub raw: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub session_id: Option<String>,
}

impl ExecutionOutcome {
    pub fn succeeded(output: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            session_id,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            session_id: None,
        }
    }

    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("unknown error")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Per-provider CLI settings loaded from configuration.
pub struct ProviderSettings {
    pub binary: String,
    pub extra_args: Vec<String>,
    pub model: Option<String>,
    pub env: BTreeMap<String, String>,
}

impl ProviderSettings {
    pub fn default_for(provider: ProviderId) -> Self {
        Self {
            binary: provider.as_str().to_string(),
            extra_args: Vec::new(),
            model: None,
            env: BTreeMap::new(),
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self::default_for(ProviderId::Claude)
    }
}
