//! Processor configuration loaded from TOML.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tanuki_provider::{ProviderId, ProviderSettings};
use tanuki_session::SessionManagerConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
/// `[providers.<id>]` table. Unset fields keep the provider's defaults.
pub struct ProviderConfig {
    pub binary: Option<String>,
    pub extra_args: Vec<String>,
    pub model: Option<String>,
    pub env: BTreeMap<String, String>,
    /// Trigger handle, `@<provider id>` when unset.
    pub mention: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    pub sessions_enabled: bool,
    pub session_store_path: PathBuf,
    pub session_max_idle_secs: u64,
    pub session_max_sessions: usize,
    pub default_provider: String,
    pub code_review_target_branch: String,
    pub dispatch_delay_ms: u64,
    pub review_snap_window: u64,
    pub max_conflict_resolution_attempts: u32,
    pub health_probe_timeout_ms: u64,
    pub progress_max_lines: usize,
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            sessions_enabled: true,
            session_store_path: PathBuf::from(".tanuki/sessions.json"),
            session_max_idle_secs: 86_400,
            session_max_sessions: 1_000,
            default_provider: ProviderId::Claude.as_str().to_string(),
            code_review_target_branch: "develop".to_string(),
            dispatch_delay_ms: 500,
            review_snap_window: 3,
            max_conflict_resolution_attempts: 1,
            health_probe_timeout_ms: 10_000,
            progress_max_lines: 15,
            providers: BTreeMap::new(),
        }
    }
}

impl ProcessorConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config = toml::from_str::<Self>(raw).context("failed to parse processor config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_max_sessions == 0 {
            bail!("session_max_sessions must be greater than 0");
        }
        if self.session_max_idle_secs == 0 {
            bail!("session_max_idle_secs must be greater than 0");
        }
        if self.progress_max_lines == 0 {
            bail!("progress_max_lines must be greater than 0");
        }
        if self.code_review_target_branch.trim().is_empty() {
            bail!("code_review_target_branch cannot be empty");
        }
        self.default_provider()?;
        for (name, provider) in &self.providers {
            name.parse::<ProviderId>()
                .with_context(|| format!("invalid [providers.{name}] table"))?;
            if provider
                .binary
                .as_deref()
                .is_some_and(|binary| binary.trim().is_empty())
            {
                bail!("providers.{name}.binary cannot be empty");
            }
        }
        Ok(())
    }

    pub fn default_provider(&self) -> Result<ProviderId> {
        self.default_provider
            .parse()
            .with_context(|| format!("invalid default_provider '{}'", self.default_provider))
    }

    fn provider_config(&self, provider: ProviderId) -> Option<&ProviderConfig> {
        self.providers
            .iter()
            .find(|(name, _)| name.parse::<ProviderId>().ok() == Some(provider))
            .map(|(_, config)| config)
    }

    /// CLI settings per provider, with config overrides applied.
    pub fn provider_settings(&self) -> BTreeMap<ProviderId, ProviderSettings> {
        ProviderId::ALL
            .iter()
            .map(|provider| {
                let mut settings = ProviderSettings::default_for(*provider);
                if let Some(config) = self.provider_config(*provider) {
                    if let Some(binary) = config.binary.as_deref() {
                        settings.binary = binary.trim().to_string();
                    }
                    settings.extra_args = config.extra_args.clone();
                    settings.model = config.model.clone();
                    settings.env = config.env.clone();
                }
                (*provider, settings)
            })
            .collect()
    }

    /// Trigger mention per provider.
    pub fn mentions(&self) -> Vec<(ProviderId, String)> {
        ProviderId::ALL
            .iter()
            .map(|provider| {
                let mention = self
                    .provider_config(*provider)
                    .and_then(|config| config.mention.clone())
                    .unwrap_or_else(|| provider.as_str().to_string());
                (*provider, mention)
            })
            .collect()
    }

    pub fn session_manager_config(&self) -> SessionManagerConfig {
        SessionManagerConfig {
            max_idle_time: Duration::from_secs(self.session_max_idle_secs),
            max_sessions: self.session_max_sessions,
        }
    }

    pub fn dispatch_delay(&self) -> Duration {
        Duration::from_millis(self.dispatch_delay_ms)
    }

    pub fn health_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.health_probe_timeout_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tanuki_provider::ProviderId;

    use super::ProcessorConfig;

    #[test]
    fn unit_empty_config_uses_defaults() {
        let config = ProcessorConfig::from_toml_str("").expect("config");
        assert_eq!(config, ProcessorConfig::default());
        assert_eq!(
            config.session_store_path,
            PathBuf::from(".tanuki/sessions.json")
        );
        assert_eq!(config.default_provider().expect("provider"), ProviderId::Claude);
        assert_eq!(config.code_review_target_branch, "develop");
        let settings = config.provider_settings();
        assert_eq!(settings[&ProviderId::Codex].binary, "codex");
    }

    #[test]
    fn functional_provider_tables_override_settings_and_mentions() {
        let config = ProcessorConfig::from_toml_str(
            r#"
default_provider = "codex"
review_snap_window = 5

[providers.codex]
binary = "/opt/codex/bin/codex"
model = "gpt-5-codex"
extra_args = ["--sandbox", "workspace-write"]
mention = "ai"
"#,
        )
        .expect("config");
        assert_eq!(config.default_provider().expect("provider"), ProviderId::Codex);
        assert_eq!(config.review_snap_window, 5);
        let settings = config.provider_settings();
        assert_eq!(settings[&ProviderId::Codex].binary, "/opt/codex/bin/codex");
        assert_eq!(settings[&ProviderId::Codex].model.as_deref(), Some("gpt-5-codex"));
        assert_eq!(settings[&ProviderId::Claude].binary, "claude");
        assert!(config
            .mentions()
            .contains(&(ProviderId::Codex, "ai".to_string())));
    }

    #[test]
    fn regression_invalid_values_are_rejected_at_load() {
        let zero = ProcessorConfig::from_toml_str("session_max_sessions = 0").expect_err("zero");
        assert!(format!("{zero:#}").contains("session_max_sessions"));

        let unknown =
            ProcessorConfig::from_toml_str("[providers.gemini]\nbinary = \"gemini\"").expect_err("unknown");
        assert!(format!("{unknown:#}").contains("unknown provider 'gemini'"));

        let bad_default =
            ProcessorConfig::from_toml_str("default_provider = \"gpt\"").expect_err("default");
        assert!(format!("{bad_default:#}").contains("default_provider"));

        assert!(ProcessorConfig::from_toml_str("typo_field = 1").is_err());
    }

    #[test]
    fn integration_load_reads_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tanuki.toml");
        std::fs::write(&path, "dispatch_delay_ms = 0\nsessions_enabled = false\n").expect("write");
        let config = ProcessorConfig::load(&path).expect("load");
        assert!(!config.sessions_enabled);
        assert_eq!(config.dispatch_delay().as_millis(), 0);
        assert!(ProcessorConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
