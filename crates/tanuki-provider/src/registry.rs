//! Provider id → adapter lookup.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::adapter::ProviderAdapter;
use crate::claude::ClaudeAdapter;
use crate::codex::CodexAdapter;
use crate::error::ProviderError;
use crate::types::{ProviderId, ProviderSettings};

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<ProviderId, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in adapters, using `settings` where provided.
    pub fn with_defaults(settings: &BTreeMap<ProviderId, ProviderSettings>) -> Self {
        let settings_for = |provider: ProviderId| {
            settings
                .get(&provider)
                .cloned()
                .unwrap_or_else(|| ProviderSettings::default_for(provider))
        };
        let mut registry = Self::new();
        registry.register(Arc::new(ClaudeAdapter::new(settings_for(ProviderId::Claude))));
        registry.register(Arc::new(CodexAdapter::new(settings_for(ProviderId::Codex))));
        registry
    }

    /// Registers `adapter`, replacing any adapter with the same id.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.id(), adapter);
    }

    pub fn get(&self, provider: ProviderId) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        self.adapters
            .get(&provider)
            .cloned()
            .ok_or(ProviderError::AdapterMissing(provider))
    }

    pub fn providers(&self) -> Vec<ProviderId> {
        self.adapters.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::AdapterRegistry;
    use crate::types::{ProviderId, ProviderSettings};

    #[test]
    fn unit_with_defaults_registers_both_builtin_adapters() {
        let registry = AdapterRegistry::with_defaults(&BTreeMap::new());
        assert_eq!(
            registry.providers(),
            vec![ProviderId::Claude, ProviderId::Codex]
        );
        assert_eq!(
            registry.get(ProviderId::Codex).expect("codex").binary(),
            "codex"
        );
    }

    #[test]
    fn functional_with_defaults_applies_configured_binary() {
        let mut settings = BTreeMap::new();
        settings.insert(
            ProviderId::Claude,
            ProviderSettings {
                binary: "/opt/claude/bin/claude".to_string(),
                ..ProviderSettings::default_for(ProviderId::Claude)
            },
        );
        let registry = AdapterRegistry::with_defaults(&settings);
        assert_eq!(
            registry.get(ProviderId::Claude).expect("claude").binary(),
            "/opt/claude/bin/claude"
        );
    }

    #[test]
    fn regression_get_reports_missing_adapter() {
        let error = match AdapterRegistry::new().get(ProviderId::Claude) {
            Ok(_) => panic!("empty registry must not resolve adapters"),
            Err(error) => error,
        };
        assert_eq!(
            error.to_string(),
            "no adapter registered for provider 'claude'"
        );
    }
}
