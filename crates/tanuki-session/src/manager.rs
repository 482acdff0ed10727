use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tanuki_provider::ProviderId;

use crate::model::{ProviderSession, Session, SessionKey, SessionMeta, SpecStage};
use crate::storage::SessionStorage;

const DEFAULT_MAX_IDLE_TIME: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_MAX_SESSIONS: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionManagerConfig {
    pub max_idle_time: Duration,
    pub max_sessions: usize,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            max_idle_time: DEFAULT_MAX_IDLE_TIME,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub removed_sessions: usize,
    pub removed_provider_sessions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub total_provider_sessions: usize,
    pub provider_counts: BTreeMap<ProviderId, usize>,
    pub oldest_last_used: Option<DateTime<Utc>>,
    pub newest_last_used: Option<DateTime<Utc>>,
    pub max_sessions: usize,
    pub max_idle_secs: u64,
    pub storage: String,
}

/// Keyed store of per-issue conversations with per-provider idle expiry.
///
/// Every state change is followed by a full persist through the configured
/// [`SessionStorage`]. Reads that expire entries also persist.
pub struct SessionManager {
    config: SessionManagerConfig,
    storage: Box<dyn SessionStorage>,
    sessions: Mutex<BTreeMap<String, Session>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("storage", &self.storage.describe())
            .finish()
    }
}

fn is_idle(last_used: DateTime<Utc>, now: DateTime<Utc>, max_idle: Duration) -> bool {
    match now.signed_duration_since(last_used).to_std() {
        Ok(elapsed) => elapsed > max_idle,
        // last_used in the future (clock skew) counts as fresh
        Err(_) => false,
    }
}

/// Drops idle provider entries. Returns the number of entries removed.
fn expire_provider_entries(session: &mut Session, now: DateTime<Utc>, max_idle: Duration) -> usize {
    let before = session.provider_sessions.len();
    session
        .provider_sessions
        .retain(|_, entry| !is_idle(entry.last_used, now, max_idle));
    let removed = before - session.provider_sessions.len();
    if removed > 0 {
        session.refresh_derived();
    }
    removed
}

impl SessionManager {
    pub fn new(config: SessionManagerConfig, storage: Box<dyn SessionStorage>) -> Result<Self> {
        let loaded = storage
            .load()
            .with_context(|| format!("failed to load sessions from {}", storage.describe()))?;
        let mut sessions = BTreeMap::new();
        let mut dropped = 0usize;
        for mut session in loaded.sessions {
            if !session.refresh_derived() {
                dropped += 1;
                continue;
            }
            sessions.insert(session.issue_key.clone(), session);
        }
        let manager = Self {
            config,
            storage,
            sessions: Mutex::new(sessions),
        };
        if loaded.upgraded_records > 0 || dropped > 0 {
            tracing::info!(
                upgraded = loaded.upgraded_records,
                dropped,
                storage = %manager.storage.describe(),
                "normalized session store on load"
            );
            let guard = manager.lock();
            manager.persist_locked(&guard)?;
        }
        Ok(manager)
    }

    pub fn config(&self) -> SessionManagerConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist_locked(&self, sessions: &BTreeMap<String, Session>) -> Result<()> {
        let snapshot = sessions.values().cloned().collect::<Vec<_>>();
        self.storage
            .persist(&snapshot)
            .with_context(|| format!("failed to persist sessions to {}", self.storage.describe()))
    }

    fn persist_or_warn(&self, sessions: &BTreeMap<String, Session>) {
        if let Err(error) = self.persist_locked(sessions) {
            tracing::warn!(error = %format!("{error:#}"), "session store persist failed");
        }
    }

    /// Expires the key's provider entries. Returns true when anything changed.
    fn expire_key(
        &self,
        sessions: &mut BTreeMap<String, Session>,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(session) = sessions.get_mut(key.as_str()) else {
            return false;
        };
        let removed = expire_provider_entries(session, now, self.config.max_idle_time);
        if removed == 0 {
            return false;
        }
        if session.provider_sessions.is_empty() {
            sessions.remove(key.as_str());
            tracing::debug!(session_key = %key, "session expired");
        } else {
            tracing::debug!(session_key = %key, removed, "provider session expired");
        }
        true
    }

    /// Returns the live session and bumps its most recent provider entry.
    pub fn get(&self, key: &SessionKey) -> Option<Session> {
        let now = Utc::now();
        let mut sessions = self.lock();
        let expired = self.expire_key(&mut sessions, key, now);
        let touched = match sessions.get_mut(key.as_str()) {
            Some(session) => {
                let provider = session.last_provider;
                if let Some(entry) = session.provider_sessions.get_mut(&provider) {
                    entry.last_used = now;
                }
                session.refresh_derived();
                true
            }
            None => false,
        };
        if expired || touched {
            self.persist_or_warn(&sessions);
        }
        sessions.get(key.as_str()).cloned()
    }

    /// Like [`SessionManager::get`] but leaves `last_used` untouched.
    pub fn peek(&self, key: &SessionKey) -> Option<Session> {
        let now = Utc::now();
        let mut sessions = self.lock();
        if self.expire_key(&mut sessions, key, now) {
            self.persist_or_warn(&sessions);
        }
        sessions.get(key.as_str()).cloned()
    }

    /// Returns one provider's live conversation handle and bumps it.
    pub fn get_provider_session(
        &self,
        key: &SessionKey,
        provider: ProviderId,
    ) -> Option<ProviderSession> {
        let now = Utc::now();
        let mut sessions = self.lock();
        let expired = self.expire_key(&mut sessions, key, now);
        let entry = sessions.get_mut(key.as_str()).and_then(|session| {
            let entry = session.provider_sessions.get_mut(&provider)?;
            entry.last_used = now;
            let entry = entry.clone();
            session.refresh_derived();
            Some(entry)
        });
        if expired || entry.is_some() {
            self.persist_or_warn(&sessions);
        }
        entry
    }

    /// Records `session_id` for `provider` and merges `meta` into the session.
    pub fn set_session(
        &self,
        key: &SessionKey,
        session_id: &str,
        meta: &SessionMeta,
        provider: ProviderId,
    ) -> Result<Session> {
        let now = Utc::now();
        let mut sessions = self.lock();
        let session = sessions
            .entry(key.as_str().to_string())
            .or_insert_with(|| Session::new(key, meta, provider, now));
        expire_provider_entries(session, now, self.config.max_idle_time);
        session.provider_sessions.insert(
            provider,
            ProviderSession {
                session_id: session_id.to_string(),
                last_used: now,
            },
        );
        meta.apply(session);
        session.refresh_derived();
        let stored = session.clone();
        self.evict_over_capacity(&mut sessions, key);
        self.persist_locked(&sessions)?;
        tracing::debug!(session_key = %key, provider = %provider, "session stored");
        Ok(stored)
    }

    fn evict_over_capacity(&self, sessions: &mut BTreeMap<String, Session>, protected: &SessionKey) {
        let max_sessions = self.config.max_sessions;
        if sessions.len() <= max_sessions {
            return;
        }
        let excess = sessions.len() - max_sessions;
        let batch = excess.max(max_sessions / 10).max(1);
        let mut candidates = sessions
            .values()
            .filter(|session| session.issue_key != protected.as_str())
            .map(|session| (session.last_used, session.issue_key.clone()))
            .collect::<Vec<_>>();
        candidates.sort();
        let mut evicted = 0usize;
        for (_, issue_key) in candidates.into_iter().take(batch) {
            sessions.remove(&issue_key);
            evicted += 1;
        }
        tracing::info!(
            evicted,
            remaining = sessions.len(),
            max_sessions,
            "evicted oldest sessions over capacity"
        );
    }

    /// Removes one provider entry, or the whole session when `provider` is
    /// `None`. Returns whether anything was removed.
    pub fn remove_session(&self, key: &SessionKey, provider: Option<ProviderId>) -> Result<bool> {
        let mut sessions = self.lock();
        let removed = match provider {
            None => sessions.remove(key.as_str()).is_some(),
            Some(provider) => match sessions.get_mut(key.as_str()) {
                None => false,
                Some(session) => {
                    let removed = session.provider_sessions.remove(&provider).is_some();
                    if removed && !session.refresh_derived() {
                        sessions.remove(key.as_str());
                    }
                    removed
                }
            },
        };
        if removed {
            self.persist_locked(&sessions)?;
            tracing::debug!(
                session_key = %key,
                provider = provider.map(ProviderId::as_str).unwrap_or("all"),
                "session removed"
            );
        }
        Ok(removed)
    }

    /// Records the spec-kit stage reached and the documents it produced.
    /// Returns false when no live session exists for `key`.
    pub fn update_spec_kit_state(
        &self,
        key: &SessionKey,
        stage: SpecStage,
        documents: Vec<String>,
    ) -> Result<bool> {
        let mut sessions = self.lock();
        let Some(session) = sessions.get_mut(key.as_str()) else {
            return Ok(false);
        };
        session.spec_kit_stage = Some(stage);
        if documents.is_empty() {
            session.spec_kit_documents.remove(&stage);
        } else {
            session.spec_kit_documents.insert(stage, documents);
        }
        self.persist_locked(&sessions)?;
        Ok(true)
    }

    /// Sweeps every session with `max_age` (defaults to the configured idle
    /// time).
    pub fn clean_expired_sessions(&self, max_age: Option<Duration>) -> Result<CleanupReport> {
        let max_age = max_age.unwrap_or(self.config.max_idle_time);
        let now = Utc::now();
        let mut sessions = self.lock();
        let mut report = CleanupReport::default();
        sessions.retain(|_, session| {
            report.removed_provider_sessions += expire_provider_entries(session, now, max_age);
            let live = !session.provider_sessions.is_empty();
            if !live {
                report.removed_sessions += 1;
            }
            live
        });
        if report.removed_provider_sessions > 0 {
            self.persist_locked(&sessions)?;
            tracing::info!(
                removed_sessions = report.removed_sessions,
                removed_provider_sessions = report.removed_provider_sessions,
                "cleaned expired sessions"
            );
        }
        Ok(report)
    }

    pub fn get_stats(&self) -> SessionStats {
        let sessions = self.lock();
        let mut provider_counts = BTreeMap::new();
        for session in sessions.values() {
            for provider in session.provider_sessions.keys() {
                *provider_counts.entry(*provider).or_insert(0) += 1;
            }
        }
        SessionStats {
            total_sessions: sessions.len(),
            total_provider_sessions: provider_counts.values().sum(),
            provider_counts,
            oldest_last_used: sessions.values().map(|session| session.last_used).min(),
            newest_last_used: sessions.values().map(|session| session.last_used).max(),
            max_sessions: self.config.max_sessions,
            max_idle_secs: self.config.max_idle_time.as_secs(),
            storage: self.storage.describe(),
        }
    }

    /// Snapshot of every stored session, without expiry.
    pub fn list(&self) -> Vec<Session> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
