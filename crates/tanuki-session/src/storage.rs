//! Backing stores for the session manager.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};

use crate::legacy::decode_records;
use crate::model::Session;

#[derive(Debug, Clone, Default)]
pub struct LoadedSessions {
    pub sessions: Vec<Session>,
    /// Records converted from the single-session-per-issue schema.
    pub upgraded_records: usize,
}

/// Durable storage for the full session store.
pub trait SessionStorage: Send + Sync {
    fn load(&self) -> Result<LoadedSessions>;

    fn persist(&self, sessions: &[Session]) -> Result<()>;

    fn describe(&self) -> String;
}

fn encode_sessions(sessions: &[Session]) -> Result<String> {
    let mut payload =
        serde_json::to_string_pretty(sessions).context("failed to serialize session store")?;
    payload.push('\n');
    Ok(payload)
}

#[derive(Debug, Clone)]
/// JSON file store written with temp-file + rename.
pub struct FileSessionStorage {
    path: PathBuf,
}

impl FileSessionStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn quarantine_unreadable_file(&self) -> Option<PathBuf> {
        let file_name = self.path.file_name()?.to_string_lossy().to_string();
        let backup = self.path.with_file_name(format!(
            "{file_name}.corrupt-{}",
            tanuki_core::current_unix_timestamp_ms()
        ));
        std::fs::rename(&self.path, &backup).ok()?;
        Some(backup)
    }
}

impl SessionStorage for FileSessionStorage {
    fn load(&self) -> Result<LoadedSessions> {
        if !self.path.exists() {
            return Ok(LoadedSessions::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read session store {}", self.path.display()))?;
        match decode_records(&raw) {
            Ok(decoded) => Ok(LoadedSessions {
                sessions: decoded.sessions,
                upgraded_records: decoded.upgraded,
            }),
            Err(error) => {
                let backup = self.quarantine_unreadable_file();
                tracing::warn!(
                    path = %self.path.display(),
                    backup = backup.as_deref().map(|path| path.display().to_string()).unwrap_or_default(),
                    error = %error,
                    "failed to parse session store (starting fresh)"
                );
                Ok(LoadedSessions::default())
            }
        }
    }

    fn persist(&self, sessions: &[Session]) -> Result<()> {
        let payload = encode_sessions(sessions)?;
        tanuki_core::write_text_atomic(&self.path, &payload)
            .with_context(|| format!("failed to write session store {}", self.path.display()))
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    payload: String,
    persist_count: usize,
}

#[derive(Debug, Clone, Default)]
/// In-memory store holding the same JSON payload the file store would write.
pub struct MemorySessionStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a raw JSON payload.
    pub fn from_json(payload: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                payload: payload.into(),
                persist_count: 0,
            })),
        }
    }

    pub fn payload(&self) -> String {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .payload
            .clone()
    }

    pub fn persist_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .persist_count
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self) -> Result<LoadedSessions> {
        let payload = self.payload();
        let decoded = decode_records(&payload).context("failed to parse in-memory session store")?;
        Ok(LoadedSessions {
            sessions: decoded.sessions,
            upgraded_records: decoded.upgraded,
        })
    }

    fn persist(&self, sessions: &[Session]) -> Result<()> {
        let payload = encode_sessions(sessions)?;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.payload = payload;
        state.persist_count += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
