//! Per-issue AI conversation state.
//!
//! A [`Session`] groups one provider conversation handle per assistant for a
//! single issue or merge request. The [`SessionManager`] keeps the store in
//! memory, expires provider entries independently, evicts the oldest sessions
//! when over capacity and persists the whole store after every change through
//! a pluggable [`SessionStorage`].

mod legacy;
pub mod manager;
pub mod model;
pub mod storage;

pub use manager::{CleanupReport, SessionManager, SessionManagerConfig, SessionStats};
pub use model::{ProviderSession, Session, SessionKey, SessionMeta, SpecStage};
pub use storage::{FileSessionStorage, LoadedSessions, MemorySessionStorage, SessionStorage};
