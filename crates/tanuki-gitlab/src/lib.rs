//! GitLab-facing data model and collaborator seams.
//!
//! Webhook payload types, the REST and git-workspace collaborator traits the
//! orchestrator drives, response-marker comment formatting and trigger-phrase
//! parsing.

pub mod api;
pub mod comment;
pub mod events;
pub mod trigger;
pub mod workspace;

pub use api::{
    CreateMergeRequest, DiffPosition, DiffRefs, Discussion, GitlabApi, MergeRequest,
    MergeRequestDiff, MergeRequestUpdate, Note, NoteAuthor, Noteable,
};
pub use comment::{contains_response_marker, format_comment_body, MAX_COMMENT_CHARS, RESPONSE_MARKER};
pub use events::{
    IssueAttributes, MergeRequestAttributes, NoteAttributes, NoteableKind, Project, Tenant, User,
    WebhookEvent,
};
pub use trigger::{Trigger, TriggerMatcher};
pub use workspace::{PrepareOptions, ProjectWorkspace, PushOutcome};
