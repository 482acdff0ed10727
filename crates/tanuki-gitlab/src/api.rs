use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Issue or merge request that comments and discussions hang off.
pub enum Noteable {
    Issue { iid: u64 },
    MergeRequest { iid: u64 },
}

impl Noteable {
    pub fn iid(self) -> u64 {
        match self {
            Self::Issue { iid } | Self::MergeRequest { iid } => iid,
        }
    }

    pub fn kind_label(self) -> &'static str {
        match self {
            Self::Issue { .. } => "issue",
            Self::MergeRequest { .. } => "merge_request",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DiffRefs {
    pub base_sha: String,
    pub head_sha: String,
    pub start_sha: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct MergeRequest {
    pub iid: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source_branch: String,
    #[serde(default)]
    pub target_branch: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub diff_refs: Option<DiffRefs>,
    /// GitLab reports this as a string ("12", "1000+").
    #[serde(default)]
    pub changes_count: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct NoteAuthor {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Note {
    pub id: u64,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author: Option<NoteAuthor>,
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub resolvable: bool,
    #[serde(default)]
    pub resolved: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Discussion {
    pub id: String,
    #[serde(default)]
    pub individual_note: bool,
    #[serde(default)]
    pub notes: Vec<Note>,
}

impl Discussion {
    pub fn is_resolvable(&self) -> bool {
        self.notes.iter().any(|note| note.resolvable)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
/// One file entry of `GET /merge_requests/:iid/diffs`.
pub struct MergeRequestDiff {
    #[serde(default)]
    pub old_path: String,
    #[serde(default)]
    pub new_path: String,
    #[serde(default)]
    pub diff: String,
    #[serde(default)]
    pub new_file: bool,
    #[serde(default)]
    pub renamed_file: bool,
    #[serde(default)]
    pub deleted_file: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
/// Position descriptor required to anchor an inline diff note.
pub struct DiffPosition {
    pub position_type: String,
    pub base_sha: String,
    pub start_sha: String,
    pub head_sha: String,
    pub old_path: String,
    pub new_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_line: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_line: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateMergeRequest {
    pub source_branch: String,
    pub target_branch: String,
    pub title: String,
    pub description: String,
    pub remove_source_branch: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeRequestUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// GitLab REST operations the orchestrator depends on.
#[async_trait]
pub trait GitlabApi: Send + Sync {
    async fn get_merge_request(&self, project_id: u64, iid: u64) -> Result<MergeRequest>;

    async fn list_discussions(&self, project_id: u64, noteable: Noteable)
        -> Result<Vec<Discussion>>;

    async fn create_comment(&self, project_id: u64, noteable: Noteable, body: &str)
        -> Result<Note>;

    async fn update_comment(
        &self,
        project_id: u64,
        noteable: Noteable,
        note_id: u64,
        body: &str,
    ) -> Result<()>;

    async fn reply_to_discussion(
        &self,
        project_id: u64,
        noteable: Noteable,
        discussion_id: &str,
        body: &str,
    ) -> Result<Note>;

    async fn update_discussion_note(
        &self,
        project_id: u64,
        noteable: Noteable,
        discussion_id: &str,
        note_id: u64,
        body: &str,
    ) -> Result<()>;

    async fn resolve_discussion(
        &self,
        project_id: u64,
        noteable: Noteable,
        discussion_id: &str,
    ) -> Result<()>;

    async fn create_branch(&self, project_id: u64, branch: &str, from_ref: &str) -> Result<()>;

    async fn create_merge_request(
        &self,
        project_id: u64,
        request: &CreateMergeRequest,
    ) -> Result<MergeRequest>;

    async fn update_merge_request(
        &self,
        project_id: u64,
        iid: u64,
        update: &MergeRequestUpdate,
    ) -> Result<()>;

    async fn get_merge_request_diffs(
        &self,
        project_id: u64,
        iid: u64,
    ) -> Result<Vec<MergeRequestDiff>>;

    async fn create_diff_discussion(
        &self,
        project_id: u64,
        iid: u64,
        body: &str,
        position: &DiffPosition,
    ) -> Result<()>;
}
