use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Project {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub path_with_namespace: String,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub git_http_url: Option<String>,
}

impl Project {
    pub fn default_branch_or_main(&self) -> &str {
        self.default_branch
            .as_deref()
            .map(str::trim)
            .filter(|branch| !branch.is_empty())
            .unwrap_or("main")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct User {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct IssueAttributes {
    #[serde(default)]
    pub id: u64,
    pub iid: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct MergeRequestAttributes {
    #[serde(default)]
    pub id: u64,
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
    pub action: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct NoteAttributes {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub noteable_type: String,
    #[serde(default)]
    pub discussion_id: Option<String>,
    #[serde(default)]
    pub position: Option<Value>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Object a note is attached to.
pub enum NoteableKind {
    Issue,
    MergeRequest,
    Commit,
    Snippet,
    Unknown,
}

impl NoteAttributes {
    pub fn noteable_kind(&self) -> NoteableKind {
        match self.noteable_type.trim() {
            "Issue" => NoteableKind::Issue,
            "MergeRequest" => NoteableKind::MergeRequest,
            "Commit" => NoteableKind::Commit,
            "Snippet" => NoteableKind::Snippet,
            _ => NoteableKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "object_kind", rename_all = "snake_case")]
/// Webhook payload, discriminated by GitLab's `object_kind`.
pub enum WebhookEvent {
    Issue {
        project: Project,
        #[serde(default)]
        user: User,
        object_attributes: IssueAttributes,
    },
    MergeRequest {
        project: Project,
        #[serde(default)]
        user: User,
        object_attributes: MergeRequestAttributes,
    },
    Note {
        project: Project,
        #[serde(default)]
        user: User,
        object_attributes: NoteAttributes,
        #[serde(default)]
        issue: Option<IssueAttributes>,
        #[serde(default)]
        merge_request: Option<MergeRequestAttributes>,
    },
    #[serde(other)]
    Unsupported,
}

impl WebhookEvent {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Issue { .. } => "issue",
            Self::MergeRequest { .. } => "merge_request",
            Self::Note { .. } => "note",
            Self::Unsupported => "unsupported",
        }
    }

    pub fn project(&self) -> Option<&Project> {
        match self {
            Self::Issue { project, .. }
            | Self::MergeRequest { project, .. }
            | Self::Note { project, .. } => Some(project),
            Self::Unsupported => None,
        }
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Self::Issue { user, .. } | Self::MergeRequest { user, .. } | Self::Note { user, .. } => {
                Some(user)
            }
            Self::Unsupported => None,
        }
    }

    /// Note body for note events.
    pub fn note_body(&self) -> Option<&str> {
        match self {
            Self::Note {
                object_attributes, ..
            } => Some(object_attributes.note.as_str()),
            _ => None,
        }
    }

    /// Issue or merge-request iid the event belongs to. Notes on MRs resolve to
    /// the MR, notes on issues to the issue.
    pub fn target_iid(&self) -> Option<u64> {
        match self {
            Self::Issue {
                object_attributes, ..
            } => Some(object_attributes.iid),
            Self::MergeRequest {
                object_attributes, ..
            } => Some(object_attributes.iid),
            Self::Note {
                object_attributes,
                issue,
                merge_request,
                ..
            } => match object_attributes.noteable_kind() {
                NoteableKind::Issue => issue.as_ref().map(|issue| issue.iid),
                NoteableKind::MergeRequest => merge_request.as_ref().map(|mr| mr.iid),
                _ => None,
            },
            Self::Unsupported => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Tenant resolved by the transport layer for multi-tenant deployments.
pub struct Tenant {
    pub owner_id: Option<String>,
}

impl Tenant {
    pub fn owned_by(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{NoteableKind, WebhookEvent};

    #[test]
    fn unit_webhook_event_parses_issue_payload() {
        let event = WebhookEvent::from_json(
            r#"{
                "object_kind": "issue",
                "event_type": "issue",
                "user": {"id": 3, "username": "dev", "name": "Dev"},
                "project": {"id": 11, "web_url": "https://gitlab.example/g/p", "default_branch": "main"},
                "object_attributes": {"iid": 4, "title": "Bug", "description": "@codex fix it", "action": "open", "state": "opened"}
            }"#,
        )
        .expect("parse");
        assert_eq!(event.kind_label(), "issue");
        assert_eq!(event.target_iid(), Some(4));
        assert_eq!(
            event.project().map(|project| project.default_branch_or_main()),
            Some("main")
        );
    }

    #[test]
    fn functional_webhook_event_resolves_note_targets_by_noteable_type() {
        let on_mr = WebhookEvent::from_json(
            r#"{
                "object_kind": "note",
                "project": {"id": 11},
                "object_attributes": {"id": 90, "note": "@claude tweak", "noteable_type": "MergeRequest", "discussion_id": "abc"},
                "merge_request": {"iid": 8, "source_branch": "feature", "target_branch": "develop"}
            }"#,
        )
        .expect("parse");
        assert_eq!(on_mr.target_iid(), Some(8));
        assert_eq!(on_mr.note_body(), Some("@claude tweak"));

        let on_commit = WebhookEvent::from_json(
            r#"{
                "object_kind": "note",
                "project": {"id": 11},
                "object_attributes": {"id": 91, "note": "hi", "noteable_type": "Commit"}
            }"#,
        )
        .expect("parse");
        assert_eq!(on_commit.target_iid(), None);
        match on_commit {
            WebhookEvent::Note {
                object_attributes, ..
            } => assert_eq!(object_attributes.noteable_kind(), NoteableKind::Commit),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn regression_webhook_event_maps_unknown_kinds_to_unsupported() {
        let event = WebhookEvent::from_json(r#"{"object_kind": "push", "ref": "refs/heads/main"}"#)
            .expect("parse");
        assert_eq!(event, WebhookEvent::Unsupported);
        assert!(event.project().is_none());
    }
}
