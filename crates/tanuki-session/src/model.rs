use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tanuki_provider::ProviderId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
/// Stable identity of one conversation: `owner?:project:issue`.
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(owner_id: Option<&str>, project_id: u64, issue_iid: u64) -> Self {
        match owner_id.map(str::trim).filter(|owner| !owner.is_empty()) {
            Some(owner) => Self(format!("{owner}:{project_id}:{issue_iid}")),
            None => Self(format!("{project_id}:{issue_iid}")),
        }
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Project id and issue iid encoded in the trailing key segments.
    pub fn ids(&self) -> Option<(u64, u64)> {
        let mut segments = self.0.rsplit(':');
        let issue_iid = segments.next()?.parse().ok()?;
        let project_id = segments.next()?.parse().ok()?;
        Some((project_id, issue_iid))
    }

    pub fn owner_id(&self) -> Option<&str> {
        let mut parts = self.0.rsplitn(3, ':');
        parts.next()?;
        parts.next()?;
        parts.next().filter(|owner| !owner.is_empty())
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Spec-kit document workflow stages.
pub enum SpecStage {
    Specify,
    Clarify,
    Plan,
    Tasks,
    Implement,
}

impl SpecStage {
    pub const ALL: [SpecStage; 5] = [
        SpecStage::Specify,
        SpecStage::Clarify,
        SpecStage::Plan,
        SpecStage::Tasks,
        SpecStage::Implement,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Specify => "specify",
            Self::Clarify => "clarify",
            Self::Plan => "plan",
            Self::Tasks => "tasks",
            Self::Implement => "implement",
        }
    }

    /// Stages that only produce documents, never code.
    pub fn is_document_stage(self) -> bool {
        !matches!(self, Self::Implement)
    }
}

impl fmt::Display for SpecStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpecStage {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().trim_start_matches('/').to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| format!("unknown spec stage '{}'", raw.trim()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Opaque conversation handle returned by one provider CLI.
pub struct ProviderSession {
    pub session_id: String,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub issue_key: String,
    pub project_id: u64,
    pub issue_iid: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discussion_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub last_provider: ProviderId,
    pub provider_sessions: BTreeMap<ProviderId, ProviderSession>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_request_iid: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_request_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_kit_stage: Option<SpecStage>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub spec_kit_documents: BTreeMap<SpecStage, Vec<String>>,
}

impl Session {
    pub(crate) fn new(
        key: &SessionKey,
        meta: &SessionMeta,
        provider: ProviderId,
        now: DateTime<Utc>,
    ) -> Self {
        let (key_project, key_iid) = key.ids().unwrap_or_default();
        Self {
            issue_key: key.as_str().to_string(),
            project_id: meta.project_id.unwrap_or(key_project),
            issue_iid: meta.issue_iid.unwrap_or(key_iid),
            discussion_id: None,
            created_at: now,
            last_used: now,
            last_provider: provider,
            provider_sessions: BTreeMap::new(),
            branch_name: None,
            base_branch: None,
            merge_request_iid: None,
            merge_request_url: None,
            owner_id: key.owner_id().map(str::to_string),
            spec_kit_stage: None,
            spec_kit_documents: BTreeMap::new(),
        }
    }

    pub fn provider_session(&self, provider: ProviderId) -> Option<&ProviderSession> {
        self.provider_sessions.get(&provider)
    }

    /// Re-derives `last_used` / `last_provider` from the most recently touched
    /// provider entry. Returns false when no provider entry is left.
    pub(crate) fn refresh_derived(&mut self) -> bool {
        let Some((provider, entry)) = self
            .provider_sessions
            .iter()
            .max_by_key(|(_, entry)| entry.last_used)
        else {
            return false;
        };
        self.last_provider = *provider;
        self.last_used = entry.last_used;
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Fields merged into a session by `set_session`; `None` keeps the stored value.
pub struct SessionMeta {
    pub project_id: Option<u64>,
    pub issue_iid: Option<u64>,
    pub discussion_id: Option<String>,
    pub branch_name: Option<String>,
    pub base_branch: Option<String>,
    pub merge_request_iid: Option<u64>,
    pub merge_request_url: Option<String>,
    pub owner_id: Option<String>,
    pub spec_kit_stage: Option<SpecStage>,
}

impl SessionMeta {
    pub(crate) fn apply(&self, session: &mut Session) {
        fn merge<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                target.clone_from(value);
            }
        }
        if let Some(project_id) = self.project_id {
            session.project_id = project_id;
        }
        if let Some(issue_iid) = self.issue_iid {
            session.issue_iid = issue_iid;
        }
        merge(&mut session.discussion_id, &self.discussion_id);
        merge(&mut session.branch_name, &self.branch_name);
        merge(&mut session.base_branch, &self.base_branch);
        merge(&mut session.merge_request_iid, &self.merge_request_iid);
        merge(&mut session.merge_request_url, &self.merge_request_url);
        merge(&mut session.owner_id, &self.owner_id);
        merge(&mut session.spec_kit_stage, &self.spec_kit_stage);
    }
}
