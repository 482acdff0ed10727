//! Decoding of persisted session records, including the older
//! one-session-per-issue schema.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tanuki_provider::ProviderId;

use crate::model::{ProviderSession, Session, SpecStage};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacySessionRecord {
    issue_key: String,
    session_id: String,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    project_id: u64,
    #[serde(default)]
    issue_iid: u64,
    #[serde(default)]
    discussion_id: Option<String>,
    #[serde(deserialize_with = "flexible_timestamp")]
    created_at: DateTime<Utc>,
    #[serde(deserialize_with = "flexible_timestamp")]
    last_used: DateTime<Utc>,
    #[serde(default)]
    branch_name: Option<String>,
    #[serde(default)]
    base_branch: Option<String>,
    #[serde(default)]
    merge_request_iid: Option<u64>,
    #[serde(default)]
    merge_request_url: Option<String>,
    #[serde(default)]
    owner_id: Option<String>,
    #[serde(default)]
    spec_kit_stage: Option<SpecStage>,
    #[serde(default)]
    spec_kit_documents: BTreeMap<SpecStage, Vec<String>>,
}

impl LegacySessionRecord {
    fn upgrade(self) -> Session {
        let provider = match self.provider.as_deref() {
            None => ProviderId::Claude,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(
                    issue_key = %self.issue_key,
                    provider = raw,
                    "unknown provider in legacy session record, assuming claude"
                );
                ProviderId::Claude
            }),
        };
        let mut provider_sessions = BTreeMap::new();
        provider_sessions.insert(
            provider,
            ProviderSession {
                session_id: self.session_id,
                last_used: self.last_used,
            },
        );
        Session {
            issue_key: self.issue_key,
            project_id: self.project_id,
            issue_iid: self.issue_iid,
            discussion_id: self.discussion_id,
            created_at: self.created_at,
            last_used: self.last_used,
            last_provider: provider,
            provider_sessions,
            branch_name: self.branch_name,
            base_branch: self.base_branch,
            merge_request_iid: self.merge_request_iid,
            merge_request_url: self.merge_request_url,
            owner_id: self.owner_id,
            spec_kit_stage: self.spec_kit_stage,
            spec_kit_documents: self.spec_kit_documents,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum StoredSessionRecord {
    Current(Session),
    Legacy(LegacySessionRecord),
}

/// Sessions decoded from a store payload.
#[derive(Debug, Clone, Default)]
pub(crate) struct DecodedRecords {
    pub(crate) sessions: Vec<Session>,
    pub(crate) upgraded: usize,
    pub(crate) skipped: usize,
}

/// Decodes a JSON array of session records, upgrading legacy entries and
/// skipping records that match neither schema.
pub(crate) fn decode_records(raw: &str) -> serde_json::Result<DecodedRecords> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(DecodedRecords::default());
    }
    let values = serde_json::from_str::<Vec<Value>>(trimmed)?;
    let mut decoded = DecodedRecords::default();
    for value in values {
        match serde_json::from_value::<StoredSessionRecord>(value) {
            Ok(StoredSessionRecord::Current(session)) => decoded.sessions.push(session),
            Ok(StoredSessionRecord::Legacy(record)) => {
                decoded.sessions.push(record.upgrade());
                decoded.upgraded += 1;
            }
            Err(error) => {
                tracing::warn!(error = %error, "skipping unreadable session record");
                decoded.skipped += 1;
            }
        }
    }
    Ok(decoded)
}

fn flexible_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Millis(i64),
        Text(String),
    }

    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Millis(millis) => DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {millis}"))),
        RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(text.trim())
            .map(|value| value.with_timezone(&Utc))
            .map_err(serde::de::Error::custom),
    }
}
