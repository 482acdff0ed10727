//! Logging stand-ins for GitLab and the git workspace, used by `tanuki replay`.
//!
//! Nothing here talks to the network: every write is logged and recorded so
//! the replay can print the comments the processor would have posted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tanuki_gitlab::{
    CreateMergeRequest, DiffPosition, DiffRefs, Discussion, GitlabApi, MergeRequest,
    MergeRequestDiff, MergeRequestUpdate, Note, Noteable, PrepareOptions, Project,
    ProjectWorkspace, PushOutcome, Tenant, WebhookEvent,
};
use tanuki_runtime::{EventProcessor, ProcessorConfig};

use crate::bootstrap_helpers::build_executor;
use crate::cli_args::ReplayArgs;
use crate::session_commands::open_session_manager;

const DRY_RUN_URL: &str = "dry-run://gitlab";

/// GitLab API that records writes instead of performing them.
pub(crate) struct DryRunGitlab {
    merge_request: Option<MergeRequest>,
    diffs: Vec<MergeRequestDiff>,
    next_note_id: AtomicU64,
    notes: Mutex<BTreeMap<u64, String>>,
}

impl DryRunGitlab {
    /// Serves the merge request described by `event` (if any) with `diffs`.
    pub(crate) fn new(event: &WebhookEvent, diffs: Vec<MergeRequestDiff>) -> Self {
        let attributes = match event {
            WebhookEvent::MergeRequest {
                object_attributes, ..
            } => Some(object_attributes),
            WebhookEvent::Note {
                merge_request: Some(merge_request),
                ..
            } => Some(merge_request),
            _ => None,
        };
        let merge_request = attributes.map(|attributes| MergeRequest {
            iid: attributes.iid,
            title: attributes.title.clone(),
            description: attributes.description.clone(),
            source_branch: attributes.source_branch.clone(),
            target_branch: attributes.target_branch.clone(),
            state: attributes.state.clone(),
            web_url: attributes.url.clone().unwrap_or_default(),
            diff_refs: Some(DiffRefs {
                base_sha: "dry-run-base".to_string(),
                head_sha: "dry-run-head".to_string(),
                start_sha: "dry-run-start".to_string(),
            }),
            changes_count: Some(diffs.len().to_string()),
        });
        Self {
            merge_request,
            diffs,
            next_note_id: AtomicU64::new(1),
            notes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Latest body of every note written during the replay, by note id.
    pub(crate) fn notes(&self) -> Vec<(u64, String)> {
        self.notes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, body)| (*id, body.clone()))
            .collect()
    }

    fn record_note(&self, body: &str) -> Note {
        let id = self.next_note_id.fetch_add(1, Ordering::SeqCst);
        self.notes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, body.to_string());
        Note {
            id,
            body: body.to_string(),
            ..Note::default()
        }
    }

    fn record_edit(&self, note_id: u64, body: &str) -> Result<()> {
        let mut notes = self.notes.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(existing) = notes.get_mut(&note_id) else {
            bail!("note {note_id} does not exist");
        };
        *existing = body.to_string();
        Ok(())
    }
}

#[async_trait]
impl GitlabApi for DryRunGitlab {
    async fn get_merge_request(&self, project_id: u64, iid: u64) -> Result<MergeRequest> {
        tracing::info!(project_id, iid, "dry-run: get merge request");
        self.merge_request
            .clone()
            .filter(|merge_request| merge_request.iid == iid)
            .with_context(|| format!("merge request !{iid} is not part of the replayed event"))
    }

    async fn list_discussions(
        &self,
        project_id: u64,
        noteable: Noteable,
    ) -> Result<Vec<Discussion>> {
        tracing::info!(
            project_id,
            target = noteable.kind_label(),
            iid = noteable.iid(),
            "dry-run: list discussions"
        );
        Ok(Vec::new())
    }

    async fn create_comment(
        &self,
        project_id: u64,
        noteable: Noteable,
        body: &str,
    ) -> Result<Note> {
        let note = self.record_note(body);
        tracing::info!(
            project_id,
            target = noteable.kind_label(),
            iid = noteable.iid(),
            note_id = note.id,
            "dry-run: create comment"
        );
        Ok(note)
    }

    async fn update_comment(
        &self,
        project_id: u64,
        noteable: Noteable,
        note_id: u64,
        body: &str,
    ) -> Result<()> {
        tracing::info!(project_id, iid = noteable.iid(), note_id, "dry-run: update comment");
        self.record_edit(note_id, body)
    }

    async fn reply_to_discussion(
        &self,
        project_id: u64,
        noteable: Noteable,
        discussion_id: &str,
        body: &str,
    ) -> Result<Note> {
        let note = self.record_note(body);
        tracing::info!(
            project_id,
            iid = noteable.iid(),
            discussion_id,
            note_id = note.id,
            "dry-run: reply to discussion"
        );
        Ok(note)
    }

    async fn update_discussion_note(
        &self,
        project_id: u64,
        noteable: Noteable,
        discussion_id: &str,
        note_id: u64,
        body: &str,
    ) -> Result<()> {
        tracing::info!(
            project_id,
            iid = noteable.iid(),
            discussion_id,
            note_id,
            "dry-run: update discussion note"
        );
        self.record_edit(note_id, body)
    }

    async fn resolve_discussion(
        &self,
        project_id: u64,
        noteable: Noteable,
        discussion_id: &str,
    ) -> Result<()> {
        tracing::info!(
            project_id,
            iid = noteable.iid(),
            discussion_id,
            "dry-run: resolve discussion"
        );
        Ok(())
    }

    async fn create_branch(&self, project_id: u64, branch: &str, from_ref: &str) -> Result<()> {
        tracing::info!(project_id, branch, from_ref, "dry-run: create branch");
        Ok(())
    }

    async fn create_merge_request(
        &self,
        project_id: u64,
        request: &CreateMergeRequest,
    ) -> Result<MergeRequest> {
        tracing::info!(
            project_id,
            source_branch = %request.source_branch,
            target_branch = %request.target_branch,
            title = %request.title,
            "dry-run: create merge request"
        );
        Ok(MergeRequest {
            iid: 1,
            title: request.title.clone(),
            description: Some(request.description.clone()),
            source_branch: request.source_branch.clone(),
            target_branch: request.target_branch.clone(),
            state: "opened".to_string(),
            web_url: DRY_RUN_URL.to_string(),
            ..MergeRequest::default()
        })
    }

    async fn update_merge_request(
        &self,
        project_id: u64,
        iid: u64,
        update: &MergeRequestUpdate,
    ) -> Result<()> {
        tracing::info!(project_id, iid, title = ?update.title, "dry-run: update merge request");
        Ok(())
    }

    async fn get_merge_request_diffs(
        &self,
        project_id: u64,
        iid: u64,
    ) -> Result<Vec<MergeRequestDiff>> {
        tracing::info!(
            project_id,
            iid,
            files = self.diffs.len(),
            "dry-run: get merge request diffs"
        );
        Ok(self.diffs.clone())
    }

    async fn create_diff_discussion(
        &self,
        project_id: u64,
        iid: u64,
        body: &str,
        position: &DiffPosition,
    ) -> Result<()> {
        tracing::info!(
            project_id,
            iid,
            path = %position.new_path,
            new_line = ?position.new_line,
            old_line = ?position.old_line,
            "dry-run: create diff discussion"
        );
        self.record_note(body);
        Ok(())
    }
}

/// Workspace that runs the assistant in an existing checkout and never
/// commits or pushes.
pub(crate) struct DryRunWorkspace {
    work_dir: PathBuf,
}

impl DryRunWorkspace {
    pub(crate) fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }
}

#[async_trait]
impl ProjectWorkspace for DryRunWorkspace {
    async fn prepare_project(
        &self,
        project: &Project,
        base_branch: &str,
        options: &PrepareOptions,
    ) -> Result<PathBuf> {
        if !self.work_dir.is_dir() {
            bail!("workdir {} is not a directory", self.work_dir.display());
        }
        tracing::info!(
            project_id = project.id,
            base_branch,
            checkout_branch = ?options.checkout_branch,
            workspace_id = %options.workspace_id,
            "dry-run: prepare project"
        );
        Ok(self.work_dir.clone())
    }

    async fn commit_and_push(&self, path: &Path, message: &str, branch: &str) -> Result<()> {
        tracing::info!(path = %path.display(), branch, message, "dry-run: commit and push");
        Ok(())
    }

    async fn commit_and_push_changes(&self, path: &Path, message: &str) -> Result<PushOutcome> {
        tracing::info!(path = %path.display(), message, "dry-run: commit and push changes");
        Ok(PushOutcome::pushed())
    }

    async fn push_after_conflict_resolution(&self, path: &Path) -> Result<PushOutcome> {
        tracing::info!(path = %path.display(), "dry-run: push after conflict resolution");
        Ok(PushOutcome::pushed())
    }

    async fn switch_to_and_push_branch(
        &self,
        path: &Path,
        branch: &str,
        message: &str,
    ) -> Result<()> {
        tracing::info!(
            path = %path.display(),
            branch,
            message,
            "dry-run: switch to and push branch"
        );
        Ok(())
    }
}

/// Replays one webhook payload and renders the outcome plus every comment
/// the processor wrote.
pub(crate) async fn replay(config: ProcessorConfig, args: &ReplayArgs) -> Result<String> {
    let raw = std::fs::read_to_string(&args.event)
        .with_context(|| format!("failed to read event {}", args.event.display()))?;
    let event = WebhookEvent::from_json(&raw)
        .with_context(|| format!("failed to parse webhook event {}", args.event.display()))?;
    let diffs = match args.diffs.as_deref() {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read diffs {}", path.display()))?;
            serde_json::from_str::<Vec<MergeRequestDiff>>(&raw)
                .with_context(|| format!("failed to parse diffs {}", path.display()))?
        }
        None => Vec::new(),
    };

    let api = Arc::new(DryRunGitlab::new(&event, diffs));
    let workspace = Arc::new(DryRunWorkspace::new(args.workdir.clone()));
    let executor = Arc::new(build_executor(&config));
    let sessions = if config.sessions_enabled {
        Some(Arc::new(open_session_manager(&config)?))
    } else {
        None
    };
    let processor = EventProcessor::new(config, api.clone(), workspace, executor, sessions)?;
    let tenant = args.owner.as_deref().map(Tenant::owned_by);
    let outcome = processor.process_event(&event, tenant.as_ref()).await;

    let mut out = serde_json::to_string_pretty(&outcome)?;
    for (note_id, body) in api.notes() {
        out.push_str(&format!("\n\n--- note {note_id} ---\n{body}"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use serde_json::json;
    use tanuki_runtime::{ProcessorConfig, ProviderConfig};
    use tempfile::tempdir;

    use super::replay;
    use crate::cli_args::ReplayArgs;

    #[cfg(unix)]
    fn write_mock_claude(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("mock-claude");
        let body = r#"#!/bin/sh
if [ "${1:-}" = "--version" ]; then
  echo "mock 1.0.0"
  exit 0
fi
printf '%s\n' '{"type":"system","subtype":"init","session_id":"replay-1"}'
printf '%s\n' '{"type":"result","subtype":"success","is_error":false,"result":"Wrote README.md","session_id":"replay-1"}'
"#;
        std::fs::write(&script, body).expect("write script");
        let mut perms = std::fs::metadata(&script)
            .expect("script metadata")
            .permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).expect("chmod script");
        script
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn integration_replay_runs_issue_event_against_mock_cli() {
        let dir = tempdir().expect("tempdir");
        let checkout = dir.path().join("checkout");
        std::fs::create_dir_all(&checkout).expect("checkout dir");
        let claude = write_mock_claude(dir.path());
        let event_path = dir.path().join("event.json");
        std::fs::write(
            &event_path,
            json!({
                "object_kind": "issue",
                "project": {"id": 11, "default_branch": "main"},
                "object_attributes": {
                    "iid": 4,
                    "title": "Docs",
                    "description": "@claude write a README",
                    "action": "open"
                }
            })
            .to_string(),
        )
        .expect("write event");
        let config = ProcessorConfig {
            dispatch_delay_ms: 0,
            session_store_path: dir.path().join("sessions.json"),
            providers: [(
                "claude".to_string(),
                ProviderConfig {
                    binary: Some(claude.display().to_string()),
                    ..ProviderConfig::default()
                },
            )]
            .into_iter()
            .collect(),
            ..ProcessorConfig::default()
        };
        let args = ReplayArgs {
            event: event_path,
            workdir: checkout,
            diffs: None,
            owner: None,
        };

        let output = replay(config, &args).await.expect("replay");

        assert!(output.contains("\"status\": \"processed\""), "{output}");
        assert!(output.contains("--- note 1 ---"));
        assert!(output.contains("Wrote README.md"));
        let store = std::fs::read_to_string(dir.path().join("sessions.json")).expect("store");
        assert!(store.contains("replay-1"));
    }

    #[tokio::test]
    async fn regression_replay_rejects_unparsable_events() {
        let dir = tempdir().expect("tempdir");
        let event_path = dir.path().join("event.json");
        std::fs::write(&event_path, "not json").expect("write event");
        let args = ReplayArgs {
            event: event_path,
            workdir: dir.path().to_path_buf(),
            diffs: None,
            owner: None,
        };

        let error = replay(ProcessorConfig::default(), &args)
            .await
            .expect_err("invalid event");
        assert!(format!("{error:#}").contains("failed to parse webhook event"));
    }
}
