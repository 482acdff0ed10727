//! Event processor workflows against in-memory GitLab, workspace and
//! assistant fakes.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tanuki_gitlab::{
    CreateMergeRequest, DiffPosition, Discussion, GitlabApi, MergeRequest,
    MergeRequestDiff, MergeRequestUpdate, Note, Noteable, PrepareOptions, Project,
    ProjectWorkspace, PushOutcome, WebhookEvent,
};
use tanuki_provider::{
    AiExecutor, ExecutionCallback, ExecutionContext, ExecutionOutcome, ProviderId,
    SessionOptions,
};
use tanuki_session::{MemorySessionStorage, SessionKey, SessionManager, SessionManagerConfig};
use tempfile::{tempdir, TempDir};

use super::{elapsed_ms, EventProcessor, ProcessStatus};
use crate::config::ProcessorConfig;

mod merge_request_workflows;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NoteKind {
    Comment,
    DiscussionReply,
}

#[derive(Debug, Clone)]
struct PostedNote {
    kind: NoteKind,
    noteable: Noteable,
    body: String,
    edits: usize,
}

#[derive(Default)]
struct FakeGitlabState {
    next_note_id: u64,
    notes: BTreeMap<u64, PostedNote>,
    discussion_reply_attempts: usize,
    resolved: Vec<String>,
    branches: Vec<(String, String)>,
    merge_requests: Vec<CreateMergeRequest>,
    merge_request_updates: Vec<(u64, MergeRequestUpdate)>,
    fail_merge_request_updates: bool,
    diff_discussions: Vec<(String, DiffPosition)>,
    discussions: Vec<Discussion>,
    fail_discussion_replies: bool,
    merge_request: Option<MergeRequest>,
    diffs: Vec<MergeRequestDiff>,
}

#[derive(Default)]
struct FakeGitlab {
    state: Mutex<FakeGitlabState>,
}

impl FakeGitlab {
    fn state(&self) -> std::sync::MutexGuard<'_, FakeGitlabState> {
        self.state.lock().expect("gitlab state")
    }

    fn notes(&self) -> Vec<PostedNote> {
        self.state().notes.values().cloned().collect()
    }

    /// Body of the first note we posted, which carries progress and result.
    fn reply_body(&self) -> String {
        self.notes()
            .first()
            .map(|note| note.body.clone())
            .unwrap_or_default()
    }

    fn insert_note(&self, kind: NoteKind, noteable: Noteable, body: &str) -> Note {
        let mut state = self.state();
        state.next_note_id += 1;
        let id = state.next_note_id;
        state.notes.insert(
            id,
            PostedNote {
                kind,
                noteable,
                body: body.to_string(),
                edits: 0,
            },
        );
        Note {
            id,
            body: body.to_string(),
            ..Note::default()
        }
    }

    fn edit_note(&self, note_id: u64, body: &str) -> Result<()> {
        let mut state = self.state();
        let note = state.notes.get_mut(&note_id).context("unknown note")?;
        note.body = body.to_string();
        note.edits += 1;
        Ok(())
    }
}

#[async_trait]
impl GitlabApi for FakeGitlab {
    async fn get_merge_request(&self, _project_id: u64, _iid: u64) -> Result<MergeRequest> {
        self.state()
            .merge_request
            .clone()
            .context("merge request not found")
    }

    async fn list_discussions(
        &self,
        _project_id: u64,
        _noteable: Noteable,
    ) -> Result<Vec<Discussion>> {
        Ok(self.state().discussions.clone())
    }

    async fn create_comment(&self, _project_id: u64, noteable: Noteable, body: &str) -> Result<Note> {
        Ok(self.insert_note(NoteKind::Comment, noteable, body))
    }

    async fn update_comment(
        &self,
        _project_id: u64,
        _noteable: Noteable,
        note_id: u64,
        body: &str,
    ) -> Result<()> {
        self.edit_note(note_id, body)
    }

    async fn reply_to_discussion(
        &self,
        _project_id: u64,
        noteable: Noteable,
        _discussion_id: &str,
        body: &str,
    ) -> Result<Note> {
        {
            let mut state = self.state();
            state.discussion_reply_attempts += 1;
            if state.fail_discussion_replies {
                bail!("403 Forbidden");
            }
        }
        Ok(self.insert_note(NoteKind::DiscussionReply, noteable, body))
    }

    async fn update_discussion_note(
        &self,
        _project_id: u64,
        _noteable: Noteable,
        _discussion_id: &str,
        note_id: u64,
        body: &str,
    ) -> Result<()> {
        self.edit_note(note_id, body)
    }

    async fn resolve_discussion(
        &self,
        _project_id: u64,
        _noteable: Noteable,
        discussion_id: &str,
    ) -> Result<()> {
        self.state().resolved.push(discussion_id.to_string());
        Ok(())
    }

    async fn create_branch(&self, _project_id: u64, branch: &str, from_ref: &str) -> Result<()> {
        self.state()
            .branches
            .push((branch.to_string(), from_ref.to_string()));
        Ok(())
    }

    async fn create_merge_request(
        &self,
        project_id: u64,
        request: &CreateMergeRequest,
    ) -> Result<MergeRequest> {
        let mut state = self.state();
        state.merge_requests.push(request.clone());
        let iid = 100 + state.merge_requests.len() as u64;
        Ok(MergeRequest {
            iid,
            title: request.title.clone(),
            source_branch: request.source_branch.clone(),
            target_branch: request.target_branch.clone(),
            web_url: format!("https://gitlab.example/p/{project_id}/-/merge_requests/{iid}"),
            ..MergeRequest::default()
        })
    }

    async fn update_merge_request(
        &self,
        _project_id: u64,
        iid: u64,
        update: &MergeRequestUpdate,
    ) -> Result<()> {
        let mut state = self.state();
        if state.fail_merge_request_updates {
            bail!("merge request update rejected");
        }
        state.merge_request_updates.push((iid, update.clone()));
        Ok(())
    }

    async fn get_merge_request_diffs(
        &self,
        _project_id: u64,
        _iid: u64,
    ) -> Result<Vec<MergeRequestDiff>> {
        Ok(self.state().diffs.clone())
    }

    async fn create_diff_discussion(
        &self,
        _project_id: u64,
        _iid: u64,
        body: &str,
        position: &DiffPosition,
    ) -> Result<()> {
        self.state()
            .diff_discussions
            .push((body.to_string(), position.clone()));
        Ok(())
    }
}

#[derive(Default)]
struct WorkspaceState {
    prepared: Vec<PrepareOptions>,
    /// `(message, branch)` of follow-up pushes.
    commits: Vec<(String, String)>,
    new_branches: Vec<String>,
    change_pushes: usize,
    push_outcomes: VecDeque<PushOutcome>,
    resolution_pushes: usize,
    resolution_outcomes: VecDeque<PushOutcome>,
    fail_prepare: bool,
}

struct FakeWorkspace {
    root: TempDir,
    state: Mutex<WorkspaceState>,
}

impl FakeWorkspace {
    fn new() -> Self {
        Self {
            root: tempdir().expect("workspace root"),
            state: Mutex::new(WorkspaceState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, WorkspaceState> {
        self.state.lock().expect("workspace state")
    }
}

#[async_trait]
impl ProjectWorkspace for FakeWorkspace {
    async fn prepare_project(
        &self,
        _project: &Project,
        _base_branch: &str,
        options: &PrepareOptions,
    ) -> Result<PathBuf> {
        let mut state = self.state();
        if state.fail_prepare {
            bail!("clone failed: repository unavailable");
        }
        state.prepared.push(options.clone());
        Ok(self.root.path().join(&options.workspace_id))
    }

    async fn commit_and_push(&self, _path: &Path, message: &str, branch: &str) -> Result<()> {
        self.state()
            .commits
            .push((message.to_string(), branch.to_string()));
        Ok(())
    }

    async fn commit_and_push_changes(&self, _path: &Path, _message: &str) -> Result<PushOutcome> {
        let mut state = self.state();
        state.change_pushes += 1;
        Ok(state.push_outcomes.pop_front().unwrap_or_else(PushOutcome::pushed))
    }

    async fn push_after_conflict_resolution(&self, _path: &Path) -> Result<PushOutcome> {
        let mut state = self.state();
        state.resolution_pushes += 1;
        Ok(state
            .resolution_outcomes
            .pop_front()
            .unwrap_or_else(PushOutcome::pushed))
    }

    async fn switch_to_and_push_branch(
        &self,
        _path: &Path,
        branch: &str,
        _message: &str,
    ) -> Result<()> {
        self.state().new_branches.push(branch.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct RecordedCall {
    prompt: String,
    provider: ProviderId,
    options: SessionOptions,
}

/// Replays queued outcomes; succeeds with a fixed session id once drained.
struct ScriptedExecutor {
    outcomes: Mutex<VecDeque<ExecutionOutcome>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedExecutor {
    fn new(outcomes: Vec<ExecutionOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls").clone()
    }

    fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiExecutor for ScriptedExecutor {
    async fn execute_with_session(
        &self,
        prompt: &str,
        _work_dir: &Path,
        context: &ExecutionContext,
        callback: &dyn ExecutionCallback,
        options: &SessionOptions,
    ) -> ExecutionOutcome {
        self.calls.lock().expect("calls").push(RecordedCall {
            prompt: prompt.to_string(),
            provider: context.provider,
            options: options.clone(),
        });
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        callback.on_progress("Reading the repository".to_string()).await;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        let next = self.outcomes.lock().expect("outcomes").pop_front();
        next.unwrap_or_else(|| {
            ExecutionOutcome::succeeded("Done.", Some("session-default".to_string()))
        })
    }
}

struct Harness {
    processor: EventProcessor,
    api: Arc<FakeGitlab>,
    workspace: Arc<FakeWorkspace>,
    executor: Arc<ScriptedExecutor>,
    sessions: Arc<SessionManager>,
}

fn test_config() -> ProcessorConfig {
    ProcessorConfig {
        dispatch_delay_ms: 0,
        ..ProcessorConfig::default()
    }
}

fn harness_with(config: ProcessorConfig, executor: ScriptedExecutor) -> Harness {
    let api = Arc::new(FakeGitlab::default());
    let workspace = Arc::new(FakeWorkspace::new());
    let executor = Arc::new(executor);
    let sessions = Arc::new(
        SessionManager::new(
            SessionManagerConfig::default(),
            Box::new(MemorySessionStorage::new()),
        )
        .expect("session manager"),
    );
    let processor = EventProcessor::new(
        config,
        api.clone(),
        workspace.clone(),
        executor.clone(),
        Some(sessions.clone()),
    )
    .expect("processor");
    Harness {
        processor,
        api,
        workspace,
        executor,
        sessions,
    }
}

fn harness(outcomes: Vec<ExecutionOutcome>) -> Harness {
    harness_with(test_config(), ScriptedExecutor::new(outcomes))
}

fn event(value: serde_json::Value) -> WebhookEvent {
    WebhookEvent::from_json(&value.to_string()).expect("webhook event")
}

fn project() -> serde_json::Value {
    json!({"id": 11, "name": "widgets", "web_url": "https://gitlab.example/g/widgets", "default_branch": "main"})
}

fn issue_opened(description: &str) -> WebhookEvent {
    event(json!({
        "object_kind": "issue",
        "project": project(),
        "user": {"id": 3, "username": "alice"},
        "object_attributes": {
            "iid": 4,
            "title": "Add export",
            "description": description,
            "action": "open",
            "state": "opened"
        }
    }))
}

fn issue_note(note_id: u64, body: &str, discussion_id: &str) -> WebhookEvent {
    issue_note_on(4, note_id, body, discussion_id)
}

fn issue_note_on(iid: u64, note_id: u64, body: &str, discussion_id: &str) -> WebhookEvent {
    event(json!({
        "object_kind": "note",
        "project": project(),
        "user": {"id": 3, "username": "alice"},
        "object_attributes": {
            "id": note_id,
            "note": body,
            "noteable_type": "Issue",
            "discussion_id": discussion_id
        },
        "issue": {"iid": iid, "title": "Add export", "description": "Export widgets as CSV."}
    }))
}

fn merge_request_note(body: &str) -> WebhookEvent {
    event(json!({
        "object_kind": "note",
        "project": project(),
        "user": {"id": 3, "username": "alice"},
        "object_attributes": {
            "id": 81,
            "note": body,
            "noteable_type": "MergeRequest",
            "discussion_id": "d-8"
        },
        "merge_request": {
            "iid": 8,
            "title": "Export widgets",
            "source_branch": "feature/export",
            "target_branch": "develop",
            "url": "https://gitlab.example/g/widgets/-/merge_requests/8"
        }
    }))
}

fn merge_request_event(action: &str, target_branch: &str) -> WebhookEvent {
    event(json!({
        "object_kind": "merge_request",
        "project": project(),
        "user": {"id": 3, "username": "alice"},
        "object_attributes": {
            "iid": 9,
            "title": "Add helpers",
            "description": "Small helpers.",
            "source_branch": "feature/helpers",
            "target_branch": target_branch,
            "action": action,
            "state": "opened"
        }
    }))
}

fn issue_key() -> SessionKey {
    SessionKey::new(None, 11, 4)
}

fn summary_output(text: &str, title: &str, changes: &[&str]) -> String {
    format!(
        "{text}\n===CHANGE_SUMMARY===\n{}",
        json!({"title": title, "summary": text, "changes": changes})
    )
}

#[test]
fn unit_elapsed_ms_saturates_instead_of_wrapping() {
    assert_eq!(elapsed_ms(Duration::from_millis(1_250)), 1_250);
    assert_eq!(elapsed_ms(Duration::MAX), u64::MAX);
}

#[tokio::test]
async fn regression_self_authored_notes_are_ignored() {
    let harness = harness(Vec::new());
    let body = tanuki_gitlab::format_comment_body("@claude I finished the export.");
    let outcome = harness
        .processor
        .process_event(&issue_note(50, &body, "d-1"), None)
        .await;

    assert_eq!(outcome.status, ProcessStatus::Ignored);
    assert!(harness.executor.calls().is_empty());
    assert!(harness.api.notes().is_empty());
}

#[tokio::test]
async fn functional_non_actionable_events_are_ignored_without_side_effects() {
    let harness = harness(Vec::new());
    let closed = event(json!({
        "object_kind": "issue",
        "project": project(),
        "object_attributes": {"iid": 4, "title": "t", "description": "@claude fix", "action": "close"}
    }));
    let commit_note = event(json!({
        "object_kind": "note",
        "project": project(),
        "object_attributes": {"id": 5, "note": "@claude look", "noteable_type": "Commit"}
    }));
    let push = event(json!({"object_kind": "push", "ref": "refs/heads/main"}));
    let events = [
        closed,
        commit_note,
        push,
        issue_opened("Plain description without a mention."),
        issue_note(51, "just a comment", "d-1"),
        merge_request_event("open", "main"),
        merge_request_event("update", "develop"),
    ];
    for event in &events {
        let outcome = harness.processor.process_event(event, None).await;
        assert_eq!(outcome.status, ProcessStatus::Ignored, "{event:?}");
    }
    assert!(harness.executor.calls().is_empty());
    assert!(harness.api.notes().is_empty());
    assert!(harness.workspace.state().prepared.is_empty());
}

#[tokio::test]
async fn integration_events_for_one_issue_never_overlap() {
    let harness = harness_with(
        test_config(),
        ScriptedExecutor::new(Vec::new()).with_delay(Duration::from_millis(50)),
    );
    let first = issue_note(60, "@claude add a header row", "d-1");
    let second = issue_note(61, "@claude quote every field", "d-2");
    let (a, b) = tokio::join!(
        harness.processor.process_event(&first, None),
        harness.processor.process_event(&second, None)
    );

    assert_eq!(a.status, ProcessStatus::Processed);
    assert_eq!(b.status, ProcessStatus::Processed);
    assert_eq!(harness.executor.calls().len(), 2);
    assert_eq!(harness.executor.max_active(), 1);
}

#[tokio::test]
async fn functional_events_for_different_issues_run_concurrently() {
    let harness = harness_with(
        test_config(),
        ScriptedExecutor::new(Vec::new()).with_delay(Duration::from_millis(50)),
    );
    let first = issue_note_on(4, 60, "@claude add a header row", "d-1");
    let second = issue_note_on(5, 61, "@claude quote every field", "d-2");
    tokio::join!(
        harness.processor.process_event(&first, None),
        harness.processor.process_event(&second, None)
    );

    assert_eq!(harness.executor.max_active(), 2);
}

#[tokio::test]
async fn regression_workspace_failure_is_reported_without_running_the_assistant() {
    let harness = harness(Vec::new());
    harness.workspace.state().fail_prepare = true;
    let outcome = harness
        .processor
        .process_event(&issue_note(70, "@claude add export", "d-1"), None)
        .await;

    assert_eq!(outcome.status, ProcessStatus::Error);
    assert!(outcome
        .error
        .as_deref()
        .is_some_and(|error| error.contains("repository unavailable")));
    assert!(harness.executor.calls().is_empty());
    let body = harness.api.reply_body();
    assert!(body.contains("failed"));
    assert!(body.contains("repository unavailable"));
}
