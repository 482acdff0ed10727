use tanuki_gitlab::{DiffRefs, MergeRequest, MergeRequestDiff, PushOutcome};

use super::*;

fn reviewable_merge_request() -> MergeRequest {
    MergeRequest {
        iid: 9,
        title: "Add helpers".to_string(),
        source_branch: "feature/helpers".to_string(),
        target_branch: "develop".to_string(),
        web_url: "https://gitlab.example/g/widgets/-/merge_requests/9".to_string(),
        diff_refs: Some(DiffRefs {
            base_sha: "base".to_string(),
            head_sha: "head".to_string(),
            start_sha: "start".to_string(),
        }),
        ..MergeRequest::default()
    }
}

fn helpers_diff() -> MergeRequestDiff {
    MergeRequestDiff {
        old_path: "src/lib.rs".to_string(),
        new_path: "src/lib.rs".to_string(),
        diff: "@@ -1,1 +1,3 @@\n fn a() {}\n+fn b() {}\n+fn c() {}\n".to_string(),
        ..MergeRequestDiff::default()
    }
}

#[tokio::test]
async fn integration_merge_request_fix_resolves_rebase_conflicts_in_the_same_conversation() {
    let harness = harness(vec![
        ExecutionOutcome::succeeded("Fixed the typo.", Some("mr-thread".to_string())),
        ExecutionOutcome::succeeded("Conflicts resolved.", Some("mr-thread".to_string())),
    ]);
    harness.workspace.state().push_outcomes.push_back(PushOutcome {
        success: false,
        rebased: false,
        conflicts: vec!["src/export.rs".to_string()],
        error: Some("rebase produced conflicts".to_string()),
    });

    let outcome = harness
        .processor
        .process_event(&merge_request_note("@claude fix the typo in the header"), None)
        .await;

    assert_eq!(outcome.status, ProcessStatus::Processed);
    let calls = harness.executor.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].options.resume_id(), None);
    assert!(calls[0].prompt.contains("fix the typo in the header"));
    assert!(calls[0].prompt.contains("feature/export"));
    assert_eq!(calls[1].options.resume_id(), Some("mr-thread"));
    assert!(calls[1].prompt.contains("src/export.rs"));

    let workspace = harness.workspace.state();
    assert_eq!(
        workspace.prepared[0].checkout_branch.as_deref(),
        Some("feature/export")
    );
    assert_eq!(workspace.change_pushes, 1);
    assert_eq!(workspace.resolution_pushes, 1);
    drop(workspace);

    let body = harness.api.reply_body();
    assert!(body.contains("resolved automatically"));
    assert!(body.contains("feature/export"));
    let session = harness
        .sessions
        .peek(&SessionKey::new(None, 11, 8))
        .expect("session");
    assert_eq!(session.merge_request_iid, Some(8));
    assert_eq!(session.branch_name.as_deref(), Some("feature/export"));
}

#[tokio::test]
async fn regression_conflict_resolution_stops_after_configured_attempts() {
    let config = ProcessorConfig {
        max_conflict_resolution_attempts: 2,
        ..test_config()
    };
    let harness = harness_with(config, ScriptedExecutor::new(Vec::new()));
    {
        let mut workspace = harness.workspace.state();
        let conflicted = PushOutcome {
            success: false,
            rebased: false,
            conflicts: vec!["src/export.rs".to_string()],
            error: Some("still conflicted".to_string()),
        };
        workspace.push_outcomes.push_back(conflicted.clone());
        workspace.resolution_outcomes.push_back(conflicted.clone());
        workspace.resolution_outcomes.push_back(conflicted);
    }

    let outcome = harness
        .processor
        .process_event(&merge_request_note("@claude fix the typo"), None)
        .await;

    assert_eq!(outcome.status, ProcessStatus::Processed);
    assert_eq!(harness.executor.calls().len(), 3);
    assert_eq!(harness.workspace.state().resolution_pushes, 2);
    let body = harness.api.reply_body();
    assert!(body.contains("could not be resolved automatically after 2 attempt(s)"));
    assert!(body.contains("still conflicted"));
}

#[tokio::test]
async fn integration_opened_merge_request_gets_inline_review() {
    let harness = harness(vec![ExecutionOutcome::succeeded(
        "File: src/lib.rs\nLine: 2\nComment: `b` is never called.\nSeverity: warning\nCategory: maintainability\n---\n\
File: README.md\nLine: 1\nComment: Document the new helpers.\nSeverity: info\nCategory: style\n",
        Some("review-thread".to_string()),
    )]);
    {
        let mut state = harness.api.state();
        state.merge_request = Some(reviewable_merge_request());
        state.diffs = vec![helpers_diff()];
    }

    let outcome = harness
        .processor
        .process_event(&merge_request_event("open", "develop"), None)
        .await;

    assert_eq!(outcome.status, ProcessStatus::Processed);
    let calls = harness.executor.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].provider, ProviderId::Claude);
    assert!(calls[0].prompt.contains("fn b() {}"));
    assert!(calls[0].prompt.contains("Changes: 1 files, +2 / -0 lines"));

    let state = harness.api.state();
    assert_eq!(state.diff_discussions.len(), 1);
    let (inline_body, position) = &state.diff_discussions[0];
    assert!(inline_body.contains("is never called"));
    assert_eq!(position.new_path, "src/lib.rs");
    assert_eq!(position.new_line, Some(2));
    assert_eq!(position.head_sha, "head");
    drop(state);

    let notes = harness.api.notes();
    assert_eq!(notes.len(), 2);
    assert!(notes.iter().all(|note| note.noteable == Noteable::MergeRequest { iid: 9 }));
    assert!(notes[0].body.contains("Inline comments: 1"));
    assert!(notes[1].body.contains("Document the new helpers."));
}

#[tokio::test]
async fn functional_merge_request_without_reviewable_lines_skips_the_assistant() {
    let harness = harness(Vec::new());
    {
        let mut state = harness.api.state();
        state.merge_request = Some(reviewable_merge_request());
        state.diffs = vec![MergeRequestDiff {
            old_path: "src/old.rs".to_string(),
            new_path: "src/old.rs".to_string(),
            diff: "@@ -1,2 +0,0 @@\n-fn old() {}\n-fn older() {}\n".to_string(),
            deleted_file: true,
            ..MergeRequestDiff::default()
        }];
    }

    let outcome = harness
        .processor
        .process_event(&merge_request_event("reopen", "develop"), None)
        .await;

    assert_eq!(outcome.status, ProcessStatus::Processed);
    assert!(harness.executor.calls().is_empty());
    assert!(harness.api.reply_body().contains("no reviewable changes"));
}

#[tokio::test]
async fn functional_review_command_on_merge_request_note_uses_mentioned_provider() {
    let harness = harness(vec![ExecutionOutcome::succeeded(
        "Looks good to me.",
        Some("codex-review".to_string()),
    )]);
    {
        let mut state = harness.api.state();
        state.merge_request = Some(reviewable_merge_request());
        state.diffs = vec![helpers_diff()];
    }

    let outcome = harness
        .processor
        .process_event(&merge_request_note("@codex review security"), None)
        .await;

    assert_eq!(outcome.status, ProcessStatus::Processed);
    let calls = harness.executor.calls();
    assert_eq!(calls[0].provider, ProviderId::Codex);
    assert!(calls[0].prompt.contains("Reviewer focus: security"));
    assert!(harness.api.state().diff_discussions.is_empty());
    let body = harness.api.reply_body();
    assert!(body.contains("No problems found"));
    assert!(body.contains("Looks good to me."));
    assert_eq!(harness.workspace.state().change_pushes, 0);
}
