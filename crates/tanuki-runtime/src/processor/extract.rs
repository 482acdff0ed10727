//! Turns a webhook event into an [`Instruction`], or nothing.

use tanuki_core::truncate_chars;
use tanuki_gitlab::{
    contains_response_marker, Discussion, MergeRequestAttributes, MergeRequestDiff,
    NoteAttributes, NoteableKind, Trigger, WebhookEvent, RESPONSE_MARKER,
};
use tanuki_review::{parse_unified_diff, DiffLineKind};
use tanuki_session::Session;

use super::EventProcessor;
use crate::context::EventContext;
use crate::instruction::{
    is_review_command, render_issue_context, render_merge_request_context, ChangeCounts,
    Instruction, Scenario,
};

const THREAD_NOTE_LIMIT: usize = 20;
const THREAD_NOTE_CHARS: usize = 2_000;

fn issue_instruction(
    trigger: Trigger,
    context: String,
    full_context: Option<String>,
    branch: &str,
) -> Instruction {
    let scenario = match trigger.spec_stage {
        Some(stage) if stage.is_document_stage() => Scenario::SpecDoc,
        _ => Scenario::IssueSession,
    };
    Instruction {
        command: trigger.command,
        context,
        full_context,
        branch: branch.to_string(),
        provider: trigger.provider,
        scenario,
        spec_kit_command: trigger.spec_stage,
    }
}

fn merge_request_instruction(
    trigger: Trigger,
    merge_request: &MergeRequestAttributes,
    counts: Option<ChangeCounts>,
    thread: Option<String>,
) -> Instruction {
    let scenario = if is_review_command(&trigger.command) {
        Scenario::CodeReview
    } else {
        Scenario::MrFix
    };
    let context = render_merge_request_context(merge_request, counts);
    let full_context = thread.map(|thread| format!("{context}\n\n{thread}"));
    Instruction {
        command: trigger.command,
        context,
        full_context,
        branch: merge_request.source_branch.clone(),
        provider: trigger.provider,
        scenario,
        spec_kit_command: None,
    }
}

/// Earlier notes of the triggering thread, oldest first.
fn render_thread(discussion: &Discussion, current_note_id: u64) -> Option<String> {
    let notes = discussion
        .notes
        .iter()
        .filter(|note| note.id != current_note_id && !note.system)
        .collect::<Vec<_>>();
    if notes.is_empty() {
        return None;
    }
    let skip = notes.len().saturating_sub(THREAD_NOTE_LIMIT);
    let mut out = String::from("Previous messages in this thread:");
    for note in notes.into_iter().skip(skip) {
        let author = if contains_response_marker(&note.body) {
            "assistant".to_string()
        } else {
            note.author
                .as_ref()
                .map(|author| format!("@{}", author.username))
                .unwrap_or_else(|| "unknown".to_string())
        };
        let body = note.body.replace(RESPONSE_MARKER, "");
        out.push_str(&format!(
            "\n\n**{author}**: {}",
            truncate_chars(body.trim(), THREAD_NOTE_CHARS)
        ));
    }
    Some(out)
}

fn change_counts(diffs: &[MergeRequestDiff]) -> ChangeCounts {
    let mut counts = ChangeCounts {
        files: diffs.len(),
        ..ChangeCounts::default()
    };
    for diff in diffs {
        for line in parse_unified_diff(&diff.diff) {
            match line.kind {
                DiffLineKind::Add => counts.additions += 1,
                DiffLineKind::Delete => counts.deletions += 1,
                DiffLineKind::Context => {}
            }
        }
    }
    counts
}

impl EventProcessor {
    pub(super) async fn extract_instruction(
        &self,
        event: &WebhookEvent,
        ctx: &mut EventContext,
        active_session: Option<&Session>,
    ) -> Option<Instruction> {
        match event {
            WebhookEvent::Issue {
                project,
                object_attributes: issue,
                ..
            } => {
                let description = issue.description.as_deref().unwrap_or_default();
                let Some(trigger) = self.triggers.parse(description) else {
                    return None;
                };
                let context =
                    render_issue_context(issue.iid, &issue.title, issue.description.as_deref());
                Some(issue_instruction(
                    trigger,
                    context,
                    None,
                    project.default_branch_or_main(),
                ))
            }
            WebhookEvent::MergeRequest {
                project,
                object_attributes: merge_request,
                ..
            } => {
                if merge_request.target_branch != self.config.code_review_target_branch {
                    return None;
                }
                let description = merge_request.description.as_deref().unwrap_or_default();
                let provider = self
                    .triggers
                    .parse(description)
                    .map(|trigger| trigger.provider)
                    .unwrap_or(self.default_provider);
                let counts = self
                    .merge_request_diffs(ctx, project.id, merge_request.iid)
                    .await
                    .map(|diffs| change_counts(&diffs));
                let trigger = Trigger {
                    provider,
                    command: "review".to_string(),
                    spec_stage: None,
                };
                Some(merge_request_instruction(
                    trigger,
                    merge_request,
                    counts,
                    None,
                ))
            }
            WebhookEvent::Note {
                project,
                object_attributes: note,
                issue,
                merge_request,
                ..
            } => match note.noteable_kind() {
                NoteableKind::Issue => {
                    let Some(issue) = issue else {
                        return None;
                    };
                    let trigger = match self.triggers.parse(&note.note) {
                        Some(trigger) => trigger,
                        // Follow-ups on an issue with a live conversation need no mention.
                        None => match active_session {
                            Some(session) => Trigger {
                                provider: session.last_provider,
                                command: note.note.trim().to_string(),
                                spec_stage: None,
                            },
                            None => return None,
                        },
                    };
                    let context =
                        render_issue_context(issue.iid, &issue.title, issue.description.as_deref());
                    let thread = self.thread_context(ctx, note).await;
                    let full_context = thread.map(|thread| format!("{context}\n\n{thread}"));
                    Some(issue_instruction(
                        trigger,
                        context,
                        full_context,
                        project.default_branch_or_main(),
                    ))
                }
                NoteableKind::MergeRequest => {
                    let (Some(merge_request), Some(trigger)) =
                        (merge_request, self.triggers.parse(&note.note))
                    else {
                        return None;
                    };
                    let counts = if is_review_command(&trigger.command) {
                        self.merge_request_diffs(ctx, project.id, merge_request.iid)
                            .await
                            .map(|diffs| change_counts(&diffs))
                    } else {
                        None
                    };
                    let thread = self.thread_context(ctx, note).await;
                    Some(merge_request_instruction(
                        trigger,
                        merge_request,
                        counts,
                        thread,
                    ))
                }
                NoteableKind::Commit | NoteableKind::Snippet | NoteableKind::Unknown => None,
            },
            WebhookEvent::Unsupported => None,
        }
    }

    /// Fetches the triggering discussion once per event. Failures only cost
    /// the history; the event is still handled.
    async fn thread_context(&self, ctx: &mut EventContext, note: &NoteAttributes) -> Option<String> {
        if ctx.thread_context.is_some() {
            return ctx.thread_context.clone();
        }
        let discussion_id = ctx.discussion_id.clone()?;
        let noteable = ctx.noteable?;
        let discussions = match self.api.list_discussions(ctx.project_id, noteable).await {
            Ok(discussions) => discussions,
            Err(error) => {
                tracing::warn!(
                    project_id = ctx.project_id,
                    discussion_id = %discussion_id,
                    error = %format!("{error:#}"),
                    "failed to fetch discussion history"
                );
                return None;
            }
        };
        let discussion = discussions
            .iter()
            .find(|discussion| discussion.id == discussion_id)?;
        ctx.discussion_resolvable = discussion.is_resolvable();
        ctx.thread_context = render_thread(discussion, note.id);
        ctx.thread_context.clone()
    }

    /// Merge request diffs, fetched once per event and cached on the context.
    pub(super) async fn merge_request_diffs(
        &self,
        ctx: &mut EventContext,
        project_id: u64,
        iid: u64,
    ) -> Option<Vec<MergeRequestDiff>> {
        if let Some(diffs) = ctx.merge_request_diffs.as_ref() {
            return Some(diffs.clone());
        }
        match self.api.get_merge_request_diffs(project_id, iid).await {
            Ok(diffs) => {
                ctx.merge_request_diffs = Some(diffs.clone());
                Some(diffs)
            }
            Err(error) => {
                tracing::warn!(
                    project_id,
                    iid,
                    error = %format!("{error:#}"),
                    "failed to fetch merge request diffs"
                );
                None
            }
        }
    }
}
