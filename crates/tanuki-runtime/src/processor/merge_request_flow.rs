use std::path::Path;

use anyhow::Result;
use tanuki_core::truncate_for_log;
use tanuki_gitlab::{PrepareOptions, PushOutcome, WebhookEvent};
use tanuki_review::{parse_change_summary, split_change_summary, ParsedChangeSummary};
use tanuki_session::{SessionKey, SessionMeta};

use super::execution::ExecutionPlan;
use super::{reply, workspace_id, EventProcessor, EventTarget, Handling};
use crate::context::EventContext;
use crate::instruction::Instruction;
use crate::prompts;
use crate::render::{self, SuccessDetails};

impl EventProcessor {
    /// Applies requested changes on the merge request's source branch.
    pub(super) async fn run_merge_request_fix(
        &self,
        event: &WebhookEvent,
        target: &EventTarget<'_>,
        instruction: &Instruction,
        key: &SessionKey,
        ctx: &mut EventContext,
    ) -> Result<Handling> {
        let WebhookEvent::Note {
            merge_request: Some(merge_request),
            ..
        } = event
        else {
            return Ok(Handling::Ignored("merge request fix without a merge request note"));
        };
        let source_branch = merge_request.source_branch.clone();
        let target_branch = merge_request.target_branch.clone();
        reply::post_reply(self.api.as_ref(), ctx, &render::progress_body(ctx)).await;

        let session = self.peek_session(key);
        let options = PrepareOptions {
            workspace_id: workspace_id(key),
            checkout_branch: Some(source_branch.clone()),
            base_branch: Some(target_branch.clone()),
        };
        let work_dir = match self
            .workspace
            .prepare_project(target.project, &target_branch, &options)
            .await
        {
            Ok(path) => path,
            Err(error) => {
                let message = format!("failed to prepare the project workspace: {error:#}");
                return Ok(self.report_failure(ctx, &message).await);
            }
        };

        let plan = ExecutionPlan {
            instruction,
            key,
            work_dir: &work_dir,
            system_prompt: prompts::system_prompt(instruction.scenario),
            prompt: prompts::task_prompt(instruction, session.as_ref()),
            meta: SessionMeta {
                project_id: Some(target.project.id),
                issue_iid: Some(target.iid),
                discussion_id: ctx.discussion_id.clone(),
                branch_name: Some(source_branch.clone()),
                base_branch: Some(target_branch),
                merge_request_iid: Some(merge_request.iid),
                merge_request_url: merge_request.url.clone(),
                owner_id: key.owner_id().map(str::to_string),
                spec_kit_stage: None,
            },
            resume_override: None,
        };
        let outcome = self.execute_with_recovery(ctx, &plan).await;
        if !outcome.success {
            return Ok(self.report_failure(ctx, outcome.error_message()).await);
        }

        let (output, raw_summary) = split_change_summary(&outcome.output);
        let summary = raw_summary.map(parse_change_summary);
        let message = summary
            .as_ref()
            .and_then(ParsedChangeSummary::title)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Address review feedback on !{}", merge_request.iid));
        let mut details = SuccessDetails {
            branch: Some(source_branch.clone()),
            ..SuccessDetails::default()
        };
        match self.workspace.commit_and_push_changes(&work_dir, &message).await {
            Ok(push) if push.success => {
                if push.rebased {
                    details.notes.push(format!(
                        "🔀 Rebased onto the latest `{source_branch}` before pushing."
                    ));
                }
            }
            Ok(push) if push.has_conflicts() => {
                let note = self
                    .resolve_push_conflicts(ctx, &plan, &work_dir, outcome.session_id.clone(), push)
                    .await;
                details.notes.push(note);
            }
            Ok(push) => {
                let error = push.error.unwrap_or_else(|| "push rejected".to_string());
                tracing::warn!(
                    session_key = %key,
                    branch = %source_branch,
                    error = %error,
                    "failed to push merge request changes"
                );
                ctx.warn(format!("Pushing to `{source_branch}` failed: {error}"));
            }
            Err(error) => {
                tracing::warn!(
                    session_key = %key,
                    branch = %source_branch,
                    error = %format!("{error:#}"),
                    "failed to push merge request changes"
                );
                ctx.warn(format!("Pushing to `{source_branch}` failed: {error}"));
            }
        }

        let body = render::success_body(ctx, output, summary.as_ref(), &details);
        reply::finish_reply(self.api.as_ref(), ctx, &body).await;
        reply::resolve_discussion_if_needed(self.api.as_ref(), ctx).await;
        Ok(Handling::Processed)
    }

    /// Hands rebase conflicts back to the same conversation, up to the
    /// configured number of attempts. Returns a note describing the result.
    async fn resolve_push_conflicts(
        &self,
        ctx: &mut EventContext,
        task: &ExecutionPlan<'_>,
        work_dir: &Path,
        mut session_id: Option<String>,
        push: PushOutcome,
    ) -> String {
        let max_attempts = self.config.max_conflict_resolution_attempts;
        let mut conflicts = push.conflicts;
        if max_attempts == 0 {
            return format!(
                "⚠️ The push was rejected because of rebase conflicts in {}; changes were not pushed.",
                conflicts.join(", ")
            );
        }
        let mut last_error = push.error;
        for attempt in 1..=max_attempts {
            tracing::info!(
                session_key = %task.key,
                attempt,
                conflicts = conflicts.len(),
                "asking assistant to resolve rebase conflicts"
            );
            let plan = ExecutionPlan {
                instruction: task.instruction,
                key: task.key,
                work_dir,
                system_prompt: task.system_prompt.clone(),
                prompt: prompts::conflict_resolution_prompt(&conflicts, attempt),
                meta: task.meta.clone(),
                resume_override: session_id.clone(),
            };
            let outcome = self.execute_with_recovery(ctx, &plan).await;
            if !outcome.success {
                return format!(
                    "⚠️ Automatic conflict resolution failed; changes were not pushed: {}",
                    truncate_for_log(outcome.error_message())
                );
            }
            session_id = outcome.session_id.or(session_id);
            match self.workspace.push_after_conflict_resolution(work_dir).await {
                Ok(push) if push.success => {
                    return format!(
                        "🔀 Rebase conflicts in {} file(s) were resolved automatically and the changes were pushed.",
                        conflicts.len()
                    );
                }
                Ok(push) => {
                    if !push.conflicts.is_empty() {
                        conflicts = push.conflicts;
                    }
                    last_error = push.error.or(last_error);
                }
                Err(error) => {
                    last_error = Some(format!("{error:#}"));
                    break;
                }
            }
        }
        let detail = last_error
            .map(|error| format!(" Last error: {}", truncate_for_log(&error)))
            .unwrap_or_default();
        format!(
            "⚠️ Rebase conflicts could not be resolved automatically after {max_attempts} attempt(s); changes were not pushed.{detail}"
        )
    }
}
