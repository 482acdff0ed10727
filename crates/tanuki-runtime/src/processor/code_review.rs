use anyhow::Result;
use tanuki_gitlab::PrepareOptions;
use tanuki_review::{
    parse_ai_review_response, parse_change_summary, parse_merge_request_diffs,
    perform_inline_review, render_reviewable_excerpt, split_change_summary,
};
use tanuki_session::{SessionKey, SessionMeta};

use super::execution::ExecutionPlan;
use super::{reply, workspace_id, EventProcessor, EventTarget, Handling};
use crate::context::EventContext;
use crate::instruction::Instruction;
use crate::prompts;
use crate::render;

/// Changed lines included in one review prompt.
const MAX_REVIEW_LINES: usize = 1_500;

impl EventProcessor {
    pub(super) async fn run_code_review(
        &self,
        target: &EventTarget<'_>,
        instruction: &Instruction,
        key: &SessionKey,
        ctx: &mut EventContext,
    ) -> Result<Handling> {
        let project = target.project;
        reply::post_reply(self.api.as_ref(), ctx, &render::progress_body(ctx)).await;

        let merge_request = match self.api.get_merge_request(project.id, target.iid).await {
            Ok(merge_request) => merge_request,
            Err(error) => {
                let message = format!("failed to load merge request !{}: {error:#}", target.iid);
                return Ok(self.report_failure(ctx, &message).await);
            }
        };
        let Some(diffs) = self.merge_request_diffs(ctx, project.id, target.iid).await else {
            let message = format!("failed to load the changes of merge request !{}", target.iid);
            return Ok(self.report_failure(ctx, &message).await);
        };
        let parsed = parse_merge_request_diffs(&diffs, &merge_request);
        let excerpt = render_reviewable_excerpt(&parsed, MAX_REVIEW_LINES);
        if excerpt.trim().is_empty() {
            tracing::info!(
                project_id = project.id,
                merge_request_iid = target.iid,
                "merge request has no reviewable lines"
            );
            let body = render::nothing_to_review_body(ctx);
            reply::finish_reply(self.api.as_ref(), ctx, &body).await;
            return Ok(Handling::Processed);
        }

        let options = PrepareOptions {
            workspace_id: workspace_id(key),
            checkout_branch: Some(merge_request.source_branch.clone()),
            base_branch: Some(merge_request.target_branch.clone()),
        };
        let work_dir = match self
            .workspace
            .prepare_project(project, &merge_request.target_branch, &options)
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
            prompt: prompts::review_prompt(instruction, &excerpt),
            meta: SessionMeta {
                project_id: Some(project.id),
                issue_iid: Some(target.iid),
                discussion_id: ctx.discussion_id.clone(),
                branch_name: Some(merge_request.source_branch.clone()),
                base_branch: Some(merge_request.target_branch.clone()),
                merge_request_iid: Some(merge_request.iid),
                merge_request_url: Some(merge_request.web_url.clone())
                    .filter(|url| !url.is_empty()),
                owner_id: key.owner_id().map(str::to_string),
                spec_kit_stage: None,
            },
            resume_override: None,
        };
        let outcome = self.execute_with_recovery(ctx, &plan).await;
        if !outcome.success {
            return Ok(self.report_failure(ctx, outcome.error_message()).await);
        }

        let (review_text, raw_summary) = split_change_summary(&outcome.output);
        let summary = raw_summary.map(parse_change_summary);
        let comments = parse_ai_review_response(review_text);
        let report = perform_inline_review(
            self.api.as_ref(),
            project.id,
            merge_request.iid,
            &parsed,
            &comments,
            self.config.review_snap_window,
        )
        .await;
        tracing::info!(
            project_id = project.id,
            merge_request_iid = merge_request.iid,
            comments = comments.len(),
            placed = report.placed,
            rerouted = report.rerouted.len(),
            failed = report.failed.len(),
            "code review posted"
        );
        // Free-form text only matters when the assistant produced no blocks.
        let overview = if comments.is_empty() { review_text } else { "" };
        let body = render::review_body(ctx, &report, overview, summary.as_ref());
        reply::finish_reply(self.api.as_ref(), ctx, &body).await;
        reply::resolve_discussion_if_needed(self.api.as_ref(), ctx).await;
        Ok(Handling::Processed)
    }
}
