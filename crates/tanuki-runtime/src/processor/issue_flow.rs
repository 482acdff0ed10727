use std::path::Path;

use anyhow::Result;
use tanuki_gitlab::{CreateMergeRequest, MergeRequest, MergeRequestUpdate, PrepareOptions, Project};
use tanuki_review::{parse_change_summary, split_change_summary, ParsedChangeSummary};
use tanuki_session::{SessionKey, SessionMeta};

use super::execution::ExecutionPlan;
use super::{reply, workspace_id, EventProcessor, EventTarget, Handling};
use crate::context::EventContext;
use crate::instruction::Instruction;
use crate::prompts;
use crate::render::{self, SuccessDetails};

fn commit_message(
    instruction: &Instruction,
    summary: Option<&ParsedChangeSummary>,
    iid: u64,
) -> String {
    let title = summary
        .and_then(ParsedChangeSummary::title)
        .map(str::to_string)
        .unwrap_or_else(|| match instruction.spec_kit_command {
            Some(stage) => format!("Spec {stage} for issue #{iid}"),
            None => format!("Address issue #{iid}"),
        });
    format!("{title}\n\nRefs #{iid}")
}

fn merge_request_description(
    output: &str,
    summary: Option<&ParsedChangeSummary>,
    iid: u64,
) -> String {
    let mut description = match summary {
        Some(ParsedChangeSummary::Structured(structured)) if !structured.summary.trim().is_empty() => {
            structured.summary.trim().to_string()
        }
        _ => output.trim().to_string(),
    };
    if let Some(summary) = summary.filter(|summary| !summary.changes().is_empty()) {
        description.push_str("\n\n## Changes\n");
        for change in summary.changes() {
            description.push_str(&format!("- {change}\n"));
        }
    }
    description.push_str(&format!("\n\nCloses #{iid}"));
    description.trim_start().to_string()
}

impl EventProcessor {
    /// Issue-session and spec-document work: the first success opens a branch
    /// and merge request, later ones push to that branch.
    pub(super) async fn run_issue_flow(
        &self,
        target: &EventTarget<'_>,
        instruction: &Instruction,
        key: &SessionKey,
        owner_id: Option<&str>,
        ctx: &mut EventContext,
    ) -> Result<Handling> {
        let project = target.project;
        reply::post_reply(self.api.as_ref(), ctx, &render::progress_body(ctx)).await;

        let session = self.peek_session(key);
        let existing_branch = session
            .as_ref()
            .and_then(|session| session.branch_name.clone());
        let base_branch = session
            .as_ref()
            .and_then(|session| session.base_branch.clone())
            .unwrap_or_else(|| instruction.branch.clone());
        let options = PrepareOptions {
            workspace_id: workspace_id(key),
            checkout_branch: existing_branch.clone(),
            base_branch: Some(base_branch.clone()),
        };
        let work_dir = match self
            .workspace
            .prepare_project(project, &base_branch, &options)
            .await
        {
            Ok(path) => path,
            Err(error) => {
                let message = format!("failed to prepare the project workspace: {error:#}");
                return Ok(self.report_failure(ctx, &message).await);
            }
        };

        let mut meta = SessionMeta {
            project_id: Some(project.id),
            issue_iid: Some(target.iid),
            discussion_id: ctx.discussion_id.clone(),
            owner_id: owner_id.map(str::to_string),
            spec_kit_stage: instruction.spec_kit_command,
            ..SessionMeta::default()
        };
        let plan = ExecutionPlan {
            instruction,
            key,
            work_dir: &work_dir,
            system_prompt: prompts::system_prompt(instruction.scenario),
            prompt: prompts::task_prompt(instruction, session.as_ref()),
            meta: meta.clone(),
            resume_override: None,
        };
        let outcome = self.execute_with_recovery(ctx, &plan).await;
        if !outcome.success {
            return Ok(self.report_failure(ctx, outcome.error_message()).await);
        }

        let (output, raw_summary) = split_change_summary(&outcome.output);
        let summary = raw_summary.map(parse_change_summary);
        let message = commit_message(instruction, summary.as_ref(), target.iid);
        let mut details = SuccessDetails::default();

        match existing_branch {
            Some(branch) => {
                let pushed = match self
                    .workspace
                    .commit_and_push(&work_dir, &message, &branch)
                    .await
                {
                    Ok(()) => true,
                    Err(error) => {
                        tracing::warn!(
                            session_key = %key,
                            branch = %branch,
                            error = %format!("{error:#}"),
                            "failed to push follow-up changes"
                        );
                        ctx.warn(format!("Pushing to `{branch}` failed: {error}"));
                        false
                    }
                };
                if let Some(session) = session.as_ref() {
                    if let Some(iid) = session.merge_request_iid {
                        if pushed {
                            if let Some(summary) = summary.as_ref() {
                                let update = MergeRequestUpdate {
                                    title: summary.title().map(str::to_string),
                                    description: Some(merge_request_description(
                                        output,
                                        Some(summary),
                                        target.iid,
                                    )),
                                };
                                self.refresh_merge_request(ctx, project.id, iid, &update)
                                    .await;
                            }
                        }
                        let url = session.merge_request_url.clone().unwrap_or_default();
                        details.merge_request = Some((iid, url));
                    }
                }
                details.branch = Some(branch);
            }
            None if instruction.scenario.creates_merge_request() => {
                let branch = instruction
                    .scenario
                    .branch_name(instruction.provider, key.as_str());
                let title = summary
                    .as_ref()
                    .and_then(ParsedChangeSummary::title)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Resolve \"{}\"", target.title.trim()));
                let request = CreateMergeRequest {
                    source_branch: branch.clone(),
                    target_branch: base_branch.clone(),
                    title,
                    description: merge_request_description(output, summary.as_ref(), target.iid),
                    remove_source_branch: true,
                };
                let (pushed, merge_request) = self
                    .publish_branch(ctx, project, &work_dir, &request, &message)
                    .await;
                if pushed {
                    meta.branch_name = Some(branch.clone());
                    meta.base_branch = Some(base_branch.clone());
                    details.branch = Some(branch);
                }
                if let Some(merge_request) = merge_request {
                    meta.merge_request_iid = Some(merge_request.iid);
                    meta.merge_request_url = Some(merge_request.web_url.clone());
                    details.merge_request = Some((merge_request.iid, merge_request.web_url));
                }
                if pushed {
                    self.update_session_meta(
                        ctx,
                        key,
                        instruction,
                        outcome.session_id.as_deref(),
                        &meta,
                    );
                }
            }
            None => {}
        }

        if let (Some(stage), Some(sessions)) = (instruction.spec_kit_command, self.sessions.as_ref()) {
            let documents = summary
                .as_ref()
                .map(|summary| summary.changes().to_vec())
                .unwrap_or_default();
            if let Err(error) = sessions.update_spec_kit_state(key, stage, documents) {
                tracing::warn!(
                    session_key = %key,
                    stage = %stage,
                    error = %format!("{error:#}"),
                    "failed to record spec workflow state"
                );
            }
        }

        let body = render::success_body(ctx, output, summary.as_ref(), &details);
        reply::finish_reply(self.api.as_ref(), ctx, &body).await;
        reply::resolve_discussion_if_needed(self.api.as_ref(), ctx).await;
        Ok(Handling::Processed)
    }

    /// Carries a follow-up run's change summary into the open merge request.
    async fn refresh_merge_request(
        &self,
        ctx: &mut EventContext,
        project_id: u64,
        iid: u64,
        update: &MergeRequestUpdate,
    ) {
        if let Err(error) = self
            .api
            .update_merge_request(project_id, iid, update)
            .await
        {
            tracing::warn!(
                project_id,
                merge_request_iid = iid,
                error = %format!("{error:#}"),
                "failed to update merge request"
            );
            ctx.warn(format!("Updating merge request !{iid} failed: {error}"));
        }
    }

    /// Creates the remote branch, pushes the work to it and opens the merge
    /// request. No merge request is attempted unless the branch exists and
    /// the push succeeded. Returns whether the push happened.
    async fn publish_branch(
        &self,
        ctx: &mut EventContext,
        project: &Project,
        work_dir: &Path,
        request: &CreateMergeRequest,
        commit_message: &str,
    ) -> (bool, Option<MergeRequest>) {
        let branch = request.source_branch.as_str();
        if let Err(error) = self
            .api
            .create_branch(project.id, branch, &request.target_branch)
            .await
        {
            tracing::warn!(
                project_id = project.id,
                branch,
                error = %format!("{error:#}"),
                "failed to create branch; skipping merge request"
            );
            ctx.warn(format!(
                "Could not create branch `{branch}`, so no merge request was opened: {error}"
            ));
            return (false, None);
        }
        if let Err(error) = self
            .workspace
            .switch_to_and_push_branch(work_dir, branch, commit_message)
            .await
        {
            tracing::warn!(
                project_id = project.id,
                branch,
                error = %format!("{error:#}"),
                "failed to push branch; skipping merge request"
            );
            ctx.warn(format!("Pushing `{branch}` failed, so no merge request was opened: {error}"));
            return (false, None);
        }
        match self.api.create_merge_request(project.id, request).await {
            Ok(merge_request) => {
                tracing::info!(
                    project_id = project.id,
                    branch,
                    merge_request_iid = merge_request.iid,
                    "opened merge request"
                );
                (true, Some(merge_request))
            }
            Err(error) => {
                tracing::warn!(
                    project_id = project.id,
                    branch,
                    error = %format!("{error:#}"),
                    "failed to open merge request"
                );
                ctx.warn(format!("Opening a merge request for `{branch}` failed: {error}"));
                (true, None)
            }
        }
    }

    /// Merges branch/MR metadata into the session the execution just stored.
    fn update_session_meta(
        &self,
        ctx: &mut EventContext,
        key: &SessionKey,
        instruction: &Instruction,
        session_id: Option<&str>,
        meta: &SessionMeta,
    ) {
        let (Some(sessions), Some(session_id)) = (self.sessions.as_ref(), session_id)
        else {
            return;
        };
        if let Err(error) = sessions.set_session(key, session_id, meta, instruction.provider) {
            tracing::warn!(
                session_key = %key,
                error = %format!("{error:#}"),
                "failed to record branch on session"
            );
            ctx.warn(format!("The conversation could not be saved: {error}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use tanuki_review::{ChangeSummary, ParsedChangeSummary};

    use super::merge_request_description;

    #[test]
    fn unit_merge_request_description_closes_the_issue() {
        let summary = ParsedChangeSummary::Structured(ChangeSummary {
            title: "Add retry".to_string(),
            summary: "Retries failed uploads.".to_string(),
            changes: vec!["src/upload.rs".to_string()],
        });
        let description = merge_request_description("raw output", Some(&summary), 12);
        assert!(description.starts_with("Retries failed uploads."));
        assert!(description.contains("- src/upload.rs"));
        assert!(description.ends_with("Closes #12"));
    }

    #[test]
    fn unit_merge_request_description_falls_back_to_output() {
        let description = merge_request_description("Did the thing.", None, 3);
        assert_eq!(description, "Did the thing.\n\nCloses #3");
    }
}
