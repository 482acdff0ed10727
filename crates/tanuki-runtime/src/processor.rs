//! Event orchestration: trigger extraction, per-issue serialization and
//! scenario dispatch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tanuki_gitlab::{
    contains_response_marker, GitlabApi, Noteable, NoteableKind, Project, ProjectWorkspace,
    Tenant, TriggerMatcher, WebhookEvent,
};
use tanuki_provider::{AiExecutor, ProviderId};
use tanuki_session::{Session, SessionKey, SessionManager};

use crate::config::ProcessorConfig;
use crate::context::EventContext;
use crate::instruction::Scenario;
use crate::lock::IssueLockTable;
use crate::render;

mod code_review;
mod execution;
mod extract;
mod issue_flow;
mod merge_request_flow;
mod reply;
#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Processed,
    Ignored,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessOutcome {
    pub status: ProcessStatus,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Handling {
    Processed,
    Ignored(&'static str),
    /// The assistant or a critical collaborator failed; already reported.
    Failed(String),
}

/// Issue or merge request an event is about.
struct EventTarget<'a> {
    project: &'a Project,
    iid: u64,
    noteable: Noteable,
    title: &'a str,
}

fn action_is_open(action: Option<&str>) -> bool {
    matches!(action.map(str::trim), Some("open" | "reopen"))
}

fn resolve_target(event: &WebhookEvent) -> Option<EventTarget<'_>> {
    match event {
        WebhookEvent::Issue {
            project,
            object_attributes,
            ..
        } => Some(EventTarget {
            project,
            iid: object_attributes.iid,
            noteable: Noteable::Issue {
                iid: object_attributes.iid,
            },
            title: &object_attributes.title,
        }),
        WebhookEvent::MergeRequest {
            project,
            object_attributes,
            ..
        } => Some(EventTarget {
            project,
            iid: object_attributes.iid,
            noteable: Noteable::MergeRequest {
                iid: object_attributes.iid,
            },
            title: &object_attributes.title,
        }),
        WebhookEvent::Note {
            project,
            object_attributes,
            issue,
            merge_request,
            ..
        } => match object_attributes.noteable_kind() {
            NoteableKind::Issue => issue.as_ref().map(|issue| EventTarget {
                project,
                iid: issue.iid,
                noteable: Noteable::Issue { iid: issue.iid },
                title: &issue.title,
            }),
            NoteableKind::MergeRequest => merge_request.as_ref().map(|mr| EventTarget {
                project,
                iid: mr.iid,
                noteable: Noteable::MergeRequest { iid: mr.iid },
                title: &mr.title,
            }),
            NoteableKind::Commit | NoteableKind::Snippet | NoteableKind::Unknown => None,
        },
        WebhookEvent::Unsupported => None,
    }
}

/// Why an event is not actionable before any trigger parsing.
fn precheck(event: &WebhookEvent) -> Option<&'static str> {
    match event {
        WebhookEvent::Unsupported => Some("unsupported event kind"),
        WebhookEvent::Note {
            object_attributes, ..
        } if contains_response_marker(&object_attributes.note) => Some("self-authored comment"),
        WebhookEvent::Note {
            object_attributes, ..
        } if matches!(
            object_attributes.noteable_kind(),
            NoteableKind::Commit | NoteableKind::Snippet | NoteableKind::Unknown
        ) =>
        {
            Some("note is not on an issue or merge request")
        }
        WebhookEvent::Issue {
            object_attributes, ..
        } if !action_is_open(object_attributes.action.as_deref()) => {
            Some("issue action is not open/reopen")
        }
        WebhookEvent::MergeRequest {
            object_attributes, ..
        } if object_attributes.action.as_deref() == Some("update") => {
            Some("merge request update")
        }
        WebhookEvent::MergeRequest {
            object_attributes, ..
        } if !action_is_open(object_attributes.action.as_deref()) => {
            Some("merge request action is not open/reopen")
        }
        _ => None,
    }
}

/// Orchestrates one webhook event at a time per issue/MR, any number
/// concurrently across issues.
pub struct EventProcessor {
    config: ProcessorConfig,
    api: Arc<dyn GitlabApi>,
    workspace: Arc<dyn ProjectWorkspace>,
    executor: Arc<dyn AiExecutor>,
    sessions: Option<Arc<SessionManager>>,
    locks: IssueLockTable,
    triggers: TriggerMatcher,
    default_provider: ProviderId,
}

impl EventProcessor {
    /// `sessions` is ignored when `sessions_enabled` is false.
    pub fn new(
        config: ProcessorConfig,
        api: Arc<dyn GitlabApi>,
        workspace: Arc<dyn ProjectWorkspace>,
        executor: Arc<dyn AiExecutor>,
        sessions: Option<Arc<SessionManager>>,
    ) -> Result<Self> {
        config.validate()?;
        let default_provider = config.default_provider()?;
        let mentions = config.mentions();
        let triggers = TriggerMatcher::new(
            mentions
                .iter()
                .map(|(provider, mention)| (*provider, mention.as_str())),
        )
        .context("invalid provider mention")?;
        let sessions = sessions.filter(|_| config.sessions_enabled);
        Ok(Self {
            config,
            api,
            workspace,
            executor,
            sessions,
            locks: IssueLockTable::new(),
            triggers,
            default_provider,
        })
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn sessions(&self) -> Option<&SessionManager> {
        self.sessions.as_deref()
    }

    /// Processes one webhook event. Never fails: every error is mapped to a
    /// [`ProcessOutcome`] and, where possible, reported on GitLab.
    pub async fn process_event(
        &self,
        event: &WebhookEvent,
        tenant: Option<&Tenant>,
    ) -> ProcessOutcome {
        let started = Instant::now();
        let project_id = event.project().map(|project| project.id).unwrap_or_default();
        let mut ctx = EventContext::new(project_id);
        let result = self.handle_event(event, tenant, &mut ctx).await;
        let execution_time_ms = elapsed_ms(started.elapsed());
        match result {
            Ok(Handling::Processed) => {
                tracing::info!(
                    kind = event.kind_label(),
                    project_id,
                    iid = event.target_iid().unwrap_or_default(),
                    execution_time_ms,
                    "event processed"
                );
                ProcessOutcome {
                    status: ProcessStatus::Processed,
                    execution_time_ms,
                    error: None,
                }
            }
            Ok(Handling::Ignored(reason)) => {
                tracing::debug!(kind = event.kind_label(), project_id, reason, "event ignored");
                ProcessOutcome {
                    status: ProcessStatus::Ignored,
                    execution_time_ms,
                    error: None,
                }
            }
            Ok(Handling::Failed(error)) => ProcessOutcome {
                status: ProcessStatus::Error,
                execution_time_ms,
                error: Some(error),
            },
            Err(error) => {
                let message = format!("{error:#}");
                tracing::error!(
                    kind = event.kind_label(),
                    project_id,
                    error = %message,
                    "event processing failed"
                );
                if ctx.noteable.is_some() {
                    reply::finish_reply(self.api.as_ref(), &mut ctx, &render::internal_error_body())
                        .await;
                }
                ProcessOutcome {
                    status: ProcessStatus::Error,
                    execution_time_ms,
                    error: Some(message),
                }
            }
        }
    }

    async fn handle_event(
        &self,
        event: &WebhookEvent,
        tenant: Option<&Tenant>,
        ctx: &mut EventContext,
    ) -> Result<Handling> {
        if let Some(reason) = precheck(event) {
            return Ok(Handling::Ignored(reason));
        }
        let Some(target) = resolve_target(event) else {
            return Ok(Handling::Ignored("event has no issue or merge request"));
        };
        ctx.noteable = Some(target.noteable);
        if let WebhookEvent::Note {
            object_attributes, ..
        } = event
        {
            ctx.discussion_id = object_attributes
                .discussion_id
                .clone()
                .filter(|id| !id.trim().is_empty());
        }

        let owner_id = tenant.and_then(|tenant| tenant.owner_id.as_deref());
        let key = SessionKey::new(owner_id, target.project.id, target.iid);
        let active_session = self.peek_session(&key);
        let Some(instruction) = self
            .extract_instruction(event, ctx, active_session.as_ref())
            .await
        else {
            return Ok(Handling::Ignored("no trigger phrase"));
        };

        let _guard = self.locks.acquire(key.as_str()).await;
        ctx.executor_name = instruction.provider.display_name().to_string();
        tracing::info!(
            session_key = %key,
            scenario = %instruction.scenario,
            provider = %instruction.provider,
            "dispatching instruction"
        );
        match instruction.scenario {
            Scenario::CodeReview => {
                self.run_code_review(&target, &instruction, &key, ctx)
                    .await
            }
            Scenario::MrFix => {
                self.run_merge_request_fix(event, &target, &instruction, &key, ctx)
                    .await
            }
            Scenario::IssueSession | Scenario::SpecDoc => {
                self.run_issue_flow(&target, &instruction, &key, owner_id, ctx)
                    .await
            }
        }
    }

    fn peek_session(&self, key: &SessionKey) -> Option<Session> {
        self.sessions.as_ref().and_then(|sessions| sessions.peek(key))
    }

    /// Reports a failed attempt in place of the progress comment.
    async fn report_failure(&self, ctx: &mut EventContext, error: &str) -> Handling {
        let body = render::failure_body(ctx, error);
        reply::finish_reply(self.api.as_ref(), ctx, &body).await;
        Handling::Failed(error.to_string())
    }
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

fn workspace_id(key: &SessionKey) -> String {
    key.as_str().replace(':', "-")
}
