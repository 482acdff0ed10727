use std::path::Path;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tanuki_core::truncate_for_log;
use tanuki_gitlab::GitlabApi;
use tanuki_provider::{ExecutionCallback, ExecutionContext, ExecutionOutcome, SessionOptions};
use tanuki_session::{SessionKey, SessionMeta};
use tokio::sync::Mutex;

use super::{reply, EventProcessor};
use crate::context::EventContext;
use crate::instruction::Instruction;
use crate::render;

/// Everything needed to run one prompt for an event.
pub(super) struct ExecutionPlan<'a> {
    pub(super) instruction: &'a Instruction,
    pub(super) key: &'a SessionKey,
    pub(super) work_dir: &'a Path,
    pub(super) system_prompt: String,
    pub(super) prompt: String,
    /// Stored on the session after a successful run.
    pub(super) meta: SessionMeta,
    /// Resume this id instead of the stored provider session.
    pub(super) resume_override: Option<String>,
}

/// Streams assistant progress into the event's progress comment.
struct ProgressReporter<'a> {
    api: &'a dyn GitlabApi,
    ctx: Mutex<&'a mut EventContext>,
    max_lines: usize,
}

#[async_trait]
impl<'a> ExecutionCallback for ProgressReporter<'a> {
    async fn on_progress(&self, message: String) {
        let message = message.trim().to_string();
        if message.is_empty() {
            return;
        }
        let mut ctx = self.ctx.lock().await;
        if ctx.push_progress(message, self.max_lines) {
            let body = render::progress_body(&**ctx);
            reply::edit_progress(self.api, &**ctx, &body).await;
        }
    }

    async fn on_error(&self, error: String) {
        tracing::debug!(error = %truncate_for_log(&error), "assistant cli reported an error");
    }
}

fn stale_session_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)(?:(?:session|conversation).{0,20}not\s+found|no\s+(?:session|conversation)\s+found)",
            )
            .ok()
        })
        .as_ref()
}

/// Errors meaning the provider no longer knows the resumed session.
pub(super) fn is_recoverable_session_error(error: &str) -> bool {
    stale_session_pattern().is_some_and(|pattern| pattern.is_match(error))
}

impl EventProcessor {
    fn session_options(&self, plan: &ExecutionPlan<'_>) -> SessionOptions {
        if let Some(session_id) = plan.resume_override.as_deref() {
            return SessionOptions::resume(session_id);
        }
        self.sessions
            .as_ref()
            .and_then(|sessions| sessions.get_provider_session(plan.key, plan.instruction.provider))
            .map(|stored| SessionOptions::resume(stored.session_id))
            .unwrap_or_default()
    }

    /// Runs the plan, resuming the stored provider session. A stale session
    /// is dropped and retried once with a fresh one per event.
    pub(super) async fn execute_with_recovery(
        &self,
        ctx: &mut EventContext,
        plan: &ExecutionPlan<'_>,
    ) -> ExecutionOutcome {
        let provider = plan.instruction.provider;
        let context = ExecutionContext {
            provider,
            system_prompt: plan.system_prompt.clone(),
            context: String::new(),
        };
        let mut options = self.session_options(plan);
        loop {
            tokio::time::sleep(self.config.dispatch_delay()).await;
            tracing::debug!(
                session_key = %plan.key,
                provider = %provider,
                resume = options.resume_id().is_some(),
                "dispatching prompt"
            );
            let outcome = {
                let reporter = ProgressReporter {
                    api: self.api.as_ref(),
                    ctx: Mutex::new(&mut *ctx),
                    max_lines: self.config.progress_max_lines,
                };
                self.executor
                    .execute_with_session(&plan.prompt, plan.work_dir, &context, &reporter, &options)
                    .await
            };
            if outcome.success {
                self.record_session(ctx, plan, &outcome);
                return outcome;
            }
            let stale = options.resume_id().is_some()
                && is_recoverable_session_error(outcome.error_message());
            if !stale || ctx.retry_attempted {
                return outcome;
            }
            ctx.retry_attempted = true;
            tracing::warn!(
                session_key = %plan.key,
                provider = %provider,
                error = %truncate_for_log(outcome.error_message()),
                "provider session is gone; retrying with a fresh session"
            );
            if let Some(sessions) = self.sessions.as_ref() {
                if let Err(error) = sessions.remove_session(plan.key, Some(provider)) {
                    tracing::warn!(
                        session_key = %plan.key,
                        error = %format!("{error:#}"),
                        "failed to drop stale provider session"
                    );
                }
            }
            options = SessionOptions::default();
        }
    }

    fn record_session(
        &self,
        ctx: &mut EventContext,
        plan: &ExecutionPlan<'_>,
        outcome: &ExecutionOutcome,
    ) {
        let (Some(sessions), Some(session_id)) =
            (self.sessions.as_ref(), outcome.session_id.as_deref())
        else {
            return;
        };
        if let Err(error) =
            sessions.set_session(plan.key, session_id, &plan.meta, plan.instruction.provider)
        {
            tracing::warn!(
                session_key = %plan.key,
                error = %format!("{error:#}"),
                "failed to persist session"
            );
            ctx.warn(format!("The conversation could not be saved: {error}"));
        }
    }
}
