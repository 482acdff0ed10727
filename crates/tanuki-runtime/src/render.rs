//! Comment bodies posted by the processor. Every body goes through
//! `format_comment_body` so it carries the response marker.

use tanuki_core::truncate_chars;
use tanuki_gitlab::format_comment_body;
use tanuki_review::{InlineReviewReport, ParsedChangeSummary};

use crate::context::EventContext;

const ERROR_DETAIL_CHARS: usize = 2_000;

pub(crate) fn progress_body(ctx: &EventContext) -> String {
    let mut body = format!("⏳ **{}** is working on it…", ctx.executor_name);
    if !ctx.progress_messages.is_empty() {
        body.push_str("\n\n");
        for line in &ctx.progress_messages {
            body.push_str(&format!("> {line}\n"));
        }
    }
    format_comment_body(&body)
}

#[derive(Debug, Clone, Default)]
/// Links and status lines appended to a success comment.
pub(crate) struct SuccessDetails {
    pub(crate) branch: Option<String>,
    pub(crate) merge_request: Option<(u64, String)>,
    pub(crate) notes: Vec<String>,
}

fn push_change_summary(body: &mut String, summary: Option<&ParsedChangeSummary>) {
    let Some(summary) = summary else {
        return;
    };
    if let ParsedChangeSummary::Structured(structured) = summary {
        if !structured.summary.trim().is_empty() {
            body.push_str(&format!("\n\n**Summary:** {}", structured.summary.trim()));
        }
    }
    if !summary.changes().is_empty() {
        body.push_str("\n\n**Changes**\n");
        for change in summary.changes() {
            body.push_str(&format!("- {change}\n"));
        }
    }
}

fn push_warnings(body: &mut String, warnings: &[String]) {
    for warning in warnings {
        body.push_str(&format!("\n\n⚠️ {warning}"));
    }
}

pub(crate) fn success_body(
    ctx: &EventContext,
    output: &str,
    summary: Option<&ParsedChangeSummary>,
    details: &SuccessDetails,
) -> String {
    let mut body = format!("✅ **{}** finished", ctx.executor_name);
    if let Some(title) = summary.and_then(ParsedChangeSummary::title) {
        body.push_str(&format!(": {title}"));
    }
    let output = output.trim();
    if !output.is_empty() {
        body.push_str("\n\n");
        body.push_str(output);
    }
    push_change_summary(&mut body, summary);
    let mut links = Vec::new();
    if let Some(branch) = details.branch.as_deref() {
        links.push(format!("Branch: `{branch}`"));
    }
    if let Some((iid, url)) = details.merge_request.as_ref() {
        if url.is_empty() {
            links.push(format!("Merge request: !{iid}"));
        } else {
            links.push(format!("Merge request: [!{iid}]({url})"));
        }
    }
    if !links.is_empty() {
        body.push_str(&format!("\n\n{}", links.join(" · ")));
    }
    for note in &details.notes {
        body.push_str(&format!("\n\n{note}"));
    }
    push_warnings(&mut body, &ctx.warnings);
    format_comment_body(&body)
}

pub(crate) fn failure_body(ctx: &EventContext, error: &str) -> String {
    let mut body = format!(
        "❌ **{}** failed\n\n```\n{}\n```",
        ctx.executor_name,
        truncate_chars(error.trim(), ERROR_DETAIL_CHARS)
    );
    if ctx.retry_attempted {
        body.push_str("\n\nThe previous conversation had expired; a fresh session was tried as well.");
    }
    push_warnings(&mut body, &ctx.warnings);
    format_comment_body(&body)
}

pub(crate) fn review_body(
    ctx: &EventContext,
    report: &InlineReviewReport,
    overview: &str,
    summary: Option<&ParsedChangeSummary>,
) -> String {
    let mut body = format!("🔍 **{}** reviewed this merge request", ctx.executor_name);
    if let Some(title) = summary.and_then(ParsedChangeSummary::title) {
        body.push_str(&format!(": {title}"));
    }
    body.push_str(&format!(
        "\n\n- Inline comments: {} ({} moved to a nearby line)\n- Comments without a diff anchor: {}",
        report.placed,
        report.snapped,
        report.rerouted.len()
    ));
    if !report.failed.is_empty() {
        body.push_str(&format!(
            "\n- Comments GitLab rejected: {}",
            report.failed.len()
        ));
    }
    if report.placed == 0 && report.rerouted.is_empty() && report.failed.is_empty() {
        body.push_str("\n\nNo problems found. 🎉");
    }
    let overview = overview.trim();
    if !overview.is_empty() {
        body.push_str(&format!("\n\n{overview}"));
    }
    push_change_summary(&mut body, summary);
    push_warnings(&mut body, &ctx.warnings);
    format_comment_body(&body)
}

pub(crate) fn nothing_to_review_body(ctx: &EventContext) -> String {
    format_comment_body(&format!(
        "🔍 **{}**: this merge request has no reviewable changes.",
        ctx.executor_name
    ))
}

pub(crate) fn internal_error_body() -> String {
    format_comment_body(
        "❌ An internal error occurred while processing this request. Check the service logs for details.",
    )
}

#[cfg(test)]
mod tests {
    use tanuki_gitlab::RESPONSE_MARKER;
    use tanuki_review::{ChangeSummary, ParsedChangeSummary};

    use super::{failure_body, progress_body, success_body, SuccessDetails};
    use crate::context::EventContext;

    fn ctx() -> EventContext {
        let mut ctx = EventContext::new(1);
        ctx.executor_name = "Codex".to_string();
        ctx
    }

    #[test]
    fn unit_progress_body_quotes_recent_lines() {
        let mut ctx = ctx();
        ctx.push_progress("Running `cargo test`".to_string(), 15);
        let body = progress_body(&ctx);
        assert!(body.starts_with("⏳ **Codex** is working on it…"));
        assert!(body.contains("> Running `cargo test`"));
        assert!(body.ends_with(RESPONSE_MARKER));
    }

    #[test]
    fn functional_success_body_renders_summary_links_and_warnings() {
        let mut ctx = ctx();
        ctx.warn("failed to resolve discussion");
        let summary = ParsedChangeSummary::Structured(ChangeSummary {
            title: "Add cache".to_string(),
            summary: "Adds an LRU cache.".to_string(),
            changes: vec!["src/cache.rs".to_string()],
        });
        let body = success_body(
            &ctx,
            "Implemented the cache.",
            Some(&summary),
            &SuccessDetails {
                branch: Some("codex-1-abcdef".to_string()),
                merge_request: Some((4, "https://gitlab.example/mr/4".to_string())),
                notes: Vec::new(),
            },
        );
        assert!(body.starts_with("✅ **Codex** finished: Add cache"));
        assert!(body.contains("- src/cache.rs"));
        assert!(body.contains("Branch: `codex-1-abcdef` · Merge request: [!4](https://gitlab.example/mr/4)"));
        assert!(body.contains("⚠️ failed to resolve discussion"));
        assert_eq!(body.matches(RESPONSE_MARKER).count(), 1);
    }

    #[test]
    fn regression_failure_body_mentions_session_retry() {
        let mut ctx = ctx();
        ctx.retry_attempted = true;
        let body = failure_body(&ctx, "session not found");
        assert!(body.contains("❌ **Codex** failed"));
        assert!(body.contains("fresh session"));
    }
}
