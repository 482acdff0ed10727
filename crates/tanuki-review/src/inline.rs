use tanuki_gitlab::{format_comment_body, GitlabApi, Noteable};

use crate::diff::{create_position, get_reviewable_lines, DiffLine, ParsedDiff, ParsedDiffFile};
use crate::parser::{ReviewComment, ReviewSeverity};

/// Lines searched either side of a missing target line.
pub const DEFAULT_SNAP_WINDOW: u64 = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InlineReviewReport {
    pub placed: usize,
    /// Placed on a nearby line instead of the requested one.
    pub snapped: usize,
    /// Comments without an anchor, posted in the general comment.
    pub rerouted: Vec<ReviewComment>,
    pub general_comment_posted: bool,
    /// Placement attempts rejected by GitLab, with the error text.
    pub failed: Vec<(ReviewComment, String)>,
}

fn severity_badge(severity: ReviewSeverity) -> &'static str {
    match severity {
        ReviewSeverity::Error => "🔴",
        ReviewSeverity::Warning => "🟡",
        ReviewSeverity::Info => "🔵",
    }
}

fn render_inline_note(comment: &ReviewComment) -> String {
    format_comment_body(&format!(
        "{} **{}** · _{}_\n\n{}",
        severity_badge(comment.severity),
        comment.severity,
        comment.category,
        comment.content.trim()
    ))
}

fn render_general_comment(comments: &[ReviewComment]) -> String {
    let mut body = String::from(
        "### Additional review comments\n\nThese could not be attached to a diff line:\n",
    );
    for comment in comments {
        body.push_str(&format!(
            "\n- {} `{}:{}` **{}** · _{}_: {}",
            severity_badge(comment.severity),
            comment.file_path,
            comment.line_number,
            comment.severity,
            comment.category,
            comment.content.trim().replace('\n', " ")
        ));
    }
    format_comment_body(&body)
}

/// Exact line when present, else the nearest reviewable line within `window`.
/// Ties prefer the later line.
fn resolve_line<'a>(
    file: &'a ParsedDiffFile,
    target: u64,
    window: u64,
) -> Option<(&'a DiffLine, bool)> {
    let reviewable = get_reviewable_lines(file);
    if let Some(exact) = reviewable
        .iter()
        .find(|line| line.new_line == Some(target))
    {
        return Some((*exact, false));
    }
    reviewable
        .into_iter()
        .filter_map(|line| {
            let new_line = line.new_line?;
            let distance = new_line.abs_diff(target);
            (distance <= window).then_some((distance, std::cmp::Reverse(new_line), line))
        })
        .min_by_key(|(distance, later, _)| (*distance, *later))
        .map(|(_, _, line)| (line, true))
}

/// Places each comment as an inline diff note. Each placement is independent:
/// failures are logged and reported, never retried. Comments whose file has
/// no diff content or whose line has no anchor within `snap_window` are
/// batched into one general MR comment.
pub async fn perform_inline_review(
    api: &dyn GitlabApi,
    project_id: u64,
    merge_request_iid: u64,
    parsed: &ParsedDiff,
    comments: &[ReviewComment],
    snap_window: u64,
) -> InlineReviewReport {
    let mut report = InlineReviewReport::default();
    for comment in comments {
        let Some(file) = parsed
            .find_file(&comment.file_path)
            .filter(|file| file.has_content())
        else {
            tracing::debug!(
                file = %comment.file_path,
                line = comment.line_number,
                "no diff content for review comment, rerouting"
            );
            report.rerouted.push(comment.clone());
            continue;
        };
        let Some((line, snapped)) = resolve_line(file, comment.line_number, snap_window) else {
            tracing::debug!(
                file = %comment.file_path,
                line = comment.line_number,
                "no reviewable line near review comment, rerouting"
            );
            report.rerouted.push(comment.clone());
            continue;
        };
        let Some(position) = create_position(parsed, file, line) else {
            report.rerouted.push(comment.clone());
            continue;
        };
        match api
            .create_diff_discussion(
                project_id,
                merge_request_iid,
                &render_inline_note(comment),
                &position,
            )
            .await
        {
            Ok(()) => {
                report.placed += 1;
                if snapped {
                    report.snapped += 1;
                }
            }
            Err(error) => {
                tracing::warn!(
                    project_id,
                    iid = merge_request_iid,
                    file = %comment.file_path,
                    line = comment.line_number,
                    error = %format!("{error:#}"),
                    "failed to place inline review comment"
                );
                report.failed.push((comment.clone(), format!("{error:#}")));
            }
        }
    }

    if !report.rerouted.is_empty() {
        let body = render_general_comment(&report.rerouted);
        match api
            .create_comment(
                project_id,
                Noteable::MergeRequest {
                    iid: merge_request_iid,
                },
                &body,
            )
            .await
        {
            Ok(_) => report.general_comment_posted = true,
            Err(error) => tracing::warn!(
                project_id,
                iid = merge_request_iid,
                rerouted = report.rerouted.len(),
                error = %format!("{error:#}"),
                "failed to post rerouted review comments"
            ),
        }
    }
    report
}
