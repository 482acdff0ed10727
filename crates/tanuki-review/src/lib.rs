//! Diff-aware code review support.
//!
//! Parses merge-request diffs into an addressable line model, turns free-form
//! assistant review output into [`ReviewComment`]s and places them as inline
//! diff notes, rerouting anything without an exact anchor into one general
//! comment.

pub mod diff;
pub mod inline;
pub mod parser;
pub mod summary;

pub use diff::{
    create_position, filter_lines_needing_review, get_reviewable_lines, parse_merge_request_diffs,
    parse_unified_diff, render_reviewable_excerpt, DiffLine, DiffLineKind, ParsedDiff,
    ParsedDiffFile,
};
pub use inline::{perform_inline_review, InlineReviewReport, DEFAULT_SNAP_WINDOW};
pub use parser::{
    parse_ai_review_response, split_change_summary, ReviewCategory, ReviewComment,
    ReviewSeverity, CHANGE_SUMMARY_DELIMITER,
};
pub use summary::{parse_change_summary, ChangeSummary, ParsedChangeSummary};
