use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tanuki_core::truncate_chars;
use tanuki_gitlab::MergeRequestAttributes;
use tanuki_provider::ProviderId;
use tanuki_session::SpecStage;

const DESCRIPTION_EXCERPT_CHARS: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
/// High-level task shape.
pub enum Scenario {
    IssueSession,
    MrFix,
    CodeReview,
    SpecDoc,
}

impl Scenario {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IssueSession => "issue-session",
            Self::MrFix => "mr-fix",
            Self::CodeReview => "code-review",
            Self::SpecDoc => "spec-doc",
        }
    }

    /// Scenarios that open a merge request after their first success.
    pub fn creates_merge_request(self) -> bool {
        matches!(self, Self::IssueSession | Self::SpecDoc)
    }

    pub fn branch_prefix(self, provider: ProviderId) -> String {
        match self {
            Self::SpecDoc => format!("{provider}-spec"),
            _ => provider.as_str().to_string(),
        }
    }

    /// `<prefix>-<unix seconds>-<6 hex chars>`.
    pub fn branch_name(self, provider: ProviderId, seed: &str) -> String {
        let now_ms = tanuki_core::current_unix_timestamp_ms();
        let digest = Sha256::digest(format!("{seed}:{now_ms}:{}", std::process::id()));
        let suffix = digest
            .iter()
            .take(3)
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>();
        format!("{}-{}-{suffix}", self.branch_prefix(provider), now_ms / 1_000)
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// What to ask the assistant, derived once per event.
pub struct Instruction {
    pub command: String,
    /// Title/description of the issue or MR the command is about.
    pub context: String,
    /// Context plus discussion history, when the event came from a thread.
    pub full_context: Option<String>,
    /// Branch the work starts from (checked out for MR scenarios).
    pub branch: String,
    pub provider: ProviderId,
    pub scenario: Scenario,
    pub spec_kit_command: Option<SpecStage>,
}

impl Instruction {
    pub fn prompt_context(&self) -> &str {
        self.full_context.as_deref().unwrap_or(&self.context)
    }
}

/// MR notes asking for a review (`@claude review`, `@codex review security`).
pub fn is_review_command(command: &str) -> bool {
    let first = command
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_end_matches(|ch: char| !ch.is_alphanumeric())
        .to_ascii_lowercase();
    first == "review"
}

pub fn render_issue_context(iid: u64, title: &str, description: Option<&str>) -> String {
    let description = description.map(str::trim).unwrap_or_default();
    if description.is_empty() {
        format!("Issue #{iid}: {}", title.trim())
    } else {
        format!("Issue #{iid}: {}\n\n{description}", title.trim())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeCounts {
    pub files: usize,
    pub additions: usize,
    pub deletions: usize,
}

/// Synthetic context for MR-driven work.
pub fn render_merge_request_context(
    merge_request: &MergeRequestAttributes,
    counts: Option<ChangeCounts>,
) -> String {
    let mut out = format!(
        "Merge request !{}: {}\nSource branch: {}\nTarget branch: {}",
        merge_request.iid,
        merge_request.title.trim(),
        merge_request.source_branch,
        merge_request.target_branch
    );
    if let Some(counts) = counts {
        out.push_str(&format!(
            "\nChanges: {} files, +{} / -{} lines",
            counts.files, counts.additions, counts.deletions
        ));
    }
    let description = merge_request
        .description
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if !description.is_empty() {
        out.push_str("\n\nDescription:\n");
        out.push_str(&truncate_chars(description, DESCRIPTION_EXCERPT_CHARS));
    }
    out
}

#[cfg(test)]
mod tests {
    use tanuki_gitlab::MergeRequestAttributes;
    use tanuki_provider::ProviderId;

    use super::{
        is_review_command, render_issue_context, render_merge_request_context, ChangeCounts,
        Scenario,
    };

    #[test]
    fn unit_branch_name_uses_provider_timestamp_and_hash() {
        let name = Scenario::IssueSession.branch_name(ProviderId::Codex, "1:2");
        let parts = name.split('-').collect::<Vec<_>>();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "codex");
        assert!(parts[1].parse::<u64>().is_ok());
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|ch| ch.is_ascii_hexdigit()));
        assert!(Scenario::SpecDoc
            .branch_name(ProviderId::Claude, "1:2")
            .starts_with("claude-spec-"));
    }

    #[test]
    fn unit_is_review_command_matches_first_word() {
        assert!(is_review_command("review"));
        assert!(is_review_command("Review: security only"));
        assert!(!is_review_command("please review this"));
        assert!(!is_review_command("reviewer notes"));
    }

    #[test]
    fn functional_merge_request_context_includes_branches_and_counts() {
        let merge_request = MergeRequestAttributes {
            iid: 7,
            title: "Add cache".to_string(),
            description: Some("x".repeat(2_000)),
            source_branch: "feature/cache".to_string(),
            target_branch: "develop".to_string(),
            ..MergeRequestAttributes::default()
        };
        let context = render_merge_request_context(
            &merge_request,
            Some(ChangeCounts {
                files: 2,
                additions: 10,
                deletions: 3,
            }),
        );
        assert!(context.starts_with("Merge request !7: Add cache"));
        assert!(context.contains("Source branch: feature/cache"));
        assert!(context.contains("Changes: 2 files, +10 / -3 lines"));
        assert!(context.len() < 1_200);
        assert_eq!(
            render_issue_context(3, "Bug", Some("  ")),
            "Issue #3: Bug"
        );
    }
}
