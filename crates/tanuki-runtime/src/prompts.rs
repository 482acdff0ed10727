//! System prompts and task prompts per scenario.

use tanuki_review::CHANGE_SUMMARY_DELIMITER;
use tanuki_session::{Session, SpecStage};

use crate::instruction::{Instruction, Scenario};

fn change_summary_instructions() -> String {
    format!(
        "When you are done, end your reply with a line containing exactly `{CHANGE_SUMMARY_DELIMITER}` \
followed by a JSON object: {{\"title\": \"<short imperative title>\", \"summary\": \"<one paragraph>\", \
\"changes\": [\"<file or change>\", ...]}}."
    )
}

pub(crate) fn system_prompt(scenario: Scenario) -> String {
    let role = match scenario {
        Scenario::IssueSession => {
            "You are a software engineer working on a GitLab issue inside a checked-out repository. \
Make the requested code changes directly in the working tree. Do not commit or push; that is handled for you."
        }
        Scenario::MrFix => {
            "You are a software engineer addressing feedback on a GitLab merge request. The merge \
request's source branch is checked out. Make the requested changes in the working tree. Do not commit or push."
        }
        Scenario::CodeReview => {
            "You are a meticulous code reviewer. Review only the changed lines you are given and \
report concrete problems. Do not modify any files."
        }
        Scenario::SpecDoc => {
            "You are a software architect writing specification documents for a GitLab issue. \
Write or update markdown documents under `specs/` in the working tree. Do not change source code."
        }
    };
    format!("{role}\n\n{}", change_summary_instructions())
}

fn spec_stage_goal(stage: SpecStage) -> &'static str {
    match stage {
        SpecStage::Specify => "Write the feature specification (`spec.md`): user stories, requirements and acceptance criteria.",
        SpecStage::Clarify => "Review the specification for ambiguities, ask or resolve clarifying questions and update `spec.md`.",
        SpecStage::Plan => "Write the technical implementation plan (`plan.md`) for the specification.",
        SpecStage::Tasks => "Break the plan down into an ordered, dependency-aware task list (`tasks.md`).",
        SpecStage::Implement => "Implement the tasks from the task list, updating `tasks.md` as items are completed.",
    }
}

fn previous_spec_documents(session: Option<&Session>) -> Option<String> {
    let session = session?;
    let lines = session
        .spec_kit_documents
        .iter()
        .flat_map(|(stage, paths)| paths.iter().map(move |path| format!("- {path} ({stage})")))
        .collect::<Vec<_>>();
    (!lines.is_empty()).then(|| lines.join("\n"))
}

/// Prompt for issue, MR-fix and spec-document work.
pub(crate) fn task_prompt(instruction: &Instruction, session: Option<&Session>) -> String {
    let mut prompt = format!("## Context\n{}\n\n", instruction.prompt_context());
    if let Some(stage) = instruction.spec_kit_command {
        prompt.push_str(&format!(
            "## Spec workflow stage: {stage}\n{}\n\n",
            spec_stage_goal(stage)
        ));
        if let Some(documents) = previous_spec_documents(session) {
            prompt.push_str(&format!("Documents from earlier stages:\n{documents}\n\n"));
        }
    }
    let command = instruction.command.trim();
    if command.is_empty() {
        prompt.push_str("## Task\nAddress the request described above.");
    } else {
        prompt.push_str(&format!("## Task\n{command}"));
    }
    prompt
}

/// Review prompt demanding the block format the review parser understands.
pub(crate) fn review_prompt(instruction: &Instruction, reviewable_excerpt: &str) -> String {
    let focus = instruction
        .command
        .trim()
        .strip_prefix("review")
        .or_else(|| instruction.command.trim().strip_prefix("Review"))
        .map(str::trim)
        .filter(|focus| !focus.is_empty())
        .map(|focus| format!("\nReviewer focus: {focus}\n"))
        .unwrap_or_default();
    format!(
        "## Merge request\n{context}\n{focus}\n## Changed lines (new line numbers)\n{reviewable_excerpt}\n\
## Output format\nFor every problem, emit one block exactly like this, separated by `---`:\n\n\
File: path/to/file.ext\nLine: <line number>\nComment: Description of the issue and suggested fix\n\
Severity: info|warning|error\nCategory: style|security|performance|logic|maintainability\n\n\
Only reference line numbers listed above. If there are no problems, emit no blocks.\n\
Then end with `{CHANGE_SUMMARY_DELIMITER}` and a JSON object {{\"title\", \"summary\", \"changes\"}} \
summarizing the merge request.",
        context = instruction.prompt_context(),
    )
}

pub(crate) fn conflict_resolution_prompt(conflicts: &[String], attempt: u32) -> String {
    let files = if conflicts.is_empty() {
        "(the rebase reported conflicts)".to_string()
    } else {
        conflicts
            .iter()
            .map(|file| format!("- {file}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "Pushing your changes failed: rebasing onto the latest remote branch produced merge conflicts \
(attempt {attempt}).\n\nConflicted files:\n{files}\n\nResolve every conflict keeping the intent of \
both sides, remove all conflict markers, `git add` the resolved files and run \
`GIT_EDITOR=true git rebase --continue` until the rebase completes. Do not push."
    )
}
