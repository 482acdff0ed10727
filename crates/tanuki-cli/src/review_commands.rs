use std::path::Path;

use anyhow::{Context, Result};
use tanuki_review::parse_ai_review_response;

use crate::cli_args::ReviewCommand;

pub(crate) fn run_review_command(command: &ReviewCommand) -> Result<String> {
    match command {
        ReviewCommand::Parse { file } => parse_review_file(file),
    }
}

fn parse_review_file(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let comments = parse_ai_review_response(&raw);
    tracing::debug!(path = %path.display(), comments = comments.len(), "parsed review output");
    Ok(serde_json::to_string_pretty(&comments)?)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::run_review_command;
    use crate::cli_args::ReviewCommand;

    #[test]
    fn functional_review_parse_prints_comments_as_json() {
        let dir = tempdir().expect("tempdir");
        let file = dir.path().join("review.txt");
        std::fs::write(
            &file,
            "File: src/main.rs\nLine: 12\nComment: Handle the error.\nSeverity: error\nCategory: logic\n",
        )
        .expect("write review");

        let output = run_review_command(&ReviewCommand::Parse { file }).expect("parse");
        let comments: serde_json::Value = serde_json::from_str(&output).expect("json");
        assert_eq!(comments[0]["filePath"], "src/main.rs");
        assert_eq!(comments[0]["lineNumber"], 12);
        assert_eq!(comments[0]["severity"], "error");
    }

    #[test]
    fn regression_review_parse_reports_missing_files() {
        let dir = tempdir().expect("tempdir");
        let error = run_review_command(&ReviewCommand::Parse {
            file: dir.path().join("missing.txt"),
        })
        .expect_err("missing file");
        assert!(format!("{error:#}").contains("missing.txt"));
    }
}
