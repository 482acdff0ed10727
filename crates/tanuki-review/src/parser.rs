use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separates the review (or task output) from the trailing JSON change summary.
pub const CHANGE_SUMMARY_DELIMITER: &str = "===CHANGE_SUMMARY===";

/// Values from the prompt's format example. An assistant echoing the template
/// must not turn into review notes.
const PLACEHOLDER_VALUES: &[&str] = &[
    "path/to/file.ext",
    "path/to/file",
    "relative/path/to/file",
    "<file path>",
    "<line number>",
    "<your comment>",
    "your comment here",
    "description of the issue and suggested fix",
    "info|warning|error",
    "style|security|performance|logic|maintainability",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewSeverity {
    #[default]
    Info,
    Warning,
    Error,
}

impl ReviewSeverity {
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" | "critical" | "high" | "blocker" => Self::Error,
            "warning" | "warn" | "medium" | "major" => Self::Warning,
            _ => Self::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ReviewSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewCategory {
    Style,
    Security,
    Performance,
    Logic,
    #[default]
    Maintainability,
}

impl ReviewCategory {
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "style" | "formatting" => Self::Style,
            "security" => Self::Security,
            "performance" | "perf" => Self::Performance,
            "logic" | "bug" | "correctness" => Self::Logic,
            _ => Self::Maintainability,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Style => "style",
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Logic => "logic",
            Self::Maintainability => "maintainability",
        }
    }
}

impl fmt::Display for ReviewCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewComment {
    pub file_path: String,
    pub line_number: u64,
    pub content: String,
    pub severity: ReviewSeverity,
    pub category: ReviewCategory,
}

/// Splits assistant output at [`CHANGE_SUMMARY_DELIMITER`]. The second half is
/// `None` when the delimiter is missing.
pub fn split_change_summary(output: &str) -> (&str, Option<&str>) {
    match output.find(CHANGE_SUMMARY_DELIMITER) {
        Some(index) => (
            output[..index].trim_end(),
            Some(output[index + CHANGE_SUMMARY_DELIMITER.len()..].trim()),
        ),
        None => (output.trim_end(), None),
    }
}

fn is_placeholder(value: &str) -> bool {
    let normalized = value.trim().trim_matches('`').to_ascii_lowercase();
    PLACEHOLDER_VALUES
        .iter()
        .any(|placeholder| normalized == *placeholder)
}

fn parse_line_number(raw: &str) -> Option<u64> {
    let trimmed = raw.trim().trim_matches('`');
    let trimmed = trimmed
        .strip_prefix('L')
        .or_else(|| trimmed.strip_prefix('l'))
        .unwrap_or(trimmed);
    let digits = trimmed
        .chars()
        .take_while(|ch| ch.is_ascii_digit())
        .collect::<String>();
    digits.parse().ok().filter(|line| *line > 0)
}

#[derive(Debug, Default)]
struct PendingComment {
    file: Option<String>,
    line: Option<u64>,
    comment: Vec<String>,
    /// Unlabeled lines after the comment. They only join it once another field
    /// or a `---` separator follows, so closing prose stays out of the note.
    tail: Vec<String>,
    severity: Option<ReviewSeverity>,
    category: Option<ReviewCategory>,
    in_comment: bool,
}

impl PendingComment {
    fn is_empty(&self) -> bool {
        self.file.is_none() && self.line.is_none() && self.comment.is_empty()
    }

    fn is_complete(&self) -> bool {
        self.file.is_some()
            && self.line.is_some()
            && self.comment.iter().any(|line| !line.trim().is_empty())
    }

    fn commit_tail(&mut self) {
        self.comment.append(&mut self.tail);
    }

    /// Starts a new block for the same file when this one is already complete.
    fn take_if_complete(&mut self) -> Option<ReviewComment> {
        if !self.is_complete() {
            return None;
        }
        let file = self.file.clone();
        let finished = std::mem::take(self).finish();
        self.file = file;
        finished
    }

    fn finish(self) -> Option<ReviewComment> {
        let file_path = self.file?;
        let line_number = self.line?;
        let content = self.comment.join("\n").trim().to_string();
        if content.is_empty() || is_placeholder(&file_path) || is_placeholder(&content) {
            return None;
        }
        Some(ReviewComment {
            file_path,
            line_number,
            content,
            severity: self.severity.unwrap_or_default(),
            category: self.category.unwrap_or_default(),
        })
    }
}

enum Field {
    File,
    Line,
    Comment,
    Severity,
    Category,
}

/// Recognizes `File: x`, `**File:** x`, `**File**: x` and `- File: x`.
fn split_labeled_line(line: &str) -> Option<(Field, String)> {
    let stripped = line
        .trim()
        .trim_start_matches(|ch: char| ch == '-' || ch == '*' || ch == '#' || ch.is_whitespace());
    let (label, value) = stripped.split_once(':')?;
    let label = label.trim().trim_end_matches('*').trim().to_ascii_lowercase();
    let field = match label.as_str() {
        "file" | "file path" | "filepath" | "path" => Field::File,
        "line" | "line number" | "lines" => Field::Line,
        "comment" | "issue" | "feedback" => Field::Comment,
        "severity" => Field::Severity,
        "category" => Field::Category,
        _ => return None,
    };
    let value = value.trim().trim_start_matches('*').trim().to_string();
    Some((field, value))
}

fn parse_labeled_text(text: &str) -> Vec<ReviewComment> {
    let mut comments = Vec::new();
    let mut pending = PendingComment::default();
    for line in text.lines() {
        let labeled = split_labeled_line(line);
        if labeled.is_some() {
            pending.commit_tail();
        }
        match labeled {
            Some((Field::File, value)) => {
                if !pending.is_empty() {
                    comments.extend(std::mem::take(&mut pending).finish());
                }
                pending.file = Some(value.trim_matches('`').to_string())
                    .filter(|path| !path.is_empty());
            }
            Some((Field::Line, value)) => {
                comments.extend(pending.take_if_complete());
                pending.line = parse_line_number(&value);
                pending.in_comment = false;
            }
            Some((Field::Comment, value)) => {
                comments.extend(pending.take_if_complete());
                pending.comment = vec![value];
                pending.in_comment = true;
            }
            Some((Field::Severity, value)) => {
                pending.severity = Some(ReviewSeverity::parse_lenient(&value));
                pending.in_comment = false;
            }
            Some((Field::Category, value)) => {
                pending.category = Some(ReviewCategory::parse_lenient(&value));
                pending.in_comment = false;
            }
            None => {
                let trimmed = line.trim();
                if trimmed == "---" {
                    pending.commit_tail();
                    pending.in_comment = false;
                } else if trimmed.is_empty() {
                    pending.in_comment = false;
                } else if pending.in_comment {
                    pending.tail.push(trimmed.to_string());
                }
            }
        }
    }
    comments.extend(pending.finish());
    comments
}

fn json_string<'a>(object: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
}

fn comment_from_json(value: &Value) -> Option<ReviewComment> {
    let object = value.as_object()?;
    let line_number = ["line", "lineNumber", "line_number"]
        .iter()
        .find_map(|key| match object.get(*key)? {
            Value::Number(number) => number.as_u64(),
            Value::String(raw) => parse_line_number(raw),
            _ => None,
        });
    let pending = PendingComment {
        file: json_string(object, &["file", "filePath", "file_path", "path"]).map(str::to_string),
        line: line_number,
        comment: json_string(object, &["comment", "content", "message", "body"])
            .map(|text| vec![text.to_string()])
            .unwrap_or_default(),
        severity: json_string(object, &["severity"]).map(ReviewSeverity::parse_lenient),
        category: json_string(object, &["category"]).map(ReviewCategory::parse_lenient),
        ..PendingComment::default()
    };
    pending.finish()
}

fn parse_json_array(text: &str) -> Option<Vec<ReviewComment>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    let values = serde_json::from_str::<Vec<Value>>(&text[start..=end]).ok()?;
    if values.is_empty() || !values.iter().all(Value::is_object) {
        return None;
    }
    Some(values.iter().filter_map(comment_from_json).collect())
}

/// Turns assistant review output into review comments. Accepts a JSON array or
/// the `File/Line/Comment/Severity/Category` block format; any change summary
/// after [`CHANGE_SUMMARY_DELIMITER`] is ignored.
pub fn parse_ai_review_response(output: &str) -> Vec<ReviewComment> {
    let (review, _) = split_change_summary(output);
    if let Some(comments) = parse_json_array(review) {
        return comments;
    }
    parse_labeled_text(review)
}
