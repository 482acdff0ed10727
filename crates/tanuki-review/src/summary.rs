use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// JSON block the assistant appends after the change-summary delimiter.
pub struct ChangeSummary {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub changes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedChangeSummary {
    Structured(ChangeSummary),
    /// Raw lines kept when the block was not valid JSON.
    Fallback(Vec<String>),
}

impl ParsedChangeSummary {
    pub fn title(&self) -> Option<&str> {
        match self {
            Self::Structured(summary) => {
                Some(summary.title.trim()).filter(|title| !title.is_empty())
            }
            Self::Fallback(_) => None,
        }
    }

    pub fn changes(&self) -> &[String] {
        match self {
            Self::Structured(summary) => &summary.changes,
            Self::Fallback(changes) => changes,
        }
    }
}

fn json_candidate(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn fallback_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|ch: char| ch == '-' || ch == '*' || ch == '•')
                .trim()
        })
        .filter(|line| !line.is_empty() && !line.starts_with("```"))
        .map(str::to_string)
        .collect()
}

/// Parses the text after the change-summary delimiter. Never fails: invalid
/// JSON degrades to the raw non-empty lines.
pub fn parse_change_summary(raw: &str) -> ParsedChangeSummary {
    if let Some(candidate) = json_candidate(raw) {
        match serde_json::from_str::<ChangeSummary>(candidate) {
            Ok(mut summary) => {
                summary.changes.retain(|change| !change.trim().is_empty());
                return ParsedChangeSummary::Structured(summary);
            }
            Err(error) => {
                tracing::debug!(error = %error, "change summary is not valid json, using raw lines");
            }
        }
    }
    ParsedChangeSummary::Fallback(fallback_lines(raw))
}

#[cfg(test)]
mod tests {
    use super::{parse_change_summary, ChangeSummary, ParsedChangeSummary};

    #[test]
    fn unit_parse_change_summary_reads_fenced_json() {
        let parsed = parse_change_summary(
            "```json\n{\"title\": \"Add retry\", \"summary\": \"Retries flaky calls\", \"changes\": [\"src/retry.rs\", \" \"]}\n```",
        );
        assert_eq!(
            parsed,
            ParsedChangeSummary::Structured(ChangeSummary {
                title: "Add retry".to_string(),
                summary: "Retries flaky calls".to_string(),
                changes: vec!["src/retry.rs".to_string()],
            })
        );
        assert_eq!(parsed.title(), Some("Add retry"));
    }

    #[test]
    fn regression_parse_change_summary_falls_back_to_raw_lines() {
        let parsed = parse_change_summary("{ title: broken\n- updated parser\n* added tests }");
        assert_eq!(parsed.title(), None);
        assert_eq!(
            parsed.changes(),
            &[
                "{ title: broken".to_string(),
                "updated parser".to_string(),
                "added tests }".to_string()
            ]
        );
    }
}
