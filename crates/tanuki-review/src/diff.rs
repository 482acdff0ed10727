use serde::Serialize;
use tanuki_gitlab::{DiffPosition, DiffRefs, MergeRequest, MergeRequestDiff};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffLineKind {
    Add,
    Delete,
    Context,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffLine {
    pub kind: DiffLineKind,
    pub content: String,
    pub old_line: Option<u64>,
    pub new_line: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedDiffFile {
    pub old_path: String,
    pub new_path: String,
    pub new_file: bool,
    pub renamed_file: bool,
    pub deleted_file: bool,
    pub lines: Vec<DiffLine>,
}

impl ParsedDiffFile {
    pub fn has_content(&self) -> bool {
        !self.lines.is_empty()
    }

    pub fn additions(&self) -> usize {
        self.count(DiffLineKind::Add)
    }

    pub fn deletions(&self) -> usize {
        self.count(DiffLineKind::Delete)
    }

    fn count(&self, kind: DiffLineKind) -> usize {
        self.lines.iter().filter(|line| line.kind == kind).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedDiff {
    pub diff_refs: Option<DiffRefs>,
    pub files: Vec<ParsedDiffFile>,
}

impl ParsedDiff {
    /// Rename-aware lookup: matches either the new or the old path.
    pub fn find_file(&self, path: &str) -> Option<&ParsedDiffFile> {
        let normalized = normalize_path(path);
        self.files
            .iter()
            .find(|file| file.new_path == normalized)
            .or_else(|| self.files.iter().find(|file| file.old_path == normalized))
    }

    pub fn additions(&self) -> usize {
        self.files.iter().map(ParsedDiffFile::additions).sum()
    }

    pub fn deletions(&self) -> usize {
        self.files.iter().map(ParsedDiffFile::deletions).sum()
    }
}

fn normalize_path(path: &str) -> &str {
    let path = path.trim().trim_matches('`');
    path.strip_prefix("./")
        .or_else(|| path.strip_prefix("a/"))
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}

/// Parses `@@ -a,b +c,d @@` into the starting old and new line numbers.
fn parse_hunk_header(line: &str) -> Option<(u64, u64)> {
    let rest = line.strip_prefix("@@ ")?;
    let (ranges, _) = rest.split_once(" @@")?;
    let (old, new) = ranges.split_once(' ')?;
    let start = |range: &str, sign: char| -> Option<u64> {
        range
            .strip_prefix(sign)?
            .split(',')
            .next()?
            .parse()
            .ok()
    };
    Some((start(old, '-')?, start(new, '+')?))
}

/// Parses the hunks of one file's unified diff into numbered lines.
pub fn parse_unified_diff(diff: &str) -> Vec<DiffLine> {
    let mut lines = Vec::new();
    let mut cursor: Option<(u64, u64)> = None;
    for raw in diff.lines() {
        if raw.starts_with("@@") {
            cursor = parse_hunk_header(raw);
            continue;
        }
        let Some((old_line, new_line)) = cursor.as_mut() else {
            continue;
        };
        if raw.starts_with('\\') {
            continue;
        }
        let (kind, content) = match raw.chars().next() {
            Some('+') => (DiffLineKind::Add, &raw[1..]),
            Some('-') => (DiffLineKind::Delete, &raw[1..]),
            Some(' ') => (DiffLineKind::Context, &raw[1..]),
            // blank context lines sometimes lose their leading space
            None => (DiffLineKind::Context, ""),
            Some(_) => continue,
        };
        let line = match kind {
            DiffLineKind::Add => {
                let line = DiffLine {
                    kind,
                    content: content.to_string(),
                    old_line: None,
                    new_line: Some(*new_line),
                };
                *new_line += 1;
                line
            }
            DiffLineKind::Delete => {
                let line = DiffLine {
                    kind,
                    content: content.to_string(),
                    old_line: Some(*old_line),
                    new_line: None,
                };
                *old_line += 1;
                line
            }
            DiffLineKind::Context => {
                let line = DiffLine {
                    kind,
                    content: content.to_string(),
                    old_line: Some(*old_line),
                    new_line: Some(*new_line),
                };
                *old_line += 1;
                *new_line += 1;
                line
            }
        };
        lines.push(line);
    }
    lines
}

pub fn parse_merge_request_diffs(
    diffs: &[MergeRequestDiff],
    merge_request: &MergeRequest,
) -> ParsedDiff {
    let files = diffs
        .iter()
        .map(|diff| ParsedDiffFile {
            old_path: diff.old_path.clone(),
            new_path: if diff.new_path.is_empty() {
                diff.old_path.clone()
            } else {
                diff.new_path.clone()
            },
            new_file: diff.new_file,
            renamed_file: diff.renamed_file || diff.old_path != diff.new_path,
            deleted_file: diff.deleted_file,
            lines: parse_unified_diff(&diff.diff),
        })
        .collect();
    ParsedDiff {
        diff_refs: merge_request.diff_refs.clone(),
        files,
    }
}

/// Lines a reviewer can anchor a note to: additions and context.
pub fn get_reviewable_lines(file: &ParsedDiffFile) -> Vec<&DiffLine> {
    file.lines
        .iter()
        .filter(|line| line.kind != DiffLineKind::Delete && line.new_line.is_some())
        .collect()
}

/// Narrows reviewable lines to ones with something to review.
pub fn filter_lines_needing_review<'a>(lines: &[&'a DiffLine]) -> Vec<&'a DiffLine> {
    lines
        .iter()
        .copied()
        .filter(|line| !line.content.trim().is_empty())
        .collect()
}

/// Builds the GitLab position descriptor for an inline note on `line`.
pub fn create_position(
    parsed: &ParsedDiff,
    file: &ParsedDiffFile,
    line: &DiffLine,
) -> Option<DiffPosition> {
    let refs = parsed.diff_refs.as_ref()?;
    let (old_line, new_line) = match line.kind {
        DiffLineKind::Add => (None, Some(line.new_line?)),
        DiffLineKind::Delete => (Some(line.old_line?), None),
        DiffLineKind::Context => (Some(line.old_line?), Some(line.new_line?)),
    };
    Some(DiffPosition {
        position_type: "text".to_string(),
        base_sha: refs.base_sha.clone(),
        start_sha: refs.start_sha.clone(),
        head_sha: refs.head_sha.clone(),
        old_path: file.old_path.clone(),
        new_path: file.new_path.clone(),
        old_line,
        new_line,
    })
}

/// Compact per-file listing of the lines needing review, numbered by new
/// line, for inclusion in a review prompt. Stops after `max_lines`.
pub fn render_reviewable_excerpt(parsed: &ParsedDiff, max_lines: usize) -> String {
    let mut out = String::new();
    let mut emitted = 0usize;
    for file in &parsed.files {
        if file.deleted_file {
            continue;
        }
        let reviewable = get_reviewable_lines(file);
        let lines = filter_lines_needing_review(&reviewable);
        if lines.is_empty() {
            continue;
        }
        out.push_str(&format!("### {}\n", file.new_path));
        for line in lines {
            if emitted >= max_lines {
                out.push_str("... (diff truncated)\n");
                return out;
            }
            let marker = if line.kind == DiffLineKind::Add { '+' } else { ' ' };
            out.push_str(&format!(
                "{:>5} {marker} {}\n",
                line.new_line.unwrap_or_default(),
                line.content
            ));
            emitted += 1;
        }
        out.push('\n');
    }
    out
}
