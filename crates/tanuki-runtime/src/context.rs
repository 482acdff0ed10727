use std::collections::VecDeque;

use tanuki_gitlab::{MergeRequestDiff, Noteable};

#[derive(Debug, Clone)]
/// Per-event state. Created at the top of `process_event`, passed by
/// `&mut` through the event's call tree and dropped when processing ends.
pub struct EventContext {
    pub project_id: u64,
    pub noteable: Option<Noteable>,
    /// Top-level progress/result comment, when replies are not threaded.
    pub current_comment_id: Option<u64>,
    pub discussion_id: Option<String>,
    /// Our reply note inside `discussion_id`.
    pub discussion_note_id: Option<u64>,
    pub discussion_resolvable: bool,
    pub discussion_reply_succeeded: bool,
    pub executor_name: String,
    pub progress_messages: VecDeque<String>,
    /// Rendered discussion history, fetched at most once per event.
    pub thread_context: Option<String>,
    /// Merge request diffs, fetched at most once per event.
    pub merge_request_diffs: Option<Vec<MergeRequestDiff>>,
    /// Guards the one-shot retry on a stale provider session.
    pub retry_attempted: bool,
    /// Non-fatal collaborator failures surfaced in the final comment.
    pub warnings: Vec<String>,
}

impl EventContext {
    pub fn new(project_id: u64) -> Self {
        Self {
            project_id,
            noteable: None,
            current_comment_id: None,
            discussion_id: None,
            discussion_note_id: None,
            discussion_resolvable: false,
            discussion_reply_succeeded: false,
            executor_name: String::new(),
            progress_messages: VecDeque::new(),
            thread_context: None,
            merge_request_diffs: None,
            retry_attempted: false,
            warnings: Vec::new(),
        }
    }

    /// Keeps only the newest `max_lines` progress lines. Consecutive
    /// duplicates are collapsed.
    pub fn push_progress(&mut self, line: String, max_lines: usize) -> bool {
        if self.progress_messages.back() == Some(&line) {
            return false;
        }
        self.progress_messages.push_back(line);
        while self.progress_messages.len() > max_lines.max(1) {
            self.progress_messages.pop_front();
        }
        true
    }

    pub fn clear_discussion(&mut self) {
        self.discussion_id = None;
        self.discussion_note_id = None;
        self.discussion_resolvable = false;
        self.discussion_reply_succeeded = false;
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}
