//! Char-boundary safe text helpers.

/// Splits `text` after `index` chars, never cutting a UTF-8 sequence.
pub fn split_at_char_index(text: &str, index: usize) -> (String, String) {
    match text.char_indices().nth(index) {
        Some((byte_index, _)) => (text[..byte_index].to_string(), text[byte_index..].to_string()),
        None => (text.to_string(), String::new()),
    }
}

/// Truncates `text` to at most `max_chars` chars, appending `...` when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let (head, _) = split_at_char_index(text, max_chars);
    format!("{head}...")
}

/// Single-line, bounded rendering of process output for logs and comments.
pub fn truncate_for_log(text: &str) -> String {
    const MAX_CHARS: usize = 240;
    truncate_chars(text.trim(), MAX_CHARS)
}
