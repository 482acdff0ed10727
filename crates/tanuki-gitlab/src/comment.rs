use tanuki_core::split_at_char_index;

/// Invisible footer carried by every comment the engine writes.
pub const RESPONSE_MARKER: &str = "<!-- tanuki-response -->";
/// GitLab rejects note bodies above this many characters.
pub const MAX_COMMENT_CHARS: usize = 1_000_000;
const TRUNCATION_NOTICE: &str = "\n\n_(output truncated: comment size limit reached)_";

pub fn contains_response_marker(body: &str) -> bool {
    body.contains(RESPONSE_MARKER)
}

/// Appends exactly one trailing [`RESPONSE_MARKER`], replacing any markers
/// already present, and caps the body at [`MAX_COMMENT_CHARS`].
pub fn format_comment_body(body: &str) -> String {
    format_comment_body_with_limit(body, MAX_COMMENT_CHARS)
}

fn format_comment_body_with_limit(body: &str, max_chars: usize) -> String {
    let content = body.replace(RESPONSE_MARKER, "");
    let content = content.trim_end();
    let footer = format!("\n\n{RESPONSE_MARKER}");
    let footer_len = footer.chars().count();
    let content_len = content.chars().count();
    if content_len + footer_len <= max_chars {
        return format!("{content}{footer}");
    }

    let notice_len = TRUNCATION_NOTICE.chars().count();
    let keep = max_chars.saturating_sub(footer_len + notice_len);
    let (kept, _) = split_at_char_index(content, keep);
    format!("{}{TRUNCATION_NOTICE}{footer}", kept.trim_end())
}

#[cfg(test)]
mod tests {
    use super::{
        contains_response_marker, format_comment_body, format_comment_body_with_limit,
        RESPONSE_MARKER, TRUNCATION_NOTICE,
    };

    #[test]
    fn unit_format_comment_body_appends_single_marker() {
        let formatted = format_comment_body("Done.\n");
        assert_eq!(formatted, format!("Done.\n\n{RESPONSE_MARKER}"));
        assert!(contains_response_marker(&formatted));
    }

    #[test]
    fn functional_format_comment_body_is_idempotent() {
        let once = format_comment_body(&format!("{RESPONSE_MARKER} hi {RESPONSE_MARKER}"));
        let twice = format_comment_body(&once);
        assert_eq!(once, twice);
        assert_eq!(twice.matches(RESPONSE_MARKER).count(), 1);
    }

    #[test]
    fn regression_truncation_keeps_trailing_marker_within_limit() {
        let body = "x".repeat(500);
        let formatted = format_comment_body_with_limit(&body, 200);
        assert_eq!(formatted.chars().count(), 200);
        assert!(formatted.ends_with(RESPONSE_MARKER));
        assert!(formatted.contains(TRUNCATION_NOTICE.trim()));
        let again = format_comment_body_with_limit(&formatted, 200);
        assert_eq!(again, formatted);
    }

    #[test]
    fn regression_truncation_respects_multibyte_boundaries() {
        let body = "é".repeat(300);
        let formatted = format_comment_body_with_limit(&body, 150);
        assert!(formatted.chars().count() <= 150);
        assert!(formatted.ends_with(RESPONSE_MARKER));
    }
}
