//! Foundational low-level utilities shared across tanuki crates.
//!
//! Provides the atomic file-write helper used by the session store, a
//! millisecond clock, and char-boundary safe text truncation used when
//! rendering comments and log summaries.

pub mod atomic_io;
pub mod text;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use text::{split_at_char_index, truncate_chars, truncate_for_log};
pub use time_utils::current_unix_timestamp_ms;
