//! Turns raw file text into a [`RecordSet`].

use crate::models::RecordSet;

pub const COMMENT_MARKER: char = '#';

/// Splits `content` into lines, trims each one and keeps the non-blank,
/// non-comment lines verbatim. Duplicates collapse through set semantics.
pub fn parse(content: &str) -> RecordSet {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(COMMENT_MARKER))
        .collect()
}
