//! Removal of model "thinking" content from generated text.
//!
//! Two entry points share the marker vocabulary below: [`sanitize_text`] for a
//! complete answer and [`StreamSanitizer`] for an incremental token stream.

pub mod batch;
pub mod streaming;

pub use batch::sanitize_text;
pub use streaming::{SanitizerState, Step, StreamSanitizer, sanitize_delta};

use regex::Regex;
use std::sync::LazyLock;

pub(crate) const TAG_OPEN: &str = "<think";
pub(crate) const TAG_CLOSE: &str = "</think>";
pub(crate) const FENCE_OPEN: &str = "```think";
pub(crate) const FENCE_CLOSE: &str = "```";

static REASONING_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\A\s*(?:thinking|thought|reasoning)\s*:[^\n]*(?:\n|\z)")
        .expect("reasoning label pattern is valid")
});

/// Result of stripping the leading run of reasoning label lines.
#[derive(Debug, PartialEq)]
pub(crate) struct LabelStrip<'a> {
    pub rest: &'a str,
    /// The last dropped label line had no line break yet.
    pub open_line: bool,
}

/// Drops leading `Thinking:` / `Thought:` / `Reasoning:` lines. Labels after
/// the first ordinary line are left alone.
pub(crate) fn strip_leading_labels(text: &str) -> LabelStrip<'_> {
    let mut rest = text;
    let mut open_line = false;
    while let Some(m) = REASONING_LABEL.find(rest) {
        open_line = !m.as_str().ends_with('\n');
        rest = &rest[m.end()..];
        if rest.is_empty() {
            break;
        }
    }
    LabelStrip { rest, open_line }
}

/// Byte offset of `needle` in `haystack`, ignoring ASCII case. `needle` must be
/// lowercase ASCII.
pub(crate) fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(needle)
}
