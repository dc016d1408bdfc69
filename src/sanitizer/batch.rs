use super::{find_ignore_ascii_case, strip_leading_labels};
use regex::Regex;
use std::sync::LazyLock;

const ANSWER_MARKER: &str = "answer:";

static THINK_TAG_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<\s*think[^>]*>.*?<\s*/\s*think\s*>").expect("think tag pattern is valid")
});

// The line break after a closing fence goes with the block.
static THINK_FENCE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```(?:[a-z]+)?\s*think.*?```(?:\r?\n)?")
        .expect("think fence pattern is valid")
});

static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("newline pattern is valid"));

/// Cleans a complete model answer.
///
/// Applied in order: `<think>` blocks, fenced `think` blocks, the leading run
/// of reasoning label lines, everything up to an `Answer:` marker, then runs
/// of three or more newlines collapse to two and the result is trimmed.
pub fn sanitize_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let out = THINK_TAG_BLOCK.replace_all(text, "");
    let out = THINK_FENCE_BLOCK.replace_all(&out, "");
    let out = strip_leading_labels(&out).rest;
    let out = match find_ignore_ascii_case(out, ANSWER_MARKER) {
        Some(idx) => &out[idx + ANSWER_MARKER.len()..],
        None => out,
    };
    EXCESS_NEWLINES.replace_all(out, "\n\n").trim().to_string()
}
