use super::{FENCE_CLOSE, FENCE_OPEN, TAG_CLOSE, TAG_OPEN, strip_leading_labels};
use std::borrow::Cow;

/// Where the stream currently is with respect to reasoning blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SanitizerState {
    #[default]
    Clean,
    /// After `<think`, waiting for `</think>`.
    InsideTag,
    /// After ```` ```think ````, waiting for the closing fence.
    InsideFence,
}

impl SanitizerState {
    fn close_marker(self) -> Option<&'static str> {
        match self {
            SanitizerState::Clean => None,
            SanitizerState::InsideTag => Some(TAG_CLOSE),
            SanitizerState::InsideFence => Some(FENCE_CLOSE),
        }
    }
}

/// Outcome of scanning one piece of text.
#[derive(Debug, PartialEq, Eq)]
pub struct Step<'a> {
    /// Text that is safe to forward now.
    pub emit: String,
    pub state: SanitizerState,
    /// Tail that could be the start of a marker, or a closing fence still
    /// waiting for its line break. It must be prepended to the next delta; it
    /// is never longer than the longest marker minus one byte.
    pub carry: &'a str,
}

/// Runs the block state machine over `text`, starting in `state`.
///
/// Text before an opening marker is emitted eagerly, everything from an
/// opening marker through its closing marker is dropped. Several blocks may
/// open and close within one call.
pub fn sanitize_delta(state: SanitizerState, text: &str) -> Step<'_> {
    // ASCII lowering keeps byte offsets identical to `text`.
    let lower = text.to_ascii_lowercase();
    let mut state = state;
    let mut emit = String::new();
    let mut pos = 0;

    loop {
        let rest = &lower[pos..];
        match state.close_marker() {
            None => {
                let tag = rest
                    .find(TAG_OPEN)
                    .map(|idx| (idx, TAG_OPEN, SanitizerState::InsideTag));
                let fence = rest
                    .find(FENCE_OPEN)
                    .map(|idx| (idx, FENCE_OPEN, SanitizerState::InsideFence));
                let next = match (tag, fence) {
                    (Some(tag), Some(fence)) => Some(if fence.0 < tag.0 { fence } else { tag }),
                    (tag, fence) => tag.or(fence),
                };
                match next {
                    Some((idx, marker, inside)) => {
                        emit.push_str(&text[pos..pos + idx]);
                        pos += idx + marker.len();
                        state = inside;
                    }
                    None => {
                        let end = text.len() - partial_marker_len(rest, &[TAG_OPEN, FENCE_OPEN]);
                        emit.push_str(&text[pos..end]);
                        return Step {
                            emit,
                            state,
                            carry: &text[end..],
                        };
                    }
                }
            }
            Some(close) => match rest.find(close) {
                Some(idx) if state == SanitizerState::InsideFence => {
                    let after = pos + idx + close.len();
                    let tail = &text[after..];
                    // A line break right after the closing fence belongs to
                    // the block; hold the fence until the next byte shows.
                    if tail.is_empty() || tail == "\r" {
                        return Step {
                            emit,
                            state,
                            carry: &text[pos + idx..],
                        };
                    }
                    pos = after + line_break_len(tail);
                    state = SanitizerState::Clean;
                }
                Some(idx) => {
                    pos += idx + close.len();
                    state = SanitizerState::Clean;
                }
                None => {
                    let end = text.len() - partial_marker_len(rest, &[close]);
                    return Step {
                        emit,
                        state,
                        carry: &text[end..],
                    };
                }
            },
        }
    }
}

fn line_break_len(text: &str) -> usize {
    if text.starts_with("\r\n") {
        2
    } else if text.starts_with('\n') {
        1
    } else {
        0
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of one of
/// the markers.
fn partial_marker_len(text: &str, markers: &[&str]) -> usize {
    let bytes = text.as_bytes();
    markers
        .iter()
        .filter_map(|marker| {
            let marker = marker.as_bytes();
            (1..marker.len().min(bytes.len() + 1))
                .rev()
                .find(|&k| marker.starts_with(&bytes[bytes.len() - k..]))
        })
        .max()
        .unwrap_or(0)
}

/// Per-request streaming sanitizer.
///
/// Holds the block state, the carried marker prefix, and whether anything
/// visible has been forwarded yet. Reasoning label lines are only dropped
/// before the first visible text; a label split across two deltas is not
/// recognised.
#[derive(Debug)]
pub struct StreamSanitizer {
    state: SanitizerState,
    carry: String,
    at_head: bool,
    in_label_line: bool,
}

impl Default for StreamSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSanitizer {
    pub fn new() -> Self {
        Self {
            state: SanitizerState::Clean,
            carry: String::new(),
            at_head: true,
            in_label_line: false,
        }
    }

    pub fn state(&self) -> SanitizerState {
        self.state
    }

    /// Feeds one upstream delta and returns what may be forwarded now.
    pub fn push(&mut self, delta: &str) -> String {
        let text: Cow<'_, str> = if self.carry.is_empty() {
            Cow::Borrowed(delta)
        } else {
            let mut joined = std::mem::take(&mut self.carry);
            joined.push_str(delta);
            Cow::Owned(joined)
        };
        let step = sanitize_delta(self.state, &text);
        self.state = step.state;
        self.carry = step.carry.to_string();
        self.strip_head(step.emit)
    }

    /// Ends the stream. A carried partial opening marker was plain text after
    /// all; anything inside an unterminated block stays suppressed.
    pub fn finish(&mut self) -> String {
        let carry = std::mem::take(&mut self.carry);
        match self.state {
            SanitizerState::Clean => self.strip_head(carry),
            SanitizerState::InsideTag | SanitizerState::InsideFence => String::new(),
        }
    }

    fn strip_head(&mut self, emit: String) -> String {
        if !self.at_head || emit.is_empty() {
            return emit;
        }
        let mut text = emit.as_str();
        if self.in_label_line {
            match text.find('\n') {
                Some(idx) => {
                    text = &text[idx + 1..];
                    self.in_label_line = false;
                }
                None => return String::new(),
            }
        }
        let strip = strip_leading_labels(text);
        self.in_label_line = strip.open_line;
        if !strip.rest.trim().is_empty() {
            self.at_head = false;
        }
        strip.rest.to_string()
    }
}
