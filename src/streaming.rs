//! Turns an upstream NDJSON byte stream into sanitized outbound events.

use crate::io_struct::{OutboundEvent, StreamFrame};
use crate::sanitizer::StreamSanitizer;
use crate::upstream::UpstreamError;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::collections::VecDeque;

/// Longest upstream line accepted before the stream is abandoned.
pub const MAX_LINE_BYTES: usize = 1 << 20;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("Invalid response from Ollama (line exceeds {limit} bytes)")]
pub struct LineTooLong {
    pub limit: usize,
}

/// Accumulates body chunks and hands out complete lines.
///
/// Splitting happens on raw bytes, so a UTF-8 sequence cut across two chunks is
/// decoded only once its line is complete. Bytes already searched for a line
/// break are not searched again.
#[derive(Debug)]
pub struct LineBuffer {
    buf: BytesMut,
    scanned: usize,
    limit: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            scanned: 0,
            limit,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete line without its terminator (`\n` or `\r\n`).
    ///
    /// Fails once the unterminated tail grows past the limit.
    pub fn next_line(&mut self) -> Result<Option<String>, LineTooLong> {
        match self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
            Some(offset) => {
                let line = self.buf.split_to(self.scanned + offset + 1);
                self.scanned = 0;
                Ok(Some(decode_line(&line)))
            }
            None if self.buf.len() > self.limit => Err(LineTooLong { limit: self.limit }),
            None => {
                self.scanned = self.buf.len();
                Ok(None)
            }
        }
    }

    /// Whatever is left after the last line break.
    pub fn take_remainder(&mut self) -> Option<String> {
        self.scanned = 0;
        if self.buf.is_empty() {
            return None;
        }
        let rest = self.buf.split();
        Some(decode_line(&rest))
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.scanned = 0;
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

struct Pipeline<S> {
    upstream: S,
    lines: LineBuffer,
    sanitizer: StreamSanitizer,
    pending: VecDeque<OutboundEvent>,
    finished: bool,
}

impl<S> Pipeline<S> {
    fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let Some(frame) = StreamFrame::parse(line) else {
            log::debug!("Dropping malformed upstream frame: {}", line);
            return;
        };
        if let Some(delta) = frame.response {
            let clean = self.sanitizer.push(&delta);
            if !clean.is_empty() {
                self.pending.push_back(OutboundEvent::delta(clean));
            }
        }
        if frame.done {
            self.complete();
        }
    }

    /// Terminal success: flush the sanitizer, send `done`, ignore the rest.
    fn complete(&mut self) {
        let tail = self.sanitizer.finish();
        if !tail.is_empty() {
            self.pending.push_back(OutboundEvent::delta(tail));
        }
        self.pending.push_back(OutboundEvent::done());
        self.lines.clear();
        self.finished = true;
    }

    fn fail(&mut self, err: impl std::fmt::Display) {
        log::warn!("Upstream stream failed: {}", err);
        self.pending.push_back(OutboundEvent::error(err.to_string()));
        self.lines.clear();
        self.finished = true;
    }
}

/// Sanitized events for one streaming request.
///
/// Deltas keep upstream order and exactly one terminal event (`done` or
/// `error`) ends the stream. A `done` frame stops processing immediately, even
/// with more lines buffered behind it; an upstream body that simply ends is
/// treated as done. Dropping the returned stream drops the upstream body.
pub fn sanitized_events<S>(upstream: S) -> impl Stream<Item = OutboundEvent>
where
    S: Stream<Item = Result<Bytes, UpstreamError>> + Unpin,
{
    let pipeline = Pipeline {
        upstream,
        lines: LineBuffer::new(),
        sanitizer: StreamSanitizer::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures_util::stream::unfold(pipeline, |mut p| async move {
        loop {
            if let Some(event) = p.pending.pop_front() {
                return Some((event, p));
            }
            if p.finished {
                return None;
            }
            match p.lines.next_line() {
                Ok(Some(line)) => {
                    p.handle_line(&line);
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    p.fail(err);
                    continue;
                }
            }
            match p.upstream.next().await {
                Some(Ok(chunk)) => p.lines.push(&chunk),
                Some(Err(err)) => p.fail(err),
                None => {
                    if let Some(line) = p.lines.take_remainder() {
                        p.handle_line(&line);
                    }
                    if !p.finished {
                        p.complete();
                    }
                }
            }
        }
    })
}
