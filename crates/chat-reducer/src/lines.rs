//! Chunk-to-line splitting and the async drain loop.
//!
//! Transports deliver bytes at arbitrary boundaries. [`LineBuffer`] holds the
//! unterminated tail between chunks so the decoder only ever sees complete
//! lines.

use std::pin::pin;

use futures_util::{Stream, StreamExt};
use tracing::debug;

use crate::reducer::TurnReducer;

/// Longest line [`LineBuffer`] keeps by default, in bytes.
pub const DEFAULT_MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    /// Prefix of `pending` already searched for a newline.
    scanned: usize,
    max_line_bytes: usize,
    /// Inside an overlong line; skip bytes up to the next newline.
    discarding: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines longer than `max_line_bytes` are dropped whole.
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            max_line_bytes,
            discarding: false,
        }
    }

    /// Append a chunk and return every line it completed, without the
    /// trailing newline.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.pending[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            if self.discarding {
                self.discarding = false;
            } else if end - consumed > self.max_line_bytes {
                self.note_overlong();
            } else {
                lines.push(String::from_utf8_lossy(&self.pending[consumed..end]).into_owned());
            }
            consumed = end + 1;
            self.scanned = consumed;
        }
        self.pending.drain(..consumed);

        if !self.discarding && self.pending.len() > self.max_line_bytes {
            self.note_overlong();
            self.discarding = true;
        }
        if self.discarding {
            self.pending.clear();
        }
        self.scanned = self.pending.len();
        lines
    }

    fn note_overlong(&self) {
        debug!(limit = self.max_line_bytes, "overlong line dropped");
    }

    /// Flush an unterminated final line, if any.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) || self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// How a drained stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// A terminal event sealed the turn.
    Sealed,
    /// The transport closed first. Not an error: the turn was abandoned.
    Abandoned,
}

/// Feed a byte stream through a [`LineBuffer`] into `reducer` until the turn
/// seals or the stream ends. Transport errors are returned as-is; the state
/// accumulated so far stays in the reducer.
pub async fn drain<S, B, E>(stream: S, reducer: &mut TurnReducer) -> Result<DrainOutcome, E>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    let mut stream = pin!(stream);
    let mut buffer = LineBuffer::new();
    reducer.start();

    while let Some(chunk) = stream.next().await {
        for line in buffer.push(chunk?.as_ref()) {
            reducer.apply_line(&line);
        }
        if reducer.is_sealed() {
            return Ok(DrainOutcome::Sealed);
        }
    }
    if let Some(line) = buffer.finish() {
        reducer.apply_line(&line);
    }

    if reducer.is_sealed() {
        Ok(DrainOutcome::Sealed)
    } else {
        debug!(
            events = reducer.state().event_count,
            "stream ended without a terminal event"
        );
        Ok(DrainOutcome::Abandoned)
    }
}
