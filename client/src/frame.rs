//! Newline-delimited frame reassembly.
//!
//! The transport hands us arbitrary byte chunks: a frame can be split anywhere,
//! including inside a multi-byte UTF-8 sequence. Splitting happens on raw bytes
//! (`\n` never occurs inside a multi-byte sequence) and each complete line is
//! decoded once, so the emitted lines do not depend on chunk boundaries.

/// Upper bound for a single unterminated line held in the buffer.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("stream line exceeded maximum size ({limit} bytes)")]
    LineTooLong { limit: usize },
}

#[derive(Debug)]
pub struct StreamFrameReader {
    buffer: Vec<u8>,
    max_line_bytes: usize,
}

impl Default for StreamFrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamFrameReader {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(MAX_FRAME_BYTES)
    }

    #[must_use]
    pub fn with_limit(max_line_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line_bytes,
        }
    }

    /// Feed one chunk; returns every line it completed, in order.
    ///
    /// The trailing partial line stays buffered for the next chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, FrameError> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(rel) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + rel;
            lines.push(decode_line(&self.buffer[start..end]));
            start = end + 1;
        }
        self.buffer.drain(..start);

        if self.buffer.len() > self.max_line_bytes {
            return Err(FrameError::LineTooLong {
                limit: self.max_line_bytes,
            });
        }
        Ok(lines)
    }

    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// End of stream. An unterminated trailing frame is discarded, not delivered.
    pub fn finish(self) -> usize {
        let dropped = self.buffer.len();
        if dropped > 0 {
            tracing::debug!(dropped_bytes = dropped, "Discarding unterminated stream frame");
        }
        dropped
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Payload of a `data:` line. Any other line (blank, `event:`, comments) yields `None`.
#[must_use]
pub fn data_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}
