//! # Line Framer
//!
//! Reassembles raw byte chunks into terminator-delimited logical lines,
//! independent of how many bytes arrive per read. One framer owns one
//! accumulator and serves exactly one session.
//!
//! Two segmentation regimes exist because the two links deliver bytes
//! differently:
//!
//! - **Stream** (TCP): the link is a continuous byte stream, so the framer
//!   scans the accumulator for every terminator occurrence and can emit
//!   several lines from a single chunk.
//! - **Burst** (serial): the driver delivers discrete notification bursts, so
//!   the framer emits one line only when the entire accumulator ends with the
//!   terminator, then clears it. Interior terminator bytes inside a burst stay
//!   part of that single line.
//!
//! The accumulator is unbounded: a device streaming data with no terminator
//! grows it without truncation. That is an accepted limitation of this layer,
//! not a silent cut-off.

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use crate::DEFAULT_TERMINATOR;

/// How arriving bytes are segmented into lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingMode {
    /// Continuous byte stream; multi-line extraction per feed (TCP links)
    Stream,
    /// Discrete notification bursts; whole-buffer terminator check (serial)
    Burst,
}

/// Classification of a completed line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineKind {
    /// Ordinary reader output
    Data,
    /// The line contains the literal substring `ERROR`
    Error,
}

/// One completed logical line
///
/// `text` is the inter-terminator substring with trailing terminator
/// characters stripped. Classification as [`LineKind::Error`] wins over the
/// generic data path whenever `ERROR` appears anywhere in the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedLine {
    pub text: String,
    pub kind: LineKind,
}

impl DecodedLine {
    /// True when this line was classified as an error response
    pub fn is_error(&self) -> bool {
        self.kind == LineKind::Error
    }
}

/// Terminator-based line state machine
pub struct LineFramer {
    terminator: Vec<u8>,
    /// Characters that count as terminator residue when trimming line ends
    terminator_chars: Vec<char>,
    mode: FramingMode,
    buffer: BytesMut,
}

impl LineFramer {
    /// Create a framer for the given terminator byte sequence
    pub fn new(terminator: &[u8], mode: FramingMode) -> Self {
        let terminator_chars = String::from_utf8_lossy(terminator).chars().collect();
        Self {
            terminator: terminator.to_vec(),
            terminator_chars,
            mode,
            buffer: BytesMut::new(),
        }
    }

    /// Create a framer with the default carriage-return terminator
    pub fn with_default_terminator(mode: FramingMode) -> Self {
        Self::new(DEFAULT_TERMINATOR.as_bytes(), mode)
    }

    /// Append a chunk and extract whatever lines completed
    ///
    /// Stream mode may return several lines; Burst mode returns at most one.
    /// Empty and whitespace-only candidates are suppressed and produce no
    /// output at all.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<DecodedLine> {
        self.buffer.extend_from_slice(bytes);
        match self.mode {
            FramingMode::Stream => self.extract_stream_lines(),
            FramingMode::Burst => self.extract_burst_line(),
        }
    }

    /// Number of bytes buffered and still waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partially accumulated input
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn extract_stream_lines(&mut self) -> Vec<DecodedLine> {
        let mut lines = Vec::new();
        while let Some(pos) = find_terminator(&self.buffer, &self.terminator) {
            let consumed = self.buffer.split_to(pos + self.terminator.len());
            if let Some(line) = self.complete_line(&consumed[..pos]) {
                lines.push(line);
            }
        }
        lines
    }

    fn extract_burst_line(&mut self) -> Vec<DecodedLine> {
        if self.terminator.is_empty() || !self.buffer.ends_with(&self.terminator) {
            return Vec::new();
        }
        let burst = self.buffer.split();
        self.complete_line(&burst).into_iter().collect()
    }

    /// Trim, suppress, classify
    fn complete_line(&self, candidate: &[u8]) -> Option<DecodedLine> {
        let text = String::from_utf8_lossy(candidate);
        let trimmed = text.trim_end_matches(|c| self.terminator_chars.contains(&c));
        if trimmed.trim().is_empty() {
            return None;
        }
        let kind = if trimmed.contains("ERROR") {
            LineKind::Error
        } else {
            LineKind::Data
        };
        Some(DecodedLine {
            text: trimmed.to_string(),
            kind,
        })
    }
}

/// First occurrence of `needle` in `haystack`
fn find_terminator(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}
