//! Response Framing
//!
//! The server answers every request with exactly one frame: a single line, or
//! a `START` line followed by any number of lines and a closing `END`.
//!
//! ## How the Parser Works
//!
//! The parser reads from a buffer and returns either:
//! - `Ok(Some((frame, consumed)))` - A complete frame, `consumed` bytes were used
//! - `Ok(None)` - Need more data, the frame is incomplete
//! - `Err(ParseError)` - Invalid data
//!
//! The connection appends network data to its buffer, calls `parse()`, and on
//! success advances the buffer by `consumed` bytes. An incomplete block is
//! re-scanned from its `START` line once more data arrives.

use crate::protocol::types::{token, Frame, LF};
use thiserror::Error;

/// Errors that can occur while framing responses.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Invalid UTF-8 in a response line
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// A single line exceeds the allowed size
    #[error("line too long: {size} bytes (max: {max})")]
    LineTooLong { size: usize, max: usize },

    /// A block holds more lines than allowed
    #[error("block too large: more than {max} lines")]
    BlockTooLarge { max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size of one response line (1 MB)
pub const MAX_LINE_SIZE: usize = 1024 * 1024;

/// Maximum number of lines in one block
pub const MAX_BLOCK_LINES: usize = 1_000_000;

/// Incremental frame parser.
#[derive(Debug, Clone)]
pub struct FrameParser {
    max_line_size: usize,
    max_block_lines: usize,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    /// Creates a parser with the default limits.
    pub fn new() -> Self {
        Self::with_limits(MAX_LINE_SIZE, MAX_BLOCK_LINES)
    }

    pub fn with_limits(max_line_size: usize, max_block_lines: usize) -> Self {
        Self {
            max_line_size,
            max_block_lines,
        }
    }

    /// Attempts to parse one frame from the front of `buf`.
    pub fn parse(&self, buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        let (first, mut consumed) = match self.next_line(buf)? {
            Some(line) => line,
            None => return Ok(None),
        };

        if first != token::BLOCK_START {
            return Ok(Some((Frame::Line(first), consumed)));
        }

        let mut lines = Vec::new();
        loop {
            let (line, used) = match self.next_line(&buf[consumed..])? {
                Some(line) => line,
                None => return Ok(None),
            };
            consumed += used;

            if line == token::BLOCK_END {
                return Ok(Some((Frame::Block(lines), consumed)));
            }
            if lines.len() >= self.max_block_lines {
                return Err(ParseError::BlockTooLarge {
                    max: self.max_block_lines,
                });
            }
            lines.push(line);
        }
    }

    /// Reads one line, stripping `\n` or `\r\n`.
    fn next_line(&self, buf: &[u8]) -> ParseResult<Option<(String, usize)>> {
        let pos = match find_lf(buf) {
            Some(pos) => pos,
            None if buf.len() > self.max_line_size => {
                return Err(ParseError::LineTooLong {
                    size: buf.len(),
                    max: self.max_line_size,
                })
            }
            None => return Ok(None),
        };

        if pos > self.max_line_size {
            return Err(ParseError::LineTooLong {
                size: pos,
                max: self.max_line_size,
            });
        }

        let end = if pos > 0 && buf[pos - 1] == b'\r' {
            pos - 1
        } else {
            pos
        };
        let line =
            std::str::from_utf8(&buf[..end]).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

        Ok(Some((line.to_string(), pos + 1)))
    }
}

/// Finds the position of the next `\n`.
#[inline]
fn find_lf(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == LF)
}

/// Helper function to parse a single frame with the default limits.
pub fn parse_frame(buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
    FrameParser::new().parse(buf)
}
