//! Newline-delimited JSON framing

use crate::error::{ProtocolError, ProtocolResult};
use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Maximum message size (1MB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Incremental frame parser for byte streams
pub struct Parser {
    buffer: BytesMut,
    /// Bytes buffered after the last newline
    tail: usize,
}

impl Parser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            tail: 0,
        }
    }

    /// Add data to the parser buffer
    ///
    /// Only the unterminated tail counts against the frame limit; complete
    /// lines are checked one by one in [`Parser::parse`].
    pub fn feed(&mut self, data: &[u8]) -> ProtocolResult<()> {
        let tail = match data.iter().rposition(|&b| b == b'\n') {
            Some(pos) => data.len() - pos - 1,
            None => self.tail + data.len(),
        };

        // The terminating newline still has to fit
        if tail >= MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: tail,
                max: MAX_MESSAGE_SIZE,
            });
        }

        self.buffer.extend_from_slice(data);
        self.tail = tail;
        Ok(())
    }

    /// Try to parse a complete message from the buffer
    ///
    /// Blank lines are skipped. Returns `Ok(None)` until a full line arrived.
    pub fn parse<T: DeserializeOwned>(&mut self) -> ProtocolResult<Option<T>> {
        loop {
            let line_end = match self.buffer.iter().position(|&b| b == b'\n') {
                Some(pos) => pos,
                None => return Ok(None),
            };

            let line = self.buffer.split_to(line_end + 1);
            if line.len() > MAX_MESSAGE_SIZE {
                return Err(ProtocolError::MessageTooLarge {
                    size: line.len(),
                    max: MAX_MESSAGE_SIZE,
                });
            }

            let line = std::str::from_utf8(&line).map_err(|_| ProtocolError::InvalidUtf8)?;
            let line = line.trim();

            if line.is_empty() {
                continue;
            }

            return decode(line).map(Some);
        }
    }

    /// Bytes buffered but not yet parsed
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a single frame
pub fn decode<T: DeserializeOwned>(frame: &str) -> ProtocolResult<T> {
    serde_json::from_str(frame).map_err(|e| ProtocolError::InvalidMessage(e.to_string()))
}

/// Size of `msg` as an encoded frame, newline included
///
/// Fails with `MessageTooLarge` when a [`Parser`] on the other end would
/// refuse the frame.
pub fn check_frame_size<T: Serialize>(msg: &T) -> ProtocolResult<usize> {
    let json = serde_json::to_vec(msg).map_err(|e| ProtocolError::InvalidMessage(e.to_string()))?;
    let size = json.len() + 1;

    if size > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(size)
}

/// Encode a message as one newline-terminated frame
pub fn encode<T: Serialize>(msg: &T) -> ProtocolResult<BytesMut> {
    let json = serde_json::to_vec(msg).map_err(|e| ProtocolError::InvalidMessage(e.to_string()))?;

    let mut buf = BytesMut::with_capacity(json.len() + 1);
    buf.put_slice(&json);
    buf.put_u8(b'\n');
    Ok(buf)
}
