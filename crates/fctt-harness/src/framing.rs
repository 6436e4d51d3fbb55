//! Length-prefixed JSON frames.
//!
//! A frame is a 4-byte native-endian unsigned length followed by that many
//! bytes of UTF-8 JSON. The controller's control socket, its client socket and
//! the listener's notification socket all share this framing.

use std::io::{self, Read, Write};

use serde_json::Value;
use thiserror::Error;

/// Width of the length prefix in bytes.
pub const PREFIX_LEN: usize = 4;

/// Largest payload accepted from a peer.
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Errors raised while reading or writing frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The underlying stream failed.
    #[error("frame i/o failed: {0}")]
    Io(#[from] io::Error),
    /// The peer announced a payload above [`MAX_FRAME_LEN`].
    #[error("frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    Oversized {
        /// Announced payload length.
        len: usize,
    },
    /// The stream ended inside a frame.
    #[error("stream closed after {received} of {expected} bytes")]
    Truncated {
        /// Bytes the frame required.
        expected: usize,
        /// Bytes received before the stream closed.
        received: usize,
    },
    /// The payload was not valid JSON.
    #[error("frame payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl FrameError {
    /// Returns `true` when the failure is a socket read or write timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Io(error)
                if matches!(error.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
        )
    }
}

/// Writes one frame carrying `payload`.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| FrameError::Oversized { len: payload.len() })?;
    let mut frame = Vec::with_capacity(PREFIX_LEN + payload.len());
    frame.extend_from_slice(&len.to_ne_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Serialises `value` compactly and writes it as one frame.
pub fn write_json<W: Write>(writer: &mut W, value: &Value) -> Result<(), FrameError> {
    let payload = serde_json::to_vec(value)?;
    write_frame(writer, &payload)
}

/// Reads one frame.
///
/// Returns `Ok(None)` when the stream closes cleanly on a frame boundary.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError> {
    let mut prefix = [0_u8; PREFIX_LEN];
    let received = fill(reader, &mut prefix)?;
    if received == 0 {
        return Ok(None);
    }
    if received < PREFIX_LEN {
        return Err(FrameError::Truncated {
            expected: PREFIX_LEN,
            received,
        });
    }
    let len = u32::from_ne_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::Oversized { len });
    }
    let mut payload = vec![0_u8; len];
    let body = fill(reader, &mut payload)?;
    if body < len {
        return Err(FrameError::Truncated {
            expected: len,
            received: body,
        });
    }
    Ok(Some(payload))
}

/// Reads one frame and parses it as JSON.
pub fn read_json<R: Read>(reader: &mut R) -> Result<Option<Value>, FrameError> {
    match read_frame(reader)? {
        Some(payload) => Ok(Some(serde_json::from_slice(&payload)?)),
        None => Ok(None),
    }
}

/// Reads until `buffer` is full or the stream ends, looping on short reads.
fn fill<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let Some(rest) = buffer.get_mut(filled..) else {
            break;
        };
        match reader.read(rest) {
            Ok(0) => break,
            Ok(count) => filled += count,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
    Ok(filled)
}
