//! Inbound payload acquisition with a fixed-capacity buffer.
//!
//! A PUBLISH body is read straight from the transport into a
//! [`PayloadBuffer`]. A body larger than the buffer is still consumed in full,
//! so the stream stays framed for the next packet, but its bytes are thrown
//! away and [`AcquireError::Oversized`] is reported instead.

use core::fmt::Write as _;

use heapless::String;
use thiserror::Error;

use crate::network::Read;
use crate::network::error::Error;

/// Capacity of the string produced by [`display_payload`].
pub const DISPLAY_LIMIT: usize = 128;

/// Room kept free for the truncation marker, e.g. `...(+18446744073709551615 bytes)`.
const MARKER_RESERVE: usize = 32;

/// Why a payload could not be handed to the application.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum AcquireError {
    /// The body was drained from the stream but did not fit the buffer.
    #[error("payload of {declared} bytes exceeds the {capacity}-byte buffer")]
    Oversized {
        /// Declared length of the body.
        declared: usize,
        /// Capacity of the payload buffer.
        capacity: usize,
    },
    /// The transport failed or ended mid-body; framing can no longer be trusted.
    #[error("payload read failed: {0}")]
    Io(Error),
}

/// Holds at most one inbound message body.
///
/// Contents are only exposed after a complete, successful acquisition; a
/// partial or oversized read leaves the buffer "not ready".
#[derive(Debug)]
pub struct PayloadBuffer {
    data: Box<[u8]>,
    len: usize,
    ready: bool,
}

impl PayloadBuffer {
    /// Allocate a buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
            ready: false,
        }
    }

    /// Maximum body size that can be held.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The last fully acquired body, if the buffer is ready.
    pub fn contents(&self) -> Option<&[u8]> {
        self.ready.then(|| &self.data[..self.len])
    }

    /// Read a body of `declared` bytes from `source`.
    ///
    /// Exactly `declared` bytes are consumed unless the source fails first.
    pub fn acquire<R>(&mut self, source: &mut R, declared: usize) -> Result<&[u8], AcquireError>
    where
        R: Read<Error = Error>,
    {
        self.ready = false;
        self.len = 0;

        let capacity = self.data.len();
        let mut remaining = declared;

        // Drain the excess first; whatever is left then fits the buffer.
        if remaining > capacity {
            let mut scratch = [0u8; 64];
            let sink: &mut [u8] = if capacity > 0 {
                &mut self.data
            } else {
                &mut scratch
            };
            while remaining > capacity {
                let chunk = (remaining - capacity).min(sink.len());
                remaining -= read_some(source, &mut sink[..chunk])?;
            }
        }

        let mut filled = 0;
        while filled < remaining {
            filled += read_some(source, &mut self.data[filled..remaining])?;
        }

        if declared > capacity {
            return Err(AcquireError::Oversized { declared, capacity });
        }

        self.len = declared;
        self.ready = true;
        Ok(&self.data[..declared])
    }
}

fn read_some<R>(source: &mut R, buf: &mut [u8]) -> Result<usize, AcquireError>
where
    R: Read<Error = Error>,
{
    match source.read(buf) {
        Ok(0) => Err(AcquireError::Io(Error::ConnectionClosed)),
        Ok(n) => Ok(n),
        Err(e) => Err(AcquireError::Io(e)),
    }
}

/// Render bytes for a log line.
///
/// Invalid UTF-8 becomes U+FFFD. Output is capped at [`DISPLAY_LIMIT`] bytes;
/// anything cut off is summarised as `...(+N bytes)`.
pub fn display_payload(bytes: &[u8]) -> String<DISPLAY_LIMIT> {
    let budget = DISPLAY_LIMIT - MARKER_RESERVE;
    let mut out = String::new();
    let mut shown = 0;

    'chunks: for chunk in bytes.utf8_chunks() {
        for ch in chunk.valid().chars() {
            if out.len() + ch.len_utf8() > budget {
                break 'chunks;
            }
            let _ = out.push(ch);
            shown += ch.len_utf8();
        }
        if !chunk.invalid().is_empty() {
            if out.len() + char::REPLACEMENT_CHARACTER.len_utf8() > budget {
                break;
            }
            let _ = out.push(char::REPLACEMENT_CHARACTER);
            shown += chunk.invalid().len();
        }
    }

    if shown < bytes.len() {
        let _ = write!(out, "...(+{} bytes)", bytes.len() - shown);
    }
    out
}
