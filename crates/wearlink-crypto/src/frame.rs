//! Delimiter framing for envelope streams.
//!
//! Reads from the remote transport arrive in arbitrary sizes: one read may
//! carry half an envelope, or several. `FrameBuffer` accumulates bytes and
//! hands out complete frames, delimiter included, in arrival order.

use crate::envelope::DELIMITER;
use crate::error::CryptoError;

/// Default bound on bytes buffered without seeing a delimiter (1 MiB).
pub const DEFAULT_MAX_PENDING: usize = 1024 * 1024;

/// Accumulator that splits a byte stream into delimited frames.
#[derive(Debug)]
pub struct FrameBuffer {
    pending: Vec<u8>,
    max_pending: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    pub const fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_PENDING)
    }

    pub const fn with_limit(max_pending: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_pending,
        }
    }

    /// Append bytes read from the stream.
    ///
    /// If the trailing partial frame grows past the limit it is discarded and
    /// `FrameTooLarge` is returned. Complete frames already buffered survive.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), CryptoError> {
        self.pending.extend_from_slice(bytes);

        let partial_start = self
            .pending
            .iter()
            .rposition(|&b| b == DELIMITER)
            .map_or(0, |pos| pos + 1);
        let partial = self.pending.len() - partial_start;
        if partial > self.max_pending {
            self.pending.truncate(partial_start);
            return Err(CryptoError::FrameTooLarge {
                size: partial,
                max: self.max_pending,
            });
        }
        Ok(())
    }

    /// Take the next complete frame (delimiter included), if any.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let end = self.pending.iter().position(|&b| b == DELIMITER)?;
        Some(self.pending.drain(..=end).collect())
    }

    /// Bytes held that do not yet form a complete frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
