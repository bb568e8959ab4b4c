//! Back-to-back JSON documents on a byte stream.
//!
//! The device host writes one JSON document per message with no separator,
//! and socket reads end wherever they like. `JsonStream` buffers reads and
//! yields each complete top-level value together with the exact bytes it was
//! parsed from.

use serde_json::Value;

use super::error::ProtocolError;

/// Default bound on an incomplete document (1 MiB).
pub const DEFAULT_MAX_DOCUMENT: usize = 1024 * 1024;

/// One parsed document and its source bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonDocument {
    pub value: Value,
    pub raw: Vec<u8>,
}

#[derive(Debug)]
pub struct JsonStream {
    buf: Vec<u8>,
    max_document: usize,
}

impl Default for JsonStream {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonStream {
    pub const fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_DOCUMENT)
    }

    pub const fn with_limit(max_document: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_document,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next complete document.
    ///
    /// `Ok(None)` means more bytes are needed. On a syntax error the bytes up
    /// to the next `{` are discarded; an oversized tail is discarded whole.
    /// Either way the caller can log and keep reading.
    pub fn next_document(&mut self) -> Result<Option<JsonDocument>, ProtocolError> {
        let start = self
            .buf
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(self.buf.len());
        if start == self.buf.len() {
            self.buf.clear();
            return Ok(None);
        }

        let parsed = {
            let mut docs =
                serde_json::Deserializer::from_slice(&self.buf[start..]).into_iter::<Value>();
            match docs.next() {
                Some(Ok(value)) => Ok(Some((value, start + docs.byte_offset()))),
                Some(Err(e)) if e.is_eof() => Ok(None),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        };

        match parsed {
            Ok(Some((value, end))) => {
                let raw: Vec<u8> = self.buf.drain(..end).skip(start).collect();
                Ok(Some(JsonDocument { value, raw }))
            }
            Ok(None) => {
                let size = self.buf.len() - start;
                if size > self.max_document {
                    self.buf.clear();
                    return Err(ProtocolError::Oversized {
                        size,
                        max: self.max_document,
                    });
                }
                Ok(None)
            }
            Err(e) => {
                match self.buf[start + 1..].iter().position(|&b| b == b'{') {
                    Some(next) => {
                        self.buf.drain(..start + 1 + next);
                    }
                    None => self.buf.clear(),
                }
                Err(e.into())
            }
        }
    }
}
