//! wearlink Envelope Codec
//!
//! Wire format shared with the remote control plane. Every message crossing
//! the remote transport is one envelope:
//!
//! ```text
//! base64( iv[16] || AES-128-CBC(key, iv, PKCS#7(plaintext)) ) '@'
//! ```
//!
//! The `@` delimiter is outside the base64 alphabet, so it can only appear as
//! the final byte of an envelope. [`FrameBuffer`] splits a byte stream on it.

pub mod envelope;
pub mod error;
pub mod frame;

pub use envelope::{BLOCK_SIZE, DELIMITER, Decoded, EnvelopeCodec, IV_SIZE, KEY_SIZE, SecretKey};
pub use error::CryptoError;
pub use frame::{DEFAULT_MAX_PENDING, FrameBuffer};
