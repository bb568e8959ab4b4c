//! Envelope encoding and decoding.
//!
//! The symmetric key is fixed for the lifetime of the process; a fresh random
//! IV is drawn for every envelope and travels in clear in front of the
//! ciphertext.

use std::fmt;

use aes::Aes128;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// AES-128 key size.
pub const KEY_SIZE: usize = 16;

/// CBC initialization vector size.
pub const IV_SIZE: usize = 16;

/// AES block size.
pub const BLOCK_SIZE: usize = 16;

/// Marks the end of one envelope on the wire.
pub const DELIMITER: u8 = b'@';

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Shared secret key. Zeroized on drop, never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_SIZE]);

impl SecretKey {
    /// Build a key from raw bytes; the length must be exactly [`KEY_SIZE`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self(key))
    }

    /// Build a key from the UTF-8 bytes of a configured secret string.
    pub fn from_secret_str(secret: &str) -> Result<Self, CryptoError> {
        Self::from_bytes(secret.as_bytes())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Outcome of [`EnvelopeCodec::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// No delimiter observed yet; the caller should wait for more bytes.
    Incomplete,
    /// The plaintext of the first envelope in the input.
    Message(Vec<u8>),
}

/// Stateless envelope encoder/decoder bound to one key.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    key: SecretKey,
}

impl EnvelopeCodec {
    pub const fn new(key: SecretKey) -> Self {
        Self { key }
    }

    /// Encrypt `plaintext` into a delimited envelope.
    pub fn encode(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);
        self.encode_with_iv(plaintext, &iv)
    }

    fn encode_with_iv(&self, plaintext: &[u8], iv: &[u8; IV_SIZE]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes128CbcEnc::new_from_slices(&self.key.0, iv)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut raw = Vec::with_capacity(IV_SIZE + ciphertext.len());
        raw.extend_from_slice(iv);
        raw.extend_from_slice(&ciphertext);

        let mut out = STANDARD.encode(raw).into_bytes();
        out.push(DELIMITER);
        Ok(out)
    }

    /// Decode the first envelope in `bytes`.
    ///
    /// Anything after the first delimiter is ignored; stream callers split
    /// frames with [`crate::FrameBuffer`] first. A missing delimiter is
    /// [`Decoded::Incomplete`], never an error.
    pub fn decode(&self, bytes: &[u8]) -> Result<Decoded, CryptoError> {
        let Some(end) = bytes.iter().position(|&b| b == DELIMITER) else {
            return Ok(Decoded::Incomplete);
        };

        let armoured = bytes[..end].trim_ascii();
        let raw = STANDARD
            .decode(armoured)
            .map_err(|e| CryptoError::Decode(format!("invalid base64: {e}")))?;

        if raw.len() < IV_SIZE {
            return Err(CryptoError::Decode(format!(
                "{} bytes is shorter than the {IV_SIZE} byte IV",
                raw.len()
            )));
        }
        let (iv, ciphertext) = raw.split_at(IV_SIZE);
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::Decode(format!(
                "ciphertext length {} is not a positive multiple of {BLOCK_SIZE}",
                ciphertext.len()
            )));
        }

        let cipher = Aes128CbcDec::new_from_slices(&self.key.0, iv)
            .map_err(|e| CryptoError::Decode(e.to_string()))?;
        let plaintext = cipher
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::Decode("invalid padding".into()))?;

        Ok(Decoded::Message(plaintext))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use cbc::cipher::block_padding::NoPadding;

    const KEY: &str = "0000000000000000";

    fn codec() -> EnvelopeCodec {
        EnvelopeCodec::new(SecretKey::from_secret_str(KEY).unwrap())
    }

    fn message(decoded: Decoded) -> Vec<u8> {
        match decoded {
            Decoded::Message(m) => m,
            Decoded::Incomplete => panic!("expected a complete message"),
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let codec = codec();
        for plaintext in [
            &b""[..],
            b"#T 0",
            b"exactly16bytes!!",
            br#"{"packets":[{"bluno":1,"movement":0}]}"#,
        ] {
            let envelope = codec.encode(plaintext).unwrap();
            assert_eq!(message(codec.decode(&envelope).unwrap()), plaintext);
        }
    }

    #[test]
    fn envelope_ends_with_single_delimiter() {
        let codec = codec();
        let payload = vec![b'@'; 300];
        let envelope = codec.encode(&payload).unwrap();
        assert_eq!(envelope.last(), Some(&DELIMITER));
        assert_eq!(envelope.iter().filter(|&&b| b == DELIMITER).count(), 1);
    }

    #[test]
    fn fresh_iv_per_envelope() {
        let codec = codec();
        let a = codec.encode(b"same").unwrap();
        let b = codec.encode(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn missing_delimiter_is_incomplete() {
        let codec = codec();
        let mut envelope = codec.encode(b"hello").unwrap();
        envelope.pop();
        assert_eq!(codec.decode(&envelope).unwrap(), Decoded::Incomplete);
        assert_eq!(codec.decode(b"").unwrap(), Decoded::Incomplete);
        assert_eq!(codec.decode(b"not base64 at all!").unwrap(), Decoded::Incomplete);
    }

    #[test]
    fn only_first_envelope_is_decoded() {
        let codec = codec();
        let mut stream = codec.encode(b"first").unwrap();
        stream.extend(codec.encode(b"second").unwrap());
        assert_eq!(message(codec.decode(&stream).unwrap()), b"first");
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        let codec = codec();
        let mut framed = b"\r\n".to_vec();
        framed.extend(codec.encode(b"padded").unwrap());
        assert_eq!(message(codec.decode(&framed).unwrap()), b"padded");
    }

    #[test]
    fn undersized_input_is_rejected() {
        let codec = codec();
        let short = format!("{}@", STANDARD.encode([1u8; 8]));
        assert!(matches!(
            codec.decode(short.as_bytes()),
            Err(CryptoError::Decode(_))
        ));
    }

    #[test]
    fn iv_without_ciphertext_is_rejected() {
        let codec = codec();
        let iv_only = format!("{}@", STANDARD.encode([7u8; IV_SIZE]));
        assert!(matches!(
            codec.decode(iv_only.as_bytes()),
            Err(CryptoError::Decode(_))
        ));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let codec = codec();
        assert!(matches!(
            codec.decode(b"!!!!@"),
            Err(CryptoError::Decode(_))
        ));
    }

    #[test]
    fn bad_padding_is_rejected() {
        // A single all-zero block has a trailing pad byte of 0, which PKCS#7 never produces.
        let iv = [3u8; IV_SIZE];
        let cipher = Aes128CbcEnc::new_from_slices(KEY.as_bytes(), &iv).unwrap();
        let ciphertext = cipher.encrypt_padded_vec_mut::<NoPadding>(&[0u8; BLOCK_SIZE]);
        let mut raw = iv.to_vec();
        raw.extend(ciphertext);
        let envelope = format!("{}@", STANDARD.encode(raw));

        assert!(matches!(
            codec().decode(envelope.as_bytes()),
            Err(CryptoError::Decode(_))
        ));
    }

    #[test]
    fn other_key_does_not_recover_plaintext() {
        let envelope = codec().encode(b"secret data").unwrap();
        let other = EnvelopeCodec::new(SecretKey::from_secret_str("1111111111111111").unwrap());
        match other.decode(&envelope) {
            Ok(Decoded::Message(m)) => assert_ne!(m, b"secret data"),
            Ok(Decoded::Incomplete) => panic!("delimiter was present"),
            Err(_) => {}
        }
    }

    #[test]
    fn known_iv_produces_stable_output() {
        let codec = codec();
        let iv = [9u8; IV_SIZE];
        let a = codec.encode_with_iv(b"stable", &iv).unwrap();
        let b = codec.encode_with_iv(b"stable", &iv).unwrap();
        assert_eq!(a, b);
        // 15 whole bytes of IV map to the first 20 base64 characters.
        let iv_prefix = STANDARD.encode(iv);
        assert_eq!(&a[..20], &iv_prefix.as_bytes()[..20]);
    }

    #[test]
    fn key_length_is_enforced() {
        let result = SecretKey::from_secret_str("short");
        assert!(matches!(
            result,
            Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: 5
            })
        ));
        assert!(SecretKey::from_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn key_debug_is_redacted() {
        let key = SecretKey::from_secret_str(KEY).unwrap();
        assert_eq!(format!("{key:?}"), "SecretKey(<redacted>)");
    }
}
