use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("ciphertext missing nonce")]
    MissingNonce,
    #[error("encryption failure")]
    EncryptFailure,
    #[error("decryption failure")]
    DecryptFailure,
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

/// The tracker's symmetric encryption key, loaded once at startup from the
/// 64-hex-character `ENCRYPTION_KEY` configuration input.
#[derive(Clone)]
pub struct EncryptionKey(Zeroizing<[u8; KEY_LENGTH]>);

impl EncryptionKey {
    /// Parse a 64-hex-character key, as specified for `ENCRYPTION_KEY`.
    pub fn from_hex(value: &str) -> Result<Self, CryptoError> {
        let decoded = hex::decode(value.trim())?;
        Self::from_bytes(decoded)
    }

    pub fn from_bytes<B: AsRef<[u8]>>(bytes: B) -> Result<Self, CryptoError> {
        let slice = bytes.as_ref();
        if slice.len() != KEY_LENGTH {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_LENGTH,
                actual: slice.len(),
            });
        }
        let mut array = [0u8; KEY_LENGTH];
        array.copy_from_slice(slice);
        Ok(Self(Zeroizing::new(array)))
    }

    /// Encrypt arbitrary plaintext (e.g. an API key) with AES-256-GCM,
    /// returning `nonce || ciphertext` base64-encoded.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(self.0.as_slice())
            .map_err(|_| CryptoError::EncryptFailure)?;
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let mut ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptFailure)?;
        let mut output = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        output.extend_from_slice(&nonce_bytes);
        output.append(&mut ciphertext);
        Ok(BASE64_STANDARD.encode(output))
    }

    /// Decrypt a value produced by [`Self::encrypt`].
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>, CryptoError> {
        let raw = BASE64_STANDARD.decode(encoded.trim())?;
        if raw.len() <= NONCE_LENGTH {
            return Err(CryptoError::MissingNonce);
        }
        let (nonce_bytes, encrypted) = raw.split_at(NONCE_LENGTH);
        let cipher = Aes256Gcm::new_from_slice(self.0.as_slice())
            .map_err(|_| CryptoError::DecryptFailure)?;
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), encrypted)
            .map_err(|_| CryptoError::DecryptFailure)
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"***redacted***")
            .finish()
    }
}

/// Deterministic SHA-256 fingerprint used for fast API-key cache lookups
/// (not the stored credential itself — see `common-auth::api_key` for the
/// bcrypt hash that is).
pub fn sha256_hex(value: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> EncryptionKey {
        EncryptionKey::from_bytes([7u8; KEY_LENGTH]).expect("key")
    }

    #[test]
    fn round_trip_arbitrary_utf8() {
        let k = key();
        for sample in ["", "hello", "unicode: \u{1F980}", "a".repeat(1000).as_str()] {
            let ciphertext = k.encrypt(sample.as_bytes()).expect("encrypt");
            assert_ne!(ciphertext.as_bytes(), sample.as_bytes());
            let plain = k.decrypt(&ciphertext).expect("decrypt");
            assert_eq!(plain, sample.as_bytes());
        }
    }

    #[test]
    fn from_hex_round_trips() {
        let hex_key = hex::encode([1u8; KEY_LENGTH]);
        let k = EncryptionKey::from_hex(&hex_key).expect("parse");
        let ciphertext = k.encrypt(b"payload").expect("encrypt");
        assert_eq!(k.decrypt(&ciphertext).expect("decrypt"), b"payload");
    }

    #[test]
    fn rejects_wrong_length() {
        let err = EncryptionKey::from_bytes([0u8; 10]).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyLength { .. }));
    }

    #[test]
    fn sha256_hex_is_stable() {
        let a = sha256_hex(b"api-key-value");
        let b = sha256_hex(b"api-key-value");
        let c = sha256_hex(b"different");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
