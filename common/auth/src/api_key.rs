use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bcrypt::{hash, verify, DEFAULT_COST};
use common_crypto::EncryptionKey;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::AuthResult;

const API_KEY_BYTES: usize = 32;

/// Stored credential for an API key: a bcrypt hash for constant-time
/// verification, plus an AES-256-GCM encrypted copy that can be decrypted
/// to recover the original value for display/rotation flows.
#[derive(Debug, Clone)]
pub struct StoredApiKey {
    pub hash: String,
    pub encrypted: String,
}

/// Generate a new random API key, base64url-encoded (no padding).
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; API_KEY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash and encrypt a freshly generated API key for storage.
pub fn store_api_key(plain: &str, encryption_key: &EncryptionKey) -> AuthResult<StoredApiKey> {
    let hash = hash(plain, DEFAULT_COST)?;
    let encrypted = encryption_key.encrypt(plain.as_bytes())?;
    Ok(StoredApiKey { hash, encrypted })
}

/// Verify a caller-presented API key against its stored bcrypt hash.
pub fn compare_api_key(plain: &str, stored_hash: &str) -> AuthResult<bool> {
    Ok(verify(plain, stored_hash)?)
}

/// Recover the plaintext API key from its encrypted copy (rotation/admin
/// display flows only — never used on the verification hot path).
pub fn recover_api_key(stored: &StoredApiKey, encryption_key: &EncryptionKey) -> AuthResult<String> {
    let bytes = encryption_key.decrypt(&stored.encrypted)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> EncryptionKey {
        EncryptionKey::from_bytes([3u8; 32]).expect("key")
    }

    #[test]
    fn hash_then_compare_round_trips() {
        let plain = generate_api_key();
        let stored = store_api_key(&plain, &key()).expect("store");
        assert!(compare_api_key(&plain, &stored.hash).expect("compare"));
        assert!(!compare_api_key("wrong-key", &stored.hash).expect("compare"));
    }

    #[test]
    fn encrypted_copy_recovers_original() {
        let plain = generate_api_key();
        let stored = store_api_key(&plain, &key()).expect("store");
        let recovered = recover_api_key(&stored, &key()).expect("recover");
        assert_eq!(recovered, plain);
    }
}
