//! AES-256-GCM sealing for secret payloads and wrapped keys.
//!
//! Output format: nonce (12 bytes) || ciphertext || tag (16 bytes). The tag
//! covers the optional associated data, so a blob only opens under the same
//! key and the same AAD it was sealed with.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{GateError, GateResult};

/// AES-GCM nonce length in bytes
pub const NONCE_LEN: usize = 12;
/// AES-GCM tag length in bytes
pub const TAG_LEN: usize = 16;
/// Content key length in bytes
pub const KEY_LEN: usize = 32;

/// 256-bit symmetric key, wiped from memory on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ContentKey([u8; KEY_LEN]);

impl ContentKey {
    /// Fresh random key from the OS RNG
    pub fn generate() -> Self {
        let mut k = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut k);
        Self(k)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> GateResult<Self> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            GateError::Decryption(format!("key must be {} bytes, got {}", KEY_LEN, bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ContentKey(..)")
    }
}

/// Encrypt `plaintext` under `key` with a fresh random nonce
pub fn seal(key: &ContentKey, plaintext: &[u8], aad: &[u8]) -> GateResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| GateError::Encryption(format!("key init failed: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|e| GateError::Encryption(format!("encrypt failed: {}", e)))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a blob produced by `seal`. A tag mismatch is always an error.
pub fn open(key: &ContentKey, blob: &[u8], aad: &[u8]) -> GateResult<Vec<u8>> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(GateError::Decryption("ciphertext too short".to_string()));
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| GateError::Decryption(format!("key init failed: {}", e)))?;
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| {
            GateError::Decryption("authentication tag mismatch (tampered data or wrong key)".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let key = ContentKey::generate();
        let blob = seal(&key, b"sk-live-123", b"").unwrap();
        assert_eq!(blob.len(), NONCE_LEN + 11 + TAG_LEN);
        assert_eq!(open(&key, &blob, b"").unwrap(), b"sk-live-123");
    }

    #[test]
    fn test_nonces_differ() {
        let key = ContentKey::generate();
        let a = seal(&key, b"same", b"").unwrap();
        let b = seal(&key, b"same", b"").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn test_every_flipped_byte_is_detected() {
        let key = ContentKey::generate();
        let blob = seal(&key, b"payload", b"").unwrap();
        for i in 0..blob.len() {
            let mut tampered = blob.clone();
            tampered[i] ^= 0x01;
            assert!(
                matches!(open(&key, &tampered, b""), Err(GateError::Decryption(_))),
                "byte {} not detected",
                i
            );
        }
    }

    #[test]
    fn test_wrong_key_or_aad_fails() {
        let key = ContentKey::generate();
        let blob = seal(&key, b"payload", b"ctx-a").unwrap();
        assert!(open(&ContentKey::generate(), &blob, b"ctx-a").is_err());
        assert!(open(&key, &blob, b"ctx-b").is_err());
        assert!(open(&key, &blob[..10], b"ctx-a").is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        assert_eq!(format!("{:?}", ContentKey::generate()), "ContentKey(..)");
    }
}
