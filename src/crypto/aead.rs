//! AEAD at-rest encryption for Credentials (spec §3): AES-256-GCM, 96-bit
//! nonce, 128-bit tag. New to this repo (the teacher has no credential
//! storage at all) — grounded on `DevJadhav-Rustant`'s manifest, which pairs
//! `aes-gcm` with the same "encrypt long-lived secret material" use case.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::error::AppError;

const NONCE_LEN: usize = 12; // 96 bits
const TAG_LEN: usize = 16; // 128 bits

pub struct AeadKey(Aes256Gcm);

impl AeadKey {
    pub fn from_hex(hex_key: &str) -> Result<Self, AppError> {
        let bytes = hex::decode(hex_key)
            .map_err(|e| AppError::Internal(format!("bad encryption key hex: {e}")))?;
        if bytes.len() != 32 {
            return Err(AppError::Internal("encryption key must be 256 bits".into()));
        }
        let key = Key::<Aes256Gcm>::from_slice(&bytes);
        Ok(AeadKey(Aes256Gcm::new(key)))
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext || tag` as a
    /// single buffer suitable for storage in one column.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, AppError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .0
            .encrypt(nonce, plaintext)
            .map_err(|_| AppError::Internal("encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a buffer produced by [`seal`]. Tamper of any byte in
    /// ciphertext or tag causes this to fail cleanly (spec §8).
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, AppError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(AppError::Internal("ciphertext too short".into()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.0
            .decrypt(nonce, ciphertext)
            .map_err(|_| AppError::Internal("decryption failed".into()))
    }
}

/// Digest helper for the audit trail's before/after columns (C15): a plain
/// SHA-256 hex digest, not an AEAD seal — these are tamper-evidence
/// fingerprints, not secrets.
pub fn digest(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> AeadKey {
        AeadKey::from_hex(&"ab".repeat(32)).unwrap()
    }

    #[test]
    fn round_trip() {
        let key = test_key();
        let token = b"ig-long-lived-access-token";
        let sealed = key.seal(token).unwrap();
        let opened = key.open(&sealed).unwrap();
        assert_eq!(opened, token);
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = test_key();
        let mut sealed = key.seal(b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(key.open(&sealed).is_err());
    }

    #[test]
    fn tampered_nonce_fails() {
        let key = test_key();
        let mut sealed = key.seal(b"secret").unwrap();
        sealed[0] ^= 0xFF;
        assert!(key.open(&sealed).is_err());
    }

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(digest(b"hello"), digest(b"hello"));
        assert_ne!(digest(b"hello"), digest(b"world"));
    }
}
