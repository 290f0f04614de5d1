//! Symmetric cipher seam for the body pipeline.
//!
//! The pipeline only ever decrypts; [`AesGcmCipher`] also carries the paired
//! `encrypt` so collaborators (and tests) can produce valid blobs.
//!
//! Blob layout for [`AesGcmCipher`]: `[IV:12][ciphertext + tag]`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};

use crate::error::BodyError;
use crate::keys::RecordKey;

/// AES-GCM IV length in bytes.
const IV_LENGTH: usize = 12;
/// AES-GCM authentication tag length in bytes.
const TAG_LENGTH: usize = 16;
/// AES-256 key length in bytes.
const KEY_LENGTH: usize = 32;

/// Decryption primitive consumed by the body pipeline.
///
/// Implementations own the interpretation of the ciphertext blob; the
/// pipeline hands them raw bytes straight out of the format detector.
pub trait Decryptor: Send + Sync {
    fn decrypt(&self, key: &RecordKey, ciphertext: &[u8]) -> Result<Vec<u8>, BodyError>;
}

/// AES-256-GCM over `[IV:12][ciphertext + tag]` blobs.
pub struct AesGcmCipher;

impl AesGcmCipher {
    fn build(key: &RecordKey) -> Result<Aes256Gcm, BodyError> {
        if key.len() != KEY_LENGTH {
            return Err(BodyError::Decrypt(format!(
                "invalid key length: expected {KEY_LENGTH} bytes, got {}",
                key.len()
            )));
        }
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|e| BodyError::Decrypt(e.to_string()))
    }

    /// Encrypt `plaintext` into an `[IV:12][ciphertext + tag]` blob with a
    /// fresh random IV.
    pub fn encrypt(&self, key: &RecordKey, plaintext: &[u8]) -> Result<Vec<u8>, BodyError> {
        let cipher = Self::build(key)?;
        let mut iv = [0u8; IV_LENGTH];
        getrandom::getrandom(&mut iv)
            .map_err(|e| BodyError::Decrypt(format!("encryption failed: {e}")))?;
        let nonce = Nonce::from_slice(&iv);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| BodyError::Decrypt(format!("encryption failed: {e}")))?;

        let mut blob = Vec::with_capacity(IV_LENGTH + ciphertext.len());
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }
}

impl Decryptor for AesGcmCipher {
    fn decrypt(&self, key: &RecordKey, ciphertext: &[u8]) -> Result<Vec<u8>, BodyError> {
        if ciphertext.len() < IV_LENGTH + TAG_LENGTH {
            return Err(BodyError::Decrypt("ciphertext too short".to_string()));
        }
        let cipher = Self::build(key)?;
        let nonce = Nonce::from_slice(&ciphertext[..IV_LENGTH]);
        cipher
            .decrypt(nonce, &ciphertext[IV_LENGTH..])
            .map_err(|e| BodyError::Decrypt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> RecordKey {
        RecordKey::new(vec![0x42; KEY_LENGTH])
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let cipher = AesGcmCipher;
        let blob = cipher.encrypt(&key(), b"hello").unwrap();
        let plaintext = cipher.decrypt(&key(), &blob).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn fresh_iv_each_time() {
        let cipher = AesGcmCipher;
        let blob1 = cipher.encrypt(&key(), b"same").unwrap();
        let blob2 = cipher.encrypt(&key(), b"same").unwrap();
        assert_ne!(blob1, blob2);
    }

    #[test]
    fn wrong_key_fails() {
        let cipher = AesGcmCipher;
        let blob = cipher.encrypt(&key(), b"secret").unwrap();
        let other = RecordKey::new(vec![0x43; KEY_LENGTH]);
        let err = cipher.decrypt(&other, &blob).unwrap_err();
        assert!(matches!(err, BodyError::Decrypt(_)));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let cipher = AesGcmCipher;
        let mut blob = cipher.encrypt(&key(), b"secret").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        assert!(cipher.decrypt(&key(), &blob).is_err());
    }

    #[test]
    fn rejects_truncated_blob() {
        let cipher = AesGcmCipher;
        let err = cipher.decrypt(&key(), &[0u8; 10]).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn rejects_wrong_key_length() {
        let cipher = AesGcmCipher;
        let short = RecordKey::new(vec![0u8; 16]);
        let err = cipher.encrypt(&short, b"data").unwrap_err();
        assert!(err.to_string().contains("invalid key length"));
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let cipher = AesGcmCipher;
        let blob = cipher.encrypt(&key(), b"").unwrap();
        assert_eq!(cipher.decrypt(&key(), &blob).unwrap(), b"");
    }
}
