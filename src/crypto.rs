//! Field-level encryption for the user email.
//!
//! Two independent tools live here:
//!
//! - **Reversible**: AES in CFB mode with a fresh random IV per call. The IV is
//!   prepended to the ciphertext and the whole thing is base64 encoded, so the
//!   result fits a text column.
//! - **One-way**: Argon2id PHC strings for credential-style comparisons.
//!
//! # Example
//!
//! ```
//! use user_pipeline::crypto::{FieldCipher, FieldEncryptor};
//!
//! let cipher = FieldCipher::new(b"abcdefghabcdefghabcdefghabcdefgh").unwrap();
//! let sealed = cipher.encrypt("h@example.com").unwrap();
//! assert_ne!(sealed, "h@example.com");
//! assert_eq!(cipher.decrypt(&sealed).unwrap(), "h@example.com");
//! ```

use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use aes::{Aes128, Aes256};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

/// AES block size; also the IV length.
pub const IV_SIZE: usize = 16;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("encryption key can not be empty")]
    EmptyKey,
    #[error("invalid encryption key length {0}, use 16, 32, or 64 bytes")]
    InvalidKeyLength(usize),
    #[error("ciphertext is not valid base64: {0}")]
    InvalidEncoding(String),
    #[error("ciphertext too short: {len} bytes, need at least {IV_SIZE}")]
    CorruptCiphertext { len: usize },
    #[error("decrypted value is not valid UTF-8")]
    InvalidUtf8,
    #[error("cipher initialisation failed: {0}")]
    Cipher(String),
    #[error("hashing failed: {0}")]
    Hash(String),
}

/// Reversible encryption of a single string field.
pub trait FieldEncryptor: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError>;
    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError>;
}

/// AES-CFB field cipher.
///
/// Key length selects the variant: 16 bytes is AES-128, 32 bytes is AES-256.
/// 64-byte keys are accepted for compatibility with existing deployments and
/// reduced to an AES-256 key with SHA-256.
pub struct FieldCipher {
    key: Zeroizing<Vec<u8>>,
}

impl FieldCipher {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let key = match key.len() {
            0 => return Err(CryptoError::EmptyKey),
            16 | 32 => key.to_vec(),
            64 => Sha256::digest(key).to_vec(),
            n => return Err(CryptoError::InvalidKeyLength(n)),
        };
        Ok(Self { key: Zeroizing::new(key) })
    }

    /// Salted one-way hash, independent of the encryption key.
    pub fn hash(&self, secret: &str) -> Result<String, CryptoError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| CryptoError::Hash(e.to_string()))
    }

    /// `Ok(false)` on mismatch; `Err` only when `hash` is not a valid PHC string.
    pub fn compare_hash(&self, secret: &str, hash: &str) -> Result<bool, CryptoError> {
        let parsed = PasswordHash::new(hash).map_err(|e| CryptoError::Hash(e.to_string()))?;
        match Argon2::default().verify_password(secret.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(CryptoError::Hash(e.to_string())),
        }
    }

    fn apply_keystream(&self, iv: &[u8], buf: &mut [u8], encrypt: bool) -> Result<(), CryptoError> {
        let init_err = |e: aes::cipher::InvalidLength| CryptoError::Cipher(e.to_string());
        match (self.key.len(), encrypt) {
            (16, true) => cfb_mode::Encryptor::<Aes128>::new_from_slices(&self.key, iv)
                .map_err(init_err)?
                .encrypt(buf),
            (16, false) => cfb_mode::Decryptor::<Aes128>::new_from_slices(&self.key, iv)
                .map_err(init_err)?
                .decrypt(buf),
            (_, true) => cfb_mode::Encryptor::<Aes256>::new_from_slices(&self.key, iv)
                .map_err(init_err)?
                .encrypt(buf),
            (_, false) => cfb_mode::Decryptor::<Aes256>::new_from_slices(&self.key, iv)
                .map_err(init_err)?
                .decrypt(buf),
        }
        Ok(())
    }
}

impl FieldEncryptor for FieldCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut sealed = vec![0u8; IV_SIZE + plaintext.len()];
        let (iv, body) = sealed.split_at_mut(IV_SIZE);
        OsRng.fill_bytes(iv);
        body.copy_from_slice(plaintext.as_bytes());
        self.apply_keystream(iv, body, true)?;
        Ok(STANDARD.encode(&sealed))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let mut sealed = STANDARD
            .decode(ciphertext)
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        if sealed.len() < IV_SIZE {
            return Err(CryptoError::CorruptCiphertext { len: sealed.len() });
        }

        let (iv, body) = sealed.split_at_mut(IV_SIZE);
        self.apply_keystream(iv, body, false)?;
        String::from_utf8(body.to_vec()).map_err(|_| CryptoError::InvalidUtf8)
    }
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}
