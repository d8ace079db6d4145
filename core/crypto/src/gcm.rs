//! Legacy AES-256-GCM scheme with a deterministic password stretch.
//!
//! Blob layout: `nonce (12) || ciphertext || tag (16)`.
//!
//! # Security
//! The key stretch is not a KDF: it has no salt and no work factor, so a
//! short password yields a guessable key. Keep this scheme for files written
//! by older deployments; prefer [`SecretboxScheme`](crate::SecretboxScheme)
//! for anything new.

use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm,
};

use crate::cipher::Cipher;
use crate::keys::{DerivedKey, KEY_LENGTH};
use cfgseal_common::{Error, Result};
use zeroize::Zeroizing;

/// Nonce size for AES-GCM (12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Stretch or truncate a password to exactly [`KEY_LENGTH`] bytes.
///
/// Short passwords are padded by appending the decimal form of successive
/// integers, starting at the password's own length, e.g. `"k1"` becomes
/// `"k1234567891011121314151617181920"`.
pub fn stretch_key(password: &[u8]) -> DerivedKey {
    let mut material = Zeroizing::new(password.to_vec());
    let mut counter = material.len();
    while material.len() < KEY_LENGTH {
        material.extend_from_slice(counter.to_string().as_bytes());
        counter += 1;
    }

    let mut key = [0u8; KEY_LENGTH];
    key.copy_from_slice(&material[..KEY_LENGTH]);
    DerivedKey::from_bytes(key)
}

/// AES-256-GCM keyed by [`stretch_key`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GcmScheme;

impl GcmScheme {
    pub fn new() -> Self {
        Self
    }
}

impl Cipher for GcmScheme {
    fn name(&self) -> &'static str {
        "gcm"
    }

    fn encrypt(&self, password: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = stretch_key(password);
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        Ok(blob)
    }

    fn decrypt(&self, password: &[u8], blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::MalformedBlob(format!(
                "expected at least {} bytes, got {}",
                NONCE_SIZE + TAG_SIZE,
                blob.len()
            )));
        }

        let key = stretch_key(password);
        let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));

        cipher
            .decrypt(GenericArray::from_slice(nonce), ciphertext)
            .map_err(|_| Error::AuthenticationFailed)
    }
}
