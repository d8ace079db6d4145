//! Password-based sealing with scrypt and XSalsa20-Poly1305 (NaCl secretbox).
//!
//! Blob layout:
//!
//! ```text
//! params (24) || salt (32) || nonce (24) || ciphertext || tag (16)
//! ```
//!
//! The header makes every blob self-describing, so the scrypt cost can be
//! raised for new blobs without breaking old ones.

use crypto_secretbox::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng},
    XSalsa20Poly1305,
};

use crate::cipher::Cipher;
use crate::kdf::{derive_key, ScryptParams, PARAMS_LENGTH};
use crate::keys::{DerivedKey, Salt, SALT_LENGTH};
use cfgseal_common::{Error, Result};

/// Nonce size for XSalsa20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Smallest blob that can possibly be valid.
pub const MIN_BLOB_SIZE: usize = PARAMS_LENGTH + SALT_LENGTH + NONCE_SIZE + TAG_SIZE;

/// Seal plaintext under a derived key.
///
/// # Postconditions
/// - Returns nonce || ciphertext || tag
/// - The nonce is randomly generated
pub fn seal(key: &DerivedKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XSalsa20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
    let nonce = XSalsa20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Open the output of [`seal`].
///
/// # Errors
/// - `MalformedBlob` if the input is shorter than nonce + tag
/// - `AuthenticationFailed` on tag mismatch
pub fn open(key: &DerivedKey, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::MalformedBlob("Sealed box too short".to_string()));
    }

    let (nonce_bytes, encrypted) = sealed.split_at(NONCE_SIZE);
    let cipher = XSalsa20Poly1305::new(GenericArray::from_slice(key.as_bytes()));

    cipher
        .decrypt(GenericArray::from_slice(nonce_bytes), encrypted)
        .map_err(|_| Error::AuthenticationFailed)
}

/// Scrypt-derived key plus secretbox seal, with the KDF parameters embedded
/// in every blob.
#[derive(Debug, Clone, Default)]
pub struct SecretboxScheme {
    params: ScryptParams,
}

impl SecretboxScheme {
    /// Create a scheme that derives keys for new blobs with `params`.
    pub fn new(params: ScryptParams) -> Self {
        Self { params }
    }

    /// Parameters used when encrypting.
    pub fn params(&self) -> &ScryptParams {
        &self.params
    }

    /// Decrypt a blob and report the KDF parameters it was sealed with.
    ///
    /// The scheme's own parameters play no part here; the blob header is
    /// authoritative.
    ///
    /// # Errors
    /// - `MalformedBlob` if the blob is shorter than [`MIN_BLOB_SIZE`]; no key
    ///   derivation is attempted in that case
    /// - `InvalidKdfParams` if the header is corrupt
    /// - `AuthenticationFailed` for a wrong password or tampered blob
    pub fn decrypt_with_params(
        &self,
        password: &[u8],
        blob: &[u8],
    ) -> Result<(Vec<u8>, ScryptParams)> {
        if blob.len() < MIN_BLOB_SIZE {
            return Err(Error::MalformedBlob(format!(
                "expected at least {} bytes, got {}",
                MIN_BLOB_SIZE,
                blob.len()
            )));
        }

        let (header, rest) = blob.split_at(PARAMS_LENGTH);
        let (salt_bytes, sealed) = rest.split_at(SALT_LENGTH);

        let params = ScryptParams::decode(header)?;
        let salt = Salt::from_slice(salt_bytes)
            .ok_or_else(|| Error::MalformedBlob("Invalid salt".to_string()))?;

        let key = derive_key(password, &salt, &params)?;
        let plaintext = open(&key, sealed)?;

        Ok((plaintext, params))
    }
}

impl Cipher for SecretboxScheme {
    fn name(&self) -> &'static str {
        "secretbox"
    }

    fn encrypt(&self, password: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let salt = Salt::generate();
        let key = derive_key(password, &salt, &self.params)?;
        let sealed = seal(&key, plaintext)?;

        let mut blob = Vec::with_capacity(PARAMS_LENGTH + SALT_LENGTH + sealed.len());
        blob.extend_from_slice(&self.params.encode());
        blob.extend_from_slice(salt.as_bytes());
        blob.extend_from_slice(&sealed);

        Ok(blob)
    }

    fn decrypt(&self, password: &[u8], blob: &[u8]) -> Result<Vec<u8>> {
        self.decrypt_with_params(password, blob)
            .map(|(plaintext, _)| plaintext)
    }
}
