//! The seam between the configuration engine and concrete schemes.

use std::fmt;
use std::str::FromStr;

use crate::gcm::GcmScheme;
use crate::kdf::ScryptParams;
use crate::secretbox::SecretboxScheme;
use cfgseal_common::{Error, Result};

/// Password-based authenticated encryption of short values.
///
/// Implementations must be non-deterministic (fresh randomness per call) and
/// must report every authentication failure as
/// [`Error::AuthenticationFailed`], whatever the cause.
pub trait Cipher: Send + Sync {
    /// Short scheme name for logs.
    fn name(&self) -> &'static str;

    /// Encrypt `plaintext` into a self-contained blob.
    fn encrypt(&self, password: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt a blob produced by [`Cipher::encrypt`].
    fn decrypt(&self, password: &[u8], blob: &[u8]) -> Result<Vec<u8>>;
}

impl<C: Cipher + ?Sized> Cipher for Box<C> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn encrypt(&self, password: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        (**self).encrypt(password, plaintext)
    }

    fn decrypt(&self, password: &[u8], blob: &[u8]) -> Result<Vec<u8>> {
        (**self).decrypt(password, blob)
    }
}

/// Available schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    /// scrypt + XSalsa20-Poly1305.
    #[default]
    Secretbox,
    /// Stretched password + AES-256-GCM (legacy).
    Gcm,
}

impl Scheme {
    /// Build a cipher for this scheme. `params` only affect Secretbox.
    pub fn cipher(self, params: ScryptParams) -> Box<dyn Cipher> {
        match self {
            Scheme::Secretbox => Box::new(SecretboxScheme::new(params)),
            Scheme::Gcm => Box::new(GcmScheme::new()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Secretbox => "secretbox",
            Scheme::Gcm => "gcm",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "secretbox" | "sbox" => Ok(Scheme::Secretbox),
            "gcm" | "aes-gcm" => Ok(Scheme::Gcm),
            other => Err(Error::InvalidInput(format!("Unknown scheme: {}", other))),
        }
    }
}
