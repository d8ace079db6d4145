//! Common error types for cfgseal.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for cfgseal operations.
///
/// Cryptographic failures are deliberately coarse: a wrong password and a
/// corrupted ciphertext both surface as [`Error::AuthenticationFailed`].
#[derive(Debug, Error)]
pub enum Error {
    /// Reading the configuration file failed for a reason other than absence.
    #[error("Failed to read {}: {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Writing the configuration file failed.
    #[error("Failed to persist {}: {source}", path.display())]
    PersistFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file contents could not be parsed into the document type.
    #[error("Deserialization error: {0}")]
    DeserializeFailed(String),

    /// The document could not be rendered in the target format.
    #[error("Serialization error: {0}")]
    SerializeFailed(String),

    /// A marker-wrapped value is not valid base64, or is not wrapped at all.
    #[error("Malformed encoding: {0}")]
    MalformedEncoding(String),

    /// A cipher blob is too short or structurally corrupt.
    #[error("Malformed blob: {0}")]
    MalformedBlob(String),

    /// The self-describing KDF header of a blob is unusable.
    #[error("Invalid KDF parameters: {0}")]
    InvalidKdfParams(String),

    /// Tag verification failed: wrong secret or tampered ciphertext.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Key derivation rejected its inputs.
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Sealing failed inside the AEAD implementation.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// An annotated field could not be decrypted during load.
    #[error("Failed to decrypt field '{field}': {source}")]
    DecryptFailed {
        field: String,
        source: Box<Error>,
    },

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// The innermost error, looking through [`Error::DecryptFailed`].
    pub fn root(&self) -> &Error {
        match self {
            Error::DecryptFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this error (or its root) is an authentication failure.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self.root(), Error::AuthenticationFailed)
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
