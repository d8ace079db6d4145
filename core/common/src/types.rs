//! Common types used throughout cfgseal.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Password material supplied by the operator for a single call.
///
/// The secret is never written to disk and never logged. Its memory is
/// zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret(Vec<u8>);

impl Secret {
    /// Create a secret from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// An empty secret. Field parameters alone then act as passwords.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Password for a single annotated field: the secret followed by the
    /// field's parameter.
    ///
    /// There is no separator, so `("masterk", "1")` and `("master", "k1")`
    /// yield the same password. Files written with an empty secret use the
    /// bare parameter as the key, and a separator would break them.
    pub fn field_password(&self, param: &str) -> Zeroizing<Vec<u8>> {
        let mut password = Vec::with_capacity(self.0.len() + param.len());
        password.extend_from_slice(&self.0);
        password.extend_from_slice(param.as_bytes());
        Zeroizing::new(password)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes())
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value.into_bytes())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED; {} bytes])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_password_concatenates() {
        let secret = Secret::from("master");
        assert_eq!(secret.field_password("k1").as_slice(), b"masterk1");
        assert_eq!(secret.field_password("").as_slice(), b"master");
    }

    #[test]
    fn test_field_password_has_no_separator() {
        let shifted = Secret::from("masterk").field_password("1");
        let original = Secret::from("master").field_password("k1");
        assert_eq!(shifted.as_slice(), original.as_slice());
    }

    #[test]
    fn test_empty_secret_uses_parameter_alone() {
        let secret = Secret::empty();
        assert!(secret.is_empty());
        assert_eq!(secret.field_password("obfuscate").as_slice(), b"obfuscate");
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = Secret::from("hunter2");
        let rendered = format!("{:?}", secret);
        assert!(!rendered.contains("hunter2"));
        assert_eq!(rendered, "Secret([REDACTED; 7 bytes])");
    }
}
