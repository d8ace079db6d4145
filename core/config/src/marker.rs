//! Marker-wrapped text: the on-disk form of an encrypted field.
//!
//! A wrapped value is `$(` + base64(blob) + `)`. Anything carrying that exact
//! prefix and suffix counts as already encrypted.
//!
//! # Known limitation
//! A plaintext value that happens to look like `$(...)` is taken for
//! ciphertext and left unencrypted by the seal pass; the open pass then
//! fails on it. Changing the framing would break existing files.

use base64::{engine::general_purpose::STANDARD, Engine};

use cfgseal_common::{Error, Result};

/// Opening sentinel.
pub const PREFIX: &str = "$(";

/// Closing sentinel.
pub const SUFFIX: &str = ")";

/// Wrap a cipher blob for storage in a text field.
pub fn wrap(blob: &[u8]) -> String {
    let encoded = STANDARD.encode(blob);
    let mut text = String::with_capacity(PREFIX.len() + encoded.len() + SUFFIX.len());
    text.push_str(PREFIX);
    text.push_str(&encoded);
    text.push_str(SUFFIX);
    text
}

/// Whether `text` carries both sentinels.
pub fn is_wrapped(text: &str) -> bool {
    text.len() >= PREFIX.len() + SUFFIX.len() && text.starts_with(PREFIX) && text.ends_with(SUFFIX)
}

/// Strip the sentinels and decode the blob.
///
/// # Errors
/// - `MalformedEncoding` if the sentinels are missing or the body is not
///   valid standard base64
pub fn unwrap(text: &str) -> Result<Vec<u8>> {
    let body = text
        .strip_prefix(PREFIX)
        .and_then(|rest| rest.strip_suffix(SUFFIX))
        .ok_or_else(|| Error::MalformedEncoding("Missing $( ) sentinels".to_string()))?;

    STANDARD
        .decode(body)
        .map_err(|e| Error::MalformedEncoding(format!("Invalid base64: {}", e)))
}
