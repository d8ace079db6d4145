//! Cryptographic primitives for cfgseal.
//!
//! This module provides:
//! - Key derivation using scrypt with self-describing parameters
//! - The Secretbox scheme (scrypt + XSalsa20-Poly1305)
//! - The legacy GCM scheme (stretched password + AES-256-GCM)
//! - The [`Cipher`] trait both schemes implement
//!
//! # Security Guarantees
//! - Derived key material is zeroized on drop
//! - No plaintext or key material is ever logged
//! - Authentication failures are indistinguishable by cause

pub mod cipher;
pub mod gcm;
pub mod kdf;
pub mod keys;
pub mod secretbox;

pub use cipher::{Cipher, Scheme};
pub use gcm::GcmScheme;
pub use kdf::{derive_key, ScryptParams};
pub use keys::{DerivedKey, Salt};
pub use secretbox::SecretboxScheme;
