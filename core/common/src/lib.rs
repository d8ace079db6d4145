//! Common utilities and types shared across cfgseal crates.
//!
//! This module provides the error taxonomy used by every layer and the
//! [`Secret`] type that carries operator-supplied password material.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::Secret;
