//! Configuration persistence with transparently encrypted secret fields.
//!
//! This module provides:
//! - [`ConfigStore`]: load/save a document, sealing annotated fields on disk
//!   and opening them in memory
//! - [`walk`]: static traversal of annotated string fields
//! - [`marker`]: the `$(base64)` text form of encrypted values
//! - [`Format`]: JSON, YAML and TOML on-disk encodings
//!
//! # Example
//! ```no_run
//! use cfgseal_config::{secret_fields, ConfigStore, Secret};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Default, Serialize, Deserialize)]
//! struct Database {
//!     hostname: String,
//!     port: u16,
//!     password: String,
//! }
//!
//! secret_fields!(Database { password = "k1" });
//!
//! # fn main() -> cfgseal_config::Result<()> {
//! let defaults = Database {
//!     hostname: "db1".into(),
//!     port: 5432,
//!     password: "s3cret".into(),
//! };
//! let config = ConfigStore::new("database.json").load(&Secret::from("master"), defaults)?;
//! assert_eq!(config.password, "s3cret");
//! # Ok(())
//! # }
//! ```

pub mod format;
pub mod marker;
pub mod store;
pub mod walk;

pub use cfgseal_common::{Error, Result, Secret};
pub use cfgseal_crypto::{Cipher, GcmScheme, Scheme, ScryptParams, SecretboxScheme};
pub use format::Format;
pub use store::ConfigStore;
pub use walk::{count, walk, FieldPath, SecretFields, SecretLeaf, Walker};
