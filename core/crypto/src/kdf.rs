//! Key derivation using scrypt.
//!
//! Parameters travel with every Secretbox blob as a fixed 24-byte header
//! (three little-endian u64 values N, r, p), so a blob can be opened with
//! nothing but the password.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::keys::{DerivedKey, Salt, KEY_LENGTH};
use cfgseal_common::{Error, Result};

/// Size of the encoded parameter header in bytes.
pub const PARAMS_LENGTH: usize = 24;

/// Upper bound on the memory a decoded header may demand (1 GiB).
const MAX_MEMORY_BYTES: u128 = 1 << 30;

/// Upper bound on total work across all parallel lanes (4 GiB of mixing).
const MAX_COST_BYTES: u128 = 1 << 32;

/// Parameters for scrypt key derivation.
///
/// `n` is the literal CPU/memory cost (a power of two), not its logarithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScryptParams {
    /// CPU/memory cost.
    pub n: u64,
    /// Block size.
    pub r: u64,
    /// Parallelism.
    pub p: u64,
}

impl ScryptParams {
    /// Create custom parameters. They are validated when first used.
    pub const fn new(n: u64, r: u64, p: u64) -> Self {
        Self { n, r, p }
    }

    /// Parameters for interactive use: about 32 MiB, well under a second.
    pub const fn interactive() -> Self {
        Self::new(1 << 15, 8, 1)
    }

    /// Lighter parameters for constrained hosts (16 MiB).
    pub const fn moderate() -> Self {
        Self::new(1 << 14, 8, 1)
    }

    /// Heavier parameters for sensitive deployments (128 MiB).
    pub const fn sensitive() -> Self {
        Self::new(1 << 17, 8, 1)
    }

    /// Encode as the 24-byte blob header.
    pub fn encode(&self) -> [u8; PARAMS_LENGTH] {
        let mut header = [0u8; PARAMS_LENGTH];
        header[0..8].copy_from_slice(&self.n.to_le_bytes());
        header[8..16].copy_from_slice(&self.r.to_le_bytes());
        header[16..24].copy_from_slice(&self.p.to_le_bytes());
        header
    }

    /// Decode and validate a 24-byte blob header.
    ///
    /// # Errors
    /// - `InvalidKdfParams` if the header has the wrong length or describes
    ///   parameters scrypt cannot (or should not) run with
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PARAMS_LENGTH {
            return Err(Error::InvalidKdfParams(format!(
                "expected {} header bytes, got {}",
                PARAMS_LENGTH,
                bytes.len()
            )));
        }

        let word = |i: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            u64::from_le_bytes(buf)
        };

        let params = Self::new(word(0), word(1), word(2));
        params.to_scrypt()?;
        Ok(params)
    }

    /// Memory needed for one derivation, in MiB.
    pub fn memory_required_mb(&self) -> u64 {
        let bytes = 128u128 * self.n as u128 * self.r as u128;
        u64::try_from(bytes / 1024 / 1024).unwrap_or(u64::MAX)
    }

    /// Measure how long a single derivation takes on this machine.
    pub fn time_required(&self) -> Result<Duration> {
        let start = Instant::now();
        derive_key(b"selftest", &Salt::generate(), self)?;
        Ok(start.elapsed())
    }

    /// Validate and convert to the scrypt crate's parameter type.
    fn to_scrypt(&self) -> Result<scrypt::Params> {
        if self.n < 2 || !self.n.is_power_of_two() {
            return Err(Error::InvalidKdfParams(format!(
                "N must be a power of two greater than 1, got {}",
                self.n
            )));
        }

        let r = u32::try_from(self.r)
            .ok()
            .filter(|r| *r > 0)
            .ok_or_else(|| Error::InvalidKdfParams(format!("invalid r: {}", self.r)))?;
        let p = u32::try_from(self.p)
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| Error::InvalidKdfParams(format!("invalid p: {}", self.p)))?;

        let memory = 128u128 * self.n as u128 * self.r as u128;
        if memory > MAX_MEMORY_BYTES {
            return Err(Error::InvalidKdfParams(format!(
                "N={} r={} exceeds the memory limit",
                self.n, self.r
            )));
        }
        if memory * self.p as u128 > MAX_COST_BYTES {
            return Err(Error::InvalidKdfParams(format!(
                "p={} exceeds the cost limit",
                self.p
            )));
        }

        let log_n = self.n.trailing_zeros() as u8;
        scrypt::Params::new(log_n, r, p, KEY_LENGTH)
            .map_err(|e| Error::InvalidKdfParams(e.to_string()))
    }
}

impl Default for ScryptParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Derive a key from a password and salt using scrypt.
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - `InvalidKdfParams` if `params` are unusable
/// - `KeyDerivation` if scrypt fails
pub fn derive_key(password: &[u8], salt: &Salt, params: &ScryptParams) -> Result<DerivedKey> {
    let scrypt_params = params.to_scrypt()?;
    debug!(n = params.n, r = params.r, p = params.p, "Deriving key with scrypt");

    let mut key_bytes = [0u8; KEY_LENGTH];
    scrypt::scrypt(password, salt.as_bytes(), &scrypt_params, &mut key_bytes)
        .map_err(|e| Error::KeyDerivation(e.to_string()))?;

    Ok(DerivedKey::from_bytes(key_bytes))
}
