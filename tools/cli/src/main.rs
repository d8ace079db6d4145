//! cfgseal CLI - inspect and produce encrypted configuration values.
//!
//! Loading whole documents is a library contract (the document type
//! registers its secret fields at compile time); this tool covers the
//! operator side: sealing a value to paste into a file, opening one to check
//! it, and finding encrypted values in a file.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use cfgseal_common::Secret;
use cfgseal_config::{marker, Format};
use cfgseal_crypto::kdf::PARAMS_LENGTH;
use cfgseal_crypto::secretbox::MIN_BLOB_SIZE;
use cfgseal_crypto::{Cipher, Scheme, ScryptParams};

/// Environment variable consulted before prompting for the secret.
const SECRET_ENV: &str = "CFGSEAL_SECRET";

#[derive(Parser)]
#[command(name = "cfgseal")]
#[command(about = "cfgseal - Encrypted configuration values")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a value and print its wrapped form.
    Seal {
        /// Secret parameter of the target field.
        #[arg(short, long, default_value = "")]
        param: String,

        /// Cipher scheme: "secretbox" or "gcm".
        #[arg(short, long, default_value = "secretbox")]
        scheme: String,

        /// KDF strength: "interactive", "moderate", or "sensitive".
        #[arg(long, default_value = "interactive")]
        strength: String,

        /// Use an empty secret; the parameter alone is the password.
        #[arg(long)]
        no_secret: bool,

        /// Plaintext value.
        value: String,
    },

    /// Decrypt a wrapped value.
    Open {
        /// Secret parameter of the source field.
        #[arg(short, long, default_value = "")]
        param: String,

        /// Cipher scheme: "secretbox" or "gcm".
        #[arg(short, long, default_value = "secretbox")]
        scheme: String,

        /// Use an empty secret; the parameter alone is the password.
        #[arg(long)]
        no_secret: bool,

        /// Wrapped value, including the $( ) sentinels.
        wrapped: String,
    },

    /// Describe a wrapped value without decrypting it.
    Inspect {
        /// Wrapped value, including the $( ) sentinels.
        wrapped: String,
    },

    /// Time one key derivation at the given strength.
    Bench {
        /// KDF strength: "interactive", "moderate", or "sensitive".
        #[arg(long, default_value = "interactive")]
        strength: String,
    },

    /// List the encrypted values in a configuration file.
    Scan {
        /// Configuration file.
        file: PathBuf,

        /// Format override: "json", "yaml", or "toml".
        #[arg(short, long)]
        format: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Seal {
            param,
            scheme,
            strength,
            no_secret,
            value,
        } => cmd_seal(&param, &scheme, &strength, no_secret, &value),

        Commands::Open {
            param,
            scheme,
            no_secret,
            wrapped,
        } => cmd_open(&param, &scheme, no_secret, &wrapped),

        Commands::Inspect { wrapped } => cmd_inspect(&wrapped),

        Commands::Bench { strength } => cmd_bench(&strength),

        Commands::Scan { file, format } => cmd_scan(&file, format.as_deref()),
    }
}

/// Read the secret from the environment, or prompt for it.
fn read_secret(no_secret: bool) -> Result<Secret> {
    if no_secret {
        return Ok(Secret::empty());
    }

    if let Ok(value) = std::env::var(SECRET_ENV) {
        debug!("Using secret from {}", SECRET_ENV);
        return Ok(Secret::from(value));
    }

    let secret = rpassword::prompt_password("Enter secret: ").context("Failed to read secret")?;
    if secret.is_empty() {
        bail!("Secret cannot be empty (use --no-secret for parameter-only keys)");
    }
    Ok(Secret::from(secret))
}

fn parse_strength(strength: &str) -> Result<ScryptParams> {
    match strength {
        "interactive" => Ok(ScryptParams::interactive()),
        "moderate" => Ok(ScryptParams::moderate()),
        "sensitive" => Ok(ScryptParams::sensitive()),
        _ => bail!("Invalid strength. Use: interactive, moderate, or sensitive"),
    }
}

/// Encrypt a single value.
fn cmd_seal(param: &str, scheme: &str, strength: &str, no_secret: bool, value: &str) -> Result<()> {
    let scheme: Scheme = scheme.parse()?;
    let cipher = scheme.cipher(parse_strength(strength)?);
    let secret = read_secret(no_secret)?;

    let blob = cipher
        .encrypt(&secret.field_password(param), value.as_bytes())
        .context("Failed to encrypt value")?;
    info!("Sealed {} byte(s) with {}", value.len(), scheme);

    println!("{}", marker::wrap(&blob));
    Ok(())
}

/// Decrypt a single value.
fn cmd_open(param: &str, scheme: &str, no_secret: bool, wrapped: &str) -> Result<()> {
    let scheme: Scheme = scheme.parse()?;
    let cipher = scheme.cipher(ScryptParams::default());
    let blob = marker::unwrap(wrapped.trim()).context("Value is not marker-wrapped")?;
    let secret = read_secret(no_secret)?;

    let plaintext = cipher
        .decrypt(&secret.field_password(param), &blob)
        .context("Failed to decrypt value")?;
    let plaintext = String::from_utf8(plaintext).context("Decrypted value is not UTF-8")?;

    println!("{}", plaintext);
    Ok(())
}

/// Show what can be learned from a wrapped value without a secret.
fn cmd_inspect(wrapped: &str) -> Result<()> {
    let blob = marker::unwrap(wrapped.trim()).context("Value is not marker-wrapped")?;

    println!("Blob size: {} bytes", blob.len());

    if blob.len() < MIN_BLOB_SIZE {
        println!("Too short for a secretbox blob; possibly gcm");
        return Ok(());
    }

    match ScryptParams::decode(&blob[..PARAMS_LENGTH]) {
        Ok(params) => {
            println!("Scheme: secretbox");
            println!("  N: {}", params.n);
            println!("  r: {}", params.r);
            println!("  p: {}", params.p);
            println!("  Memory: {} MiB", params.memory_required_mb());
            println!("  Plaintext: {} bytes", blob.len() - MIN_BLOB_SIZE);
        }
        Err(e) => {
            debug!("No usable KDF header: {}", e);
            println!("No KDF header; possibly gcm");
        }
    }

    Ok(())
}

/// Measure key-derivation cost on this machine.
fn cmd_bench(strength: &str) -> Result<()> {
    let params = parse_strength(strength)?;
    let elapsed = params.time_required().context("Key derivation failed")?;

    println!("Strength: {}", strength);
    println!("  N={} r={} p={}", params.n, params.r, params.p);
    println!("  Memory: {} MiB", params.memory_required_mb());
    println!("  Time: {} ms", elapsed.as_millis());

    Ok(())
}

/// List marker-wrapped strings in a file.
fn cmd_scan(file: &Path, format: Option<&str>) -> Result<()> {
    let format = match format {
        Some(name) => name.parse::<Format>()?,
        None => Format::from_path(file),
    };

    let bytes = std::fs::read(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let document: Value = format
        .deserialize(&bytes)
        .with_context(|| format!("Failed to parse {} as {}", file.display(), format))?;

    let mut found = Vec::new();
    collect_wrapped(&document, String::new(), &mut found);

    if found.is_empty() {
        println!("No encrypted values in {}", file.display());
        return Ok(());
    }

    for (path, size) in &found {
        println!("{}  ({} bytes)", path, size);
    }
    info!("{} encrypted value(s) found", found.len());

    Ok(())
}

/// Depth-first search for wrapped strings, recording their path and blob size.
fn collect_wrapped(value: &Value, path: String, found: &mut Vec<(String, usize)>) {
    match value {
        Value::String(text) if marker::is_wrapped(text) => {
            let size = marker::unwrap(text).map(|blob| blob.len()).unwrap_or(0);
            found.push((path, size));
        }
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                collect_wrapped(child, child_path, found);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                collect_wrapped(child, format!("{}[{}]", path, i), found);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collect_wrapped_paths() {
        let document = json!({
            "hostname": "db1",
            "password": marker::wrap(b"0123456789"),
            "replicas": [
                { "password": "plain" },
                { "password": marker::wrap(b"abc") }
            ]
        });

        let mut found = Vec::new();
        collect_wrapped(&document, String::new(), &mut found);

        assert_eq!(
            found,
            vec![
                ("password".to_string(), 10),
                ("replicas[1].password".to_string(), 3),
            ]
        );
    }

    #[test]
    fn test_parse_strength() {
        assert_eq!(parse_strength("moderate").unwrap(), ScryptParams::moderate());
        assert!(parse_strength("extreme").is_err());
    }
}
