//! Loading and saving configuration files with encrypted secret fields.
//!
//! [`ConfigStore::load`] runs four phases in order, without retries:
//!
//! 1. Read the file, or write the caller's default document if it is absent.
//! 2. Parse it and encrypt every annotated field that is not yet wrapped.
//! 3. Rewrite the file if that changed its contents.
//! 4. Decrypt every annotated field for in-memory use.
//!
//! Reloading a file whose secrets are already encrypted writes nothing.
//!
//! # Concurrency
//! The file is neither locked nor replaced atomically. Two processes loading
//! the same path at the same time can race.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::format::{merge_defaults, Format};
use crate::marker;
use crate::walk::{self, SecretFields};
use cfgseal_common::{Error, Result, Secret};
use cfgseal_crypto::{Cipher, SecretboxScheme};

/// A configuration file bound to a format and a cipher.
pub struct ConfigStore {
    path: PathBuf,
    format: Format,
    cipher: Box<dyn Cipher>,
}

impl ConfigStore {
    /// Create a store for `path`.
    ///
    /// The format follows the file extension and the cipher is
    /// [`SecretboxScheme`] with default scrypt parameters.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            format: Format::from_path(&path),
            path,
            cipher: Box::new(SecretboxScheme::default()),
        }
    }

    /// Override the format chosen from the extension.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Encrypt new secrets with `cipher` and expect it when decrypting.
    pub fn with_cipher(mut self, cipher: impl Cipher + 'static) -> Self {
        self.cipher = Box::new(cipher);
        self
    }

    /// Path of the configuration file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// On-disk format.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Load the document, sealing new plaintext secrets on disk.
    ///
    /// `default` is written out when the file does not exist yet, and
    /// supplies values for keys the file does not mention.
    ///
    /// # Postconditions
    /// - Every annotated field of the returned document holds plaintext
    /// - Every annotated field on disk holds marker-wrapped ciphertext
    ///
    /// # Errors
    /// - `ReadFailed` / `PersistFailed` on I/O errors
    /// - `DeserializeFailed` / `SerializeFailed` on format errors
    /// - `DecryptFailed` if a stored secret cannot be opened with `secret`
    pub fn load<T>(&self, secret: &Secret, default: T) -> Result<T>
    where
        T: Serialize + DeserializeOwned + SecretFields,
    {
        debug!(
            path = %self.path.display(),
            format = %self.format,
            scheme = self.cipher.name(),
            "Loading configuration"
        );

        let buffer = self.read_or_init(&default)?;
        let on_disk: Value = self.format.deserialize(&buffer)?;

        let mut doc = self.decode(on_disk.clone(), default)?;
        let sealed = self.seal_fields(secret, &mut doc)?;

        let encoded = self.format.serialize(&doc)?;
        if self.changed(&encoded, &buffer, &on_disk)? {
            self.persist(&encoded)?;
            info!(
                "Rewrote {} ({} secret field(s) sealed)",
                self.path.display(),
                sealed
            );
        }

        let opened = self.open_fields(secret, &mut doc)?;
        debug!(fields = opened, "Configuration loaded");

        Ok(doc)
    }

    /// Write `doc` to disk with every annotated field encrypted.
    ///
    /// Plaintext fields are sealed with fresh randomness; fields that are
    /// already wrapped are written as they are.
    pub fn save<T>(&self, secret: &Secret, doc: &T) -> Result<()>
    where
        T: Serialize + SecretFields + Clone,
    {
        let mut sealed_doc = doc.clone();
        let sealed = self.seal_fields(secret, &mut sealed_doc)?;

        let encoded = self.format.serialize(&sealed_doc)?;
        self.persist(&encoded)?;
        info!("Saved {} ({} secret field(s) sealed)", self.path.display(), sealed);

        Ok(())
    }

    /// Phase 1: current file contents, creating the file from `default`.
    fn read_or_init<T: Serialize>(&self, default: &T) -> Result<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let bytes = self.format.serialize(default)?;
                self.persist(&bytes)?;
                info!("Created initial configuration at {}", self.path.display());
                Ok(bytes)
            }
            Err(source) => Err(Error::ReadFailed {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Build the document from the parsed file, filling keys it lacks from
    /// `default`.
    fn decode<T>(&self, on_disk: Value, default: T) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut merged =
            serde_json::to_value(default).map_err(|e| Error::SerializeFailed(e.to_string()))?;
        merge_defaults(&mut merged, on_disk);

        serde_json::from_value(merged).map_err(|e| Error::DeserializeFailed(e.to_string()))
    }

    /// Whether `encoded` differs from the file in content, not just in byte
    /// layout. Map types with unspecified iteration order (`HashMap`) render
    /// their entries differently from one load to the next.
    fn changed(&self, encoded: &[u8], buffer: &[u8], on_disk: &Value) -> Result<bool> {
        if encoded == buffer {
            return Ok(false);
        }
        let rendered: Value = self.format.deserialize(encoded)?;
        Ok(rendered != *on_disk)
    }

    /// Encrypt and wrap every annotated field that is still plaintext.
    fn seal_fields<T: SecretFields + ?Sized>(&self, secret: &Secret, doc: &mut T) -> Result<usize> {
        let mut sealed = 0;
        walk::walk(doc, |path, value, param| {
            if marker::is_wrapped(value) {
                return Ok(value.to_string());
            }

            let password = secret.field_password(param);
            let blob = self.cipher.encrypt(&password, value.as_bytes())?;
            debug!(field = %path, "Sealed plaintext secret");
            sealed += 1;

            Ok(marker::wrap(&blob))
        })?;
        Ok(sealed)
    }

    /// Unwrap and decrypt every wrapped annotated field.
    fn open_fields<T: SecretFields + ?Sized>(&self, secret: &Secret, doc: &mut T) -> Result<usize> {
        let mut opened = 0;
        walk::walk(doc, |path, value, param| {
            if !marker::is_wrapped(value) {
                return Ok(value.to_string());
            }

            let password = secret.field_password(param);
            let plaintext = marker::unwrap(value)
                .and_then(|blob| self.cipher.decrypt(&password, &blob))
                .and_then(|bytes| {
                    String::from_utf8(bytes).map_err(|_| {
                        Error::MalformedBlob("Decrypted value is not valid UTF-8".to_string())
                    })
                })
                .map_err(|source| Error::DecryptFailed {
                    field: path.to_string(),
                    source: Box::new(source),
                })?;
            opened += 1;

            Ok(plaintext)
        })?;
        Ok(opened)
    }

    /// Overwrite the file. New files are readable by the owner only.
    fn persist(&self, bytes: &[u8]) -> Result<()> {
        let fail = |source: io::Error| Error::PersistFailed {
            path: self.path.clone(),
            source,
        };

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.path).map_err(fail)?;
        file.write_all(bytes).map_err(fail)?;
        file.flush().map_err(fail)
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("cipher", &self.cipher.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret_fields;
    use cfgseal_crypto::{GcmScheme, ScryptParams};
    use serde::Deserialize;
    use std::collections::{BTreeMap, HashMap};
    use tempfile::TempDir;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct TestConfig {
        hostname: String,
        port: u16,
        password: String,
    }

    secret_fields!(TestConfig { password = "k1" });

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Tls {
        cert: String,
        key: Option<String>,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Upstream {
        url: String,
        token: String,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct ServiceConfig {
        name: String,
        api_key: String,
        tls: Option<Tls>,
        upstreams: Vec<Upstream>,
        tokens: BTreeMap<String, Upstream>,
    }

    secret_fields!(Tls { key = "tls" });
    secret_fields!(Upstream { token = "upstream" });
    secret_fields!(ServiceConfig {
        api_key = "",
        tls,
        upstreams,
        tokens,
    });

    fn scenario() -> TestConfig {
        TestConfig {
            hostname: "db1".into(),
            port: 5432,
            password: "s3cret".into(),
        }
    }

    fn service() -> ServiceConfig {
        let mut tokens = BTreeMap::new();
        tokens.insert(
            "github".to_string(),
            Upstream {
                url: "https://api.github.com".into(),
                token: "ghp_123".into(),
            },
        );
        ServiceConfig {
            name: "svc".into(),
            api_key: "key-abc".into(),
            tls: Some(Tls {
                cert: "cert.pem".into(),
                key: Some("-----BEGIN KEY-----".into()),
            }),
            upstreams: vec![
                Upstream {
                    url: "https://a".into(),
                    token: "ta".into(),
                },
                Upstream {
                    url: "https://b".into(),
                    token: "".into(),
                },
            ],
            tokens,
        }
    }

    fn test_store(temp: &TempDir, name: &str) -> ConfigStore {
        ConfigStore::new(temp.path().join(name))
            .with_cipher(SecretboxScheme::new(ScryptParams::new(1 << 10, 8, 1)))
    }

    fn on_disk<T: DeserializeOwned>(store: &ConfigStore) -> T {
        let bytes = fs::read(store.path()).unwrap();
        store.format().deserialize(&bytes).unwrap()
    }

    #[test]
    fn test_first_load_encrypts_on_disk() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, "config.json");
        let secret = Secret::empty();

        let loaded = store.load(&secret, scenario()).unwrap();
        assert_eq!(loaded, scenario());

        let stored: TestConfig = on_disk(&store);
        assert_eq!(stored.hostname, "db1");
        assert_eq!(stored.port, 5432);
        assert!(marker::is_wrapped(&stored.password));
        assert!(!stored.password.contains("s3cret"));
    }

    #[test]
    fn test_reload_into_fresh_default() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, "config.yaml");
        let secret = Secret::from("master");

        let first = store.load(&secret, scenario()).unwrap();
        let second = store.load(&secret, TestConfig::default()).unwrap();

        assert_eq!(second, first);
        assert_eq!(second.password, "s3cret");
    }

    #[test]
    fn test_reload_is_idempotent_on_disk() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, "config.json");
        let secret = Secret::from("master");

        store.load(&secret, scenario()).unwrap();
        let after_first = fs::read(store.path()).unwrap();

        store.load(&secret, TestConfig::default()).unwrap();
        let after_second = fs::read(store.path()).unwrap();

        assert_eq!(after_first, after_second);
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Keyring {
        tokens: HashMap<String, Upstream>,
    }

    secret_fields!(Keyring { tokens });

    #[test]
    fn test_hash_map_reload_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let secret = Secret::from("master");
        let keyring = Keyring {
            tokens: (0..8)
                .map(|i| {
                    let upstream = Upstream {
                        url: format!("https://u{}", i),
                        token: format!("t{}", i),
                    };
                    (format!("svc{}", i), upstream)
                })
                .collect(),
        };

        for name in ["keyring.json", "keyring.yaml", "keyring.toml"] {
            let store = test_store(&temp, name);
            store.load(&secret, keyring.clone()).unwrap();
            let after_first = fs::read(store.path()).unwrap();

            for _ in 0..10 {
                let loaded = store.load(&secret, Keyring::default()).unwrap();
                assert_eq!(loaded, keyring, "{}", name);
                assert_eq!(fs::read(store.path()).unwrap(), after_first, "{}", name);
            }
        }
    }

    #[test]
    fn test_existing_plaintext_is_sealed() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, "config.json");
        fs::write(
            store.path(),
            r#"{"hostname":"db2","port":6432,"password":"hand-written"}"#,
        )
        .unwrap();

        let loaded = store.load(&Secret::empty(), TestConfig::default()).unwrap();
        assert_eq!(loaded.hostname, "db2");
        assert_eq!(loaded.password, "hand-written");

        let stored: TestConfig = on_disk(&store);
        assert!(marker::is_wrapped(&stored.password));
    }

    #[test]
    fn test_nested_documents_in_every_format() {
        for name in ["svc.json", "svc.yaml", "svc.toml"] {
            let temp = TempDir::new().unwrap();
            let store = test_store(&temp, name);
            let secret = Secret::from("master");

            let loaded = store.load(&secret, service()).unwrap();
            assert_eq!(loaded, service(), "{}", name);

            let stored: ServiceConfig = on_disk(&store);
            assert_eq!(stored.name, "svc");
            assert!(marker::is_wrapped(&stored.api_key));
            let tls = stored.tls.as_ref().unwrap();
            assert_eq!(tls.cert, "cert.pem");
            assert!(marker::is_wrapped(tls.key.as_deref().unwrap()));
            assert!(stored.upstreams.iter().all(|u| marker::is_wrapped(&u.token)));
            assert!(marker::is_wrapped(&stored.tokens["github"].token));

            let reloaded = store.load(&secret, ServiceConfig::default()).unwrap();
            assert_eq!(reloaded, service(), "{}", name);
        }
    }

    #[test]
    fn test_wrong_secret_fails_authentication() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, "config.json");
        store.load(&Secret::from("right"), scenario()).unwrap();
        let before = fs::read(store.path()).unwrap();

        let err = store
            .load(&Secret::from("wrong"), TestConfig::default())
            .unwrap_err();

        match &err {
            Error::DecryptFailed { field, source } => {
                assert_eq!(field, "password");
                assert!(matches!(**source, Error::AuthenticationFailed));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // Nothing new to seal, so the file is untouched.
        assert_eq!(fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn test_tampered_field_fails_authentication() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, "config.json");
        let secret = Secret::from("master");
        store.load(&secret, scenario()).unwrap();

        let mut stored: TestConfig = on_disk(&store);
        let mut blob = marker::unwrap(&stored.password).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        stored.password = marker::wrap(&blob);
        fs::write(store.path(), Format::Json.serialize(&stored).unwrap()).unwrap();

        let err = store.load(&secret, TestConfig::default()).unwrap_err();
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn test_malformed_marker_fails() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, "config.json");
        fs::write(
            store.path(),
            r#"{"hostname":"db1","port":1,"password":"$(###)"}"#,
        )
        .unwrap();

        let err = store.load(&Secret::empty(), TestConfig::default()).unwrap_err();
        assert!(matches!(err.root(), Error::MalformedEncoding(_)));
    }

    #[test]
    fn test_short_blob_fails_malformed() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, "config.json");
        let wrapped = marker::wrap(&[0u8; 8]);
        fs::write(
            store.path(),
            format!(r#"{{"hostname":"db1","port":1,"password":"{}"}}"#, wrapped),
        )
        .unwrap();

        let err = store.load(&Secret::empty(), TestConfig::default()).unwrap_err();
        assert!(matches!(err.root(), Error::MalformedBlob(_)));
    }

    #[test]
    fn test_unparseable_file_fails_deserialize() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, "config.json");
        fs::write(store.path(), "hostname = 'db1'").unwrap();

        let err = store.load(&Secret::empty(), scenario()).unwrap_err();
        assert!(matches!(err, Error::DeserializeFailed(_)));
    }

    #[test]
    fn test_missing_keys_keep_defaults_and_are_written_back() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, "config.json");
        fs::write(store.path(), r#"{"password":"pw"}"#).unwrap();

        let loaded = store.load(&Secret::empty(), scenario()).unwrap();
        assert_eq!(loaded.hostname, "db1");
        assert_eq!(loaded.port, 5432);
        assert_eq!(loaded.password, "pw");

        let stored: serde_json::Value = on_disk(&store);
        assert_eq!(stored["hostname"], "db1");
        assert_eq!(stored["port"], 5432);
    }

    #[test]
    fn test_unreadable_path_fails_read() {
        let temp = TempDir::new().unwrap();
        // A directory cannot be read as a file.
        let store = ConfigStore::new(temp.path());

        let err = store.load(&Secret::empty(), scenario()).unwrap_err();
        assert!(matches!(err, Error::ReadFailed { .. }));
    }

    #[test]
    fn test_missing_directory_fails_persist() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path().join("missing").join("config.json"));

        let err = store.load(&Secret::empty(), scenario()).unwrap_err();
        assert!(matches!(err, Error::PersistFailed { .. }));
    }

    #[test]
    fn test_gcm_scheme_uses_field_parameter_as_key() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path().join("config.yaml")).with_cipher(GcmScheme);

        store.load(&Secret::empty(), scenario()).unwrap();

        let stored: TestConfig = on_disk(&store);
        let blob = marker::unwrap(&stored.password).unwrap();
        assert_eq!(GcmScheme.decrypt(b"k1", &blob).unwrap(), b"s3cret");
    }

    #[test]
    fn test_wrapped_defaults_are_not_resealed() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, "config.json");
        let secret = Secret::from("master");

        store.load(&secret, scenario()).unwrap();
        let stored: TestConfig = on_disk(&store);

        // A document that already carries ciphertext keeps it verbatim.
        let other = test_store(&temp, "other.json");
        let loaded = other.load(&secret, stored.clone()).unwrap();
        assert_eq!(loaded.password, "s3cret");
        let copied: TestConfig = on_disk(&other);
        assert_eq!(copied.password, stored.password);
    }

    #[test]
    fn test_save_reseals_and_loads_back() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, "config.toml");
        let secret = Secret::from("master");

        let mut config = store.load(&secret, scenario()).unwrap();
        config.password = "rotated".into();
        store.save(&secret, &config).unwrap();

        let stored: TestConfig = on_disk(&store);
        assert!(marker::is_wrapped(&stored.password));

        let reloaded = store.load(&secret, TestConfig::default()).unwrap();
        assert_eq!(reloaded.password, "rotated");
    }

    #[cfg(unix)]
    #[test]
    fn test_new_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, "config.json");
        store.load(&Secret::empty(), scenario()).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
