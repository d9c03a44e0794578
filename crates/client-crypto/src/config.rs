//! Configuration loading and validation for the command-line client.
//!
//! All values are read from `CLIENT_CRYPTO_*` environment variables at
//! startup. The process exits with a clear error message if any required
//! variable is missing or invalid.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::master::{
    material_descriptor, KmsClient, KmsMasterKey, MasterKeyProvider, RsaMasterKey,
    StaticKeyDirectory,
};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "CLIENT_CRYPTO";

/// Which master key back-end wraps content keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WrapMode {
    /// Local RSA key pair.
    Rsa,
    /// AWS KMS key.
    Kms,
}

/// Validated client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Bucket holding encrypted objects. **Required.**
    pub s3_bucket: String,

    /// Endpoint override for S3-compatible services.
    #[serde(default)]
    pub s3_endpoint_url: Option<String>,

    /// AWS region override.
    #[serde(default)]
    pub region: Option<String>,

    /// Master key back-end.
    #[serde(default = "default_wrap_mode")]
    pub wrap_mode: WrapMode,

    /// PEM public key file. **Required** when `wrap_mode = rsa`.
    #[serde(default)]
    pub rsa_public_key_path: Option<String>,

    /// PEM private key file. **Required** when `wrap_mode = rsa`.
    #[serde(default)]
    pub rsa_private_key_path: Option<String>,

    /// KMS key ID or ARN. **Required** when `wrap_mode = kms`.
    #[serde(default)]
    pub kms_key_id: Option<String>,

    /// JSON object of string labels identifying the master key. May be empty.
    #[serde(default)]
    pub material_descriptor: String,

    /// JSON key directory used to open objects written under other descriptors.
    #[serde(default)]
    pub key_directory_path: Option<String>,

    /// Reject envelopes that carry no material descriptor.
    #[serde(default)]
    pub strict_material_descriptor: bool,

    /// Multipart part size in bytes; a positive multiple of 16.
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Parts uploaded concurrently by `put-multipart`.
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,

    /// OTLP endpoint; span export is disabled when unset.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_wrap_mode() -> WrapMode {
    WrapMode::Rsa
}
fn default_part_size() -> u64 {
    5 * 1024 * 1024
}
fn default_upload_concurrency() -> usize {
    4
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::load(config::Environment::with_prefix(ENV_PREFIX))
    }

    fn load(env: config::Environment) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(env)
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.s3_bucket, "S3_BUCKET")?;

        match self.wrap_mode {
            WrapMode::Rsa => {
                ensure_set(&self.rsa_public_key_path, "RSA_PUBLIC_KEY_PATH")?;
                ensure_set(&self.rsa_private_key_path, "RSA_PRIVATE_KEY_PATH")?;
            }
            WrapMode::Kms => ensure_set(&self.kms_key_id, "KMS_KEY_ID")?,
        }

        if self.part_size == 0 || self.part_size % 16 != 0 {
            anyhow::bail!("PART_SIZE must be a positive multiple of 16");
        }
        if self.upload_concurrency == 0 {
            anyhow::bail!("UPLOAD_CONCURRENCY must be > 0");
        }
        self.canonical_descriptor()?;
        Ok(())
    }

    /// The material descriptor in canonical (sorted-key) form.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor is not a JSON object of strings.
    pub fn canonical_descriptor(&self) -> Result<String> {
        let raw = self.material_descriptor.trim();
        if raw.is_empty() {
            return Ok(String::new());
        }
        let labels: BTreeMap<String, String> = serde_json::from_str(raw)
            .context("MATERIAL_DESCRIPTOR must be a JSON object of string labels")?;
        Ok(material_descriptor(&labels))
    }

    /// Build the configured master key.
    ///
    /// `kms` is required when `wrap_mode = kms`.
    ///
    /// # Errors
    ///
    /// Returns an error if key files cannot be read or parsed, or no KMS
    /// client is supplied for KMS mode.
    pub fn master_key(&self, kms: Option<Arc<dyn KmsClient>>) -> Result<Arc<dyn MasterKeyProvider>> {
        let descriptor = self.canonical_descriptor()?;
        match self.wrap_mode {
            WrapMode::Rsa => {
                let public = read_key_file(self.rsa_public_key_path.as_deref(), "RSA_PUBLIC_KEY_PATH")?;
                let private =
                    read_key_file(self.rsa_private_key_path.as_deref(), "RSA_PRIVATE_KEY_PATH")?;
                let key = RsaMasterKey::from_pem(descriptor, &public, &private)
                    .context("failed to load RSA master key")?;
                Ok(Arc::new(key))
            }
            WrapMode::Kms => {
                let key_id = self.kms_key_id.clone().unwrap_or_default();
                let key = KmsMasterKey::new(descriptor, key_id, kms)
                    .context("failed to configure KMS master key")?;
                Ok(Arc::new(key))
            }
        }
    }

    /// Load the key directory, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid directory JSON.
    pub fn key_directory(&self) -> Result<Option<StaticKeyDirectory>> {
        let Some(path) = self.key_directory_path.as_deref() else {
            return Ok(None);
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read key directory {path}"))?;
        let directory = StaticKeyDirectory::from_json(&text)
            .with_context(|| format!("failed to parse key directory {path}"))?;
        Ok(Some(directory))
    }
}

fn read_key_file(path: Option<&str>, name: &str) -> Result<String> {
    let path = path.with_context(|| format!("{name} is required"))?;
    std::fs::read_to_string(path).with_context(|| format!("failed to read {name} ({path})"))
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}

fn ensure_set(value: &Option<String>, name: &str) -> Result<()> {
    ensure_non_empty(value.as_deref().unwrap_or_default(), name)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use common::protocol::{KMS_WRAP_PREFIX, RSA_WRAP_ALGORITHM};

    use super::*;
    use crate::test_support::{rsa_pair, FakeKms};

    fn rsa_config() -> Config {
        Config {
            s3_bucket: "bucket".into(),
            s3_endpoint_url: None,
            region: None,
            wrap_mode: WrapMode::Rsa,
            rsa_public_key_path: Some("/keys/pub.pem".into()),
            rsa_private_key_path: Some("/keys/priv.pem".into()),
            kms_key_id: None,
            material_descriptor: String::new(),
            key_directory_path: None,
            strict_material_descriptor: false,
            part_size: default_part_size(),
            upload_concurrency: default_upload_concurrency(),
            otel_exporter_otlp_endpoint: None,
            log_level: default_log_level(),
        }
    }

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}_{k}"), v.to_string()))
            .collect();
        config::Environment::with_prefix(ENV_PREFIX).source(Some(map))
    }

    #[test]
    fn defaults_are_correct() {
        assert_eq!(default_wrap_mode(), WrapMode::Rsa);
        assert_eq!(default_part_size(), 5_242_880);
        assert_eq!(default_upload_concurrency(), 4);
        assert_eq!(default_log_level(), "info");
        assert!(rsa_config().validate().is_ok());
    }

    #[test]
    fn loads_from_prefixed_environment() {
        let cfg = Config::load(env(&[
            ("S3_BUCKET", "data"),
            ("WRAP_MODE", "kms"),
            ("KMS_KEY_ID", "alias/objects"),
            ("PART_SIZE", "1048576"),
            ("STRICT_MATERIAL_DESCRIPTOR", "true"),
        ]))
        .unwrap();
        assert_eq!(cfg.s3_bucket, "data");
        assert_eq!(cfg.wrap_mode, WrapMode::Kms);
        assert_eq!(cfg.kms_key_id.as_deref(), Some("alias/objects"));
        assert_eq!(cfg.part_size, 1_048_576);
        assert!(cfg.strict_material_descriptor);
        assert_eq!(cfg.upload_concurrency, 4);
    }

    #[test]
    fn load_rejects_missing_bucket() {
        assert!(Config::load(env(&[("WRAP_MODE", "kms"), ("KMS_KEY_ID", "k")])).is_err());
    }

    #[test]
    fn validate_rejects_empty_bucket() {
        let cfg = Config {
            s3_bucket: " ".into(),
            ..rsa_config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_misaligned_part_size() {
        for part_size in [0, 100, 5_000_001, 5_242_888 + 4] {
            let cfg = Config {
                part_size,
                ..rsa_config()
            };
            assert!(cfg.validate().is_err(), "{part_size}");
        }
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let cfg = Config {
            upload_concurrency: 0,
            ..rsa_config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_requires_key_material_for_mode() {
        let cfg = Config {
            rsa_private_key_path: None,
            ..rsa_config()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            wrap_mode: WrapMode::Kms,
            ..rsa_config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn descriptor_is_canonicalised() {
        let cfg = Config {
            material_descriptor: r#"{"team":"a","env":"prod"}"#.into(),
            ..rsa_config()
        };
        assert_eq!(cfg.canonical_descriptor().unwrap(), r#"{"env":"prod","team":"a"}"#);

        let cfg = Config {
            material_descriptor: "not json".into(),
            ..rsa_config()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn builds_rsa_master_key_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let (public, private) = rsa_pair();
        let public_path = dir.path().join("pub.pem");
        let private_path = dir.path().join("priv.pem");
        std::fs::write(&public_path, public).unwrap();
        std::fs::write(&private_path, private).unwrap();

        let cfg = Config {
            rsa_public_key_path: Some(public_path.to_string_lossy().into_owned()),
            rsa_private_key_path: Some(private_path.to_string_lossy().into_owned()),
            material_descriptor: r#"{"k":"v"}"#.into(),
            ..rsa_config()
        };
        let master = cfg.master_key(None).unwrap();
        assert_eq!(master.wrap_algorithm(), RSA_WRAP_ALGORITHM);
        assert_eq!(master.material_descriptor(), r#"{"k":"v"}"#);
    }

    #[test]
    fn missing_key_file_is_reported() {
        let err = rsa_config().master_key(None).err().unwrap();
        assert!(format!("{err:#}").contains("RSA_PUBLIC_KEY_PATH"));
    }

    #[test]
    fn builds_kms_master_key() {
        let cfg = Config {
            wrap_mode: WrapMode::Kms,
            kms_key_id: Some("key-1".into()),
            ..rsa_config()
        };
        assert!(cfg.master_key(None).is_err());
        let client: Arc<dyn KmsClient> = Arc::new(FakeKms::new("AWS"));
        let master = cfg.master_key(Some(client)).unwrap();
        assert_eq!(master.wrap_algorithm(), format!("{KMS_WRAP_PREFIX}AWS"));
    }

    #[test]
    fn loads_key_directory() {
        assert!(rsa_config().key_directory().unwrap().is_none());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        std::fs::write(&path, r#"[{"descriptor": {"team": "b"}, "keys": ["key-2"]}]"#).unwrap();
        let cfg = Config {
            key_directory_path: Some(path.to_string_lossy().into_owned()),
            ..rsa_config()
        };
        let directory = cfg.key_directory().unwrap().unwrap();
        assert_eq!(directory.len(), 1);
    }
}
