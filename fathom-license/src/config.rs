//! Engine configuration, loaded from TOML.
//!
//! ```toml
//! product_name = "FathomOS"
//! supported_format_versions = ["1.0"]
//! license_path = "/opt/fathom/license.lic"
//! running_major_version = 9
//!
//! [keys]
//! "fathom-2026-01" = "BASE64_SEC1_PUBLIC_KEY"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::codec::{LICENSE_FILE_EXTENSION, SUPPORTED_FORMAT_VERSIONS};
use crate::error::{LicenseError, LicenseResult};
use crate::signing::{IssuerVerifyingKey, KeyRing};
use crate::validation::ValidationEngine;

/// Configuration for a [`ValidationEngine`].
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Product this installation runs; licenses for other products are rejected.
    pub product_name: String,
    #[serde(default = "default_versions")]
    pub supported_format_versions: Vec<String>,
    /// Trusted issuer keys, key id to base64 SEC1 public key.
    #[serde(default)]
    pub keys: BTreeMap<String, String>,
    #[serde(default)]
    pub license_path: Option<PathBuf>,
    /// Major version of the installed build, checked against each license.
    #[serde(default)]
    pub running_major_version: Option<u32>,
}

impl EngineConfig {
    /// Minimal configuration with no keys.
    pub fn new(product_name: impl Into<String>) -> Self {
        Self {
            product_name: product_name.into(),
            supported_format_versions: default_versions(),
            keys: BTreeMap::new(),
            license_path: None,
            running_major_version: None,
        }
    }

    /// Parses TOML configuration.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the TOML is malformed or the product name is empty.
    pub fn from_toml_str(content: &str) -> LicenseResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| LicenseError::Config(e.to_string()))?;
        if config.product_name.trim().is_empty() {
            return Err(LicenseError::Config("product_name is empty".into()));
        }
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    pub fn load(path: &Path) -> LicenseResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Builds the key ring from `keys`.
    ///
    /// # Errors
    ///
    /// Returns `Config` naming the key id whose key cannot be decoded.
    pub fn key_ring(&self) -> LicenseResult<KeyRing> {
        let mut ring = KeyRing::new();
        for (id, encoded) in &self.keys {
            let key = IssuerVerifyingKey::from_base64(encoded)
                .map_err(|e| LicenseError::Config(format!("key {id}: {e}")))?;
            ring.insert(id.clone(), key);
        }
        Ok(ring)
    }

    /// Where the license file lives: `license_path`, or
    /// `<data dir>/Fathom/license.lic`.
    #[must_use]
    pub fn resolved_license_path(&self) -> PathBuf {
        self.license_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("Fathom")
                .join(format!("license.{LICENSE_FILE_EXTENSION}"))
        })
    }

    /// Builds an engine trusting the configured keys.
    pub fn build_engine(&self) -> LicenseResult<ValidationEngine<KeyRing>> {
        let ring = self.key_ring()?;
        if ring.is_empty() {
            tracing::warn!("no issuer keys configured, every license will fail verification");
        }
        Ok(ValidationEngine::new(self.product_name.clone(), ring)
            .with_supported_versions(self.supported_format_versions.clone())
            .with_running_major(self.running_major_version))
    }
}

fn default_versions() -> Vec<String> {
    SUPPORTED_FORMAT_VERSIONS
        .iter()
        .map(|v| (*v).to_string())
        .collect()
}
