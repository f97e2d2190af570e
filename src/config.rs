//! Agent Configuration
//!
//! `UslConfig` is read from an optional YAML file. Every section falls back to
//! its defaults, so an empty file (or no file at all) is a valid config.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Upper bound of `uds.registration_timeout_secs` (one day)
pub const MAX_REGISTRATION_TIMEOUT_SECS: u64 = 24 * 60 * 60;

// =============================================================================
// Sections
// =============================================================================

/// Product identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductConfig {
    /// Friendly system name, prefixed to volume names
    pub friendly_name: String,
    /// Device UUID; a random one is generated at startup when absent
    pub uuid: Option<Uuid>,
    /// Device vendor
    pub vendor: String,
}

impl Default for ProductConfig {
    fn default() -> Self {
        Self {
            friendly_name: "local".to_string(),
            uuid: None,
            vendor: crate::domain::DEFAULT_DEVICE_VENDOR.to_string(),
        }
    }
}

/// Object storage endpoint and the agent's own credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_key: String,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            access_key_id: String::new(),
            secret_key: String::new(),
        }
    }
}

/// Registration authority (UDS)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UdsConfig {
    /// Base URL of the registration authority
    pub url: String,
    /// Delay between status polls
    pub poll_interval_ms: u64,
    /// Deadline for confirmation, counted from the start of polling
    pub registration_timeout_secs: u64,
}

impl Default for UdsConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5000".to_string(),
            poll_interval_ms: 1000,
            registration_timeout_secs: 60,
        }
    }
}

impl UdsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_secs)
    }
}

/// Volume cache refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeCacheConfig {
    pub update_period_secs: f64,
}

impl Default for VolumeCacheConfig {
    fn default() -> Self {
        Self {
            update_period_secs: 3.0,
        }
    }
}

impl VolumeCacheConfig {
    pub fn update_period(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.update_period_secs).map_err(|e| {
            Error::Configuration(format!(
                "volume_cache.update_period_secs {} is out of range: {}",
                self.update_period_secs, e
            ))
        })
    }
}

/// Key material directories
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateConfig {
    pub domain_dir: PathBuf,
    pub native_dir: PathBuf,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            domain_dir: PathBuf::from("/etc/usl/domain"),
            native_dir: PathBuf::from("/etc/usl/native"),
        }
    }
}

/// Volume record store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory of the file-backed store; in-memory when absent
    pub path: Option<PathBuf>,
}

/// REST API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub rest_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            rest_addr: "0.0.0.0:28100".to_string(),
        }
    }
}

impl ApiConfig {
    pub fn rest_addr(&self) -> Result<SocketAddr> {
        self.rest_addr
            .parse()
            .map_err(|e| Error::Configuration(format!("Invalid REST API address: {}", e)))
    }
}

// =============================================================================
// UslConfig
// =============================================================================

/// Complete agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UslConfig {
    pub product: ProductConfig,
    pub s3: S3Config,
    pub uds: UdsConfig,
    pub volume_cache: VolumeCacheConfig,
    pub certificates: CertificateConfig,
    pub store: StoreConfig,
    pub api: ApiConfig,
}

impl UslConfig {
    /// Parse a YAML document
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = if text.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(text)
                .map_err(|e| Error::Configuration(format!("Invalid YAML config: {}", e)))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }

    /// Check values the agent cannot start without
    pub fn validate(&self) -> Result<()> {
        if !(self.volume_cache.update_period_secs.is_finite()
            && self.volume_cache.update_period_secs > 0.0)
        {
            return Err(Error::Configuration(format!(
                "volume_cache.update_period_secs must be positive, got {}",
                self.volume_cache.update_period_secs
            )));
        }
        self.volume_cache.update_period()?;
        if self.uds.registration_timeout_secs > MAX_REGISTRATION_TIMEOUT_SECS {
            return Err(Error::Configuration(format!(
                "uds.registration_timeout_secs must be at most {}, got {}",
                MAX_REGISTRATION_TIMEOUT_SECS, self.uds.registration_timeout_secs
            )));
        }
        if self.uds.poll_interval_ms == 0 {
            return Err(Error::Configuration(
                "uds.poll_interval_ms must be positive".into(),
            ));
        }
        self.api.rest_addr()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = UslConfig::default();
        assert_eq!(config.product.friendly_name, "local");
        assert!(config.product.uuid.is_none());
        assert_eq!(config.volume_cache.update_period().unwrap(), Duration::from_secs(3));
        assert_eq!(config.uds.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.uds.registration_timeout(), Duration::from_secs(60));
        assert!(config.store.path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml() {
        let config = UslConfig::from_yaml(
            r#"
product:
  friendly_name: lab-appliance
  uuid: 0b9d2f2e-7d55-4a43-9a3c-3a0d8c6a1e11
volume_cache:
  update_period_secs: 0.5
"#,
        )
        .unwrap();

        assert_eq!(config.product.friendly_name, "lab-appliance");
        assert_eq!(
            config.product.uuid.unwrap().to_string(),
            "0b9d2f2e-7d55-4a43-9a3c-3a0d8c6a1e11"
        );
        assert_eq!(config.product.vendor, "Seagate");
        assert_eq!(config.volume_cache.update_period().unwrap(), Duration::from_millis(500));
        assert_eq!(config.uds.url, "http://localhost:5000");
    }

    #[test]
    fn test_empty_yaml() {
        let config = UslConfig::from_yaml("").unwrap();
        assert_eq!(config.api.rest_addr, "0.0.0.0:28100");
    }

    #[test]
    fn test_invalid_values() {
        assert!(UslConfig::from_yaml("volume_cache:\n  update_period_secs: 0\n").is_err());
        assert!(UslConfig::from_yaml("api:\n  rest_addr: not-an-address\n").is_err());
        assert!(UslConfig::from_yaml("product: [1, 2").is_err());
    }

    #[test]
    fn test_out_of_range_timing() {
        let err = UslConfig::from_yaml("volume_cache:\n  update_period_secs: 1.0e300\n").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let mut config = UslConfig::default();
        config.volume_cache.update_period_secs = 1.0e300;
        assert!(matches!(
            config.volume_cache.update_period(),
            Err(Error::Configuration(_))
        ));

        let err = UslConfig::from_yaml("uds:\n  registration_timeout_secs: 18446744073709551615\n")
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let mut config = UslConfig::default();
        config.uds.registration_timeout_secs = MAX_REGISTRATION_TIMEOUT_SECS;
        assert!(config.validate().is_ok());
        config.uds.registration_timeout_secs += 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("usl.yaml");
        std::fs::write(&path, "s3:\n  endpoint: http://s3.local:7081\n").unwrap();

        let config = UslConfig::load(&path).unwrap();
        assert_eq!(config.s3.endpoint, "http://s3.local:7081");

        assert!(UslConfig::load(tmp.path().join("missing.yaml")).is_err());
    }
}
