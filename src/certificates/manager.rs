//! Certificate Manager
//!
//! Create-once, read and delete semantics over one private key file and one
//! certificate file in a directory.
//!
//! Private keys are generated with `rcgen` and stored as PEM. The public key
//! is always derived from the stored private key. Uploaded certificates are
//! validated with `x509-parser` (PEM first, DER as a fallback) and stored as
//! supplied.

use crate::certificates::CertificateError;
use crate::error::Error;
use bytes::Bytes;
use rcgen::KeyPair;
use std::fmt;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

type Result<T> = std::result::Result<T, CertificateError>;

// =============================================================================
// Material Type
// =============================================================================

/// Symbolic key material names accepted by the material lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialType {
    DomainCertificate,
    DomainPrivateKey,
    NativeCertificate,
    NativePrivateKey,
}

impl MaterialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialType::DomainCertificate => "domainCertificate",
            MaterialType::DomainPrivateKey => "domainPrivateKey",
            MaterialType::NativeCertificate => "nativeCertificate",
            MaterialType::NativePrivateKey => "nativePrivateKey",
        }
    }
}

impl fmt::Display for MaterialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaterialType {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "domainCertificate" => Ok(MaterialType::DomainCertificate),
            "domainPrivateKey" => Ok(MaterialType::DomainPrivateKey),
            "nativeCertificate" => Ok(MaterialType::NativeCertificate),
            "nativePrivateKey" => Ok(MaterialType::NativePrivateKey),
            other => Err(Error::Internal(format!(
                "Unrecognized key material type: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Certificate Manager
// =============================================================================

/// Owner of a private key file and a certificate file
#[derive(Debug, Clone)]
pub struct CertificateManager {
    dir: PathBuf,
    key_file: PathBuf,
    cert_file: PathBuf,
}

impl CertificateManager {
    /// Manage `key_file_name` and `cert_file_name` under `dir`
    pub fn new(dir: impl Into<PathBuf>, key_file_name: &str, cert_file_name: &str) -> Self {
        let dir = dir.into();
        Self {
            key_file: dir.join(key_file_name),
            cert_file: dir.join(cert_file_name),
            dir,
        }
    }

    /// Manager for the domain-facing material
    pub fn domain(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, "domain_private_key.pem", "domain_certificate.pem")
    }

    /// Manager for the appliance-native material
    pub fn native(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, "native_private_key.pem", "native_certificate.pem")
    }

    pub fn private_key_path(&self) -> &Path {
        &self.key_file
    }

    pub fn certificate_path(&self) -> &Path {
        &self.cert_file
    }

    /// Private key PEM, `None` if not created yet
    pub async fn get_private_key_bytes(&self) -> Result<Option<Bytes>> {
        read_optional(&self.key_file).await
    }

    /// Certificate bytes, `None` if not uploaded yet
    pub async fn get_certificate_bytes(&self) -> Result<Option<Bytes>> {
        read_optional(&self.cert_file).await
    }

    /// Public key PEM derived from the stored private key
    pub async fn get_public_key_bytes(&self) -> Result<Option<Bytes>> {
        let Some(private_key) = self.get_private_key_bytes().await? else {
            return Ok(None);
        };
        let pem = std::str::from_utf8(&private_key)
            .map_err(|e| CertificateError::Malformed(format!("private key is not PEM: {}", e)))?;
        let key_pair = KeyPair::from_pem(pem)
            .map_err(|e| CertificateError::Malformed(format!("private key: {}", e)))?;
        Ok(Some(Bytes::from(key_pair.public_key_pem())))
    }

    /// Generate a private key.
    ///
    /// Fails with [`CertificateError::AlreadyExists`] when a key exists and
    /// `overwrite` is false.
    pub async fn create_private_key_file(&self, overwrite: bool) -> Result<()> {
        let key_pair =
            KeyPair::generate().map_err(|e| CertificateError::KeyGeneration(e.to_string()))?;
        let pem = key_pair.serialize_pem();

        fs::create_dir_all(&self.dir).await?;
        if overwrite {
            fs::write(&self.key_file, pem).await?;
        } else {
            write_new(&self.key_file, pem.as_bytes()).await?;
        }
        restrict_permissions(&self.key_file).await?;

        info!("Created private key {}", self.key_file.display());
        Ok(())
    }

    /// Validate and store a certificate.
    ///
    /// Fails with [`CertificateError::AlreadyExists`] when a certificate is
    /// already stored.
    pub async fn create_certificate_file(&self, certificate: &[u8]) -> Result<()> {
        validate_certificate(certificate)?;

        fs::create_dir_all(&self.dir).await?;
        write_new(&self.cert_file, certificate).await?;

        info!("Stored certificate {}", self.cert_file.display());
        Ok(())
    }

    /// Remove all owned files.
    ///
    /// Fails with [`CertificateError::NotFound`] when nothing existed.
    pub async fn delete_key_material(&self) -> Result<()> {
        let mut removed = false;
        for path in [&self.key_file, &self.cert_file] {
            match fs::remove_file(path).await {
                Ok(()) => {
                    debug!("Removed {}", path.display());
                    removed = true;
                }
                Err(e) if e.kind() == IoErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if !removed {
            return Err(CertificateError::NotFound);
        }
        info!("Deleted key material in {}", self.dir.display());
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Accept a single X.509 certificate in PEM or DER encoding
fn validate_certificate(bytes: &[u8]) -> Result<()> {
    match x509_parser::pem::parse_x509_pem(bytes) {
        Ok((_, pem)) => {
            pem.parse_x509()
                .map_err(|e| CertificateError::Malformed(e.to_string()))?;
        }
        Err(_) => {
            x509_parser::parse_x509_certificate(bytes)
                .map_err(|e| CertificateError::Malformed(e.to_string()))?;
        }
    }
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<Bytes>> {
    match fs::read(path).await {
        Ok(data) => Ok(Some(Bytes::from(data))),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write `contents` to `path`, which must not exist yet. Creation and the
/// existence check are one filesystem operation.
async fn write_new(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
            return Err(CertificateError::AlreadyExists)
        }
        Err(e) => return Err(e.into()),
    };

    let written = match file.write_all(contents).await {
        Ok(()) => file.sync_all().await,
        Err(e) => Err(e),
    };
    drop(file);

    if let Err(e) = written {
        // Leave no half-written file behind to block the next attempt
        let _ = fs::remove_file(path).await;
        return Err(e.into());
    }
    Ok(())
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
