//! Key material owned by the agent
//!
//! Two independent [`CertificateManager`] instances (domain-facing and
//! appliance-native) each own a private key file and a certificate file.

pub mod manager;

pub use manager::{CertificateManager, MaterialType};

use thiserror::Error;

/// Errors raised by a certificate manager
#[derive(Error, Debug)]
pub enum CertificateError {
    #[error("key material already exists")]
    AlreadyExists,

    #[error("key material not found")]
    NotFound,

    #[error("malformed certificate: {0}")]
    Malformed(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("key material I/O: {0}")]
    Io(#[from] std::io::Error),
}
