//! USL Agent - Device-management bridge for an object storage appliance
//!
//! Exposes the appliance and its UDX-enabled buckets ("volumes") to an
//! external device-management protocol, keeps the volume inventory in sync
//! with the object storage service, and provisions the federation resources
//! used for UDX data exchange.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                          REST API (/usl/v1)                                  │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                            UslService                                        │
//! │  ┌──────────────────┐  ┌──────────────┐  ┌──────────────┐  ┌─────────────┐  │
//! │  │  Volume Cache    │  │     UDX      │  │ Registration │  │ Certificate │  │
//! │  │  Reconciler      │  │ Provisioning │  │  Handshake   │  │  Managers   │  │
//! │  └────────┬─────────┘  └──────┬───────┘  └──────┬───────┘  └─────────────┘  │
//! │           │ events            │                 │                            │
//! │  ┌────────┴─────────┐         │                 │                            │
//! │  │  Event Channel   │         │                 │                            │
//! │  └────────┬─────────┘         │                 │                            │
//! ├───────────┼───────────────────┼─────────────────┼────────────────────────────┤
//! │           │             Collaborator Ports      │                            │
//! │  ┌────────┴─────────┐  ┌──────┴───────────────┐ ┌┴─────────────────────────┐ │
//! │  │  Volume Store    │  │ Object Storage / IAM │ │ Registration Authority   │ │
//! │  └──────────────────┘  └──────────────────────┘ └──────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`usl`]: Service façade, REST API and collaborator adapters
//! - [`volumes`]: Volume cache reconciliation and the volume event channel
//! - [`udx`]: UDX resource provisioning and device registration
//! - [`certificates`]: Domain and native key material
//! - [`domain`]: Core domain types and collaborator traits
//! - [`config`]: Agent configuration
//! - [`metrics`]: Prometheus metrics
//! - [`error`]: Error types and handling

pub mod certificates;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod udx;
pub mod usl;
pub mod volumes;

// Re-export commonly used types
pub use certificates::{CertificateError, CertificateManager, MaterialType};

pub use config::UslConfig;

pub use domain::model::{
    Device, MountResponse, NetworkInterface, PublicEvent, PublicVolume, SystemInfo, Volume,
    VolumeEvent,
};

pub use domain::ports::{
    IdentityClient, ObjectStorageClient, RegistrationAuthority, S3ClientFactory, VolumeStore,
};

pub use error::{Error, ErrorKind, Result};

pub use metrics::UslMetrics;

pub use udx::{ProvisionUdxRequest, RegistrationHandshake, UdxProvisioner, UdxResources};

pub use usl::api::{ApiServer, ApiServerConfig};
pub use usl::backends::{FileVolumeStore, InMemoryBackend, InMemoryVolumeStore, UdsClient};
pub use usl::{UslDependencies, UslService};

pub use volumes::{VolumeCacheReconciler, VolumeDelta};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
