//! Domain Ports - Collaborator trait definitions for the USL agent
//!
//! These traits define the boundaries between the agent's logic and the
//! object-storage, identity, persistence and registration back-ends.
//! Adapters in [`crate::usl::backends`] implement them.

use crate::domain::model::Volume;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

// =============================================================================
// Object Storage Types
// =============================================================================

/// A remote bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
}

impl Bucket {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Bucket tag set
pub type BucketTags = BTreeMap<String, String>;

/// Bucket policy document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BucketPolicy {
    pub version: String,
    pub statement: Vec<PolicyStatement>,
}

/// Single statement of a bucket policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub sid: String,
    pub effect: String,
    pub principal: BTreeMap<String, String>,
    pub action: Vec<String>,
    pub resource: String,
}

// =============================================================================
// Identity Types
// =============================================================================

/// An identity-management (IAM) user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamUser {
    pub user_name: String,
    pub user_id: String,
    pub arn: String,
}

/// Access credentials of an IAM user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCredentials {
    pub access_key_id: String,
    pub secret_key: String,
}

/// Credentials of the session on whose behalf clients are built
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCredentials {
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
}

// =============================================================================
// Object Storage Port
// =============================================================================

/// Port for S3-compatible object storage operations
#[async_trait]
pub trait ObjectStorageClient: Send + Sync {
    /// List every bucket visible to the session
    async fn list_buckets(&self) -> Result<Vec<Bucket>>;

    /// Get a bucket by name, `None` if it does not exist
    async fn get_bucket(&self, name: &str) -> Result<Option<Bucket>>;

    /// Create a bucket
    async fn create_bucket(&self, name: &str) -> Result<Bucket>;

    /// Delete a bucket
    async fn delete_bucket(&self, name: &str) -> Result<()>;

    /// Get the bucket's tag set (empty when untagged)
    async fn get_bucket_tagging(&self, name: &str) -> Result<BucketTags>;

    /// Replace the bucket's tag set
    async fn put_bucket_tagging(&self, name: &str, tags: BucketTags) -> Result<()>;

    /// Attach a policy to the bucket
    async fn put_bucket_policy(&self, name: &str, policy: &BucketPolicy) -> Result<()>;
}

// =============================================================================
// Identity Port
// =============================================================================

/// Port for identity-management operations
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Create a user
    async fn create_user(&self, user_name: &str) -> Result<IamUser>;

    /// Create a login profile for a user
    async fn create_login_profile(
        &self,
        user_name: &str,
        password: &str,
        require_reset: bool,
    ) -> Result<()>;

    /// Delete a user
    async fn delete_user(&self, user_name: &str) -> Result<()>;

    /// Determine whether a usable account already exists.
    ///
    /// Workaround for identity back-ends without a "get user" primitive: the
    /// only available probe is deletion. An account that existed is removed
    /// by the probe and must be recreated by the caller, so this always
    /// reports the account as absent. Back-ends with a read primitive should
    /// override it. Not a general-purpose pattern.
    async fn probe_exists_by_delete(&self, user_name: &str) -> Result<Option<IamUser>> {
        match self.delete_user(user_name).await {
            Ok(()) => debug!("IAM user {} existed and was removed by the probe", user_name),
            Err(e) => debug!("IAM user {} treated as absent: {}", user_name, e),
        }
        Ok(None)
    }

    /// Get access credentials for a user.
    ///
    /// Key creation/listing is not supported by the identity back-end yet;
    /// the default returns empty credentials.
    async fn access_credentials(&self, _user_name: &str) -> Result<AccessCredentials> {
        Ok(AccessCredentials::default())
    }
}

// =============================================================================
// Client Factory Port
// =============================================================================

/// Port building per-session object storage and identity clients
pub trait S3ClientFactory: Send + Sync {
    /// Object storage client acting with `credentials`
    fn object_storage(&self, credentials: &SessionCredentials) -> Result<ObjectStorageClientRef>;

    /// Identity client acting with `credentials`
    fn identity(&self, credentials: &SessionCredentials) -> Result<IdentityClientRef>;
}

// =============================================================================
// Volume Store Port
// =============================================================================

/// Port for durable volume records, keyed by volume UUID
#[async_trait]
pub trait VolumeStore: Send + Sync {
    /// Load every persisted volume
    async fn load_all(&self) -> Result<Vec<Volume>>;

    /// Persist (insert or replace) a volume
    async fn store(&self, volume: &Volume) -> Result<()>;

    /// Delete a volume record; deleting an absent record is not an error
    async fn delete(&self, uuid: &Uuid) -> Result<()>;
}

// =============================================================================
// Registration Authority Port
// =============================================================================

/// Start request sent to the registration authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub url: String,
    pub reg_pin: String,
    pub reg_token: String,
}

/// Status reported by the registration authority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    /// Registration accepted and pending confirmation
    Created,
    /// Registration confirmed
    Confirmed,
    /// Any other response
    Unexpected(u16),
}

impl std::fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationStatus::Created => write!(f, "created"),
            RegistrationStatus::Confirmed => write!(f, "confirmed"),
            RegistrationStatus::Unexpected(code) => write!(f, "unexpected status code {}", code),
        }
    }
}

/// Port for the remote registration authority
#[async_trait]
pub trait RegistrationAuthority: Send + Sync {
    /// Start a registration
    async fn start(&self, request: &RegistrationRequest) -> Result<RegistrationStatus>;

    /// Poll the registration status
    async fn status(&self) -> Result<RegistrationStatus>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ObjectStorageClientRef = Arc<dyn ObjectStorageClient>;
pub type IdentityClientRef = Arc<dyn IdentityClient>;
pub type S3ClientFactoryRef = Arc<dyn S3ClientFactory>;
pub type VolumeStoreRef = Arc<dyn VolumeStore>;
pub type RegistrationAuthorityRef = Arc<dyn RegistrationAuthority>;
