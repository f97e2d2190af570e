//! In-Memory Object Storage
//!
//! S3-style bucket registry with tags and policies, used for embedded runs
//! and tests.

use crate::domain::ports::{Bucket, BucketPolicy, BucketTags, ObjectStorageClient};
use crate::error::{Error, Result};
use crate::usl::backends::FaultSwitch;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
struct BucketState {
    tags: BucketTags,
    policy: Option<BucketPolicy>,
}

/// In-memory [`ObjectStorageClient`]
#[derive(Debug)]
pub struct InMemoryObjectStorage {
    buckets: DashMap<String, BucketState>,
    faults: FaultSwitch,
}

impl Default for InMemoryObjectStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStorage {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            faults: FaultSwitch::new("s3"),
        }
    }

    /// Simulate an outage
    pub fn set_available(&self, available: bool) {
        self.faults.set_available(available);
    }

    /// Fault switches of this back-end
    pub fn faults(&self) -> &FaultSwitch {
        &self.faults
    }

    /// Policy attached to `name`, if any
    pub fn bucket_policy(&self, name: &str) -> Option<BucketPolicy> {
        self.buckets.get(name).and_then(|b| b.policy.clone())
    }

    fn missing(name: &str) -> Error {
        Error::not_found("Bucket", name)
    }
}

#[async_trait]
impl ObjectStorageClient for InMemoryObjectStorage {
    async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        self.faults.check("list_buckets")?;
        let mut names: Vec<String> = self.buckets.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names.into_iter().map(Bucket::new).collect())
    }

    async fn get_bucket(&self, name: &str) -> Result<Option<Bucket>> {
        self.faults.check("get_bucket")?;
        Ok(self.buckets.get(name).map(|_| Bucket::new(name)))
    }

    async fn create_bucket(&self, name: &str) -> Result<Bucket> {
        self.faults.check("create_bucket")?;
        if !is_valid_bucket_name(name) {
            return Err(Error::BadRequest(format!(
                "Invalid bucket name: {}. Must be 3-63 characters, lowercase, no underscores",
                name
            )));
        }
        if self.buckets.contains_key(name) {
            return Err(Error::conflict("Bucket", name));
        }

        self.buckets.insert(name.to_string(), BucketState::default());
        info!("Created bucket: {}", name);
        Ok(Bucket::new(name))
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        self.faults.check("delete_bucket")?;
        self.buckets
            .remove(name)
            .map(|_| info!("Deleted bucket: {}", name))
            .ok_or_else(|| Self::missing(name))
    }

    async fn get_bucket_tagging(&self, name: &str) -> Result<BucketTags> {
        self.faults.check("get_bucket_tagging")?;
        self.buckets
            .get(name)
            .map(|b| b.tags.clone())
            .ok_or_else(|| Self::missing(name))
    }

    async fn put_bucket_tagging(&self, name: &str, tags: BucketTags) -> Result<()> {
        self.faults.check("put_bucket_tagging")?;
        let mut bucket = self.buckets.get_mut(name).ok_or_else(|| Self::missing(name))?;
        debug!("Tagging bucket {}: {:?}", name, tags);
        bucket.tags = tags;
        Ok(())
    }

    async fn put_bucket_policy(&self, name: &str, policy: &BucketPolicy) -> Result<()> {
        self.faults.check("put_bucket_policy")?;
        let mut bucket = self.buckets.get_mut(name).ok_or_else(|| Self::missing(name))?;
        debug!("Attaching policy to bucket {}", name);
        bucket.policy = Some(policy.clone());
        Ok(())
    }
}

/// Validate S3 bucket name
fn is_valid_bucket_name(name: &str) -> bool {
    if name.len() < 3 || name.len() > 63 {
        return false;
    }

    let edge_ok = |c: Option<char>| c.map(|c| c.is_ascii_lowercase() || c.is_ascii_digit()).unwrap_or(false);
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        return false;
    }

    name.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        && !name.contains("..")
        && name.parse::<std::net::Ipv4Addr>().is_err()
}
