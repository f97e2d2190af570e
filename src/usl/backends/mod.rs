//! Collaborator Adapters
//!
//! Provides adapters for the agent's collaborators:
//! - In-memory object storage and identity (embedded runs, tests)
//! - In-memory and file-backed volume stores
//! - UDS registration authority over HTTP

pub mod identity;
pub mod object_storage;
pub mod uds;
pub mod volume_store;

pub use identity::*;
pub use object_storage::*;
pub use uds::*;
pub use volume_store::*;

use crate::domain::ports::{
    IdentityClientRef, ObjectStorageClientRef, S3ClientFactory, SessionCredentials,
};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// =============================================================================
// Fault Switch
// =============================================================================

/// Outage and per-operation failure switches shared by the in-memory adapters
#[derive(Debug)]
pub struct FaultSwitch {
    backend: &'static str,
    available: AtomicBool,
    failing: Mutex<HashSet<String>>,
}

impl FaultSwitch {
    pub fn new(backend: &'static str) -> Self {
        Self {
            backend,
            available: AtomicBool::new(true),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Simulate an outage (every call fails) or recover from one
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make every call of `operation` fail until cleared
    pub fn fail_on(&self, operation: &str) {
        self.failing.lock().insert(operation.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    /// Gate a call to `operation`
    pub fn check(&self, operation: &str) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::BackendUnavailable {
                backend: self.backend.to_string(),
            });
        }
        if self.failing.lock().contains(operation) {
            return Err(Error::BackendOperationFailed {
                backend: self.backend.to_string(),
                operation: operation.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// In-Memory Client Factory
// =============================================================================

/// Client factory handing out one shared in-memory object storage and
/// identity back-end regardless of the session credentials
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    pub object_storage: Arc<InMemoryObjectStorage>,
    pub identity: Arc<InMemoryIdentity>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl S3ClientFactory for InMemoryBackend {
    fn object_storage(&self, _credentials: &SessionCredentials) -> Result<ObjectStorageClientRef> {
        Ok(self.object_storage.clone())
    }

    fn identity(&self, _credentials: &SessionCredentials) -> Result<IdentityClientRef> {
        Ok(self.identity.clone())
    }
}
