//! UDX Provisioning
//!
//! Creates the resources a federation partner needs to reach a bucket of
//! this appliance: a dedicated IAM user, a `udx-` prefixed bucket tagged
//! `udx=enabled`, and a bucket policy granting the user object access.
//!
//! Provisioning runs as a saga. Every forward step that creates something
//! records its undo action in a ledger; on failure the ledger is unwound in
//! reverse order. Resources that existed before the call are never touched.

use crate::domain::model::{UDX_BUCKET_PREFIX, UDX_TAG_ENABLED, UDX_TAG_KEY};
use crate::domain::ports::{
    BucketPolicy, BucketTags, IamUser, IdentityClient, ObjectStorageClient, PolicyStatement,
    S3ClientFactoryRef, SessionCredentials,
};
use crate::error::{Error, Result};
use crate::metrics::UslMetrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

/// Statement id of the UDX bucket policy
pub const UDX_POLICY_SID: &str = "UdxIamAccountPerm";

/// Object actions granted to the UDX user on its bucket
pub const UDX_POLICY_ACTIONS: [&str; 7] = [
    "s3:GetObject",
    "s3:PutObject",
    "s3:ListMultipartUploadParts",
    "s3:AbortMultipartUpload",
    "s3:GetObjectAcl",
    "s3:PutObjectAcl",
    "s3:PutObjectTagging",
];

// =============================================================================
// Request / Response
// =============================================================================

/// UDX provisioning request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionUdxRequest {
    /// Session of the S3 account the resources are created in
    pub session: SessionCredentials,
    pub iam_user_name: String,
    pub iam_user_password: String,
    /// Bucket name without the `udx-` prefix
    pub bucket_name: String,
}

/// Resources handed to the federation partner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UdxResources {
    pub iam_user_name: String,
    pub access_key_id: String,
    pub secret_key: String,
    pub bucket_name: String,
}

/// Name of the UDX bucket for `bucket_name`
pub fn udx_bucket_name(bucket_name: &str) -> String {
    format!("{}{}", UDX_BUCKET_PREFIX, bucket_name)
}

/// Policy granting `user` the UDX action set on `bucket_name`
pub fn udx_bucket_policy(user: &IamUser, bucket_name: &str) -> BucketPolicy {
    BucketPolicy {
        version: chrono::Utc::now().date_naive().to_string(),
        statement: vec![PolicyStatement {
            sid: UDX_POLICY_SID.to_string(),
            effect: "Allow".to_string(),
            principal: BTreeMap::from([("AWS".to_string(), user.arn.clone())]),
            action: UDX_POLICY_ACTIONS.iter().map(|a| a.to_string()).collect(),
            resource: format!("arn:aws:s3:::{}/*", bucket_name),
        }],
    }
}

// =============================================================================
// Saga Ledger
// =============================================================================

/// Compensating action for a committed step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoAction {
    DeleteIamUser(String),
    DeleteBucket(String),
}

/// What one provisioning attempt created, in commit order
#[derive(Debug, Default)]
pub struct ProvisioningLedger {
    undo: Vec<UndoAction>,
}

impl ProvisioningLedger {
    pub fn record(&mut self, action: UndoAction) {
        self.undo.push(action);
    }

    pub fn pending(&self) -> &[UndoAction] {
        &self.undo
    }

    /// Run undo actions newest first. Failures are logged and skipped.
    pub async fn compensate(self, s3: &dyn ObjectStorageClient, iam: &dyn IdentityClient) {
        for action in self.undo.into_iter().rev() {
            let result = match &action {
                UndoAction::DeleteBucket(name) => s3.delete_bucket(name).await,
                UndoAction::DeleteIamUser(name) => iam.delete_user(name).await,
            };
            match result {
                Ok(()) => info!("Rolled back UDX provisioning step: {:?}", action),
                Err(e) => error!("Failed to roll back UDX provisioning step {:?}: {}", action, e),
            }
        }
    }
}

// =============================================================================
// Provisioner
// =============================================================================

/// Runs UDX provisioning transactions
pub struct UdxProvisioner {
    clients: S3ClientFactoryRef,
    metrics: Option<UslMetrics>,
}

impl UdxProvisioner {
    pub fn new(clients: S3ClientFactoryRef) -> Self {
        Self {
            clients,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: UslMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Provision the UDX user and bucket.
    ///
    /// Either every resource is in place or the call fails with a single
    /// internal error after rolling back what it created.
    pub async fn provision(&self, request: &ProvisionUdxRequest) -> Result<UdxResources> {
        let s3 = self.clients.object_storage(&request.session)?;
        let iam = self.clients.identity(&request.session)?;

        let mut ledger = ProvisioningLedger::default();
        match self.run(request, s3.as_ref(), iam.as_ref(), &mut ledger).await {
            Ok(resources) => {
                info!(
                    "UDX resources ready: user {}, bucket {}",
                    resources.iam_user_name, resources.bucket_name
                );
                Ok(resources)
            }
            Err(e) => {
                error!("UDX provisioning failed: {}", e);
                ledger.compensate(s3.as_ref(), iam.as_ref()).await;
                if let Some(metrics) = &self.metrics {
                    metrics.provisioning_failures.inc();
                }
                Err(Error::Internal(format!(
                    "Failed to accomplish UDX S3 registration: {}",
                    e
                )))
            }
        }
    }

    async fn run(
        &self,
        request: &ProvisionUdxRequest,
        s3: &dyn ObjectStorageClient,
        iam: &dyn IdentityClient,
        ledger: &mut ProvisioningLedger,
    ) -> Result<UdxResources> {
        // 1-2. IAM user
        let user = match iam.probe_exists_by_delete(&request.iam_user_name).await? {
            Some(user) => user,
            None => {
                let user = create_iam_user(iam, &request.iam_user_name, &request.iam_user_password)
                    .await?;
                ledger.record(UndoAction::DeleteIamUser(user.user_name.clone()));
                user
            }
        };

        // 3. Credentials
        let credentials = iam.access_credentials(&user.user_name).await?;

        // 4-5. Bucket
        let bucket_name = udx_bucket_name(&request.bucket_name);
        debug!("Getting UDX bucket {}", bucket_name);
        let bucket = match s3.get_bucket(&bucket_name).await? {
            Some(bucket) => bucket,
            None => {
                let bucket = s3.create_bucket(&bucket_name).await?;
                info!("UDX bucket {} is created", bucket.name);
                ledger.record(UndoAction::DeleteBucket(bucket.name.clone()));
                bucket
            }
        };

        // 6. Tag
        let tags = BucketTags::from([(UDX_TAG_KEY.to_string(), UDX_TAG_ENABLED.to_string())]);
        s3.put_bucket_tagging(&bucket.name, tags).await?;

        // 7. Policy
        s3.put_bucket_policy(&bucket.name, &udx_bucket_policy(&user, &bucket.name))
            .await?;

        Ok(UdxResources {
            iam_user_name: user.user_name,
            access_key_id: credentials.access_key_id,
            secret_key: credentials.secret_key,
            bucket_name: bucket.name,
        })
    }
}

/// Create the user and its login profile; a user left without a profile is
/// deleted before returning the error.
async fn create_iam_user(iam: &dyn IdentityClient, user_name: &str, password: &str) -> Result<IamUser> {
    debug!("Creating UDX IAM user {}", user_name);
    let user = iam
        .create_user(user_name)
        .await
        .map_err(|e| Error::Internal(format!("Failed to create UDX IAM user: {}", e)))?;
    info!("UDX IAM user {} is created", user_name);

    if let Err(e) = iam.create_login_profile(user_name, password, false).await {
        if let Err(cleanup) = iam.delete_user(user_name).await {
            error!("Failed to delete UDX IAM user {} without login profile: {}", user_name, cleanup);
        }
        return Err(Error::Internal(format!(
            "Failed to create login profile for UDX IAM user: {}",
            e
        )));
    }
    info!("Login profile for UDX IAM user {} is created", user_name);

    Ok(user)
}
