//! USL Service
//!
//! Façade composing the volume cache, the event channel, UDX provisioning,
//! device registration and the key material managers. Every public operation
//! of the REST surface maps onto one method here.

use crate::certificates::{CertificateError, CertificateManager, MaterialType};
use crate::config::UslConfig;
use crate::domain::model::{
    Device, MountResponse, NetworkInterface, PublicEvent, PublicVolume, SystemInfo,
};
use crate::domain::ports::{
    RegistrationAuthorityRef, S3ClientFactoryRef, SessionCredentials, VolumeStoreRef,
};
use crate::error::{Error, Result};
use crate::metrics::UslMetrics;
use crate::udx::{ProvisionUdxRequest, RegistrationHandshake, UdxProvisioner, UdxResources};
use crate::volumes::{event_channel, EventReceiver, VolumeCacheReconciler};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

/// Handle returned by the unmount stub
pub const UNMOUNT_HANDLE: &str = "handle";

/// Collaborators the service is built on
#[derive(Clone)]
pub struct UslDependencies {
    /// Builds object storage and identity clients per session
    pub clients: S3ClientFactoryRef,
    /// Durable volume records
    pub store: VolumeStoreRef,
    /// Registration authority (UDS)
    pub authority: RegistrationAuthorityRef,
}

/// Registration token response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationToken {
    pub registration_token: String,
}

/// The USL service
pub struct UslService {
    device: Device,
    reconciler: Arc<VolumeCacheReconciler>,
    events: EventReceiver,
    provisioner: UdxProvisioner,
    registration: RegistrationHandshake,
    domain_certificates: CertificateManager,
    native_certificates: CertificateManager,
    metrics: UslMetrics,
    cancel: CancellationToken,
    reconciliation_task: Mutex<Option<JoinHandle<()>>>,
}

impl UslService {
    /// Build the service, restore the volume cache and start the
    /// background reconciliation task.
    pub async fn new(config: &UslConfig, deps: UslDependencies) -> Result<Arc<Self>> {
        let metrics = UslMetrics::new()?;

        let device_uuid = config.product.uuid.unwrap_or_else(Uuid::new_v4);
        let device = Device::new(
            config.product.friendly_name.clone(),
            device_uuid,
            config.product.vendor.clone(),
        );
        info!("USL device {} ({})", device.name, device.uuid);

        // The reconciler lists buckets with the agent's own credentials
        let agent_session = SessionCredentials {
            access_key: config.s3.access_key_id.clone(),
            secret_key: config.s3.secret_key.clone(),
            session_token: None,
        };
        let s3 = deps.clients.object_storage(&agent_session)?;

        let (sender, events) = event_channel(deps.store.clone());
        let events = events.with_metrics(metrics.clone());

        let reconciler = VolumeCacheReconciler::new(device.clone(), s3, sender)
            .with_metrics(metrics.clone());
        reconciler.bootstrap(deps.store.as_ref()).await;
        let reconciler = Arc::new(reconciler);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            reconciler
                .clone()
                .run(config.volume_cache.update_period()?, cancel.clone()),
        );

        let provisioner = UdxProvisioner::new(deps.clients.clone()).with_metrics(metrics.clone());
        let registration = RegistrationHandshake::new(
            deps.authority,
            config.uds.poll_interval(),
            config.uds.registration_timeout(),
        )
        .with_metrics(metrics.clone());

        Ok(Arc::new(Self {
            device,
            reconciler,
            events,
            provisioner,
            registration,
            domain_certificates: CertificateManager::domain(&config.certificates.domain_dir),
            native_certificates: CertificateManager::native(&config.certificates.native_dir),
            metrics,
            cancel,
            reconciliation_task: Mutex::new(Some(task)),
        }))
    }

    /// Stop the reconciliation task and wait for it to finish
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.reconciliation_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Volume cache task ended abnormally: {}", e);
            }
        }
        info!("USL service stopped");
    }

    /// Whether the reconciliation task is still scheduled
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn metrics(&self) -> &UslMetrics {
        &self.metrics
    }

    pub fn reconciler(&self) -> &Arc<VolumeCacheReconciler> {
        &self.reconciler
    }

    // =========================================================================
    // Devices and Volumes
    // =========================================================================

    /// All devices (this appliance)
    pub fn get_device_list(&self) -> Vec<Device> {
        vec![self.device.clone()]
    }

    /// Public records of the volumes of `device_id`
    pub fn get_device_volumes_list(&self, device_id: &Uuid) -> Result<Vec<PublicVolume>> {
        Ok(self
            .reconciler
            .volumes_for_device(device_id)?
            .iter()
            .map(|v| v.to_public())
            .collect())
    }

    /// Attach a volume. The handle and the mount path are the bucket name.
    pub fn post_device_volume_mount(
        &self,
        device_id: &Uuid,
        volume_id: &Uuid,
    ) -> Result<MountResponse> {
        self.reconciler.check_device(device_id)?;
        let volume = self.reconciler.volume(volume_id)?;
        Ok(MountResponse {
            handle: volume.bucket_name.clone(),
            mount_path: volume.bucket_name,
        })
    }

    /// Detach a volume.
    ///
    /// Detaching is not supported by the object storage back-end: after the
    /// identity checks this returns a fixed handle and does nothing else.
    pub fn post_device_volume_unmount(&self, device_id: &Uuid, volume_id: &Uuid) -> Result<String> {
        self.reconciler.check_device(device_id)?;
        self.reconciler.volume(volume_id)?;
        Ok(UNMOUNT_HANDLE.to_string())
    }

    /// Wait for the next volume event and apply its persistence side effect
    pub async fn get_events(&self) -> Result<PublicEvent> {
        self.events.next_event().await
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register this device with the registration authority
    pub async fn register_device(&self, url: &str, pin: &str) -> Result<()> {
        self.registration.register(url, pin).await
    }

    /// Issue a fresh registration token
    pub fn get_registration_token(&self) -> RegistrationToken {
        RegistrationToken {
            registration_token: self.registration.issue_token(),
        }
    }

    // =========================================================================
    // System
    // =========================================================================

    pub fn get_system(&self) -> SystemInfo {
        SystemInfo {
            model: "EES".to_string(),
            system_type: "ees".to_string(),
            serial_number: self.device.uuid.to_string(),
            friendly_name: self.device.name.clone(),
            firmware_version: "0.00".to_string(),
        }
    }

    // TODO: enumerate the host's interfaces once the appliance exposes them
    pub fn get_network_interfaces(&self) -> Vec<NetworkInterface> {
        vec![NetworkInterface {
            name: "tbd".to_string(),
            interface_type: "tbd".to_string(),
            mac_address: "AA:BB:CC:DD:EE:FF".to_string(),
            is_active: true,
            is_loopback: false,
            ipv4: "127.0.0.1".to_string(),
            netmask: "255.0.0.0".to_string(),
            broadcast: "127.255.255.255".to_string(),
            gateway: "127.255.255.254".to_string(),
            ipv6: "::1".to_string(),
            link: "tbd".to_string(),
            duplex: "tbd".to_string(),
            speed: 0,
        }]
    }

    // =========================================================================
    // Key Material
    // =========================================================================

    /// Create the domain key pair and return its public key
    pub async fn create_domain_key(&self) -> Result<Bytes> {
        let manager = &self.domain_certificates;
        if manager.get_private_key_bytes().await?.is_some() {
            return Err(Error::conflict("PrivateKey", "domain"));
        }
        match manager.create_private_key_file(false).await {
            Ok(()) => {}
            // Lost a race with a concurrent creation
            Err(CertificateError::AlreadyExists) => {
                return Err(Error::conflict("PrivateKey", "domain"))
            }
            Err(e) => return Err(e.into()),
        }

        if manager.get_private_key_bytes().await?.is_none() {
            let reason = "Could not read USL private key";
            error!("{}", reason);
            return Err(Error::Internal(reason.to_string()));
        }
        manager.get_public_key_bytes().await?.ok_or_else(|| {
            let reason = "Could not read USL public key";
            error!("{}", reason);
            Error::Internal(reason.to_string())
        })
    }

    /// Store the domain certificate; one-shot
    pub async fn put_domain_certificate(&self, certificate: &[u8]) -> Result<()> {
        let manager = &self.domain_certificates;
        if manager.get_certificate_bytes().await?.is_some() {
            return Err(Error::conflict("Certificate", "domain"));
        }
        match manager.create_certificate_file(certificate).await {
            Ok(()) => Ok(()),
            Err(CertificateError::AlreadyExists) => Err(Error::conflict("Certificate", "domain")),
            Err(CertificateError::Malformed(e)) => {
                let reason = "Could not update USL certificate";
                error!("{}: {}", reason, e);
                Err(Error::Internal(reason.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete all domain key material
    pub async fn delete_domain_certificates(&self) -> Result<()> {
        self.domain_certificates.delete_key_material().await?;
        Ok(())
    }

    /// Key material by symbolic type name
    pub async fn get_material(&self, material_type: &str) -> Result<Bytes> {
        let material: MaterialType = material_type.parse().map_err(|e| {
            error!("{}", e);
            e
        })?;
        let bytes = match material {
            MaterialType::DomainCertificate => self.domain_certificates.get_certificate_bytes().await?,
            MaterialType::DomainPrivateKey => self.domain_certificates.get_private_key_bytes().await?,
            MaterialType::NativeCertificate => self.native_certificates.get_certificate_bytes().await?,
            MaterialType::NativePrivateKey => self.native_certificates.get_private_key_bytes().await?,
        };
        bytes.ok_or_else(|| Error::not_found("KeyMaterial", material))
    }

    // =========================================================================
    // UDX
    // =========================================================================

    /// Provision the UDX user and bucket for a federation partner
    pub async fn provision_udx(&self, request: &ProvisionUdxRequest) -> Result<UdxResources> {
        self.provisioner.provision(request).await
    }
}

impl Drop for UslService {
    fn drop(&mut self) {
        // The reconciliation task holds the event sender; stop it with us
        self.cancel.cancel();
    }
}
