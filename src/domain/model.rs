//! Domain Model - Devices, volumes and the records exposed over USL
//!
//! A [`Device`] is the appliance itself; a [`Volume`] is one UDX-enabled
//! bucket on it. Volume identity is derived, never allocated: the same
//! (device, bucket) pair always yields the same volume UUID.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// UDX Constants
// =============================================================================

/// Bucket tag key marking a bucket as UDX-enabled
pub const UDX_TAG_KEY: &str = "udx";

/// Bucket tag value marking a bucket as UDX-enabled
pub const UDX_TAG_ENABLED: &str = "enabled";

/// Prefix of buckets created for UDX federation
pub const UDX_BUCKET_PREFIX: &str = "udx-";

/// Default device vendor
pub const DEFAULT_DEVICE_VENDOR: &str = "Seagate";

// =============================================================================
// Device
// =============================================================================

/// The appliance exposed as a single USL device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub name: String,
    #[serde(rename = "productID")]
    pub product_id: String,
    pub serial_number: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub uuid: Uuid,
    pub vendor: String,
}

impl Device {
    /// Build the device record from its friendly name and UUID
    pub fn new(friendly_name: impl Into<String>, uuid: Uuid, vendor: impl Into<String>) -> Self {
        Self {
            name: friendly_name.into(),
            product_id: "0000".to_string(),
            serial_number: uuid.to_string(),
            device_type: "S3".to_string(),
            uuid,
            vendor: vendor.into(),
        }
    }

    /// Derive the UUID of the volume backed by `bucket_name` on this device
    pub fn volume_uuid(&self, bucket_name: &str) -> Uuid {
        volume_uuid(&self.uuid, bucket_name)
    }
}

/// `uuid5(device_uuid, bucket_name)`
pub fn volume_uuid(device_uuid: &Uuid, bucket_name: &str) -> Uuid {
    Uuid::new_v5(device_uuid, bucket_name.as_bytes())
}

// =============================================================================
// Volume
// =============================================================================

/// One UDX-enabled bucket, as persisted and cached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    pub bucket_name: String,
    pub device_uuid: Uuid,
    pub uuid: Uuid,
}

impl Volume {
    /// Build the volume for `bucket_name` on `device`
    pub fn for_bucket(device: &Device, bucket_name: &str) -> Self {
        Self {
            name: format!("{}: {}", device.name, bucket_name),
            bucket_name: bucket_name.to_string(),
            device_uuid: device.uuid,
            uuid: device.volume_uuid(bucket_name),
        }
    }

    /// Public representation (the bucket name stays internal)
    pub fn to_public(&self) -> PublicVolume {
        PublicVolume {
            name: self.name.clone(),
            device_uuid: self.device_uuid,
            uuid: self.uuid,
        }
    }
}

/// Volume record returned to USL clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicVolume {
    pub name: String,
    pub device_uuid: Uuid,
    pub uuid: Uuid,
}

// =============================================================================
// Volume Events
// =============================================================================

/// Change in the set of UDX-enabled buckets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeEvent {
    /// A bucket became UDX-enabled (or appeared)
    NewVolume(Volume),
    /// A bucket disappeared or lost its UDX tag
    VolumeRemoved(Uuid),
}

impl VolumeEvent {
    /// Volume UUID this event is about
    pub fn volume_uuid(&self) -> Uuid {
        match self {
            VolumeEvent::NewVolume(volume) => volume.uuid,
            VolumeEvent::VolumeRemoved(uuid) => *uuid,
        }
    }

    /// Short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            VolumeEvent::NewVolume(_) => "new_volume",
            VolumeEvent::VolumeRemoved(_) => "volume_removed",
        }
    }

    /// Public representation handed to the USL poller
    pub fn to_public(&self) -> PublicEvent {
        match self {
            VolumeEvent::NewVolume(volume) => PublicEvent::NewVolume {
                volume: volume.to_public(),
            },
            VolumeEvent::VolumeRemoved(uuid) => PublicEvent::VolumeRemoved { uuid: *uuid },
        }
    }
}

/// Tagged event record returned by the events endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "camelCase")]
pub enum PublicEvent {
    NewVolume { volume: PublicVolume },
    VolumeRemoved { uuid: Uuid },
}

// =============================================================================
// Mount
// =============================================================================

/// Result of attaching a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountResponse {
    pub handle: String,
    pub mount_path: String,
}

// =============================================================================
// System Descriptions
// =============================================================================

/// Descriptive system record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub model: String,
    #[serde(rename = "type")]
    pub system_type: String,
    pub serial_number: String,
    pub friendly_name: String,
    pub firmware_version: String,
}

/// Descriptive network interface record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub name: String,
    #[serde(rename = "type")]
    pub interface_type: String,
    pub mac_address: String,
    pub is_active: bool,
    pub is_loopback: bool,
    pub ipv4: String,
    pub netmask: String,
    pub broadcast: String,
    pub gateway: String,
    pub ipv6: String,
    pub link: String,
    pub duplex: String,
    pub speed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        let uuid = Uuid::parse_str("a5b6c7d8-0000-4000-8000-000000000001").unwrap();
        Device::new("lab", uuid, DEFAULT_DEVICE_VENDOR)
    }

    #[test]
    fn test_volume_uuid_is_stable() {
        let device = device();
        let first = device.volume_uuid("photos");
        let second = device.volume_uuid("photos");
        assert_eq!(first, second);
        assert_eq!(first.get_version_num(), 5);
        assert_ne!(first, device.volume_uuid("videos"));

        // Same bucket on another device is another volume
        let other = Device::new("lab", Uuid::new_v4(), DEFAULT_DEVICE_VENDOR);
        assert_ne!(first, other.volume_uuid("photos"));
    }

    #[test]
    fn test_volume_for_bucket() {
        let device = device();
        let volume = Volume::for_bucket(&device, "photos");
        assert_eq!(volume.name, "lab: photos");
        assert_eq!(volume.bucket_name, "photos");
        assert_eq!(volume.device_uuid, device.uuid);
        assert_eq!(volume.uuid, device.volume_uuid("photos"));
    }

    #[test]
    fn test_public_event_shape() {
        let device = device();
        let volume = Volume::for_bucket(&device, "photos");

        let json = serde_json::to_value(VolumeEvent::NewVolume(volume.clone()).to_public()).unwrap();
        assert_eq!(json["eventType"], "newVolume");
        assert_eq!(json["volume"]["name"], "lab: photos");
        assert!(json["volume"].get("bucketName").is_none());

        let json = serde_json::to_value(VolumeEvent::VolumeRemoved(volume.uuid).to_public()).unwrap();
        assert_eq!(json["eventType"], "volumeRemoved");
        assert_eq!(json["uuid"], volume.uuid.to_string());
    }

    #[test]
    fn test_device_serialization() {
        let device = device();
        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["productID"], "0000");
        assert_eq!(json["type"], "S3");
        assert_eq!(json["serialNumber"], device.uuid.to_string());
    }
}
