//! Volume cache and volume event channel

pub mod events;
pub mod reconciler;

pub use events::{event_channel, EventReceiver, EventSender};
pub use reconciler::{diff_snapshots, VolumeCacheReconciler, VolumeDelta, VolumeSnapshot};
