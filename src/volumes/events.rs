//! Volume Event Channel
//!
//! Unbounded FIFO of [`VolumeEvent`]s between the cache reconciler (the only
//! producer) and the USL poller (the single logical consumer). Consuming an
//! event applies its persistence side effect before the event is returned.
//!
//! Delivery is at-most-once: an event whose side effect fails has already
//! been dequeued and is not redelivered.

use crate::domain::model::{PublicEvent, VolumeEvent};
use crate::domain::ports::VolumeStoreRef;
use crate::error::{Error, Result};
use crate::metrics::UslMetrics;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error};

/// Create a connected sender/receiver pair
pub fn event_channel(store: VolumeStoreRef) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSender { tx },
        EventReceiver {
            rx: Mutex::new(rx),
            store,
            metrics: None,
        },
    )
}

// =============================================================================
// Sender
// =============================================================================

/// Producer half, owned by the reconciler
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<VolumeEvent>,
}

impl EventSender {
    /// Enqueue an event; never blocks
    pub fn send(&self, event: VolumeEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|e| Error::Internal(format!("Volume event channel closed, dropped {:?}", e.0)))
    }
}

// =============================================================================
// Receiver
// =============================================================================

/// Consumer half, owned by the service façade
pub struct EventReceiver {
    rx: Mutex<mpsc::UnboundedReceiver<VolumeEvent>>,
    store: VolumeStoreRef,
    metrics: Option<UslMetrics>,
}

impl EventReceiver {
    /// Attach service metrics
    pub fn with_metrics(mut self, metrics: UslMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Wait for the next event, apply its persistence side effect and return
    /// its public representation.
    pub async fn next_event(&self) -> Result<PublicEvent> {
        let event = {
            let mut rx = self.rx.lock().await;
            rx.recv()
                .await
                .ok_or_else(|| Error::Internal("Volume event channel closed".into()))?
        };

        debug!(kind = event.kind(), volume = %event.volume_uuid(), "Dequeued volume event");

        let applied = match &event {
            VolumeEvent::NewVolume(volume) => self.store.store(volume).await,
            VolumeEvent::VolumeRemoved(uuid) => self.store.delete(uuid).await,
        };

        if let Err(e) = applied {
            error!(
                kind = event.kind(),
                volume = %event.volume_uuid(),
                "Failed to persist volume event, event is lost: {}",
                e
            );
            return Err(e);
        }

        if let Some(metrics) = &self.metrics {
            metrics.volume_events.with_label_values(&[event.kind()]).inc();
        }

        Ok(event.to_public())
    }

    /// Number of events waiting to be consumed
    pub async fn pending(&self) -> usize {
        self.rx.lock().await.len()
    }
}
