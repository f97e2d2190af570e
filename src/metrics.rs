//! Service Metrics
//!
//! Prometheus counters and gauges for the volume cache, UDX provisioning and
//! device registration. Metrics live in a registry owned by the service and
//! are exposed by the binary's metrics server.

use crate::error::{Error, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Metrics recorded by the USL service
#[derive(Clone)]
pub struct UslMetrics {
    registry: Registry,
    /// Completed reconciliation passes
    pub cache_passes: IntCounter,
    /// Aborted reconciliation passes
    pub cache_failures: IntCounter,
    /// Volumes in the current cache snapshot
    pub volumes_cached: IntGauge,
    /// Volume events emitted, by kind
    pub volume_events: IntCounterVec,
    /// Failed UDX provisioning transactions
    pub provisioning_failures: IntCounter,
    /// Registration handshakes, by outcome
    pub registrations: IntCounterVec,
}

impl UslMetrics {
    /// Create and register all metrics in a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let cache_passes = IntCounter::new(
            "usl_volume_cache_passes_total",
            "Completed volume cache reconciliation passes",
        )
        .map_err(metrics_error)?;
        let cache_failures = IntCounter::new(
            "usl_volume_cache_failures_total",
            "Volume cache reconciliation passes aborted by a back-end failure",
        )
        .map_err(metrics_error)?;
        let volumes_cached =
            IntGauge::new("usl_volumes_cached", "Volumes in the current cache snapshot")
                .map_err(metrics_error)?;
        let volume_events = IntCounterVec::new(
            Opts::new("usl_volume_events_total", "Volume events emitted"),
            &["kind"],
        )
        .map_err(metrics_error)?;
        let provisioning_failures = IntCounter::new(
            "usl_udx_provisioning_failures_total",
            "Failed UDX provisioning transactions",
        )
        .map_err(metrics_error)?;
        let registrations = IntCounterVec::new(
            Opts::new("usl_registrations_total", "Device registration handshakes"),
            &["outcome"],
        )
        .map_err(metrics_error)?;

        registry.register(Box::new(cache_passes.clone())).map_err(metrics_error)?;
        registry.register(Box::new(cache_failures.clone())).map_err(metrics_error)?;
        registry.register(Box::new(volumes_cached.clone())).map_err(metrics_error)?;
        registry.register(Box::new(volume_events.clone())).map_err(metrics_error)?;
        registry
            .register(Box::new(provisioning_failures.clone()))
            .map_err(metrics_error)?;
        registry.register(Box::new(registrations.clone())).map_err(metrics_error)?;

        Ok(Self {
            registry,
            cache_passes,
            cache_failures,
            volumes_cached,
            volume_events,
            provisioning_failures,
            registrations,
        })
    }

    /// Encode all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("Metrics error: {}", e))
}
