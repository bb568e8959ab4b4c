//! Device demultiplexer.
//!
//! Maps device numbers to recorder workers. The map is filled from the first
//! manifest of a connection and only queried afterwards. The applied manifest
//! is kept so a later connection over the same bus can replay it.

use std::collections::BTreeMap;

use tracing::{debug, error, info, warn};

use crate::protocol::{ManifestEntry, ProtocolError, TelemetryItem};

use super::types::{RecorderSettings, SessionSummary};
use super::worker::{RecorderHandle, spawn_recorder};

/// Outcome of routing one packets batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteStats {
    pub routed: usize,
    /// Items without a usable device number.
    pub dropped: usize,
}

pub struct DeviceRegistry {
    recorders: BTreeMap<u32, RecorderHandle>,
    settings: RecorderSettings,
    device_field: String,
    manifest: Option<Vec<ManifestEntry>>,
}

impl DeviceRegistry {
    pub fn new(device_field: impl Into<String>, settings: RecorderSettings) -> Self {
        Self {
            recorders: BTreeMap::new(),
            settings,
            device_field: device_field.into(),
            manifest: None,
        }
    }

    /// Register one recorder per declared device.
    ///
    /// Only the first manifest is applied; it seals the registry. Returns the
    /// number of recorders started.
    pub fn apply_manifest(&mut self, entries: &[ManifestEntry]) -> usize {
        if self.manifest.is_some() {
            warn!(
                devices = entries.len(),
                registered = self.recorders.len(),
                "Device manifest already applied, ignoring"
            );
            return 0;
        }
        self.manifest = Some(entries.to_vec());

        let mut started = 0;
        for entry in entries {
            if self.recorders.contains_key(&entry.num) {
                warn!(device = entry.num, username = %entry.username, "Duplicate device in manifest");
                continue;
            }
            match spawn_recorder(entry, self.settings.clone()) {
                Ok(handle) => {
                    debug!(device = entry.num, label = handle.label(), "Recorder started");
                    self.recorders.insert(entry.num, handle);
                    started += 1;
                }
                Err(e) => {
                    error!(device = entry.num, error = %e, "Failed to start recorder");
                }
            }
        }
        info!(devices = started, "Device manifest applied");
        started
    }

    /// Deliver items to their recorders in order.
    ///
    /// Stops at the first item for an undeclared device; items before it
    /// have already been delivered.
    pub fn route(&self, items: Vec<TelemetryItem>) -> Result<RouteStats, ProtocolError> {
        let mut stats = RouteStats::default();
        for item in items {
            let device = match item.device_id(&self.device_field) {
                Ok(device) => device,
                Err(e) => {
                    warn!(error = %e, "Dropping telemetry item");
                    stats.dropped += 1;
                    continue;
                }
            };
            let handle = self
                .recorders
                .get(&device)
                .ok_or(ProtocolError::UnknownDevice { device })?;
            if handle.send(item) {
                stats.routed += 1;
            } else {
                warn!(device, "Recorder closed, dropping telemetry item");
                stats.dropped += 1;
            }
        }
        Ok(stats)
    }

    pub const fn is_sealed(&self) -> bool {
        self.manifest.is_some()
    }

    /// The manifest that sealed this registry, if any.
    pub fn manifest(&self) -> Option<&[ManifestEntry]> {
        self.manifest.as_deref()
    }

    pub fn len(&self) -> usize {
        self.recorders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recorders.is_empty()
    }

    pub fn contains(&self, device: u32) -> bool {
        self.recorders.contains_key(&device)
    }

    /// End every session and collect the summaries.
    ///
    /// Handles are removed as they are closed, so a second call finds nothing.
    pub async fn close_all(&mut self) -> Vec<SessionSummary> {
        let recorders = std::mem::take(&mut self.recorders);
        for handle in recorders.values() {
            handle.close();
        }

        let mut summaries = Vec::with_capacity(recorders.len());
        for handle in recorders.into_values() {
            if let Some(summary) = handle.finish().await {
                summaries.push(summary);
            }
        }
        summaries
    }
}
