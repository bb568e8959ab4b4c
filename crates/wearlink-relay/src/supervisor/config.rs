//! Supervisor configuration.

use std::time::Duration;

use wearlink_core::RelayConfig;
use wearlink_core::config::{ManifestSource, ReconnectConfig};

use crate::protocol::ManifestEntry;
use crate::session::RecorderSettings;

/// Settings for the connection supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Downlink read timeout; expiry means "no data yet".
    pub read_timeout: Duration,

    /// Reconnection policy.
    pub reconnect: ReconnectPolicy,

    /// Telemetry field carrying the device number.
    pub device_field: String,

    /// Settings handed to every session recorder.
    pub recorder: RecorderSettings,

    /// Devices registered at the start of every connection. When set,
    /// manifests pushed by the device host are ignored.
    pub static_manifest: Option<Vec<ManifestEntry>>,
}

impl From<&RelayConfig> for SupervisorConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            read_timeout: Duration::from_millis(config.remote.read_timeout_ms),
            reconnect: ReconnectPolicy::from(&config.reconnect),
            device_field: config.recording.device_field.clone(),
            recorder: RecorderSettings::from(&config.recording),
            static_manifest: (config.manifest.source == ManifestSource::Static)
                .then(|| config.manifest.devices.clone()),
        }
    }
}

/// Backoff between connection attempts.
///
/// The delay before retry `n` (counted from zero after the last successful
/// connection) is `initial_delay * multiplier^n`, never above `max_delay`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// `1.0` keeps the interval fixed.
    pub multiplier: f64,
    /// Consecutive failures tolerated; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            max_attempts: config.max_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// Sleep before the retry that follows `failures` consecutive failures.
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let cap = self.max_delay.as_secs_f64();
        let secs = self.initial_delay.as_secs_f64() * factor;
        if secs.is_finite() && secs < cap {
            Duration::from_secs_f64(secs)
        } else {
            self.max_delay
        }
    }

    /// `false` once `failures` has reached `max_attempts`.
    pub fn should_retry(&self, failures: u32) -> bool {
        self.max_attempts.is_none_or(|max| failures < max)
    }
}
