//! Configuration resolution for the wearlink relay.
//!
//! Resolution order (lowest to highest priority):
//! 1. Built-in defaults
//! 2. Config file (explicit `--config` path, or `~/.config/wearlink/relay.toml`)
//! 3. Environment variables (`WEARLINK_*`)
//! 4. CLI arguments (applied by the binary)

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Complete relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub remote: RemoteConfig,
    pub reconnect: ReconnectConfig,
    pub crypto: CryptoConfig,
    pub bus: BusConfig,
    pub recording: RecordingConfig,
    pub manifest: ManifestConfig,
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
            reconnect: ReconnectConfig::default(),
            crypto: CryptoConfig::default(),
            bus: BusConfig::default(),
            recording: RecordingConfig::default(),
            manifest: ManifestConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Remote control-plane endpoint, reached through an already established tunnel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    /// Downlink read timeout; an expired read means "no data yet".
    pub read_timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1235,
            connect_timeout_ms: 1000,
            read_timeout_ms: 1000,
        }
    }
}

/// Backoff between connection attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// `1.0` gives a fixed interval.
    pub multiplier: f64,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

/// Envelope encryption settings.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Shared symmetric key, UTF-8, exactly 16 bytes.
    pub key: String,
}

impl fmt::Debug for CryptoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoConfig")
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Local sensor bus sockets exposed by the device host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Telemetry stream (device host -> relay).
    pub data_socket: PathBuf,
    /// Control commands (relay -> device host).
    pub control_socket: PathBuf,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            data_socket: PathBuf::from("/tmp/www/comms/data.sock"),
            control_socket: PathBuf::from("/tmp/www/comms/notif.sock"),
        }
    }
}

/// Per-device session artifact settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub output_dir: PathBuf,
    /// Telemetry field carrying the device number used for routing.
    pub device_field: String,
    /// Boolean field marking auxiliary sensor readings, which are not recorded.
    pub sensor_kind_field: String,
    /// Field carrying the movement classification that is tallied.
    pub classification_field: String,
    /// Classification values that always appear in the tally.
    pub classes: Vec<i64>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            device_field: "bluno".to_string(),
            sensor_kind_field: "muscle_sensor".to_string(),
            classification_field: "movement".to_string(),
            classes: vec![-1, 0, 1],
        }
    }
}

/// Where the device manifest comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestSource {
    /// Announced once by the device host at the start of its bus stream and
    /// replayed into every remote connection served over that stream.
    #[default]
    Runtime,
    /// Taken from `manifest.devices`; runtime manifests are ignored.
    Static,
}

/// One declared device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub num: u32,
    pub username: String,
}

impl ManifestEntry {
    /// Human-readable label used in artifact names, e.g. `alice_1`.
    pub fn label(&self) -> String {
        format!("{}_{}", self.username, self.num)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    pub source: ManifestSource,
    pub devices: Vec<ManifestEntry>,
}

impl RelayConfig {
    /// Check the settings that must hold before the relay starts.
    pub fn validate(&self) -> Result<()> {
        if self.remote.host.trim().is_empty() {
            return Err(Error::Config("remote.host must not be empty".into()));
        }
        if self.remote.port == 0 {
            return Err(Error::Config("remote.port must not be 0".into()));
        }
        if self.remote.connect_timeout_ms == 0 || self.remote.read_timeout_ms == 0 {
            return Err(Error::Config("remote timeouts must be non-zero".into()));
        }
        if self.crypto.key.is_empty() {
            return Err(Error::Config("crypto.key is required".into()));
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(Error::Config(format!(
                "reconnect.multiplier must be >= 1.0, got {}",
                self.reconnect.multiplier
            )));
        }
        if self.recording.device_field.is_empty() {
            return Err(Error::Config("recording.device_field must not be empty".into()));
        }
        if self.manifest.source == ManifestSource::Static {
            if self.manifest.devices.is_empty() {
                return Err(Error::Config(
                    "manifest.source is \"static\" but manifest.devices is empty".into(),
                ));
            }
            let mut seen = std::collections::HashSet::new();
            for entry in &self.manifest.devices {
                if !seen.insert(entry.num) {
                    return Err(Error::Config(format!(
                        "device {} declared twice in manifest.devices",
                        entry.num
                    )));
                }
            }
        }
        Ok(())
    }

    /// `host:port` of the remote endpoint.
    pub fn remote_addr(&self) -> String {
        format!("{}:{}", self.remote.host, self.remote.port)
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicit `path` must exist; the default location is optional.
pub fn load_config(path: Option<&Path>) -> Result<RelayConfig> {
    let mut config = match path {
        Some(p) => load_config_file(p)?,
        None => match default_config_path() {
            Some(p) if p.exists() => load_config_file(&p)?,
            _ => RelayConfig::default(),
        },
    };

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Default config file location: `~/.config/wearlink/relay.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("wearlink").join("relay.toml"))
}

fn load_config_file(path: &Path) -> Result<RelayConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    parse_config(&content)
}

/// Parse a TOML document into a config, filling unspecified fields with defaults.
pub fn parse_config(content: &str) -> Result<RelayConfig> {
    Ok(toml::from_str(content)?)
}

fn apply_env_overrides(config: &mut RelayConfig) {
    if let Ok(val) = std::env::var("WEARLINK_REMOTE_HOST") {
        config.remote.host = val;
    }
    if let Ok(val) = std::env::var("WEARLINK_REMOTE_PORT")
        && let Ok(n) = val.parse()
    {
        config.remote.port = n;
    }
    if let Ok(val) = std::env::var("WEARLINK_KEY") {
        config.crypto.key = val;
    }
    if let Ok(val) = std::env::var("WEARLINK_OUTPUT_DIR") {
        config.recording.output_dir = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("WEARLINK_LOG_LEVEL") {
        config.log_level = val;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn valid() -> RelayConfig {
        let mut config = RelayConfig::default();
        config.crypto.key = "0000000000000000".into();
        config
    }

    #[test]
    fn defaults_match_device_host_layout() {
        let config = RelayConfig::default();
        assert_eq!(config.bus.data_socket, PathBuf::from("/tmp/www/comms/data.sock"));
        assert_eq!(config.bus.control_socket, PathBuf::from("/tmp/www/comms/notif.sock"));
        assert_eq!(config.recording.device_field, "bluno");
        assert_eq!(config.recording.classes, vec![-1, 0, 1]);
        assert_eq!(config.manifest.source, ManifestSource::Runtime);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = parse_config(
            r#"
            [remote]
            host = "10.0.0.2"

            [crypto]
            key = "abcdefghijklmnop"
            "#,
        )
        .unwrap();
        assert_eq!(config.remote.host, "10.0.0.2");
        assert_eq!(config.remote.port, 1235);
        assert_eq!(config.remote.read_timeout_ms, 1000);
        assert_eq!(config.crypto.key, "abcdefghijklmnop");
        assert_eq!(config.reconnect.initial_delay_ms, 1000);
    }

    #[test]
    fn static_manifest_parses() {
        let config = parse_config(
            r#"
            [manifest]
            source = "static"
            devices = [{ num = 1, username = "alice" }, { num = 2, username = "bob" }]
            "#,
        )
        .unwrap();
        assert_eq!(config.manifest.source, ManifestSource::Static);
        assert_eq!(config.manifest.devices.len(), 2);
        assert_eq!(config.manifest.devices[1].label(), "bob_2");
    }

    #[test]
    fn unknown_manifest_source_is_rejected() {
        let result = parse_config("[manifest]\nsource = \"sometimes\"\n");
        assert!(matches!(result, Err(Error::Toml(_))));
    }

    #[test]
    fn validate_accepts_defaults_with_key() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn validate_requires_key() {
        let config = RelayConfig::default();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn validate_requires_devices_for_static_manifest() {
        let mut config = valid();
        config.manifest.source = ManifestSource::Static;
        assert!(config.validate().is_err());

        config.manifest.devices = vec![ManifestEntry {
            num: 1,
            username: "alice".into(),
        }];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_duplicate_static_devices() {
        let mut config = valid();
        config.manifest.source = ManifestSource::Static;
        let entry = ManifestEntry {
            num: 3,
            username: "carol".into(),
        };
        config.manifest.devices = vec![entry.clone(), entry];
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_shrinking_backoff() {
        let mut config = valid();
        config.reconnect.multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn key_is_redacted_in_debug_output() {
        let config = valid();
        let rendered = format!("{:?}", config.crypto);
        assert!(!rendered.contains("0000000000000000"));
    }

    #[test]
    fn remote_addr_joins_host_and_port() {
        assert_eq!(valid().remote_addr(), "localhost:1235");
    }
}
