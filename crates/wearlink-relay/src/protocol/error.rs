//! Protocol error types.

/// Errors raised while interpreting bus payloads.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Telemetry for a device the manifest never declared. Fatal to the connection.
    #[error("Telemetry references undeclared device {device}")]
    UnknownDevice { device: u32 },

    #[error("Telemetry item has no unsigned integer `{field}` field")]
    MissingDeviceId { field: String },

    #[error("Unrecognised payload shape: {detail}")]
    UnknownShape { detail: String },

    #[error("Malformed {kind} payload: {reason}")]
    Malformed { kind: &'static str, reason: String },

    #[error("Invalid JSON on data channel: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Incomplete JSON document of {size} bytes exceeds the {max} byte limit")]
    Oversized { size: usize, max: usize },
}

impl ProtocolError {
    /// Whether the error must tear down the current connection.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::UnknownDevice { .. })
    }
}
