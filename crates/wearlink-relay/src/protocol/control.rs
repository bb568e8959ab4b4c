//! Control commands.
//!
//! Outbound commands go to the device host as single JSON objects:
//! `{"cmd":"resume"}`, `{"cmd":"pause"}` or `{"cmd":"timestamp","t_one":N}`.
//! The remote control plane speaks plain text; only the resume trigger is
//! acted on, every other message is an echo that stays on the relay.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Remote text that asks the device host to resume streaming.
pub const RESUME_TRIGGER: &str = "#T 0";

/// A command for the device host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Resume,
    Pause,
    /// Clock synchronisation request carrying the remote's send time.
    Timestamp { t_one: u64 },
}

impl Command {
    /// Serialize to the JSON object written on the control channel.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Parse a command as the device host would.
    ///
    /// Only a JSON object carrying a known `cmd` is recognised; any other
    /// shape yields `None`.
    pub fn from_local(bytes: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(bytes).ok()?;
        value.as_object()?.get("cmd")?;
        serde_json::from_value(value).ok()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resume => f.write_str("resume"),
            Self::Pause => f.write_str("pause"),
            Self::Timestamp { t_one } => write!(f, "timestamp({t_one})"),
        }
    }
}

/// Interpret a decrypted remote message.
///
/// Returns the command to forward, if any. Surrounding whitespace is ignored.
pub fn interpret_remote(text: &str) -> Option<Command> {
    (text.trim() == RESUME_TRIGGER).then_some(Command::Resume)
}
