//! Message shapes exchanged over the local bus and the remote transport.
//!
//! - [`control`]: pause/resume/timestamp commands and the remote resume trigger
//! - [`payload`]: the closed set of JSON documents on the local data channel
//! - [`stream`]: extraction of back-to-back JSON documents from a byte stream

pub mod control;
pub mod error;
pub mod payload;
pub mod stream;

pub use control::{Command, RESUME_TRIGGER, interpret_remote};
pub use error::ProtocolError;
pub use payload::{BusMessage, ManifestEntry, TelemetryItem};
pub use stream::{JsonDocument, JsonStream};
