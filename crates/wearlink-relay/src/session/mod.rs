//! Per-device session recording.
//!
//! The [`DeviceRegistry`] routes telemetry to one recorder worker per declared
//! device; each worker owns a [`SessionRecorder`] writing a CSV artifact.

mod recorder;
mod registry;
mod types;
mod worker;

pub use recorder::SessionRecorder;
pub use registry::{DeviceRegistry, RouteStats};
pub use types::{Classification, RecorderError, RecorderSettings, SessionSummary, Tally};
pub use worker::{RecorderHandle, spawn_recorder};
