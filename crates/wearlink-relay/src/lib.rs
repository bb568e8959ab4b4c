//! wearlink Relay Library
//!
//! Bridges the local sensor bus of a wearable device host to a remote
//! control plane:
//! - Control commands and bus payload model
//! - Per-device session recording to CSV artifacts
//! - Uplink and downlink pumps over an encrypted, delimited transport
//! - Connection supervision with reconnect backoff

pub mod control;
pub mod protocol;
pub mod pump;
pub mod session;
pub mod supervisor;
