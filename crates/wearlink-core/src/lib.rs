//! wearlink Core Library
//!
//! Shared functionality for wearlink components:
//! - Relay configuration model, file loading and validation
//! - Tracing subscriber initialisation
//! - Common error types

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::RelayConfig;
pub use error::{Error, Result};
