//! Connection supervisor.
//!
//! Drives `disconnected → connecting → connected` over and over: opens the
//! local bus and the remote transport, runs both pumps, and on the first
//! failure stops the pumps, closes the transport, finalizes every session and
//! backs off before the next attempt.

mod config;
mod connector;
mod runner;
mod types;

pub use config::{ReconnectPolicy, SupervisorConfig};
#[cfg(unix)]
pub use connector::UnixBusConnector;
pub use connector::{BusConnector, LocalBus, RemoteConnector, TcpConnector};
pub use runner::Supervisor;
pub use types::{ConnectionState, CycleReport, SupervisorError, SupervisorStats};
