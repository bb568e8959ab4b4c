//! Relay pumps.
//!
//! Two tasks per connection, each owning its halves exclusively:
//!
//! - [`uplink`]: local data channel → demultiplexer + remote transport
//! - [`downlink`]: remote transport → local control channel
//!
//! A pump hands its halves back in its report when it stops, so the
//! supervisor can tear the transport down only after both have exited.

pub mod downlink;
pub mod uplink;

use std::fmt;
use std::io;

use crate::protocol::ProtocolError;

pub use downlink::{DownlinkReport, DownlinkStats, run_downlink};
pub use uplink::{UplinkReport, UplinkStats, run_uplink};

/// Bytes requested per read on either side.
pub const READ_CHUNK: usize = 4096;

/// Failures that end a pump.
#[derive(Debug, thiserror::Error)]
pub enum PumpError {
    #[error("Remote transport closed")]
    RemoteClosed,

    #[error("Remote transport error: {0}")]
    RemoteIo(#[source] io::Error),

    #[error("Local bus channel closed")]
    LocalClosed,

    #[error("Local bus error: {0}")]
    LocalIo(#[source] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl PumpError {
    /// Map a remote read/write failure; resets count as a close.
    pub(crate) fn remote(e: io::Error) -> Self {
        if is_disconnect(&e) {
            Self::RemoteClosed
        } else {
            Self::RemoteIo(e)
        }
    }

    pub(crate) fn local(e: io::Error) -> Self {
        if is_disconnect(&e) {
            Self::LocalClosed
        } else {
            Self::LocalIo(e)
        }
    }

    /// Whether the local bus must be reopened before the next connection.
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::LocalClosed | Self::LocalIo(_))
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}

/// Why a pump stopped.
#[derive(Debug)]
pub enum PumpExit {
    /// Stopped by the supervisor.
    Cancelled,
    Failed(PumpError),
}

impl PumpExit {
    pub const fn error(&self) -> Option<&PumpError> {
        match self {
            Self::Cancelled => None,
            Self::Failed(e) => Some(e),
        }
    }

    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Failed(e) if e.is_local())
    }
}

impl fmt::Display for PumpExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled"),
            Self::Failed(e) => write!(f, "{e}"),
        }
    }
}

impl From<PumpError> for PumpExit {
    fn from(e: PumpError) -> Self {
        Self::Failed(e)
    }
}
