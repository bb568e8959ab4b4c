//! Supervisor state and reporting types.

use std::fmt;
use std::io;
use std::time::Duration;

use crate::pump::{DownlinkStats, PumpExit, UplinkStats};
use crate::session::SessionSummary;

/// Remote connection state, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

/// Supervisor errors.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Local bus unavailable: {0}")]
    Bus(#[source] io::Error),

    #[error("Remote connection failed: {0}")]
    Connect(#[source] io::Error),

    #[error("Gave up after {attempts} failed connection attempts")]
    RetriesExhausted { attempts: u32 },
}

/// Outcome of one connected period.
#[derive(Debug)]
pub struct CycleReport {
    pub connected_for: Duration,
    /// `None` if the pump task panicked.
    pub uplink: Option<PumpExit>,
    pub downlink: Option<PumpExit>,
    pub uplink_stats: UplinkStats,
    pub downlink_stats: DownlinkStats,
    pub sessions: Vec<SessionSummary>,
    /// Whether the cycle ended because of shutdown.
    pub shutdown: bool,
}

impl CycleReport {
    /// The exit that ended the cycle: the first failure, if any.
    pub fn cause(&self) -> Option<&PumpExit> {
        [self.downlink.as_ref(), self.uplink.as_ref()]
            .into_iter()
            .flatten()
            .find(|exit| exit.error().is_some())
    }

    pub fn protocol_violation(&self) -> bool {
        matches!(
            self.cause(),
            Some(PumpExit::Failed(crate::pump::PumpError::Protocol(_)))
        )
    }
}

/// Counters across the supervisor's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    /// Connection attempts, successful or not.
    pub attempts: u64,
    pub connections: u64,
    pub failed_attempts: u64,
    /// Sessions finalized across all connections.
    pub sessions_finalized: u64,
    pub protocol_violations: u64,
    pub envelopes_sent: u64,
    pub commands_forwarded: u64,
}

impl SupervisorStats {
    pub(crate) fn record_cycle(&mut self, report: &CycleReport) {
        self.sessions_finalized += report.sessions.len() as u64;
        self.envelopes_sent += report.uplink_stats.forwarded;
        self.commands_forwarded += report.downlink_stats.commands;
        if report.protocol_violation() {
            self.protocol_violations += 1;
        }
    }
}
