//! Connection supervisor loop.

use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wearlink_crypto::EnvelopeCodec;

use crate::protocol::{JsonStream, ManifestEntry};
use crate::pump::{DownlinkReport, DownlinkStats, UplinkReport, UplinkStats, run_downlink, run_uplink};
use crate::session::DeviceRegistry;

use super::config::SupervisorConfig;
use super::connector::{BusConnector, LocalBus, RemoteConnector};
use super::types::{ConnectionState, CycleReport, SupervisorError, SupervisorStats};

type Bus<B> = LocalBus<<B as BusConnector>::Data, <B as BusConnector>::Control>;

/// An open local bus and what has been read from it so far.
///
/// The device host announces its manifest once per bus stream, so the
/// manifest and any partial document stay with the bus across remote
/// reconnects and are dropped only when the bus is reopened.
struct AttachedBus<B: BusConnector> {
    channels: Bus<B>,
    manifest: Option<Vec<ManifestEntry>>,
    documents: JsonStream,
}

/// Owns the remote transport lifecycle.
///
/// Each connection gets a fresh device registry and a fresh pair of pumps.
/// The local bus outlives connections unless one of its channels fails; the
/// registry of a new connection is seeded with the manifest last seen on it.
pub struct Supervisor<R: RemoteConnector, B: BusConnector> {
    config: SupervisorConfig,
    remote: R,
    bus: B,
    codec: Arc<EnvelopeCodec>,
    state_tx: watch::Sender<ConnectionState>,
    stats: SupervisorStats,
}

enum FirstExit<U, D> {
    Uplink(U),
    Downlink(D),
    Shutdown,
}

impl<R: RemoteConnector, B: BusConnector> Supervisor<R, B> {
    pub fn new(config: SupervisorConfig, remote: R, bus: B, codec: EnvelopeCodec) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            remote,
            bus,
            codec: Arc::new(codec),
            state_tx,
            stats: SupervisorStats::default(),
        }
    }

    /// Watch connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub const fn stats(&self) -> SupervisorStats {
        self.stats
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    /// Run until shutdown or until the reconnect policy gives up.
    ///
    /// Failed attempts and dropped connections are logged and retried; a
    /// single failure never ends the loop.
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<SupervisorStats, SupervisorError> {
        let mut attempt: u32 = 0;
        let mut bus: Option<AttachedBus<B>> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            self.stats.attempts += 1;

            let opened = tokio::select! {
                opened = self.open(&mut bus) => opened,
                _ = shutdown.changed() => break,
            };

            match opened {
                Ok((stream, local)) => {
                    attempt = 0;
                    self.stats.connections += 1;
                    self.set_state(ConnectionState::Connected);
                    info!(connection = self.stats.connections, "Connected to remote");

                    let (report, restored) = self.serve(stream, local, &mut shutdown).await;
                    bus = restored;
                    self.stats.record_cycle(&report);
                    self.set_state(ConnectionState::Disconnected);

                    let cause = report
                        .cause()
                        .map_or_else(|| "shutdown".to_string(), ToString::to_string);
                    info!(
                        cause = %cause,
                        connected_secs = report.connected_for.as_secs(),
                        sessions = report.sessions.len(),
                        sent = report.uplink_stats.forwarded,
                        commands = report.downlink_stats.commands,
                        "Connection closed"
                    );
                    if report.shutdown {
                        break;
                    }
                }
                Err(e) => {
                    self.stats.failed_attempts += 1;
                    self.set_state(ConnectionState::Disconnected);
                    if !self.config.reconnect.should_retry(attempt) {
                        error!(error = %e, attempt, "Max reconnect attempts reached");
                        return Err(SupervisorError::RetriesExhausted {
                            attempts: attempt.saturating_add(1),
                        });
                    }
                    warn!(error = %e, attempt, "Connection attempt failed");
                }
            }

            let delay = self.config.reconnect.delay_for_attempt(attempt);
            debug!(delay_ms = delay.as_millis(), attempt, "Waiting before reconnect");
            tokio::select! {
                () = sleep(delay) => {}
                _ = shutdown.changed() => {
                    info!("Shutdown during reconnect wait");
                    break;
                }
            }
            attempt = attempt.saturating_add(1);
        }

        self.set_state(ConnectionState::Disconnected);
        info!(stats = ?self.stats, "Supervisor stopped");
        Ok(self.stats)
    }

    /// Open the local bus if needed, then the remote transport.
    async fn open(
        &self,
        bus: &mut Option<AttachedBus<B>>,
    ) -> Result<(R::Stream, AttachedBus<B>), SupervisorError> {
        let local = match bus.take() {
            Some(local) => local,
            None => {
                let channels = self.bus.connect().await.map_err(SupervisorError::Bus)?;
                info!("Local bus connected");
                AttachedBus {
                    channels,
                    manifest: None,
                    documents: JsonStream::new(),
                }
            }
        };
        match self.remote.connect().await {
            Ok(stream) => Ok((stream, local)),
            Err(e) => {
                *bus = Some(local);
                Err(SupervisorError::Connect(e))
            }
        }
    }

    /// A registry for one connection: the configured manifest if there is
    /// one, otherwise the manifest already announced on this bus.
    fn registry(&self, announced: Option<&[ManifestEntry]>) -> DeviceRegistry {
        let mut registry =
            DeviceRegistry::new(self.config.device_field.clone(), self.config.recorder.clone());
        if let Some(devices) = self.config.static_manifest.as_deref() {
            registry.apply_manifest(devices);
        } else if let Some(devices) = announced {
            debug!(devices = devices.len(), "Replaying device manifest from the bus");
            registry.apply_manifest(devices);
        }
        registry
    }

    /// Run both pumps over one connection and tear everything down in order:
    /// pumps first, then the remote transport, then the sessions.
    async fn serve(
        &self,
        stream: R::Stream,
        local: AttachedBus<B>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> (CycleReport, Option<AttachedBus<B>>) {
        let started = Instant::now();
        let (remote_rd, remote_wr) = tokio::io::split(stream);
        let cancel = CancellationToken::new();

        let registry = self.registry(local.manifest.as_deref());
        let mut uplink = tokio::spawn(run_uplink(
            local.channels.data,
            remote_wr,
            registry,
            local.documents,
            Arc::clone(&self.codec),
            cancel.clone(),
        ));
        let mut downlink = tokio::spawn(run_downlink(
            remote_rd,
            local.channels.control,
            Arc::clone(&self.codec),
            self.config.read_timeout,
            cancel.clone(),
        ));

        let first = if *shutdown.borrow() {
            FirstExit::Shutdown
        } else {
            tokio::select! {
                up = &mut uplink => FirstExit::Uplink(up),
                down = &mut downlink => FirstExit::Downlink(down),
                _ = shutdown.changed() => FirstExit::Shutdown,
            }
        };
        let shutdown_requested = matches!(first, FirstExit::Shutdown);

        cancel.cancel();
        let (up, down) = match first {
            FirstExit::Uplink(up) => (up, downlink.await),
            FirstExit::Downlink(down) => (uplink.await, down),
            FirstExit::Shutdown => (uplink.await, downlink.await),
        };
        let connected_for = started.elapsed();

        let up: Option<UplinkReport<_, _>> = up
            .inspect_err(|e| error!(error = %e, "Uplink task failed"))
            .ok();
        let down: Option<DownlinkReport<_, _>> = down
            .inspect_err(|e| error!(error = %e, "Downlink task failed"))
            .ok();

        let mut uplink_exit = None;
        let mut downlink_exit = None;
        let mut uplink_stats = UplinkStats::default();
        let mut downlink_stats = DownlinkStats::default();
        let mut data = None;
        let mut control = None;
        let mut remote_wr = None;
        let mut remote_rd = None;
        let mut registry: Option<DeviceRegistry> = None;
        let mut documents = None;

        if let Some(report) = up {
            if !report.exit.is_local() {
                data = Some(report.local);
            }
            remote_wr = Some(report.remote);
            registry = Some(report.registry);
            documents = Some(report.documents);
            uplink_stats = report.stats;
            uplink_exit = Some(report.exit);
        }
        if let Some(report) = down {
            if !report.exit.is_local() {
                control = Some(report.control);
            }
            remote_rd = Some(report.remote);
            downlink_stats = report.stats;
            downlink_exit = Some(report.exit);
        }

        if let (Some(rd), Some(wr)) = (remote_rd, remote_wr) {
            let mut stream = rd.unsplit(wr);
            if let Err(e) = stream.shutdown().await {
                debug!(error = %e, "Remote transport shutdown");
            }
        }

        let manifest = registry
            .as_ref()
            .and_then(DeviceRegistry::manifest)
            .map(<[ManifestEntry]>::to_vec);
        let sessions = match registry.as_mut() {
            Some(registry) => registry.close_all().await,
            None => Vec::new(),
        };

        let restored = match (data, control, documents) {
            (Some(data), Some(control), Some(documents)) => Some(AttachedBus {
                channels: LocalBus { data, control },
                manifest,
                documents,
            }),
            _ => {
                warn!("Local bus lost, reopening on next connection");
                None
            }
        };

        let report = CycleReport {
            connected_for,
            uplink: uplink_exit,
            downlink: downlink_exit,
            uplink_stats,
            downlink_stats,
            sessions,
            shutdown: shutdown_requested,
        };
        (report, restored)
    }
}
