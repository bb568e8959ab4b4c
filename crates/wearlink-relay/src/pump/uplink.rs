//! Uplink pump: local data channel → remote transport.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wearlink_crypto::EnvelopeCodec;

use crate::protocol::{BusMessage, JsonDocument, JsonStream};
use crate::session::DeviceRegistry;

use super::{PumpError, PumpExit, READ_CHUNK};

/// Counters for one uplink run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UplinkStats {
    /// Complete JSON documents read from the bus.
    pub documents: u64,
    /// Envelopes written to the remote.
    pub forwarded: u64,
    /// Telemetry items delivered to recorders.
    pub routed: u64,
    /// Documents or items dropped as unparseable or unrecognised.
    pub dropped: u64,
}

/// Everything the uplink owned, returned when it stops.
pub struct UplinkReport<L, W> {
    pub exit: PumpExit,
    pub local: L,
    pub remote: W,
    pub registry: DeviceRegistry,
    /// Bytes read from `local` that do not yet form a document.
    pub documents: JsonStream,
    pub stats: UplinkStats,
}

struct Uplink<'a, W> {
    remote: &'a mut W,
    registry: &'a mut DeviceRegistry,
    codec: &'a EnvelopeCodec,
    stats: UplinkStats,
}

/// Run the uplink until cancelled or either side fails.
///
/// `documents` carries any partial document left over from an earlier run
/// on the same `local` reader.
pub async fn run_uplink<L, W>(
    mut local: L,
    mut remote: W,
    mut registry: DeviceRegistry,
    mut documents: JsonStream,
    codec: Arc<EnvelopeCodec>,
    cancel: CancellationToken,
) -> UplinkReport<L, W>
where
    L: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut uplink = Uplink {
        remote: &mut remote,
        registry: &mut registry,
        codec: &codec,
        stats: UplinkStats::default(),
    };
    let mut buf = vec![0u8; READ_CHUNK];

    info!(carried = documents.buffered(), "Uplink started");
    let exit = loop {
        let n = tokio::select! {
            biased;
            () = cancel.cancelled() => break PumpExit::Cancelled,
            read = local.read(&mut buf) => match read {
                Ok(0) => break PumpExit::Failed(PumpError::LocalClosed),
                Ok(n) => n,
                Err(e) => break PumpExit::Failed(PumpError::local(e)),
            },
        };
        documents.push(&buf[..n]);

        let drained = tokio::select! {
            biased;
            () = cancel.cancelled() => break PumpExit::Cancelled,
            drained = uplink.drain(&mut documents) => drained,
        };
        if let Err(e) = drained {
            break PumpExit::Failed(e);
        }
    };

    let stats = uplink.stats;
    match &exit {
        PumpExit::Cancelled => debug!(?stats, "Uplink cancelled"),
        PumpExit::Failed(e) => warn!(error = %e, ?stats, "Uplink stopped"),
    }
    UplinkReport {
        exit,
        local,
        remote,
        registry,
        documents,
        stats,
    }
}

impl<W: AsyncWrite + Unpin> Uplink<'_, W> {
    async fn drain(&mut self, documents: &mut JsonStream) -> Result<(), PumpError> {
        loop {
            match documents.next_document() {
                Ok(Some(doc)) => self.handle(doc).await?,
                Ok(None) => return Ok(()),
                Err(e) => {
                    warn!(error = %e, "Dropping unparseable bus data");
                    self.stats.dropped += 1;
                }
            }
        }
    }

    async fn handle(&mut self, doc: JsonDocument) -> Result<(), PumpError> {
        self.stats.documents += 1;
        let message = match BusMessage::classify(doc.value) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping unrecognised bus document");
                self.stats.dropped += 1;
                return Ok(());
            }
        };

        match message {
            BusMessage::Manifest(entries) => {
                self.registry.apply_manifest(&entries);
            }
            BusMessage::Packets(items) => {
                let routed = self.registry.route(items)?;
                self.stats.routed += routed.routed as u64;
                self.stats.dropped += routed.dropped as u64;
            }
            BusMessage::Timestamps(value) => {
                debug!(timestamps = %value, "Clock sync reply");
            }
        }

        let envelope = match self.codec.encode(&doc.raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, "Failed to encode bus document");
                self.stats.dropped += 1;
                return Ok(());
            }
        };
        self.remote
            .write_all(&envelope)
            .await
            .map_err(PumpError::remote)?;
        self.remote.flush().await.map_err(PumpError::remote)?;
        self.stats.forwarded += 1;
        Ok(())
    }
}
