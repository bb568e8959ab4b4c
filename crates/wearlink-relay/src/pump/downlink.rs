//! Downlink pump: remote transport → local control channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use wearlink_crypto::{Decoded, EnvelopeCodec, FrameBuffer};

use crate::protocol::interpret_remote;

use super::{PumpError, PumpExit, READ_CHUNK};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownlinkStats {
    /// Envelopes decoded successfully.
    pub messages: u64,
    /// Commands written to the control channel.
    pub commands: u64,
    /// Frames that failed to decode.
    pub rejected: u64,
}

/// Everything the downlink owned, returned when it stops.
pub struct DownlinkReport<R, C> {
    pub exit: PumpExit,
    pub remote: R,
    pub control: C,
    pub stats: DownlinkStats,
}

/// Run the downlink until cancelled or either side fails.
///
/// A read that times out is "no data yet", not an error.
pub async fn run_downlink<R, C>(
    mut remote: R,
    mut control: C,
    codec: Arc<EnvelopeCodec>,
    read_timeout: Duration,
    cancel: CancellationToken,
) -> DownlinkReport<R, C>
where
    R: AsyncRead + Unpin,
    C: AsyncWrite + Unpin,
{
    let mut frames = FrameBuffer::new();
    let mut stats = DownlinkStats::default();
    let mut buf = vec![0u8; READ_CHUNK];

    info!("Downlink started");
    let exit = loop {
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => break PumpExit::Cancelled,
            read = tokio::time::timeout(read_timeout, remote.read(&mut buf)) => read,
        };
        let n = match read {
            Err(_) => {
                trace!("No remote data yet");
                continue;
            }
            Ok(Ok(0)) => break PumpExit::Failed(PumpError::RemoteClosed),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => break PumpExit::Failed(PumpError::remote(e)),
        };

        if let Err(e) = frames.push(&buf[..n]) {
            warn!(error = %e, "Discarding oversized remote frame");
            stats.rejected += 1;
        }

        let forwarded = tokio::select! {
            biased;
            () = cancel.cancelled() => break PumpExit::Cancelled,
            forwarded = forward_frames(&mut frames, &codec, &mut control, &mut stats) => forwarded,
        };
        if let Err(e) = forwarded {
            break PumpExit::Failed(e);
        }
    };

    match &exit {
        PumpExit::Cancelled => debug!(?stats, "Downlink cancelled"),
        PumpExit::Failed(e) => warn!(error = %e, ?stats, "Downlink stopped"),
    }
    if frames.pending_len() > 0 {
        debug!(bytes = frames.pending_len(), "Discarding partial remote envelope");
    }
    DownlinkReport {
        exit,
        remote,
        control,
        stats,
    }
}

async fn forward_frames<C: AsyncWrite + Unpin>(
    frames: &mut FrameBuffer,
    codec: &EnvelopeCodec,
    control: &mut C,
    stats: &mut DownlinkStats,
) -> Result<(), PumpError> {
    while let Some(frame) = frames.next_frame() {
        let plaintext = match codec.decode(&frame) {
            Ok(Decoded::Message(plaintext)) => plaintext,
            Ok(Decoded::Incomplete) => continue,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable remote frame");
                stats.rejected += 1;
                continue;
            }
        };
        stats.messages += 1;

        let text = String::from_utf8_lossy(&plaintext);
        let Some(command) = interpret_remote(&text) else {
            debug!(message = %text, "Remote echo, not forwarded");
            continue;
        };
        let Ok(bytes) = command.to_json() else {
            warn!(%command, "Failed to serialize command");
            continue;
        };
        control.write_all(&bytes).await.map_err(PumpError::local)?;
        control.flush().await.map_err(PumpError::local)?;
        stats.commands += 1;
        info!(%command, "Forwarded command to device host");
    }
    Ok(())
}
