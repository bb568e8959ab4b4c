//! Recorder worker threads.
//!
//! Each recorder runs on its own OS thread and consumes a private unbounded
//! FIFO. The end marker is the only way to stop it; if every sender is
//! dropped first the worker finalizes anyway.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::protocol::{ManifestEntry, TelemetryItem};

use super::recorder::SessionRecorder;
use super::types::{RecorderSettings, SessionSummary};

#[derive(Debug)]
enum RecorderInput {
    Item(TelemetryItem),
    End,
}

/// Sending side of one recorder worker.
#[derive(Debug)]
pub struct RecorderHandle {
    device: u32,
    label: String,
    tx: mpsc::UnboundedSender<RecorderInput>,
    closed: AtomicBool,
    summary_rx: oneshot::Receiver<SessionSummary>,
}

/// Start a recorder worker for `entry`.
pub fn spawn_recorder(
    entry: &ManifestEntry,
    settings: RecorderSettings,
) -> std::io::Result<RecorderHandle> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (summary_tx, summary_rx) = oneshot::channel();
    let mut recorder = SessionRecorder::new(entry.num, entry.label(), settings);

    std::thread::Builder::new()
        .name(format!("recorder-{}", entry.num))
        .spawn(move || {
            while let Some(input) = rx.blocking_recv() {
                match input {
                    RecorderInput::Item(item) => {
                        if let Err(e) = recorder.record(&item) {
                            error!(
                                device = recorder.device(),
                                label = recorder.label(),
                                error = %e,
                                "Session recording failed"
                            );
                        }
                    }
                    RecorderInput::End => break,
                }
            }
            let summary = recorder.finalize();
            if summary_tx.send(summary).is_err() {
                debug!(device = recorder.device(), "Summary receiver gone");
            }
        })?;

    Ok(RecorderHandle {
        device: entry.num,
        label: entry.label(),
        tx,
        closed: AtomicBool::new(false),
        summary_rx,
    })
}

impl RecorderHandle {
    pub const fn device(&self) -> u32 {
        self.device
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Queue an item. Returns `false` once the session is closed.
    pub fn send(&self, item: TelemetryItem) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.tx.send(RecorderInput::Item(item)).is_ok()
    }

    /// Post the end marker. Only the first call sends it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if self.tx.send(RecorderInput::End).is_err() {
            warn!(device = self.device, "Recorder worker already stopped");
        }
        true
    }

    /// Close the session and wait for its summary.
    pub async fn finish(self) -> Option<SessionSummary> {
        self.close();
        match self.summary_rx.await {
            Ok(summary) => Some(summary),
            Err(_) => {
                error!(device = self.device, "Recorder worker exited without a summary");
                None
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(dir: &std::path::Path) -> RecorderSettings {
        RecorderSettings {
            output_dir: dir.to_path_buf(),
            sensor_kind_field: "muscle_sensor".into(),
            classification_field: "movement".into(),
            classes: vec![-1, 0, 1],
        }
    }

    fn entry(num: u32, username: &str) -> ManifestEntry {
        ManifestEntry {
            num,
            username: username.into(),
        }
    }

    #[tokio::test]
    async fn worker_writes_in_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let handle = spawn_recorder(&entry(1, "alice"), settings(dir.path())).unwrap();
        assert_eq!(handle.label(), "alice_1");

        for n in 0..5 {
            let item = serde_json::from_value(json!({"bluno": 1, "seq": n})).unwrap();
            assert!(handle.send(item));
        }

        let summary = handle.finish().await.unwrap();
        assert_eq!(summary.rows, 5);
        let content = std::fs::read_to_string(summary.path.unwrap()).unwrap();
        assert_eq!(content, "bluno,seq\n1,0\n1,1\n1,2\n1,3\n1,4\n");
    }

    #[tokio::test]
    async fn close_is_sent_once() {
        let dir = tempfile::tempdir().unwrap();
        let handle = spawn_recorder(&entry(2, "bob"), settings(dir.path())).unwrap();

        assert!(handle.close());
        assert!(!handle.close());

        let item = serde_json::from_value(json!({"bluno": 2})).unwrap();
        assert!(!handle.send(item));

        let summary = handle.finish().await.unwrap();
        assert_eq!(summary.device, 2);
        assert!(summary.path.is_none());
    }
}
