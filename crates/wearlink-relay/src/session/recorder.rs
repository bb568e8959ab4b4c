//! Per-device session recording.
//!
//! A session artifact is opened on the first retained item as
//! `{local time}_{label}_inprogress.csv`, receives one header row and one row
//! per retained item, and on finalize is renamed so the status segment carries
//! the elapsed time, e.g. `20240301T101500.123_alice_1_42sec.csv`.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::protocol::TelemetryItem;

use super::types::{RecorderError, RecorderSettings, SessionSummary, Tally};

const IN_PROGRESS: &str = "inprogress";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3f";

enum Artifact {
    /// No retained item yet.
    Pending,
    Open {
        writer: csv::Writer<File>,
        /// `{dir}/{timestamp}_{label}`, status segment excluded.
        stem: PathBuf,
    },
    /// Open or write failed; later items are drained.
    Failed,
    /// Flushed and renamed (or discarded).
    Closed,
}

/// Accumulates one device's items into a CSV artifact.
pub struct SessionRecorder {
    device: u32,
    label: String,
    settings: RecorderSettings,
    artifact: Artifact,
    header: Vec<String>,
    tally: Tally,
    rows: u64,
    skipped: u64,
    failed: bool,
    first_retained: Option<Instant>,
    summary: Option<SessionSummary>,
}

impl SessionRecorder {
    pub fn new(device: u32, label: impl Into<String>, settings: RecorderSettings) -> Self {
        let tally = Tally::new(&settings.classes);
        Self {
            device,
            label: label.into(),
            settings,
            artifact: Artifact::Pending,
            header: Vec::new(),
            tally,
            rows: 0,
            skipped: 0,
            failed: false,
            first_retained: None,
            summary: None,
        }
    }

    pub const fn device(&self) -> u32 {
        self.device
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub const fn is_finalized(&self) -> bool {
        self.summary.is_some()
    }

    /// Record one item.
    ///
    /// Auxiliary readings are skipped. An error puts the recorder in a failed
    /// state; it keeps accepting items without writing them.
    pub fn record(&mut self, item: &TelemetryItem) -> Result<(), RecorderError> {
        if self.summary.is_some() {
            debug!(device = self.device, "Item after finalize ignored");
            return Ok(());
        }
        if item.is_flagged(&self.settings.sensor_kind_field) {
            self.skipped += 1;
            return Ok(());
        }

        self.first_retained.get_or_insert_with(Instant::now);
        self.tally
            .observe(item.classification(&self.settings.classification_field));

        if matches!(self.artifact, Artifact::Pending) {
            self.header = item.header();
            match self.open() {
                Ok(artifact) => self.artifact = artifact,
                Err(e) => {
                    self.artifact = Artifact::Failed;
                    self.failed = true;
                    return Err(e);
                }
            }
        }

        let Artifact::Open { writer, stem } = &mut self.artifact else {
            return Ok(());
        };
        let result = writer
            .write_record(item.row(&self.header))
            .map_err(|source| RecorderError::Write {
                path: in_progress_path(stem),
                source,
            })
            .and_then(|()| {
                writer.flush().map_err(|source| RecorderError::Flush {
                    path: in_progress_path(stem),
                    source,
                })
            });

        match result {
            Ok(()) => {
                self.rows += 1;
                Ok(())
            }
            Err(e) => {
                // The partial file stays behind under its in-progress name.
                self.artifact = Artifact::Failed;
                self.failed = true;
                Err(e)
            }
        }
    }

    fn open(&self) -> Result<Artifact, RecorderError> {
        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT);
        let stem = self
            .settings
            .output_dir
            .join(format!("{timestamp}_{}", self.label));
        let path = in_progress_path(&stem);

        let file = File::create(&path).map_err(|source| RecorderError::Open {
            path: path.clone(),
            source,
        })?;
        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record(&self.header)
            .map_err(|source| RecorderError::Write {
                path: path.clone(),
                source,
            })?;

        info!(device = self.device, path = %path.display(), "Opened session artifact");
        Ok(Artifact::Open { writer, stem })
    }

    /// Close the artifact and rename it with the elapsed time.
    ///
    /// Idempotent: later calls return the first summary and leave the file alone.
    pub fn finalize(&mut self) -> SessionSummary {
        if let Some(summary) = &self.summary {
            debug!(device = self.device, "Session already finalized");
            return summary.clone();
        }

        let elapsed = self
            .first_retained
            .map_or(Duration::ZERO, |t| t.elapsed());

        let path = match std::mem::replace(&mut self.artifact, Artifact::Closed) {
            Artifact::Open { writer, stem } => match close_artifact(writer, &stem, elapsed) {
                Ok(path) => Some(path),
                Err(e) => {
                    error!(device = self.device, error = %e, "Failed to finalize session artifact");
                    self.failed = true;
                    None
                }
            },
            Artifact::Failed => {
                warn!(device = self.device, "Finalizing a failed session");
                None
            }
            Artifact::Pending | Artifact::Closed => None,
        };

        let summary = SessionSummary {
            device: self.device,
            label: self.label.clone(),
            path,
            rows: self.rows,
            skipped: self.skipped,
            elapsed,
            tally: self.tally.clone(),
            failed: self.failed,
        };
        info!(
            device = summary.device,
            label = %summary.label,
            rows = summary.rows,
            skipped = summary.skipped,
            elapsed_secs = summary.elapsed.as_secs(),
            tally = %summary.tally,
            failed = summary.failed,
            "Session finalized"
        );
        self.summary = Some(summary.clone());
        summary
    }
}

fn close_artifact(
    writer: csv::Writer<File>,
    stem: &Path,
    elapsed: Duration,
) -> Result<PathBuf, RecorderError> {
    let from = in_progress_path(stem);
    let file = writer.into_inner().map_err(|e| RecorderError::Flush {
        path: from.clone(),
        source: std::io::Error::new(e.error().kind(), e.error().to_string()),
    })?;
    file.sync_all().map_err(|source| RecorderError::Flush {
        path: from.clone(),
        source,
    })?;
    drop(file);

    let to = with_status(stem, &format!("{}sec", elapsed_secs(elapsed)));
    fs::rename(&from, &to).map_err(|source| RecorderError::Rename {
        from,
        to: to.clone(),
        source,
    })?;
    Ok(to)
}

/// Whole seconds, rounded up. Only sessions with a retained item reach the
/// rename, so the name never claims zero.
fn elapsed_secs(elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs() + u64::from(elapsed.subsec_nanos() > 0);
    secs.max(1)
}

fn in_progress_path(stem: &Path) -> PathBuf {
    with_status(stem, IN_PROGRESS)
}

fn with_status(stem: &Path, status: &str) -> PathBuf {
    let mut name = stem.as_os_str().to_owned();
    name.push(format!("_{status}.csv"));
    PathBuf::from(name)
}
