//! Session recorder types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use wearlink_core::config::RecordingConfig;

/// Settings shared by every recorder of a connection.
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    /// Directory the session artifacts are written to.
    pub output_dir: PathBuf,
    /// Boolean field marking auxiliary readings that are not recorded.
    pub sensor_kind_field: String,
    /// Integer field counted in the tally.
    pub classification_field: String,
    /// Classification values that get their own tally bucket.
    pub classes: Vec<i64>,
}

impl From<&RecordingConfig> for RecorderSettings {
    fn from(config: &RecordingConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            sensor_kind_field: config.sensor_kind_field.clone(),
            classification_field: config.classification_field.clone(),
            classes: config.classes.clone(),
        }
    }
}

/// Bucket a retained item is counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Classification {
    Known(i64),
    Unknown,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(v) => write!(f, "{v}"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// Running count of retained items per classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    known: BTreeMap<i64, u64>,
    unknown: u64,
}

impl Tally {
    /// A tally with a zeroed bucket for each configured class.
    pub fn new(classes: &[i64]) -> Self {
        Self {
            known: classes.iter().map(|&c| (c, 0)).collect(),
            unknown: 0,
        }
    }

    /// Count one observation. Missing and unlisted values land in `Unknown`.
    pub fn observe(&mut self, value: Option<i64>) -> Classification {
        match value.and_then(|v| self.known.get_mut(&v).map(|n| (v, n))) {
            Some((v, n)) => {
                *n += 1;
                Classification::Known(v)
            }
            None => {
                self.unknown += 1;
                Classification::Unknown
            }
        }
    }

    pub fn count(&self, class: Classification) -> u64 {
        match class {
            Classification::Known(v) => self.known.get(&v).copied().unwrap_or(0),
            Classification::Unknown => self.unknown,
        }
    }

    pub fn total(&self) -> u64 {
        self.known.values().sum::<u64>() + self.unknown
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (class, n) in &self.known {
            write!(f, "{class}:{n}, ")?;
        }
        write!(f, "unknown:{}}}", self.unknown)
    }
}

/// Outcome of one finalized session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub device: u32,
    pub label: String,
    /// Final artifact path; `None` when nothing was retained or the file never opened.
    pub path: Option<PathBuf>,
    /// Data rows written (header excluded).
    pub rows: u64,
    /// Auxiliary readings skipped.
    pub skipped: u64,
    pub elapsed: Duration,
    pub tally: Tally,
    /// Whether any open, write or rename failed.
    pub failed: bool,
}

/// Persistence failures. Each one only affects the session that raised it.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("Failed to create {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to flush {path}: {source}")]
    Flush {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
