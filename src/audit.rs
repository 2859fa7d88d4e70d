//! Append-only, human-readable record of what happened to every source.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{Result, anyhow};
use chrono::Utc;

use crate::io_utils;

/// Record counts of one harmonized source, in pipeline order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordCounts {
    pub input: usize,
    pub after_geometry: usize,
    pub after_dedup: usize,
    pub distinct_ids: usize,
    pub misses: usize,
    pub crop_parts: usize,
}

impl fmt::Display for RecordCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "input={} after_geometry={} after_dedup={} distinct_ids={} misses={} crop_parts={}",
            self.input,
            self.after_geometry,
            self.after_dedup,
            self.distinct_ids,
            self.misses,
            self.crop_parts
        )
    }
}

#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    guard: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_counts(&self, source: &str, counts: &RecordCounts) -> Result<()> {
        self.append(source, &counts.to_string())
    }

    pub fn record_skip(&self, source: &str, reason: &str) -> Result<()> {
        self.append(source, &format!("skipped: {reason}"))
    }

    pub fn record_failure(&self, source: &str, reason: &str) -> Result<()> {
        self.append(source, &format!("failed: {reason}"))
    }

    fn append(&self, source: &str, message: &str) -> Result<()> {
        let line = format!(
            "{} {source} {}\n",
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            message.replace('\n', " ")
        );
        let _lock = self
            .guard
            .lock()
            .map_err(|_| anyhow!("Audit log lock poisoned"))?;
        io_utils::append_bytes(&self.path, line.as_bytes())
    }
}
