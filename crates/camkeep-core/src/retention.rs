//! Retention sweep over `root/<camera>/<year>/<month>/<day>/<segment>`.
//!
//! Each segment's age comes from the timestamp in its file name, not from file
//! metadata. Problems with individual entries are recorded in the report and the
//! sweep carries on.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::layout;

pub const DEFAULT_RETENTION_DAYS: u32 = 10;

/// Directory levels between the root and the segment files.
const DAY_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Not at the depth where segments live.
    Misplaced,
    /// Currently open by a recording session.
    Active,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedEntry {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub threshold: NaiveDateTime,
    pub dry_run: bool,
    pub scanned: usize,
    pub kept: usize,
    pub deleted: Vec<PathBuf>,
    pub bytes_freed: u64,
    pub unparsable: Vec<PathBuf>,
    pub failed: Vec<FailedEntry>,
    pub skipped: Vec<SkippedEntry>,
}

impl SweepReport {
    fn new(threshold: NaiveDateTime, dry_run: bool) -> Self {
        Self {
            threshold,
            dry_run,
            scanned: 0,
            kept: 0,
            deleted: Vec::new(),
            bytes_freed: 0,
            unparsable: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn has_problems(&self) -> bool {
        !self.failed.is_empty() || !self.unparsable.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    root: PathBuf,
    retention_days: u32,
    dry_run: bool,
}

impl RetentionSweeper {
    pub fn new(root: impl Into<PathBuf>, retention_days: u32) -> Result<Self> {
        if retention_days == 0 || TimeDelta::try_days(i64::from(retention_days)).is_none() {
            return Err(Error::InvalidRetention(retention_days));
        }
        Ok(Self {
            root: root.into(),
            retention_days,
            dry_run: false,
        })
    }

    /// Report what would be deleted without touching the filesystem.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    /// `now - retention_days`; segments strictly older are expired.
    pub fn threshold(&self, now: NaiveDateTime) -> Result<NaiveDateTime> {
        TimeDelta::try_days(i64::from(self.retention_days))
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or(Error::InvalidRetention(self.retention_days))
    }

    /// Deletes expired segments, never touching paths in `active`.
    pub fn sweep(&self, now: NaiveDateTime, active: &HashSet<PathBuf>) -> Result<SweepReport> {
        let threshold = self.threshold(now)?;
        let mut report = SweepReport::new(threshold, self.dry_run);
        info!(
            root = %self.root.display(),
            threshold = %threshold,
            dry_run = self.dry_run,
            "removing files older than threshold"
        );

        if !self.root.exists() {
            warn!(root = %self.root.display(), "recordings root does not exist; nothing to sweep");
            return Ok(report);
        }
        self.visit(&self.root, 0, active, &mut report);

        info!(
            scanned = report.scanned,
            deleted = report.deleted.len(),
            kept = report.kept,
            unparsable = report.unparsable.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            bytes_freed = report.bytes_freed,
            "retention sweep finished"
        );
        Ok(report)
    }

    fn visit(
        &self,
        dir: &Path,
        depth: usize,
        active: &HashSet<PathBuf>,
        report: &mut SweepReport,
    ) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "failed to read directory");
                report.failed.push(FailedEntry {
                    path: dir.to_path_buf(),
                    error: err.to_string(),
                });
                return;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "failed to read directory entry");
                    report.failed.push(FailedEntry {
                        path: dir.to_path_buf(),
                        error: err.to_string(),
                    });
                    continue;
                }
            };
            let path = entry.path();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

            match (depth < DAY_DEPTH, is_dir) {
                (true, true) => self.visit(&path, depth + 1, active, report),
                (false, false) => self.consider(path, active, report),
                _ => {
                    warn!(path = %path.display(), "unexpected entry in recordings tree; skipping");
                    report.skipped.push(SkippedEntry {
                        path,
                        reason: SkipReason::Misplaced,
                    });
                }
            }
        }
    }

    fn consider(&self, path: PathBuf, active: &HashSet<PathBuf>, report: &mut SweepReport) {
        report.scanned += 1;
        if active.contains(&path) {
            debug!(path = %path.display(), "segment is being recorded; keeping");
            report.skipped.push(SkippedEntry {
                path,
                reason: SkipReason::Active,
            });
            return;
        }

        let recorded_at = match path
            .file_name()
            .and_then(|name| name.to_str())
            .map(layout::parse_segment_file_name)
        {
            Some(Ok(ts)) => ts,
            Some(Err(err)) => {
                warn!(path = %path.display(), error = %err, "cannot date recording; skipping");
                report.unparsable.push(path);
                return;
            }
            None => {
                warn!(path = %path.display(), "recording name is not valid UTF-8; skipping");
                report.unparsable.push(path);
                return;
            }
        };

        if recorded_at >= report.threshold {
            debug!(path = %path.display(), "keeping file");
            report.kept += 1;
            return;
        }

        let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if self.dry_run {
            info!(path = %path.display(), "would remove file");
            report.bytes_freed += size;
            report.deleted.push(path);
            return;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "removing file");
                report.bytes_freed += size;
                report.deleted.push(path);
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to remove file");
                report.failed.push(FailedEntry {
                    path,
                    error: err.to_string(),
                });
            }
        }
    }
}
