//! On-disk layout of the recordings tree.
//!
//! Segments live at `root/<camera>/<year>/<month>/<day>/<YYYY-MM-DD HH_MM_SS>.<ext>`.
//! Year, month and day folders are unpadded integers (`2024/3/7`), and the file
//! name is the segment's start time with colons swapped for underscores.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDateTime, SubsecRound};

use crate::camera::CameraIdentity;
use crate::error::{Error, Result};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Segment names carry whole seconds only.
pub fn segment_timestamp(now: NaiveDateTime) -> NaiveDateTime {
    now.trunc_subsecs(0)
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn sanitize(raw: &str) -> String {
    raw.replace(':', "_")
}

pub fn desanitize(name: &str) -> String {
    name.replace('_', ":")
}

pub fn segment_file_name(ts: NaiveDateTime, extension: &str) -> String {
    let ext = extension.trim_start_matches('.');
    format!("{}.{ext}", sanitize(&format_timestamp(segment_timestamp(ts))))
}

/// Recovers the start time encoded in a segment file name.
///
/// Everything from the first `.` on is ignored, so older names that carried a
/// fractional-second suffix (`2024-01-01 00_00_00.123456.avi`) still parse.
pub fn parse_segment_file_name(name: &str) -> Result<NaiveDateTime> {
    let stem = name.split_once('.').map_or(name, |(stem, _)| stem);
    NaiveDateTime::parse_from_str(&desanitize(stem), TIMESTAMP_FORMAT).map_err(|source| {
        Error::TimestampParse {
            name: name.to_string(),
            source,
        }
    })
}

pub fn camera_dir(root: &Path, camera: &CameraIdentity) -> PathBuf {
    root.join(camera.as_str())
}

/// Day folder for `ts`. Pure in `(root, camera, year, month, day)`.
pub fn destination(root: &Path, camera: &CameraIdentity, ts: NaiveDateTime) -> PathBuf {
    camera_dir(root, camera)
        .join(ts.year().to_string())
        .join(ts.month().to_string())
        .join(ts.day().to_string())
}

pub fn segment_path(
    root: &Path,
    camera: &CameraIdentity,
    ts: NaiveDateTime,
    extension: &str,
) -> PathBuf {
    destination(root, camera, ts).join(segment_file_name(ts, extension))
}

/// Creates `dir` and its parents. A directory that already exists, including one
/// created concurrently by another writer, is not an error.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(source) => Err(Error::CreateDir {
            path: dir.to_path_buf(),
            source,
        }),
    }
}
