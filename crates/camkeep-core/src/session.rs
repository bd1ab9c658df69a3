//! Per-camera recording session: one open segment file at a time, rotated on a
//! fixed cadence into dated folders.

use std::mem;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::backend::{FrameWriter, StreamParams, VideoBackend};
use crate::camera::CameraIdentity;
use crate::error::{Error, Result};
use crate::layout;

pub const DEFAULT_WRITE_STALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Seconds tried after the requested timestamp before giving up on a free name.
const FREE_NAME_ATTEMPTS: usize = 60;

struct Segment<W> {
    writer: W,
    path: PathBuf,
    opened_at: NaiveDateTime,
}

enum SessionState<W> {
    Recording(Segment<W>),
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rotation {
    Rotated { closed: PathBuf, opened: PathBuf },
    /// The next segment would reuse the open segment's name (same second).
    Skipped,
}

/// Read-only snapshot of a session for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub camera: String,
    pub started_at: NaiveDateTime,
    pub files_saved: u64,
    pub frames_written: u64,
    pub recording: bool,
    pub current_file: Option<PathBuf>,
    pub segment_opened_at: Option<NaiveDateTime>,
    pub destination: Option<PathBuf>,
}

pub struct RecordingSession<B: VideoBackend> {
    camera: CameraIdentity,
    root: PathBuf,
    params: StreamParams,
    stall_timeout: Duration,
    state: SessionState<B::Writer>,
    started_at: NaiveDateTime,
    files_saved: u64,
    frames_written: u64,
}

impl<B: VideoBackend> RecordingSession<B> {
    /// Opens the first segment immediately; the session starts out recording.
    pub fn start(
        backend: &mut B,
        camera: CameraIdentity,
        root: &Path,
        params: StreamParams,
        stall_timeout: Duration,
        now: NaiveDateTime,
    ) -> Result<Self> {
        if params.width <= 0 || params.height <= 0 {
            return Err(Error::InvalidStream {
                width: params.width,
                height: params.height,
            });
        }
        let mut session = Self {
            camera,
            root: root.to_path_buf(),
            params,
            stall_timeout,
            state: SessionState::Stopped,
            started_at: layout::segment_timestamp(now),
            files_saved: 0,
            frames_written: 0,
        };
        let segment = session.open(backend, now)?;
        session.state = SessionState::Recording(segment);
        Ok(session)
    }

    /// Opens a writer at `destination(ts)/<sanitized ts>.<ext>`, creating the day
    /// folder first. An existing segment is never reopened: if the name is taken
    /// (clock stepped back, quick restart) the next free second is used.
    fn open(&self, backend: &mut B, ts: NaiveDateTime) -> Result<Segment<B::Writer>> {
        let (opened_at, dir, path) = self.free_slot(layout::segment_timestamp(ts))?;
        layout::ensure_dir(&dir)?;
        let writer = backend.open_writer(&path, &self.params)?;
        info!(
            camera = %self.camera,
            path = %path.display(),
            "new recording cycle started"
        );
        Ok(Segment {
            writer,
            path,
            opened_at,
        })
    }

    fn free_slot(&self, requested: NaiveDateTime) -> Result<(NaiveDateTime, PathBuf, PathBuf)> {
        let mut candidate = requested;
        for _ in 0..FREE_NAME_ATTEMPTS {
            let dir = layout::destination(&self.root, &self.camera, candidate);
            let path = dir.join(layout::segment_file_name(candidate, &self.params.extension));
            if !matches!(path.try_exists(), Ok(true)) {
                if candidate != requested {
                    warn!(
                        camera = %self.camera,
                        requested = %requested,
                        path = %path.display(),
                        "segment name already taken; using the next free second"
                    );
                }
                return Ok((candidate, dir, path));
            }
            match candidate.checked_add_signed(TimeDelta::seconds(1)) {
                Some(next) => candidate = next,
                None => break,
            }
        }
        Err(Error::SegmentExists {
            path: layout::segment_path(&self.root, &self.camera, requested, &self.params.extension),
        })
    }

    /// Appends one frame to the open segment.
    ///
    /// Writer errors and writes slower than the stall timeout stop the session.
    /// The duration is measured once the writer returns, so a writer that never
    /// returns is not detected here.
    pub fn write(&mut self, frame: &B::Frame) -> Result<()> {
        let SessionState::Recording(segment) = &mut self.state else {
            return Err(Error::SessionStopped(self.camera.to_string()));
        };
        let started = Instant::now();
        let written = segment.writer.write_frame(frame);
        let elapsed = started.elapsed();

        if let Err(err) = written {
            error!(camera = %self.camera, error = %err, "frame write failed; stopping session");
            self.close_current();
            return Err(err);
        }
        self.frames_written += 1;
        if elapsed > self.stall_timeout {
            error!(
                camera = %self.camera,
                elapsed_ms = elapsed.as_millis() as u64,
                "frame write stalled; stopping session"
            );
            self.close_current();
            return Err(Error::WriteStalled { elapsed });
        }
        Ok(())
    }

    /// Closes the current segment and opens the next one named after `now`.
    ///
    /// The session leaves the recording state before the old writer is released,
    /// so a failed open leaves it stopped rather than pointing at a closed handle.
    pub fn rotate(&mut self, backend: &mut B, now: NaiveDateTime) -> Result<Rotation> {
        let next_at = layout::segment_timestamp(now);
        match &self.state {
            SessionState::Stopped => return Err(Error::SessionStopped(self.camera.to_string())),
            SessionState::Recording(segment) if segment.opened_at == next_at => {
                debug!(camera = %self.camera, "rotation within the same second skipped");
                return Ok(Rotation::Skipped);
            }
            SessionState::Recording(_) => {}
        }

        let closed = self.close_current().unwrap_or_default();
        self.files_saved += 1;
        info!(
            camera = %self.camera,
            path = %closed.display(),
            files_saved = self.files_saved,
            "recording cycle ended, file saved"
        );

        let segment = self.open(backend, next_at)?;
        let opened = segment.path.clone();
        self.state = SessionState::Recording(segment);
        Ok(Rotation::Rotated { closed, opened })
    }

    /// Releases the open segment, if any. Calling it again is a no-op.
    pub fn stop(&mut self) {
        if let Some(path) = self.close_current() {
            info!(camera = %self.camera, path = %path.display(), "recording stopped");
        }
    }

    fn close_current(&mut self) -> Option<PathBuf> {
        match mem::replace(&mut self.state, SessionState::Stopped) {
            SessionState::Recording(segment) => {
                if let Err(err) = segment.writer.release() {
                    warn!(
                        camera = %self.camera,
                        path = %segment.path.display(),
                        error = %err,
                        "failed to release segment writer"
                    );
                }
                Some(segment.path)
            }
            SessionState::Stopped => None,
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, SessionState::Recording(_))
    }

    pub fn current_path(&self) -> Option<&Path> {
        match &self.state {
            SessionState::Recording(segment) => Some(&segment.path),
            SessionState::Stopped => None,
        }
    }

    pub fn camera(&self) -> &CameraIdentity {
        &self.camera
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    pub fn files_saved(&self) -> u64 {
        self.files_saved
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn started_at(&self) -> NaiveDateTime {
        self.started_at
    }

    pub fn status(&self) -> SessionStatus {
        let segment = match &self.state {
            SessionState::Recording(segment) => Some(segment),
            SessionState::Stopped => None,
        };
        SessionStatus {
            camera: self.camera.to_string(),
            started_at: self.started_at,
            files_saved: self.files_saved,
            frames_written: self.frames_written,
            recording: segment.is_some(),
            current_file: segment.map(|s| s.path.clone()),
            segment_opened_at: segment.map(|s| s.opened_at),
            destination: segment.and_then(|s| s.path.parent().map(Path::to_path_buf)),
        }
    }
}

impl<B: VideoBackend> Drop for RecordingSession<B> {
    fn drop(&mut self) {
        self.close_current();
    }
}
