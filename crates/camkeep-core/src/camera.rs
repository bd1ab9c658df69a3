use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::backend::{CaptureSource, Codec, StreamParams, VideoBackend};
use crate::error::{Error, Result};
use crate::session::{RecordingSession, Rotation, SessionStatus};

/// Characters Windows rejects in folder names; `/` and `\` also split paths.
const FORBIDDEN_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Camera name used as the top-level folder of its recordings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CameraIdentity(String);

impl CameraIdentity {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let invalid = |reason| Error::InvalidCameraName {
            name: name.clone(),
            reason,
        };
        if name.is_empty() {
            return Err(invalid("name is empty"));
        }
        if name.trim() != name {
            return Err(invalid("leading or trailing whitespace"));
        }
        if name == "." || name == ".." {
            return Err(invalid("reserved directory name"));
        }
        if name
            .chars()
            .any(|c| c.is_control() || FORBIDDEN_CHARS.contains(&c))
        {
            return Err(invalid("contains a character not allowed in folder names"));
        }
        if name.ends_with('.') {
            return Err(invalid("trailing dot"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for CameraIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for CameraIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for CameraIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Encoder settings shared by every camera; frame size comes from each source.
#[derive(Debug, Clone)]
pub struct RecordingSettings {
    pub fps: f64,
    pub codec: Codec,
    pub extension: String,
    pub write_stall_timeout: Duration,
}

fn release_quietly<C: CaptureSource>(capture: &mut C, identity: &CameraIdentity) {
    if let Err(err) = capture.release() {
        warn!(camera = %identity, error = %err, "failed to release capture");
    }
}

/// Outcome of one poll of a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Written,
    NoFrame,
    SourceClosed,
}

/// A capture source bound to its recording session.
pub struct Camera<B: VideoBackend> {
    url: String,
    capture: Option<B::Capture>,
    session: RecordingSession<B>,
    frames_captured: u64,
    consecutive_failures: u32,
}

impl<B: VideoBackend> Camera<B> {
    /// Opens the stream and the first segment. Fails if the source never opens.
    pub fn start(
        backend: &mut B,
        identity: CameraIdentity,
        url: &str,
        root: &Path,
        settings: &RecordingSettings,
        now: NaiveDateTime,
    ) -> Result<Self> {
        let mut capture = backend.open_capture(url)?;
        if !capture.is_open() {
            release_quietly(&mut capture, &identity);
            return Err(Error::CameraUnavailable(format!(
                "{identity}: could not connect to stream"
            )));
        }
        let (width, height) = match capture.frame_size() {
            Ok(size) => size,
            Err(err) => {
                release_quietly(&mut capture, &identity);
                return Err(err);
            }
        };
        let params = StreamParams {
            width,
            height,
            fps: settings.fps,
            codec: settings.codec,
            extension: settings.extension.clone(),
        };
        let session = match RecordingSession::start(
            backend,
            identity.clone(),
            root,
            params,
            settings.write_stall_timeout,
            now,
        ) {
            Ok(session) => session,
            Err(err) => {
                release_quietly(&mut capture, &identity);
                return Err(err);
            }
        };
        info!(camera = %session.camera(), width, height, "camera connected");
        Ok(Self {
            url: url.to_string(),
            capture: Some(capture),
            session,
            frames_captured: 0,
            consecutive_failures: 0,
        })
    }

    /// Reads one frame and records it. Read failures skip the tick without
    /// touching any counter; write failures are returned and are fatal.
    pub fn poll(&mut self) -> Result<Tick> {
        let Some(capture) = self.capture.as_mut() else {
            return Err(Error::SessionStopped(self.session.camera().to_string()));
        };
        if !capture.is_open() {
            self.consecutive_failures += 1;
            warn!(
                camera = %self.session.camera(),
                url = %redact_url(&self.url),
                failures = self.consecutive_failures,
                "problem connecting to stream"
            );
            return Ok(Tick::SourceClosed);
        }
        let frame = match capture.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.consecutive_failures += 1;
                debug!(camera = %self.session.camera(), "no frame this tick");
                return Ok(Tick::NoFrame);
            }
            Err(err) => {
                self.consecutive_failures += 1;
                warn!(camera = %self.session.camera(), error = %err, "frame read failed");
                return Ok(Tick::NoFrame);
            }
        };
        self.consecutive_failures = 0;
        self.frames_captured += 1;
        self.session.write(&frame)?;
        Ok(Tick::Written)
    }

    pub fn rotate(&mut self, backend: &mut B, now: NaiveDateTime) -> Result<Rotation> {
        self.session.rotate(backend, now)
    }

    /// Closes the segment and releases the capture source. Idempotent.
    pub fn stop(&mut self) {
        self.session.stop();
        if let Some(mut capture) = self.capture.take() {
            if let Err(err) = capture.release() {
                warn!(camera = %self.session.camera(), error = %err, "failed to release capture");
            }
        }
    }

    pub fn identity(&self) -> &CameraIdentity {
        self.session.camera()
    }

    pub fn session(&self) -> &RecordingSession<B> {
        &self.session
    }

    pub fn is_active(&self) -> bool {
        self.capture.is_some() && self.session.is_recording()
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn status(&self) -> CameraStatus {
        CameraStatus {
            session: self.session.status(),
            frames_captured: self.frames_captured,
            consecutive_read_failures: self.consecutive_failures,
        }
    }
}

impl<B: VideoBackend> Drop for Camera<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraStatus {
    #[serde(flatten)]
    pub session: SessionStatus,
    pub frames_captured: u64,
    pub consecutive_read_failures: u32,
}

/// Hides `user:password@` in stream URLs before they reach logs.
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{scheme}://****@{}", &rest[at + 1..]),
        None => url.to_string(),
    }
}
