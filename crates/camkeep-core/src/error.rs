use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the recorder core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid camera name {name:?}: {reason}")]
    InvalidCameraName { name: String, reason: &'static str },
    #[error("camera {0} is already registered")]
    DuplicateCamera(String),
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("invalid stream size {width}x{height}; capture must report positive dimensions")]
    InvalidStream { width: i32, height: i32 },
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to open writer at {}: {message}", path.display())]
    WriterOpen { path: PathBuf, message: String },
    #[error("no free segment name near {}", path.display())]
    SegmentExists { path: PathBuf },
    #[error("frame write failed: {0}")]
    WriteFailed(String),
    #[error("frame write stalled for {}", humantime::format_duration(*elapsed))]
    WriteStalled { elapsed: Duration },
    #[error("recording session for {0} is stopped")]
    SessionStopped(String),
    #[error("recording name {name:?} is not a timestamp: {source}")]
    TimestampParse {
        name: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("invalid retention window of {0} days")]
    InvalidRetention(u32),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Errors after which a camera's session must not keep writing.
    pub fn is_fatal_for_session(&self) -> bool {
        matches!(
            self,
            Error::CreateDir { .. }
                | Error::WriterOpen { .. }
                | Error::SegmentExists { .. }
                | Error::WriteFailed(_)
                | Error::WriteStalled { .. }
                | Error::SessionStopped(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = Error::CreateDir {
            path: PathBuf::from("recordings/Lobby/2024/1/1"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(
            err.to_string(),
            "failed to create directory recordings/Lobby/2024/1/1: denied"
        );

        let err = Error::WriteStalled {
            elapsed: Duration::from_secs(12),
        };
        assert_eq!(err.to_string(), "frame write stalled for 12s");
    }

    #[test]
    fn io_errors_convert() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_fatal_for_session());
    }

    #[test]
    fn directory_failures_are_fatal_for_session() {
        let err = Error::CreateDir {
            path: PathBuf::from("x"),
            source: io::Error::other("boom"),
        };
        assert!(err.is_fatal_for_session());
        assert!(!Error::CameraUnavailable("offline".into()).is_fatal_for_session());
    }
}
