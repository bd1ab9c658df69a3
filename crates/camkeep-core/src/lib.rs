//! Recording rotation and retention for RTSP surveillance cameras.
//! This crate is consumed by the `camkeep` CLI.

pub mod backend;
pub mod camera;
pub mod config;
pub mod error;
pub mod layout;
pub mod recorder;
pub mod registry;
pub mod retention;
pub mod schedule;
pub mod session;

pub use crate::backend::{CaptureSource, Codec, FrameWriter, StreamParams, VideoBackend};
pub use crate::camera::{Camera, CameraIdentity, CameraStatus, RecordingSettings, Tick};
pub use crate::config::{CameraSpec, Config};
pub use crate::error::{Error, Result};
pub use crate::recorder::{Recorder, TickSummary};
pub use crate::registry::CameraRegistry;
pub use crate::retention::{RetentionSweeper, SweepReport};
pub use crate::schedule::{Job, Schedule, Trigger};
pub use crate::session::{RecordingSession, Rotation, SessionStatus};
