//! Seams to the video library: capture sources and segment writers.
//!
//! The recorder never decodes or encodes video itself. A [`VideoBackend`] hands
//! out capture sources for stream URLs and frame writers for segment paths; the
//! OpenCV implementation lives behind the `opencv` feature.

use std::path::Path;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::error::Result;

#[cfg(feature = "opencv")]
pub mod opencv;

pub const DEFAULT_FPS: f64 = 20.0;
pub const DEFAULT_EXTENSION: &str = "avi";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Codec {
    Mp4v,
    Mjpg,
    Xvid,
    H264,
}

impl Codec {
    pub fn fourcc(self) -> [char; 4] {
        match self {
            Codec::Mp4v => ['m', 'p', '4', 'v'],
            Codec::Mjpg => ['M', 'J', 'P', 'G'],
            Codec::Xvid => ['X', 'V', 'I', 'D'],
            Codec::H264 => ['H', '2', '6', '4'],
        }
    }

    pub fn platform_default() -> Self {
        if cfg!(windows) { Codec::Mjpg } else { Codec::Mp4v }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::platform_default()
    }
}

/// Fixed per-session encoder parameters; identical for every segment of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamParams {
    pub width: i32,
    pub height: i32,
    pub fps: f64,
    pub codec: Codec,
    pub extension: String,
}

pub trait CaptureSource {
    type Frame;

    fn is_open(&self) -> bool;

    /// `Ok(None)` when the source produced nothing this tick.
    fn read_frame(&mut self) -> Result<Option<Self::Frame>>;

    /// Native `(width, height)` reported by the source.
    fn frame_size(&self) -> Result<(i32, i32)>;

    fn release(&mut self) -> Result<()>;
}

pub trait FrameWriter {
    type Frame;

    fn write_frame(&mut self, frame: &Self::Frame) -> Result<()>;

    /// Flushes and closes the file. The writer is consumed so a released
    /// handle cannot be written to.
    fn release(self) -> Result<()>;
}

pub trait VideoBackend {
    type Frame;
    type Capture: CaptureSource<Frame = Self::Frame>;
    type Writer: FrameWriter<Frame = Self::Frame>;

    fn open_capture(&mut self, url: &str) -> Result<Self::Capture>;

    fn open_writer(&mut self, path: &Path, params: &StreamParams) -> Result<Self::Writer>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_parses_case_insensitively() {
        assert_eq!("MJPG".parse::<Codec>().expect("codec"), Codec::Mjpg);
        assert_eq!("mp4v".parse::<Codec>().expect("codec"), Codec::Mp4v);
        assert!("vp9".parse::<Codec>().is_err());
        assert_eq!(Codec::Xvid.to_string(), "xvid");
    }

    #[test]
    fn fourcc_matches_codec() {
        assert_eq!(Codec::Mp4v.fourcc(), ['m', 'p', '4', 'v']);
        assert_eq!(Codec::Mjpg.fourcc(), ['M', 'J', 'P', 'G']);
    }
}
