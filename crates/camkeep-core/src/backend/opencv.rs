use std::path::Path;

use opencv::core::{Mat, Size};
use opencv::prelude::*;
use opencv::videoio::{
    CAP_FFMPEG, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH, VideoCapture, VideoWriter,
};

use super::{CaptureSource, FrameWriter, StreamParams, VideoBackend};
use crate::error::{Error, Result};

pub const ENV_FFMPEG_CAPTURE_OPTIONS: &str = "OPENCV_FFMPEG_CAPTURE_OPTIONS";

/// Selects the RTSP transport FFmpeg uses for every capture opened afterwards.
///
/// # Safety
///
/// Mutates the process environment. Call it before any other thread is spawned.
pub unsafe fn configure_rtsp_transport(transport: &str) {
    if std::env::var_os(ENV_FFMPEG_CAPTURE_OPTIONS).is_some() {
        return;
    }
    // Safety: upheld by the caller; no other thread can be reading the environment yet.
    unsafe {
        std::env::set_var(
            ENV_FFMPEG_CAPTURE_OPTIONS,
            format!("rtsp_transport;{transport}"),
        );
    }
}

#[derive(Debug, Default)]
pub struct OpenCvBackend;

pub struct OpenCvCapture {
    inner: VideoCapture,
}

pub struct OpenCvWriter {
    inner: VideoWriter,
}

impl VideoBackend for OpenCvBackend {
    type Frame = Mat;
    type Capture = OpenCvCapture;
    type Writer = OpenCvWriter;

    fn open_capture(&mut self, url: &str) -> Result<OpenCvCapture> {
        let inner = VideoCapture::from_file(url, CAP_FFMPEG).map_err(cv_unavailable)?;
        Ok(OpenCvCapture { inner })
    }

    fn open_writer(&mut self, path: &Path, params: &StreamParams) -> Result<OpenCvWriter> {
        let open_err = |err: opencv::Error| Error::WriterOpen {
            path: path.to_path_buf(),
            message: err.to_string(),
        };
        let [c1, c2, c3, c4] = params.codec.fourcc();
        let fourcc = VideoWriter::fourcc(c1, c2, c3, c4).map_err(open_err)?;
        let inner = VideoWriter::new(
            &path.to_string_lossy(),
            fourcc,
            params.fps,
            Size::new(params.width, params.height),
            true,
        )
        .map_err(open_err)?;
        if !inner.is_opened().map_err(open_err)? {
            return Err(Error::WriterOpen {
                path: path.to_path_buf(),
                message: format!("encoder refused codec {}", params.codec),
            });
        }
        Ok(OpenCvWriter { inner })
    }
}

impl CaptureSource for OpenCvCapture {
    type Frame = Mat;

    fn is_open(&self) -> bool {
        self.inner.is_opened().unwrap_or(false)
    }

    fn read_frame(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        let ok = self.inner.read(&mut frame).map_err(cv_unavailable)?;
        if !ok || frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }

    fn frame_size(&self) -> Result<(i32, i32)> {
        let width = self.inner.get(CAP_PROP_FRAME_WIDTH).map_err(cv_unavailable)?;
        let height = self.inner.get(CAP_PROP_FRAME_HEIGHT).map_err(cv_unavailable)?;
        Ok((width as i32, height as i32))
    }

    fn release(&mut self) -> Result<()> {
        self.inner.release().map_err(cv_unavailable)
    }
}

impl FrameWriter for OpenCvWriter {
    type Frame = Mat;

    fn write_frame(&mut self, frame: &Mat) -> Result<()> {
        self.inner
            .write(frame)
            .map_err(|err| Error::WriteFailed(err.to_string()))
    }

    fn release(mut self) -> Result<()> {
        self.inner
            .release()
            .map_err(|err| Error::WriteFailed(format!("release failed: {err}")))
    }
}

fn cv_unavailable(err: opencv::Error) -> Error {
    Error::CameraUnavailable(err.to_string())
}
