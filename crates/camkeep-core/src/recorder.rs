//! Single-threaded control loop: poll every camera, then run whatever the
//! schedule says is due.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backend::VideoBackend;
use crate::camera::{Camera, CameraIdentity, CameraStatus, RecordingSettings, Tick};
use crate::config::{CameraSpec, Config};
use crate::error::{Error, Result};
use crate::registry::CameraRegistry;
use crate::retention::{RetentionSweeper, SweepReport};
use crate::schedule::{Job, Schedule, Trigger};
use crate::session::Rotation;

const IDLE_BACKOFF: Duration = Duration::from_millis(10);
const EMPTY_BACKOFF: Duration = Duration::from_millis(500);

/// What one loop iteration did.
#[derive(Debug, Default)]
pub struct TickSummary {
    pub frames_written: usize,
    pub frames_skipped: usize,
    pub rotations: usize,
    pub stopped: Vec<CameraIdentity>,
    pub sweeps: Vec<SweepReport>,
}

pub struct Recorder<B: VideoBackend> {
    backend: B,
    registry: CameraRegistry<B>,
    schedule: Schedule,
    sweeper: RetentionSweeper,
    root: PathBuf,
    settings: RecordingSettings,
    segment_length: Duration,
}

pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

impl<B: VideoBackend> Recorder<B> {
    /// Builds an empty recorder with the daily retention sweep already scheduled.
    pub fn new(backend: B, config: &Config, now: NaiveDateTime) -> Result<Self> {
        let sweeper = RetentionSweeper::new(&config.recordings_root, config.retention_days)?;
        let mut schedule = Schedule::new();
        schedule.add(Trigger::DailyAt(config.sweep_at), Job::RetentionSweep, now)?;
        Ok(Self {
            backend,
            registry: CameraRegistry::new(),
            schedule,
            sweeper,
            root: config.recordings_root.clone(),
            settings: config.recording_settings(),
            segment_length: config.segment_length,
        })
    }

    /// Connects the camera, opens its first segment and schedules its rotation.
    pub fn add_camera(&mut self, spec: &CameraSpec, now: NaiveDateTime) -> Result<()> {
        if self.registry.contains(&spec.name) {
            return Err(Error::DuplicateCamera(spec.name.to_string()));
        }
        self.schedule.add(
            Trigger::Every(self.segment_length),
            Job::Rotate(spec.name.clone()),
            now,
        )?;
        let started = Camera::start(
            &mut self.backend,
            spec.name.clone(),
            &spec.url,
            &self.root,
            &self.settings,
            now,
        )
        .and_then(|camera| self.registry.insert(camera));
        if started.is_err() {
            self.schedule.remove_camera(&spec.name);
        }
        started
    }

    /// Starts every camera it can. A camera whose stream never opens is logged
    /// and left out; the others still record. Returns how many started.
    pub fn start_cameras(&mut self, specs: &[CameraSpec], now: NaiveDateTime) -> usize {
        let mut started = 0;
        for spec in specs {
            match self.add_camera(spec, now) {
                Ok(()) => started += 1,
                Err(err) => error!(camera = %spec.name, error = %err, "camera failed to start"),
            }
        }
        started
    }

    pub fn tick(&mut self, now: NaiveDateTime, cancel: &CancellationToken) -> TickSummary {
        let mut summary = TickSummary::default();
        let mut failed = Vec::new();

        for camera in self.registry.iter_mut() {
            if cancel.is_cancelled() {
                return summary;
            }
            match camera.poll() {
                Ok(Tick::Written) => summary.frames_written += 1,
                Ok(Tick::NoFrame | Tick::SourceClosed) => summary.frames_skipped += 1,
                Err(err) => {
                    error!(camera = %camera.identity(), error = %err, "recording failed; stopping camera");
                    failed.push(camera.identity().clone());
                }
            }
        }
        for id in failed {
            self.drop_camera(&id, &mut summary);
        }

        for job in self.schedule.due(now) {
            match job {
                Job::Rotate(id) => {
                    let Some(camera) = self.registry.get_mut(&id) else {
                        continue;
                    };
                    match camera.rotate(&mut self.backend, now) {
                        Ok(Rotation::Rotated { .. }) => summary.rotations += 1,
                        Ok(Rotation::Skipped) => {}
                        Err(err) => {
                            error!(camera = %id, error = %err, "rotation failed; stopping camera");
                            self.drop_camera(&id, &mut summary);
                        }
                    }
                }
                Job::RetentionSweep => {
                    let active = self.registry.active_paths();
                    match self.sweeper.sweep(now, &active) {
                        Ok(report) => summary.sweeps.push(report),
                        Err(err) => error!(error = %err, "retention sweep failed"),
                    }
                }
            }
        }
        summary
    }

    /// Loops until `cancel` fires, then releases every camera. Returns the last
    /// status of each camera still running at that point.
    pub fn run(mut self, cancel: CancellationToken) -> Vec<CameraStatus> {
        info!(
            cameras = self.registry.len(),
            segment_length = %humantime::format_duration(self.segment_length),
            retention_days = self.sweeper.retention_days(),
            "recorder running"
        );
        let mut idle_warned = false;
        while !cancel.is_cancelled() {
            let summary = self.tick(local_now(), &cancel);
            if self.registry.is_empty() {
                if !idle_warned {
                    warn!("no cameras are recording; only retention sweeps will run");
                    idle_warned = true;
                }
                thread::sleep(EMPTY_BACKOFF);
            } else if summary.frames_written == 0 {
                thread::sleep(IDLE_BACKOFF);
            }
        }
        self.shutdown()
    }

    pub fn shutdown(&mut self) -> Vec<CameraStatus> {
        let statuses = self.registry.statuses();
        self.registry.stop_all();
        info!(cameras = statuses.len(), "recorder stopped");
        statuses
    }

    pub fn registry(&self) -> &CameraRegistry<B> {
        &self.registry
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn drop_camera(&mut self, id: &CameraIdentity, summary: &mut TickSummary) {
        self.registry.remove(id);
        self.schedule.remove_camera(id);
        summary.stopped.push(id.clone());
    }
}
