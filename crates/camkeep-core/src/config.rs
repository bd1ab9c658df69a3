use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use dirs::config_dir;
use serde::{Deserialize, Serialize};

use crate::backend::{Codec, DEFAULT_EXTENSION, DEFAULT_FPS};
use crate::camera::{CameraIdentity, RecordingSettings, redact_url};
use crate::error::{Error, Result};
use crate::retention::DEFAULT_RETENTION_DAYS;
use crate::session::DEFAULT_WRITE_STALL_TIMEOUT;

pub const ENV_CONFIG_PATH: &str = "CAMKEEP_CONFIG";
pub const ENV_RECORDINGS_ROOT: &str = "CAMKEEP_RECORDINGS_ROOT";
pub const ENV_RETENTION_DAYS: &str = "CAMKEEP_RETENTION_DAYS";
pub const ENV_SEGMENT_LENGTH: &str = "CAMKEEP_SEGMENT_LENGTH";
pub const ENV_SWEEP_AT: &str = "CAMKEEP_SWEEP_AT";
pub const ENV_FPS: &str = "CAMKEEP_FPS";
pub const ENV_CODEC: &str = "CAMKEEP_CODEC";
pub const ENV_EXTENSION: &str = "CAMKEEP_EXTENSION";
pub const ENV_RTSP_TRANSPORT: &str = "CAMKEEP_RTSP_TRANSPORT";
pub const ENV_WRITE_STALL_TIMEOUT: &str = "CAMKEEP_WRITE_STALL_TIMEOUT";
pub const ENV_CAMERAS: &str = "CAMKEEP_CAMERAS";
pub const DEFAULT_RECORDINGS_ROOT: &str = "recordings";
pub const DEFAULT_SEGMENT_LENGTH: Duration = Duration::from_secs(60);
pub const MAX_SEGMENT_LENGTH: Duration = Duration::from_secs(366 * 24 * 60 * 60);
pub const DEFAULT_SWEEP_AT: &str = "23:55";
pub const DEFAULT_RTSP_TRANSPORT: &str = "udp";
const SWEEP_AT_FORMAT: &str = "%H:%M";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSpec {
    pub name: CameraIdentity,
    pub url: String,
}

impl CameraSpec {
    /// Parses `NAME=URL`.
    pub fn parse(raw: &str) -> Result<Self> {
        let (name, url) = raw.split_once('=').ok_or_else(|| {
            Error::InvalidConfig(format!("camera must be NAME=URL, got {raw:?}"))
        })?;
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::InvalidConfig(format!("camera {name:?} has no URL")));
        }
        Ok(Self {
            name: CameraIdentity::new(name.trim())?,
            url: url.to_string(),
        })
    }
}

/// Runtime configuration resolved from environment and optional config file.
#[derive(Debug, Clone)]
pub struct Config {
    pub recordings_root: PathBuf,
    pub retention_days: u32,
    pub segment_length: Duration,
    pub sweep_at: NaiveTime,
    pub fps: f64,
    pub codec: Codec,
    pub extension: String,
    pub rtsp_transport: String,
    pub write_stall_timeout: Duration,
    pub cameras: Vec<CameraSpec>,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    recordings_root: Option<PathBuf>,
    retention_days: Option<u32>,
    segment_length: Option<String>,
    sweep_at: Option<String>,
    fps: Option<f64>,
    codec: Option<String>,
    extension: Option<String>,
    rtsp_transport: Option<String>,
    write_stall_timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    cameras: Vec<CameraEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct CameraEntry {
    name: String,
    url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigDoctor {
    pub source: String,
    pub recordings_root: PathBuf,
    pub retention_days: u32,
    pub segment_length: String,
    pub sweep_at: String,
    pub fps: f64,
    pub codec: Codec,
    pub extension: String,
    pub rtsp_transport: String,
    pub write_stall_timeout: String,
    pub cameras: Vec<CameraDoctor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraDoctor {
    pub name: String,
    pub url_redacted: String,
}

impl ConfigFile {
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|err| Error::InvalidConfig(format!("config parse error: {err}")))
    }
}

impl Config {
    /// Loads from `CAMKEEP_CONFIG` or the per-user config file, then applies
    /// environment overrides.
    pub fn load() -> Result<Self> {
        match std::env::var_os(ENV_CONFIG_PATH) {
            Some(path) => Self::load_from(Some(Path::new(&path))),
            None => Self::load_from(None),
        }
    }

    /// An explicit `path` must exist; the default location may be absent.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let (file_path, file_config) = match path {
            Some(path) => {
                let parsed = read_config_file(path)?.ok_or_else(|| {
                    Error::InvalidConfig(format!("config file {} does not exist", path.display()))
                })?;
                (Some(path.to_path_buf()), Some(parsed))
            }
            None => match config_path() {
                Some(default) => match read_config_file(&default)? {
                    Some(parsed) => (Some(default), Some(parsed)),
                    None => (None, None),
                },
                None => (None, None),
            },
        };
        let mut config = Self::resolve(file_config.as_ref(), |key| std::env::var(key).ok())?;
        config.file = file_path;
        Ok(config)
    }

    /// Environment first, then file, then defaults.
    pub fn resolve(
        file_config: Option<&ConfigFile>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let pick = |key: &str, from_file: Option<&String>| {
            env(key)
                .filter(|v| !v.trim().is_empty())
                .or_else(|| from_file.cloned())
        };

        let recordings_root = env(ENV_RECORDINGS_ROOT)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| file_config.and_then(|c| c.recordings_root.clone()))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RECORDINGS_ROOT));

        let retention_days = match env(ENV_RETENTION_DAYS).filter(|v| !v.trim().is_empty()) {
            Some(raw) => raw.trim().parse::<u32>().map_err(|err| {
                Error::InvalidConfig(format!("{ENV_RETENTION_DAYS}={raw:?}: {err}"))
            })?,
            None => file_config
                .and_then(|c| c.retention_days)
                .unwrap_or(DEFAULT_RETENTION_DAYS),
        };
        if retention_days == 0 {
            return Err(Error::InvalidConfig(
                "retention_days must be at least 1".into(),
            ));
        }

        let segment_length = pick(
            ENV_SEGMENT_LENGTH,
            file_config.and_then(|c| c.segment_length.as_ref()),
        )
        .map(|raw| parse_duration("segment_length", &raw))
        .transpose()?
        .unwrap_or(DEFAULT_SEGMENT_LENGTH);
        if segment_length > MAX_SEGMENT_LENGTH {
            return Err(Error::InvalidConfig(format!(
                "segment_length must be at most {}, got {}",
                humantime::format_duration(MAX_SEGMENT_LENGTH),
                humantime::format_duration(segment_length)
            )));
        }

        let sweep_at_raw = pick(ENV_SWEEP_AT, file_config.and_then(|c| c.sweep_at.as_ref()))
            .unwrap_or_else(|| DEFAULT_SWEEP_AT.to_string());
        let sweep_at = NaiveTime::parse_from_str(sweep_at_raw.trim(), SWEEP_AT_FORMAT)
            .map_err(|err| Error::InvalidConfig(format!("sweep_at {sweep_at_raw:?}: {err}")))?;

        let fps = match env(ENV_FPS).filter(|v| !v.trim().is_empty()) {
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .map_err(|err| Error::InvalidConfig(format!("{ENV_FPS}={raw:?}: {err}")))?,
            None => file_config.and_then(|c| c.fps).unwrap_or(DEFAULT_FPS),
        };
        if !(fps.is_finite() && fps > 0.0) {
            return Err(Error::InvalidConfig(format!("fps must be positive, got {fps}")));
        }

        let codec = pick(ENV_CODEC, file_config.and_then(|c| c.codec.as_ref()))
            .map(|raw| {
                raw.trim()
                    .parse::<Codec>()
                    .map_err(|_| Error::InvalidConfig(format!("unknown codec {raw:?}")))
            })
            .transpose()?
            .unwrap_or_default();

        let extension = pick(ENV_EXTENSION, file_config.and_then(|c| c.extension.as_ref()))
            .map(|ext| ext.trim().trim_start_matches('.').to_string())
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
        if extension.is_empty() || extension.contains(['/', '\\', '.']) {
            return Err(Error::InvalidConfig(format!("invalid extension {extension:?}")));
        }

        let rtsp_transport = pick(
            ENV_RTSP_TRANSPORT,
            file_config.and_then(|c| c.rtsp_transport.as_ref()),
        )
        .unwrap_or_else(|| DEFAULT_RTSP_TRANSPORT.to_string());

        let write_stall_timeout = pick(
            ENV_WRITE_STALL_TIMEOUT,
            file_config.and_then(|c| c.write_stall_timeout.as_ref()),
        )
        .map(|raw| parse_duration("write_stall_timeout", &raw))
        .transpose()?
        .unwrap_or(DEFAULT_WRITE_STALL_TIMEOUT);

        let cameras = match env(ENV_CAMERAS).filter(|v| !v.trim().is_empty()) {
            Some(raw) => raw
                .split(',')
                .filter(|item| !item.trim().is_empty())
                .map(CameraSpec::parse)
                .collect::<Result<Vec<_>>>()?,
            None => file_config
                .map(|c| c.cameras.as_slice())
                .unwrap_or_default()
                .iter()
                .map(|entry| {
                    Ok(CameraSpec {
                        name: CameraIdentity::new(entry.name.clone())?,
                        url: entry.url.clone(),
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };

        let config = Self {
            recordings_root,
            retention_days,
            segment_length,
            sweep_at,
            fps,
            codec,
            extension,
            rtsp_transport,
            write_stall_timeout,
            cameras: Vec::new(),
            file: None,
        };
        config.with_cameras(cameras)
    }

    /// Replaces the camera list, rejecting duplicate names.
    pub fn with_cameras(mut self, cameras: Vec<CameraSpec>) -> Result<Self> {
        for (idx, camera) in cameras.iter().enumerate() {
            if cameras[..idx].iter().any(|other| other.name == camera.name) {
                return Err(Error::InvalidConfig(format!(
                    "camera {} is configured more than once",
                    camera.name
                )));
            }
        }
        self.cameras = cameras;
        Ok(self)
    }

    pub fn recording_settings(&self) -> RecordingSettings {
        RecordingSettings {
            fps: self.fps,
            codec: self.codec,
            extension: self.extension.clone(),
            write_stall_timeout: self.write_stall_timeout,
        }
    }

    /// Writes the effective configuration to `path`, or the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let Some(path) = path.map(Path::to_path_buf).or_else(config_path) else {
            return Err(Error::InvalidConfig(
                "unable to determine config directory".into(),
            ));
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                Error::InvalidConfig(format!("failed to create config dir: {err}"))
            })?;
        }
        let file_config = ConfigFile {
            recordings_root: Some(self.recordings_root.clone()),
            retention_days: Some(self.retention_days),
            segment_length: Some(humantime::format_duration(self.segment_length).to_string()),
            sweep_at: Some(self.sweep_at.format(SWEEP_AT_FORMAT).to_string()),
            fps: Some(self.fps),
            codec: Some(self.codec.to_string()),
            extension: Some(self.extension.clone()),
            rtsp_transport: Some(self.rtsp_transport.clone()),
            write_stall_timeout: Some(
                humantime::format_duration(self.write_stall_timeout).to_string(),
            ),
            cameras: self
                .cameras
                .iter()
                .map(|c| CameraEntry {
                    name: c.name.to_string(),
                    url: c.url.clone(),
                })
                .collect(),
        };
        let serialized = toml::to_string_pretty(&file_config)
            .map_err(|err| Error::InvalidConfig(format!("failed to serialize config: {err}")))?;
        fs::write(&path, serialized)
            .map_err(|err| Error::InvalidConfig(format!("failed to write config: {err}")))?;
        Ok(path)
    }

    pub fn doctor(&self) -> ConfigDoctor {
        let source = match &self.file {
            Some(path) => format!("{} + environment", path.display()),
            None => "environment / defaults".to_string(),
        };
        ConfigDoctor {
            source,
            recordings_root: self.recordings_root.clone(),
            retention_days: self.retention_days,
            segment_length: humantime::format_duration(self.segment_length).to_string(),
            sweep_at: self.sweep_at.format(SWEEP_AT_FORMAT).to_string(),
            fps: self.fps,
            codec: self.codec,
            extension: self.extension.clone(),
            rtsp_transport: self.rtsp_transport.clone(),
            write_stall_timeout: humantime::format_duration(self.write_stall_timeout).to_string(),
            cameras: self
                .cameras
                .iter()
                .map(|c| CameraDoctor {
                    name: c.name.to_string(),
                    url_redacted: redact_url(&c.url),
                })
                .collect(),
        }
    }
}

fn parse_duration(key: &str, raw: &str) -> Result<Duration> {
    let parsed = humantime::parse_duration(raw.trim())
        .map_err(|err| Error::InvalidConfig(format!("{key} {raw:?}: {err}")))?;
    if parsed.is_zero() {
        return Err(Error::InvalidConfig(format!("{key} must be longer than zero")));
    }
    Ok(parsed)
}

/// `Ok(None)` when the file does not exist.
fn read_config_file(path: &Path) -> Result<Option<ConfigFile>> {
    match fs::read_to_string(path) {
        Ok(contents) => ConfigFile::parse(&contents).map(Some),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(Error::InvalidConfig(format!(
            "cannot read {}: {err}",
            path.display()
        ))),
    }
}

pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("camkeep").join("config.toml"))
}
