use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use tracing::info;

use crate::backend::VideoBackend;
use crate::camera::{Camera, CameraIdentity, CameraStatus};
use crate::error::{Error, Result};

/// Owner of every running camera, keyed by identity. At most one camera, and
/// therefore one open segment writer, exists per identity.
pub struct CameraRegistry<B: VideoBackend> {
    cameras: BTreeMap<CameraIdentity, Camera<B>>,
}

impl<B: VideoBackend> Default for CameraRegistry<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: VideoBackend> CameraRegistry<B> {
    pub fn new() -> Self {
        Self {
            cameras: BTreeMap::new(),
        }
    }

    /// Rejects a camera whose identity is already registered; the rejected
    /// camera is dropped, which releases its resources.
    pub fn insert(&mut self, camera: Camera<B>) -> Result<()> {
        let id = camera.identity().clone();
        if self.cameras.contains_key(&id) {
            return Err(Error::DuplicateCamera(id.to_string()));
        }
        self.cameras.insert(id, camera);
        Ok(())
    }

    pub fn contains(&self, id: &CameraIdentity) -> bool {
        self.cameras.contains_key(id)
    }

    pub fn get_mut(&mut self, id: &CameraIdentity) -> Option<&mut Camera<B>> {
        self.cameras.get_mut(id)
    }

    /// Stops and drops the camera.
    pub fn remove(&mut self, id: &CameraIdentity) -> bool {
        match self.cameras.remove(id) {
            Some(mut camera) => {
                camera.stop();
                info!(camera = %id, "camera removed");
                true
            }
            None => false,
        }
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Camera<B>> {
        self.cameras.values_mut()
    }

    pub fn identities(&self) -> Vec<CameraIdentity> {
        self.cameras.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn statuses(&self) -> Vec<CameraStatus> {
        self.cameras.values().map(Camera::status).collect()
    }

    /// Segment files currently held open; the retention sweep leaves these alone.
    pub fn active_paths(&self) -> HashSet<PathBuf> {
        self.cameras
            .values()
            .filter_map(|camera| camera.session().current_path().map(PathBuf::from))
            .collect()
    }

    pub fn stop_all(&mut self) {
        for camera in self.cameras.values_mut() {
            camera.stop();
        }
        self.cameras.clear();
    }
}
