//! Mock collaborators for executor and scheduler tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use diagnosis_core::{
    models::{AcquisitionFailure, Camera, Frame},
    traits::{CameraGroupResolver, ImageSource, ObjectStore},
    SchedulerError, SchedulerResult,
};
use image::RgbImage;

/// Image source returning scripted frames per camera
///
/// Cameras without a script receive the default frame. The camera
/// precheck still runs first, just like a real source.
#[derive(Clone)]
pub struct StaticImageSource {
    default_frame: RgbImage,
    scripted: Arc<Mutex<HashMap<i64, Result<RgbImage, AcquisitionFailure>>>>,
    calls: Arc<Mutex<Vec<i64>>>,
}

impl StaticImageSource {
    pub fn new(default_frame: RgbImage) -> Self {
        Self {
            default_frame,
            scripted: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_frame(self, camera_id: i64, frame: RgbImage) -> Self {
        self.scripted.lock().unwrap().insert(camera_id, Ok(frame));
        self
    }

    pub fn with_failure(self, camera_id: i64, failure: AcquisitionFailure) -> Self {
        self.scripted.lock().unwrap().insert(camera_id, Err(failure));
        self
    }

    pub fn acquired_cameras(&self) -> Vec<i64> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageSource for StaticImageSource {
    async fn acquire(&self, camera: &Camera) -> Result<Frame, AcquisitionFailure> {
        camera.precheck()?;
        self.calls.lock().unwrap().push(camera.id);
        let scripted = self.scripted.lock().unwrap().get(&camera.id).cloned();
        match scripted {
            Some(Ok(image)) => Ok(Frame::new(image)),
            Some(Err(failure)) => Err(failure),
            None => Ok(Frame::new(self.default_frame.clone())),
        }
    }
}

/// Image source that holds every acquisition for a fixed delay
///
/// Tracks how many acquisitions overlap so tests can check how many
/// tasks a scheduler really runs at once.
#[derive(Clone)]
pub struct SlowImageSource {
    frame: RgbImage,
    delay: Duration,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

impl SlowImageSource {
    pub fn new(frame: RgbImage, delay: Duration) -> Self {
        Self {
            frame,
            delay,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Highest number of acquisitions seen in flight at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageSource for SlowImageSource {
    async fn acquire(&self, camera: &Camera) -> Result<Frame, AcquisitionFailure> {
        camera.precheck()?;
        let in_flight = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(in_flight, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(Frame::new(self.frame.clone()))
    }
}

/// Object store that keeps uploads in memory
#[derive(Clone, Default)]
pub struct RecordingObjectStore {
    uploads: Arc<Mutex<Vec<(String, String, usize)>>>,
    fail: bool,
}

impl RecordingObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every upload fails
    pub fn failing() -> Self {
        Self {
            uploads: Arc::new(Mutex::new(Vec::new())),
            fail: true,
        }
    }

    /// (bucket, key, size) of every successful upload
    pub fn uploads(&self) -> Vec<(String, String, usize)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for RecordingObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> SchedulerResult<String> {
        if self.fail {
            return Err(SchedulerError::ObjectStore("mock store unavailable".to_string()));
        }
        self.uploads
            .lock()
            .unwrap()
            .push((bucket.to_string(), key.to_string(), bytes.len()));
        Ok(format!("http://objects.test/{bucket}/{key}"))
    }
}

/// Group resolver backed by a fixed mapping
#[derive(Clone, Default)]
pub struct StaticGroupResolver {
    groups: HashMap<i64, Vec<i64>>,
}

impl StaticGroupResolver {
    pub fn new(groups: HashMap<i64, Vec<i64>>) -> Self {
        Self { groups }
    }
}

#[async_trait]
impl CameraGroupResolver for StaticGroupResolver {
    async fn resolve(&self, group_ids: &[i64]) -> SchedulerResult<Vec<i64>> {
        Ok(group_ids
            .iter()
            .filter_map(|g| self.groups.get(g))
            .flatten()
            .copied()
            .collect())
    }
}
