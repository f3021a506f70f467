//! Capture-source abstraction consumed by the frame pipeline.

use crate::camera::{Camera, CameraError};
use async_trait::async_trait;
use lookout_core::Frame;
use parking_lot::Mutex;
use std::sync::Arc;

/// Source of preview frames and still photos.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Grab the current preview frame.
    async fn preview_frame(&self) -> Result<Frame, CameraError>;

    /// Capture an encoded still photo.
    async fn capture_photo(&self) -> Result<Vec<u8>, CameraError>;

    /// Whether the device is still streaming (not yet released).
    fn is_streaming(&self) -> bool;

    /// Release the device. Later captures fail with [`CameraError::Released`].
    fn release(&self);
}

/// [`CaptureSource`] backed by a V4L2 camera.
///
/// V4L2 calls block, so every capture runs on the blocking thread pool.
pub struct V4lCapture {
    camera: Arc<Mutex<Option<Camera>>>,
    device_path: String,
}

impl V4lCapture {
    pub fn initialize(device_path: &str, max_preview_height: u32) -> Result<Self, CameraError> {
        let camera = Camera::open(device_path, max_preview_height)?;
        Ok(Self {
            camera: Arc::new(Mutex::new(Some(camera))),
            device_path: device_path.to_string(),
        })
    }

    async fn capture(&self) -> Result<Frame, CameraError> {
        let camera = Arc::clone(&self.camera);
        tokio::task::spawn_blocking(move || match camera.lock().as_ref() {
            Some(cam) => cam.capture_frame(),
            None => Err(CameraError::Released),
        })
        .await
        .map_err(|e| CameraError::CaptureFailed(format!("capture task: {e}")))?
    }
}

#[async_trait]
impl CaptureSource for V4lCapture {
    async fn preview_frame(&self) -> Result<Frame, CameraError> {
        self.capture().await
    }

    async fn capture_photo(&self) -> Result<Vec<u8>, CameraError> {
        let frame = self.capture().await?;
        Ok(frame.encode_still()?)
    }

    fn is_streaming(&self) -> bool {
        self.camera.lock().is_some()
    }

    fn release(&self) {
        if self.camera.lock().take().is_some() {
            tracing::info!(device = %self.device_path, "capture device released");
        }
    }
}
