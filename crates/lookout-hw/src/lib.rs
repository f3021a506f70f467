//! lookout-hw — Hardware abstraction for preview capture.
//!
//! Provides V4L2-based camera access and the [`CaptureSource`] seam the
//! frame pipeline consumes.

pub mod camera;
pub mod capture;

pub use camera::{Camera, CameraError, DeviceInfo};
pub use capture::{CaptureSource, V4lCapture};
