//! V4L2 camera capture via the `v4l` crate.

use lookout_core::{Frame, PixelFormat};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// `ENODEV`, reported by the driver once a USB camera is unplugged.
const ENODEV: i32 = 19;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("device disconnected: {0}")]
    Disconnected(String),
    #[error("capture device released")]
    Released,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("still encoding failed: {0}")]
    Encode(#[from] lookout_core::FrameError),
}

impl CameraError {
    /// Device faults end the capture session; everything else only spoils
    /// the current frame.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::CaptureFailed(_) | Self::Encode(_))
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pick the largest resolution whose height fits `max_height`, or the
/// smallest available one when nothing fits.
pub fn choose_resolution(sizes: &[(u32, u32)], max_height: u32) -> Option<(u32, u32)> {
    let area = |&(w, h): &(u32, u32)| u64::from(w) * u64::from(h);
    sizes
        .iter()
        .filter(|(_, h)| *h <= max_height)
        .max_by_key(|s| area(s))
        .or_else(|| sizes.iter().min_by_key(|s| area(s)))
        .copied()
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera and negotiate a preview format no taller than `max_height`.
    pub fn open(device_path: &str, max_height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to query capabilities: {e}"))
        })?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }
        tracing::info!(device = device_path, driver = %caps.driver, card = %caps.card, "opened camera");

        let yuyv = FourCC::new(b"YUYV");
        let sizes: Vec<(u32, u32)> = device
            .enum_framesizes(yuyv)
            .unwrap_or_default()
            .into_iter()
            .map(|fs| match fs.size {
                FrameSizeEnum::Discrete(d) => (d.width, d.height),
                FrameSizeEnum::Stepwise(s) => (s.max_width, s.max_height),
            })
            .collect();

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = yuyv;
        if let Some((width, height)) = choose_resolution(&sizes, max_height) {
            fmt.width = width;
            fmt.height = height;
        }

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = match &fourcc.repr {
            b"YUYV" => PixelFormat::Yuyv,
            b"GREY" => PixelFormat::Grey,
            b"Y16 " | b"Y16\0" => PixelFormat::Y16,
            b"MJPG" => PixelFormat::Mjpeg,
            _ => {
                return Err(CameraError::FormatNegotiationFailed(format!(
                    "unsupported pixel format: {fourcc:?} (need YUYV, GREY, Y16 or MJPG)"
                )))
            }
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated preview format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Capture a single frame in the negotiated format.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::Disconnected(format!("failed to create mmap stream: {e}")))?;

        let (buf, meta) = stream.next().map_err(|e| {
            if e.raw_os_error() == Some(ENODEV) {
                CameraError::Disconnected(e.to_string())
            } else {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            }
        })?;

        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };

        let mut frame = Frame::new(buf[..used].to_vec(), self.width, self.height, self.pixel_format);
        frame.sequence = meta.sequence;
        Ok(frame)
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}
