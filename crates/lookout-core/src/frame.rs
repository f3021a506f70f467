//! Preview frame type and pixel-format conversion.

use std::borrow::Cow;
use std::io::Cursor;

/// Pixel layout of a raw preview buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, Y is every even byte).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
    /// Motion-JPEG; each buffer is a complete JPEG image.
    Mjpeg,
}

impl PixelFormat {
    /// Whether the luma plane can be extracted without a JPEG decoder.
    pub fn has_luma_plane(self) -> bool {
        !matches!(self, Self::Mjpeg)
    }
}

/// One preview frame, owned by the pipeline for the duration of a tick.
#[derive(Clone)]
pub struct Frame {
    /// Raw buffer in `format` layout.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub sequence: u32,
    pub timestamp: std::time::Instant,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
            sequence: 0,
            timestamp: std::time::Instant::now(),
        }
    }

    /// Frame size in pixels as `(width, height)`.
    pub fn size(&self) -> (f32, f32) {
        (self.width as f32, self.height as f32)
    }

    /// 8-bit luma plane (`width * height` bytes).
    pub fn luma(&self) -> Result<Cow<'_, [u8]>, FrameError> {
        let pixels = (self.width * self.height) as usize;
        match self.format {
            PixelFormat::Grey => {
                if self.data.len() < pixels {
                    return Err(FrameError::InvalidLength {
                        expected: pixels,
                        actual: self.data.len(),
                    });
                }
                Ok(Cow::Borrowed(&self.data[..pixels]))
            }
            PixelFormat::Yuyv => yuyv_to_grayscale(&self.data, self.width, self.height).map(Cow::Owned),
            PixelFormat::Y16 => y16_to_grayscale(&self.data, self.width, self.height).map(Cow::Owned),
            PixelFormat::Mjpeg => Err(FrameError::Unsupported(self.format)),
        }
    }

    /// Encode the frame as a still image suitable for upload.
    ///
    /// MJPEG buffers already are JPEG files and are returned as-is; every
    /// other format is encoded as a grayscale PNG.
    pub fn encode_still(&self) -> Result<Vec<u8>, FrameError> {
        if self.format == PixelFormat::Mjpeg {
            return Ok(self.data.clone());
        }
        let luma = self.luma()?.into_owned();
        let img = image::GrayImage::from_raw(self.width, self.height, luma).ok_or(
            FrameError::InvalidLength {
                expected: (self.width * self.height) as usize,
                actual: self.data.len(),
            },
        )?;
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png)
            .map_err(|e| FrameError::Encode(e.to_string()))?;
        Ok(out.into_inner())
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Downscale 16-bit little-endian grayscale to 8 bits by keeping the high byte.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if y16.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: y16.len(),
        });
    }
    Ok(y16[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("pixel format {0:?} has no luma plane")]
    Unsupported(PixelFormat),
    #[error("still encoding failed: {0}")]
    Encode(String),
}
