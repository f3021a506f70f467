//! Local face-box detection.
//!
//! The pipeline only needs face geometry from the local detector; identity
//! comes from the remote service. [`OnnxFaceDetector`] runs an SCRFD-style
//! model on the frame's luma plane and decodes boxes only.

use crate::frame::{Frame, FrameError, PixelFormat};
use crate::types::FaceBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const INPUT_MEAN: f32 = 127.5;
const INPUT_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("model has {0} outputs, expected at least 6 (score + bbox per stride)")]
    UnexpectedOutputs(usize),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Black-box local detector: frame in, face boxes out.
pub trait LocalDetector: Send {
    /// Whether frames in `format` can be processed at all. Frames in an
    /// unsupported format are skipped by the caller, not treated as errors.
    fn supports_format(&self, format: PixelFormat) -> bool;

    /// Face boxes in frame-pixel space, best first.
    fn detect_boxes(&mut self, frame: &Frame) -> Result<Vec<FaceBox>, DetectorError>;
}

/// Scale and padding applied when fitting the frame into the model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        Self {
            scale,
            pad_x: (INPUT_SIZE - new_w) / 2,
            pad_y: (INPUT_SIZE - new_h) / 2,
        }
    }

    fn inner_size(&self) -> (u32, u32) {
        (INPUT_SIZE - 2 * self.pad_x, INPUT_SIZE - 2 * self.pad_y)
    }

    /// Map a point from model-input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// ONNX face detector with anchor-free stride decoding and NMS.
pub struct OnnxFaceDetector {
    session: Session,
    /// `(score_output, bbox_output)` per entry of [`STRIDES`].
    outputs: [(usize, usize); 3],
}

impl OnnxFaceDetector {
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 6 {
            return Err(DetectorError::UnexpectedOutputs(names.len()));
        }
        let outputs = output_slots(&names);

        tracing::info!(path = model_path, outputs = ?names, slots = ?outputs, "face detector loaded");

        Ok(Self { session, outputs })
    }

    fn input_tensor(frame: &Frame) -> Result<(Array4<f32>, Letterbox), DetectorError> {
        let luma = frame.luma()?.into_owned();
        let gray = GrayImage::from_raw(frame.width, frame.height, luma).ok_or_else(|| {
            DetectorError::InferenceFailed("luma plane does not match frame size".into())
        })?;

        let letterbox = Letterbox::fit(frame.width, frame.height);
        let (inner_w, inner_h) = letterbox.inner_size();
        let resized = imageops::resize(&gray, inner_w, inner_h, FilterType::Triangle);

        let size = INPUT_SIZE as usize;
        // Padding normalises to zero.
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, px) in resized.enumerate_pixels() {
            let v = (px.0[0] as f32 - INPUT_MEAN) / INPUT_STD;
            let (tx, ty) = ((x + letterbox.pad_x) as usize, (y + letterbox.pad_y) as usize);
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = v;
            }
        }
        Ok((tensor, letterbox))
    }
}

impl LocalDetector for OnnxFaceDetector {
    fn supports_format(&self, format: PixelFormat) -> bool {
        format.has_luma_plane()
    }

    fn detect_boxes(&mut self, frame: &Frame) -> Result<Vec<FaceBox>, DetectorError> {
        let (input, letterbox) = Self::input_tensor(frame)?;
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut boxes = Vec::new();
        for (slot, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.outputs[slot];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores/{stride}: {e}")))?;
            let (_, deltas) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bbox/{stride}: {e}")))?;
            boxes.extend(decode(scores, deltas, stride, &letterbox));
        }

        Ok(suppress(boxes, NMS_IOU_THRESHOLD))
    }
}

/// Locate score and bbox outputs by name (`score_8`, `bbox_8`, ...), falling
/// back to the conventional positional layout.
fn output_slots(names: &[String]) -> [(usize, usize); 3] {
    let find = |prefix: &str, stride: usize| {
        let wanted = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == wanted)
    };
    let mut slots = [(0, 3), (1, 4), (2, 5)];
    for (slot, &stride) in STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride)) {
            (Some(s), Some(b)) => slots[slot] = (s, b),
            _ => return [(0, 3), (1, 4), (2, 5)],
        }
    }
    slots
}

fn decode(scores: &[f32], deltas: &[f32], stride: usize, letterbox: &Letterbox) -> Vec<FaceBox> {
    let grid = INPUT_SIZE as usize / stride;
    let anchors = grid * grid * ANCHORS_PER_CELL;
    let step = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= SCORE_THRESHOLD {
                return None;
            }
            let d = deltas.get(idx * 4..idx * 4 + 4)?;
            let cell = idx / ANCHORS_PER_CELL;
            let cx = (cell % grid) as f32 * step;
            let cy = (cell / grid) as f32 * step;

            let (x1, y1) = letterbox.unmap(cx - d[0] * step, cy - d[1] * step);
            let (x2, y2) = letterbox.unmap(cx + d[2] * step, cy + d[3] * step);
            Some(FaceBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; output is sorted by confidence.
fn suppress(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<FaceBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = w * h;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> FaceBox {
        FaceBox { confidence, ..FaceBox::new(x, y, w, h) }
    }

    #[test]
    fn test_iou_partial_overlap() {
        let a = FaceBox::new(0.0, 0.0, 10.0, 10.0);
        let b = FaceBox::new(5.0, 0.0, 10.0, 10.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_suppress_keeps_best_of_overlapping() {
        let boxes = vec![
            scored(5.0, 5.0, 100.0, 100.0, 0.8),
            scored(0.0, 0.0, 100.0, 100.0, 0.9),
            scored(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let kept = suppress(boxes, NMS_IOU_THRESHOLD);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn test_letterbox_unmap_inverts_fit() {
        let lb = Letterbox::fit(1280, 720);
        assert_eq!(lb.pad_x, 0);
        assert_eq!(lb.pad_y, 140);
        let (x, y) = lb.unmap(100.0 * lb.scale, 50.0 * lb.scale + lb.pad_y as f32);
        assert!((x - 100.0).abs() < 0.01);
        assert!((y - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_decode_single_anchor() {
        let lb = Letterbox { scale: 1.0, pad_x: 0, pad_y: 0 };
        let grid = INPUT_SIZE as usize / 32;
        let mut scores = vec![0.0; grid * grid * ANCHORS_PER_CELL];
        let mut deltas = vec![0.0; scores.len() * 4];
        // cell (1, 2) -> center (32, 64), first anchor
        let idx = (2 * grid + 1) * ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        deltas[idx * 4..idx * 4 + 4].copy_from_slice(&[0.5, 0.5, 0.5, 0.5]);

        let boxes = decode(&scores, &deltas, 32, &lb);
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0], scored(16.0, 48.0, 32.0, 32.0, 0.9));
    }

    #[test]
    fn test_output_slots_by_name_and_fallback() {
        let named: Vec<String> = ["bbox_8", "score_8", "bbox_16", "score_16", "bbox_32", "score_32"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(output_slots(&named), [(1, 0), (3, 2), (5, 4)]);

        let numeric: Vec<String> = (0..9).map(|i| i.to_string()).collect();
        assert_eq!(output_slots(&numeric), [(0, 3), (1, 4), (2, 5)]);
    }
}
