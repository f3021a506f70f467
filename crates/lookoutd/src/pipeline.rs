//! Per-tick detection and identification.
//!
//! Each tick grabs one preview frame, runs local face-box detection and
//! branches on the face count. Only the single-face branch talks to the
//! recognition service.

use crate::enrollment::{self, EnrollmentError, EnrollmentState, FacePresence, SampleOutcome};
use crate::engine::Context;
use crate::surface::{scale_to_display, Caption};
use lookout_core::{
    DetectorError, FaceBox, Frame, IdentificationMatch, LocalDetector, RecognitionError, RemoteFace,
};
use lookout_hw::{CameraError, CaptureSource};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

pub const ENROLL_PROMPT: &str =
    "Will you help me? If so, make sure I can see your face and choose \"Yes\".";
pub const MULTIPLE_FACES_MESSAGE: &str =
    "Multiple faces are visible. Identification needs exactly one face in view.";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("capture: {0}")]
    Capture(#[from] CameraError),
    #[error("detection: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognition: {0}")]
    Recognition(#[from] RecognitionError),
    #[error("enrollment: {0}")]
    Enrollment(#[from] EnrollmentError),
    #[error("detection task failed: {0}")]
    DetectionTask(String),
}

impl PipelineError {
    /// Device faults stop the scheduler; everything else only aborts the tick.
    pub fn is_device_fault(&self) -> bool {
        matches!(self, Self::Capture(e) if e.is_fatal())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Local detection cannot read this frame's pixel format.
    UnsupportedFormat,
    NoFaces,
    SingleFace { identified: usize },
    MultipleFaces(usize),
}

pub struct Pipeline {
    ctx: Arc<Context>,
    capture: Arc<dyn CaptureSource>,
    detector: Arc<Mutex<Box<dyn LocalDetector>>>,
}

impl Pipeline {
    pub fn new(ctx: Arc<Context>, capture: Arc<dyn CaptureSource>, detector: Box<dyn LocalDetector>) -> Self {
        Self {
            ctx,
            capture,
            detector: Arc::new(Mutex::new(detector)),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn capture(&self) -> &Arc<dyn CaptureSource> {
        &self.capture
    }

    /// Run one detection/identification cycle.
    pub async fn run_tick(&self) -> Result<TickOutcome, PipelineError> {
        let frame = self.capture.preview_frame().await?;
        let frame_size = frame.size();

        let Some(boxes) = self.detect_boxes(frame).await? else {
            return Ok(TickOutcome::UnsupportedFormat);
        };

        let (presence, awaiting) = {
            let mut machine = self.ctx.enrollment.lock().await;
            let presence = machine.observe_faces(boxes.len());
            (presence, *machine.state() == EnrollmentState::AwaitingConfirmation)
        };

        match boxes.len() {
            0 => {
                self.clear();
                Ok(TickOutcome::NoFaces)
            }
            1 => {
                if presence == FacePresence::Appeared && awaiting {
                    self.ctx.surface.show_message(ENROLL_PROMPT);
                }
                self.ctx.surface.update_affordances(|a| {
                    a.confirm_visible = awaiting;
                    a.decline_visible = awaiting;
                    a.train_visible = false;
                });
                let identified = self.single_face(&boxes, frame_size).await?;
                Ok(TickOutcome::SingleFace { identified })
            }
            n => {
                self.ctx.surface.show_identification(MULTIPLE_FACES_MESSAGE);
                self.ctx.surface.update_affordances(|a| {
                    a.confirm_visible = false;
                    a.decline_visible = false;
                });
                self.publish_overlays(&boxes, frame_size, None);
                Ok(TickOutcome::MultipleFaces(n))
            }
        }
    }

    /// Local detection on the blocking pool; `None` when the detector cannot
    /// read the frame's pixel format.
    async fn detect_boxes(&self, frame: Frame) -> Result<Option<Vec<FaceBox>>, PipelineError> {
        let detector = Arc::clone(&self.detector);
        let boxes = tokio::task::spawn_blocking(move || {
            let mut detector = detector.lock();
            if !detector.supports_format(frame.format) {
                tracing::debug!(format = ?frame.format, "frame format not supported by detector; tick skipped");
                return Ok(None);
            }
            detector.detect_boxes(&frame).map(Some)
        })
        .await
        .map_err(|e| PipelineError::DetectionTask(e.to_string()))??;
        Ok(boxes)
    }

    fn clear(&self) {
        let surface = &self.ctx.surface;
        surface.clear_overlays();
        surface.show_message("");
        surface.show_identification("");
        surface.update_affordances(|a| {
            a.confirm_visible = false;
            a.decline_visible = false;
            a.train_visible = true;
        });
    }

    async fn single_face(&self, boxes: &[FaceBox], frame_size: (f32, f32)) -> Result<usize, PipelineError> {
        let photo = self.capture.capture_photo().await?;
        let faces = self
            .ctx
            .client
            .detect_faces(&photo, &self.ctx.settings.detect_options)
            .await?;

        self.collect_sample(&photo).await?;

        let matches = self.identify(&faces).await?;
        self.ctx
            .surface
            .show_identification(identification_message(faces.len(), &matches));

        let caption = faces.first().and_then(|face| {
            let identity = matches.iter().find(|m| m.face_id == face.face_id);
            Caption::for_face(face, identity)
        });
        self.publish_overlays(boxes, frame_size, caption);
        Ok(matches.len())
    }

    /// Hand the photo to an open enrollment session and, once the session
    /// is complete, register it with the service. The enrollment lock is
    /// released while uploading; the machine stays in `Uploading` meanwhile.
    async fn collect_sample(&self, photo: &[u8]) -> Result<(), EnrollmentError> {
        let ctx = &self.ctx;
        let outcome = ctx.enrollment.lock().await.offer_sample(photo, &ctx.store).await?;
        let session = match outcome {
            SampleOutcome::Stored { captured, needed } => {
                ctx.surface.set_status(format!("Captured picture {captured} of {needed}."));
                return Ok(());
            }
            SampleOutcome::Complete(session) => session,
            SampleOutcome::Skipped | SampleOutcome::NotCapturing => return Ok(()),
        };

        ctx.surface.show_message("");
        ctx.surface
            .set_status(format!("Uploading pictures of {}...", session.name));
        let result =
            enrollment::upload_session(&session, &ctx.registry, ctx.client.as_ref(), &ctx.store).await;
        match &result {
            Ok(summary) => ctx.surface.set_status(format!(
                "Uploaded {} of {} pictures of {}. Choose \"Train\" when ready.",
                summary.uploaded,
                summary.uploaded + summary.failed,
                summary.label
            )),
            Err(e) => {
                tracing::warn!(subject = %session.name, error = %e, "enrollment registration failed");
                ctx.surface
                    .set_status(format!("Could not register {}: {e}", session.name));
            }
        }
        ctx.enrollment.lock().await.finish_upload(&result);
        Ok(())
    }

    /// Identify remote faces against every non-training group.
    async fn identify(&self, faces: &[RemoteFace]) -> Result<Vec<IdentificationMatch>, RecognitionError> {
        if faces.is_empty() {
            return Ok(Vec::new());
        }
        let face_ids: Vec<String> = faces.iter().map(|f| f.face_id.clone()).collect();
        let groups = self.ctx.registry.lock().await.identification_groups();
        let floor = self.ctx.settings.identify_confidence_floor;
        let client = &self.ctx.client;

        let mut matches = Vec::new();
        for group in &groups {
            for result in client.identify_faces(&group.id, &face_ids).await? {
                let best = result
                    .candidates
                    .iter()
                    .filter(|c| c.confidence >= floor)
                    .max_by(|a, b| a.confidence.total_cmp(&b.confidence));
                let Some(best) = best else { continue };

                let person = client.get_person(&group.id, &best.person_id).await?;
                matches.push(IdentificationMatch {
                    face_id: result.face_id,
                    group_name: group.name.clone(),
                    person_name: person.name,
                    confidence: best.confidence,
                });
            }
        }
        tracing::debug!(groups = groups.len(), matched = matches.len(), "identification complete");
        Ok(matches)
    }

    /// Scale and publish overlays unless the device stopped streaming or the
    /// display has not been measured.
    fn publish_overlays(&self, boxes: &[FaceBox], frame_size: (f32, f32), caption: Option<Caption>) {
        let surface = &self.ctx.surface;
        if !self.capture.is_streaming() {
            surface.clear_overlays();
            return;
        }
        match scale_to_display(boxes, frame_size, surface.display_size()) {
            Some(mut overlays) => {
                if let Some(first) = overlays.first_mut() {
                    first.caption = caption;
                }
                surface.show_overlays(overlays);
            }
            None => {
                tracing::trace!("display size unknown; overlays skipped");
                surface.clear_overlays();
            }
        }
    }
}

pub fn identification_message(visible: usize, matches: &[IdentificationMatch]) -> String {
    let recognized: Vec<String> = matches.iter().map(IdentificationMatch::label).collect();
    format!(
        "Number of faces visible: {visible}. Recognizing the following: {}",
        recognized.join(", ")
    )
}
