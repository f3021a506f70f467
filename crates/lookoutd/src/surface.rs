//! UI surface state published by the pipeline and the enrollment workflow.
//!
//! The daemon does no drawing. A renderer polls [`Surface::snapshot`]
//! (over D-Bus) and draws overlays in display space.

use lookout_core::{FaceBox, IdentificationMatch, RemoteFace};
use parking_lot::RwLock;
use serde::Serialize;

/// Rectangle in display space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DisplayRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// Caption rendered above a face rectangle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Caption {
    pub header: String,
    pub sub_header: Option<String>,
}

impl Caption {
    /// `"{name}, {age} ({confidence}%)"` for an identified face,
    /// `"{age}, {gender}"` otherwise.
    pub fn for_face(face: &RemoteFace, identity: Option<&IdentificationMatch>) -> Option<Self> {
        let age = face.attributes.age.map(|a| a.round() as i32);
        let header = match (identity, age, face.attributes.gender.as_deref()) {
            (Some(m), Some(age), _) => format!(
                "{}, {} ({}%)",
                m.person_name,
                age,
                (m.confidence * 100.0).round() as u32
            ),
            (Some(m), None, _) => format!("{} ({}%)", m.person_name, (m.confidence * 100.0).round() as u32),
            (None, Some(age), Some(gender)) => format!("{age}, {gender}"),
            _ => return None,
        };
        Some(Self {
            header,
            sub_header: Some(format!("Face Id: {}", face.face_id)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    pub rect: DisplayRect,
    /// `Coverage: NN%`, the face height relative to the frame height.
    pub coverage: String,
    pub caption: Option<Caption>,
}

/// Visibility of the operator controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Affordances {
    pub confirm_visible: bool,
    pub decline_visible: bool,
    pub train_visible: bool,
    pub train_busy: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SurfaceState {
    pub overlays: Vec<Overlay>,
    /// Enrollment prompt and instruction line.
    pub message: String,
    /// Who is in view, or why identification is paused.
    pub identification: String,
    /// Device and workflow status line.
    pub status: String,
    pub affordances: Affordances,
    pub display_width: f64,
    pub display_height: f64,
}

/// Scale face boxes from frame-pixel space into display space.
///
/// Returns `None` when the display has not been measured yet (zero size),
/// in which case nothing should be drawn this tick.
pub fn scale_to_display(
    boxes: &[FaceBox],
    frame_size: (f32, f32),
    display_size: (f64, f64),
) -> Option<Vec<Overlay>> {
    let (display_w, display_h) = display_size;
    let (frame_w, frame_h) = frame_size;
    if display_w <= 0.0 || display_h <= 0.0 || frame_w <= 0.0 || frame_h <= 0.0 {
        return None;
    }
    let scale_x = f64::from(frame_w) / display_w;
    let scale_y = f64::from(frame_h) / display_h;

    let overlays = boxes
        .iter()
        .map(|b| Overlay {
            rect: DisplayRect {
                left: (f64::from(b.x.max(0.0)) / scale_x) as u32,
                top: (f64::from(b.y.max(0.0)) / scale_y) as u32,
                width: (f64::from(b.width) / scale_x) as u32,
                height: (f64::from(b.height) / scale_y) as u32,
            },
            coverage: format!("Coverage: {:.0}%", 100.0 * b.height / frame_h),
            caption: None,
        })
        .collect();
    Some(overlays)
}

/// Shared, lock-protected surface state.
#[derive(Debug, Default)]
pub struct Surface {
    state: RwLock<SurfaceState>,
}

impl Surface {
    pub fn new(display_width: f64, display_height: f64) -> Self {
        Self {
            state: RwLock::new(SurfaceState {
                display_width,
                display_height,
                affordances: Affordances {
                    train_visible: true,
                    ..Affordances::default()
                },
                ..SurfaceState::default()
            }),
        }
    }

    pub fn snapshot(&self) -> SurfaceState {
        self.state.read().clone()
    }

    pub fn display_size(&self) -> (f64, f64) {
        let state = self.state.read();
        (state.display_width, state.display_height)
    }

    pub fn set_display_size(&self, width: f64, height: f64) {
        let mut state = self.state.write();
        state.display_width = width.max(0.0);
        state.display_height = height.max(0.0);
    }

    pub fn show_overlays(&self, overlays: Vec<Overlay>) {
        self.state.write().overlays = overlays;
    }

    pub fn clear_overlays(&self) {
        self.state.write().overlays.clear();
    }

    pub fn show_message(&self, message: impl Into<String>) {
        self.state.write().message = message.into();
    }

    pub fn show_identification(&self, text: impl Into<String>) {
        self.state.write().identification = text.into();
    }

    pub fn set_status(&self, status: impl Into<String>) {
        let status = status.into();
        tracing::info!(status = %status, "status updated");
        self.state.write().status = status;
    }

    pub fn update_affordances(&self, update: impl FnOnce(&mut Affordances)) {
        update(&mut self.state.write().affordances);
    }
}
