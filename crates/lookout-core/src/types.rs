use serde::{Deserialize, Serialize};

/// Face bounding box in frame-pixel space, as produced by the local detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 1.0,
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Person group as known to the remote recognition service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonGroup {
    pub id: String,
    pub name: String,
}

/// Person enrolled in a remote group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    pub name: String,
}

/// Attributes the remote service can compute for a detected face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaceAttributeKind {
    Age,
    Gender,
    HeadPose,
    Smile,
    FacialHair,
    Glasses,
    Emotion,
    Hair,
    Makeup,
    Occlusion,
    Accessories,
    Blur,
    Exposure,
    Noise,
}

impl FaceAttributeKind {
    /// Every attribute the service knows about, in request order.
    pub const ALL: [FaceAttributeKind; 14] = [
        Self::Age,
        Self::Gender,
        Self::HeadPose,
        Self::Smile,
        Self::FacialHair,
        Self::Glasses,
        Self::Emotion,
        Self::Hair,
        Self::Makeup,
        Self::Occlusion,
        Self::Accessories,
        Self::Blur,
        Self::Exposure,
        Self::Noise,
    ];

    /// Query-string name used by the remote service.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::Gender => "gender",
            Self::HeadPose => "headPose",
            Self::Smile => "smile",
            Self::FacialHair => "facialHair",
            Self::Glasses => "glasses",
            Self::Emotion => "emotion",
            Self::Hair => "hair",
            Self::Makeup => "makeup",
            Self::Occlusion => "occlusion",
            Self::Accessories => "accessories",
            Self::Blur => "blur",
            Self::Exposure => "exposure",
            Self::Noise => "noise",
        }
    }
}

/// What a remote detection call should return besides face ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectOptions {
    pub landmarks: bool,
    pub attributes: Vec<FaceAttributeKind>,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            landmarks: true,
            attributes: FaceAttributeKind::ALL.to_vec(),
        }
    }
}

/// Subset of remote face attributes the pipeline renders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceAttributes {
    pub age: Option<f32>,
    pub gender: Option<String>,
}

/// Face descriptor returned by remote detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFace {
    pub face_id: String,
    pub attributes: FaceAttributes,
}

/// One identification candidate for a face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub person_id: String,
    pub confidence: f32,
}

/// Identification result for one face id; candidates are ordered best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifyResult {
    pub face_id: String,
    pub candidates: Vec<Candidate>,
}

/// A resolved identification: who the face belongs to and in which group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentificationMatch {
    pub face_id: String,
    pub group_name: String,
    pub person_name: String,
    pub confidence: f32,
}

impl IdentificationMatch {
    /// `(group)person`, the form used in the identification message.
    pub fn label(&self) -> String {
        format!("({}){}", self.group_name, self.person_name)
    }
}

/// Remote model training state for a person group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingStatus {
    Running,
    Succeeded,
    Failed,
}

impl TrainingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}
