//! lookout-core — Frames, local face-box detection and the remote
//! recognition surface shared by the Lookout daemon and tools.
//!
//! Local detection runs an SCRFD-style ONNX model for face geometry only;
//! attribution and identification are delegated to a remote service behind
//! [`RecognitionClient`].

pub mod detector;
pub mod frame;
pub mod recognition;
pub mod registry;
pub mod types;

pub use detector::{DetectorError, LocalDetector, OnnxFaceDetector};
pub use frame::{Frame, FrameError, PixelFormat};
pub use recognition::{RecognitionClient, RecognitionError};
pub use registry::PersonGroupRegistry;
pub use types::{
    Candidate, DetectOptions, FaceAttributeKind, FaceAttributes, FaceBox, IdentificationMatch,
    IdentifyResult, Person, PersonGroup, RemoteFace, TrainingStatus,
};
