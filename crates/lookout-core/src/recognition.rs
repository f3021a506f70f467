//! Remote recognition service surface.
//!
//! Detection with attributes, identification against person groups, person
//! and group management, and asynchronous model training. Implementations
//! live outside this crate; the daemon ships an HTTP client.

use crate::types::{DetectOptions, IdentifyResult, Person, PersonGroup, RemoteFace, TrainingStatus};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("service returned {status}: {message}")]
    Service { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait RecognitionClient: Send + Sync {
    /// Detect faces in an encoded still image.
    async fn detect_faces(
        &self,
        image: &[u8],
        options: &DetectOptions,
    ) -> Result<Vec<RemoteFace>, RecognitionError>;

    /// Identify previously detected faces against one person group.
    async fn identify_faces(
        &self,
        group_id: &str,
        face_ids: &[String],
    ) -> Result<Vec<IdentifyResult>, RecognitionError>;

    async fn get_person(&self, group_id: &str, person_id: &str) -> Result<Person, RecognitionError>;

    async fn list_groups(&self) -> Result<Vec<PersonGroup>, RecognitionError>;

    async fn create_group(&self, group_id: &str, name: &str) -> Result<(), RecognitionError>;

    async fn create_person(&self, group_id: &str, name: &str) -> Result<Person, RecognitionError>;

    /// Attach a face sample to a person. Returns the persisted face id.
    async fn add_person_face(
        &self,
        group_id: &str,
        person_id: &str,
        image: &[u8],
        label: &str,
    ) -> Result<String, RecognitionError>;

    async fn start_training(&self, group_id: &str) -> Result<(), RecognitionError>;

    async fn training_status(&self, group_id: &str) -> Result<TrainingStatus, RecognitionError>;
}
