//! Enrollment workflow: confirmation, sample capture, upload and training.
//!
//! ```text
//! Idle -> AwaitingConfirmation -> Capturing -> Uploading -> Training -> Idle
//! ```
//!
//! [`EnrollmentMachine`] holds the synchronous state. The pipeline and the
//! engine share it behind one `tokio::sync::Mutex`; the remote steps
//! ([`upload_session`], [`run_training`]) are free functions so training can
//! poll without holding that lock.

use crate::names::NamePool;
use crate::storage::{SampleLocation, SampleStore, StorageError};
use lookout_core::{PersonGroupRegistry, RecognitionClient, RecognitionError, TrainingStatus};
use rand::rngs::StdRng;
use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("no enrollment offer is pending (state: {0})")]
    NotAwaitingConfirmation(&'static str),
    #[error("an enrollment session is already open (state: {0})")]
    SessionActive(&'static str),
    #[error("no unused subject name after {0} attempts")]
    NamesExhausted(usize),
    #[error("training cannot start while {0}")]
    TrainingUnavailable(&'static str),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("recognition service: {0}")]
    Recognition(#[from] RecognitionError),
}

#[derive(Debug, Clone)]
pub struct EnrollmentSettings {
    pub images_needed: usize,
    pub capture_probability: f64,
    pub max_name_attempts: usize,
}

impl Default for EnrollmentSettings {
    fn default() -> Self {
        Self {
            images_needed: 3,
            capture_probability: 0.3,
            max_name_attempts: 24,
        }
    }
}

/// An open capture session for one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentSession {
    pub pool: NamePool,
    pub name: String,
    pub location: SampleLocation,
    pub images_needed: usize,
    pub images_captured: usize,
}

/// Result of registering a captured session with the remote service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadSummary {
    pub label: String,
    pub person_id: Option<String>,
    pub uploaded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentState {
    Idle,
    AwaitingConfirmation,
    Capturing(EnrollmentSession),
    /// Samples handed to the service; remains here until training starts.
    /// `person_id` stays empty until the upload result is recorded.
    Uploading(UploadSummary),
    Training,
}

impl EnrollmentState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingConfirmation => "awaiting-confirmation",
            Self::Capturing(_) => "capturing",
            Self::Uploading(_) => "uploading",
            Self::Training => "training",
        }
    }
}

/// Change in face visibility observed by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacePresence {
    /// First face after an empty period.
    Appeared,
    /// Faces just went away.
    Cleared,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleOutcome {
    NotCapturing,
    /// The pacing gate let this tick pass without a sample.
    Skipped,
    Stored { captured: usize, needed: usize },
    /// Last sample stored; the session is handed over for upload.
    Complete(EnrollmentSession),
}

/// Serializable view for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentStatus {
    pub state: &'static str,
    pub subject: Option<String>,
    pub images_captured: usize,
    pub images_needed: usize,
    pub upload: Option<UploadSummary>,
}

pub struct EnrollmentMachine {
    state: EnrollmentState,
    faces_present: bool,
    settings: EnrollmentSettings,
    rng: StdRng,
}

impl EnrollmentMachine {
    pub fn new(settings: EnrollmentSettings, rng: StdRng) -> Self {
        Self {
            state: EnrollmentState::Idle,
            faces_present: false,
            settings,
            rng,
        }
    }

    pub fn state(&self) -> &EnrollmentState {
        &self.state
    }

    pub fn settings(&self) -> &EnrollmentSettings {
        &self.settings
    }

    pub fn status(&self) -> EnrollmentStatus {
        let mut status = EnrollmentStatus {
            state: self.state.name(),
            subject: None,
            images_captured: 0,
            images_needed: self.settings.images_needed,
            upload: None,
        };
        match &self.state {
            EnrollmentState::Capturing(session) => {
                status.subject = Some(session.name.clone());
                status.images_captured = session.images_captured;
                status.images_needed = session.images_needed;
            }
            EnrollmentState::Uploading(summary) => {
                status.subject = Some(summary.label.clone());
                status.upload = Some(summary.clone());
            }
            _ => {}
        }
        status
    }

    /// Track face visibility. A face appearing while idle opens an
    /// enrollment offer; an empty frame withdraws an unanswered offer.
    pub fn observe_faces(&mut self, count: usize) -> FacePresence {
        match (count > 0, self.faces_present) {
            (true, false) => {
                self.faces_present = true;
                if self.state == EnrollmentState::Idle {
                    self.state = EnrollmentState::AwaitingConfirmation;
                    tracing::debug!("face appeared; enrollment offered");
                }
                FacePresence::Appeared
            }
            (false, true) => {
                self.faces_present = false;
                if self.state == EnrollmentState::AwaitingConfirmation {
                    self.state = EnrollmentState::Idle;
                }
                FacePresence::Cleared
            }
            _ => FacePresence::Unchanged,
        }
    }

    /// Accept the enrollment offer: pick a subject name with an unused
    /// storage location and open a capture session.
    pub async fn confirm(&mut self, store: &SampleStore) -> Result<EnrollmentSession, EnrollmentError> {
        match self.state {
            EnrollmentState::AwaitingConfirmation => {}
            EnrollmentState::Idle => return Err(EnrollmentError::NotAwaitingConfirmation(self.state.name())),
            _ => return Err(EnrollmentError::SessionActive(self.state.name())),
        }

        let mut walk = NamePool::candidates(&mut self.rng);
        walk.truncate(self.settings.max_name_attempts);
        let attempts = walk.len();
        for (attempt, (pool, name)) in (1..).zip(walk) {
            match store.create_location(name).await {
                Ok(location) => {
                    let session = EnrollmentSession {
                        pool,
                        name: name.to_string(),
                        location,
                        images_needed: self.settings.images_needed,
                        images_captured: 0,
                    };
                    tracing::info!(subject = name, ?pool, attempt, "enrollment confirmed");
                    self.state = EnrollmentState::Capturing(session.clone());
                    return Ok(session);
                }
                Err(StorageError::AlreadyExists(_)) => {
                    tracing::debug!(subject = name, attempt, "subject name taken, trying the next one");
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.state = EnrollmentState::Idle;
        Err(EnrollmentError::NamesExhausted(attempts))
    }

    /// Reject the enrollment offer.
    pub fn decline(&mut self) -> Result<(), EnrollmentError> {
        if self.state != EnrollmentState::AwaitingConfirmation {
            return Err(EnrollmentError::NotAwaitingConfirmation(self.state.name()));
        }
        self.state = EnrollmentState::Idle;
        tracing::info!("enrollment declined");
        Ok(())
    }

    /// Offer the current single-face photo as a sample.
    ///
    /// The count only advances after the sample is persisted, so
    /// `images_captured` never exceeds `images_needed`.
    pub async fn offer_sample(&mut self, photo: &[u8], store: &SampleStore) -> Result<SampleOutcome, EnrollmentError> {
        let EnrollmentState::Capturing(session) = &mut self.state else {
            return Ok(SampleOutcome::NotCapturing);
        };
        if !self.rng.gen_bool(self.settings.capture_probability) {
            return Ok(SampleOutcome::Skipped);
        }

        store.save_sample(&session.location, photo).await?;
        session.images_captured += 1;
        let (captured, needed) = (session.images_captured, session.images_needed);
        tracing::debug!(subject = %session.name, captured, needed, "enrollment sample stored");

        if captured < needed {
            return Ok(SampleOutcome::Stored { captured, needed });
        }

        let summary = UploadSummary {
            label: session.location.label.clone(),
            ..UploadSummary::default()
        };
        match std::mem::replace(&mut self.state, EnrollmentState::Uploading(summary)) {
            EnrollmentState::Capturing(session) => Ok(SampleOutcome::Complete(session)),
            other => {
                self.state = other;
                Ok(SampleOutcome::NotCapturing)
            }
        }
    }

    /// Record the upload result. A failed registration returns to idle.
    pub fn finish_upload(&mut self, result: &Result<UploadSummary, EnrollmentError>) {
        if !matches!(self.state, EnrollmentState::Uploading(_)) {
            return;
        }
        self.state = match result {
            Ok(summary) => EnrollmentState::Uploading(summary.clone()),
            Err(_) => EnrollmentState::Idle,
        };
    }

    /// Move to `Training`, allowed from `Idle` or after an upload has
    /// registered its person.
    pub fn begin_training(&mut self) -> Result<(), EnrollmentError> {
        match &self.state {
            EnrollmentState::Uploading(summary) if summary.person_id.is_none() => {
                Err(EnrollmentError::TrainingUnavailable("samples are uploading"))
            }
            EnrollmentState::Idle | EnrollmentState::Uploading(_) => {
                self.state = EnrollmentState::Training;
                Ok(())
            }
            _ => Err(EnrollmentError::TrainingUnavailable(self.state.name())),
        }
    }

    pub fn finish_training(&mut self) {
        if self.state == EnrollmentState::Training {
            self.state = EnrollmentState::Idle;
        }
    }
}

/// Register a completed session: create the person in the training group
/// and upload every stored sample. Individual sample failures are counted
/// and logged; they do not stop the remaining uploads.
pub async fn upload_session(
    session: &EnrollmentSession,
    registry: &Mutex<PersonGroupRegistry>,
    client: &dyn RecognitionClient,
    store: &SampleStore,
) -> Result<UploadSummary, EnrollmentError> {
    let group = registry.lock().await.ensure_training_group(client).await?;
    let label = &session.location.label;
    let person = client.create_person(&group.id, label).await?;
    tracing::info!(group = %group.name, person = %person.id, label = %label, "enrollment person created");

    let mut summary = UploadSummary {
        label: label.clone(),
        person_id: Some(person.id.clone()),
        ..UploadSummary::default()
    };

    for path in store.list_samples(&session.location).await? {
        let uploaded = match tokio::fs::read(&path).await {
            Ok(image) => client
                .add_person_face(&group.id, &person.id, &image, label)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match uploaded {
            Ok(face_id) => {
                summary.uploaded += 1;
                tracing::debug!(path = %path.display(), face_id = %face_id, "sample uploaded");
            }
            Err(error) => {
                summary.failed += 1;
                tracing::warn!(path = %path.display(), %error, "sample upload failed");
            }
        }
    }

    tracing::info!(label = %label, uploaded = summary.uploaded, failed = summary.failed, "enrollment upload finished");
    Ok(summary)
}

/// Start remote training of the training group and poll until it reaches a
/// terminal status. A failure to start or to poll ends the run as `Failed`.
pub async fn run_training(
    client: &dyn RecognitionClient,
    registry: &Mutex<PersonGroupRegistry>,
    poll_interval: Duration,
) -> TrainingStatus {
    let group = match registry.lock().await.ensure_training_group(client).await {
        Ok(group) => group,
        Err(e) => {
            tracing::warn!(error = %e, "training group unavailable");
            return TrainingStatus::Failed;
        }
    };

    if let Err(e) = client.start_training(&group.id).await {
        tracing::warn!(group = %group.name, error = %e, "training request failed");
        return TrainingStatus::Failed;
    }
    tracing::info!(group = %group.name, "training started");

    let mut polls = 0u32;
    loop {
        tokio::time::sleep(poll_interval).await;
        polls += 1;
        match client.training_status(&group.id).await {
            Ok(status) if status.is_terminal() => {
                tracing::info!(group = %group.name, ?status, polls, "training finished");
                return status;
            }
            Ok(_) => tracing::trace!(polls, "training still running"),
            Err(e) => {
                tracing::warn!(group = %group.name, error = %e, polls, "training status poll failed");
                return TrainingStatus::Failed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeRecognition;
    use lookout_core::PersonGroup;
    use rand::SeedableRng;

    fn machine(probability: f64, needed: usize) -> EnrollmentMachine {
        EnrollmentMachine::new(
            EnrollmentSettings {
                images_needed: needed,
                capture_probability: probability,
                max_name_attempts: 8,
            },
            StdRng::seed_from_u64(42),
        )
    }

    async fn capturing(m: &mut EnrollmentMachine, store: &SampleStore) -> EnrollmentSession {
        m.observe_faces(1);
        m.confirm(store).await.unwrap()
    }

    #[test]
    fn test_face_appearance_offers_and_absence_withdraws() {
        let mut m = machine(1.0, 3);
        assert_eq!(m.observe_faces(1), FacePresence::Appeared);
        assert_eq!(m.state(), &EnrollmentState::AwaitingConfirmation);
        assert_eq!(m.observe_faces(2), FacePresence::Unchanged);
        assert_eq!(m.observe_faces(0), FacePresence::Cleared);
        assert_eq!(m.state(), &EnrollmentState::Idle);
    }

    #[test]
    fn test_decline_returns_to_idle() {
        let mut m = machine(1.0, 3);
        assert!(m.decline().is_err());
        m.observe_faces(1);
        m.decline().unwrap();
        assert_eq!(m.state(), &EnrollmentState::Idle);
    }

    #[tokio::test]
    async fn test_confirm_requires_offer() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path());
        let mut m = machine(1.0, 3);
        assert!(matches!(
            m.confirm(&store).await,
            Err(EnrollmentError::NotAwaitingConfirmation("idle"))
        ));
    }

    #[tokio::test]
    async fn test_second_confirm_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path());
        let mut m = machine(1.0, 3);
        let session = capturing(&mut m, &store).await;

        assert!(matches!(
            m.confirm(&store).await,
            Err(EnrollmentError::SessionActive("capturing"))
        ));
        // The open session is untouched.
        assert_eq!(m.state(), &EnrollmentState::Capturing(session));
    }

    #[tokio::test]
    async fn test_confirm_skips_taken_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path());
        // Occupy every name but one.
        for pool in [NamePool::Heroes, NamePool::Villains] {
            for name in pool.names().iter().filter(|n| **n != "Medusa") {
                store.create_location(name).await.unwrap();
            }
        }

        let mut m = EnrollmentMachine::new(
            EnrollmentSettings {
                max_name_attempts: 500,
                ..EnrollmentSettings::default()
            },
            StdRng::seed_from_u64(1),
        );
        m.observe_faces(1);
        let session = m.confirm(&store).await.unwrap();
        assert_eq!(session.name, "Medusa");
        assert_eq!(session.pool, NamePool::Villains);
        assert_eq!(session.images_captured, 0);
        assert_eq!(session.images_needed, 3);
    }

    #[tokio::test]
    async fn test_default_attempts_reach_the_last_free_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path());
        for pool in [NamePool::Heroes, NamePool::Villains] {
            for name in pool.names().iter().filter(|n| **n != "Penelope") {
                store.create_location(name).await.unwrap();
            }
        }

        for seed in 0..8 {
            let mut m = EnrollmentMachine::new(EnrollmentSettings::default(), StdRng::seed_from_u64(seed));
            m.observe_faces(1);
            let session = m.confirm(&store).await.unwrap();
            assert_eq!(session.name, "Penelope", "seed {seed}");
            assert_eq!(session.pool, NamePool::Heroes);
        }
    }

    #[tokio::test]
    async fn test_name_exhaustion_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path());
        for pool in [NamePool::Heroes, NamePool::Villains] {
            for name in pool.names() {
                store.create_location(name).await.unwrap();
            }
        }

        let mut m = machine(1.0, 3);
        m.observe_faces(1);
        assert!(matches!(m.confirm(&store).await, Err(EnrollmentError::NamesExhausted(8))));
        assert_eq!(m.state(), &EnrollmentState::Idle);
    }

    #[tokio::test]
    async fn test_capture_count_stays_within_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path());
        let mut m = machine(1.0, 3);
        capturing(&mut m, &store).await;

        assert_eq!(
            m.offer_sample(b"1", &store).await.unwrap(),
            SampleOutcome::Stored { captured: 1, needed: 3 }
        );
        assert_eq!(
            m.offer_sample(b"2", &store).await.unwrap(),
            SampleOutcome::Stored { captured: 2, needed: 3 }
        );
        let SampleOutcome::Complete(session) = m.offer_sample(b"3", &store).await.unwrap() else {
            panic!("third sample should complete the session");
        };
        assert_eq!(session.images_captured, 3);
        assert_eq!(store.list_samples(&session.location).await.unwrap().len(), 3);

        // Completion happens once; further ticks contribute nothing.
        assert_eq!(m.offer_sample(b"4", &store).await.unwrap(), SampleOutcome::NotCapturing);
        assert_eq!(m.state().name(), "uploading");
    }

    #[tokio::test]
    async fn test_pacing_gate_spreads_samples() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path());
        let mut m = machine(0.25, 3);
        let session = capturing(&mut m, &store).await;

        let mut offers = 0;
        let mut skipped = 0;
        loop {
            offers += 1;
            match m.offer_sample(b"px", &store).await.unwrap() {
                SampleOutcome::Complete(_) => break,
                SampleOutcome::Skipped => skipped += 1,
                SampleOutcome::Stored { captured, needed } => assert!(captured < needed),
                SampleOutcome::NotCapturing => panic!("session closed early"),
            }
            assert!(offers < 10_000);
        }
        assert!(skipped > 0);
        assert_eq!(store.list_samples(&session.location).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_upload_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path());
        let mut m = machine(1.0, 3);
        capturing(&mut m, &store).await;
        for px in [b"a", b"b"] {
            m.offer_sample(px, &store).await.unwrap();
        }
        let SampleOutcome::Complete(session) = m.offer_sample(b"c", &store).await.unwrap() else {
            panic!("expected completion");
        };

        let client = FakeRecognition::default();
        client.fail_face_uploads(1);
        let registry = Mutex::new(PersonGroupRegistry::new("training", Vec::new()));

        let result = upload_session(&session, &registry, &client, &store).await;
        let summary = result.as_ref().unwrap();
        assert_eq!(summary.uploaded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.label, session.name);

        let calls = client.calls();
        assert_eq!(calls.create_group, 1);
        assert_eq!(calls.created_persons, vec![session.name.clone()]);
        assert_eq!(calls.added_faces.len(), 3);
        assert!(calls.added_faces.iter().all(|(_, label)| *label == session.name));

        m.finish_upload(&result);
        assert_eq!(m.state(), &EnrollmentState::Uploading(summary.clone()));
    }

    #[tokio::test]
    async fn test_failed_person_creation_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path());
        let mut m = machine(1.0, 1);
        capturing(&mut m, &store).await;
        let SampleOutcome::Complete(session) = m.offer_sample(b"a", &store).await.unwrap() else {
            panic!("expected completion");
        };

        let client = FakeRecognition::default();
        client.fail_person_creation();
        let registry = Mutex::new(PersonGroupRegistry::new(
            "training",
            vec![PersonGroup { id: "t".into(), name: "training".into() }],
        ));

        let result = upload_session(&session, &registry, &client, &store).await;
        assert!(matches!(result, Err(EnrollmentError::Recognition(_))));
        m.finish_upload(&result);
        assert_eq!(m.state(), &EnrollmentState::Idle);
    }

    #[test]
    fn test_training_allowed_from_idle_and_uploading_only() {
        let mut m = machine(1.0, 3);
        m.begin_training().unwrap();
        assert!(matches!(m.begin_training(), Err(EnrollmentError::TrainingUnavailable("training"))));
        m.finish_training();
        assert_eq!(m.state(), &EnrollmentState::Idle);

        m.observe_faces(1);
        assert!(m.begin_training().is_err());
    }

    #[tokio::test]
    async fn test_training_waits_for_upload_result() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path());
        let mut m = machine(1.0, 1);
        capturing(&mut m, &store).await;
        let SampleOutcome::Complete(_) = m.offer_sample(b"a", &store).await.unwrap() else {
            panic!("expected completion");
        };

        assert!(matches!(
            m.begin_training(),
            Err(EnrollmentError::TrainingUnavailable("samples are uploading"))
        ));
        m.finish_upload(&Ok(UploadSummary {
            label: "Athena".into(),
            person_id: Some("person-1".into()),
            uploaded: 1,
            failed: 0,
        }));
        m.begin_training().unwrap();
        assert_eq!(m.state(), &EnrollmentState::Training);
    }

    #[tokio::test(start_paused = true)]
    async fn test_training_polls_until_terminal() {
        let client = FakeRecognition::default();
        client.script_training([
            Ok(TrainingStatus::Running),
            Ok(TrainingStatus::Running),
            Ok(TrainingStatus::Succeeded),
            Ok(TrainingStatus::Running),
        ]);
        let registry = Mutex::new(PersonGroupRegistry::new("training", Vec::new()));

        let started = tokio::time::Instant::now();
        let status = run_training(&client, &registry, Duration::from_secs(1)).await;

        assert_eq!(status, TrainingStatus::Succeeded);
        let calls = client.calls();
        assert_eq!(calls.start_training, 1);
        assert_eq!(calls.training_polls, 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_training_stops_after_failed_status() {
        let client = FakeRecognition::default();
        client.script_training([Ok(TrainingStatus::Failed), Ok(TrainingStatus::Succeeded)]);
        let registry = Mutex::new(PersonGroupRegistry::new("training", Vec::new()));

        let status = run_training(&client, &registry, Duration::from_secs(1)).await;
        assert_eq!(status, TrainingStatus::Failed);
        assert_eq!(client.calls().training_polls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_training_poll_error_reports_failure() {
        let client = FakeRecognition::default();
        client.script_training([Ok(TrainingStatus::Running), Err(503)]);
        let registry = Mutex::new(PersonGroupRegistry::new("training", Vec::new()));

        let status = run_training(&client, &registry, Duration::from_secs(1)).await;
        assert_eq!(status, TrainingStatus::Failed);
        assert_eq!(client.calls().training_polls, 2);
    }
}
