//! Test doubles for the capture device, the local detector and the
//! recognition service, plus a harness wiring them into a [`Pipeline`].

use crate::engine::{Context, Settings};
use crate::enrollment::{EnrollmentMachine, EnrollmentSettings};
use crate::pipeline::Pipeline;
use crate::storage::SampleStore;
use crate::surface::Surface;
use async_trait::async_trait;
use lookout_core::{
    Candidate, DetectOptions, DetectorError, FaceAttributes, FaceBox, Frame, IdentifyResult,
    LocalDetector, Person, PersonGroup, PersonGroupRegistry, PixelFormat, RecognitionClient,
    RecognitionError, RemoteFace, TrainingStatus,
};
use lookout_hw::{CameraError, CaptureSource};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

pub const TRAINING_GROUP: &str = "lookout-training";

const FRAME_WIDTH: u32 = 64;
const FRAME_HEIGHT: u32 = 48;

pub struct FakeCapture {
    format: Mutex<PixelFormat>,
    streaming: AtomicBool,
    disconnected: AtomicBool,
    photos: AtomicUsize,
    releases: AtomicUsize,
}

impl FakeCapture {
    pub fn new() -> Self {
        Self {
            format: Mutex::new(PixelFormat::Grey),
            streaming: AtomicBool::new(true),
            disconnected: AtomicBool::new(false),
            photos: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    pub fn set_format(&self, format: PixelFormat) {
        *self.format.lock() = format;
    }

    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    pub fn photos_taken(&self) -> usize {
        self.photos.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureSource for FakeCapture {
    async fn preview_frame(&self) -> Result<Frame, CameraError> {
        if !self.is_streaming() {
            return Err(CameraError::Released);
        }
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(CameraError::Disconnected("unplugged".into()));
        }
        let data = vec![0u8; (FRAME_WIDTH * FRAME_HEIGHT) as usize];
        Ok(Frame::new(data, FRAME_WIDTH, FRAME_HEIGHT, *self.format.lock()))
    }

    async fn capture_photo(&self) -> Result<Vec<u8>, CameraError> {
        let n = self.photos.fetch_add(1, Ordering::SeqCst);
        Ok(format!("photo-{n}").into_bytes())
    }

    fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    fn release(&self) {
        self.streaming.store(false, Ordering::SeqCst);
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Shared knob controlling how many faces the detector reports. Also
/// remembers which thread the detector last ran on.
#[derive(Clone, Default)]
pub struct FaceScript {
    faces: Arc<AtomicUsize>,
    last_thread: Arc<Mutex<Option<ThreadId>>>,
}

impl FaceScript {
    pub fn set(&self, faces: usize) {
        self.faces.store(faces, Ordering::SeqCst);
    }

    pub fn last_thread(&self) -> Option<ThreadId> {
        *self.last_thread.lock()
    }
}

pub struct ScriptedDetector {
    script: FaceScript,
}

impl LocalDetector for ScriptedDetector {
    fn supports_format(&self, format: PixelFormat) -> bool {
        format != PixelFormat::Mjpeg
    }

    fn detect_boxes(&mut self, _frame: &Frame) -> Result<Vec<FaceBox>, DetectorError> {
        *self.script.last_thread.lock() = Some(std::thread::current().id());
        let n = self.script.faces.load(Ordering::SeqCst);
        Ok((0..n)
            .map(|i| FaceBox::new(4.0 + 20.0 * i as f32, 8.0, 16.0, 24.0))
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Calls {
    pub detect: usize,
    /// Group ids passed to identify, in call order.
    pub identify: Vec<String>,
    pub get_person: usize,
    pub create_group: usize,
    pub created_persons: Vec<String>,
    /// `(person_id, label)` per uploaded face.
    pub added_faces: Vec<(String, String)>,
    pub start_training: usize,
    pub training_polls: usize,
}

/// Recording recognition service with canned answers.
#[derive(Default)]
pub struct FakeRecognition {
    calls: Mutex<Calls>,
    groups: Mutex<Vec<PersonGroup>>,
    people: Mutex<HashMap<String, String>>,
    matches: Mutex<HashMap<String, Vec<Candidate>>>,
    training: Mutex<VecDeque<Result<TrainingStatus, u16>>>,
    detect_delay: Option<Duration>,
    upload_delay: Option<Duration>,
    fail_detection: AtomicBool,
    fail_person_creation: AtomicBool,
    failing_uploads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn service_error(status: u16) -> RecognitionError {
    RecognitionError::Service {
        status,
        message: "scripted failure".into(),
    }
}

impl FakeRecognition {
    pub fn with_group(self, id: &str, name: &str) -> Self {
        self.groups.lock().push(PersonGroup {
            id: id.into(),
            name: name.into(),
        });
        self
    }

    pub fn with_person(self, id: &str, name: &str) -> Self {
        self.people.lock().insert(id.into(), name.into());
        self
    }

    /// Every face identified against `group_id` gets this candidate.
    pub fn with_match(self, group_id: &str, person_id: &str, confidence: f32) -> Self {
        self.matches
            .lock()
            .entry(group_id.into())
            .or_default()
            .push(Candidate {
                person_id: person_id.into(),
                confidence,
            });
        self
    }

    pub fn with_detect_delay(mut self, delay: Duration) -> Self {
        self.detect_delay = Some(delay);
        self
    }

    /// Each face upload takes this long.
    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = Some(delay);
        self
    }

    pub fn fail_detection(&self, fail: bool) {
        self.fail_detection.store(fail, Ordering::SeqCst);
    }

    pub fn fail_person_creation(&self) {
        self.fail_person_creation.store(true, Ordering::SeqCst);
    }

    /// Fail the next `n` face uploads.
    pub fn fail_face_uploads(&self, n: usize) {
        self.failing_uploads.store(n, Ordering::SeqCst);
    }

    /// Statuses returned by successive polls; `Err` carries an HTTP status.
    /// Once exhausted, polls report `Succeeded`.
    pub fn script_training(&self, script: impl IntoIterator<Item = Result<TrainingStatus, u16>>) {
        self.training.lock().extend(script);
    }

    pub fn calls(&self) -> Calls {
        self.calls.lock().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecognitionClient for FakeRecognition {
    async fn detect_faces(&self, _image: &[u8], _options: &DetectOptions) -> Result<Vec<RemoteFace>, RecognitionError> {
        let n = {
            let mut calls = self.calls.lock();
            calls.detect += 1;
            calls.detect
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.detect_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_detection.load(Ordering::SeqCst) {
            return Err(RecognitionError::Transport("connection reset".into()));
        }
        Ok(vec![RemoteFace {
            face_id: format!("face-{n}"),
            attributes: FaceAttributes {
                age: Some(30.0),
                gender: Some("female".into()),
            },
        }])
    }

    async fn identify_faces(&self, group_id: &str, face_ids: &[String]) -> Result<Vec<IdentifyResult>, RecognitionError> {
        self.calls.lock().identify.push(group_id.to_string());
        let candidates = self.matches.lock().get(group_id).cloned().unwrap_or_default();
        Ok(face_ids
            .iter()
            .map(|id| IdentifyResult {
                face_id: id.clone(),
                candidates: candidates.clone(),
            })
            .collect())
    }

    async fn get_person(&self, _group_id: &str, person_id: &str) -> Result<Person, RecognitionError> {
        self.calls.lock().get_person += 1;
        let name = self.people.lock().get(person_id).cloned();
        name.map(|name| Person {
            id: person_id.to_string(),
            name,
        })
        .ok_or_else(|| service_error(404))
    }

    async fn list_groups(&self) -> Result<Vec<PersonGroup>, RecognitionError> {
        Ok(self.groups.lock().clone())
    }

    async fn create_group(&self, group_id: &str, name: &str) -> Result<(), RecognitionError> {
        self.calls.lock().create_group += 1;
        self.groups.lock().push(PersonGroup {
            id: group_id.into(),
            name: name.into(),
        });
        Ok(())
    }

    async fn create_person(&self, _group_id: &str, name: &str) -> Result<Person, RecognitionError> {
        if self.fail_person_creation.load(Ordering::SeqCst) {
            return Err(service_error(500));
        }
        let id = {
            let mut calls = self.calls.lock();
            calls.created_persons.push(name.to_string());
            format!("person-{}", calls.created_persons.len())
        };
        self.people.lock().insert(id.clone(), name.to_string());
        Ok(Person {
            id,
            name: name.to_string(),
        })
    }

    async fn add_person_face(
        &self,
        _group_id: &str,
        person_id: &str,
        _image: &[u8],
        label: &str,
    ) -> Result<String, RecognitionError> {
        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }
        let mut calls = self.calls.lock();
        calls.added_faces.push((person_id.to_string(), label.to_string()));
        let failing = self.failing_uploads.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_uploads.store(failing - 1, Ordering::SeqCst);
            return Err(service_error(400));
        }
        Ok(format!("persisted-{}", calls.added_faces.len()))
    }

    async fn start_training(&self, _group_id: &str) -> Result<(), RecognitionError> {
        self.calls.lock().start_training += 1;
        Ok(())
    }

    async fn training_status(&self, _group_id: &str) -> Result<TrainingStatus, RecognitionError> {
        self.calls.lock().training_polls += 1;
        match self.training.lock().pop_front() {
            Some(Ok(status)) => Ok(status),
            Some(Err(code)) => Err(service_error(code)),
            None => Ok(TrainingStatus::Succeeded),
        }
    }
}

pub struct Harness {
    pub ctx: Arc<Context>,
    pub pipeline: Arc<Pipeline>,
    pub capture: Arc<FakeCapture>,
    pub client: Arc<FakeRecognition>,
    pub faces: FaceScript,
    dir: tempfile::TempDir,
}

impl Harness {
    pub fn store_root(&self) -> &Path {
        self.dir.path()
    }
}

/// Wire fakes into a context and pipeline. The registry is seeded from the
/// client's groups; the display matches the frame size.
pub fn harness(client: FakeRecognition, enrollment: EnrollmentSettings) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let groups = client.groups.lock().clone();
    let client = Arc::new(client);
    let capture = Arc::new(FakeCapture::new());
    let faces = FaceScript::default();

    let ctx = Arc::new(Context::new(
        Settings::default(),
        Arc::clone(&client) as Arc<dyn RecognitionClient>,
        PersonGroupRegistry::new(TRAINING_GROUP, groups),
        EnrollmentMachine::new(enrollment, StdRng::seed_from_u64(7)),
        SampleStore::new(dir.path()),
        Surface::new(f64::from(FRAME_WIDTH), f64::from(FRAME_HEIGHT)),
    ));
    let detector = ScriptedDetector { script: faces.clone() };
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&ctx),
        Arc::clone(&capture) as Arc<dyn CaptureSource>,
        Box::new(detector),
    ));

    Harness {
        ctx,
        pipeline,
        capture,
        client,
        faces,
        dir,
    }
}
