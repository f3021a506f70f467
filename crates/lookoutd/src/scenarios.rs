//! End-to-end runs of the pipeline and engine against fakes.

use crate::engine::spawn_engine;
use crate::enrollment::{EnrollmentSettings, EnrollmentState};
use crate::fakes::{self, FakeRecognition};
use crate::pipeline::{TickOutcome, MULTIPLE_FACES_MESSAGE};
use crate::scheduler;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_empty_stream_shows_nothing() {
    let h = fakes::harness(FakeRecognition::default(), EnrollmentSettings::default());
    h.faces.set(0);

    let scheduler = scheduler::spawn(Arc::clone(&h.pipeline), Duration::from_millis(100));
    tokio::time::sleep(Duration::from_millis(500)).await;
    scheduler.shutdown().await;

    let state = h.ctx.surface.snapshot();
    assert!(state.overlays.is_empty());
    assert!(state.message.is_empty());
    assert!(state.identification.is_empty());
    assert_eq!(h.client.calls().detect, 0);
}

#[tokio::test(start_paused = true)]
async fn test_enrollment_through_training() {
    let settings = EnrollmentSettings {
        images_needed: 3,
        capture_probability: 1.0,
        ..EnrollmentSettings::default()
    };
    let h = fakes::harness(FakeRecognition::default(), settings);
    let engine = spawn_engine(Arc::clone(&h.ctx));
    h.faces.set(1);

    h.pipeline.run_tick().await.unwrap();
    let name = engine.confirm().await.unwrap();

    for _ in 0..3 {
        assert!(matches!(
            h.pipeline.run_tick().await.unwrap(),
            TickOutcome::SingleFace { .. }
        ));
    }

    let calls = h.client.calls();
    assert_eq!(calls.created_persons, vec![name.clone()]);
    assert_eq!(calls.added_faces.len(), 3);
    assert!(matches!(
        h.ctx.enrollment.lock().await.state(),
        EnrollmentState::Uploading(summary) if summary.uploaded == 3
    ));

    // Further single-face ticks do not reopen the session.
    h.pipeline.run_tick().await.unwrap();
    assert_eq!(h.client.calls().added_faces.len(), 3);

    engine.start_training().await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    let calls = h.client.calls();
    assert_eq!(calls.start_training, 1);
    assert_eq!(calls.create_group, 1);
    assert_eq!(h.ctx.surface.snapshot().status, "Training succeeded.");
    assert_eq!(h.ctx.enrollment.lock().await.state(), &EnrollmentState::Idle);
}

#[tokio::test]
async fn test_two_faces_show_notice_without_names() {
    let client = FakeRecognition::default()
        .with_group("g-heroes", "Heroes")
        .with_person("p-ana", "Ana")
        .with_match("g-heroes", "p-ana", 0.9);
    let h = fakes::harness(client, EnrollmentSettings::default());
    h.faces.set(2);

    h.pipeline.run_tick().await.unwrap();

    let state = h.ctx.surface.snapshot();
    assert_eq!(state.identification, MULTIPLE_FACES_MESSAGE);
    assert_eq!(state.overlays.len(), 2);
    assert!(state.overlays.iter().all(|o| o.caption.is_none()));
    assert!(h.client.calls().identify.is_empty());
}

#[tokio::test]
async fn test_known_face_is_named() {
    let client = FakeRecognition::default()
        .with_group("g-heroes", "Heroes")
        .with_person("p-ana", "Ana")
        .with_match("g-heroes", "p-ana", 0.8);
    let h = fakes::harness(client, EnrollmentSettings::default());
    h.faces.set(1);

    h.pipeline.run_tick().await.unwrap();

    let state = h.ctx.surface.snapshot();
    assert!(state.identification.contains("(Heroes)Ana"), "{}", state.identification);
    assert!(state.identification.starts_with("Number of faces visible: 1."));
    let caption = state.overlays[0].caption.clone().unwrap();
    assert!(caption.header.starts_with("Ana, "));
}
