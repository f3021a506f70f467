use anyhow::Result;
use lookout_core::{OnnxFaceDetector, PersonGroupRegistry, RecognitionClient};
use lookout_hw::{CaptureSource, V4lCapture};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod enrollment;
mod face_api;
mod names;
mod pipeline;
mod scheduler;
mod storage;
mod surface;

#[cfg(test)]
mod fakes;
#[cfg(test)]
mod scenarios;

use config::Config;
use engine::{Context, Settings};
use enrollment::{EnrollmentMachine, EnrollmentSettings};
use pipeline::Pipeline;
use scheduler::SchedulerHandle;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("lookoutd starting");

    let config = Config::load()?;
    tracing::info!(
        device = %config.camera_device,
        fps = config.frames_per_second,
        endpoint = %config.face_api_endpoint,
        "configuration loaded"
    );
    if config.face_api_key.is_empty() {
        tracing::warn!("LOOKOUT_FACE_API_KEY is not set; recognition calls will be rejected");
    }

    let client: Arc<dyn RecognitionClient> = Arc::new(face_api::FaceApiClient::new(
        &config.face_api_endpoint,
        &config.face_api_key,
    )?);
    let registry = PersonGroupRegistry::load(client.as_ref(), config.training_group_name.as_str()).await;

    let machine = EnrollmentMachine::new(
        EnrollmentSettings {
            images_needed: config.samples_per_enrollment,
            capture_probability: config.capture_probability,
            max_name_attempts: config.max_name_attempts,
        },
        StdRng::from_entropy(),
    );
    let ctx = Arc::new(Context::new(
        Settings::from_config(&config),
        client,
        registry,
        machine,
        storage::SampleStore::new(&config.samples_dir),
        surface::Surface::new(config.display_width, config.display_height),
    ));

    let scheduler = match start_pipeline(&config, &ctx) {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::error!(error = %e, "capture pipeline unavailable");
            ctx.surface
                .set_status(format!("Unable to initialize camera: {e}"));
            None
        }
    };

    let engine = engine::spawn_engine(Arc::clone(&ctx));
    let connection = zbus::connection::Builder::session()?
        .name(dbus_interface::BUS_NAME)?
        .serve_at(
            dbus_interface::OBJECT_PATH,
            dbus_interface::LookoutService::new(engine),
        )?
        .build()
        .await?;

    tracing::info!(bus = dbus_interface::BUS_NAME, "lookoutd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("lookoutd shutting down");

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    drop(connection);

    Ok(())
}

/// Open the capture device and detector, then start the scheduler.
fn start_pipeline(config: &Config, ctx: &Arc<Context>) -> Result<SchedulerHandle> {
    let capture = V4lCapture::initialize(&config.camera_device, config.max_preview_height)?;
    let detector = OnnxFaceDetector::load(&config.model_path.to_string_lossy())?;
    tracing::info!(path = %config.model_path.display(), "face detector loaded");
    ctx.surface
        .set_status("Camera found. Face detection initiated.");

    let capture: Arc<dyn CaptureSource> = Arc::new(capture);
    let pipeline = Arc::new(Pipeline::new(Arc::clone(ctx), capture, Box::new(detector)));
    Ok(scheduler::spawn(pipeline, config.tick_period()))
}
