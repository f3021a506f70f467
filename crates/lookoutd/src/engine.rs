use crate::config::Config;
use crate::enrollment::{self, EnrollmentError, EnrollmentMachine, EnrollmentStatus};
use crate::scheduler::{TickCounts, TickStats};
use crate::storage::SampleStore;
use crate::surface::{Surface, SurfaceState};
use lookout_core::{DetectOptions, PersonGroupRegistry, RecognitionClient, TrainingStatus};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
    #[error("engine task exited")]
    ChannelClosed,
}

/// Runtime settings shared by the pipeline and the engine.
#[derive(Debug, Clone)]
pub struct Settings {
    pub tick_period: Duration,
    pub identify_confidence_floor: f32,
    pub training_poll_interval: Duration,
    pub detect_options: DetectOptions,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick_period: config.tick_period(),
            identify_confidence_floor: config.identify_confidence_floor,
            training_poll_interval: config.training_poll_interval,
            detect_options: DetectOptions::default(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(100),
            identify_confidence_floor: 0.5,
            training_poll_interval: Duration::from_secs(1),
            detect_options: DetectOptions::default(),
        }
    }
}

/// State shared by the scheduler's cycles and the engine's request loop.
pub struct Context {
    pub settings: Settings,
    pub client: Arc<dyn RecognitionClient>,
    pub registry: Mutex<PersonGroupRegistry>,
    pub enrollment: Mutex<EnrollmentMachine>,
    pub store: SampleStore,
    pub surface: Surface,
    pub stats: TickStats,
}

impl Context {
    pub fn new(
        settings: Settings,
        client: Arc<dyn RecognitionClient>,
        registry: PersonGroupRegistry,
        enrollment: EnrollmentMachine,
        store: SampleStore,
        surface: Surface,
    ) -> Self {
        Self {
            settings,
            client,
            registry: Mutex::new(registry),
            enrollment: Mutex::new(enrollment),
            store,
            surface,
            stats: TickStats::default(),
        }
    }
}

/// Daemon status as reported over D-Bus.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub version: &'static str,
    pub enrollment: EnrollmentStatus,
    pub ticks: TickCounts,
    pub surface: SurfaceState,
}

/// Messages sent from D-Bus handlers to the engine task.
enum EngineRequest {
    Confirm {
        reply: oneshot::Sender<Result<String, EngineError>>,
    },
    Decline {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    StartTraining {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    SetDisplaySize {
        width: f64,
        height: f64,
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<StatusReport>,
    },
}

/// Clone-safe handle to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Accept the pending enrollment offer. Returns the subject name.
    pub async fn confirm(&self) -> Result<String, EngineError> {
        self.request(|reply| EngineRequest::Confirm { reply }).await?
    }

    pub async fn decline(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Decline { reply }).await?
    }

    /// Start training. Returns once the transition is accepted; polling
    /// continues in the background.
    pub async fn start_training(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::StartTraining { reply }).await?
    }

    pub async fn set_display_size(&self, width: f64, height: f64) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::SetDisplaySize { width, height, reply })
            .await
    }

    pub async fn status(&self) -> Result<StatusReport, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }
}

/// Spawn the request loop.
pub fn spawn_engine(ctx: Arc<Context>) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    tokio::spawn(async move {
        tracing::info!("engine started");
        while let Some(req) = rx.recv().await {
            match req {
                EngineRequest::Confirm { reply } => {
                    let _ = reply.send(confirm(&ctx).await);
                }
                EngineRequest::Decline { reply } => {
                    let _ = reply.send(decline(&ctx).await);
                }
                EngineRequest::StartTraining { reply } => {
                    let _ = reply.send(start_training(&ctx).await);
                }
                EngineRequest::SetDisplaySize { width, height, reply } => {
                    ctx.surface.set_display_size(width, height);
                    tracing::debug!(width, height, "display size updated");
                    let _ = reply.send(());
                }
                EngineRequest::Status { reply } => {
                    let _ = reply.send(status(&ctx).await);
                }
            }
        }
        tracing::info!("engine exiting");
    });

    EngineHandle { tx }
}

async fn confirm(ctx: &Context) -> Result<String, EngineError> {
    let mut machine = ctx.enrollment.lock().await;
    let session = machine.confirm(&ctx.store).await?;
    let probability = machine.settings().capture_probability;
    drop(machine);

    let expected = ctx
        .settings
        .tick_period
        .mul_f64(session.images_needed as f64 / probability);
    ctx.surface.update_affordances(|a| {
        a.confirm_visible = false;
        a.decline_visible = false;
    });
    ctx.surface.show_message(format!(
        "Thanks, {}! Keep your face in view for about {} seconds while I take {} pictures.",
        session.name,
        expected.as_secs().max(1),
        session.images_needed
    ));
    Ok(session.name)
}

async fn decline(ctx: &Context) -> Result<(), EngineError> {
    ctx.enrollment.lock().await.decline()?;
    ctx.surface.update_affordances(|a| {
        a.confirm_visible = false;
        a.decline_visible = false;
    });
    ctx.surface.show_message("");
    Ok(())
}

async fn start_training(ctx: &Arc<Context>) -> Result<(), EngineError> {
    ctx.enrollment.lock().await.begin_training()?;
    ctx.surface.update_affordances(|a| a.train_busy = true);
    ctx.surface.set_status("Training...");
    tokio::spawn(train(Arc::clone(ctx)));
    Ok(())
}

/// Poll training to completion without holding the enrollment lock, then
/// restore the idle affordance whatever the outcome.
async fn train(ctx: Arc<Context>) {
    let outcome = enrollment::run_training(
        ctx.client.as_ref(),
        &ctx.registry,
        ctx.settings.training_poll_interval,
    )
    .await;

    ctx.enrollment.lock().await.finish_training();
    ctx.surface.update_affordances(|a| a.train_busy = false);
    ctx.surface.set_status(match outcome {
        TrainingStatus::Succeeded => "Training succeeded.",
        _ => "Training failed.",
    });
}

async fn status(ctx: &Context) -> StatusReport {
    StatusReport {
        version: env!("CARGO_PKG_VERSION"),
        enrollment: ctx.enrollment.lock().await.status(),
        ticks: ctx.stats.snapshot(),
        surface: ctx.surface.snapshot(),
    }
}
