use crate::engine::{EngineError, EngineHandle};
use crate::enrollment::EnrollmentError;
use zbus::interface;

pub const BUS_NAME: &str = "org.lookout.Lookout1";
pub const OBJECT_PATH: &str = "/org/lookout/Lookout1";

/// D-Bus interface for the Lookout daemon.
///
/// Bus name: org.lookout.Lookout1
/// Object path: /org/lookout/Lookout1
pub struct LookoutService {
    engine: EngineHandle,
}

impl LookoutService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

fn to_fdo(e: EngineError) -> zbus::fdo::Error {
    match e {
        EngineError::Enrollment(
            e @ (EnrollmentError::NotAwaitingConfirmation(_)
            | EnrollmentError::SessionActive(_)
            | EnrollmentError::TrainingUnavailable(_)),
        ) => zbus::fdo::Error::AccessDenied(e.to_string()),
        e => zbus::fdo::Error::Failed(e.to_string()),
    }
}

#[interface(name = "org.lookout.Lookout1")]
impl LookoutService {
    /// Accept the pending enrollment offer. Returns the subject name.
    async fn confirm(&self) -> zbus::fdo::Result<String> {
        tracing::info!("confirm requested");
        self.engine.confirm().await.map_err(to_fdo)
    }

    /// Reject the pending enrollment offer.
    async fn decline(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("decline requested");
        self.engine.decline().await.map_err(to_fdo)?;
        Ok(true)
    }

    /// Start training the enrollment group; completion shows in `Status`.
    async fn train(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("training requested");
        self.engine.start_training().await.map_err(to_fdo)?;
        Ok(true)
    }

    /// Report the renderer's display size used to scale overlays.
    async fn set_display_size(&self, width: f64, height: f64) -> zbus::fdo::Result<()> {
        self.engine.set_display_size(width, height).await.map_err(to_fdo)
    }

    /// Return daemon status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let report = self.engine.status().await.map_err(to_fdo)?;
        serde_json::to_string(&report).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }
}
