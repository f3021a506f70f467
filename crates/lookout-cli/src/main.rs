use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lookout_hw::Camera;

#[zbus::proxy(
    interface = "org.lookout.Lookout1",
    default_service = "org.lookout.Lookout1",
    default_path = "/org/lookout/Lookout1"
)]
trait Lookout {
    fn confirm(&self) -> zbus::Result<String>;
    fn decline(&self) -> zbus::Result<bool>;
    fn train(&self) -> zbus::Result<bool>;
    fn set_display_size(&self, width: f64, height: f64) -> zbus::Result<()>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "lookout", about = "Lookout face identification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept the pending enrollment offer
    Confirm,
    /// Reject the pending enrollment offer
    Decline,
    /// Train the enrollment group with the uploaded samples
    Train,
    /// Show daemon status
    Status,
    /// Report the renderer's display size
    Display {
        width: f64,
        height: f64,
    },
    /// List V4L2 capture devices (does not need the daemon)
    Devices,
}

async fn proxy() -> Result<LookoutProxy<'static>> {
    let connection = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    LookoutProxy::new(&connection)
        .await
        .context("lookoutd is not reachable on the session bus")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Confirm => {
            let name = proxy().await?.confirm().await?;
            println!("Enrolling as {name}. Keep your face in view.");
        }
        Commands::Decline => {
            proxy().await?.decline().await?;
            println!("Enrollment declined");
        }
        Commands::Train => {
            proxy().await?.train().await?;
            println!("Training started; run `lookout status` to follow it");
        }
        Commands::Status => {
            let raw = proxy().await?.status().await?;
            let status: serde_json::Value = serde_json::from_str(&raw).context("decoding status")?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Display { width, height } => {
            anyhow::ensure!(width > 0.0 && height > 0.0, "display size must be positive");
            proxy().await?.set_display_size(width, height).await?;
            tracing::debug!(width, height, "display size sent");
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}\t{}\t{} ({})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}
