use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use foscam_hw::{CameraError, ConnectionConfig, FoscamCamera, FrameGrabber};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "foscam", about = "Foscam camera daemon CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Send a calibration file to the daemon, which saves and publishes it
    SetCalibration {
        /// Calibration YAML (image_width, camera_matrix, ...)
        file: PathBuf,
    },
    /// Fetch one snapshot straight from the camera, bypassing the daemon
    Snap {
        /// Camera address
        #[arg(long)]
        ip: String,
        #[arg(long, default_value_t = 88)]
        port: u16,
        #[arg(short, long, default_value = "admin")]
        username: String,
        #[arg(short, long, default_value = "")]
        password: String,
        /// Request timeout in seconds
        #[arg(long, default_value_t = 5)]
        timeout: u64,
        /// Write the JPEG here
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Compare the frame size against this calibration file
        #[arg(long)]
        calibration: Option<PathBuf>,
    },
}

#[zbus::proxy(
    interface = "org.foscamd.Camera1",
    default_service = "org.foscamd.Camera1",
    default_path = "/org/foscamd/Camera1"
)]
trait Camera {
    #[allow(clippy::too_many_arguments)]
    async fn set_camera_info(
        &self,
        width: u32,
        height: u32,
        distortion_model: &str,
        d: &[f64],
        k: &[f64],
        r: &[f64],
        p: &[f64],
    ) -> zbus::Result<(bool, String)>;

    async fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status => {
            let proxy = connect(cli.session).await?;
            let status = proxy.status().await.context("calling Status")?;
            let value: serde_json::Value = serde_json::from_str(&status)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::SetCalibration { file } => {
            let record = foscam_core::calibration::load(&file)?;
            tracing::debug!(
                path = %file.display(),
                width = record.width,
                height = record.height,
                "loaded calibration"
            );
            let proxy = connect(cli.session).await?;
            let (success, message) = proxy
                .set_camera_info(
                    record.width,
                    record.height,
                    &record.distortion_model,
                    &record.distortion,
                    &record.camera_matrix,
                    &record.rectification,
                    &record.projection,
                )
                .await
                .context("calling SetCameraInfo")?;
            println!("{message}");
            if !success {
                bail!("daemon could not save the calibration");
            }
        }
        Commands::Snap {
            ip,
            port,
            username,
            password,
            timeout,
            output,
            calibration,
        } => {
            let config = ConnectionConfig {
                ip,
                port,
                username,
                password,
                framerate: 1.0,
            };
            println!("Fetching snapshot from {}", config.cgi_url());

            // The blocking HTTP client must stay off the async executor.
            let timeout = Duration::from_secs(timeout);
            let data = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, CameraError> {
                let mut camera = FoscamCamera::connect(&config, timeout)?;
                camera.snap_picture()
            })
            .await??;
            tracing::debug!(bytes = data.len(), "snapshot fetched");

            let decoded = image::load_from_memory_with_format(&data, image::ImageFormat::Jpeg)
                .context("camera returned an undecodable JPEG")?;
            println!(
                "{} bytes, {}x{}",
                data.len(),
                decoded.width(),
                decoded.height()
            );

            if let Some(path) = calibration {
                let record = foscam_core::calibration::load(&path)?;
                tracing::debug!(path = %path.display(), "comparing against calibration");
                if (record.width, record.height) != (decoded.width(), decoded.height()) {
                    println!(
                        "warning: calibration is for {}x{}, frame is {}x{}",
                        record.width,
                        record.height,
                        decoded.width(),
                        decoded.height()
                    );
                } else {
                    println!("calibration size matches");
                }
            }

            if let Some(path) = output {
                std::fs::write(&path, &data)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Saved to {}", path.display());
            }
        }
    }

    Ok(())
}

async fn connect(session: bool) -> Result<CameraProxy<'static>> {
    let conn = if session {
        zbus::Connection::session().await?
    } else {
        zbus::Connection::system().await?
    };
    CameraProxy::new(&conn)
        .await
        .context("foscamd is not reachable on D-Bus")
}
