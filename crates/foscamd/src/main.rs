use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use foscam_core::{Bus, CalibrationService};
use foscam_hw::{ConnectionConfig, Connector, FoscamConnector};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod bus;
mod capture;
mod config;
mod dbus_interface;
mod params;
#[cfg(test)]
mod testing;

use bus::BroadcastBus;
use capture::{CaptureHandle, LoopControl};
use config::Config;
use dbus_interface::{CameraService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("foscamd starting");

    let config = Config::from_env();
    let connection = params::load_params(&config.params_path)
        .with_context(|| format!("loading parameters from {}", config.params_path.display()))?;

    let bus = Arc::new(BroadcastBus::new());
    let control = Arc::new(LoopControl::new());

    let (calibration, capture) = start(
        &config,
        connection.clone(),
        FoscamConnector::new(config.fetch_timeout),
        bus.clone(),
        control.clone(),
    )
    .await?;

    let service = CameraService::new(&config.camera_name, calibration, control.clone());
    let conn = match serve_dbus(&config, service).await {
        Ok(conn) => conn,
        Err(e) => {
            control.request_shutdown();
            return Err(e);
        }
    };
    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "D-Bus interface registered");

    let forwarders = dbus_interface::forward_signals(conn.clone(), &bus)?;
    let watcher = tokio::spawn(params::watch_params(
        config.params_path.clone(),
        connection,
        control.clone(),
        config.param_poll_interval,
    ));

    tracing::info!("foscamd ready");

    wait_for_shutdown().await?;
    tracing::info!("foscamd shutting down");

    control.request_shutdown();
    watcher.abort();
    tokio::task::spawn_blocking(move || capture.join())
        .await
        .context("joining capture thread")??;
    for task in forwarders {
        task.abort();
    }

    Ok(())
}

/// Load the calibration and start the capture thread.
///
/// A missing or unreadable calibration file aborts startup before the
/// camera is contacted.
async fn start<C, B>(
    config: &Config,
    connection: ConnectionConfig,
    connector: C,
    bus: B,
    control: Arc<LoopControl>,
) -> Result<(CalibrationService, CaptureHandle)>
where
    C: Connector + Send + 'static,
    B: Bus + 'static,
{
    let path = config.calibration_path();
    let record = foscam_core::calibration::load(&path).with_context(|| {
        format!("can't find calibration file {}; aborting", path.display())
    })?;
    tracing::info!(path = %path.display(), "using calibration file");

    let shared = Arc::new(ArcSwap::from_pointee(record));
    let calibration = CalibrationService::new(&config.camera_name, path, shared.clone());

    let capture = capture::spawn_capture(
        connector,
        bus,
        shared,
        connection,
        config.frame_id(),
        control,
    )
    .await?;

    Ok((calibration, capture))
}

async fn serve_dbus(config: &Config, service: CameraService) -> Result<zbus::Connection> {
    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };

    let conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("registering on D-Bus")?;
    Ok(conn)
}

async fn wait_for_shutdown() -> Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
