use crate::bus::BroadcastBus;
use crate::capture::LoopControl;
use chrono::{DateTime, Utc};
use foscam_core::{
    CalibrationError, CalibrationRecord, CalibrationService, SetCalibrationResponse,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use zbus::interface;
use zbus::object_server::SignalEmitter;

/// Well-known bus name of the daemon.
pub const BUS_NAME: &str = "org.foscamd.Camera1";
/// Object path the camera interface is served at.
pub const OBJECT_PATH: &str = "/org/foscamd/Camera1";

/// D-Bus interface for the camera daemon.
///
/// Bus name: org.foscamd.Camera1
/// Object path: /org/foscamd/Camera1
pub struct CameraService {
    camera_name: String,
    calibration: CalibrationService,
    control: Arc<LoopControl>,
}

impl CameraService {
    pub fn new(
        camera_name: &str,
        calibration: CalibrationService,
        control: Arc<LoopControl>,
    ) -> Self {
        Self {
            camera_name: camera_name.to_string(),
            calibration,
            control,
        }
    }

    async fn apply_camera_info(
        &self,
        record: Result<CalibrationRecord, CalibrationError>,
    ) -> SetCalibrationResponse {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "rejecting malformed camera info");
                return self.calibration.failure(&e);
            }
        };

        // File IO stays off the async executor.
        let service = self.calibration.clone();
        match tokio::task::spawn_blocking(move || service.set_calibration(record)).await {
            Ok(response) => response,
            Err(e) => self.calibration.failure(&e),
        }
    }

    fn status_json(&self) -> serde_json::Value {
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "camera": self.camera_name,
            "calibration_file": self.calibration.path().display().to_string(),
            "state": self.control.state().as_str(),
            "frames_published": self.control.frames_published(),
            "fetch_failures": self.control.fetch_failures(),
        })
    }
}

#[interface(name = "org.foscamd.Camera1")]
impl CameraService {
    /// Save a new calibration to the camera's calibration file and start
    /// publishing it.
    #[allow(clippy::too_many_arguments)]
    #[zbus(out_args("success", "status_message"))]
    async fn set_camera_info(
        &self,
        width: u32,
        height: u32,
        distortion_model: String,
        d: Vec<f64>,
        k: Vec<f64>,
        r: Vec<f64>,
        p: Vec<f64>,
    ) -> zbus::fdo::Result<(bool, String)> {
        tracing::info!(width, height, model = %distortion_model, "set_camera_info requested");
        let record = CalibrationRecord::from_parts(width, height, distortion_model, d, &k, &r, &p);
        let response = self.apply_camera_info(record).await;
        Ok((response.success, response.message))
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(self.status_json().to_string())
    }

    /// A compressed frame was captured.
    #[zbus(signal)]
    pub async fn image(
        emitter: &SignalEmitter<'_>,
        stamp_ns: i64,
        frame_id: &str,
        format: &str,
        data: &[u8],
    ) -> zbus::Result<()>;

    /// Calibration matching the frame with the same stamp.
    #[allow(clippy::too_many_arguments)]
    #[zbus(signal)]
    pub async fn camera_info(
        emitter: &SignalEmitter<'_>,
        stamp_ns: i64,
        frame_id: &str,
        width: u32,
        height: u32,
        distortion_model: &str,
        d: &[f64],
        k: &[f64],
        r: &[f64],
        p: &[f64],
    ) -> zbus::Result<()>;
}

fn stamp_ns(stamp: &DateTime<Utc>) -> i64 {
    stamp.timestamp_nanos_opt().unwrap_or_default()
}

/// Re-emit both bus topics as D-Bus signals until the bus is dropped.
pub fn forward_signals(
    conn: zbus::Connection,
    bus: &BroadcastBus,
) -> zbus::Result<Vec<JoinHandle<()>>> {
    let emitter = SignalEmitter::new(&conn, OBJECT_PATH)?.into_owned();

    let mut frames = bus.subscribe_frames();
    let frame_emitter = emitter.clone();
    let frame_task = tokio::spawn(async move {
        loop {
            match frames.recv().await {
                Ok(msg) => {
                    let sent = CameraService::image(
                        &frame_emitter,
                        stamp_ns(&msg.stamp),
                        &msg.frame_id,
                        &msg.format,
                        &msg.data,
                    )
                    .await;
                    if let Err(e) = sent {
                        tracing::warn!(error = %e, "failed to emit Image signal");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "image forwarder lagging");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut infos = bus.subscribe_camera_info();
    let info_task = tokio::spawn(async move {
        loop {
            match infos.recv().await {
                Ok(msg) => {
                    let cal = &msg.calibration;
                    let sent = CameraService::camera_info(
                        &emitter,
                        stamp_ns(&msg.stamp),
                        &msg.frame_id,
                        cal.width,
                        cal.height,
                        &cal.distortion_model,
                        &cal.distortion,
                        &cal.camera_matrix,
                        &cal.rectification,
                        &cal.projection,
                    )
                    .await;
                    if let Err(e) = sent {
                        tracing::warn!(error = %e, "failed to emit CameraInfo signal");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "camera_info forwarder lagging");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    Ok(vec![frame_task, info_task])
}
