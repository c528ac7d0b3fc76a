//! Periodic snapshot capture.
//!
//! A single dedicated thread owns the camera session and runs the tick loop:
//! pace, fetch, publish frame + camera info, then apply any pending
//! parameter change. Everything else talks to it through [`LoopControl`].

use arc_swap::ArcSwapOption;
use chrono::Utc;
use foscam_core::{Bus, FrameMessage, SharedCalibration};
use foscam_hw::{CameraError, ConnectionConfig, Connector, FrameGrabber};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("capture thread exited before reporting startup")]
    ThreadExited,
    #[error("capture thread panicked")]
    ThreadPanicked,
}

/// Lifecycle of the capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Idle = 0,
    Running = 1,
    /// Shutdown requested; an in-flight fetch may still complete.
    Draining = 2,
    Stopped = 3,
}

impl LoopState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LoopState::Idle,
            1 => LoopState::Running,
            2 => LoopState::Draining,
            _ => LoopState::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoopState::Idle => "idle",
            LoopState::Running => "running",
            LoopState::Draining => "draining",
            LoopState::Stopped => "stopped",
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Frame and camera info were both published.
    Published,
    /// The device reported an error; nothing was published.
    FetchFailed,
    /// The frame was fetched but the bus refused it.
    PublishFailed,
    /// No camera session could be established this tick.
    NoDevice,
}

/// Shared handle between the capture thread and the rest of the daemon.
///
/// Shutdown is a flag plus condvar so the pacing sleep ends early; the
/// pending config is a single slot drained only by the capture thread.
pub struct LoopControl {
    shutdown: Mutex<bool>,
    wake: Condvar,
    pending: ArcSwapOption<ConnectionConfig>,
    state: AtomicU8,
    frames_published: AtomicU64,
    fetch_failures: AtomicU64,
}

impl Default for LoopControl {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopControl {
    pub fn new() -> Self {
        Self {
            shutdown: Mutex::new(false),
            wake: Condvar::new(),
            pending: ArcSwapOption::empty(),
            state: AtomicU8::new(LoopState::Idle as u8),
            frames_published: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
        }
    }

    /// Ask the loop to stop. Never interrupts a fetch already in progress.
    pub fn request_shutdown(&self) {
        let mut stop = self.shutdown.lock().unwrap_or_else(PoisonError::into_inner);
        *stop = true;
        let _ = self.state.compare_exchange(
            LoopState::Running as u8,
            LoopState::Draining as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.wake.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `duration` or until shutdown is requested.
    /// Returns true if shutdown was requested.
    fn sleep(&self, duration: Duration) -> bool {
        let stop = self.shutdown.lock().unwrap_or_else(PoisonError::into_inner);
        let (stop, _) = self
            .wake
            .wait_timeout_while(stop, duration, |stop| !*stop)
            .unwrap_or_else(PoisonError::into_inner);
        *stop
    }

    /// Queue a new connection config. A later submit replaces an earlier
    /// one that has not been applied yet.
    pub fn submit_config(&self, config: ConnectionConfig) {
        self.pending.store(Some(Arc::new(config)));
    }

    pub fn has_pending(&self) -> bool {
        self.pending.load().is_some()
    }

    fn take_pending(&self) -> Option<Arc<ConnectionConfig>> {
        self.pending.swap(None)
    }

    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: LoopState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn frames_published(&self) -> u64 {
        self.frames_published.load(Ordering::Relaxed)
    }

    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures.load(Ordering::Relaxed)
    }
}

/// The capture loop. Owns the camera session exclusively.
pub struct CaptureLoop<C: Connector, B: Bus> {
    connector: C,
    bus: B,
    calibration: SharedCalibration,
    config: ConnectionConfig,
    frame_id: String,
    control: Arc<LoopControl>,
    device: Option<C::Grabber>,
    has_published: bool,
}

impl<C: Connector, B: Bus> CaptureLoop<C, B> {
    pub fn new(
        connector: C,
        bus: B,
        calibration: SharedCalibration,
        config: ConnectionConfig,
        frame_id: impl Into<String>,
        control: Arc<LoopControl>,
    ) -> Self {
        Self {
            connector,
            bus,
            calibration,
            config,
            frame_id: frame_id.into(),
            control,
            device: None,
            has_published: false,
        }
    }

    /// Connect, then tick until shutdown. Blocks the calling thread.
    pub fn run(mut self) -> Result<(), CaptureError> {
        self.start()?;
        self.run_loop();
        Ok(())
    }

    /// Open the first camera session and enter `Running`.
    fn start(&mut self) -> Result<(), CaptureError> {
        let connected = self
            .config
            .validate()
            .and_then(|()| self.connector.connect(&self.config));

        match connected {
            Ok(device) => {
                self.device = Some(device);
                // A shutdown requested before start leaves the state alone.
                let _ = self.control.state.compare_exchange(
                    LoopState::Idle as u8,
                    LoopState::Running as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                tracing::info!(framerate = self.config.framerate, "start capturing");
                Ok(())
            }
            Err(e) => {
                self.control.set_state(LoopState::Stopped);
                Err(e.into())
            }
        }
    }

    fn run_loop(&mut self) {
        let mut period = self.config.period();
        let mut tick_start = Instant::now();

        while !self.control.is_shutdown() {
            let elapsed = tick_start.elapsed();
            if elapsed < period && self.control.sleep(period - elapsed) {
                break;
            }
            // Anchored to the start of this tick: an overrun makes the next
            // tick fire immediately, without catching up missed ones.
            tick_start = Instant::now();

            self.tick();

            if let Some(config) = self.control.take_pending() {
                if self.control.is_shutdown() {
                    tracing::debug!("shutting down; pending parameters dropped");
                    break;
                }
                self.reconfigure(&config);
                period = self.config.period();
            }
        }

        self.control.set_state(LoopState::Draining);
        self.device = None;
        self.control.set_state(LoopState::Stopped);
        tracing::info!(
            frames = self.control.frames_published(),
            failures = self.control.fetch_failures(),
            "capture ended"
        );
    }

    /// Fetch one frame and publish it with the current calibration.
    ///
    /// Device errors are logged and end the tick without publishing.
    pub fn tick(&mut self) -> TickOutcome {
        if self.device.is_none() {
            match self.connector.connect(&self.config) {
                Ok(device) => {
                    tracing::info!("camera session re-established");
                    self.device = Some(device);
                }
                Err(e) => {
                    self.control.fetch_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %e, "no camera session; skipping frame");
                    return TickOutcome::NoDevice;
                }
            }
        }
        let Some(device) = self.device.as_mut() else {
            return TickOutcome::NoDevice;
        };

        let stamp = Utc::now();
        let data = match device.snap_picture() {
            Ok(data) => data,
            Err(e) => {
                self.control.fetch_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "error fetching frame from the camera");
                return TickOutcome::FetchFailed;
            }
        };

        let frame = FrameMessage::jpeg(stamp, &self.frame_id, data);
        if let Err(e) = self.bus.publish_frame(frame) {
            tracing::warn!(error = %e, "frame publish failed; camera info skipped");
            return TickOutcome::PublishFailed;
        }

        let info = self.calibration.load().to_camera_info(stamp, &self.frame_id);
        if let Err(e) = self.bus.publish_camera_info(info) {
            tracing::warn!(error = %e, "camera info publish failed");
            return TickOutcome::PublishFailed;
        }

        self.control.frames_published.fetch_add(1, Ordering::Relaxed);
        if !self.has_published {
            tracing::info!("published the first image");
            self.has_published = true;
        }
        TickOutcome::Published
    }

    /// Replace the session with one built from `config`.
    ///
    /// The old session is dropped before the new one is built, so it can
    /// never serve another fetch.
    fn reconfigure(&mut self, config: &ConnectionConfig) {
        if let Err(e) = config.validate() {
            tracing::warn!(error = %e, "ignoring invalid parameters");
            return;
        }

        self.device = None;
        self.config = config.clone();

        match self.connector.connect(&self.config) {
            Ok(device) => {
                self.device = Some(device);
                tracing::info!(
                    ip = %self.config.ip,
                    port = self.config.port,
                    framerate = self.config.framerate,
                    "parameters updated"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "reconnect failed; retrying next tick");
            }
        }
    }
}

/// Handle to a capture loop running on its own thread.
pub struct CaptureHandle {
    control: Arc<LoopControl>,
    thread: std::thread::JoinHandle<()>,
}

impl CaptureHandle {
    pub fn control(&self) -> &Arc<LoopControl> {
        &self.control
    }

    /// Wait for the loop to stop. Call `request_shutdown` first.
    pub fn join(self) -> Result<(), CaptureError> {
        self.thread.join().map_err(|_| CaptureError::ThreadPanicked)
    }
}

/// Spawn the capture loop on a dedicated OS thread.
///
/// The camera session is created on that thread (the blocking HTTP client
/// must not live on an async runtime). Resolves once the first session is
/// up; a failure there is returned and the thread exits.
pub async fn spawn_capture<C, B>(
    connector: C,
    bus: B,
    calibration: SharedCalibration,
    config: ConnectionConfig,
    frame_id: String,
    control: Arc<LoopControl>,
) -> Result<CaptureHandle, CaptureError>
where
    C: Connector + Send + 'static,
    B: Bus + 'static,
{
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), CaptureError>>();
    let loop_control = control.clone();

    let thread = std::thread::Builder::new()
        .name("foscam-capture".into())
        .spawn(move || {
            let mut capture =
                CaptureLoop::new(connector, bus, calibration, config, frame_id, loop_control);
            match capture.start() {
                Ok(()) => {
                    let _ = ready_tx.send(Ok(()));
                    capture.run_loop();
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        })?;

    ready_rx.await.map_err(|_| CaptureError::ThreadExited)??;
    tracing::info!("capture thread started");

    Ok(CaptureHandle { control, thread })
}
