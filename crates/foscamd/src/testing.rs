//! Scripted camera and recording bus for capture loop tests.

use crate::capture::LoopControl;
use arc_swap::ArcSwap;
use foscam_core::{Bus, BusError, CalibrationRecord, CameraInfo, FrameMessage, SharedCalibration};
use foscam_hw::{CameraError, ConnectionConfig, Connector, FrameGrabber};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub fn config(ip: &str, framerate: f64) -> ConnectionConfig {
    ConnectionConfig {
        ip: ip.to_string(),
        port: 88,
        username: "admin".into(),
        password: "secret".into(),
        framerate,
    }
}

pub fn calibration_record() -> CalibrationRecord {
    CalibrationRecord {
        width: 640,
        height: 480,
        distortion_model: "plumb_bob".into(),
        distortion: vec![-0.2, 0.03, 0.0, 0.0, 0.0],
        camera_matrix: [300.0, 0.0, 320.0, 0.0, 300.0, 240.0, 0.0, 0.0, 1.0],
        rectification: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        projection: [
            300.0, 0.0, 320.0, 0.0, 0.0, 300.0, 240.0, 0.0, 0.0, 0.0, 1.0, 0.0,
        ],
    }
}

pub fn shared_calibration() -> SharedCalibration {
    Arc::new(ArcSwap::from_pointee(calibration_record()))
}

/// Minimal complete JPEG.
pub const JPEG: [u8; 6] = [0xFF, 0xD8, 0x00, 0x11, 0xFF, 0xD9];

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected { session: usize, ip: String },
    Fetched { session: usize },
    Dropped { session: usize },
}

#[derive(Default)]
struct ScriptState {
    /// Per fetch: `Ok` returns a frame, `Err(code)` a CGI error.
    script: Vec<Result<(), i32>>,
    fetches: usize,
    connects: usize,
    fail_connect: Option<usize>,
    fetch_delay: Duration,
    fetch_starts: Vec<Instant>,
    events: Vec<Event>,
    shutdown_after: Option<(usize, Arc<LoopControl>)>,
    submit_during: Option<(usize, ConnectionConfig, Arc<LoopControl>)>,
}

/// Connector whose sessions replay a shared fetch script and record what
/// happened to them. Clones share state.
#[derive(Clone)]
pub struct ScriptedConnector {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedConnector {
    pub fn new(script: Vec<Result<(), i32>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                script,
                ..Default::default()
            })),
        }
    }

    /// Request shutdown from inside fetch number `n` (1-based).
    pub fn shutdown_after(self, n: usize, control: Arc<LoopControl>) -> Self {
        self.state.lock().unwrap().shutdown_after = Some((n, control));
        self
    }

    /// Submit `config` from inside fetch number `n` (1-based).
    pub fn submit_during(
        self,
        n: usize,
        config: ConnectionConfig,
        control: Arc<LoopControl>,
    ) -> Self {
        self.state.lock().unwrap().submit_during = Some((n, config, control));
        self
    }

    /// Make connect attempt number `n` (0-based) fail.
    pub fn fail_connects(self, n: usize) -> Self {
        self.state.lock().unwrap().fail_connect = Some(n);
        self
    }

    pub fn fetch_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().fetch_delay = delay;
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.state.lock().unwrap().fetches
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn fetch_starts(&self) -> Vec<Instant> {
        self.state.lock().unwrap().fetch_starts.clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }
}

pub struct ScriptedSession {
    session: usize,
    state: Arc<Mutex<ScriptState>>,
}

impl Connector for ScriptedConnector {
    type Grabber = ScriptedSession;

    fn connect(&self, config: &ConnectionConfig) -> Result<ScriptedSession, CameraError> {
        let mut state = self.state.lock().unwrap();
        let attempt = state.connects;
        state.connects += 1;
        if state.fail_connect == Some(attempt) {
            return Err(CameraError::Request("connection refused".into()));
        }

        let session = state
            .events
            .iter()
            .filter(|e| matches!(e, Event::Connected { .. }))
            .count();
        state.events.push(Event::Connected {
            session,
            ip: config.ip.clone(),
        });
        Ok(ScriptedSession {
            session,
            state: self.state.clone(),
        })
    }
}

impl FrameGrabber for ScriptedSession {
    fn snap_picture(&mut self) -> Result<Vec<u8>, CameraError> {
        let (outcome, delay) = {
            let mut state = self.state.lock().unwrap();
            state.fetch_starts.push(Instant::now());
            state.events.push(Event::Fetched {
                session: self.session,
            });
            let index = state.fetches;
            state.fetches += 1;
            let n = state.fetches;

            if let Some((at, config, control)) = &state.submit_during {
                if *at == n {
                    control.submit_config(config.clone());
                }
            }
            if let Some((at, control)) = &state.shutdown_after {
                if *at == n {
                    control.request_shutdown();
                }
            }

            let outcome = state.script.get(index).copied().unwrap_or(Ok(()));
            (outcome, state.fetch_delay)
        };

        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        match outcome {
            Ok(()) => Ok(JPEG.to_vec()),
            Err(code) => Err(CameraError::Api { code }),
        }
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.events.push(Event::Dropped {
                session: self.session,
            });
        }
    }
}

#[derive(Debug, Clone)]
pub enum Published {
    Frame(FrameMessage),
    Info(CameraInfo),
}

/// Bus that records every accepted message in order.
#[derive(Default)]
pub struct RecordingBus {
    published: Mutex<Vec<Published>>,
    /// Number of leading frame publishes to reject.
    fail_frames: Mutex<usize>,
}

impl RecordingBus {
    pub fn failing_frames(n: usize) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            fail_frames: Mutex::new(n),
        }
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }
}

impl Bus for RecordingBus {
    fn publish_frame(&self, msg: FrameMessage) -> Result<(), BusError> {
        let mut fail = self.fail_frames.lock().unwrap();
        if *fail > 0 {
            *fail -= 1;
            return Err(BusError::Publish {
                topic: "image",
                reason: "rejected by test".into(),
            });
        }
        self.published.lock().unwrap().push(Published::Frame(msg));
        Ok(())
    }

    fn publish_camera_info(&self, msg: CameraInfo) -> Result<(), BusError> {
        self.published.lock().unwrap().push(Published::Info(msg));
        Ok(())
    }
}
