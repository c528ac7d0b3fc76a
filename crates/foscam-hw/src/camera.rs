//! Foscam CGI snapshot client via blocking `reqwest`.

use crate::frame::{self, FrameError};
use std::time::Duration;
use thiserror::Error;

/// CGI endpoint shared by every Foscam HD command.
const CGI_PATH: &str = "/cgi-bin/CGIProxy.fcgi";

/// Snapshot command that returns the JPEG in the response body.
const SNAP_COMMAND: &str = "snapPicture2";

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("invalid connection config: {0}")]
    InvalidConfig(String),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Request(String),
    #[error("camera answered HTTP {0}")]
    HttpStatus(u16),
    #[error("camera API returned {code} ({})", describe_result(*.code))]
    Api { code: i32 },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Human-readable description of a Foscam CGI result code.
pub fn describe_result(code: i32) -> &'static str {
    match code {
        0 => "success",
        -1 => "CGI request string format error",
        -2 => "username or password error",
        -3 => "access denied",
        -4 => "CGI execute failed",
        -5 => "timeout",
        -7 => "unknown error",
        _ => "reserved",
    }
}

/// Parameters identifying and authenticating to one camera, plus the
/// desired capture cadence.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub ip: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Target frames per second; must be finite and positive.
    pub framerate: f64,
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<(), CameraError> {
        if self.ip.trim().is_empty() {
            return Err(CameraError::InvalidConfig("ip is empty".into()));
        }
        if !self.framerate.is_finite() || self.framerate <= 0.0 {
            return Err(CameraError::InvalidConfig(format!(
                "framerate must be > 0, got {}",
                self.framerate
            )));
        }
        Ok(())
    }

    /// Target time between two tick starts.
    ///
    /// Callers must have validated the config; a non-positive framerate
    /// yields a zero period.
    pub fn period(&self) -> Duration {
        if self.framerate.is_finite() && self.framerate > 0.0 {
            Duration::from_secs_f64(1.0 / self.framerate)
        } else {
            Duration::ZERO
        }
    }

    /// Base URL of the camera's CGI endpoint.
    pub fn cgi_url(&self) -> String {
        format!("http://{}:{}{CGI_PATH}", self.ip, self.port)
    }
}

/// A live session able to fetch frames. One instance per `ConnectionConfig`.
pub trait FrameGrabber {
    /// Fetch one JPEG frame. Blocks until the device answers or times out.
    fn snap_picture(&mut self) -> Result<Vec<u8>, CameraError>;
}

/// Builds a fresh `FrameGrabber` for a given config.
pub trait Connector {
    type Grabber: FrameGrabber;

    fn connect(&self, config: &ConnectionConfig) -> Result<Self::Grabber, CameraError>;
}

/// Connects real Foscam cameras over HTTP.
#[derive(Debug, Clone)]
pub struct FoscamConnector {
    timeout: Duration,
}

impl FoscamConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Connector for FoscamConnector {
    type Grabber = FoscamCamera;

    fn connect(&self, config: &ConnectionConfig) -> Result<FoscamCamera, CameraError> {
        FoscamCamera::connect(config, self.timeout)
    }
}

/// HTTP session bound to one camera address and credential pair.
///
/// Must be created and dropped outside of an async runtime: the blocking
/// client owns its own internal runtime.
pub struct FoscamCamera {
    client: reqwest::blocking::Client,
    url: String,
    username: String,
    password: String,
    timeout: Duration,
}

impl FoscamCamera {
    pub fn connect(config: &ConnectionConfig, timeout: Duration) -> Result<Self, CameraError> {
        config.validate()?;

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CameraError::Client(e.to_string()))?;

        let url = config.cgi_url();
        tracing::info!(url = %url, user = %config.username, "camera session created");

        Ok(Self {
            client,
            url,
            username: config.username.clone(),
            password: config.password.clone(),
            timeout,
        })
    }

    fn map_transport_error(&self, e: reqwest::Error) -> CameraError {
        if e.is_timeout() {
            CameraError::Timeout(self.timeout)
        } else {
            CameraError::Request(e.without_url().to_string())
        }
    }
}

impl FrameGrabber for FoscamCamera {
    fn snap_picture(&mut self) -> Result<Vec<u8>, CameraError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("cmd", SNAP_COMMAND),
                ("usr", self.username.as_str()),
                ("pwd", self.password.as_str()),
            ])
            .send()
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CameraError::HttpStatus(status.as_u16()));
        }

        let body = response
            .bytes()
            .map_err(|e| self.map_transport_error(e))?
            .to_vec();

        classify_body(body)
    }
}

/// Turn a snapshot response body into JPEG bytes or the error it reports.
pub fn classify_body(body: Vec<u8>) -> Result<Vec<u8>, CameraError> {
    if frame::starts_like_jpeg(&body) {
        return Ok(frame::validate_jpeg(body)?);
    }

    let text = String::from_utf8_lossy(&body);
    match frame::parse_cgi_result(&text) {
        // A success code without image data is still a failed snapshot.
        Some(0) => Err(CameraError::MalformedResponse(
            "result 0 without image data".into(),
        )),
        Some(code) => Err(CameraError::Api { code }),
        None => Err(CameraError::MalformedResponse(format!(
            "{} bytes, neither JPEG nor CGI result",
            body.len()
        ))),
    }
}
