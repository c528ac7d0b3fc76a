//! foscam-hw — Hardware access for Foscam HD network cameras.
//!
//! Provides a blocking HTTP client for the camera's CGI snapshot command
//! and the JPEG checks applied to every returned frame.

pub mod camera;
pub mod frame;

pub use camera::{
    CameraError, ConnectionConfig, Connector, FoscamCamera, FoscamConnector, FrameGrabber,
};
