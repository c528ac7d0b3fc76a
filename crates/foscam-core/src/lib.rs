//! foscam-core — Calibration data and bus messages for a Foscam camera.
//!
//! Holds the calibration record, its on-disk store and update service, and
//! the message types and publishing trait used by the capture loop.

pub mod bus;
pub mod calibration;
pub mod service;
pub mod types;

pub use bus::{Bus, BusError};
pub use calibration::CalibrationError;
pub use service::{CalibrationService, SetCalibrationResponse, SharedCalibration};
pub use types::{CalibrationRecord, CameraInfo, FrameMessage};
