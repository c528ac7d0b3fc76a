use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationError;

/// Format tag carried by every frame message.
pub const JPEG_FORMAT: &str = "jpeg";

/// Intrinsic calibration of one camera.
///
/// Matrix sizes are fixed by the array types: 3x3 intrinsics, 3x3
/// rectification and 3x4 projection, whatever the distortion model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub width: u32,
    pub height: u32,
    /// Distortion model name (e.g., "plumb_bob").
    pub distortion_model: String,
    /// Distortion coefficients; length depends on the model.
    pub distortion: Vec<f64>,
    /// Row-major 3x3 camera matrix K.
    pub camera_matrix: [f64; 9],
    /// Row-major 3x3 rectification matrix R.
    pub rectification: [f64; 9],
    /// Row-major 3x4 projection matrix P.
    pub projection: [f64; 12],
}

impl CalibrationRecord {
    /// Build a record from untyped matrix data, checking matrix lengths.
    pub fn from_parts(
        width: u32,
        height: u32,
        distortion_model: String,
        distortion: Vec<f64>,
        camera_matrix: &[f64],
        rectification: &[f64],
        projection: &[f64],
    ) -> Result<Self, CalibrationError> {
        Ok(Self {
            width,
            height,
            distortion_model,
            distortion,
            camera_matrix: fixed("camera_matrix", camera_matrix)?,
            rectification: fixed("rectification_matrix", rectification)?,
            projection: fixed("projection_matrix", projection)?,
        })
    }

    /// Stamp this calibration for publication alongside a frame.
    pub fn to_camera_info(&self, stamp: DateTime<Utc>, frame_id: &str) -> CameraInfo {
        CameraInfo {
            stamp,
            frame_id: frame_id.to_string(),
            calibration: self.clone(),
        }
    }
}

fn fixed<const N: usize>(field: &'static str, data: &[f64]) -> Result<[f64; N], CalibrationError> {
    data.try_into().map_err(|_| CalibrationError::InvalidShape {
        field,
        expected: N,
        actual: data.len(),
    })
}

/// One compressed camera frame as published on the image topic.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMessage {
    /// Time the fetch started, not the time the message was built.
    pub stamp: DateTime<Utc>,
    pub frame_id: String,
    pub format: String,
    pub data: Vec<u8>,
}

impl FrameMessage {
    pub fn jpeg(stamp: DateTime<Utc>, frame_id: &str, data: Vec<u8>) -> Self {
        Self {
            stamp,
            frame_id: frame_id.to_string(),
            format: JPEG_FORMAT.to_string(),
            data,
        }
    }
}

/// Calibration record published on the camera-info topic.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraInfo {
    pub stamp: DateTime<Utc>,
    pub frame_id: String,
    pub calibration: CalibrationRecord,
}
