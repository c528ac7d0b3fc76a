//! "Set calibration" request handling.

use crate::calibration;
use crate::types::CalibrationRecord;
use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Calibration shared between the service (writer) and the capture loop
/// (reader). Readers always see a complete record.
pub type SharedCalibration = Arc<ArcSwap<CalibrationRecord>>;

/// Reply to a set-calibration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCalibrationResponse {
    pub success: bool,
    /// Always names the destination file.
    pub message: String,
}

/// Persists calibration updates for one camera.
///
/// Concurrent calls are serialized across the save and the in-memory swap,
/// so the last completed write wins on disk and in memory alike.
#[derive(Clone)]
pub struct CalibrationService {
    camera_name: String,
    path: PathBuf,
    current: SharedCalibration,
    write_lock: Arc<Mutex<()>>,
}

impl CalibrationService {
    pub fn new(camera_name: &str, path: PathBuf, current: SharedCalibration) -> Self {
        Self {
            camera_name: camera_name.to_string(),
            path,
            current,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Destination file of every write.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the calibration currently in use.
    pub fn current(&self) -> Arc<CalibrationRecord> {
        self.current.load_full()
    }

    /// Save `record` and, once on disk, make it the in-use calibration.
    pub fn set_calibration(&self, record: CalibrationRecord) -> SetCalibrationResponse {
        tracing::info!(path = %self.path.display(), "set calibration requested");

        // Guards no data; a panicked writer leaves nothing to repair.
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match calibration::save(&record, &self.camera_name, &self.path) {
            Ok(()) => {
                self.current.store(Arc::new(record));
                SetCalibrationResponse {
                    success: true,
                    message: format!("Write to {}", self.path.display()),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to save calibration");
                self.failure(&e)
            }
        }
    }

    /// Reply for a request rejected before reaching the store.
    pub fn failure(&self, reason: &dyn std::fmt::Display) -> SetCalibrationResponse {
        SetCalibrationResponse {
            success: false,
            message: format!("Write to {} failed: {reason}", self.path.display()),
        }
    }
}
