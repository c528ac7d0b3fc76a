//! Calibration file storage.
//!
//! Files use the layout written by the usual camera calibration tooling:
//! image size, camera name, distortion model and four `{rows, cols, data}`
//! matrices. The written dimensions are a fixed convention (1x5, 3x3, 3x3,
//! 3x4) and are not derived from the data.

use crate::types::CalibrationRecord;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extension of calibration files.
pub const CALIBRATION_EXT: &str = "yaml";

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("calibration file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("calibration file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed calibration file {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
    #[error("{field} must have {expected} values, got {actual}")]
    InvalidShape {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct MatrixEntry {
    #[serde(default)]
    rows: u32,
    #[serde(default)]
    cols: u32,
    data: Vec<f64>,
}

impl MatrixEntry {
    fn new(rows: u32, cols: u32, data: &[f64]) -> Self {
        Self {
            rows,
            cols,
            data: data.to_vec(),
        }
    }
}

/// On-disk layout of a calibration file.
#[derive(Debug, Serialize, Deserialize)]
struct CalibrationFile {
    image_width: u32,
    image_height: u32,
    #[serde(default)]
    camera_name: String,
    distortion_model: String,
    distortion_coefficients: MatrixEntry,
    camera_matrix: MatrixEntry,
    rectification_matrix: MatrixEntry,
    projection_matrix: MatrixEntry,
}

/// Path of the calibration file for `camera_name` inside `dir`.
pub fn calibration_path(dir: &Path, camera_name: &str) -> PathBuf {
    dir.join(format!("{camera_name}.{CALIBRATION_EXT}"))
}

/// Load a calibration record from `path`.
pub fn load(path: &Path) -> Result<CalibrationRecord, CalibrationError> {
    if !path.is_file() {
        return Err(CalibrationError::NotFound(path.to_path_buf()));
    }

    let text = std::fs::read_to_string(path).map_err(|source| CalibrationError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let file: CalibrationFile =
        serde_yaml::from_str(&text).map_err(|e| CalibrationError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    CalibrationRecord::from_parts(
        file.image_width,
        file.image_height,
        file.distortion_model,
        file.distortion_coefficients.data,
        &file.camera_matrix.data,
        &file.rectification_matrix.data,
        &file.projection_matrix.data,
    )
    .map_err(|e| CalibrationError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Save `record` to `path` under `camera_name`.
///
/// The content goes to a uniquely named temporary file in the same
/// directory and is renamed over `path`, so a concurrent `load` sees either
/// the old or the new file and overlapping saves never share a temp file.
pub fn save(
    record: &CalibrationRecord,
    camera_name: &str,
    path: &Path,
) -> Result<(), CalibrationError> {
    let file = CalibrationFile {
        image_width: record.width,
        image_height: record.height,
        camera_name: camera_name.to_string(),
        distortion_model: record.distortion_model.clone(),
        distortion_coefficients: MatrixEntry::new(1, 5, &record.distortion),
        camera_matrix: MatrixEntry::new(3, 3, &record.camera_matrix),
        rectification_matrix: MatrixEntry::new(3, 3, &record.rectification),
        projection_matrix: MatrixEntry::new(3, 4, &record.projection),
    };

    let text = serde_yaml::to_string(&file).map_err(|e| CalibrationError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let io_err = |source: std::io::Error| CalibrationError::Io {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(text.as_bytes()).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    // A failed persist drops the temp file with the error.
    tmp.persist(path).map_err(|e| io_err(e.error))?;

    tracing::debug!(path = %path.display(), camera = camera_name, "calibration saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tests::sample_record;

    #[test]
    fn test_calibration_path() {
        let path = calibration_path(
            Path::new("/data/config/calibrations/camera_intrinsic"),
            "foscam_r2",
        );
        assert_eq!(
            path,
            PathBuf::from("/data/config/calibrations/camera_intrinsic/foscam_r2.yaml")
        );
    }

    #[test]
    fn test_round_trip_five_coefficients() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cam.yaml");
        let record = sample_record(5);

        save(&record, "cam", &path).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded.width, record.width);
        assert_eq!(loaded.height, record.height);
        assert_eq!(loaded.camera_matrix, record.camera_matrix);
        assert_eq!(loaded.rectification, record.rectification);
        assert_eq!(loaded.projection, record.projection);
        assert_eq!(loaded.distortion.len(), 5);
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_round_trip_no_coefficients() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cam.yaml");
        let record = sample_record(0);

        save(&record, "cam", &path).unwrap();
        let loaded = load(&path).unwrap();

        assert!(loaded.distortion.is_empty());
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_save_writes_fixed_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cam.yaml");
        save(&sample_record(8), "foscam_r2", &path).unwrap();

        let value: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["camera_name"].as_str(), Some("foscam_r2"));
        assert_eq!(value["distortion_coefficients"]["rows"].as_u64(), Some(1));
        assert_eq!(value["distortion_coefficients"]["cols"].as_u64(), Some(5));
        assert_eq!(
            value["distortion_coefficients"]["data"]
                .as_sequence()
                .map(|s| s.len()),
            Some(8)
        );
        assert_eq!(value["projection_matrix"]["rows"].as_u64(), Some(3));
        assert_eq!(value["projection_matrix"]["cols"].as_u64(), Some(4));
        assert_eq!(value["camera_matrix"]["cols"].as_u64(), Some(3));
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cam.yaml");
        save(&sample_record(5), "cam", &path).unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("cam.yaml")]);
    }

    #[test]
    fn test_concurrent_saves_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cam.yaml");

        std::thread::scope(|s| {
            for width in 0..8u32 {
                let path = &path;
                s.spawn(move || {
                    let mut record = sample_record(5);
                    record.width = 100 + width;
                    for _ in 0..20 {
                        save(&record, "cam", path).unwrap();
                    }
                });
            }
        });

        let loaded = load(&path).unwrap();
        assert!((100..108).contains(&loaded.width));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, CalibrationError::NotFound(_)));
    }

    #[test]
    fn test_load_malformed_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "image_width: [not, a, number\n").unwrap();
        assert!(matches!(load(&path), Err(CalibrationError::Parse { .. })));
    }

    #[test]
    fn test_load_wrong_matrix_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.yaml");
        std::fs::write(
            &path,
            "image_width: 640\n\
             image_height: 480\n\
             distortion_model: plumb_bob\n\
             distortion_coefficients: {rows: 1, cols: 5, data: [0, 0, 0, 0, 0]}\n\
             camera_matrix: {rows: 3, cols: 3, data: [1, 0, 0, 0, 1, 0]}\n\
             rectification_matrix: {rows: 3, cols: 3, data: [1, 0, 0, 0, 1, 0, 0, 0, 1]}\n\
             projection_matrix: {rows: 3, cols: 4, data: [1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1, 0]}\n",
        )
        .unwrap();
        let err = load(&path).unwrap_err();
        assert!(matches!(err, CalibrationError::Parse { .. }));
        assert!(err.to_string().contains("camera_matrix"));
    }

    #[test]
    fn test_load_integer_data_without_camera_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ints.yaml");
        std::fs::write(
            &path,
            "image_width: 640\n\
             image_height: 480\n\
             distortion_model: plumb_bob\n\
             distortion_coefficients: {rows: 1, cols: 5, data: [0, 0, 0, 0, 0]}\n\
             camera_matrix: {rows: 3, cols: 3, data: [300, 0, 320, 0, 300, 240, 0, 0, 1]}\n\
             rectification_matrix: {rows: 3, cols: 3, data: [1, 0, 0, 0, 1, 0, 0, 0, 1]}\n\
             projection_matrix: {rows: 3, cols: 4, data: [300, 0, 320, 0, 0, 300, 240, 0, 0, 0, 1, 0]}\n",
        )
        .unwrap();
        let record = load(&path).unwrap();
        assert_eq!(record.camera_matrix[0], 300.0);
        assert_eq!(record.distortion.len(), 5);
    }

    #[test]
    fn test_save_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_such_dir").join("cam.yaml");
        let err = save(&sample_record(5), "cam", &path).unwrap_err();
        assert!(matches!(err, CalibrationError::Io { .. }));
    }
}
