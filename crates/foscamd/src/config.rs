use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
///
/// Camera connection parameters live in the parameter file (see `params`),
/// not here.
#[derive(Debug, Clone)]
pub struct Config {
    /// Camera name; selects the calibration file (default: foscam_r2).
    pub camera_name: String,
    /// Directory holding `<camera_name>.yaml` calibration files.
    pub calibration_dir: PathBuf,
    /// Namespace prefixed to the optical frame id (default: camera name).
    pub namespace: String,
    /// TOML file with ip/port/username/password/framerate.
    pub params_path: PathBuf,
    /// How often the parameter file is re-read for changes.
    pub param_poll_interval: Duration,
    /// Upper bound on a single snapshot request.
    pub fetch_timeout: Duration,
    /// Register on the session bus instead of the system bus.
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `FOSCAMD_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let camera_name =
            lookup("FOSCAMD_CAMERA_NAME").unwrap_or_else(|| "foscam_r2".to_string());

        Self {
            calibration_dir: lookup("FOSCAMD_CALIBRATION_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/data/config/calibrations/camera_intrinsic")),
            namespace: lookup("FOSCAMD_NAMESPACE").unwrap_or_else(|| camera_name.clone()),
            params_path: lookup("FOSCAMD_PARAMS")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/etc/foscamd/params.toml")),
            param_poll_interval: Duration::from_millis(parse_or(
                lookup("FOSCAMD_PARAM_POLL_MS"),
                1000,
            )),
            fetch_timeout: Duration::from_secs(parse_or(lookup("FOSCAMD_FETCH_TIMEOUT_SECS"), 5)),
            session_bus: lookup("FOSCAMD_SESSION_BUS")
                .map(|v| v != "0")
                .unwrap_or(false),
            camera_name,
        }
    }

    /// Path of this camera's calibration file.
    pub fn calibration_path(&self) -> PathBuf {
        foscam_core::calibration::calibration_path(&self.calibration_dir, &self.camera_name)
    }

    /// Coordinate frame id stamped on every published message.
    pub fn frame_id(&self) -> String {
        let ns = self.namespace.trim_matches('/');
        if ns.is_empty() {
            "camera_optical_frame".to_string()
        } else {
            format!("{ns}/camera_optical_frame")
        }
    }
}

fn parse_or(value: Option<String>, default: u64) -> u64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}
