//! Camera connection parameters: a flat TOML file plus `FOSCAM_*`
//! environment overrides, re-read periodically to pick up live changes.

use crate::capture::LoopControl;
use foscam_hw::{CameraError, ConnectionConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParamError {
    #[error("cannot read parameter file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed parameter file {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
    #[error("required parameter `{0}` is not set")]
    Missing(&'static str),
    #[error("{name}={value:?} is not a valid value")]
    InvalidEnv { name: &'static str, value: String },
    #[error(transparent)]
    Invalid(#[from] CameraError),
}

/// Lower bound on the re-read interval.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Parameter file as written; every value may be absent.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawParams {
    ip: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    framerate: Option<f64>,
}

/// Load the connection parameters once.
///
/// A missing file counts as empty, so every value may come from the
/// environment instead.
pub fn load_params(path: &Path) -> Result<ConnectionConfig, ParamError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no parameter file; using environment only");
            None
        }
        Err(source) => {
            return Err(ParamError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    resolve(path, text.as_deref(), |key| std::env::var(key).ok())
}

fn resolve(
    path: &Path,
    text: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ConnectionConfig, ParamError> {
    let raw: RawParams = match text {
        Some(text) => toml::from_str(text).map_err(|e| ParamError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?,
        None => RawParams::default(),
    };

    let config = ConnectionConfig {
        ip: lookup("FOSCAM_IP").or(raw.ip).ok_or(ParamError::Missing("ip"))?,
        port: env_parsed(&lookup, "FOSCAM_PORT")?
            .or(raw.port)
            .ok_or(ParamError::Missing("port"))?,
        username: lookup("FOSCAM_USERNAME")
            .or(raw.username)
            .ok_or(ParamError::Missing("username"))?,
        password: lookup("FOSCAM_PASSWORD")
            .or(raw.password)
            .ok_or(ParamError::Missing("password"))?,
        framerate: env_parsed(&lookup, "FOSCAM_FRAMERATE")?
            .or(raw.framerate)
            .ok_or(ParamError::Missing("framerate"))?,
    };
    config.validate()?;
    Ok(config)
}

fn env_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ParamError> {
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ParamError::InvalidEnv { name, value }),
    }
}

/// Re-read the parameter file every `interval` and hand changed configs to
/// the capture loop through its pending-config cell.
///
/// Runs until the capture loop is asked to shut down.
pub async fn watch_params(
    path: PathBuf,
    initial: ConnectionConfig,
    control: Arc<LoopControl>,
    interval: Duration,
) {
    let mut last = initial;
    let mut ticker = tokio::time::interval(interval.max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; the initial config is already applied.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if control.is_shutdown() {
            break;
        }

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot re-read parameters");
                continue;
            }
        };

        match resolve(&path, text.as_deref(), |key| std::env::var(key).ok()) {
            Ok(config) if config != last => {
                tracing::info!(
                    ip = %config.ip,
                    port = config.port,
                    framerate = config.framerate,
                    "parameters changed"
                );
                control.submit_config(config.clone());
                last = config;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "ignoring invalid parameter update");
            }
        }
    }

    tracing::debug!("parameter watcher stopped");
}
