//! Layered configuration
//!
//! Sources, lowest priority first:
//! - Built-in defaults
//! - `drowsiness-monitor.toml` in the working directory, or an explicit file
//! - `DROWSY__SECTION__KEY` environment variables

use std::path::Path;

use alerting::AlertConfig;
use camera_capture::CameraConfig;
use dms::DmsConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::MonitorError;

const DEFAULT_CONFIG_FILE: &str = "drowsiness-monitor";
const ENV_PREFIX: &str = "DROWSY";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub camera: CameraConfig,
    pub dms: DmsConfig,
    pub alert: AlertConfig,
    pub audio: AudioConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// External audio player; `None` logs alerts instead of playing them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub player: Option<String>,
    /// Player arguments; `{file}` and `{volume}` are substituted
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: String,
    /// Evidence images go under `<records_dir>/<driver_id>/`
    pub records_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "drivers.db".to_string(),
            records_dir: "records".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// JSON file naming the active driver
    pub active_subject_file: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            active_subject_file: "current_driver.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus listen address, e.g. `0.0.0.0:9090`
    pub listen: Option<String>,
}

impl MonitorConfig {
    /// Load configuration from defaults, file, and environment
    pub fn load(path: Option<&Path>) -> Result<Self, MonitorError> {
        let file = match path {
            Some(p) => ::config::File::from(p).required(true),
            None => ::config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: MonitorConfig = ::config::Config::builder()
            .add_source(file)
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.dms.validate()?;
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_constants() {
        let config = MonitorConfig::default();
        assert_eq!(config.dms.ear_threshold, 0.21);
        assert_eq!(config.dms.consec_frames, 20);
        assert_eq!(config.dms.mar_threshold, 0.6);
        assert_eq!(config.alert.cooldown_seconds, 10.0);
        assert_eq!(config.alert.reset_window_seconds, 30.0);
        assert_eq!(config.storage.records_dir, "records");
        assert_eq!(config.session.active_subject_file, "current_driver.json");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.toml");
        std::fs::write(
            &path,
            r#"
[dms]
consec_frames = 12
classifier_model_path = "models/drowsy.onnx"

[alert]
cooldown_seconds = 5.0

[audio]
player = "paplay"
args = ["--volume={volume}", "{file}"]

[camera]
source = "sequence"
source_dir = "replay"
realtime = false
"#,
        )
        .unwrap();

        let config = MonitorConfig::load(Some(&path)).unwrap();
        assert_eq!(config.dms.consec_frames, 12);
        assert_eq!(config.dms.classifier_model_path.as_deref(), Some("models/drowsy.onnx"));
        assert_eq!(config.alert.cooldown_seconds, 5.0);
        assert_eq!(config.audio.player.as_deref(), Some("paplay"));
        assert_eq!(config.audio.args.len(), 2);
        assert_eq!(config.camera.source, camera_capture::SourceKind::Sequence);
        assert_eq!(config.camera.source_dir, "replay");
        assert!(!config.camera.realtime);
        assert_eq!(config.camera.device_index, 0);
        // Untouched sections keep defaults
        assert_eq!(config.dms.ear_threshold, 0.21);
        assert_eq!(config.alert.max_volume, 1.0);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.toml");
        std::fs::write(&path, "[dms]\nconsec_frames = 0\n").unwrap();

        assert!(matches!(MonitorConfig::load(Some(&path)), Err(MonitorError::Dms(_))));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = MonitorConfig::load(Some(Path::new("/nonexistent/monitor.toml")));
        assert!(matches!(result, Err(MonitorError::Config(_))));
    }
}
