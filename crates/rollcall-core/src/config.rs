use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Kiosk configuration: optional TOML file, then `ROLLCALL_*` overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Frames discarded after opening the camera (auto exposure settling).
    pub warmup_frames: usize,
    /// Directory containing `det_10g.onnx` and `w600k_r50.onnx`.
    pub model_dir: PathBuf,
    /// Root for training images, catalog and attendance log.
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            camera_width: 640,
            camera_height: 480,
            warmup_frames: 4,
            model_dir: crate::default_model_dir(),
            data_dir: default_data_dir(),
        }
    }
}

impl Config {
    /// Load from `path` (if given and present), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(p)?,
            Some(p) => {
                tracing::warn!(path = %p.display(), "config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ROLLCALL_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        self.camera_width = env_or("ROLLCALL_CAMERA_WIDTH", self.camera_width);
        self.camera_height = env_or("ROLLCALL_CAMERA_HEIGHT", self.camera_height);
        self.warmup_frames = env_or("ROLLCALL_WARMUP_FRAMES", self.warmup_frames);
    }

    /// `TrainingImage/` under the data directory.
    pub fn training_dir(&self) -> PathBuf {
        self.data_dir.join("TrainingImage")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join("trained_faces.bin")
    }

    pub fn attendance_db_path(&self) -> PathBuf {
        self.data_dir.join("attendance.db")
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("rollcall.toml");
        std::fs::write(
            &path,
            "camera_device = \"/dev/video4\"\ndata_dir = \"/srv/kiosk\"\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.data_dir, PathBuf::from("/srv/kiosk"));
        assert_eq!(config.camera_width, 640);
        assert_eq!(config.warmup_frames, 4);
    }

    #[test]
    fn test_derived_paths() {
        let config = Config {
            data_dir: PathBuf::from("/srv/kiosk"),
            ..Config::default()
        };
        assert_eq!(config.training_dir(), PathBuf::from("/srv/kiosk/TrainingImage"));
        assert_eq!(config.catalog_path(), PathBuf::from("/srv/kiosk/trained_faces.bin"));
        assert_eq!(config.attendance_db_path(), PathBuf::from("/srv/kiosk/attendance.db"));
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("rollcall.toml");
        std::fs::write(&path, "camera_width = \"wide\"").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        assert_eq!(env_or("ROLLCALL_TEST_UNSET_VARIABLE", 7usize), 7);
    }
}
