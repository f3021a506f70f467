use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Daemon configuration: TOML file, then `LOOKOUT_*` environment overrides.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Preview resolutions taller than this are not negotiated.
    pub max_preview_height: u32,
    /// ONNX face-box model for local detection.
    pub model_path: PathBuf,
    /// Scheduler cadence.
    pub frames_per_second: u32,
    /// Initial display size used to scale overlays until a renderer reports its own.
    pub display_width: f64,
    pub display_height: f64,
    pub face_api_endpoint: String,
    pub face_api_key: String,
    /// Name of the person group reserved for enrollment.
    pub training_group_name: String,
    /// Samples captured per enrollment session.
    pub samples_per_enrollment: usize,
    /// Chance that a single-face tick contributes an enrollment sample.
    pub capture_probability: f64,
    /// Name draws allowed before giving up on a fresh storage location.
    pub max_name_attempts: usize,
    pub training_poll_interval: Duration,
    /// Identification candidates below this confidence are ignored.
    pub identify_confidence_floor: f32,
    /// Root directory for enrollment samples.
    pub samples_dir: PathBuf,
}

/// On-disk form; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    camera_device: Option<String>,
    max_preview_height: Option<u32>,
    model_path: Option<PathBuf>,
    frames_per_second: Option<u32>,
    display_width: Option<f64>,
    display_height: Option<f64>,
    face_api_endpoint: Option<String>,
    face_api_key: Option<String>,
    training_group_name: Option<String>,
    samples_per_enrollment: Option<usize>,
    capture_probability: Option<f64>,
    max_name_attempts: Option<usize>,
    training_poll_interval_ms: Option<u64>,
    identify_confidence_floor: Option<f32>,
    samples_dir: Option<PathBuf>,
}

impl Config {
    /// Load from `LOOKOUT_CONFIG` (or the XDG default path, if present) and
    /// the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("LOOKOUT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("lookout.toml"));

        let file = if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            tracing::info!(path = %path.display(), "loading configuration file");
            Self::parse(&text, &path)?
        } else {
            FileConfig::default()
        };

        let config = Self::resolve(file, |key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn parse(text: &str, path: &Path) -> Result<FileConfig, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Merge file values with overrides looked up through `env`.
    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = data_dir();

        Self {
            camera_device: env("LOOKOUT_CAMERA_DEVICE")
                .or(file.camera_device)
                .unwrap_or_else(|| "/dev/video0".to_string()),
            max_preview_height: parse_var(&env, "LOOKOUT_MAX_PREVIEW_HEIGHT")
                .or(file.max_preview_height)
                .unwrap_or(720),
            model_path: env("LOOKOUT_MODEL_PATH")
                .map(PathBuf::from)
                .or(file.model_path)
                .unwrap_or_else(|| data_dir.join("models/det_10g.onnx")),
            frames_per_second: parse_var(&env, "LOOKOUT_FRAMES_PER_SECOND")
                .or(file.frames_per_second)
                .unwrap_or(10),
            display_width: parse_var(&env, "LOOKOUT_DISPLAY_WIDTH").or(file.display_width).unwrap_or(1280.0),
            display_height: parse_var(&env, "LOOKOUT_DISPLAY_HEIGHT").or(file.display_height).unwrap_or(720.0),
            face_api_endpoint: env("LOOKOUT_FACE_API_ENDPOINT")
                .or(file.face_api_endpoint)
                .unwrap_or_else(|| "https://westus.api.cognitive.microsoft.com/face/v1.0".to_string()),
            face_api_key: env("LOOKOUT_FACE_API_KEY")
                .or(file.face_api_key)
                .unwrap_or_default(),
            training_group_name: env("LOOKOUT_TRAINING_GROUP")
                .or(file.training_group_name)
                .unwrap_or_else(|| lookout_core::registry::DEFAULT_TRAINING_GROUP.to_string()),
            samples_per_enrollment: parse_var(&env, "LOOKOUT_SAMPLES_PER_ENROLLMENT")
                .or(file.samples_per_enrollment)
                .unwrap_or(3),
            capture_probability: parse_var(&env, "LOOKOUT_CAPTURE_PROBABILITY")
                .or(file.capture_probability)
                .unwrap_or(0.3),
            max_name_attempts: parse_var(&env, "LOOKOUT_MAX_NAME_ATTEMPTS")
                .or(file.max_name_attempts)
                .unwrap_or(24),
            training_poll_interval: Duration::from_millis(
                parse_var(&env, "LOOKOUT_TRAINING_POLL_MS")
                    .or(file.training_poll_interval_ms)
                    .unwrap_or(1000),
            ),
            identify_confidence_floor: parse_var(&env, "LOOKOUT_CONFIDENCE_FLOOR")
                .or(file.identify_confidence_floor)
                .unwrap_or(0.5),
            samples_dir: env("LOOKOUT_SAMPLES_DIR")
                .map(PathBuf::from)
                .or(file.samples_dir)
                .unwrap_or_else(|| data_dir.join("samples")),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key, reason: &str| {
            Err(ConfigError::Invalid {
                key,
                reason: reason.to_string(),
            })
        };
        if self.frames_per_second == 0 {
            return invalid("frames_per_second", "must be positive");
        }
        if self.samples_per_enrollment == 0 {
            return invalid("samples_per_enrollment", "must be at least 1");
        }
        if !(self.capture_probability > 0.0 && self.capture_probability <= 1.0) {
            return invalid("capture_probability", "must be in (0, 1]");
        }
        if self.max_name_attempts == 0 {
            return invalid("max_name_attempts", "must be at least 1");
        }
        Ok(())
    }

    /// Scheduler period derived from the frame rate.
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.frames_per_second.max(1)))
    }
}

fn parse_var<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.parse().ok())
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".local/share"))
        .join("lookout")
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".config"))
        .join("lookout")
}

fn home() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}
