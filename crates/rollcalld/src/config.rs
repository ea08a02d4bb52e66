use rollcall_core::PipelineConfig;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Capacity of the engine request channel.
    pub queue_depth: usize,
    /// Default `device_info` for records when the caller sends none.
    pub device_info: Option<String>,
    /// Serve on the system bus instead of the session bus.
    pub system_bus: bool,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`], reading variables through `get`.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = get("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = get("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let model_dir = get("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("models"));
        let db_path = get("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("attendance.db"));

        let mut pipeline = match get("ROLLCALL_CONFIG") {
            Some(path) => load_pipeline_file(PathBuf::from(path))?,
            None => PipelineConfig::default(),
        };
        override_from(&get, "ROLLCALL_RECOGNITION_THRESHOLD", &mut pipeline.recognition_threshold);
        override_from(&get, "ROLLCALL_MIN_QUALITY_SCORE", &mut pipeline.min_quality_score);
        override_from(&get, "ROLLCALL_DAILY_LIMIT", &mut pipeline.daily_limit);
        override_from(&get, "ROLLCALL_MIN_BLINKS", &mut pipeline.min_blinks);
        override_from(&get, "ROLLCALL_TRUST_SHORTCUT_BLINKS", &mut pipeline.trust_shortcut_blinks);
        override_from(&get, "ROLLCALL_EAR_THRESHOLD", &mut pipeline.ear_closed_threshold);

        Ok(Self {
            model_dir,
            db_path,
            queue_depth: get("ROLLCALL_QUEUE_DEPTH")
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(4),
            device_info: get("ROLLCALL_DEVICE_INFO").filter(|v| !v.trim().is_empty()),
            system_bus: get("ROLLCALL_BUS").is_some_and(|v| v == "system"),
            pipeline,
        })
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_path("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_path("w600k_r50.onnx")
    }

    /// Path to the 68-point landmark model.
    pub fn landmark_model_path(&self) -> String {
        self.model_path("landmarks_68.onnx")
    }

    fn model_path(&self, file: &str) -> String {
        self.model_dir.join(file).to_string_lossy().into_owned()
    }
}

fn load_pipeline_file(path: PathBuf) -> Result<PipelineConfig, ConfigError> {
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(source) => return Err(ConfigError::Read { path, source }),
    };
    toml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })
}

/// Replace `slot` when the variable is set and parses; otherwise keep it.
fn override_from<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = get(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable config override"),
    }
}
