use candor_core::classifier::FERPLUS_LABELS;
use candor_core::insight::DEFAULT_GEMINI_MODEL;
use candor_core::sampling::Stride;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("frame stride must be at least 1")]
    InvalidStride,
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

impl FromStr for BusKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "system" => Ok(Self::System),
            _ => Err(()),
        }
    }
}

/// Daemon configuration.
///
/// Defaults, then the optional TOML file named by `CANDOR_CONFIG`, then
/// `CANDOR_*` environment variables, each layer overriding the previous.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// SCRFD face detector file name inside `model_dir`.
    pub detector_model: String,
    /// Emotion classifier file name inside `model_dir`.
    pub classifier_model: String,
    /// Classifier output categories, in model output order.
    pub emotion_labels: Vec<String>,
    /// V4L2 device path; capture is unavailable if it cannot be opened.
    pub camera_device: String,
    pub stride: Stride,
    /// Destination of `ExportReport`.
    pub report_path: PathBuf,
    /// Text generation is disabled when unset.
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    /// Upper bound on any single engine request (frame analysis, stream run).
    pub analysis_timeout_secs: u64,
    /// Upper bound on one text-generation request.
    pub insight_timeout_secs: u64,
    /// Default camera capture length.
    pub capture_seconds: u64,
    pub bus: BusKind,
    /// Frames discarded at the start of each camera capture.
    pub warmup_frames: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            model_dir: data_dir.join("models"),
            detector_model: "det_10g.onnx".to_string(),
            classifier_model: "emotion-ferplus-8.onnx".to_string(),
            emotion_labels: FERPLUS_LABELS.iter().map(|s| s.to_string()).collect(),
            camera_device: "/dev/video0".to_string(),
            stride: Stride::default(),
            report_path: data_dir.join("reports/candidate_analysis.json"),
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            analysis_timeout_secs: 600,
            insight_timeout_secs: 60,
            capture_seconds: 30,
            bus: BusKind::Session,
            warmup_frames: 4,
        }
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("candor")
}

impl Config {
    /// Load from `CANDOR_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("CANDOR_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Override fields from environment-style lookups.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("CANDOR_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CANDOR_DETECTOR_MODEL") {
            self.detector_model = v;
        }
        if let Some(v) = lookup("CANDOR_CLASSIFIER_MODEL") {
            self.classifier_model = v;
        }
        if let Some(v) = lookup("CANDOR_EMOTION_LABELS") {
            self.emotion_labels = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = lookup("CANDOR_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("CANDOR_REPORT_PATH") {
            self.report_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("CANDOR_GEMINI_API_KEY").or_else(|| lookup("GEMINI_API_KEY")) {
            self.gemini_api_key = Some(v);
        }
        if let Some(v) = lookup("CANDOR_GEMINI_MODEL") {
            self.gemini_model = v;
        }

        let stride = env_parse(&lookup, "CANDOR_FRAME_STRIDE", self.stride.get())?;
        self.stride = Stride::new(stride).map_err(|_| ConfigError::InvalidStride)?;
        self.analysis_timeout_secs = env_parse(&lookup, "CANDOR_ANALYSIS_TIMEOUT_SECS", self.analysis_timeout_secs)?;
        self.insight_timeout_secs = env_parse(&lookup, "CANDOR_INSIGHT_TIMEOUT_SECS", self.insight_timeout_secs)?;
        self.capture_seconds = env_parse(&lookup, "CANDOR_CAPTURE_SECONDS", self.capture_seconds)?;
        self.warmup_frames = env_parse(&lookup, "CANDOR_WARMUP_FRAMES", self.warmup_frames)?;
        self.bus = env_parse(&lookup, "CANDOR_BUS", self.bus)?;

        // An empty key means "disabled", same as unset.
        if self.gemini_api_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            self.gemini_api_key = None;
        }
        Ok(())
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    pub fn classifier_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.classifier_model)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn insight_timeout(&self) -> Duration {
        Duration::from_secs(self.insight_timeout_secs)
    }
}

fn env_parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    current: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(current),
    }
}
