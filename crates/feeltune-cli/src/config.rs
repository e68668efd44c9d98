use feeltune_catalog::{RetryPolicy, SpotifyCredentials};
use feeltune_core::detector::{DEFAULT_MIN_NEIGHBORS, DEFAULT_SCALE_FACTOR};
use feeltune_core::{DetectionParams, ModelFiles};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Application configuration: defaults, then an optional TOML file, then
/// `FEELTUNE_*` environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub models: ModelConfig,
    pub detection: DetectionConfig,
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory containing the ONNX model files.
    pub dir: PathBuf,
    /// SCRFD face detector file name.
    pub detector: String,
    /// Expression classifier graph file name.
    pub classifier: String,
    /// Expression classifier weights file name.
    pub classifier_weights: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models"),
            detector: "det_10g.onnx".to_string(),
            classifier: "fer.onnx".to_string(),
            classifier_weights: "fer.onnx.data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub scale_factor: f32,
    pub min_neighbors: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Attempts per catalog call, first one included.
    pub retry_attempts: u32,
    /// Delay before the first retry; doubles for each further retry.
    pub retry_delay_secs: u64,
    pub http_timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            client_id: None,
            client_secret: None,
            retry_attempts: retry.max_attempts,
            retry_delay_secs: retry.initial_delay.as_secs(),
            http_timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for CatalogConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay_secs", &self.retry_delay_secs)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish()
    }
}

impl Config {
    /// Load from an optional TOML file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from environment variables, read through `lookup`.
    /// Blank values are treated as unset.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = lookup("FEELTUNE_MODEL_DIR") {
            self.models.dir = PathBuf::from(dir);
        }
        if let Some(name) = lookup("FEELTUNE_DETECTOR_MODEL") {
            self.models.detector = name;
        }
        if let Some(name) = lookup("FEELTUNE_CLASSIFIER_MODEL") {
            self.models.classifier = name;
        }
        if let Some(name) = lookup("FEELTUNE_CLASSIFIER_WEIGHTS") {
            self.models.classifier_weights = name;
        }

        env_parse(&lookup, "FEELTUNE_SCALE_FACTOR", &mut self.detection.scale_factor);
        env_parse(&lookup, "FEELTUNE_MIN_NEIGHBORS", &mut self.detection.min_neighbors);
        env_parse(&lookup, "FEELTUNE_RETRY_ATTEMPTS", &mut self.catalog.retry_attempts);
        env_parse(&lookup, "FEELTUNE_RETRY_DELAY_SECS", &mut self.catalog.retry_delay_secs);
        env_parse(&lookup, "FEELTUNE_HTTP_TIMEOUT_SECS", &mut self.catalog.http_timeout_secs);

        if let Some(id) = lookup("SPOTIPY_CLIENT_ID") {
            self.catalog.client_id = Some(id);
        }
        if let Some(secret) = lookup("SPOTIPY_CLIENT_SECRET") {
            self.catalog.client_secret = Some(secret);
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.models
            .dir
            .join(&self.models.detector)
            .to_string_lossy()
            .into_owned()
    }

    /// Paths of the expression classifier graph and weights.
    pub fn classifier_files(&self) -> ModelFiles {
        ModelFiles {
            topology: self.models.dir.join(&self.models.classifier),
            weights: self.models.dir.join(&self.models.classifier_weights),
        }
    }

    pub fn detection_params(&self) -> DetectionParams {
        DetectionParams {
            scale_factor: self.detection.scale_factor,
            min_neighbors: self.detection.min_neighbors,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.catalog.retry_attempts,
            initial_delay: Duration::from_secs(self.catalog.retry_delay_secs),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.catalog.http_timeout_secs)
    }

    /// Catalog credentials, if both parts are present and non-empty.
    pub fn credentials(&self) -> Option<SpotifyCredentials> {
        SpotifyCredentials::new(
            self.catalog.client_id.clone(),
            self.catalog.client_secret.clone(),
        )
    }
}

/// Parse `key` into `target`; unparsable values are ignored with a warning.
fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment value"),
    }
}
