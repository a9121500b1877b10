use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::faces::ClusterParams;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub faces: FacesConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    /// Number of concurrent feature extractions.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Maximum number of new files to extract per run.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
            concurrency: default_concurrency(),
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Neighbor radius on unit-normalized embeddings (inclusive).
    #[serde(default = "default_eps")]
    pub eps: f32,

    /// Neighborhood size (including the point itself) needed to seed a cluster.
    #[serde(default = "default_min_neighbors")]
    pub min_neighbors: usize,
}

impl ClusteringConfig {
    pub fn params(&self) -> ClusterParams {
        ClusterParams {
            eps: self.eps,
            min_neighbors: self.min_neighbors,
        }
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            eps: default_eps(),
            min_neighbors: default_min_neighbors(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacesConfig {
    /// Where the ONNX detection and embedding models are cached.
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    #[serde(default = "default_detection_threshold")]
    pub detection_threshold: f32,

    #[serde(default = "default_nms_threshold")]
    pub nms_threshold: f32,

    /// ONNX Runtime intra-op threads per session.
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

impl Default for FacesConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            detection_threshold: default_detection_threshold(),
            nms_threshold: default_nms_threshold(),
            intra_threads: default_intra_threads(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogBackend {
    #[default]
    Stderr,
    File,
    Journald,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub backend: LogBackend,

    /// Directory for the `file` backend.
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            backend: LogBackend::default(),
            dir: default_log_dir(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("facegroup")
        .join("catalog.db")
}

fn default_image_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "tif", "tiff", "bmp", "gif", "webp"]
        .iter()
        .map(|e| e.to_string())
        .collect()
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_eps() -> f32 {
    0.5
}

fn default_min_neighbors() -> usize {
    2
}

fn default_model_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("facegroup")
        .join("models")
}

fn default_detection_threshold() -> f32 {
    0.7
}

fn default_nms_threshold() -> f32 {
    0.3
}

fn default_intra_threads() -> usize {
    1
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("facegroup")
        .join("logs")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            scanner: ScannerConfig::default(),
            clustering: ClusteringConfig::default(),
            faces: FacesConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load from `$FACEGROUP_CONFIG` or the default location, writing a
    /// default config file on first use.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    /// Load from an explicit path. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("facegroup")
    }

    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("FACEGROUP_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }
}
