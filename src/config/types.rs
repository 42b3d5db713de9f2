use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::defaults::{
    clamp_batch_size, clamp_worker_count, default_batch_size, default_data_dir, default_epochs,
    default_hidden_size, default_l2, default_learning_rate, default_run_name, default_seed,
    default_train_file, default_val_file, default_worker_count,
};
use crate::backend::BackendKind;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// A configuration file is not valid TOML.
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// The merged configuration does not match the expected layout.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Immutable bundle of run parameters.
///
/// Config keys (TOML): `general`, `rank`, `data`, `startup`, `ensemble`, `paths`.
/// The struct is serializable because every ensemble task carries a copy of it
/// into its worker process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub rank: RankSettings,
    #[serde(default)]
    pub data: DataSettings,
    #[serde(default)]
    pub startup: StartupSettings,
    #[serde(default)]
    pub ensemble: EnsembleSettings,
    #[serde(default)]
    pub paths: PathSettings,
}

impl RunConfig {
    /// Parse a single TOML document. Relative data paths resolve against `base_dir`.
    pub fn from_toml_str(data: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let mut config: RunConfig =
            toml::from_str(data).map_err(|err| ConfigError::Invalid(err.to_string()))?;
        config.data.dir = resolve_relative(&config.data.dir, base_dir);
        Ok(config.normalized())
    }

    pub(super) fn normalized(mut self) -> Self {
        self.rank.batch_size = clamp_batch_size(self.rank.batch_size);
        self.rank.workers = clamp_worker_count(self.rank.workers);
        self
    }

    /// Number of concurrent ensemble workers; an unset or zero count means one.
    pub fn worker_count(&self) -> usize {
        clamp_worker_count(self.rank.workers).max(1) as usize
    }

    /// Path of the training sample archive.
    pub fn train_path(&self) -> PathBuf {
        self.data.dir.join(&self.data.train)
    }

    /// Path of the validation sample archive.
    pub fn val_path(&self) -> PathBuf {
        self.data.dir.join(&self.data.val)
    }
}

/// Run-wide settings.
///
/// Config keys: `backend`, `seed`, `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Numerical backend used for inference.
    #[serde(default)]
    pub backend: BackendKind,
    /// Seed for weight initialisation and shuffling.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Label used for recorded run files.
    #[serde(default = "default_run_name")]
    pub name: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            seed: default_seed(),
            name: default_run_name(),
        }
    }
}

/// Training and prediction parameters of the ranking network.
///
/// Config keys: `batch_size`, `workers`, `epochs`, `learning_rate`, `l2`, `hidden_size`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankSettings {
    /// Rows per inference (and training) batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Ensemble worker pool size (0 = 1).
    #[serde(default = "default_worker_count")]
    pub workers: u32,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    #[serde(default = "default_l2")]
    pub l2: f32,
    /// Encoder width for newly trained models.
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
}

impl Default for RankSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: default_worker_count(),
            epochs: default_epochs(),
            learning_rate: default_learning_rate(),
            l2: default_l2(),
            hidden_size: default_hidden_size(),
        }
    }
}

/// Sample archive locations.
///
/// Config keys: `dir`, `train`, `val`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSettings {
    #[serde(default = "default_data_dir_path")]
    pub dir: PathBuf,
    #[serde(default = "default_train_file")]
    pub train: String,
    #[serde(default = "default_val_file")]
    pub val: String,
}

fn default_data_dir_path() -> PathBuf {
    PathBuf::from(default_data_dir())
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            dir: default_data_dir_path(),
            train: default_train_file(),
            val: default_val_file(),
        }
    }
}

/// Commands run once per process before training or prediction.
///
/// Config keys: `scripts`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartupSettings {
    #[serde(default)]
    pub scripts: Vec<String>,
}

/// Ensemble worker launch settings.
///
/// Config keys: `worker_program`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSettings {
    /// Executable that serves `ensemble-worker`; empty means the current executable.
    #[serde(default)]
    pub worker_program: Option<PathBuf>,
}

/// Output locations.
///
/// Config keys: `runs_dir`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathSettings {
    /// Directory for recorded runs; unset means `<app root>/runs`.
    #[serde(default)]
    pub runs_dir: Option<PathBuf>,
}

pub(super) fn resolve_relative(path: &Path, base_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
