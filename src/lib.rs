//! Training and (ensemble) prediction for pairwise entity-linking models.
/// Application directories for logs and run records.
pub mod app_dirs;
/// Numerical backends and scoring device acquisition.
pub mod backend;
/// Layered TOML run configuration.
pub mod config;
/// Train/predict control flow.
pub mod dispatch;
/// Process-isolated ensemble prediction.
pub mod ensemble;
/// Named feature arrays and their archive format.
pub mod features;
/// Binary entry point helpers.
pub mod launch;
/// Logging setup.
pub mod logging;
/// Ranking and classification metrics.
pub mod metrics;
/// Model artifacts, custom layers and inference.
pub mod model;
/// Ranking and classification modes.
pub mod modes;
/// Single-model prediction.
pub mod predictor;
/// Run summaries and records.
pub mod recorder;
/// Sample archives.
pub mod samples;
/// Startup scripts.
pub mod startup;
/// Head training.
pub mod train;
