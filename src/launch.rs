//! Entry point used by the binary: load config, run, record.

use std::path::PathBuf;

use tracing::info;

use crate::backend::{BackendKind, ConfiguredDevices};
use crate::config;
use crate::dispatch::{self, RunError, RunOutcome};
use crate::modes::{EvalParams, mode_by_name};
use crate::recorder::{Recorder, Summary};

/// Options of one `train` or `predict` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchParams {
    pub mode: String,
    pub train: bool,
    pub dumpfns: Vec<PathBuf>,
    pub eval: EvalParams,
}

/// Load the layered config, run, and dump a run record when `record` is set.
pub fn launch(
    config_paths: &[PathBuf],
    record: bool,
    params: &LaunchParams,
) -> Result<RunOutcome, RunError> {
    let mode =
        mode_by_name(&params.mode).ok_or_else(|| RunError::UnknownMode(params.mode.clone()))?;
    let mut conf = config::load_layered(config_paths)?;
    conf.general.backend = BackendKind::resolve(conf.general.backend);
    let mut recorder = Recorder::new(&conf);
    let mut summary = Summary::new();
    let devices = ConfiguredDevices::from_config(&conf);
    info!(
        "{} in {} mode with backend {:?}",
        if params.train { "Training" } else { "Predicting" },
        mode.name(),
        devices.kind()
    );
    let outcome = dispatch::run(
        &conf,
        mode,
        params.train,
        &params.dumpfns,
        &params.eval,
        &devices,
        &mut summary,
    )?;
    recorder.record(&summary);
    if record {
        recorder.dump()?;
    }
    Ok(outcome)
}
