//! Run configuration loaded from one or more layered TOML files.

mod defaults;
mod io;
mod types;

pub use io::{load, load_layered, merge_tables};
pub use types::{
    ConfigError, DataSettings, EnsembleSettings, GeneralSettings, PathSettings, RankSettings,
    RunConfig, StartupSettings,
};
