use std::path::{Path, PathBuf};

use toml::{Table, Value};
use tracing::debug;

use super::types::{ConfigError, RunConfig, resolve_relative};

/// Load a single configuration file.
pub fn load(path: &Path) -> Result<RunConfig, ConfigError> {
    load_layered(&[path.to_path_buf()])
}

/// Load several configuration files, later files overriding earlier ones key by key.
///
/// An empty list yields the defaults. A relative `data.dir` resolves against the
/// directory of the file that sets it.
pub fn load_layered(paths: &[PathBuf]) -> Result<RunConfig, ConfigError> {
    let mut merged = Table::new();
    for path in paths {
        let mut table = read_table(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        anchor_data_dir(&mut table, base_dir);
        merge_tables(&mut merged, table);
        debug!("Merged config layer {}", path.display());
    }
    let mut config: RunConfig = Value::Table(merged)
        .try_into()
        .map_err(|err: toml::de::Error| ConfigError::Invalid(err.to_string()))?;
    if config.data.dir.is_relative() {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        config.data.dir = resolve_relative(&config.data.dir, &cwd);
    }
    Ok(config.normalized())
}

/// Recursively merge `overlay` into `base`; tables merge, other values replace.
pub fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn read_table(path: &Path) -> Result<Table, ConfigError> {
    let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    data.parse::<Table>().map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn anchor_data_dir(table: &mut Table, base_dir: &Path) {
    let Some(Value::Table(data)) = table.get_mut("data") else {
        return;
    };
    let Some(Value::String(dir)) = data.get_mut("dir") else {
        return;
    };
    let resolved = resolve_relative(Path::new(dir.as_str()), base_dir);
    *dir = resolved.to_string_lossy().into_owned();
}
