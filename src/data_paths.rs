//! Purpose: Resolve the data directory shared by `serve` and the offline commands.
//! Exports: `default_data_dir`.
//! Invariants: Default data directory remains `~/.csvd/data`.

use std::path::PathBuf;

pub(crate) fn default_data_dir() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".csvd").join("data")
}
