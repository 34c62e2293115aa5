//! Parameter Persistence
//!
//! A thin collaborator that saves and loads a classifier's name-keyed
//! parameter mapping as JSON. The default location is a `saved/`
//! directory relative to the working directory; the `_in` variants take
//! an explicit directory for callers (and tests) that need one.
//!
//! A missing file on load is not an error: it is reported on stdout and
//! surfaced as `Ok(None)`, so callers can fall back to fresh parameters.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::tensor::Tensor;

/// Directory (relative to the working directory) used by
/// [`save_params`] and [`load_params`].
pub const SAVE_DIR: &str = "saved";

fn param_file(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.json"))
}

/// Save a parameter mapping under [`SAVE_DIR`]
///
/// Creates the directory if needed and writes `<name>.json`.
pub fn save_params(params: &BTreeMap<String, Tensor>, name: &str) -> io::Result<PathBuf> {
    save_params_in(Path::new(SAVE_DIR), params, name)
}

/// Save a parameter mapping under an explicit directory
pub fn save_params_in(
    dir: &Path,
    params: &BTreeMap<String, Tensor>,
    name: &str,
) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let json = serde_json::to_string(params)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let path = param_file(dir, name);
    fs::write(&path, json)?;
    println!("{name} saved.");
    Ok(path)
}

/// Load a parameter mapping from [`SAVE_DIR`]
///
/// Returns `Ok(None)` (after reporting on stdout) when no file with this
/// name exists; I/O and parse failures are real errors.
pub fn load_params(name: &str) -> io::Result<Option<BTreeMap<String, Tensor>>> {
    load_params_in(Path::new(SAVE_DIR), name)
}

/// Load a parameter mapping from an explicit directory
pub fn load_params_in(dir: &Path, name: &str) -> io::Result<Option<BTreeMap<String, Tensor>>> {
    let path = param_file(dir, name);
    if !path.exists() {
        println!("{name} not available.");
        return Ok(None);
    }
    let json = fs::read_to_string(&path)?;
    let params = serde_json::from_str(&json)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    println!("{name} loaded.");
    Ok(Some(params))
}
