//! CLI commands

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::{Error, Result};

pub mod compile;
pub mod schema;

/// Read and parse a YAML file, naming the file in errors
pub(crate) fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&content).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })
}
