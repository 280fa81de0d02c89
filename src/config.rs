use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::registry::DuplicatePolicy;
use crate::tracking::STACK_DEPTH;

/// Settings of a [`Kernel`](crate::Kernel) run.
///
/// Every field has a default, so an empty file is a valid config:
///
/// ```toml
/// nodes_dir = "src/nodes"
/// data_dir = "data"
/// duplicates = "reject"
/// stack_depth = 5
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory scanned for unit manifests.
    pub nodes_dir: Utf8PathBuf,
    /// Root of the tracked local store.
    pub data_dir: Utf8PathBuf,
    pub duplicates: DuplicatePolicy,
    /// Call frames kept per recorded access.
    pub stack_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nodes_dir: Utf8PathBuf::from("src/nodes"),
            data_dir: Utf8PathBuf::from("data"),
            duplicates: DuplicatePolicy::default(),
            stack_depth: STACK_DEPTH,
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;

        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    pub fn nodes_dir(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.nodes_dir = path.into();
        self
    }

    pub fn data_dir(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    pub fn duplicates(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicates = policy;
        self
    }

    pub fn stack_depth(mut self, depth: usize) -> Self {
        self.stack_depth = depth;
        self
    }
}
