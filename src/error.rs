use camino::Utf8PathBuf;
use thiserror::Error;

use crate::TaskId;

pub use anyhow::Error as RuntimeError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unit '{unit}' failed to load:\n{source:#}")]
    Discovery {
        unit: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid task graph:\n{0}")]
    Graph(#[from] GraphError),

    #[error("Task '{task}' failed:\n{source:#}")]
    Task {
        task: TaskId,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid configuration:\n{0}")]
    Config(#[from] ConfigError),
}

/// Structural problems with the assembled registry, always reported before
/// any task runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Cycle detected in task graph, '{0}' depends on itself")]
    Cycle(TaskId),

    #[error("Task '{task}' depends on '{dependency}', which is not registered")]
    MissingDependency { task: TaskId, dependency: TaskId },

    #[error("Task '{task}' is declared by both '{first}' and '{second}'")]
    Duplicate {
        task: TaskId,
        first: String,
        second: String,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file {path}.\n{source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't parse config file {path}.\n{source}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}:\n{source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't (de)serialize state.\n{0}")]
    Json(#[from] serde_json::Error),
}
