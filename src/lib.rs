#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod config;
mod context;
mod core;
mod error;
mod executor;
mod graph;
pub mod loader;
mod registry;
mod store;
mod tracking;
mod utils;

use std::time::Instant;

use camino::Utf8Path;

pub use crate::config::Config;
pub use crate::context::TaskContext;
pub use crate::core::{Task, TaskId, TaskResult};
pub use crate::error::*;
pub use crate::executor::{Diagnostics, TaskExecution};
pub use crate::graph::Dag;
pub use crate::loader::{Catalog, Loader, ManifestUnit, Pair, Unit, unit};
pub use crate::registry::{DuplicatePolicy, Entry, Registry};
pub use crate::store::Store;
pub use crate::tracking::{IoRecord, Operation, Provenance, STACK_DEPTH};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;

/// The whole pipeline: unit discovery, graph assembly and execution.
///
/// ```rust,no_run
/// use sluice::{Catalog, Config, Kernel};
///
/// let config = Config::default().nodes_dir("nodes");
/// let store = sluice::Store::new(&config.data_dir);
///
/// let mut catalog = Catalog::new();
/// catalog.add("fetch_a", move |ctx| {
///     store.save_raw(ctx, "a", "json", br#"{"rows": []}"#)?;
///     Ok(())
/// });
///
/// let kernel = Kernel::new(config, catalog);
/// let tracker = kernel.tracker();
/// let diagnostics = kernel.run(&tracker).unwrap();
///
/// println!("{diagnostics}");
/// ```
pub struct Kernel {
    config: Config,
    loader: Loader,
}

impl Kernel {
    pub fn new(config: Config, catalog: Catalog) -> Self {
        let loader = Loader::new(catalog)
            .scan(config.nodes_dir.clone())
            .duplicates(config.duplicates);

        Self { config, loader }
    }

    /// Reads the config from a TOML file at `path`.
    pub fn from_file(path: impl AsRef<Utf8Path>, catalog: Catalog) -> Result<Self, Error> {
        let config = Config::from_file(path)?;
        Ok(Self::new(config, catalog))
    }

    /// Registers a unit declared in code. These load after the units found
    /// in the nodes directory.
    pub fn add_unit(mut self, unit: impl Unit + 'static) -> Self {
        self.loader = self.loader.add_unit(unit);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A store rooted at the configured data directory.
    pub fn store(&self) -> Store {
        Store::new(self.config.data_dir.clone())
    }

    /// A fresh tracker keeping as many frames as configured.
    pub fn tracker(&self) -> Provenance {
        Provenance::with_depth(self.config.stack_depth)
    }

    /// Discovers every unit and assembles the graph without running it.
    pub fn plan(&self) -> Result<Dag, Error> {
        let registry = self.loader.load()?;
        let dag = Dag::new(registry)?;

        tracing::debug!("task graph:\n{dag}");

        Ok(dag)
    }

    /// Runs the pipeline from scratch.
    ///
    /// The previous trace held by `tracker` is discarded first. Discovery and
    /// graph errors are reported before any task starts, a failing task stops
    /// the run.
    pub fn run(&self, tracker: &Provenance) -> Result<Diagnostics, Error> {
        let s = Instant::now();

        tracker.clear_tracking();

        let dag = self.plan()?;
        let diagnostics = dag.run(tracker)?;

        tracing::info!("pipeline done {}", utils::as_overhead(s));

        Ok(diagnostics)
    }
}
