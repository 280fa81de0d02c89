//! Discovery of task units.
//!
//! A unit is anything that can declare producer/transform pairs. Units come
//! from two places: TOML manifests found in a directory ([`ManifestUnit`]),
//! and types implementing [`Unit`] registered with the [`Loader`] in code.
//! Task functions themselves are never loaded dynamically, manifests refer to
//! them by the names they were given in a [`Catalog`].
//!
//! Loading is all or nothing. If any unit fails to load, the whole discovery
//! pass fails and nothing gathered so far is kept.

mod catalog;
mod manifest;

use std::borrow::Cow;
use std::time::Instant;

use camino::Utf8PathBuf;

use crate::registry::{DuplicatePolicy, Registry};
use crate::{Error, Task, TaskResult};

pub use catalog::Catalog;
pub use manifest::ManifestUnit;

/// A producer task and the transform task which depends on it, if any.
#[derive(Debug, Clone)]
pub struct Pair {
    pub producer: Task,
    pub transform: Option<Task>,
}

impl Pair {
    pub fn new(producer: Task, transform: Task) -> Self {
        Self {
            producer,
            transform: Some(transform),
        }
    }

    pub fn producer(producer: Task) -> Self {
        Self {
            producer,
            transform: None,
        }
    }
}

/// Something which declares zero or more producer/transform pairs.
pub trait Unit {
    /// Name used in diagnostics and errors.
    fn name(&self) -> Cow<'_, str>;

    /// Loads the unit. Any error aborts the discovery pass.
    fn pairs(&self, catalog: &Catalog) -> anyhow::Result<Vec<Pair>>;
}

/// A unit defined by a closure.
pub struct FnUnit<F> {
    name: Cow<'static, str>,
    func: F,
}

/// Creates a [`Unit`] from a name and a closure returning its pairs.
pub fn unit<F>(name: impl Into<Cow<'static, str>>, func: F) -> FnUnit<F>
where
    F: Fn(&Catalog) -> TaskResult<Vec<Pair>>,
{
    FnUnit {
        name: name.into(),
        func,
    }
}

impl<F> Unit for FnUnit<F>
where
    F: Fn(&Catalog) -> TaskResult<Vec<Pair>>,
{
    fn name(&self) -> Cow<'_, str> {
        Cow::from(self.name.as_ref())
    }

    fn pairs(&self, catalog: &Catalog) -> anyhow::Result<Vec<Pair>> {
        (self.func)(catalog)
    }
}

/// Collects units and turns them into a [`Registry`].
pub struct Loader {
    catalog: Catalog,
    dir: Option<Utf8PathBuf>,
    units: Vec<Box<dyn Unit>>,
    duplicates: DuplicatePolicy,
}

impl Loader {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            dir: None,
            units: Vec::new(),
            duplicates: DuplicatePolicy::default(),
        }
    }

    /// Scans `dir` for unit manifests when loading. Directory units are loaded
    /// before the ones added with [`add_unit`](Self::add_unit).
    pub fn scan(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn add_unit(mut self, unit: impl Unit + 'static) -> Self {
        self.units.push(Box::new(unit));
        self
    }

    pub fn duplicates(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicates = policy;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Loads every unit, in order, into a fresh registry.
    pub fn load(&self) -> Result<Registry, Error> {
        let s = Instant::now();

        let found = match &self.dir {
            Some(dir) => {
                tracing::info!("loading units from {dir}");
                manifest::discover(dir).map_err(|source| failed(dir.as_str(), source))?
            }
            None => Vec::new(),
        };

        let units = found
            .iter()
            .map(|unit| unit as &dyn Unit)
            .chain(self.units.iter().map(|unit| unit.as_ref() as &dyn Unit));

        let mut registry = Registry::new(self.duplicates);
        let mut count = 0;

        for unit in units {
            let name = unit.name();

            let pairs = unit
                .pairs(&self.catalog)
                .map_err(|source| failed(&name, source))?;

            tracing::debug!(unit = %name, pairs = pairs.len(), "loaded unit");

            for pair in pairs {
                registry.insert_pair(&name, pair.producer, pair.transform)?;
            }

            count += 1;
        }

        tracing::info!(
            "loaded {} tasks from {} units {}",
            registry.len(),
            count,
            crate::utils::as_overhead(s)
        );

        Ok(registry)
    }
}

/// Every discovery failure is logged here before it is returned.
fn failed(unit: &str, source: anyhow::Error) -> Error {
    tracing::error!("error loading {unit}: {source:#}");
    Error::Discovery {
        unit: unit.to_string(),
        source,
    }
}
