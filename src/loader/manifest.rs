use std::borrow::Cow;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use glob::{Pattern, glob};
use serde::Deserialize;

use crate::loader::{Catalog, Pair, Unit};

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    nodes: Vec<NodeDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NodeDecl {
    producer: String,
    transform: Option<String>,
}

/// A unit declared by a TOML file on disk.
///
/// The file may hold an array of `[[nodes]]` tables, each naming a producer
/// task and optionally a transform task. The names must be present in the
/// [`Catalog`]. A file without `nodes` declares nothing.
#[derive(Debug, Clone)]
pub struct ManifestUnit {
    path: Utf8PathBuf,
}

impl ManifestUnit {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Unit for ManifestUnit {
    fn name(&self) -> Cow<'_, str> {
        Cow::from(self.path.file_stem().unwrap_or(self.path.as_str()))
    }

    fn pairs(&self, catalog: &Catalog) -> anyhow::Result<Vec<Pair>> {
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("couldn't read {}", self.path))?;

        let manifest: Manifest =
            toml::from_str(&text).with_context(|| format!("couldn't parse {}", self.path))?;

        let resolve = |name: &str| {
            catalog
                .get(name)
                .cloned()
                .with_context(|| format!("task '{name}' is not in the catalog"))
        };

        manifest
            .nodes
            .iter()
            .map(|decl| {
                Ok::<_, anyhow::Error>(Pair {
                    producer: resolve(&decl.producer)?,
                    transform: decl.transform.as_deref().map(resolve).transpose()?,
                })
            })
            .collect()
    }
}

/// Lists the unit manifests in `dir`, sorted by path. Files starting with an
/// underscore are private and skipped. A missing directory yields no units.
pub(crate) fn discover(dir: &Utf8Path) -> anyhow::Result<Vec<ManifestUnit>> {
    if !dir.is_dir() {
        tracing::warn!("nodes directory not found: {dir}");
        return Ok(vec![]);
    }

    let pattern = format!("{}/*.toml", Pattern::escape(dir.as_str()));
    let mut units = Vec::new();

    for path in glob(&pattern)? {
        let path = Utf8PathBuf::try_from(path?)?;

        if path.file_name().is_some_and(|name| name.starts_with('_')) {
            tracing::debug!("skipping private unit {path}");
            continue;
        }

        units.push(ManifestUnit::new(path));
    }

    units.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(units)
}
