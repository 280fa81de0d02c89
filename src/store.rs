use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;

use crate::TaskContext;
use crate::error::StoreError;

/// Artifacts on the local disk, rooted at [`Config::data_dir`](crate::Config).
///
/// Raw payloads live under `raw/` and completion markers under `state/`.
/// Every access goes through a [`TaskContext`], so it shows up in the
/// provenance trace under a key relative to the root, e.g. `raw/a.json`.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn raw_path(&self, asset_id: &str, ext: &str) -> Utf8PathBuf {
        self.root.join(raw_key(asset_id, ext))
    }

    pub fn state_path(&self, asset: &str) -> Utf8PathBuf {
        self.root.join(state_key(asset))
    }

    pub fn save_raw(
        &self,
        ctx: &TaskContext<'_>,
        asset_id: &str,
        ext: &str,
        bytes: impl AsRef<[u8]>,
    ) -> Result<Utf8PathBuf, StoreError> {
        let path = self.raw_path(asset_id, ext);
        write(&path, bytes.as_ref())?;
        ctx.record_write(raw_key(asset_id, ext));
        Ok(path)
    }

    pub fn load_raw(
        &self,
        ctx: &TaskContext<'_>,
        asset_id: &str,
        ext: &str,
    ) -> Result<Vec<u8>, StoreError> {
        let path = self.raw_path(asset_id, ext);
        let bytes = fs::read(&path).map_err(|source| StoreError::Io { path, source })?;
        ctx.record_read(raw_key(asset_id, ext));
        Ok(bytes)
    }

    /// Writes a JSON completion marker for `asset`.
    pub fn save_state(
        &self,
        ctx: &TaskContext<'_>,
        asset: &str,
        value: &Value,
    ) -> Result<Utf8PathBuf, StoreError> {
        let path = self.state_path(asset);
        write(&path, &serde_json::to_vec_pretty(value)?)?;
        ctx.record_write(state_key(asset));
        Ok(path)
    }

    /// Reads the completion marker for `asset`. An asset which was never
    /// marked has an empty object as its state.
    pub fn load_state(&self, ctx: &TaskContext<'_>, asset: &str) -> Result<Value, StoreError> {
        let path = self.state_path(asset);

        let value = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Value::Object(Default::default()),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        ctx.record_read(state_key(asset));
        Ok(value)
    }
}

fn raw_key(asset_id: &str, ext: &str) -> String {
    format!("raw/{asset_id}.{ext}")
}

fn state_key(asset: &str) -> String {
    format!("state/{asset}.json")
}

fn write(path: &Utf8Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_owned(),
            source,
        })?;
    }

    fs::write(path, bytes).map_err(|source| StoreError::Io {
        path: path.to_owned(),
        source,
    })
}
