//! Read-through cache of parsed mapping and classification tables.
//!
//! Tables are loaded once per path and encoding and never mutated
//! afterwards, so one cache can be shared by every worker of a run.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use anyhow::{Result, anyhow};
use encoding_rs::Encoding;
use log::debug;

use crate::{classification::Authority, mapping::ColumnMapping};

/// A table decoded with a different encoding is a different table.
type TableKey = (PathBuf, &'static str);

#[derive(Debug, Default)]
pub struct TableCache {
    mappings: RwLock<HashMap<TableKey, Arc<ColumnMapping>>>,
    authorities: RwLock<HashMap<TableKey, Arc<Authority>>>,
}

impl TableCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mapping(&self, path: &Path, encoding: &'static Encoding) -> Result<Arc<ColumnMapping>> {
        read_through(&self.mappings, path, encoding, |path| ColumnMapping::load(path, encoding))
    }

    pub fn authority(&self, path: &Path, encoding: &'static Encoding) -> Result<Arc<Authority>> {
        read_through(&self.authorities, path, encoding, |path| Authority::load(path, encoding))
    }

    pub fn len(&self) -> usize {
        let mappings = self.mappings.read().map(|m| m.len()).unwrap_or_default();
        let authorities = self.authorities.read().map(|a| a.len()).unwrap_or_default();
        mappings + authorities
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn read_through<T, F>(
    tables: &RwLock<HashMap<TableKey, Arc<T>>>,
    path: &Path,
    encoding: &'static Encoding,
    load: F,
) -> Result<Arc<T>>
where
    F: FnOnce(&Path) -> Result<T>,
{
    let key = (path.to_path_buf(), encoding.name());
    if let Some(existing) = tables
        .read()
        .map_err(|_| anyhow!("Table cache lock poisoned"))?
        .get(&key)
        .cloned()
    {
        return Ok(existing);
    }

    // Two workers may race to load the same table; the first insert wins
    // and both see the same Arc afterwards.
    let loaded = Arc::new(load(path)?);
    debug!("Cached table {path:?} ({})", encoding.name());
    let mut guard = tables
        .write()
        .map_err(|_| anyhow!("Table cache lock poisoned"))?;
    Ok(guard.entry(key).or_insert(loaded).clone())
}
