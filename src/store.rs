//! Persistent metadata stores.
//!
//! Each repository root owns one [`MetadataStore`]. Three backends exist:
//! a flat file tree on disk, a layered store that reads from a read-only
//! flat tree and keeps its own writes in memory (for processes that may
//! not write the shared cache), and a purely in-memory store.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::metadata::MetadataRecord;
use crate::version::Cpv;

/// Key-value store of metadata records for one repository root.
///
/// `get` fails only when a stored entry exists but cannot be read back;
/// callers treat that as a corrupt entry.
pub trait MetadataStore {
    /// Fetch the stored record for `cpv`.
    fn get(&self, cpv: &Cpv) -> Result<Option<MetadataRecord>>;

    /// Store `record` for `cpv`, replacing any previous record.
    fn put(&mut self, cpv: &Cpv, record: &MetadataRecord) -> Result<()>;

    /// Remove the record for `cpv`. Removing a missing record is not an error.
    fn delete(&mut self, cpv: &Cpv) -> Result<()>;

    /// Flush pending writes.
    fn sync(&mut self) -> Result<()>;
}

/// Metadata store backend selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CacheBackend {
    /// Writable flat file tree under `dir`.
    Flat {
        /// Cache directory shared by all roots.
        dir: PathBuf,
    },
    /// Read-only flat file tree under `dir` with in-memory writes.
    Layered {
        /// Cache directory shared by all roots.
        dir: PathBuf,
    },
    /// In-memory only; nothing survives the process.
    #[default]
    Memory,
}

impl CacheBackend {
    /// Open the store of repository `root`.
    pub fn open(&self, root: &Path) -> Box<dyn MetadataStore> {
        match self {
            CacheBackend::Flat { dir } => Box::new(FlatFileStore::new(store_dir(dir, root))),
            CacheBackend::Layered { dir } => Box::new(LayeredStore::new(
                Box::new(FlatFileStore::new(store_dir(dir, root))),
                Box::new(MemoryStore::default()),
            )),
            CacheBackend::Memory => Box::new(MemoryStore::default()),
        }
    }
}

/// `<dir>/<root>` with the root's leading `/` dropped, so every root gets
/// its own subtree.
fn store_dir(dir: &Path, root: &Path) -> PathBuf {
    root.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .fold(dir.to_path_buf(), |acc, c| acc.join(c))
}

/// One text file per record at `<dir>/<category>/<package-version>`.
///
/// Writes go through a temporary file and a rename, so readers never see
/// a partially written record.
#[derive(Debug, Clone)]
pub struct FlatFileStore {
    dir: PathBuf,
}

impl FlatFileStore {
    /// A store rooted at `dir`; the directory is created on the first put.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FlatFileStore { dir: dir.into() }
    }

    fn path(&self, cpv: &Cpv) -> PathBuf {
        self.dir.join(&cpv.category).join(cpv.pf())
    }
}

impl MetadataStore for FlatFileStore {
    fn get(&self, cpv: &Cpv) -> Result<Option<MetadataRecord>> {
        let path = self.path(cpv);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(&path, e)),
        };
        MetadataRecord::parse(&text)
            .map(Some)
            .map_err(|e| Error::InvalidCacheEntry(format!("{}: {e}", path.display())))
    }

    fn put(&mut self, cpv: &Cpv, record: &MetadataRecord) -> Result<()> {
        let path = self.path(cpv);
        let parent = self.dir.join(&cpv.category);
        fs::create_dir_all(&parent).map_err(|e| Error::io(&parent, e))?;
        let tmp = parent.join(format!(".{}.tmp", cpv.pf()));
        fs::write(&tmp, record.serialize()).map_err(|e| Error::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| Error::io(&path, e))?;
        debug!(%cpv, path = %path.display(), "stored metadata record");
        Ok(())
    }

    fn delete(&mut self, cpv: &Cpv) -> Result<()> {
        let path = self.path(cpv);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(&path, e)),
        }
    }

    fn sync(&mut self) -> Result<()> {
        // Write-through: every put is already on disk.
        Ok(())
    }
}

/// A read-only base store with a writable overlay.
///
/// Puts land in the overlay; deletes hide base entries for the lifetime
/// of the store. The base is never modified.
pub struct LayeredStore {
    base: Box<dyn MetadataStore>,
    overlay: Box<dyn MetadataStore>,
    hidden: HashSet<Cpv>,
}

impl LayeredStore {
    /// Layer `overlay` over the read-only `base`.
    pub fn new(base: Box<dyn MetadataStore>, overlay: Box<dyn MetadataStore>) -> Self {
        LayeredStore {
            base,
            overlay,
            hidden: HashSet::new(),
        }
    }
}

impl MetadataStore for LayeredStore {
    fn get(&self, cpv: &Cpv) -> Result<Option<MetadataRecord>> {
        if let Some(record) = self.overlay.get(cpv)? {
            return Ok(Some(record));
        }
        if self.hidden.contains(cpv) {
            return Ok(None);
        }
        self.base.get(cpv)
    }

    fn put(&mut self, cpv: &Cpv, record: &MetadataRecord) -> Result<()> {
        self.overlay.put(cpv, record)?;
        self.hidden.remove(cpv);
        Ok(())
    }

    fn delete(&mut self, cpv: &Cpv) -> Result<()> {
        self.overlay.delete(cpv)?;
        self.hidden.insert(cpv.clone());
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.overlay.sync()
    }
}

/// Ephemeral in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<Cpv, MetadataRecord>,
}

impl MetadataStore for MemoryStore {
    fn get(&self, cpv: &Cpv) -> Result<Option<MetadataRecord>> {
        Ok(self.entries.get(cpv).cloned())
    }

    fn put(&mut self, cpv: &Cpv, record: &MetadataRecord) -> Result<()> {
        self.entries.insert(cpv.clone(), record.clone());
        Ok(())
    }

    fn delete(&mut self, cpv: &Cpv) -> Result<()> {
        self.entries.remove(cpv);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}
