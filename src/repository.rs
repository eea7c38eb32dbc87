use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::version::Cpv;

/// File holding a repository's name, relative to its root.
const REPO_NAME: &str = "profiles/repo_name";

/// One repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRoot {
    /// Root directory.
    pub path: PathBuf,
    /// Name read from `profiles/repo_name`; `None` for unnamed roots.
    pub name: Option<String>,
}

impl RepositoryRoot {
    fn open(path: PathBuf) -> Self {
        let name = fs::read_to_string(path.join(REPO_NAME))
            .ok()
            .and_then(|text| text.lines().next().map(|l| l.trim().to_string()))
            .filter(|name| !name.is_empty());
        debug!(path = %path.display(), name = ?name, "repository root");
        RepositoryRoot { path, name }
    }
}

/// The ordered set of repository roots.
///
/// Lookups search overlays before the base root, the most recently added
/// overlay first. The set is fixed at construction.
#[derive(Debug, Clone)]
pub struct RepositorySet {
    /// Roots in priority order; the base root is last.
    roots: Vec<RepositoryRoot>,
}

impl RepositorySet {
    /// Build the set from the base root and overlays in the order they were
    /// added.
    ///
    /// Overlays that are not directories are skipped with a warning, as are
    /// duplicates of a root already in the set.
    pub fn new(base: impl Into<PathBuf>, overlays: impl IntoIterator<Item = PathBuf>) -> Self {
        let base = base.into();
        let mut roots: Vec<RepositoryRoot> = Vec::new();
        for overlay in overlays {
            if !overlay.is_dir() {
                warn!(path = %overlay.display(), "skipping missing overlay");
                continue;
            }
            if overlay == base || roots.iter().any(|r| r.path == overlay) {
                continue;
            }
            roots.push(RepositoryRoot::open(overlay));
        }
        roots.reverse();
        roots.push(RepositoryRoot::open(base));
        RepositorySet { roots }
    }

    /// All roots in priority order.
    pub fn roots(&self) -> &[RepositoryRoot] {
        &self.roots
    }

    /// The base root.
    pub fn base(&self) -> &RepositoryRoot {
        // `new` always pushes the base root last.
        &self.roots[self.roots.len() - 1]
    }

    /// Path of the repository named `name`.
    pub fn path_of(&self, name: &str) -> Option<&Path> {
        self.roots
            .iter()
            .find(|r| r.name.as_deref() == Some(name))
            .map(|r| r.path.as_path())
    }

    /// Name of the repository rooted at `path`.
    pub fn name_of(&self, path: &Path) -> Option<&str> {
        self.roots
            .iter()
            .find(|r| r.path == path)
            .and_then(|r| r.name.as_deref())
    }

    /// Names of all named roots, in priority order.
    pub fn names(&self) -> Vec<&str> {
        self.roots.iter().filter_map(|r| r.name.as_deref()).collect()
    }

    /// Roots to search: only `root_hint` when given, otherwise all of them.
    pub fn search_roots<'a>(&'a self, root_hint: Option<&'a Path>) -> Vec<&'a Path> {
        match root_hint {
            Some(root) => vec![root],
            None => self.roots.iter().map(|r| r.path.as_path()).collect(),
        }
    }

    /// Find the recipe for `cpv`.
    ///
    /// Returns the recipe path and the root it was found in, searching in
    /// priority order.
    pub fn locate(&self, cpv: &Cpv, root_hint: Option<&Path>) -> Result<(PathBuf, PathBuf)> {
        let relative = Path::new(&cpv.category)
            .join(&cpv.package)
            .join(format!("{}.ebuild", cpv.pf()));
        self.search_roots(root_hint)
            .into_iter()
            .map(|root| (root.join(&relative), root))
            .find(|(file, _)| file.is_file())
            .map(|(file, root)| (file, root.to_path_buf()))
            .ok_or_else(|| Error::NotFound(cpv.to_string()))
    }

    /// First `licenses/<name>` file in priority order.
    pub fn find_license_path(&self, name: &str) -> Option<PathBuf> {
        self.roots
            .iter()
            .map(|r| r.path.join("licenses").join(name))
            .find(|p| p.is_file())
    }

    /// Whether the base root has an `eclass/` directory, without which no
    /// metadata can be generated.
    pub fn has_eclass_dir(&self) -> bool {
        self.base().path.join("eclass").is_dir()
    }
}

/// Modification time (whole seconds since the epoch) and size of `path`.
pub(crate) fn file_stats(path: &Path) -> io::Result<(i64, u64)> {
    let meta = fs::metadata(path)?;
    let mtime = match meta.modified()?.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    };
    Ok((mtime, meta.len()))
}
