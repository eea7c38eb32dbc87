use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use tracing::warn;

use crate::repository::RepositorySet;
use crate::version::{split_pf, Cpv};

/// Enumerates packages and versions available in a [`RepositorySet`].
#[derive(Debug, Clone, Copy)]
pub struct VersionCatalog<'a> {
    repos: &'a RepositorySet,
    categories: &'a BTreeSet<String>,
}

impl<'a> VersionCatalog<'a> {
    /// A catalog over `repos`, restricted to the `categories` allowlist.
    pub fn new(repos: &'a RepositorySet, categories: &'a BTreeSet<String>) -> Self {
        VersionCatalog { repos, categories }
    }

    /// Every `category/package` key in an allowed category, across all
    /// roots, sorted and deduplicated.
    pub fn all_keys(&self) -> Vec<String> {
        let mut keys = BTreeSet::new();
        for category in self.categories {
            for root in self.repos.roots() {
                let Ok(entries) = fs::read_dir(root.path.join(category)) else {
                    continue;
                };
                for entry in entries.flatten() {
                    if !entry.file_type().map_or(false, |t| t.is_dir()) {
                        continue;
                    }
                    let name = entry.file_name();
                    let Some(name) = name.to_str() else {
                        continue;
                    };
                    if is_package_dir(name) {
                        keys.insert(format!("{category}/{name}"));
                    }
                }
            }
        }
        keys.into_iter().collect()
    }

    /// Every version of `cp` in ascending order.
    ///
    /// Searches only `root_hint` when given. Recipe files whose names do not
    /// split into this package and a valid version are skipped with a
    /// warning. A package outside the category allowlist yields nothing.
    pub fn versions(&self, cp: &str, root_hint: Option<&Path>) -> Vec<Cpv> {
        let Some((category, package)) = cp.split_once('/') else {
            return Vec::new();
        };
        let mut found = BTreeSet::new();
        for root in self.repos.search_roots(root_hint) {
            let dir = root.join(category).join(package);
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let file_name = entry.file_name();
                let Some(pf) = file_name.to_str().and_then(|f| f.strip_suffix(".ebuild")) else {
                    continue;
                };
                match split_pf(pf) {
                    Some((name, version)) if name == package => {
                        found.insert(Cpv {
                            category: category.to_string(),
                            package: package.to_string(),
                            version,
                        });
                    }
                    _ => warn!(path = %dir.join(&file_name).display(), "invalid ebuild name"),
                }
            }
        }

        if !found.is_empty() && !self.categories.contains(category) {
            warn!(%cp, "category is not listed in the category allowlist");
            return Vec::new();
        }
        found.into_iter().collect()
    }
}

/// Package directory names: a word character, then word characters, `-`
/// or `+`. `CVS` directories are never packages.
fn is_package_dir(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name != "CVS"
        && (first.is_alphanumeric() || first == '_')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '+'))
}
