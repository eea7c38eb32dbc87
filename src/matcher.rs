use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::version::Cpv;

/// Query level of [`PortDb::xmatch`](crate::PortDb::xmatch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// All unmasked versions of a package.
    ListVisible,
    /// All versions satisfying an atom, masked or not.
    MatchAll,
    /// Visible versions satisfying an atom.
    MatchVisible,
    /// Lowest version satisfying an atom, masked or not.
    MinimumAll,
    /// Lowest visible version satisfying an atom.
    MinimumVisible,
    /// Highest visible version satisfying an atom.
    BestmatchVisible,
    /// Versions from a caller-supplied list satisfying an atom.
    MatchList,
    /// Highest version from a caller-supplied list satisfying an atom.
    BestmatchList,
}

impl Level {
    /// Whether results at this level may be cached while frozen.
    ///
    /// The list levels depend on caller input and never are.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, Level::MatchList | Level::BestmatchList)
    }

    /// The level name accepted by [`PortDb::resolve`](crate::PortDb::resolve).
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::ListVisible => "list-visible",
            Level::MatchAll => "match-all",
            Level::MatchVisible => "match-visible",
            Level::MinimumAll => "minimum-all",
            Level::MinimumVisible => "minimum-visible",
            Level::BestmatchVisible => "bestmatch-visible",
            Level::MatchList => "match-list",
            Level::BestmatchList => "bestmatch-list",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "list-visible" => Level::ListVisible,
            "match-all" => Level::MatchAll,
            "match-visible" => Level::MatchVisible,
            "minimum-all" => Level::MinimumAll,
            "minimum-visible" => Level::MinimumVisible,
            "bestmatch-visible" => Level::BestmatchVisible,
            "match-list" => Level::MatchList,
            "bestmatch-list" => Level::BestmatchList,
            _ => return Err(Error::InvalidArgument(format!("unknown match level {s}"))),
        })
    }
}

/// Result of a match query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    /// Every matching version, ascending.
    List(Vec<Cpv>),
    /// The single selected version, if any.
    Best(Option<Cpv>),
}

impl MatchResult {
    /// The matches as a list; a `Best` result gives zero or one entries.
    pub fn into_list(self) -> Vec<Cpv> {
        match self {
            MatchResult::List(list) => list,
            MatchResult::Best(best) => best.into_iter().collect(),
        }
    }

    /// The selected version of a `Best` result, or the last (highest)
    /// entry of a list.
    pub fn best(&self) -> Option<&Cpv> {
        match self {
            MatchResult::List(list) => list.last(),
            MatchResult::Best(best) => best.as_ref(),
        }
    }
}

/// Per-level query caches, valid for one freeze epoch.
///
/// Nothing is stored or returned unless the cache is frozen.
#[derive(Debug, Default)]
pub(crate) struct MatchCache {
    frozen: bool,
    levels: HashMap<Level, HashMap<String, MatchResult>>,
    cp_lists: HashMap<String, Vec<Cpv>>,
}

impl MatchCache {
    /// Start a new epoch with empty caches.
    pub(crate) fn freeze(&mut self) {
        self.levels.clear();
        self.cp_lists.clear();
        self.frozen = true;
    }

    /// End the epoch and drop everything.
    pub(crate) fn melt(&mut self) {
        self.levels = HashMap::new();
        self.cp_lists = HashMap::new();
        self.frozen = false;
    }

    pub(crate) fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub(crate) fn get(&self, level: Level, query: &str) -> Option<&MatchResult> {
        if !self.frozen {
            return None;
        }
        self.levels.get(&level)?.get(query)
    }

    pub(crate) fn insert(&mut self, level: Level, query: &str, result: &MatchResult) {
        if self.frozen && level.is_cacheable() {
            self.levels
                .entry(level)
                .or_default()
                .insert(query.to_string(), result.clone());
        }
    }

    /// Cached version list of `cp`. A hit also refreshes the match-all
    /// entry for `cp`.
    pub(crate) fn cp_list(&mut self, cp: &str) -> Option<Vec<Cpv>> {
        if !self.frozen {
            return None;
        }
        let list = self.cp_lists.get(cp)?.clone();
        self.seed_match_all(cp, &list);
        Some(list)
    }

    pub(crate) fn insert_cp_list(&mut self, cp: &str, list: &[Cpv]) {
        if !self.frozen {
            return;
        }
        self.cp_lists.insert(cp.to_string(), list.to_vec());
        self.seed_match_all(cp, list);
    }

    /// Empty lists for `virtual/` keys are not propagated: old-style
    /// virtuals resolve through other means than the version list.
    fn seed_match_all(&mut self, cp: &str, list: &[Cpv]) {
        if list.is_empty() && cp.starts_with("virtual/") {
            return;
        }
        self.insert(Level::MatchAll, cp, &MatchResult::List(list.to_vec()));
    }
}
