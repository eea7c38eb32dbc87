#![allow(dead_code)]

use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, UNIX_EPOCH};

use portage_db::{
    Atom, AuxRecord, BuildEvaluator, Config, Cpv, EclassChecksumProvider, PortDb,
    RepositorySet, Result, Settings,
};
use tempfile::TempDir;

/// A throw-away repository root with an `eclass/` directory.
pub struct Repo {
    dir: TempDir,
}

impl Repo {
    pub fn new(name: &str) -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("eclass")).unwrap();
        fs::create_dir_all(dir.path().join("profiles")).unwrap();
        fs::write(dir.path().join("profiles/repo_name"), format!("{name}\n")).unwrap();
        Repo { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a recipe whose body is `KEY="value"` lines read back by
    /// [`Evaluator`]. A line `die` makes evaluation fail.
    pub fn add(&self, cpv: &str, body: &str) -> PathBuf {
        let cpv = Cpv::parse(cpv).unwrap();
        let dir = self.path().join(&cpv.category).join(&cpv.package);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("Manifest"), "").unwrap();
        let recipe = dir.join(format!("{}.ebuild", cpv.pf()));
        fs::write(&recipe, body).unwrap();
        recipe
    }
}

/// Set the modification time of `path` to `secs` after the epoch.
pub fn set_mtime(path: &Path, secs: u64) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

/// Reads `KEY="value"` lines from the recipe and counts invocations.
#[derive(Clone, Default)]
pub struct Evaluator {
    pub calls: Rc<Cell<usize>>,
}

impl BuildEvaluator for Evaluator {
    fn run(&self, recipe: &Path, _cpv: &Cpv) -> std::result::Result<HashMap<String, String>, String> {
        self.calls.set(self.calls.get() + 1);
        let text = fs::read_to_string(recipe).map_err(|e| e.to_string())?;
        let mut fields = HashMap::new();
        for line in text.lines().map(str::trim) {
            if line == "die" {
                return Err("recipe died".to_string());
            }
            if let Some((key, value)) = line.split_once('=') {
                fields.insert(key.to_string(), value.trim_matches('"').to_string());
            }
        }
        Ok(fields)
    }
}

/// Checksums every eclass as `"0"`; stored sets are valid while `valid`
/// is set.
#[derive(Clone)]
pub struct Eclasses {
    pub valid: Rc<Cell<bool>>,
}

impl Default for Eclasses {
    fn default() -> Self {
        Eclasses {
            valid: Rc::new(Cell::new(true)),
        }
    }
}

impl EclassChecksumProvider for Eclasses {
    fn resolve(&self, names: &[String]) -> Result<Vec<(String, String)>> {
        Ok(names.iter().map(|n| (n.clone(), "0".to_string())).collect())
    }

    fn is_valid(&self, _checksums: &[(String, String)]) -> bool {
        self.valid.get()
    }
}

/// [`Config`] that counts mask lookups, one per candidate checked.
pub struct CountingSettings {
    pub config: Config,
    pub mask_lookups: Rc<Cell<usize>>,
}

impl Settings for CountingSettings {
    fn categories(&self) -> &BTreeSet<String> {
        self.config.categories()
    }

    fn mask_atom(&self, cpv: &Cpv, slot: &str) -> Option<&Atom> {
        self.mask_lookups.set(self.mask_lookups.get() + 1);
        self.config.mask_atom(cpv, slot)
    }

    fn profile_mask_atom(&self, cpv: &Cpv, slot: &str) -> Option<&Atom> {
        self.config.profile_mask_atom(cpv, slot)
    }

    fn missing_keywords(&self, cpv: &Cpv, aux: &AuxRecord) -> Vec<String> {
        self.config.missing_keywords(cpv, aux)
    }

    fn missing_licenses(
        &self,
        cpv: &Cpv,
        aux: &AuxRecord,
        use_flags: &BTreeSet<String>,
    ) -> Result<Vec<String>> {
        self.config.missing_licenses(cpv, aux, use_flags)
    }

    fn use_flags(&self, cpv: &Cpv, aux: &AuxRecord) -> BTreeSet<String> {
        self.config.use_flags(cpv, aux)
    }

    fn local_config(&self) -> bool {
        self.config.local_config()
    }
}

/// Counters shared with the collaborators of a [`PortDb`].
pub struct Counters {
    pub evaluations: Rc<Cell<usize>>,
    pub mask_lookups: Rc<Cell<usize>>,
    pub eclasses_valid: Rc<Cell<bool>>,
}

/// A config accepting `amd64` in category `cat`.
pub fn config() -> Config {
    let mut config = Config::default();
    config.categories = ["cat".to_string()].into_iter().collect();
    config.accept_keywords = vec!["amd64".to_string()];
    config
}

pub fn open(repos: RepositorySet, config: Config) -> (PortDb, Counters) {
    let evaluator = Evaluator::default();
    let eclasses = Eclasses::default();
    let mask_lookups = Rc::new(Cell::new(0));
    let counters = Counters {
        evaluations: evaluator.calls.clone(),
        mask_lookups: mask_lookups.clone(),
        eclasses_valid: eclasses.valid.clone(),
    };
    let backend = config.cache_backend.clone();
    let settings = CountingSettings {
        config,
        mask_lookups,
    };
    let db = PortDb::new(
        repos,
        &backend,
        Box::new(settings),
        Box::new(evaluator),
        Box::new(eclasses),
    );
    (db, counters)
}

pub fn open_single(repo: &Repo, config: Config) -> (PortDb, Counters) {
    open(RepositorySet::new(repo.path(), vec![]), config)
}

pub fn cpv(s: &str) -> Cpv {
    Cpv::parse(s).unwrap()
}

pub fn names(list: &[Cpv]) -> Vec<String> {
    list.iter().map(|c| c.to_string()).collect()
}

pub const STABLE: &str = "EAPI=8\nSLOT=0\nKEYWORDS=amd64\nLICENSE=MIT\n";
