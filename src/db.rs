//! The repository metadata database.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::atom::{match_from_list, Atom};
use crate::catalog::VersionCatalog;
use crate::config::Config;
use crate::eapi::EapiState;
use crate::eclass::EclassChecksumProvider;
use crate::error::{Error, Result};
use crate::evaluator::BuildEvaluator;
use crate::manifest::{ManifestGate, ManifestVerifier, SignaturePolicy};
use crate::matcher::{Level, MatchCache, MatchResult};
use crate::metadata::{AuxRecord, Field, MetadataRecord};
use crate::repository::{file_stats, RepositorySet};
use crate::settings::Settings;
use crate::src_uri::SrcUriEntry;
use crate::store::{CacheBackend, MetadataStore};
use crate::version::{best, split_pf, Cpv};
use crate::visibility::{Check, VisibilityFilter, GVISIBLE, SCAN, VISIBLE};

/// Sources and distfile names of one recipe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchList {
    /// Download URLs, in `SRC_URI` order.
    pub uris: Vec<String>,
    /// Distfile names, deduplicated in first-seen order.
    pub files: Vec<String>,
}

/// Metadata database over a [`RepositorySet`].
///
/// Metadata records are generated on demand by the [`BuildEvaluator`] and
/// persisted per repository root; the hot fields of every record resolved
/// without a root override are kept in memory. Match queries are cached
/// between [`freeze`](PortDb::freeze) and [`melt`](PortDb::melt): the
/// caller promises not to modify the repositories in between.
pub struct PortDb {
    repos: RepositorySet,
    settings: Box<dyn Settings>,
    evaluator: Box<dyn BuildEvaluator>,
    eclasses: Box<dyn EclassChecksumProvider>,
    backend: CacheBackend,
    stores: HashMap<PathBuf, Box<dyn MetadataStore>>,
    manifest: Option<ManifestGate>,
    aux_cache: HashMap<Cpv, AuxRecord>,
    /// Recipes the evaluator failed on; never retried.
    broken: HashSet<PathBuf>,
    matches: MatchCache,
    can_generate: bool,
}

impl PortDb {
    /// Open the database.
    ///
    /// Each root gets its own store from `backend`.
    pub fn new(
        repos: RepositorySet,
        backend: &CacheBackend,
        settings: Box<dyn Settings>,
        evaluator: Box<dyn BuildEvaluator>,
        eclasses: Box<dyn EclassChecksumProvider>,
    ) -> Self {
        let stores = repos
            .roots()
            .iter()
            .map(|root| (root.path.clone(), backend.open(&root.path)))
            .collect();
        let can_generate = repos.has_eclass_dir();
        if !can_generate {
            warn!(
                root = %repos.base().path.display(),
                "base repository has no eclass directory, metadata cannot be generated"
            );
        }
        PortDb {
            repos,
            settings,
            evaluator,
            eclasses,
            backend: backend.clone(),
            stores,
            manifest: None,
            aux_cache: HashMap::new(),
            broken: HashSet::new(),
            matches: MatchCache::default(),
            can_generate,
        }
    }

    /// Verify the manifest of every recipe before trusting its metadata.
    pub fn with_manifest_verifier(
        mut self,
        verifier: Box<dyn ManifestVerifier>,
        policy: SignaturePolicy,
    ) -> Self {
        self.manifest = Some(ManifestGate::new(verifier, policy));
        self
    }

    /// Open the database with the store backend and manifest policy taken
    /// from `config`, which also serves as the settings.
    ///
    /// A signature policy needs a `verifier`; a verifier without a policy
    /// is ignored.
    pub fn from_config(
        repos: RepositorySet,
        config: Config,
        evaluator: Box<dyn BuildEvaluator>,
        eclasses: Box<dyn EclassChecksumProvider>,
        verifier: Option<Box<dyn ManifestVerifier>>,
    ) -> Result<Self> {
        let backend = config.cache_backend.clone();
        let policy = config.signature_policy;
        if policy.is_some() && verifier.is_none() {
            return Err(Error::InvalidArgument(
                "signature policy is set but no manifest verifier was given".to_string(),
            ));
        }
        let db = PortDb::new(repos, &backend, Box::new(config), evaluator, eclasses);
        Ok(match (policy, verifier) {
            (Some(policy), Some(verifier)) => db.with_manifest_verifier(verifier, policy),
            (None, Some(_)) => {
                debug!("no signature policy configured, manifests are not verified");
                db
            }
            _ => db,
        })
    }

    /// Path of the recipe for `cpv` and the root it lives in.
    pub fn locate_recipe(&self, cpv: &Cpv, root_hint: Option<&Path>) -> Result<(PathBuf, PathBuf)> {
        self.repos.locate(cpv, root_hint)
    }

    /// Whether a recipe for `cpv` exists on disk, masked or not.
    pub fn cpv_exists(&self, cpv: &str) -> bool {
        Cpv::parse(cpv).map_or(false, |cpv| self.repos.locate(&cpv, None).is_ok())
    }

    /// Names of all named repositories.
    pub fn repositories(&self) -> Vec<&str> {
        self.repos.names()
    }

    /// Root of the repository called `name`.
    pub fn repository_path(&self, name: &str) -> Option<&Path> {
        self.repos.path_of(name)
    }

    /// First `licenses/<name>` file in priority order.
    pub fn find_license_path(&self, name: &str) -> Option<PathBuf> {
        self.repos.find_license_path(name)
    }

    /// Render `fields` of the metadata of `cpv`.
    ///
    /// When every field is hot and no root is forced, the in-memory cache
    /// answers without touching the store.
    pub fn metadata(
        &mut self,
        cpv: &Cpv,
        fields: &[Field],
        root_hint: Option<&Path>,
    ) -> Result<Vec<String>> {
        if root_hint.is_none() && fields.iter().all(Field::is_hot) {
            if let Some(aux) = self.aux_cache.get(cpv) {
                return Ok(fields.iter().filter_map(|f| aux.get(*f)).collect());
            }
        }
        let record = self.record(cpv, root_hint)?;
        Ok(fields.iter().map(|f| record.get(*f)).collect())
    }

    /// The hot metadata fields of `cpv`.
    pub fn aux(&mut self, cpv: &Cpv) -> Result<AuxRecord> {
        if let Some(aux) = self.aux_cache.get(cpv) {
            return Ok(aux.clone());
        }
        self.record(cpv, None).map(|record| AuxRecord::from(&record))
    }

    /// The full metadata record of `cpv`, regenerating it when the stored
    /// one is missing or stale.
    pub fn record(&mut self, cpv: &Cpv, root_hint: Option<&Path>) -> Result<MetadataRecord> {
        let (recipe, root) = self.repos.locate(cpv, root_hint)?;
        if let Some(gate) = self.manifest.as_mut() {
            gate.check(&recipe)?;
        }
        let (mtime, _) = file_stats(&recipe).map_err(|e| {
            warn!(%cpv, path = %recipe.display(), error = %e, "cannot stat recipe");
            Error::NotFound(cpv.to_string())
        })?;

        let stored = match self.store(&root).get(cpv) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(%cpv, error = %e, "discarding corrupt metadata record");
                if let Err(e) = self.store(&root).delete(cpv) {
                    warn!(%cpv, error = %e, "cannot delete corrupt metadata record");
                }
                None
            }
        };
        let valid = stored.filter(|record| self.is_current(record, mtime));
        debug!(%cpv, valid = valid.is_some(), "metadata cache lookup");

        let mut record = match valid {
            Some(record) => record,
            None => self.regenerate(cpv, &recipe, &root, mtime)?,
        };
        record.repository = self.repos.name_of(&root).unwrap_or_default().to_string();
        if root_hint.is_none() {
            self.aux_cache.insert(cpv.clone(), AuxRecord::from(&record));
        }
        Ok(record)
    }

    fn is_current(&self, record: &MetadataRecord, mtime: i64) -> bool {
        if record.eapi == EapiState::Unknown || record.eapi.is_stale_tombstone() {
            return false;
        }
        record.mtime == mtime
            && (record.eclasses.is_empty() || self.eclasses.is_valid(&record.eclasses))
    }

    fn regenerate(
        &mut self,
        cpv: &Cpv,
        recipe: &Path,
        root: &Path,
        mtime: i64,
    ) -> Result<MetadataRecord> {
        if self.broken.contains(recipe) || !self.can_generate {
            return Err(Error::NotFound(cpv.to_string()));
        }
        info!(%cpv, recipe = %recipe.display(), "generating metadata");
        self.aux_cache.remove(cpv);

        let generated = self
            .evaluator
            .run(recipe, cpv)
            .map_err(|reason| Error::EvaluatorFailure {
                cpv: cpv.to_string(),
                reason,
            })
            .and_then(|fields| self.build_record(cpv, &fields));
        let mut record = match generated {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "marking recipe as broken");
                self.broken.insert(recipe.to_path_buf());
                return Err(Error::NotFound(cpv.to_string()));
            }
        };
        record.mtime = mtime;

        if let Err(e) = self.store(root).put(cpv, &record) {
            warn!(%cpv, error = %e, "cannot store metadata record");
        }
        Ok(record)
    }

    fn build_record(&self, cpv: &Cpv, fields: &HashMap<String, String>) -> Result<MetadataRecord> {
        let mut record = MetadataRecord::from_fields(
            fields.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        )
        .map_err(|e| Error::EvaluatorFailure {
            cpv: cpv.to_string(),
            reason: e.to_string(),
        })?;
        if record.is_tombstone() {
            debug!(%cpv, eapi = %record.eapi, "unsupported EAPI, storing tombstone");
            return Ok(record);
        }
        let inherited: Vec<String> = fields
            .get("INHERITED")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        if !inherited.is_empty() {
            record.eclasses = self.eclasses.resolve(&inherited)?;
        }
        Ok(record)
    }

    fn store(&mut self, root: &Path) -> &mut dyn MetadataStore {
        let backend = &self.backend;
        self.stores
            .entry(root.to_path_buf())
            .or_insert_with(|| backend.open(root))
            .as_mut()
    }

    /// Sources of `cpv` under `use_flags`, or under the USE flags in effect
    /// for it when `None`. With `all` set, every conditional source is
    /// included.
    pub fn fetch_list(
        &mut self,
        cpv: &Cpv,
        use_flags: Option<&BTreeSet<String>>,
        all: bool,
        root_hint: Option<&Path>,
    ) -> Result<FetchList> {
        let record = self.record(cpv, root_hint).map_err(|e| {
            if e.is_security() {
                e
            } else {
                Error::InvalidDependString(format!("error reading metadata of {cpv}: {e}"))
            }
        })?;
        let Some(eapi) = record.eapi.supported() else {
            return Err(Error::InvalidDependString(format!(
                "{cpv} has unsupported EAPI '{}'",
                record.eapi
            )));
        };

        let flags = match use_flags {
            Some(flags) => flags.clone(),
            None => self.settings.use_flags(cpv, &AuxRecord::from(&record)),
        };
        let mut list = FetchList::default();
        for entry in SrcUriEntry::reduce(&record.src_uri, &flags, all) {
            let (Some(url), Some(file)) = (entry.url(), entry.distfile()) else {
                continue;
            };
            if matches!(entry, SrcUriEntry::Renamed { .. }) && !eapi.has_src_uri_arrows() {
                return Err(Error::InvalidDependString(format!(
                    "{cpv}: SRC_URI arrows are not allowed in EAPI {eapi}"
                )));
            }
            if entry.restriction().is_some() && !eapi.has_selective_uri_restrictions() {
                return Err(Error::InvalidDependString(format!(
                    "{cpv}: URI restrictions are not allowed in EAPI {eapi}"
                )));
            }
            if file.is_empty() {
                return Err(Error::InvalidDependString(format!(
                    "{cpv} SRC_URI has no file name: '{url}'"
                )));
            }
            list.uris.push(url.to_string());
            if !list.files.iter().any(|f| f == file) {
                list.files.push(file.to_string());
            }
        }
        Ok(list)
    }

    /// Every `category/package` key in an allowed category.
    pub fn all_keys(&self) -> Vec<String> {
        VersionCatalog::new(&self.repos, self.settings.categories()).all_keys()
    }

    /// Every version of `cp`, ascending.
    pub fn versions(&mut self, cp: &str, root_hint: Option<&Path>) -> Vec<Cpv> {
        if root_hint.is_none() {
            if let Some(list) = self.matches.cp_list(cp) {
                return list;
            }
        }
        let list = VersionCatalog::new(&self.repos, self.settings.categories()).versions(cp, root_hint);
        if root_hint.is_none() {
            self.matches.insert_cp_list(cp, &list);
        }
        list
    }

    /// Drop candidates with no slot or hidden by a mask or profile atom.
    ///
    /// The candidates are expected to share one package. Candidates whose
    /// metadata cannot be read are dropped.
    pub fn visible(&mut self, candidates: &[Cpv]) -> Result<Vec<Cpv>> {
        self.retain(candidates, VISIBLE, None)
    }

    /// Drop candidates with an unsupported EAPI, no accepted keyword, or an
    /// unaccepted license.
    pub fn gvisible(&mut self, candidates: &[Cpv]) -> Result<Vec<Cpv>> {
        self.retain(candidates, GVISIBLE, None)
    }

    /// Visible versions matching `query`.
    pub fn match_visible(&mut self, query: &str) -> Result<Vec<Cpv>> {
        self.xmatch(Level::MatchVisible, query).map(MatchResult::into_list)
    }

    /// Resolve `query` at `level`.
    ///
    /// The list levels need candidates; use [`resolve`](PortDb::resolve)
    /// for those.
    pub fn xmatch(&mut self, level: Level, query: &str) -> Result<MatchResult> {
        self.resolve_at(level, query, None)
    }

    /// Resolve `query` at the level named `level`, restricted to
    /// `candidates` for `match-list` and `bestmatch-list`.
    ///
    /// An unknown level name is an [`Error::InvalidArgument`].
    pub fn resolve(
        &mut self,
        level: &str,
        query: &str,
        candidates: Option<&[Cpv]>,
    ) -> Result<MatchResult> {
        let level: Level = level.parse()?;
        self.resolve_at(level, query, candidates)
    }

    fn resolve_at(
        &mut self,
        level: Level,
        query: &str,
        candidates: Option<&[Cpv]>,
    ) -> Result<MatchResult> {
        if let Some(hit) = self.matches.get(level, query) {
            return Ok(hit.clone());
        }
        let atom = self.expand(query)?;
        let key = atom.cp();

        let result = match level {
            Level::ListVisible => {
                let all = self.versions(&key, None);
                let visible = self.visible(&all)?;
                MatchResult::List(self.gvisible(&visible)?)
            }
            Level::MatchAll => MatchResult::List(self.match_all(&atom)),
            Level::MatchVisible => {
                let visible = self.resolve_at(Level::ListVisible, &key, None)?.into_list();
                MatchResult::List(match_from_list(&atom, &visible))
            }
            Level::MinimumAll => MatchResult::Best(self.minimum_all(&atom)?),
            Level::MinimumVisible => MatchResult::Best(self.first_visible(&atom, false)?),
            Level::BestmatchVisible => MatchResult::Best(self.first_visible(&atom, true)?),
            Level::MatchList | Level::BestmatchList => {
                let candidates = candidates.ok_or_else(|| {
                    Error::InvalidArgument(format!("{level} needs a candidate list"))
                })?;
                let matched = match_from_list(&atom, candidates);
                if level == Level::MatchList {
                    MatchResult::List(matched)
                } else {
                    MatchResult::Best(best(&matched).cloned())
                }
            }
        };

        let result = match result {
            MatchResult::List(list) if atom.slot.is_some() => {
                MatchResult::List(self.retain(&list, &[Check::AtomSlot], Some(&atom))?)
            }
            other => other,
        };

        let expanded = atom.to_string();
        self.matches.insert(level, &expanded, &result);
        if expanded != query {
            self.matches.insert(level, query, &result);
        }
        Ok(result)
    }

    fn match_all(&mut self, atom: &Atom) -> Vec<Cpv> {
        let all = self.versions(&atom.cp(), None);
        if atom.is_bare() {
            all
        } else {
            match_from_list(atom, &all)
        }
    }

    /// Lowest match; only the slot is looked up, and only when the atom
    /// restricts it.
    fn minimum_all(&mut self, atom: &Atom) -> Result<Option<Cpv>> {
        let matched = self.match_all(atom);
        if atom.slot.is_none() {
            return Ok(matched.into_iter().next());
        }
        for cpv in matched {
            if self.passes(&cpv, &[Check::AtomSlot], Some(atom))? {
                return Ok(Some(cpv));
            }
        }
        Ok(None)
    }

    /// First match passing every visibility check, scanning from the
    /// highest version when `descending`.
    fn first_visible(&mut self, atom: &Atom, descending: bool) -> Result<Option<Cpv>> {
        let mut matched = self.match_all(atom);
        if descending {
            matched.reverse();
        }
        for cpv in matched {
            if self.passes(&cpv, SCAN, Some(atom))? {
                return Ok(Some(cpv));
            }
        }
        Ok(None)
    }

    fn retain(&mut self, candidates: &[Cpv], checks: &[Check], atom: Option<&Atom>) -> Result<Vec<Cpv>> {
        let mut kept = Vec::new();
        for cpv in candidates {
            if self.passes(cpv, checks, atom)? {
                kept.push(cpv.clone());
            }
        }
        Ok(kept)
    }

    /// Run `checks` on `cpv`. Unreadable metadata masks the candidate;
    /// only security failures are errors.
    fn passes(&mut self, cpv: &Cpv, checks: &[Check], atom: Option<&Atom>) -> Result<bool> {
        let aux = match self.aux(cpv) {
            Ok(aux) => aux,
            Err(e) if e.is_security() => return Err(e),
            Err(e) => {
                debug!(%cpv, error = %e, "masked by unreadable metadata");
                return Ok(false);
            }
        };
        match VisibilityFilter::new(&*self.settings).check(checks, cpv, &aux, atom) {
            Ok(()) => Ok(true),
            Err(rejection) => {
                debug!(%cpv, %rejection, "candidate rejected");
                Ok(false)
            }
        }
    }

    /// Parse `query`, filling in the category of a bare package name.
    ///
    /// A name found in exactly one category gets that category; an
    /// unknown name gets `null`, which matches nothing.
    fn expand(&self, query: &str) -> Result<Atom> {
        let parse_error = match Atom::parse(query) {
            Ok(atom) => return Ok(atom),
            Err(e) => e,
        };
        let start = query
            .find(|c: char| c.is_ascii_alphanumeric() || c == '_')
            .ok_or_else(|| parse_error.clone())?;
        let (operator, rest) = query.split_at(start);
        let body = &rest[..rest.find([':', '[']).unwrap_or(rest.len())];
        if body.contains('/') {
            return Err(parse_error);
        }
        let name = if operator.is_empty() {
            body
        } else {
            split_pf(body.trim_end_matches('*'))
                .map(|(name, _)| name)
                .ok_or_else(|| parse_error.clone())?
        };

        let candidates: Vec<String> = self
            .all_keys()
            .into_iter()
            .filter(|key| key.split_once('/').map(|(_, pkg)| pkg) == Some(name))
            .collect();
        if candidates.len() > 1 {
            return Err(Error::AmbiguousPackage {
                name: name.to_string(),
                candidates,
            });
        }
        let category = candidates
            .first()
            .and_then(|key| key.split_once('/'))
            .map_or("null", |(category, _)| category);
        Atom::parse(&format!("{operator}{category}/{rest}"))
    }

    /// Start a query-cache epoch. The repositories must not change until
    /// [`melt`](PortDb::melt).
    pub fn freeze(&mut self) {
        self.matches.freeze();
    }

    /// End the epoch, dropping every cached query and hot record.
    pub fn melt(&mut self) {
        self.matches.melt();
        self.aux_cache.clear();
    }

    /// Whether a query-cache epoch is active.
    pub fn is_frozen(&self) -> bool {
        self.matches.is_frozen()
    }

    /// Flush every metadata store.
    pub fn flush(&mut self) -> Result<()> {
        for store in self.stores.values_mut() {
            store.sync()?;
        }
        Ok(())
    }

    /// Flush and release the database.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.aux_cache.clear();
        debug!("metadata database closed");
        Ok(())
    }
}
