mod common;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use common::*;
use portage_db::{
    CacheBackend, EapiState, Error, Field, ManifestVerifier, PortDb, RepositorySet, Result,
    SignaturePolicy, TrustLevel,
};
use tempfile::TempDir;

/// Location of the flat cache entry for `cpv` of `repo` under `cache`.
fn cache_entry(cache: &Path, repo: &Repo, cpv: &str) -> PathBuf {
    let dir = repo
        .path()
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .fold(cache.to_path_buf(), |acc, c| acc.join(c));
    dir.join(cpv)
}

fn flat_config(cache: &TempDir) -> portage_db::Config {
    let mut config = config();
    config.cache_backend = CacheBackend::Flat {
        dir: cache.path().to_path_buf(),
    };
    config
}

#[test]
fn records_are_generated_once() {
    let repo = Repo::new("test");
    repo.add("cat/pkg-1.0", "EAPI=8\nSLOT=0\nKEYWORDS=amd64\nDESCRIPTION=A package\n");
    let (mut db, counters) = open_single(&repo, config());
    let cpv = cpv("cat/pkg-1.0");

    let first = db.record(&cpv, None).unwrap();
    let second = db.record(&cpv, None).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.description, "A package");
    assert_eq!(first.repository, "test");
    assert_eq!(
        db.metadata(&cpv, &[Field::Description, Field::Slot], None).unwrap(),
        ["A package", "0"]
    );
    assert_eq!(counters.evaluations.get(), 1);
}

#[test]
fn modified_recipe_is_regenerated() {
    let repo = Repo::new("test");
    let recipe = repo.add("cat/pkg-1.0", STABLE);
    let (mut db, counters) = open_single(&repo, config());
    let cpv = cpv("cat/pkg-1.0");

    db.record(&cpv, None).unwrap();
    set_mtime(&recipe, 1_000_000);
    let record = db.record(&cpv, None).unwrap();
    assert_eq!(record.mtime, 1_000_000);
    db.record(&cpv, None).unwrap();
    assert_eq!(counters.evaluations.get(), 2);
}

#[test]
fn changed_eclasses_invalidate_records() {
    let repo = Repo::new("test");
    repo.add("cat/pkg-1.0", "EAPI=8\nSLOT=0\nINHERITED=toolchain-funcs\n");
    let (mut db, counters) = open_single(&repo, config());
    let cpv = cpv("cat/pkg-1.0");

    let record = db.record(&cpv, None).unwrap();
    assert_eq!(
        record.eclasses,
        [("toolchain-funcs".to_string(), "0".to_string())]
    );
    db.record(&cpv, None).unwrap();
    assert_eq!(counters.evaluations.get(), 1);

    counters.eclasses_valid.set(false);
    db.record(&cpv, None).unwrap();
    assert_eq!(counters.evaluations.get(), 2);
}

#[test]
fn unsupported_eapi_leaves_a_tombstone() {
    let repo = Repo::new("test");
    repo.add("cat/pkg-1.0", "EAPI=42\nSLOT=0\nKEYWORDS=amd64\n");
    let (mut db, counters) = open_single(&repo, config());
    let cpv = cpv("cat/pkg-1.0");

    let record = db.record(&cpv, None).unwrap();
    assert!(record.is_tombstone());
    assert_eq!(record.slot_name(), "");
    db.record(&cpv, None).unwrap();
    assert_eq!(counters.evaluations.get(), 1);

    assert_eq!(db.metadata(&cpv, &[Field::Eapi], None).unwrap(), ["42"]);
    assert!(db.gvisible(&[cpv.clone()]).unwrap().is_empty());
    assert!(matches!(
        db.fetch_list(&cpv, None, true, None),
        Err(Error::InvalidDependString(_))
    ));
}

#[test]
fn broken_recipes_are_not_retried() {
    let repo = Repo::new("test");
    repo.add("cat/pkg-1.0", "EAPI=8\ndie\n");
    repo.add("cat/pkg-2.0", STABLE);
    let (mut db, counters) = open_single(&repo, config());
    let broken = cpv("cat/pkg-1.0");

    assert!(matches!(db.record(&broken, None), Err(Error::NotFound(_))));
    assert!(matches!(db.aux(&broken), Err(Error::NotFound(_))));
    assert_eq!(counters.evaluations.get(), 1);

    assert_eq!(
        names(&db.match_visible("cat/pkg").unwrap()),
        ["cat/pkg-2.0"]
    );
}

#[test]
fn unparsable_output_marks_the_recipe_broken() {
    let repo = Repo::new("test");
    repo.add("cat/pkg-1.0", "EAPI=8\nSLOT=0\nSRC_URI=ssl? ( https://example.com/a.tar.gz\n");
    let (mut db, counters) = open_single(&repo, config());
    let cpv = cpv("cat/pkg-1.0");

    assert!(matches!(db.record(&cpv, None), Err(Error::NotFound(_))));
    assert!(matches!(db.record(&cpv, None), Err(Error::NotFound(_))));
    assert_eq!(counters.evaluations.get(), 1);
}

#[test]
fn nothing_is_generated_without_eclasses() {
    let repo = Repo::new("test");
    repo.add("cat/pkg-1.0", STABLE);
    fs::remove_dir(repo.path().join("eclass")).unwrap();
    let (mut db, counters) = open_single(&repo, config());

    assert!(matches!(
        db.record(&cpv("cat/pkg-1.0"), None),
        Err(Error::NotFound(_))
    ));
    assert_eq!(counters.evaluations.get(), 0);
}

#[test]
fn missing_recipe_is_not_found() {
    let repo = Repo::new("test");
    let (mut db, counters) = open_single(&repo, config());
    assert!(matches!(
        db.record(&cpv("cat/pkg-1.0"), None),
        Err(Error::NotFound(_))
    ));
    assert_eq!(counters.evaluations.get(), 0);
}

#[test]
fn flat_store_survives_reopening() {
    let repo = Repo::new("test");
    repo.add("cat/pkg-1.0", STABLE);
    let cache = TempDir::new().unwrap();
    let cpv = cpv("cat/pkg-1.0");

    let (mut db, counters) = open_single(&repo, flat_config(&cache));
    let generated = db.record(&cpv, None).unwrap();
    db.close().unwrap();
    assert_eq!(counters.evaluations.get(), 1);
    assert!(cache_entry(cache.path(), &repo, "cat/pkg-1.0").is_file());

    let (mut db, counters) = open_single(&repo, flat_config(&cache));
    assert_eq!(db.record(&cpv, None).unwrap(), generated);
    assert_eq!(counters.evaluations.get(), 0);
}

#[test]
fn corrupt_entries_are_regenerated() {
    let repo = Repo::new("test");
    repo.add("cat/pkg-1.0", STABLE);
    let cache = TempDir::new().unwrap();
    let entry = cache_entry(cache.path(), &repo, "cat/pkg-1.0");
    fs::create_dir_all(entry.parent().unwrap()).unwrap();
    fs::write(&entry, "EAPI=8\nSLOT=0\n").unwrap();

    let (mut db, counters) = open_single(&repo, flat_config(&cache));
    let record = db.record(&cpv("cat/pkg-1.0"), None).unwrap();
    assert_eq!(record.slot_name(), "0");
    assert_eq!(counters.evaluations.get(), 1);
    assert!(fs::read_to_string(&entry).unwrap().contains("_mtime_="));
}

#[test]
fn stale_tombstones_are_regenerated() {
    let repo = Repo::new("test");
    let recipe = repo.add("cat/pkg-1.0", STABLE);
    set_mtime(&recipe, 1_000_000);
    let cache = TempDir::new().unwrap();
    let entry = cache_entry(cache.path(), &repo, "cat/pkg-1.0");
    fs::create_dir_all(entry.parent().unwrap()).unwrap();
    fs::write(&entry, "EAPI=8\n_eapi_state_=unsupported\n_mtime_=1000000\n").unwrap();

    let (mut db, counters) = open_single(&repo, flat_config(&cache));
    let cpv = cpv("cat/pkg-1.0");
    let record = db.record(&cpv, None).unwrap();
    assert!(!record.is_tombstone());
    assert!(matches!(record.eapi, EapiState::Supported(_)));
    assert_eq!(record.eapi.to_string(), "8");
    assert_eq!(record.slot_name(), "0");
    assert_eq!(counters.evaluations.get(), 1);

    db.record(&cpv, None).unwrap();
    assert_eq!(counters.evaluations.get(), 1);
    assert!(!fs::read_to_string(&entry).unwrap().contains("_eapi_state_"));
}

#[test]
fn layered_store_never_writes_the_shared_cache() {
    let repo = Repo::new("test");
    repo.add("cat/pkg-1.0", STABLE);
    let cache = TempDir::new().unwrap();
    let mut config = config();
    config.cache_backend = CacheBackend::Layered {
        dir: cache.path().to_path_buf(),
    };
    let (mut db, counters) = open_single(&repo, config);
    let cpv = cpv("cat/pkg-1.0");

    db.record(&cpv, None).unwrap();
    db.record(&cpv, None).unwrap();
    db.flush().unwrap();
    assert_eq!(counters.evaluations.get(), 1);
    assert!(fs::read_dir(cache.path()).unwrap().next().is_none());
}

#[test]
fn hot_fields_come_from_memory() {
    let repo = Repo::new("test");
    let recipe = repo.add("cat/pkg-1.0", STABLE);
    let (mut db, counters) = open_single(&repo, config());
    let cpv = cpv("cat/pkg-1.0");

    db.aux(&cpv).unwrap();
    set_mtime(&recipe, 1_000_000);
    assert_eq!(
        db.metadata(&cpv, &[Field::Slot, Field::Keywords, Field::Repository], None)
            .unwrap(),
        ["0", "amd64", "test"]
    );
    assert_eq!(counters.evaluations.get(), 1);

    db.metadata(&cpv, &[Field::Slot], Some(repo.path())).unwrap();
    assert_eq!(counters.evaluations.get(), 2);
}

#[test]
fn fetch_lists_follow_use_flags() {
    let repo = Repo::new("test");
    repo.add(
        "cat/pkg-1.0",
        "EAPI=8\nSLOT=0\nIUSE=ssl\nSRC_URI=https://example.com/pkg-1.0.tar.gz \
         ssl? ( https://mirror.example.com/pkg-1.0.tar.gz https://example.com/ssl.patch )\n",
    );
    let (mut db, _) = open_single(&repo, config());
    let cpv = cpv("cat/pkg-1.0");

    let plain = db.fetch_list(&cpv, None, false, None).unwrap();
    assert_eq!(plain.uris, ["https://example.com/pkg-1.0.tar.gz"]);
    assert_eq!(plain.files, ["pkg-1.0.tar.gz"]);

    let ssl: BTreeSet<String> = ["ssl".to_string()].into_iter().collect();
    let with_ssl = db.fetch_list(&cpv, Some(&ssl), false, None).unwrap();
    assert_eq!(with_ssl.uris.len(), 3);
    assert_eq!(with_ssl.files, ["pkg-1.0.tar.gz", "ssl.patch"]);

    assert_eq!(db.fetch_list(&cpv, None, true, None).unwrap(), with_ssl);
}

#[test]
fn fetch_lists_are_validated() {
    let repo = Repo::new("test");
    repo.add(
        "cat/arrow-1.0",
        "EAPI=0\nSLOT=0\nSRC_URI=https://example.com/a.tar.gz -> arrow-1.0.tar.gz\n",
    );
    repo.add("cat/nameless-1.0", "EAPI=8\nSLOT=0\nSRC_URI=https://example.com/\n");
    let (mut db, _) = open_single(&repo, config());

    for name in ["cat/arrow-1.0", "cat/nameless-1.0", "cat/missing-1.0"] {
        assert!(matches!(
            db.fetch_list(&cpv(name), None, true, None),
            Err(Error::InvalidDependString(_))
        ));
    }
}

#[test]
fn repository_lookups() {
    let repo = Repo::new("test");
    repo.add("cat/pkg-1.0", STABLE);
    fs::create_dir_all(repo.path().join("licenses")).unwrap();
    fs::write(repo.path().join("licenses/MIT"), "MIT License\n").unwrap();
    let (db, _) = open_single(&repo, config());

    assert!(db.cpv_exists("cat/pkg-1.0"));
    assert!(!db.cpv_exists("cat/pkg-2.0"));
    assert!(!db.cpv_exists("not an atom"));
    assert_eq!(
        db.find_license_path("MIT"),
        Some(repo.path().join("licenses/MIT"))
    );
    assert_eq!(db.find_license_path("GPL-2"), None);
    let (recipe, root) = db.locate_recipe(&cpv("cat/pkg-1.0"), None).unwrap();
    assert_eq!(root, repo.path());
    assert!(recipe.ends_with("cat/pkg/pkg-1.0.ebuild"));
}

/// Rejects every manifest as insufficiently trusted.
struct Untrusted;

impl ManifestVerifier for Untrusted {
    fn verify(&self, _manifest: &Path, _level: TrustLevel) -> Result<bool> {
        Ok(false)
    }
}

/// Reports every manifest as unsigned.
struct Unsigned;

impl ManifestVerifier for Unsigned {
    fn verify(&self, manifest: &Path, _level: TrustLevel) -> Result<bool> {
        Err(Error::MissingSignature(manifest.display().to_string()))
    }
}

#[test]
fn untrusted_manifests_are_fatal() {
    let repo = Repo::new("test");
    repo.add("cat/pkg-1.0", STABLE);
    let (db, counters) = open_single(&repo, config());
    let mut db = db.with_manifest_verifier(Box::new(Untrusted), SignaturePolicy::Severe);
    let cpv = cpv("cat/pkg-1.0");

    assert!(matches!(
        db.record(&cpv, None),
        Err(Error::UntrustedSignature(_))
    ));
    assert!(matches!(
        db.visible(&[cpv]),
        Err(Error::UntrustedSignature(_))
    ));
    assert_eq!(counters.evaluations.get(), 0);
}

#[test]
fn unsigned_manifests_depend_on_policy() {
    let repo = Repo::new("test");
    repo.add("cat/pkg-1.0", STABLE);
    let cpv = cpv("cat/pkg-1.0");

    let (db, _) = open_single(&repo, config());
    let mut db = db.with_manifest_verifier(Box::new(Unsigned), SignaturePolicy::Warn);
    assert!(db.record(&cpv, None).is_ok());

    let (db, _) = open_single(&repo, config());
    let mut db = db.with_manifest_verifier(Box::new(Unsigned), SignaturePolicy::Severe);
    assert!(matches!(
        db.record(&cpv, None),
        Err(Error::MissingSignature(_))
    ));
}

fn open_from_config(
    repo: &Repo,
    config: portage_db::Config,
    verifier: Option<Box<dyn ManifestVerifier>>,
) -> Result<PortDb> {
    PortDb::from_config(
        RepositorySet::new(repo.path(), vec![]),
        config,
        Box::new(Evaluator::default()),
        Box::new(Eclasses::default()),
        verifier,
    )
}

#[test]
fn config_selects_the_store_backend() {
    let repo = Repo::new("test");
    repo.add("cat/pkg-1.0", STABLE);
    let cache = TempDir::new().unwrap();
    let entry = cache_entry(cache.path(), &repo, "cat/pkg-1.0");

    let mut db = open_from_config(&repo, flat_config(&cache), None).unwrap();
    db.record(&cpv("cat/pkg-1.0"), None).unwrap();
    db.flush().unwrap();
    assert!(fs::read_to_string(&entry).unwrap().contains("_mtime_="));
}

#[test]
fn config_selects_the_signature_policy() {
    let repo = Repo::new("test");
    repo.add("cat/pkg-1.0", STABLE);
    let cpv = cpv("cat/pkg-1.0");
    let mut severe = config();
    severe.signature_policy = Some(SignaturePolicy::Severe);

    let mut db = open_from_config(&repo, severe.clone(), Some(Box::new(Untrusted))).unwrap();
    assert!(matches!(
        db.record(&cpv, None),
        Err(Error::UntrustedSignature(_))
    ));

    assert!(matches!(
        open_from_config(&repo, severe, None),
        Err(Error::InvalidArgument(_))
    ));

    // Without a policy the verifier is not consulted.
    let mut db = open_from_config(&repo, config(), Some(Box::new(Untrusted))).unwrap();
    assert!(db.record(&cpv, None).is_ok());
}
