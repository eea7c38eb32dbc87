use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use serde::Deserialize;

use crate::atom::Atom;
use crate::error::Result;
use crate::iuse::IUse;
use crate::keyword::Keyword;
use crate::license::LicenseAcceptance;
use crate::manifest::SignaturePolicy;
use crate::metadata::AuxRecord;
use crate::settings::Settings;
use crate::store::CacheBackend;
use crate::version::Cpv;

/// Database configuration.
///
/// Every field is optional when deserializing; missing fields take their
/// [`Default`] values.
///
/// `accept_license` and `license_groups` are resolved on the first license
/// check; later changes to them are not seen by that value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Category allowlist. Packages in other categories are not listed.
    pub categories: BTreeSet<String>,
    /// `package.mask` atoms.
    pub package_mask: Vec<Atom>,
    /// `package.unmask` atoms, overriding masks.
    pub package_unmask: Vec<Atom>,
    /// Profile package atoms: a package named here is only visible in
    /// versions satisfying every atom for it.
    pub profile_packages: Vec<Atom>,
    /// Accepted keywords (`ACCEPT_KEYWORDS`).
    pub accept_keywords: Vec<String>,
    /// Extra keywords accepted for matching packages.
    pub package_keywords: Vec<PackageKeywords>,
    /// Accepted licenses (`ACCEPT_LICENSE`).
    pub accept_license: Vec<String>,
    /// License groups usable as `@group` in `accept_license`.
    pub license_groups: BTreeMap<String, Vec<String>>,
    /// Globally enabled USE flags; `-flag` disables, `-*` clears.
    pub use_flags: Vec<String>,
    /// Apply user configuration (license acceptance).
    pub local_config: bool,
    /// Manifest signature policy; `None` disables verification.
    pub signature_policy: Option<SignaturePolicy>,
    /// Metadata store backend.
    pub cache_backend: CacheBackend,
    #[serde(skip)]
    acceptance: AcceptanceCache,
}

/// Resolved license acceptance, built once per config.
///
/// Clones start empty and every cache compares equal, so neither affects
/// the config's own `Clone` and `PartialEq`.
#[derive(Debug, Default)]
struct AcceptanceCache(OnceLock<Result<LicenseAcceptance>>);

impl Clone for AcceptanceCache {
    fn clone(&self) -> Self {
        AcceptanceCache::default()
    }
}

impl PartialEq for AcceptanceCache {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl Eq for AcceptanceCache {}

impl Default for Config {
    fn default() -> Self {
        Self {
            categories: BTreeSet::new(),
            package_mask: Vec::new(),
            package_unmask: Vec::new(),
            profile_packages: Vec::new(),
            accept_keywords: Vec::new(),
            package_keywords: Vec::new(),
            accept_license: vec!["*".to_string()],
            license_groups: BTreeMap::new(),
            use_flags: Vec::new(),
            local_config: true,
            signature_policy: None,
            cache_backend: CacheBackend::default(),
            acceptance: AcceptanceCache::default(),
        }
    }
}

/// Keywords accepted for packages matching `atom`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PackageKeywords {
    /// Packages the keywords apply to.
    pub atom: Atom,
    /// Keywords accepted in addition to `accept_keywords`.
    pub keywords: Vec<String>,
}

fn matches_in_slot(atom: &Atom, cpv: &Cpv, slot: &str) -> bool {
    atom.matches(cpv) && atom.slot_matches(slot, None)
}

impl Settings for Config {
    fn categories(&self) -> &BTreeSet<String> {
        &self.categories
    }

    fn mask_atom(&self, cpv: &Cpv, slot: &str) -> Option<&Atom> {
        let mask = self
            .package_mask
            .iter()
            .find(|atom| matches_in_slot(atom, cpv, slot))?;
        let unmasked = self
            .package_unmask
            .iter()
            .any(|atom| matches_in_slot(atom, cpv, slot));
        (!unmasked).then_some(mask)
    }

    fn profile_mask_atom(&self, cpv: &Cpv, slot: &str) -> Option<&Atom> {
        self.profile_packages.iter().find(|atom| {
            atom.category == cpv.category
                && atom.package == cpv.package
                && !matches_in_slot(atom, cpv, slot)
        })
    }

    fn missing_keywords(&self, cpv: &Cpv, aux: &AuxRecord) -> Vec<String> {
        let mut accept = self.accept_keywords.clone();
        for entry in &self.package_keywords {
            if matches_in_slot(&entry.atom, cpv, aux.slot_name()) {
                accept.extend(entry.keywords.iter().cloned());
            }
        }
        Keyword::missing(&aux.keywords, &accept)
    }

    fn missing_licenses(
        &self,
        _cpv: &Cpv,
        aux: &AuxRecord,
        use_flags: &BTreeSet<String>,
    ) -> Result<Vec<String>> {
        let Some(license) = &aux.license else {
            return Ok(Vec::new());
        };
        let accept = self
            .acceptance
            .0
            .get_or_init(|| LicenseAcceptance::new(&self.accept_license, &self.license_groups))
            .as_ref()
            .map_err(Clone::clone)?;
        Ok(license.missing(accept, use_flags))
    }

    fn use_flags(&self, _cpv: &Cpv, aux: &AuxRecord) -> BTreeSet<String> {
        IUse::effective_use(&aux.iuse, &self.use_flags)
    }

    fn local_config(&self) -> bool {
        self.local_config
    }
}
