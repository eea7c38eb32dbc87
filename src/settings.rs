use std::collections::BTreeSet;

use crate::atom::Atom;
use crate::error::Result;
use crate::metadata::AuxRecord;
use crate::version::Cpv;

/// Masking and acceptance settings consulted during visibility checks.
///
/// [`Config`](crate::Config) is the stock implementation.
pub trait Settings {
    /// Category allowlist.
    fn categories(&self) -> &BTreeSet<String>;

    /// The mask atom hiding `cpv` in `slot`, unless an unmask overrides it.
    fn mask_atom(&self, cpv: &Cpv, slot: &str) -> Option<&Atom>;

    /// The first profile atom for the package of `cpv` that `cpv` in `slot`
    /// fails to satisfy.
    fn profile_mask_atom(&self, cpv: &Cpv, slot: &str) -> Option<&Atom>;

    /// Keywords `cpv` would need to carry to be accepted; empty when its
    /// keywords are acceptable.
    fn missing_keywords(&self, cpv: &Cpv, aux: &AuxRecord) -> Vec<String>;

    /// Licenses of `cpv` not accepted under `use_flags`.
    ///
    /// Fails when the acceptance settings themselves are broken.
    fn missing_licenses(
        &self,
        cpv: &Cpv,
        aux: &AuxRecord,
        use_flags: &BTreeSet<String>,
    ) -> Result<Vec<String>>;

    /// USE flags in effect for `cpv`.
    fn use_flags(&self, cpv: &Cpv, aux: &AuxRecord) -> BTreeSet<String>;

    /// Whether user configuration applies, which enables license checks.
    fn local_config(&self) -> bool;
}
