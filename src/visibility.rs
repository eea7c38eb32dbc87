//! Visibility predicates.
//!
//! A candidate is checked against an ordered list of [`Check`]s; the first
//! failing check yields the [`Rejection`] and stops the chain.

use std::collections::BTreeSet;
use std::fmt;

use crate::atom::Atom;
use crate::metadata::AuxRecord;
use crate::settings::Settings;
use crate::version::Cpv;

/// A single visibility predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Check {
    /// The recipe declares a slot.
    HasSlot,
    /// The recipe's EAPI is supported.
    Eapi,
    /// The recipe is in the slot the queried atom asks for.
    AtomSlot,
    /// The recipe carries an accepted keyword.
    Keywords,
    /// No mask atom hides the recipe.
    Mask,
    /// The recipe satisfies every profile atom for its package.
    ProfileMask,
    /// Every license the recipe needs is accepted.
    License,
}

/// Checks applied by `visible`: slot and masks only.
pub const VISIBLE: &[Check] = &[Check::HasSlot, Check::Mask, Check::ProfileMask];

/// Checks applied by `gvisible` on top of [`VISIBLE`].
pub const GVISIBLE: &[Check] = &[Check::Eapi, Check::Keywords, Check::License];

/// Checks applied when scanning for the lowest or highest visible match.
pub const SCAN: &[Check] = &[
    Check::Eapi,
    Check::AtomSlot,
    Check::Keywords,
    Check::Mask,
    Check::ProfileMask,
    Check::License,
];

/// Why a candidate is not visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The recipe declares no slot.
    EmptySlot,
    /// The recipe's EAPI is not supported.
    UnsupportedEapi(String),
    /// The recipe is in slot `have`, the atom asks for `want`.
    SlotMismatch {
        /// Slot named by the atom.
        want: String,
        /// Slot of the recipe.
        have: String,
    },
    /// Keywords the recipe would need to carry.
    MissingKeywords(Vec<String>),
    /// Hidden by this mask atom.
    Masked(String),
    /// Fails this profile atom.
    ProfileMasked(String),
    /// Licenses that are not accepted.
    MissingLicenses(Vec<String>),
    /// The license requirement could not be evaluated.
    InvalidLicense(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Rejection::EmptySlot => f.write_str("empty SLOT"),
            Rejection::UnsupportedEapi(eapi) => write!(f, "unsupported EAPI '{eapi}'"),
            Rejection::SlotMismatch { want, have } => {
                write!(f, "slot '{have}' does not match '{want}'")
            }
            Rejection::MissingKeywords(kw) => write!(f, "missing keyword: {}", kw.join(" ")),
            Rejection::Masked(atom) => write!(f, "masked by {atom}"),
            Rejection::ProfileMasked(atom) => write!(f, "does not satisfy profile atom {atom}"),
            Rejection::MissingLicenses(lic) => write!(f, "missing license: {}", lic.join(" ")),
            Rejection::InvalidLicense(reason) => write!(f, "invalid license: {reason}"),
        }
    }
}

/// Applies [`Check`] chains using a [`Settings`] provider.
#[derive(Clone, Copy)]
pub struct VisibilityFilter<'a> {
    settings: &'a dyn Settings,
}

impl<'a> VisibilityFilter<'a> {
    /// A filter consulting `settings`.
    pub fn new(settings: &'a dyn Settings) -> Self {
        VisibilityFilter { settings }
    }

    /// Run `checks` in order against `cpv` and its metadata.
    ///
    /// `atom` supplies the slot for [`Check::AtomSlot`]; without one that
    /// check passes.
    pub fn check(
        &self,
        checks: &[Check],
        cpv: &Cpv,
        aux: &AuxRecord,
        atom: Option<&Atom>,
    ) -> Result<(), Rejection> {
        checks
            .iter()
            .try_for_each(|check| self.apply(*check, cpv, aux, atom))
    }

    fn apply(
        &self,
        check: Check,
        cpv: &Cpv,
        aux: &AuxRecord,
        atom: Option<&Atom>,
    ) -> Result<(), Rejection> {
        let settings = self.settings;
        match check {
            Check::HasSlot => {
                if aux.slot_name().is_empty() {
                    return Err(Rejection::EmptySlot);
                }
            }
            Check::Eapi => {
                if aux.eapi.supported().is_none() {
                    return Err(Rejection::UnsupportedEapi(aux.eapi.to_string()));
                }
            }
            Check::AtomSlot => {
                if let Some(atom) = atom {
                    if !atom.slot_matches(aux.slot_name(), aux.subslot()) {
                        return Err(Rejection::SlotMismatch {
                            want: atom.slot.clone().unwrap_or_default(),
                            have: aux.slot_name().to_string(),
                        });
                    }
                }
            }
            Check::Keywords => {
                let missing = settings.missing_keywords(cpv, aux);
                if !missing.is_empty() {
                    return Err(Rejection::MissingKeywords(missing));
                }
            }
            Check::Mask => {
                if let Some(atom) = settings.mask_atom(cpv, aux.slot_name()) {
                    return Err(Rejection::Masked(atom.to_string()));
                }
            }
            Check::ProfileMask => {
                if let Some(atom) = settings.profile_mask_atom(cpv, aux.slot_name()) {
                    return Err(Rejection::ProfileMasked(atom.to_string()));
                }
            }
            Check::License => {
                if !settings.local_config() {
                    return Ok(());
                }
                let use_flags = match &aux.license {
                    Some(license) if license.has_use_conditional() => {
                        settings.use_flags(cpv, aux)
                    }
                    _ => BTreeSet::new(),
                };
                match settings.missing_licenses(cpv, aux, &use_flags) {
                    Ok(missing) if missing.is_empty() => {}
                    Ok(missing) => return Err(Rejection::MissingLicenses(missing)),
                    Err(e) => return Err(Rejection::InvalidLicense(e.to_string())),
                }
            }
        }
        Ok(())
    }
}
