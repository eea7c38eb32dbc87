use std::fmt;
use std::str::FromStr;

use portage_atom::{DepEntry, Slot};

use crate::eapi::EapiState;
use crate::error::{Error, Result};
use crate::iuse::IUse;
use crate::keyword::Keyword;
use crate::license::LicenseExpr;
use crate::src_uri::SrcUriEntry;

/// Metadata for a single recipe in one repository root.
///
/// Besides the PMS metadata variables the record carries the bookkeeping
/// needed to decide whether it is still valid: the recipe modification
/// time it was generated from and the checksums of the eclasses it
/// inherited.
///
/// A record whose [`EapiState`] is `Unsupported` is a tombstone: every
/// other metadata field is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataRecord {
    /// EAPI state.
    pub eapi: EapiState,

    /// Package slot. `None` when the recipe declared an empty `SLOT`.
    pub slot: Option<Slot>,

    /// Package description.
    pub description: String,

    /// Homepage URL(s).
    pub homepage: Vec<String>,

    /// Source URI expression.
    pub src_uri: Vec<SrcUriEntry>,

    /// License expression.
    pub license: Option<LicenseExpr>,

    /// Architecture keywords.
    pub keywords: Vec<Keyword>,

    /// USE flags declared by the recipe.
    pub iuse: Vec<IUse>,

    /// RESTRICT tokens, verbatim.
    pub restrict: Vec<String>,

    /// Old-style virtuals provided by the recipe (`PROVIDE`), verbatim.
    pub provide: Vec<String>,

    /// Build-time dependencies (`DEPEND`).
    pub depend: Vec<DepEntry>,

    /// Runtime dependencies (`RDEPEND`).
    pub rdepend: Vec<DepEntry>,

    /// Post-merge dependencies (`PDEPEND`).
    pub pdepend: Vec<DepEntry>,

    /// Name of the repository the recipe was found in; empty for unnamed
    /// roots. Filled in on lookup, never persisted.
    pub repository: String,

    /// Recipe modification time (seconds since the epoch) the record was
    /// generated from.
    pub mtime: i64,

    /// Inherited eclasses with their checksums, as `(name, checksum)`.
    pub eclasses: Vec<(String, String)>,
}

impl MetadataRecord {
    /// A tombstone for a recipe declaring the unsupported EAPI `eapi`.
    pub fn tombstone(eapi: &str, mtime: i64) -> Self {
        MetadataRecord {
            eapi: EapiState::Unsupported(eapi.to_string()),
            mtime,
            ..Default::default()
        }
    }

    /// Whether this record is a tombstone for an unsupported EAPI.
    pub fn is_tombstone(&self) -> bool {
        matches!(self.eapi, EapiState::Unsupported(_))
    }

    /// Slot name, empty when the recipe has no slot.
    pub fn slot_name(&self) -> &str {
        self.slot.as_ref().map_or("", |s| s.slot.as_str())
    }

    /// Render one field the way it appears in a metadata cache file.
    pub fn get(&self, field: Field) -> String {
        match field {
            Field::Description => self.description.clone(),
            Field::Homepage => self.homepage.join(" "),
            Field::SrcUri => join(&self.src_uri),
            Field::Inherited => self
                .eclasses
                .iter()
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            hot => AuxRecord::from(self).get(hot).unwrap_or_default(),
        }
    }
}

/// Projection of a [`MetadataRecord`] onto the hot fields used by
/// dependency resolution.
///
/// This is what the in-memory auxiliary cache holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuxRecord {
    /// EAPI state; a tombstone leaves every other field empty.
    pub eapi: EapiState,
    /// Slot and sub-slot.
    pub slot: Option<Slot>,
    /// License expression.
    pub license: Option<LicenseExpr>,
    /// Keywords.
    pub keywords: Vec<Keyword>,
    /// USE flags with their defaults.
    pub iuse: Vec<IUse>,
    /// `RESTRICT` tokens.
    pub restrict: Vec<String>,
    /// Old-style virtuals provided.
    pub provide: Vec<String>,
    /// Build dependencies.
    pub depend: Vec<DepEntry>,
    /// Runtime dependencies.
    pub rdepend: Vec<DepEntry>,
    /// Post-merge dependencies.
    pub pdepend: Vec<DepEntry>,
    /// Repository the recipe was found in.
    pub repository: String,
}

impl AuxRecord {
    /// Slot name, empty when the recipe has no slot.
    pub fn slot_name(&self) -> &str {
        self.slot.as_ref().map_or("", |s| s.slot.as_str())
    }

    /// Sub-slot, if the recipe declared one.
    pub fn subslot(&self) -> Option<&str> {
        self.slot.as_ref().and_then(|s| s.subslot.as_deref())
    }

    /// Render a hot field; `None` for fields outside the projection.
    pub fn get(&self, field: Field) -> Option<String> {
        let value = match field {
            Field::Eapi => self.eapi.to_string(),
            Field::Slot => self.slot.as_ref().map(|s| s.to_string()).unwrap_or_default(),
            Field::License => self.license.as_ref().map(|l| l.to_string()).unwrap_or_default(),
            Field::Keywords => join(&self.keywords),
            Field::Iuse => join(&self.iuse),
            Field::Restrict => self.restrict.join(" "),
            Field::Provide => self.provide.join(" "),
            Field::Depend => join(&self.depend),
            Field::Rdepend => join(&self.rdepend),
            Field::Pdepend => join(&self.pdepend),
            Field::Repository => self.repository.clone(),
            _ => return None,
        };
        Some(value)
    }
}

impl From<&MetadataRecord> for AuxRecord {
    fn from(record: &MetadataRecord) -> Self {
        AuxRecord {
            eapi: record.eapi.clone(),
            slot: record.slot.clone(),
            license: record.license.clone(),
            keywords: record.keywords.clone(),
            iuse: record.iuse.clone(),
            restrict: record.restrict.clone(),
            provide: record.provide.clone(),
            depend: record.depend.clone(),
            rdepend: record.rdepend.clone(),
            pdepend: record.pdepend.clone(),
            repository: record.repository.clone(),
        }
    }
}

/// A queryable metadata key.
///
/// Variants render as the key written in cache files, see [`Field::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// `DEPEND`
    Depend,
    /// `DESCRIPTION`
    Description,
    /// `EAPI`
    Eapi,
    /// `HOMEPAGE`
    Homepage,
    /// `INHERITED`, the eclass names of the record.
    Inherited,
    /// `IUSE`
    Iuse,
    /// `KEYWORDS`
    Keywords,
    /// `LICENSE`
    License,
    /// `PDEPEND`
    Pdepend,
    /// `PROVIDE`
    Provide,
    /// `RDEPEND`
    Rdepend,
    /// `repository`, the name of the repository holding the recipe.
    Repository,
    /// `RESTRICT`
    Restrict,
    /// `SLOT`
    Slot,
    /// `SRC_URI`
    SrcUri,
}

impl Field {
    /// Whether the field is part of the [`AuxRecord`] projection.
    pub fn is_hot(&self) -> bool {
        !matches!(
            self,
            Field::Description | Field::Homepage | Field::Inherited | Field::SrcUri
        )
    }

    /// The metadata key as written in cache files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Depend => "DEPEND",
            Field::Description => "DESCRIPTION",
            Field::Eapi => "EAPI",
            Field::Homepage => "HOMEPAGE",
            Field::Inherited => "INHERITED",
            Field::Iuse => "IUSE",
            Field::Keywords => "KEYWORDS",
            Field::License => "LICENSE",
            Field::Pdepend => "PDEPEND",
            Field::Provide => "PROVIDE",
            Field::Rdepend => "RDEPEND",
            Field::Repository => "repository",
            Field::Restrict => "RESTRICT",
            Field::Slot => "SLOT",
            Field::SrcUri => "SRC_URI",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "DEPEND" => Field::Depend,
            "DESCRIPTION" => Field::Description,
            "EAPI" => Field::Eapi,
            "HOMEPAGE" => Field::Homepage,
            "INHERITED" => Field::Inherited,
            "IUSE" => Field::Iuse,
            "KEYWORDS" => Field::Keywords,
            "LICENSE" => Field::License,
            "PDEPEND" => Field::Pdepend,
            "PROVIDE" => Field::Provide,
            "RDEPEND" => Field::Rdepend,
            "repository" => Field::Repository,
            "RESTRICT" => Field::Restrict,
            "SLOT" => Field::Slot,
            "SRC_URI" => Field::SrcUri,
            _ => return Err(Error::InvalidArgument(format!("unknown metadata key {s}"))),
        })
    }
}

pub(crate) fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eapi::Eapi;

    fn record() -> MetadataRecord {
        MetadataRecord {
            eapi: EapiState::Supported(Eapi::Seven),
            slot: Some(Slot::with_subslot("0", "1.2")),
            description: "Example".to_string(),
            keywords: Keyword::parse_line("amd64 ~x86").unwrap(),
            license: Some(LicenseExpr::parse("MIT").unwrap()),
            repository: "gentoo".to_string(),
            eclasses: vec![
                ("toolchain-funcs".to_string(), "aa".to_string()),
                ("flag-o-matic".to_string(), "bb".to_string()),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn projection_keeps_hot_fields() {
        let record = record();
        let aux = AuxRecord::from(&record);
        assert_eq!(aux.slot_name(), "0");
        assert_eq!(aux.subslot(), Some("1.2"));
        assert_eq!(aux.get(Field::Keywords).as_deref(), Some("amd64 ~x86"));
        assert_eq!(aux.get(Field::Eapi).as_deref(), Some("7"));
        assert_eq!(aux.get(Field::Repository).as_deref(), Some("gentoo"));
        assert_eq!(aux.get(Field::Description), None);
    }

    #[test]
    fn record_renders_every_field() {
        let record = record();
        assert_eq!(record.get(Field::Description), "Example");
        assert_eq!(record.get(Field::License), "MIT");
        assert_eq!(record.get(Field::Inherited), "toolchain-funcs flag-o-matic");
        assert_eq!(record.get(Field::Depend), "");
    }

    #[test]
    fn hot_fields() {
        for name in ["DEPEND", "EAPI", "IUSE", "KEYWORDS", "LICENSE", "PDEPEND", "PROVIDE",
                     "RDEPEND", "repository", "RESTRICT", "SLOT"] {
            let field: Field = name.parse().unwrap();
            assert!(field.is_hot(), "{name}");
            assert_eq!(field.to_string(), name);
        }
        for name in ["DESCRIPTION", "HOMEPAGE", "INHERITED", "SRC_URI"] {
            assert!(!name.parse::<Field>().unwrap().is_hot(), "{name}");
        }
        assert!(matches!("BOGUS".parse::<Field>(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn tombstone_is_empty() {
        let record = MetadataRecord::tombstone("10", 42);
        assert!(record.is_tombstone());
        assert_eq!(record.mtime, 42);
        assert_eq!(record.slot_name(), "");
        assert!(record.keywords.is_empty());
        assert_eq!(record.get(Field::Eapi), "10");
    }
}
