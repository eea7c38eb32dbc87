//! Gentoo ebuild repository metadata database and atom resolver based on
//! [PMS].
//!
//! This crate locates recipes (ebuilds) in a set of repository roots, keeps
//! their metadata in a persistent cache that is regenerated when it goes
//! stale, and resolves dependency atoms to visible, slot-correct versions.
//!
//! [PMS]: https://projects.gentoo.org/pms/latest/pms.html
//!
//! # Overview
//!
//! Evaluating an ebuild needs a full shell environment, so metadata is
//! produced by an external [`BuildEvaluator`] and stored per repository root
//! in a [`MetadataStore`]. A stored record stays valid while the recipe's
//! modification time and the checksums of its eclasses are unchanged.
//!
//! [`PortDb`] ties everything together: version enumeration, visibility
//! filtering through a [`Settings`] provider, and the multi-level
//! [`xmatch`](PortDb::xmatch) resolver with its freeze/melt query cache.
//!
//! # Examples
//!
//! Parse atoms and compare versions:
//!
//! ```
//! use portage_db::{Atom, Cpv, Version};
//!
//! let atom = Atom::parse(">=dev-libs/foo-1.2:0").unwrap();
//! assert!(atom.matches(&Cpv::parse("dev-libs/foo-1.10").unwrap()));
//! assert!(Version::parse("1.2-r1").unwrap() > Version::parse("1.2").unwrap());
//! ```
//!
//! Read a stored metadata record:
//!
//! ```
//! use portage_db::{Field, MetadataRecord};
//!
//! let input = "\
//! EAPI=7
//! DESCRIPTION=Example package
//! SLOT=0
//! KEYWORDS=~amd64
//! _mtime_=1700000000
//! ";
//! let record = MetadataRecord::parse(input).unwrap();
//! assert_eq!(record.get(Field::Description), "Example package");
//! assert_eq!(record.get(Field::Eapi), "7");
//! ```

mod atom;
mod cache;
mod catalog;
mod config;
mod db;
mod eapi;
mod eclass;
mod error;
mod evaluator;
mod iuse;
mod keyword;
mod license;
mod manifest;
mod matcher;
mod metadata;
mod repository;
mod settings;
mod src_uri;
mod store;
mod version;
mod visibility;

// Re-export public types
pub use atom::{match_from_list, Atom, Operator};
pub use catalog::VersionCatalog;
pub use config::{Config, PackageKeywords};
pub use db::{FetchList, PortDb};
pub use eapi::{Eapi, EapiState};
pub use eclass::EclassChecksumProvider;
pub use error::{Error, Result};
pub use evaluator::BuildEvaluator;
pub use iuse::{IUse, IUseDefault};
pub use keyword::{Keyword, Stability};
pub use license::{LicenseAcceptance, LicenseExpr};
pub use manifest::{ManifestVerifier, SignaturePolicy, TrustLevel};
pub use matcher::{Level, MatchResult};
pub use metadata::{AuxRecord, Field, MetadataRecord};
pub use repository::{RepositoryRoot, RepositorySet};
pub use settings::Settings;
pub use src_uri::SrcUriEntry;
pub use store::{CacheBackend, FlatFileStore, LayeredStore, MemoryStore, MetadataStore};
pub use version::{best, Cpv, SuffixKind, Version};
pub use visibility::{Check, Rejection, VisibilityFilter, GVISIBLE, SCAN, VISIBLE};
