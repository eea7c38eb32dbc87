use portage_atom::{DepEntry, Slot};

use crate::eapi::{Eapi, EapiState};
use crate::error::{Error, Result};
use crate::iuse::IUse;
use crate::keyword::Keyword;
use crate::license::LicenseExpr;
use crate::metadata::{join, MetadataRecord};
use crate::src_uri::SrcUriEntry;

/// Marker written in place of the EAPI sign convention for tombstones.
const UNSUPPORTED: &str = "unsupported";

/// Raw `KEY=VALUE` fields, before typed parsing.
#[derive(Debug, Default)]
struct RawFields<'a> {
    eapi: Option<&'a str>,
    eapi_state: Option<&'a str>,
    slot: &'a str,
    description: &'a str,
    homepage: &'a str,
    src_uri: &'a str,
    license: &'a str,
    keywords: &'a str,
    iuse: &'a str,
    restrict: &'a str,
    provide: &'a str,
    depend: &'a str,
    rdepend: &'a str,
    pdepend: &'a str,
    mtime: Option<&'a str>,
    eclasses: &'a str,
}

impl<'a> RawFields<'a> {
    fn collect(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut raw = RawFields::default();
        for (key, value) in pairs {
            match key {
                "EAPI" => raw.eapi = Some(value),
                "_eapi_state_" => raw.eapi_state = Some(value),
                "SLOT" => raw.slot = value,
                "DESCRIPTION" => raw.description = value,
                "HOMEPAGE" => raw.homepage = value,
                "SRC_URI" => raw.src_uri = value,
                "LICENSE" => raw.license = value,
                "KEYWORDS" => raw.keywords = value,
                "IUSE" => raw.iuse = value,
                "RESTRICT" => raw.restrict = value,
                "PROVIDE" => raw.provide = value,
                "DEPEND" => raw.depend = value,
                "RDEPEND" => raw.rdepend = value,
                "PDEPEND" => raw.pdepend = value,
                "_mtime_" => raw.mtime = Some(value),
                "_eclasses_" => raw.eclasses = value,
                _ => {} // Ignore unknown keys
            }
        }
        raw
    }

    /// Parse every metadata field; bookkeeping is left to the caller.
    fn build(&self, eapi: EapiState) -> Result<MetadataRecord> {
        let license = if self.license.trim().is_empty() {
            None
        } else {
            Some(LicenseExpr::parse(self.license)?)
        };

        Ok(MetadataRecord {
            eapi,
            slot: parse_slot(self.slot),
            description: self.description.trim().to_string(),
            homepage: words(self.homepage),
            src_uri: SrcUriEntry::parse(self.src_uri)?,
            license,
            keywords: Keyword::parse_line(self.keywords)?,
            iuse: IUse::parse_line(self.iuse)?,
            restrict: words(self.restrict),
            provide: words(self.provide),
            depend: parse_dep_field(self.depend)?,
            rdepend: parse_dep_field(self.rdepend)?,
            pdepend: parse_dep_field(self.pdepend)?,
            ..Default::default()
        })
    }
}

impl MetadataRecord {
    /// Build a record from the field map produced by the build evaluator.
    ///
    /// A missing or empty `EAPI` means EAPI 0. An unsupported EAPI yields a
    /// tombstone without looking at the other fields. `INHERITED` and the
    /// bookkeeping fields are ignored: the caller stamps the record.
    pub fn from_fields<'a>(fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self> {
        let raw = RawFields::collect(fields);
        match EapiState::from_evaluated(raw.eapi.unwrap_or_default()) {
            EapiState::Unsupported(eapi) => Ok(MetadataRecord::tombstone(&eapi, 0)),
            eapi => raw.build(eapi),
        }
    }

    /// Parse a stored record.
    ///
    /// The input is the full text of a metadata cache file: `KEY=VALUE`
    /// lines in arbitrary order, empty values may be omitted.
    ///
    /// # Examples
    ///
    /// ```
    /// use portage_db::MetadataRecord;
    ///
    /// let input = "\
    /// EAPI=7
    /// SLOT=0
    /// KEYWORDS=~amd64
    /// _mtime_=1700000000
    /// _eclasses_=toolchain-funcs\tabc123
    /// ";
    /// let record = MetadataRecord::parse(input).unwrap();
    /// assert_eq!(record.slot_name(), "0");
    /// assert_eq!(record.mtime, 1700000000);
    /// assert_eq!(record.eclasses.len(), 1);
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let raw = RawFields::collect(
            input
                .lines()
                .map(|line| line.trim_end_matches('\r'))
                .filter(|line| !line.trim().is_empty())
                .filter_map(|line| line.split_once('=')),
        );

        let mtime = match raw.mtime {
            Some(value) => value
                .trim()
                .parse::<i64>()
                .map_err(|_| Error::InvalidCacheEntry(format!("bad _mtime_ value: {value}")))?,
            None => return Err(Error::MissingField("_mtime_".to_string())),
        };
        let eclasses = parse_eclasses(raw.eclasses);
        let eapi_value = raw.eapi.unwrap_or_default().trim();

        let mut record = match raw.eapi_state {
            Some(UNSUPPORTED) => MetadataRecord::tombstone(eapi_value, mtime),
            Some(other) => {
                return Err(Error::InvalidCacheEntry(format!(
                    "unknown _eapi_state_ value: {other}"
                )))
            }
            None => {
                let eapi = if eapi_value.is_empty() {
                    EapiState::Supported(Eapi::Zero)
                } else {
                    eapi_value
                        .parse()
                        .map(EapiState::Supported)
                        .unwrap_or(EapiState::Unknown)
                };
                raw.build(eapi)?
            }
        };
        record.mtime = mtime;
        record.eclasses = eclasses;
        Ok(record)
    }

    /// Serialize this record to the stored text form.
    ///
    /// Empty-valued fields are omitted; `repository` is never written.
    pub fn serialize(&self) -> String {
        let mut lines = Vec::new();

        if !self.depend.is_empty() {
            lines.push(format!("DEPEND={}", join(&self.depend)));
        }
        if !self.description.is_empty() {
            lines.push(format!("DESCRIPTION={}", self.description));
        }
        lines.push(format!("EAPI={}", self.eapi));
        if !self.homepage.is_empty() {
            lines.push(format!("HOMEPAGE={}", self.homepage.join(" ")));
        }
        if !self.iuse.is_empty() {
            lines.push(format!("IUSE={}", join(&self.iuse)));
        }
        if !self.keywords.is_empty() {
            lines.push(format!("KEYWORDS={}", join(&self.keywords)));
        }
        if let Some(ref lic) = self.license {
            lines.push(format!("LICENSE={}", lic));
        }
        if !self.pdepend.is_empty() {
            lines.push(format!("PDEPEND={}", join(&self.pdepend)));
        }
        if !self.provide.is_empty() {
            lines.push(format!("PROVIDE={}", self.provide.join(" ")));
        }
        if !self.rdepend.is_empty() {
            lines.push(format!("RDEPEND={}", join(&self.rdepend)));
        }
        if !self.restrict.is_empty() {
            lines.push(format!("RESTRICT={}", self.restrict.join(" ")));
        }
        if let Some(ref slot) = self.slot {
            lines.push(format!("SLOT={}", slot));
        }
        if !self.src_uri.is_empty() {
            lines.push(format!("SRC_URI={}", join(&self.src_uri)));
        }

        if !self.eclasses.is_empty() {
            let parts: Vec<&str> = self
                .eclasses
                .iter()
                .flat_map(|(name, checksum)| [name.as_str(), checksum.as_str()])
                .collect();
            lines.push(format!("_eclasses_={}", parts.join("\t")));
        }
        if self.is_tombstone() {
            lines.push(format!("_eapi_state_={UNSUPPORTED}"));
        }
        lines.push(format!("_mtime_={}", self.mtime));

        lines.push(String::new()); // trailing newline
        lines.join("\n")
    }
}

fn words(s: &str) -> Vec<String> {
    s.split_whitespace().map(|s| s.to_string()).collect()
}

/// Parse a SLOT value; empty means no slot.
fn parse_slot(s: &str) -> Option<Slot> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    Some(match s.split_once('/') {
        Some((slot, subslot)) => Slot::with_subslot(slot, subslot),
        None => Slot::new(s),
    })
}

/// Parse a dependency field value into `Vec<DepEntry>`.
fn parse_dep_field(s: &str) -> Result<Vec<DepEntry>> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }
    DepEntry::parse(s).map_err(|e| Error::DepError(format!("{e}")))
}

/// Parse the `_eclasses_` value: tab-separated pairs of `name\tchecksum`.
fn parse_eclasses(s: &str) -> Vec<(String, String)> {
    if s.is_empty() {
        return Vec::new();
    }
    let parts: Vec<&str> = s.split('\t').collect();
    parts
        .chunks(2)
        .filter_map(|chunk| match chunk {
            [name, checksum] => Some((name.to_string(), checksum.to_string())),
            _ => None,
        })
        .collect()
}
