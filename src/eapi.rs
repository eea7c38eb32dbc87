use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// EAPI (Ebuild API) version understood by this database.
///
/// Any EAPI string that does not parse into this enum is unsupported:
/// recipes declaring it are cached as tombstones and never resolve.
///
/// See [PMS 2](https://projects.gentoo.org/pms/latest/pms.html#eapis).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Eapi {
    /// EAPI 0: base (legacy).
    Zero,
    /// EAPI 1: slot deps, IUSE defaults.
    One,
    /// EAPI 2: SRC_URI arrows, USE deps.
    Two,
    /// EAPI 3: `PROPERTIES`, prefix support.
    Three,
    /// EAPI 4: `REQUIRED_USE`, `pkg_pretend`.
    Four,
    /// EAPI 5: sub-slots, slot operators.
    Five,
    /// EAPI 6: `eapply`/`eapply_user`.
    Six,
    /// EAPI 7: `BDEPEND`, `SYSROOT`/`BROOT`.
    Seven,
    /// EAPI 8: `IDEPEND`, selective URI restrictions.
    Eight,
    /// EAPI 9.
    Nine,
}

impl Eapi {
    /// Whether this EAPI supports SRC_URI arrow renaming (`-> filename`).
    ///
    /// Introduced in EAPI 2.
    pub fn has_src_uri_arrows(&self) -> bool {
        *self >= Eapi::Two
    }

    /// Whether this EAPI supports selective URI restrictions (`fetch+`/`mirror+` prefixes).
    ///
    /// Introduced in EAPI 8.
    pub fn has_selective_uri_restrictions(&self) -> bool {
        *self >= Eapi::Eight
    }
}

impl fmt::Display for Eapi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let n = match self {
            Eapi::Zero => "0",
            Eapi::One => "1",
            Eapi::Two => "2",
            Eapi::Three => "3",
            Eapi::Four => "4",
            Eapi::Five => "5",
            Eapi::Six => "6",
            Eapi::Seven => "7",
            Eapi::Eight => "8",
            Eapi::Nine => "9",
        };
        f.write_str(n)
    }
}

impl FromStr for Eapi {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "0" => Ok(Eapi::Zero),
            "1" => Ok(Eapi::One),
            "2" => Ok(Eapi::Two),
            "3" => Ok(Eapi::Three),
            "4" => Ok(Eapi::Four),
            "5" => Ok(Eapi::Five),
            "6" => Ok(Eapi::Six),
            "7" => Ok(Eapi::Seven),
            "8" => Ok(Eapi::Eight),
            "9" => Ok(Eapi::Nine),
            _ => Err(Error::InvalidEapi(s.to_string())),
        }
    }
}

/// EAPI state of a metadata record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum EapiState {
    /// A supported EAPI.
    Supported(Eapi),
    /// Tombstone: the recipe declared this EAPI, which was unsupported when
    /// the record was generated. All other fields of such a record are empty.
    Unsupported(String),
    /// The stored EAPI could not be interpreted.
    #[default]
    Unknown,
}

impl EapiState {
    /// Classify the EAPI value produced by the build evaluator.
    ///
    /// An empty value means EAPI 0.
    pub fn from_evaluated(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() {
            return EapiState::Supported(Eapi::Zero);
        }
        match value.parse() {
            Ok(eapi) => EapiState::Supported(eapi),
            Err(_) => EapiState::Unsupported(value.to_string()),
        }
    }

    /// The supported EAPI, if any.
    pub fn supported(&self) -> Option<Eapi> {
        match self {
            EapiState::Supported(eapi) => Some(*eapi),
            _ => None,
        }
    }

    /// Whether this is a tombstone whose EAPI has since become supported,
    /// which means the record must be regenerated.
    pub fn is_stale_tombstone(&self) -> bool {
        matches!(self, EapiState::Unsupported(value) if value.parse::<Eapi>().is_ok())
    }
}

impl fmt::Display for EapiState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EapiState::Supported(eapi) => write!(f, "{eapi}"),
            EapiState::Unsupported(value) => f.write_str(value),
            EapiState::Unknown => Ok(()),
        }
    }
}
