use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Default state for an IUSE flag.
///
/// Flags may be prefixed with `+` (enabled by default) or `-` (disabled by
/// default) in the `IUSE` variable.
///
/// See [PMS 7.2](https://projects.gentoo.org/pms/9/pms.html#mandatory-ebuilddefined-variables).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IUseDefault {
    /// `+flag`: enabled by default.
    Enabled,
    /// `-flag`: disabled by default.
    Disabled,
}

/// A single USE flag entry from the `IUSE` variable.
///
/// See [PMS 7.2](https://projects.gentoo.org/pms/9/pms.html#mandatory-ebuilddefined-variables).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IUse {
    /// The USE flag name (without prefix).
    pub name: String,
    /// Optional default state prefix (`+` or `-`).
    pub default: Option<IUseDefault>,
}

impl IUse {
    /// Parse a space-separated `IUSE` line into a list of flags.
    ///
    /// # Examples
    ///
    /// ```
    /// use portage_db::{IUse, IUseDefault};
    ///
    /// let flags = IUse::parse_line("+ssl -debug test").unwrap();
    /// assert_eq!(flags.len(), 3);
    /// assert_eq!(flags[0].name, "ssl");
    /// assert_eq!(flags[0].default, Some(IUseDefault::Enabled));
    /// assert_eq!(flags[1].name, "debug");
    /// assert_eq!(flags[1].default, Some(IUseDefault::Disabled));
    /// assert_eq!(flags[2].name, "test");
    /// assert_eq!(flags[2].default, None);
    /// ```
    pub fn parse_line(input: &str) -> Result<Vec<IUse>> {
        input
            .split_whitespace()
            .map(|token| token.parse())
            .collect()
    }

    /// Compute the effective USE flags of a recipe.
    ///
    /// IUSE `+` defaults are applied first, then `configured` tokens in
    /// order: `flag` enables, `-flag` disables and `-*` clears everything
    /// enabled so far.
    ///
    /// # Examples
    ///
    /// ```
    /// use portage_db::IUse;
    ///
    /// let iuse = IUse::parse_line("+ssl -debug gtk").unwrap();
    /// let flags = IUse::effective_use(&iuse, &["debug".to_string()]);
    /// assert!(flags.contains("ssl"));
    /// assert!(flags.contains("debug"));
    /// assert!(!flags.contains("gtk"));
    /// ```
    pub fn effective_use(iuse: &[IUse], configured: &[String]) -> BTreeSet<String> {
        let mut flags: BTreeSet<String> = iuse
            .iter()
            .filter(|flag| flag.default == Some(IUseDefault::Enabled))
            .map(|flag| flag.name.clone())
            .collect();
        for token in configured.iter().flat_map(|t| t.split_whitespace()) {
            match token.strip_prefix('-') {
                Some("*") => flags.clear(),
                Some(name) => {
                    flags.remove(name);
                }
                None => {
                    flags.insert(token.to_string());
                }
            }
        }
        flags
    }
}

impl FromStr for IUse {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidIUse("empty IUSE entry".to_string()));
        }

        if let Some(name) = s.strip_prefix('+') {
            if name.is_empty() {
                return Err(Error::InvalidIUse(s.to_string()));
            }
            Ok(IUse {
                name: name.to_string(),
                default: Some(IUseDefault::Enabled),
            })
        } else if let Some(name) = s.strip_prefix('-') {
            if name.is_empty() {
                return Err(Error::InvalidIUse(s.to_string()));
            }
            Ok(IUse {
                name: name.to_string(),
                default: Some(IUseDefault::Disabled),
            })
        } else {
            Ok(IUse {
                name: s.to_string(),
                default: None,
            })
        }
    }
}

impl fmt::Display for IUse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.default {
            Some(IUseDefault::Enabled) => write!(f, "+{}", self.name),
            Some(IUseDefault::Disabled) => write!(f, "-{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}
