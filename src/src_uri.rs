use std::collections::BTreeSet;
use std::fmt;

use winnow::ascii::multispace0;
use winnow::combinator::{alt, cut_err, delimited, dispatch, opt, peek, preceded, repeat};
use winnow::error::{ContextError, ErrMode, StrContext};
use winnow::prelude::*;
use winnow::token::{any, take_while};

use crate::error::{Error, Result};

/// A single entry in a `SRC_URI` expression.
///
/// `SRC_URI` specifies the source files needed to build a package. Entries
/// may be plain URIs, renamed URIs (EAPI 2+: `url -> filename`), or
/// USE-conditional groups. EAPI 8+ supports selective URI restrictions
/// with `fetch+` and `mirror+` prefixes.
///
/// See [PMS 7.3.2](https://projects.gentoo.org/pms/9/pms.html#srcuri)
/// and [PMS 8.2](https://projects.gentoo.org/pms/9/pms.html#dependency-specification-format).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SrcUriEntry {
    /// A plain URI. The filename is derived from the last path component.
    Uri {
        /// The download URL.
        url: String,
        /// The target filename (last path component of the URL).
        filename: String,
        /// URI restriction prefix (EAPI 8+): `None`, `Some("fetch")`, or `Some("mirror")`.
        restriction: Option<String>,
    },
    /// A renamed URI (EAPI 2+): `url -> target`.
    Renamed {
        /// The download URL.
        url: String,
        /// The local filename to save as.
        target: String,
        /// URI restriction prefix (EAPI 8+): `None`, `Some("fetch")`, or `Some("mirror")`.
        restriction: Option<String>,
    },
    /// `flag? ( entries... )` or `!flag? ( entries... )` conditional group.
    UseConditional {
        /// USE flag name.
        flag: String,
        /// `true` for `!flag?` (negated conditional).
        negated: bool,
        /// Entries guarded by this flag.
        entries: Vec<SrcUriEntry>,
    },
    /// A bare parenthesized group `( entries... )`.
    Group(Vec<SrcUriEntry>),
}

impl SrcUriEntry {
    /// Parse a `SRC_URI` expression string into a list of entries.
    ///
    /// # Examples
    ///
    /// ```
    /// use portage_db::SrcUriEntry;
    ///
    /// let entries = SrcUriEntry::parse(
    ///     "https://example.com/foo-1.0.tar.gz ssl? ( https://example.com/ssl.patch )"
    /// ).unwrap();
    /// assert_eq!(entries.len(), 2);
    /// ```
    pub fn parse(input: &str) -> Result<Vec<SrcUriEntry>> {
        parse_src_uri_string()
            .parse(input)
            .map_err(|e| Error::InvalidSrcUri(format!("{e}")))
    }

    /// Flatten `entries` into the URIs that apply under `use_flags`.
    ///
    /// With `all` set, every USE-conditional branch is taken regardless of
    /// the flags, which yields the complete set of possible sources.
    pub fn reduce<'a>(
        entries: &'a [SrcUriEntry],
        use_flags: &BTreeSet<String>,
        all: bool,
    ) -> Vec<&'a SrcUriEntry> {
        let mut out = Vec::new();
        reduce_into(entries, use_flags, all, &mut out);
        out
    }

    /// Download URL of a plain or renamed entry.
    pub fn url(&self) -> Option<&str> {
        match self {
            SrcUriEntry::Uri { url, .. } | SrcUriEntry::Renamed { url, .. } => Some(url.as_str()),
            _ => None,
        }
    }

    /// Local distfile name of a plain or renamed entry.
    pub fn distfile(&self) -> Option<&str> {
        match self {
            SrcUriEntry::Uri { filename, .. } => Some(filename.as_str()),
            SrcUriEntry::Renamed { target, .. } => Some(target.as_str()),
            _ => None,
        }
    }

    /// URI restriction prefix (`fetch` or `mirror`) of a plain or renamed entry.
    pub fn restriction(&self) -> Option<&str> {
        match self {
            SrcUriEntry::Uri { restriction, .. } | SrcUriEntry::Renamed { restriction, .. } => {
                restriction.as_deref()
            }
            _ => None,
        }
    }
}

fn reduce_into<'a>(
    entries: &'a [SrcUriEntry],
    use_flags: &BTreeSet<String>,
    all: bool,
    out: &mut Vec<&'a SrcUriEntry>,
) {
    for entry in entries {
        match entry {
            SrcUriEntry::Uri { .. } | SrcUriEntry::Renamed { .. } => out.push(entry),
            SrcUriEntry::Group(children) => reduce_into(children, use_flags, all, out),
            SrcUriEntry::UseConditional {
                flag,
                negated,
                entries: children,
            } => {
                if all || use_flags.contains(flag) != *negated {
                    reduce_into(children, use_flags, all, out);
                }
            }
        }
    }
}

/// Extract filename from a URL (last path component).
fn filename_from_url(url: &str) -> String {
    url.rsplit('/')
        .next()
        .unwrap_or(url)
        .split('?')
        .next()
        .unwrap_or(url)
        .to_string()
}

impl fmt::Display for SrcUriEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SrcUriEntry::Uri {
                url, restriction, ..
            } => {
                if let Some(prefix) = restriction {
                    write!(f, "{prefix}+")?;
                }
                write!(f, "{url}")
            }
            SrcUriEntry::Renamed {
                url,
                target,
                restriction,
            } => {
                if let Some(prefix) = restriction {
                    write!(f, "{prefix}+")?;
                }
                write!(f, "{url} -> {target}")
            }
            SrcUriEntry::UseConditional {
                flag,
                negated,
                entries,
            } => {
                if *negated {
                    write!(f, "!")?;
                }
                write!(f, "{flag}? ( ")?;
                for (i, entry) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{entry}")?;
                }
                write!(f, " )")
            }
            SrcUriEntry::Group(entries) => {
                write!(f, "( ")?;
                for (i, entry) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{entry}")?;
                }
                write!(f, " )")
            }
        }
    }
}

// Winnow parsers

fn is_uri_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            ':' | '/'
                | '.'
                | '-'
                | '_'
                | '~'
                | '$'
                | '&'
                | '\''
                | '*'
                | '+'
                | ','
                | ';'
                | '='
                | '%'
                | '@'
                | '#'
                | '?'
        )
}

fn is_filename_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+')
}

fn is_flag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '+'
}

fn parse_uri<'s>() -> impl Parser<&'s str, String, ErrMode<ContextError>> {
    take_while(1.., is_uri_char).map(|s: &str| s.to_string())
}

fn parse_restriction_prefix<'s>() -> impl Parser<&'s str, Option<String>, ErrMode<ContextError>> {
    opt(alt((
        "fetch+".map(|_| "fetch".to_string()),
        "mirror+".map(|_| "mirror".to_string()),
    )))
}

fn parse_filename<'s>() -> impl Parser<&'s str, String, ErrMode<ContextError>> {
    take_while(1.., is_filename_char).map(|s: &str| s.to_string())
}

/// Parse a single URI, optionally followed by `-> filename`.
fn parse_uri_entry<'s>() -> impl Parser<&'s str, SrcUriEntry, ErrMode<ContextError>> {
    (
        parse_restriction_prefix(),
        parse_uri(),
        opt(preceded((multispace0, "->", multispace0), parse_filename())),
    )
        .map(|(restriction, url, rename)| {
            if let Some(target) = rename {
                SrcUriEntry::Renamed {
                    url,
                    target,
                    restriction,
                }
            } else {
                let filename = filename_from_url(&url);
                SrcUriEntry::Uri {
                    url,
                    filename,
                    restriction,
                }
            }
        })
}

/// Parse `[!]flag? ( entries... )`.
fn parse_use_conditional<'s>() -> impl Parser<&'s str, SrcUriEntry, ErrMode<ContextError>> {
    move |input: &mut &'s str| {
        let negated = opt('!').parse_next(input)?.is_some();
        let flag: String = take_while(1.., is_flag_char)
            .map(|s: &str| s.to_string())
            .parse_next(input)?;
        '?'.parse_next(input)?;
        multispace0.parse_next(input)?;
        let entries = cut_err(delimited('(', parse_src_uri_entries, (multispace0, ')')))
            .context(StrContext::Label("USE conditional group"))
            .parse_next(input)?;
        Ok(SrcUriEntry::UseConditional {
            flag,
            negated,
            entries,
        })
    }
}

/// Parse `( entries... )`: bare parenthesized group.
fn parse_group<'s>() -> impl Parser<&'s str, SrcUriEntry, ErrMode<ContextError>> {
    delimited(
        '(',
        parse_src_uri_entries,
        cut_err((multispace0, ')')).context(StrContext::Label("closing ')'")),
    )
    .map(SrcUriEntry::Group)
}

/// Parse a single SRC_URI entry.
fn parse_src_uri_entry(input: &mut &str) -> ModalResult<SrcUriEntry> {
    dispatch! {peek(any);
        '(' => parse_group(),
        _ => alt((
            parse_use_conditional(),
            parse_uri_entry(),
        )),
    }
    .parse_next(input)
}

/// Parse zero or more SRC_URI entries separated by whitespace.
fn parse_src_uri_entries(input: &mut &str) -> ModalResult<Vec<SrcUriEntry>> {
    repeat(0.., preceded(multispace0, parse_src_uri_entry)).parse_next(input)
}

/// Parse a complete SRC_URI string.
pub(crate) fn parse_src_uri_string<'s>(
) -> impl Parser<&'s str, Vec<SrcUriEntry>, ErrMode<ContextError>> {
    move |input: &mut &'s str| {
        let entries = parse_src_uri_entries(input)?;
        multispace0.parse_next(input)?;
        Ok(entries)
    }
}
