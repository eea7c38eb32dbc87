use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use winnow::ascii::multispace0;
use winnow::combinator::{alt, cut_err, delimited, dispatch, opt, peek, preceded, repeat};
use winnow::error::{ContextError, ErrMode, StrContext};
use winnow::prelude::*;
use winnow::token::{any, take_while};

use crate::error::{Error, Result};

/// A node in a `LICENSE` expression tree.
///
/// The `LICENSE` variable uses a dependency-specification-like grammar
/// with `||` (any-of) groups and USE-conditional groups.
///
/// See [PMS 7.2](https://projects.gentoo.org/pms/9/pms.html#mandatory-ebuilddefined-variables)
/// and [PMS 8.2](https://projects.gentoo.org/pms/9/pms.html#dependency-specification-format).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LicenseExpr {
    /// A single license identifier (e.g. `MIT`, `GPL-2+`).
    License(String),
    /// `|| ( license1 license2 ... )`: any one license is acceptable.
    AnyOf(Vec<LicenseExpr>),
    /// `flag? ( licenses... )` or `!flag? ( licenses... )` conditional group.
    UseConditional {
        /// USE flag name.
        flag: String,
        /// `true` for `!flag?` (negated conditional).
        negated: bool,
        /// License entries guarded by this flag.
        entries: Vec<LicenseExpr>,
    },
    /// Top-level grouping: all listed licenses apply.
    All(Vec<LicenseExpr>),
}

impl LicenseExpr {
    /// Parse a `LICENSE` expression string.
    ///
    /// # Examples
    ///
    /// ```
    /// use portage_db::LicenseExpr;
    ///
    /// let expr = LicenseExpr::parse("|| ( MIT Apache-2.0 )").unwrap();
    /// assert!(matches!(expr, LicenseExpr::AnyOf(_)));
    ///
    /// let expr = LicenseExpr::parse("GPL-2+").unwrap();
    /// assert!(matches!(expr, LicenseExpr::License(_)));
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let mut entries: Vec<LicenseExpr> = parse_license_string()
            .parse(input)
            .map_err(|e| Error::InvalidLicense(format!("{e}")))?;

        if entries.len() == 1 {
            if let Some(single) = entries.pop() {
                return Ok(single);
            }
        }
        Ok(LicenseExpr::All(entries))
    }

    /// Whether any part of the expression depends on a USE flag.
    pub fn has_use_conditional(&self) -> bool {
        match self {
            LicenseExpr::License(_) => false,
            LicenseExpr::UseConditional { .. } => true,
            LicenseExpr::AnyOf(entries) | LicenseExpr::All(entries) => {
                entries.iter().any(LicenseExpr::has_use_conditional)
            }
        }
    }

    /// Return the licenses that would have to be accepted for this
    /// expression to be satisfied.
    ///
    /// USE-conditional groups only count when `use_flags` enables them.
    /// An `||` group is satisfied if any child is; otherwise the smallest
    /// missing set among its children is reported.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::{BTreeMap, BTreeSet};
    /// use portage_db::{LicenseAcceptance, LicenseExpr};
    ///
    /// let accept = LicenseAcceptance::new(&["MIT".to_string()], &BTreeMap::new()).unwrap();
    /// let expr = LicenseExpr::parse("|| ( GPL-2 MIT ) ssl? ( OpenSSL )").unwrap();
    /// assert!(expr.missing(&accept, &BTreeSet::new()).is_empty());
    ///
    /// let use_flags = BTreeSet::from(["ssl".to_string()]);
    /// assert_eq!(expr.missing(&accept, &use_flags), ["OpenSSL"]);
    /// ```
    pub fn missing(&self, accept: &LicenseAcceptance, use_flags: &BTreeSet<String>) -> Vec<String> {
        match self {
            LicenseExpr::License(name) => {
                if accept.accepts(name) {
                    Vec::new()
                } else {
                    vec![name.clone()]
                }
            }
            LicenseExpr::All(entries) => missing_all(entries, accept, use_flags),
            LicenseExpr::UseConditional {
                flag,
                negated,
                entries,
            } => {
                if use_flags.contains(flag) != *negated {
                    missing_all(entries, accept, use_flags)
                } else {
                    Vec::new()
                }
            }
            LicenseExpr::AnyOf(entries) => entries
                .iter()
                .map(|entry| entry.missing(accept, use_flags))
                .min_by_key(Vec::len)
                .unwrap_or_default(),
        }
    }
}

fn missing_all(
    entries: &[LicenseExpr],
    accept: &LicenseAcceptance,
    use_flags: &BTreeSet<String>,
) -> Vec<String> {
    let mut missing = Vec::new();
    for entry in entries {
        for name in entry.missing(accept, use_flags) {
            if !missing.contains(&name) {
                missing.push(name);
            }
        }
    }
    missing
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LicensePattern {
    Any,
    Name(String),
}

/// Parsed `ACCEPT_LICENSE` setting.
///
/// Tokens are applied in order and the last matching one wins: `*` accepts
/// everything, `-*` rejects everything, `name`/`-name` accept or reject a
/// single license and `@group`/`-@group` every license of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseAcceptance {
    rules: Vec<(bool, LicensePattern)>,
}

impl LicenseAcceptance {
    /// Build the acceptance rules from `ACCEPT_LICENSE` tokens, expanding
    /// groups through `groups` (group name without `@` to members).
    ///
    /// An unknown group is an [`Error::InvalidLicense`].
    pub fn new(accept: &[String], groups: &BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut rules = Vec::new();
        for token in accept.iter().flat_map(|t| t.split_whitespace()) {
            let (allow, name) = match token.strip_prefix('-') {
                Some(name) => (false, name),
                None => (true, token),
            };
            if name == "*" {
                rules.push((allow, LicensePattern::Any));
            } else if let Some(group) = name.strip_prefix('@') {
                let mut members = Vec::new();
                expand_group(group, groups, &mut BTreeSet::new(), &mut members)?;
                rules.extend(members.into_iter().map(|m| (allow, LicensePattern::Name(m))));
            } else if !name.is_empty() {
                rules.push((allow, LicensePattern::Name(name.to_string())));
            }
        }
        Ok(LicenseAcceptance { rules })
    }

    /// Whether `license` is accepted.
    pub fn accepts(&self, license: &str) -> bool {
        self.rules
            .iter()
            .rev()
            .find(|(_, pattern)| match pattern {
                LicensePattern::Any => true,
                LicensePattern::Name(name) => name == license,
            })
            .map_or(false, |(allow, _)| *allow)
    }
}

fn expand_group(
    group: &str,
    groups: &BTreeMap<String, Vec<String>>,
    seen: &mut BTreeSet<String>,
    out: &mut Vec<String>,
) -> Result<()> {
    if !seen.insert(group.to_string()) {
        return Ok(());
    }
    let members = groups
        .get(group)
        .ok_or_else(|| Error::InvalidLicense(format!("unknown license group @{group}")))?;
    for member in members {
        match member.strip_prefix('@') {
            Some(nested) => expand_group(nested, groups, seen, out)?,
            None => out.push(member.clone()),
        }
    }
    Ok(())
}

impl fmt::Display for LicenseExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LicenseExpr::License(name) => write!(f, "{name}"),
            LicenseExpr::AnyOf(entries) => {
                write!(f, "|| ( ")?;
                for (i, entry) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{entry}")?;
                }
                write!(f, " )")
            }
            LicenseExpr::UseConditional {
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
            LicenseExpr::All(entries) => {
                for (i, entry) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{entry}")?;
                }
                Ok(())
            }
        }
    }
}

// Winnow parsers

fn is_license_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+')
}

fn is_flag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '+' || c == '@'
}

fn parse_license_name<'s>() -> impl Parser<&'s str, LicenseExpr, ErrMode<ContextError>> {
    take_while(1.., is_license_char)
        .verify(|name: &str| {
            // Validate license name according to PMS 3.1.7
            !name.starts_with(['-', '.', '+'])
        })
        .map(|name: &str| LicenseExpr::License(name.to_string()))
}

fn parse_any_of<'s>() -> impl Parser<&'s str, LicenseExpr, ErrMode<ContextError>> {
    preceded(
        "||",
        preceded(
            multispace0,
            cut_err(delimited('(', parse_license_entries, (multispace0, ')')))
                .context(StrContext::Label("'||' group")),
        ),
    )
    .map(LicenseExpr::AnyOf)
}

fn parse_use_conditional<'s>() -> impl Parser<&'s str, LicenseExpr, ErrMode<ContextError>> {
    move |input: &mut &'s str| {
        let negated = opt('!').parse_next(input)?.is_some();
        let flag: String = take_while(1.., is_flag_char)
            .map(|s: &str| s.to_string())
            .parse_next(input)?;
        '?'.parse_next(input)?;
        multispace0.parse_next(input)?;
        let entries = cut_err(delimited('(', parse_license_entries, (multispace0, ')')))
            .context(StrContext::Label("USE conditional group"))
            .parse_next(input)?;
        Ok(LicenseExpr::UseConditional {
            flag,
            negated,
            entries,
        })
    }
}

fn parse_paren_group(input: &mut &str) -> ModalResult<Vec<LicenseExpr>> {
    delimited(
        '(',
        parse_license_entries,
        cut_err((multispace0, ')')).context(StrContext::Label("closing ')'")),
    )
    .parse_next(input)
}

fn parse_license_entry(input: &mut &str) -> ModalResult<Vec<LicenseExpr>> {
    dispatch! {peek(any);
        '|' => parse_any_of().map(|e| vec![e]),
        '(' => parse_paren_group,
        _ => alt((
            parse_use_conditional().map(|e| vec![e]),
            parse_license_name().map(|e| vec![e]),
        )),
    }
    .parse_next(input)
}

fn parse_license_entries(input: &mut &str) -> ModalResult<Vec<LicenseExpr>> {
    repeat(0.., preceded(multispace0, parse_license_entry))
        .fold(
            Vec::new,
            |mut acc: Vec<LicenseExpr>, batch: Vec<LicenseExpr>| {
                acc.extend(batch);
                acc
            },
        )
        .parse_next(input)
}

pub(crate) fn parse_license_string<'s>(
) -> impl Parser<&'s str, Vec<LicenseExpr>, ErrMode<ContextError>> {
    move |input: &mut &'s str| {
        let entries = parse_license_entries(input)?;
        multispace0.parse_next(input)?;
        Ok(entries)
    }
}
