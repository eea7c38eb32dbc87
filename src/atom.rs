use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use winnow::combinator::{alt, delimited, opt, preceded, separated};
use winnow::prelude::*;
use winnow::token::take_while;

use crate::error::{Error, Result};
use crate::version::{is_valid_package, Cpv, Version};

/// Version comparison operator of a dependency atom.
///
/// See [PMS 8.3.1](https://projects.gentoo.org/pms/9/pms.html#operators).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `<`
    Less,
    /// `<=`
    LessOrEqual,
    /// `=`
    Equal,
    /// `=` with a trailing `*`: version prefix match.
    EqualGlob,
    /// `~`: equal ignoring revision.
    Approximate,
    /// `>=`
    GreaterOrEqual,
    /// `>`
    Greater,
}

/// A parsed dependency atom such as `>=dev-libs/foo-1.2:0[ssl]`.
///
/// Atoms always carry a category. Slot restrictions are not checked by
/// [`Atom::matches`] because slots live in metadata, not in the CPV.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Atom {
    /// Version operator, if any.
    pub operator: Option<Operator>,
    /// Category name.
    pub category: String,
    /// Package name.
    pub package: String,
    /// Version constraint, present iff `operator` is.
    pub version: Option<Version>,
    /// Slot restriction (`:slot`).
    pub slot: Option<String>,
    /// Sub-slot restriction (`:slot/subslot`).
    pub subslot: Option<String>,
    /// USE dependency tokens from `[...]`, kept verbatim.
    pub use_deps: Vec<String>,
    raw: String,
}

impl Atom {
    /// Parse a dependency atom.
    ///
    /// # Examples
    ///
    /// ```
    /// use portage_db::{Atom, Cpv, Operator};
    ///
    /// let atom = Atom::parse(">=cat/pkg-1.0:2").unwrap();
    /// assert_eq!(atom.operator, Some(Operator::GreaterOrEqual));
    /// assert_eq!(atom.slot.as_deref(), Some("2"));
    /// assert!(atom.matches(&Cpv::parse("cat/pkg-1.1").unwrap()));
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || Error::InvalidAtom(input.to_string());
        let (operator, body, glob, slot, use_deps) =
            parse_atom.parse(input).map_err(|_| invalid())?;

        let operator = match (operator, glob) {
            (Some(Operator::Equal), true) => Some(Operator::EqualGlob),
            (_, true) => return Err(invalid()),
            (op, false) => op,
        };

        let (category, package, version) = if operator.is_some() {
            let cpv = Cpv::parse(body).map_err(|_| invalid())?;
            (cpv.category, cpv.package, Some(cpv.version))
        } else {
            let (category, package) = body.split_once('/').ok_or_else(invalid)?;
            if category.is_empty() || !is_valid_package(package) {
                return Err(invalid());
            }
            (category.to_string(), package.to_string(), None)
        };

        let (slot, subslot) = match slot.flatten() {
            Some((slot, subslot)) => (Some(slot), subslot),
            None => (None, None),
        };

        Ok(Atom {
            operator,
            category,
            package,
            version,
            slot,
            subslot,
            use_deps: use_deps.unwrap_or_default(),
            raw: input.to_string(),
        })
    }

    /// The `category/package` key this atom refers to.
    pub fn cp(&self) -> String {
        format!("{}/{}", self.category, self.package)
    }

    /// Whether the atom is nothing more than its package key.
    pub fn is_bare(&self) -> bool {
        self.raw == self.cp()
    }

    /// Whether `cpv` has the right key and satisfies the version constraint.
    pub fn matches(&self, cpv: &Cpv) -> bool {
        if cpv.category != self.category || cpv.package != self.package {
            return false;
        }
        let (Some(op), Some(want)) = (self.operator, self.version.as_ref()) else {
            return true;
        };
        let have = &cpv.version;
        match op {
            Operator::Less => have < want,
            Operator::LessOrEqual => have <= want,
            Operator::Equal => have == want,
            Operator::EqualGlob => have.as_str().starts_with(want.as_str()),
            Operator::Approximate => have.cmp_base(want).is_eq(),
            Operator::GreaterOrEqual => have >= want,
            Operator::Greater => have > want,
        }
    }

    /// Whether a recipe in `slot` (with optional `subslot`) satisfies the
    /// slot restriction of this atom.
    pub fn slot_matches(&self, slot: &str, subslot: Option<&str>) -> bool {
        match &self.slot {
            None => true,
            Some(want) if want != slot => false,
            Some(_) => match &self.subslot {
                None => true,
                Some(want) => subslot.unwrap_or(slot) == want,
            },
        }
    }
}

/// Filter `candidates` down to those matching `atom`, preserving order.
///
/// Slot restrictions are ignored here.
pub fn match_from_list(atom: &Atom, candidates: &[Cpv]) -> Vec<Cpv> {
    candidates
        .iter()
        .filter(|cpv| atom.matches(cpv))
        .cloned()
        .collect()
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Atom {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Atom::parse(s)
    }
}

impl TryFrom<String> for Atom {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Atom::parse(&s)
    }
}

// Winnow parsers

type SlotSpec = Option<(String, Option<String>)>;
type AtomParts<'s> = (
    Option<Operator>,
    &'s str,
    bool,
    Option<SlotSpec>,
    Option<Vec<String>>,
);

fn is_body_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '_' | '.' | '-' | '/')
}

fn is_slot_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '_' | '.' | '-')
}

fn is_use_dep_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '_' | '-' | '@' | '!' | '=' | '?' | '(' | ')')
}

fn parse_operator(input: &mut &str) -> ModalResult<Operator> {
    alt((
        ">=".value(Operator::GreaterOrEqual),
        "<=".value(Operator::LessOrEqual),
        ">".value(Operator::Greater),
        "<".value(Operator::Less),
        "=".value(Operator::Equal),
        "~".value(Operator::Approximate),
    ))
    .parse_next(input)
}

/// `:*`, `:=`, `:slot`, `:slot/subslot`, optionally followed by `=`.
fn parse_slot(input: &mut &str) -> ModalResult<SlotSpec> {
    preceded(
        ':',
        alt((
            '*'.value(None),
            '='.value(None),
            (
                take_while(1.., is_slot_char),
                opt(preceded('/', take_while(1.., is_slot_char))),
                opt('='),
            )
                .map(|(slot, subslot, _): (&str, Option<&str>, _)| {
                    Some((slot.to_string(), subslot.map(str::to_string)))
                }),
        )),
    )
    .parse_next(input)
}

fn parse_use_deps(input: &mut &str) -> ModalResult<Vec<String>> {
    delimited(
        '[',
        separated(
            1..,
            take_while(1.., is_use_dep_char).map(|s: &str| s.to_string()),
            ',',
        ),
        ']',
    )
    .parse_next(input)
}

fn parse_atom<'s>(input: &mut &'s str) -> ModalResult<AtomParts<'s>> {
    (
        opt(parse_operator),
        take_while(1.., is_body_char),
        opt('*').map(|g| g.is_some()),
        opt(parse_slot),
        opt(parse_use_deps),
    )
        .parse_next(input)
}
