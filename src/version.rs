use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use winnow::ascii::{digit0, digit1};
use winnow::combinator::{alt, opt, preceded, repeat, separated};
use winnow::prelude::*;
use winnow::token::one_of;

use crate::error::{Error, Result};

/// Version suffix kinds, in ascending order.
///
/// A version without a suffix sorts between [`SuffixKind::Rc`] and
/// [`SuffixKind::P`].
///
/// See [PMS 3.2](https://projects.gentoo.org/pms/9/pms.html#version-specifications).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SuffixKind {
    /// `_alpha`
    Alpha,
    /// `_beta`
    Beta,
    /// `_pre`
    Pre,
    /// `_rc`
    Rc,
    /// `_p`
    P,
}

impl fmt::Display for SuffixKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            SuffixKind::Alpha => "alpha",
            SuffixKind::Beta => "beta",
            SuffixKind::Pre => "pre",
            SuffixKind::Rc => "rc",
            SuffixKind::P => "p",
        })
    }
}

#[derive(Debug, Clone)]
struct Suffix {
    kind: SuffixKind,
    number: String,
}

/// A package version such as `1.2.3b_rc1-r2`.
///
/// Ordering follows [PMS 3.3](https://projects.gentoo.org/pms/9/pms.html#version-comparison):
/// numeric components, then the letter, then the suffix list, then the
/// revision. Numeric parts are compared as arbitrary-length integers.
///
/// Equality is version equality, so `1.0` equals `1.00` and `1.0-r0`
/// equals `1.0`; [`Version::as_str`] keeps the original spelling.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    numbers: Vec<String>,
    letter: Option<char>,
    suffixes: Vec<Suffix>,
    revision: Option<String>,
}

impl Version {
    /// Parse a version string.
    ///
    /// # Examples
    ///
    /// ```
    /// use portage_db::Version;
    ///
    /// let a = Version::parse("1.2-r1").unwrap();
    /// let b = Version::parse("1.2").unwrap();
    /// assert!(a > b);
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let (numbers, letter, suffixes, revision) = parse_version
            .parse(input)
            .map_err(|_| Error::InvalidVersion(input.to_string()))?;
        Ok(Version {
            raw: input.to_string(),
            numbers,
            letter,
            suffixes,
            revision,
        })
    }

    /// The version as originally written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The revision number, `0` when absent.
    pub fn revision(&self) -> u64 {
        self.revision
            .as_deref()
            .and_then(|r| r.parse().ok())
            .unwrap_or(0)
    }

    /// The version string without its `-rN` part.
    pub fn base(&self) -> &str {
        match self.raw.rsplit_once("-r") {
            Some((base, _)) if self.revision.is_some() => base,
            _ => &self.raw,
        }
    }

    /// Compare two versions, ignoring their revisions.
    pub fn cmp_base(&self, other: &Self) -> Ordering {
        cmp_numbers(&self.numbers, &other.numbers)
            .then_with(|| self.letter.cmp(&other.letter))
            .then_with(|| cmp_suffixes(&self.suffixes, &other.suffixes))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_base(other).then_with(|| {
            cmp_int(
                self.revision.as_deref().unwrap_or("0"),
                other.revision.as_deref().unwrap_or("0"),
            )
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

/// Compare digit strings as unbounded non-negative integers.
fn cmp_int(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn cmp_numbers(a: &[String], b: &[String]) -> Ordering {
    let (Some(first_a), Some(first_b)) = (a.first(), b.first()) else {
        return a.len().cmp(&b.len());
    };
    let ord = cmp_int(first_a, first_b);
    if ord != Ordering::Equal {
        return ord;
    }
    for (x, y) in a.iter().zip(b.iter()).skip(1) {
        // Components with a leading zero compare as decimal fractions.
        let ord = if x.starts_with('0') || y.starts_with('0') {
            x.trim_end_matches('0').cmp(y.trim_end_matches('0'))
        } else {
            cmp_int(x, y)
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn cmp_suffixes(a: &[Suffix], b: &[Suffix]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = x
            .kind
            .cmp(&y.kind)
            .then_with(|| cmp_int(&x.number, &y.number));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    match a.len().cmp(&b.len()) {
        Ordering::Equal => Ordering::Equal,
        Ordering::Greater => extra_suffix_order(&a[b.len()]),
        Ordering::Less => extra_suffix_order(&b[a.len()]).reverse(),
    }
}

/// Ordering of a version carrying an extra suffix against one without it.
fn extra_suffix_order(extra: &Suffix) -> Ordering {
    if extra.kind == SuffixKind::P {
        Ordering::Greater
    } else {
        Ordering::Less
    }
}

// Winnow parsers

type Parts = (Vec<String>, Option<char>, Vec<Suffix>, Option<String>);

fn parse_suffix(input: &mut &str) -> ModalResult<Suffix> {
    preceded(
        '_',
        (
            alt((
                "alpha".value(SuffixKind::Alpha),
                "beta".value(SuffixKind::Beta),
                "pre".value(SuffixKind::Pre),
                "rc".value(SuffixKind::Rc),
                "p".value(SuffixKind::P),
            )),
            digit0.map(|s: &str| s.to_string()),
        ),
    )
    .map(|(kind, number)| Suffix { kind, number })
    .parse_next(input)
}

fn parse_version(input: &mut &str) -> ModalResult<Parts> {
    (
        separated(1.., digit1.map(|s: &str| s.to_string()), '.'),
        opt(one_of('a'..='z')),
        repeat(0.., parse_suffix),
        opt(preceded("-r", digit1.map(|s: &str| s.to_string()))),
    )
        .parse_next(input)
}

fn is_valid_category(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(['-', '.', '+'])
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '_' | '.' | '-'))
}

/// Whether `name` is a legal package name.
///
/// A package name may not end in a hyphen followed by something that is
/// itself a valid version.
pub(crate) fn is_valid_package(name: &str) -> bool {
    if name.is_empty()
        || name.starts_with(['-', '+'])
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '_' | '-'))
    {
        return false;
    }
    match name.rsplit_once('-') {
        Some((_, tail)) => Version::parse(tail).is_err(),
        None => true,
    }
}

/// Split a `package-version` string into its name and version.
///
/// Returns `None` when the string does not end in a valid version or the
/// remaining name is not a legal package name.
pub(crate) fn split_pf(pf: &str) -> Option<(&str, Version)> {
    let (head, last) = pf.rsplit_once('-')?;
    if let Some(rev) = last.strip_prefix('r') {
        if !rev.is_empty() && rev.bytes().all(|b| b.is_ascii_digit()) {
            if let Some((name, _)) = head.rsplit_once('-') {
                let version = &pf[name.len() + 1..];
                if let Ok(v) = Version::parse(version) {
                    if is_valid_package(name) {
                        return Some((name, v));
                    }
                }
            }
        }
    }
    let version = Version::parse(last).ok()?;
    is_valid_package(head).then_some((head, version))
}

/// The identity of one recipe: `category/package-version`.
///
/// Two CPVs are equal only when they are spelled identically; ordering
/// groups by category and package and then sorts by [`Version`].
#[derive(Debug, Clone)]
pub struct Cpv {
    /// Category name, e.g. `dev-libs`.
    pub category: String,
    /// Package name, e.g. `openssl`.
    pub package: String,
    /// Package version including revision.
    pub version: Version,
}

impl Cpv {
    /// Parse a `category/package-version` string.
    ///
    /// # Examples
    ///
    /// ```
    /// use portage_db::Cpv;
    ///
    /// let cpv = Cpv::parse("sys-apps/portage-2.1.3-r1").unwrap();
    /// assert_eq!(cpv.cp(), "sys-apps/portage");
    /// assert_eq!(cpv.version.revision(), 1);
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || Error::InvalidCpv(input.to_string());
        let (category, pf) = input.split_once('/').ok_or_else(invalid)?;
        if !is_valid_category(category) {
            return Err(invalid());
        }
        let (package, version) = split_pf(pf).ok_or_else(invalid)?;
        Ok(Cpv {
            category: category.to_string(),
            package: package.to_string(),
            version,
        })
    }

    /// The `category/package` key.
    pub fn cp(&self) -> String {
        format!("{}/{}", self.category, self.package)
    }

    /// The `package-version` part, which is also the recipe file stem.
    pub fn pf(&self) -> String {
        format!("{}-{}", self.package, self.version.as_str())
    }
}

impl fmt::Display for Cpv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}-{}", self.category, self.package, self.version)
    }
}

impl FromStr for Cpv {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Cpv::parse(s)
    }
}

impl PartialEq for Cpv {
    fn eq(&self, other: &Self) -> bool {
        self.category == other.category
            && self.package == other.package
            && self.version.as_str() == other.version.as_str()
    }
}

impl Eq for Cpv {}

impl Hash for Cpv {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.category.hash(state);
        self.package.hash(state);
        self.version.as_str().hash(state);
    }
}

impl PartialOrd for Cpv {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cpv {
    fn cmp(&self, other: &Self) -> Ordering {
        self.category
            .cmp(&other.category)
            .then_with(|| self.package.cmp(&other.package))
            .then_with(|| self.version.cmp(&other.version))
            .then_with(|| self.version.as_str().cmp(other.version.as_str()))
    }
}

/// Return the highest CPV of `candidates`, if any.
pub fn best<'a>(candidates: impl IntoIterator<Item = &'a Cpv>) -> Option<&'a Cpv> {
    candidates.into_iter().max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[rstest]
    #[case("1.2-r1", "1.2-r0")]
    #[case("1.2-r0", "1.1")]
    #[case("1.2", "1.1.9")]
    #[case("1.10", "1.9")]
    #[case("1.2b", "1.2a")]
    #[case("1.2a", "1.2")]
    #[case("1.0", "1.0_rc1")]
    #[case("1.0_rc1", "1.0_pre9")]
    #[case("1.0_pre1", "1.0_beta2")]
    #[case("1.0_beta1", "1.0_alpha3")]
    #[case("1.0_p1", "1.0")]
    #[case("1.0_p2", "1.0_p1")]
    #[case("1.0_alpha", "1.0_alpha_alpha")]
    #[case("1.0_alpha_p", "1.0_alpha")]
    #[case("1.1", "1.01")]
    #[case("1.01", "1.001")]
    #[case("2", "1.99999")]
    #[case("123456789012345678901234567890", "123456789012345678901234567889")]
    #[case("1.0-r10", "1.0-r9")]
    fn ordering(#[case] greater: &str, #[case] lesser: &str) {
        assert!(v(greater) > v(lesser), "{greater} > {lesser}");
        assert!(v(lesser) < v(greater), "{lesser} < {greater}");
    }

    #[rstest]
    #[case("1.0", "1.00")]
    #[case("1.0", "1.0-r0")]
    #[case("01", "1")]
    fn equality(#[case] a: &str, #[case] b: &str) {
        assert_eq!(v(a), v(b));
    }

    #[rstest]
    #[case("")]
    #[case("a1")]
    #[case("1.")]
    #[case("1..2")]
    #[case("1.0_foo")]
    #[case("1.0-r")]
    #[case("1.0ab")]
    #[case("1.0-1")]
    fn invalid_versions(#[case] input: &str) {
        assert!(Version::parse(input).is_err(), "{input:?}");
    }

    #[test]
    fn base_and_revision() {
        let ver = v("2.1.3_rc2-r4");
        assert_eq!(ver.base(), "2.1.3_rc2");
        assert_eq!(ver.revision(), 4);
        assert_eq!(v("2.1").base(), "2.1");
        assert_eq!(v("2.1").revision(), 0);
    }

    #[test]
    fn parse_cpv() {
        let cpv = Cpv::parse("cat/pkg-1.2-r1").unwrap();
        assert_eq!(cpv.category, "cat");
        assert_eq!(cpv.package, "pkg");
        assert_eq!(cpv.version.as_str(), "1.2-r1");
        assert_eq!(cpv.pf(), "pkg-1.2-r1");
        assert_eq!(cpv.to_string(), "cat/pkg-1.2-r1");
    }

    #[test]
    fn parse_cpv_hyphenated_name() {
        let cpv = Cpv::parse("dev-python/python-dateutil-2.8.2").unwrap();
        assert_eq!(cpv.package, "python-dateutil");
        assert_eq!(cpv.version.as_str(), "2.8.2");
    }

    #[test]
    fn parse_cpv_name_looks_like_revision() {
        let cpv = Cpv::parse("cat/foo-r1-1.0").unwrap();
        assert_eq!(cpv.package, "foo-r1");
    }

    #[rstest]
    #[case("pkg-1.0")]
    #[case("cat/pkg")]
    #[case("cat/pkg-")]
    #[case("-cat/pkg-1.0")]
    #[case("cat/pkg-1.0-2.0")]
    #[case("cat/-1.0")]
    fn invalid_cpvs(#[case] input: &str) {
        assert!(Cpv::parse(input).is_err(), "{input:?}");
    }

    #[test]
    fn cpv_identity_is_spelling() {
        let a = Cpv::parse("cat/pkg-1.0").unwrap();
        let b = Cpv::parse("cat/pkg-1.00").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.version, b.version);
        assert_ne!(a.cmp(&b), Ordering::Equal);
    }

    #[test]
    fn sort_ascending() {
        let mut cpvs: Vec<Cpv> = ["cat/pkg-1.2-r1", "cat/pkg-1.1", "cat/pkg-1.2", "cat/pkg-1.2_rc1"]
            .iter()
            .map(|s| Cpv::parse(s).unwrap())
            .collect();
        cpvs.sort();
        let sorted: Vec<String> = cpvs.iter().map(|c| c.to_string()).collect();
        assert_eq!(
            sorted,
            ["cat/pkg-1.1", "cat/pkg-1.2_rc1", "cat/pkg-1.2", "cat/pkg-1.2-r1"]
        );
        assert_eq!(best(&cpvs).unwrap().to_string(), "cat/pkg-1.2-r1");
    }

    #[test]
    fn package_name_validation() {
        assert!(is_valid_package("pkg"));
        assert!(is_valid_package("gtk+"));
        assert!(is_valid_package("foo-bar"));
        assert!(!is_valid_package("foo-1"));
        assert!(!is_valid_package("-foo"));
        assert!(!is_valid_package(""));
        assert!(!is_valid_package("foo.bar"));
    }
}
