use std::path::Path;

/// Error type for portage-db lookups, parsing and resolution.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// Unknown CPV or category, or the recipe is missing on disk.
    #[error("not found: {0}")]
    NotFound(String),

    /// The build evaluator failed to extract metadata from a recipe.
    #[error("metadata generation failed for {cpv}: {reason}")]
    EvaluatorFailure {
        /// The recipe whose metadata could not be generated.
        cpv: String,
        /// Evaluator-provided failure description.
        reason: String,
    },

    /// Malformed dependency string or source URI entry.
    #[error("invalid dependency string: {0}")]
    InvalidDependString(String),

    /// Signature or manifest failure under a strict policy.
    #[error("security violation: {0}")]
    SecurityViolation(String),

    /// The manifest signature did not reach the configured trust level.
    #[error("untrusted manifest: {0}")]
    UntrustedSignature(String),

    /// The manifest signature is present but invalid.
    #[error("invalid manifest signature: {0}")]
    InvalidSignature(String),

    /// The manifest carries no signature.
    #[error("missing manifest signature: {0}")]
    MissingSignature(String),

    /// Programming-contract violation, such as an unknown query level.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A bare package name matched more than one category.
    #[error("ambiguous package name {name}: {}", .candidates.join(" "))]
    AmbiguousPackage {
        /// The package name as queried.
        name: String,
        /// Every `category/package` key it could refer to.
        candidates: Vec<String>,
    },

    /// Invalid dependency atom.
    #[error("invalid atom: {0}")]
    InvalidAtom(String),

    /// Invalid package version string.
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    /// Invalid `category/package-version` string.
    #[error("invalid cpv: {0}")]
    InvalidCpv(String),

    /// Invalid EAPI value.
    #[error("invalid EAPI: {0}")]
    InvalidEapi(String),

    /// Invalid keyword string.
    #[error("invalid keyword: {0}")]
    InvalidKeyword(String),

    /// Invalid IUSE flag entry.
    #[error("invalid IUSE entry: {0}")]
    InvalidIUse(String),

    /// Invalid SRC_URI expression.
    #[error("invalid SRC_URI: {0}")]
    InvalidSrcUri(String),

    /// Invalid LICENSE expression or license acceptance setting.
    #[error("invalid LICENSE: {0}")]
    InvalidLicense(String),

    /// Error parsing a stored metadata record.
    #[error("invalid cache entry: {0}")]
    InvalidCacheEntry(String),

    /// Missing mandatory field in a metadata record.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// Error from the portage-atom dependency parser.
    #[error("dependency parse error: {0}")]
    DepError(String),

    /// Filesystem error while reading a repository or the metadata store.
    #[error("I/O error on {path}: {message}")]
    Io {
        /// The path being accessed.
        path: String,
        /// The underlying error message.
        message: String,
    },
}

impl Error {
    /// Whether this is a signature or manifest failure, which must reach
    /// the caller instead of merely masking a candidate.
    pub fn is_security(&self) -> bool {
        matches!(
            self,
            Error::SecurityViolation(_)
                | Error::UntrustedSignature(_)
                | Error::InvalidSignature(_)
                | Error::MissingSignature(_)
        )
    }

    pub(crate) fn io(path: &Path, err: std::io::Error) -> Self {
        Error::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type for portage-db operations.
pub type Result<T> = std::result::Result<T, Error>;
