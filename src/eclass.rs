use crate::error::Result;

/// Resolves inherited eclasses to checksums and validates stored checksum
/// sets.
///
/// Computing the checksums is up to the implementation; the database only
/// stores and compares what this trait returns.
pub trait EclassChecksumProvider {
    /// Checksums of the named eclasses, as `(name, checksum)` pairs.
    fn resolve(&self, names: &[String]) -> Result<Vec<(String, String)>>;

    /// Whether every eclass in `checksums` still has the stored checksum.
    fn is_valid(&self, checksums: &[(String, String)]) -> bool;
}
