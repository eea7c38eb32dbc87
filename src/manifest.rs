//! Manifest signature gate.
//!
//! When a [`SignaturePolicy`] is configured, every metadata lookup first
//! checks the `Manifest` next to the recipe through a [`ManifestVerifier`].

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::error::{Error, Result};
use crate::repository::file_stats;

/// Minimum trust a manifest signature must reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TrustLevel {
    /// A signature is present.
    Exists,
    /// Signed by a marginally trusted key.
    Marginal,
    /// Signed by a fully trusted key.
    Trusted,
}

/// How signature problems are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignaturePolicy {
    /// Require a signature to exist; problems are warnings.
    Warn,
    /// Require marginal trust; invalid signatures and unreadable manifests
    /// are fatal, missing signatures warn once.
    Strict,
    /// Require full trust; every problem is fatal.
    Severe,
}

impl SignaturePolicy {
    /// Trust level verified under this policy.
    pub fn trust_level(&self) -> TrustLevel {
        match self {
            SignaturePolicy::Warn => TrustLevel::Exists,
            SignaturePolicy::Strict => TrustLevel::Marginal,
            SignaturePolicy::Severe => TrustLevel::Trusted,
        }
    }

    fn is_strict(&self) -> bool {
        !matches!(self, SignaturePolicy::Warn)
    }
}

/// Verifies manifest signatures.
pub trait ManifestVerifier {
    /// Verify the signature of `manifest`.
    ///
    /// Returns `Ok(false)` when the signature is valid but below `level`.
    /// Fails with [`Error::InvalidSignature`] or [`Error::MissingSignature`]
    /// for bad or absent signatures; any other error means the manifest
    /// could not be read.
    fn verify(&self, manifest: &Path, level: TrustLevel) -> Result<bool>;
}

/// Applies a [`SignaturePolicy`] to manifest verification results.
pub(crate) struct ManifestGate {
    verifier: Box<dyn ManifestVerifier>,
    policy: SignaturePolicy,
    /// Manifests verified successfully, with the stats they had then.
    verified: HashMap<PathBuf, (i64, u64)>,
    /// Manifests already reported as unsigned.
    warned_missing: HashSet<PathBuf>,
}

impl ManifestGate {
    pub(crate) fn new(verifier: Box<dyn ManifestVerifier>, policy: SignaturePolicy) -> Self {
        ManifestGate {
            verifier,
            policy,
            verified: HashMap::new(),
            warned_missing: HashSet::new(),
        }
    }

    /// Check the `Manifest` in the package directory of `recipe`.
    pub(crate) fn check(&mut self, recipe: &Path) -> Result<()> {
        let manifest = recipe.with_file_name("Manifest");
        let stats = match file_stats(&manifest) {
            Ok(stats) => stats,
            Err(e) => return self.unreadable(&manifest, &e.to_string()),
        };

        if self.verified.get(&manifest) != Some(&stats) {
            match self.verifier.verify(&manifest, self.policy.trust_level()) {
                Ok(true) => {
                    self.verified.insert(manifest.clone(), stats);
                }
                Ok(false) => {
                    return Err(Error::UntrustedSignature(manifest.display().to_string()))
                }
                Err(Error::InvalidSignature(reason)) => {
                    if self.policy.is_strict() {
                        return Err(Error::InvalidSignature(reason));
                    }
                    warn!(manifest = %manifest.display(), %reason, "invalid manifest signature");
                }
                Err(Error::MissingSignature(reason)) => match self.policy {
                    SignaturePolicy::Severe => return Err(Error::MissingSignature(reason)),
                    SignaturePolicy::Strict => {
                        if self.warned_missing.insert(manifest.clone()) {
                            warn!(manifest = %manifest.display(), "missing manifest signature");
                        }
                    }
                    SignaturePolicy::Warn => {}
                },
                Err(e) => return self.unreadable(&manifest, &e.to_string()),
            }
        }

        if self.policy == SignaturePolicy::Severe && file_stats(&manifest).ok() != Some(stats) {
            return Err(Error::SecurityViolation(format!(
                "manifest changed: {}",
                manifest.display()
            )));
        }
        Ok(())
    }

    fn unreadable(&self, manifest: &Path, reason: &str) -> Result<()> {
        if self.policy.is_strict() {
            return Err(Error::SecurityViolation(format!(
                "cannot verify {}: {reason}",
                manifest.display()
            )));
        }
        warn!(manifest = %manifest.display(), %reason, "manifest is missing or inaccessible");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::fs;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Answers every verification with a fixed outcome and counts calls.
    struct Fixed {
        outcome: Result<bool>,
        calls: Rc<Cell<usize>>,
    }

    impl ManifestVerifier for Fixed {
        fn verify(&self, _manifest: &Path, _level: TrustLevel) -> Result<bool> {
            self.calls.set(self.calls.get() + 1);
            self.outcome.clone()
        }
    }

    fn gate(outcome: Result<bool>, policy: SignaturePolicy) -> (ManifestGate, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let verifier = Fixed {
            outcome,
            calls: calls.clone(),
        };
        (ManifestGate::new(Box::new(verifier), policy), calls)
    }

    fn package_dir(with_manifest: bool) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        if with_manifest {
            fs::write(dir.path().join("Manifest"), "DIST foo.tar.gz 1 SHA256 00\n").unwrap();
        }
        let recipe = dir.path().join("pkg-1.0.ebuild");
        (dir, recipe)
    }

    #[test]
    fn verified_manifests_are_remembered() {
        let (_dir, recipe) = package_dir(true);
        let (mut gate, calls) = gate(Ok(true), SignaturePolicy::Strict);
        gate.check(&recipe).unwrap();
        gate.check(&recipe).unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn untrusted_always_fails() {
        let (_dir, recipe) = package_dir(true);
        let (mut gate, _) = gate(Ok(false), SignaturePolicy::Warn);
        assert!(matches!(gate.check(&recipe), Err(Error::UntrustedSignature(_))));
    }

    #[test]
    fn invalid_signature_by_policy() {
        let (_dir, recipe) = package_dir(true);
        let bad = || Err(Error::InvalidSignature("bad".to_string()));

        let (mut warn_gate, _) = gate(bad(), SignaturePolicy::Warn);
        assert!(warn_gate.check(&recipe).is_ok());
        let (mut strict, _) = gate(bad(), SignaturePolicy::Strict);
        assert!(matches!(strict.check(&recipe), Err(Error::InvalidSignature(_))));
    }

    #[test]
    fn missing_signature_by_policy() {
        let (_dir, recipe) = package_dir(true);
        let missing = || Err(Error::MissingSignature("unsigned".to_string()));

        let (mut strict, calls) = gate(missing(), SignaturePolicy::Strict);
        assert!(strict.check(&recipe).is_ok());
        assert!(strict.check(&recipe).is_ok());
        assert_eq!(calls.get(), 2);
        assert_eq!(strict.warned_missing.len(), 1);

        let (mut severe, _) = gate(missing(), SignaturePolicy::Severe);
        assert!(matches!(severe.check(&recipe), Err(Error::MissingSignature(_))));
    }

    #[test]
    fn missing_manifest_by_policy() {
        let (_dir, recipe) = package_dir(false);

        let (mut warn_gate, calls) = gate(Ok(true), SignaturePolicy::Warn);
        assert!(warn_gate.check(&recipe).is_ok());
        assert_eq!(calls.get(), 0);

        let (mut severe, _) = gate(Ok(true), SignaturePolicy::Severe);
        assert!(matches!(severe.check(&recipe), Err(Error::SecurityViolation(_))));
    }

    #[test]
    fn policy_trust_levels() {
        assert_eq!(SignaturePolicy::Warn.trust_level(), TrustLevel::Exists);
        assert_eq!(SignaturePolicy::Strict.trust_level(), TrustLevel::Marginal);
        assert_eq!(SignaturePolicy::Severe.trust_level(), TrustLevel::Trusted);
    }
}
