use std::collections::HashMap;
use std::path::Path;

use crate::version::Cpv;

/// Runs a recipe in dependency-extraction mode.
///
/// The returned map holds the raw metadata variables (`EAPI`, `SLOT`,
/// `DEPEND`, `INHERITED`, ...). Keys the recipe did not set may be absent.
pub trait BuildEvaluator {
    /// Evaluate the recipe at `recipe` for `cpv`.
    ///
    /// The error string describes why evaluation failed; the recipe is then
    /// considered broken for the lifetime of the database.
    fn run(&self, recipe: &Path, cpv: &Cpv) -> std::result::Result<HashMap<String, String>, String>;
}
