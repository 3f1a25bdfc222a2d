//! Distribution registry for Kiln.
//!
//! Each supported distribution owns its repository list, its table of
//! output formats, and a deterministic `compose` operation that turns a
//! blueprint plus a format name into a fully materialized build recipe.
//! Distributions are registered behind the [`Distribution`] trait so the
//! service layer can stay generic over them.

pub mod crypt;
pub mod fedora30;

pub use crypt::{crypt_sha512, password_is_crypted};
pub use fedora30::Fedora30;

use kiln_schema::{Blueprint, Recipe, RepoConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistroError {
    #[error("unknown distribution: {0}")]
    UnknownDistribution(String),
    #[error("unknown output format: {0}")]
    UnknownFormat(String),
    #[error("invalid blueprint: {0}")]
    InvalidBlueprint(String),
    #[error("password hashing failed: {0}")]
    Crypt(String),
}

/// Capability interface shared by all supported distributions.
pub trait Distribution: Send + Sync {
    fn name(&self) -> &str;

    /// The runner executing build-pipeline stages for this distribution.
    fn runner(&self) -> &str;

    fn repositories(&self) -> Vec<RepoConfig>;

    /// Supported output format names, sorted.
    fn list_formats(&self) -> Vec<String>;

    /// Artifact filename and mime type for an output format.
    fn filename_mime(&self, format: &str) -> Result<(String, String), DistroError>;

    /// Deterministically compose a recipe from a blueprint and an output
    /// format. Equal inputs yield byte-equal canonical recipes.
    fn compose(&self, blueprint: &Blueprint, format: &str) -> Result<Recipe, DistroError>;
}

/// Look up a distribution implementation by name.
pub fn select_distribution(name: &str) -> Result<Box<dyn Distribution>, DistroError> {
    match name {
        "fedora-30" => Ok(Box::new(Fedora30::new())),
        other => Err(DistroError::UnknownDistribution(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_known_distribution() {
        let distro = select_distribution("fedora-30").unwrap();
        assert_eq!(distro.name(), "fedora-30");
    }

    #[test]
    fn select_unknown_distribution_fails() {
        assert!(matches!(
            select_distribution("fedora-1"),
            Err(DistroError::UnknownDistribution(_))
        ));
    }
}
