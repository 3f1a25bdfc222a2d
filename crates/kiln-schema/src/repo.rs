use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("repository '{0}' must set exactly one of baseurl, metalink, mirrorlist")]
    AmbiguousSource(String),
}

/// A package repository a distribution resolves and installs from.
///
/// Exactly one of `baseurl`, `metalink`, `mirrorlist` identifies the
/// source; `validate` enforces this.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoConfig {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseurl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metalink: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirrorlist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpgkey: Option<String>,
}

impl RepoConfig {
    pub fn validate(&self) -> Result<(), RepoError> {
        let sources = [&self.baseurl, &self.metalink, &self.mirrorlist]
            .iter()
            .filter(|s| s.is_some())
            .count();
        if sources == 1 {
            Ok(())
        } else {
            Err(RepoError::AmbiguousSource(self.id.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metalink_repo() -> RepoConfig {
        RepoConfig {
            id: "fedora".to_owned(),
            name: "Fedora 30".to_owned(),
            metalink: Some("https://mirrors.example.com/metalink".to_owned()),
            ..RepoConfig::default()
        }
    }

    #[test]
    fn single_source_is_valid() {
        metalink_repo().validate().unwrap();
    }

    #[test]
    fn no_source_is_rejected() {
        let repo = RepoConfig {
            id: "empty".to_owned(),
            ..RepoConfig::default()
        };
        assert!(repo.validate().is_err());
    }

    #[test]
    fn two_sources_are_rejected() {
        let mut repo = metalink_repo();
        repo.baseurl = Some("https://example.com/repo".to_owned());
        assert!(repo.validate().is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let repo = metalink_repo();
        let json = serde_json::to_string(&repo).unwrap();
        assert!(!json.contains("baseurl"), "unset sources are omitted");
        let back: RepoConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, repo);
    }
}
