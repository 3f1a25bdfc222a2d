use crate::{write_atomic, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Current store format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout for the blueprint store.
///
/// ```text
/// <root>/store/version           format marker
/// <root>/store/.lock             advisory process lock
/// <root>/store/commits/<name>/   one JSON file per commit, named by id
/// <root>/store/heads/<name>      head commit id, plain text
/// <root>/store/workspace/<name>  workspace overlay blueprint, JSON
/// ```
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    #[inline]
    pub fn commits_dir(&self) -> PathBuf {
        self.store_dir().join("commits")
    }

    #[inline]
    pub fn commits_dir_for(&self, name: &str) -> PathBuf {
        self.commits_dir().join(name)
    }

    #[inline]
    pub fn commit_path(&self, name: &str, id: &str) -> PathBuf {
        self.commits_dir_for(name).join(id)
    }

    #[inline]
    pub fn heads_dir(&self) -> PathBuf {
        self.store_dir().join("heads")
    }

    #[inline]
    pub fn head_path(&self, name: &str) -> PathBuf {
        self.heads_dir().join(name)
    }

    #[inline]
    pub fn workspace_dir(&self) -> PathBuf {
        self.store_dir().join("workspace")
    }

    #[inline]
    pub fn workspace_path(&self, name: &str) -> PathBuf {
        self.workspace_dir().join(name)
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.store_dir().join(".lock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.commits_dir())?;
        fs::create_dir_all(self.heads_dir())?;
        fs::create_dir_all(self.workspace_dir())?;

        let version_path = self.store_dir().join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            write_atomic(&self.store_dir(), &version_path, content.as_bytes())?;
        }
        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let content = fs::read_to_string(self.store_dir().join(VERSION_FILE))?;
        let ver: StoreVersion = serde_json::from_str(&content)?;
        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_layout() {
        let layout = StoreLayout::new("/var/lib/kiln");
        assert_eq!(
            layout.commit_path("bp", "abc"),
            PathBuf::from("/var/lib/kiln/store/commits/bp/abc")
        );
        assert_eq!(
            layout.head_path("bp"),
            PathBuf::from("/var/lib/kiln/store/heads/bp")
        );
        assert_eq!(
            layout.workspace_path("bp"),
            PathBuf::from("/var/lib/kiln/store/workspace/bp")
        );
    }

    #[test]
    fn initialize_creates_directories_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        assert!(layout.commits_dir().is_dir());
        assert!(layout.heads_dir().is_dir());
        assert!(layout.workspace_dir().is_dir());
        layout.verify_version().unwrap();
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
    }

    #[test]
    fn version_mismatch_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        fs::write(
            layout.store_dir().join(VERSION_FILE),
            r#"{"format_version": 99}"#,
        )
        .unwrap();
        assert!(matches!(
            layout.verify_version(),
            Err(StoreError::VersionMismatch { found: 99, .. })
        ));
    }
}
