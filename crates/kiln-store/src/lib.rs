//! Versioned blueprint storage for Kiln.
//!
//! An append-only, content-addressed commit log per blueprint name plus a
//! mutable workspace overlay holding un-committed edits. Commits are JSON
//! files named by their id; every write is atomic (`NamedTempFile` +
//! rename + parent-dir fsync) so a crashed server never leaves a torn
//! commit behind.

pub mod commit;
pub mod layout;
pub mod store;

pub use commit::{compute_commit_id, BlueprintCommit};
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use store::{validate_store_name, BlueprintInfo, BlueprintStore};

use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid blueprint: {0}")]
    InvalidBlueprint(#[from] kiln_schema::BlueprintError),
    #[error("invalid blueprint name: {0}")]
    InvalidName(String),
    #[error("blueprint not found: {0}")]
    NotFound(String),
    #[error("unknown commit: {0}")]
    UnknownCommit(String),
    #[error("store lock is held by another process: {0}")]
    Locked(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Fsync a directory so a preceding `rename()` is durable.
///
/// POSIX does not guarantee rename durability without it, even though
/// ext4 `data=ordered` usually provides it.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Atomically write `content` to `dest`, which must live inside `dir`.
pub(crate) fn write_atomic(dir: &Path, dest: &Path, content: &[u8]) -> Result<(), StoreError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}
