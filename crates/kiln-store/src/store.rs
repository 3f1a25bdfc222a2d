use crate::commit::{compute_commit_id, BlueprintCommit};
use crate::layout::StoreLayout;
use crate::{write_atomic, StoreError};
use fs2::FileExt;
use kiln_schema::Blueprint;
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info};

/// The latest-visible blueprint for a name plus whether a workspace
/// overlay is shadowing the committed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlueprintInfo {
    pub blueprint: Blueprint,
    pub changed: bool,
}

/// Blueprint names become directory names, so the store is stricter than
/// blueprint validation: no path separators, no leading dot.
pub fn validate_store_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() {
        return Err(StoreError::InvalidName("name must not be empty".to_owned()));
    }
    if name.starts_with('.') || name.contains(['/', '\\']) || name.chars().any(char::is_control) {
        return Err(StoreError::InvalidName(format!(
            "'{name}' must not contain path separators, control characters, or a leading dot"
        )));
    }
    Ok(())
}

/// The versioned blueprint store: an append-only commit log per name plus
/// a workspace overlay, both file-backed.
///
/// A store holds an exclusive advisory lock on its root for its whole
/// lifetime, and serializes compound operations behind one mutex. No lock
/// is ever held across a subprocess call; the solver and build engine are
/// invoked outside this crate.
pub struct BlueprintStore {
    layout: StoreLayout,
    guard: Mutex<()>,
    _lock: File,
}

impl BlueprintStore {
    /// Open (creating if needed) the store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let layout = StoreLayout::new(root);
        layout.initialize()?;

        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(layout.lock_file())?;
        lock.try_lock_exclusive()
            .map_err(|e| StoreError::Locked(e.to_string()))?;

        debug!("opened blueprint store at {}", layout.root().display());
        Ok(Self {
            layout,
            guard: Mutex::new(()),
            _lock: lock,
        })
    }

    fn head_id(&self, name: &str) -> Result<Option<String>, StoreError> {
        let path = self.layout.head_path(name);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?.trim().to_owned()))
    }

    /// Read one commit from disk.
    ///
    /// A commit that exists but no longer parses is corruption of our own
    /// persisted state, not user input; per the error-handling policy the
    /// process panics so supervision restarts it.
    fn read_commit(&self, name: &str, id: &str) -> Result<BlueprintCommit, StoreError> {
        let path = self.layout.commit_path(name, id);
        if !path.exists() {
            return Err(StoreError::UnknownCommit(id.to_owned()));
        }
        let content = fs::read_to_string(&path)?;
        match serde_json::from_str(&content) {
            Ok(commit) => Ok(commit),
            Err(e) => panic!("corrupt blueprint commit {}: {e}", path.display()),
        }
    }

    fn write_commit(&self, commit: &BlueprintCommit) -> Result<(), StoreError> {
        let name = &commit.blueprint.name;
        let dir = self.layout.commits_dir_for(name);
        fs::create_dir_all(&dir)?;
        let content = serde_json::to_string_pretty(commit)?;
        write_atomic(&dir, &self.layout.commit_path(name, &commit.id), content.as_bytes())
    }

    fn write_head(&self, name: &str, id: &str) -> Result<(), StoreError> {
        write_atomic(
            &self.layout.heads_dir(),
            &self.layout.head_path(name),
            id.as_bytes(),
        )
    }

    /// Commit a blueprint under its name.
    ///
    /// If a commit already exists for the name, the patch component of the
    /// incoming version is bumped first, so re-posting an identical
    /// blueprint yields a new commit with an incremented version. Any
    /// workspace overlay for the name is dropped.
    pub fn commit(&self, blueprint: &Blueprint) -> Result<String, StoreError> {
        let _guard = self.guard.lock().expect("store mutex poisoned");

        blueprint.validate()?;
        validate_store_name(&blueprint.name)?;

        let parent = self.head_id(&blueprint.name)?;
        let mut blueprint = blueprint.clone();
        if parent.is_some() {
            blueprint.bump_patch()?;
        }

        let id = compute_commit_id(parent.as_deref(), &blueprint);
        let commit = BlueprintCommit {
            id: id.clone(),
            blueprint,
            timestamp: chrono::Utc::now().to_rfc3339(),
            revision: None,
            parent,
        };
        self.write_commit(&commit)?;
        self.write_head(&commit.blueprint.name, &id)?;

        let ws = self.layout.workspace_path(&commit.blueprint.name);
        if ws.exists() {
            fs::remove_file(ws)?;
        }

        info!(
            "committed blueprint '{}' version {} as {id}",
            commit.blueprint.name, commit.blueprint.version
        );
        Ok(id)
    }

    /// Store a blueprint as the workspace overlay for its name, never
    /// touching the commit log.
    pub fn put_workspace(&self, blueprint: &Blueprint) -> Result<(), StoreError> {
        let _guard = self.guard.lock().expect("store mutex poisoned");

        blueprint.validate()?;
        validate_store_name(&blueprint.name)?;

        let content = serde_json::to_string_pretty(blueprint)?;
        write_atomic(
            &self.layout.workspace_dir(),
            &self.layout.workspace_path(&blueprint.name),
            content.as_bytes(),
        )
    }

    /// Remove the workspace overlay; the latest commit becomes visible
    /// again unchanged. Missing overlay on a known name is a no-op.
    pub fn delete_workspace(&self, name: &str) -> Result<(), StoreError> {
        let _guard = self.guard.lock().expect("store mutex poisoned");

        let ws = self.layout.workspace_path(name);
        if ws.exists() {
            fs::remove_file(ws)?;
            return Ok(());
        }
        if self.head_id(name)?.is_some() {
            return Ok(());
        }
        Err(StoreError::NotFound(name.to_owned()))
    }

    /// Remove the commit chain, head, and workspace entry for a name.
    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        let _guard = self.guard.lock().expect("store mutex poisoned");

        let commits = self.layout.commits_dir_for(name);
        let head = self.layout.head_path(name);
        let ws = self.layout.workspace_path(name);

        if !commits.exists() && !ws.exists() {
            return Err(StoreError::NotFound(name.to_owned()));
        }
        if head.exists() {
            fs::remove_file(head)?;
        }
        if commits.exists() {
            fs::remove_dir_all(commits)?;
        }
        if ws.exists() {
            fs::remove_file(ws)?;
        }
        info!("deleted blueprint '{name}'");
        Ok(())
    }

    /// The latest-visible blueprint: the workspace overlay if present,
    /// else the head commit.
    pub fn get_info(&self, name: &str) -> Result<BlueprintInfo, StoreError> {
        let ws = self.layout.workspace_path(name);
        if ws.exists() {
            let content = fs::read_to_string(&ws)?;
            let blueprint = match serde_json::from_str(&content) {
                Ok(bp) => bp,
                Err(e) => panic!("corrupt workspace entry {}: {e}", ws.display()),
            };
            return Ok(BlueprintInfo {
                blueprint,
                changed: true,
            });
        }

        match self.head_id(name)? {
            Some(id) => Ok(BlueprintInfo {
                blueprint: self.read_commit(name, &id)?.blueprint,
                changed: false,
            }),
            None => Err(StoreError::NotFound(name.to_owned())),
        }
    }

    /// The latest-visible blueprint without the changed flag.
    pub fn latest(&self, name: &str) -> Result<Blueprint, StoreError> {
        Ok(self.get_info(name)?.blueprint)
    }

    /// All names with any commit or workspace entry, sorted.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut names = BTreeSet::new();
        for dir in [self.layout.heads_dir(), self.layout.workspace_dir()] {
            if !dir.exists() {
                continue;
            }
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                if let Some(name) = entry.file_name().to_str() {
                    if !name.starts_with('.') {
                        names.insert(name.to_owned());
                    }
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    /// The commit chain for a name, newest first.
    pub fn changes(&self, name: &str) -> Result<Vec<BlueprintCommit>, StoreError> {
        let Some(head) = self.head_id(name)? else {
            return Err(StoreError::NotFound(name.to_owned()));
        };

        let mut chain = Vec::new();
        let mut cursor = Some(head);
        while let Some(id) = cursor {
            let commit = self.read_commit(name, &id)?;
            cursor = commit.parent.clone();
            chain.push(commit);
        }
        Ok(chain)
    }

    /// Assign the next revision to the head commit. Tagging an
    /// already-tagged head is a no-op returning the current revision.
    pub fn tag(&self, name: &str) -> Result<u32, StoreError> {
        let _guard = self.guard.lock().expect("store mutex poisoned");

        let Some(head) = self.head_id(name)? else {
            return Err(StoreError::NotFound(name.to_owned()));
        };
        let mut commit = self.read_commit(name, &head)?;
        if let Some(revision) = commit.revision {
            return Ok(revision);
        }

        let mut max_revision = 0;
        let mut cursor = commit.parent.clone();
        while let Some(id) = cursor {
            let ancestor = self.read_commit(name, &id)?;
            if let Some(revision) = ancestor.revision {
                max_revision = max_revision.max(revision);
            }
            cursor = ancestor.parent;
        }

        let revision = max_revision + 1;
        commit.revision = Some(revision);
        self.write_commit(&commit)?;
        info!("tagged blueprint '{name}' head as revision {revision}");
        Ok(revision)
    }

    /// Append a new commit whose payload equals that of `commit_id`.
    /// Undo is forward-only: the chain stays intact.
    pub fn undo(&self, name: &str, commit_id: &str) -> Result<String, StoreError> {
        let _guard = self.guard.lock().expect("store mutex poisoned");

        let Some(head) = self.head_id(name)? else {
            return Err(StoreError::NotFound(name.to_owned()));
        };
        let target = self.read_commit(name, commit_id)?;

        let id = compute_commit_id(Some(&head), &target.blueprint);
        let commit = BlueprintCommit {
            id: id.clone(),
            blueprint: target.blueprint,
            timestamp: chrono::Utc::now().to_rfc3339(),
            revision: None,
            parent: Some(head),
        };
        self.write_commit(&commit)?;
        self.write_head(name, &id)?;
        info!("reverted blueprint '{name}' to payload of {commit_id}");
        Ok(id)
    }
}
