use kiln_schema::{to_canonical_json, Blueprint};
use serde::{Deserialize, Serialize};

/// A point-in-time blueprint snapshot in the commit log.
///
/// `revision` is assigned only by tagging and is strictly increasing
/// along the parent chain; it is the one mutable field of a commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlueprintCommit {
    pub id: String,
    pub blueprint: Blueprint,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// Compute the content-addressed id of a commit.
///
/// The id hashes the canonical JSON of `{parent, blueprint}`. Including
/// the parent keeps ids unique along a chain even when undo re-commits an
/// older payload, while the same commit sequence still reproduces the
/// same ids across restarts. Timestamps and revisions are excluded.
pub fn compute_commit_id(parent: Option<&str>, blueprint: &Blueprint) -> String {
    #[derive(Serialize)]
    struct Identity<'a> {
        parent: Option<&'a str>,
        blueprint: &'a Blueprint,
    }

    let json = to_canonical_json(&Identity { parent, blueprint })
        .expect("blueprint serialization is infallible");
    blake3::hash(json.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bp(version: &str) -> Blueprint {
        Blueprint {
            name: "bp".to_owned(),
            version: version.to_owned(),
            ..Blueprint::default()
        }
    }

    #[test]
    fn id_is_deterministic() {
        let a = compute_commit_id(None, &bp("0.0.1"));
        let b = compute_commit_id(None, &bp("0.0.1"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn id_depends_on_payload() {
        assert_ne!(
            compute_commit_id(None, &bp("0.0.1")),
            compute_commit_id(None, &bp("0.0.2"))
        );
    }

    #[test]
    fn id_depends_on_parent() {
        let root = compute_commit_id(None, &bp("0.0.1"));
        let undo = compute_commit_id(Some(&root), &bp("0.0.1"));
        assert_ne!(root, undo, "same payload under a different parent is a new commit");
    }

    #[test]
    fn revision_does_not_affect_serialized_identity() {
        let mut commit = BlueprintCommit {
            id: compute_commit_id(None, &bp("0.0.1")),
            blueprint: bp("0.0.1"),
            timestamp: "2026-01-01T00:00:00+00:00".to_owned(),
            revision: None,
            parent: None,
        };
        let id_before = commit.id.clone();
        commit.revision = Some(3);
        assert_eq!(
            compute_commit_id(commit.parent.as_deref(), &commit.blueprint),
            id_before
        );
    }
}
