//! Wire types shared between the Kiln service and its clients.

use crate::{ClientError, HttpResponse};
use kiln_queue::{ImageResult, JobStatus};
use kiln_schema::Blueprint;
use kiln_solver::PackageNevra;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One structured error in a response envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub id: String,
    pub msg: String,
}

/// The `{status, errors}` envelope returned by every mutation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiStatus {
    pub status: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ApiError>,
}

impl ApiStatus {
    pub fn ok() -> Self {
        Self {
            status: true,
            errors: Vec::new(),
        }
    }

    pub fn error(id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            status: false,
            errors: vec![ApiError {
                id: id.into(),
                msg: msg.into(),
            }],
        }
    }
}

/// Whether a name currently has un-committed workspace edits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeState {
    pub name: String,
    pub changed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlueprintsInfoResponse {
    pub blueprints: Vec<Blueprint>,
    pub changes: Vec<ChangeState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ApiError>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlueprintsListResponse {
    pub blueprints: Vec<String>,
}

/// Commit metadata in a change listing; payloads stay in the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitMeta {
    pub commit: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlueprintChanges {
    pub name: String,
    pub changes: Vec<CommitMeta>,
    pub total: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlueprintsChangesResponse {
    pub blueprints: Vec<BlueprintChanges>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ApiError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlueprintDeps {
    pub blueprint: Blueprint,
    pub dependencies: Vec<PackageNevra>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DepsolveResponse {
    pub blueprints: Vec<BlueprintDeps>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ApiError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrozenBlueprint {
    pub blueprint: Blueprint,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FreezeResponse {
    pub blueprints: Vec<FrozenBlueprint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ApiError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComposeRequest {
    #[serde(rename = "blueprint-name")]
    pub blueprint_name: String,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComposeResponse {
    pub status: bool,
    pub build_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobUpdateRequest {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageResult>,
}

pub(crate) fn join_errors(errors: &[ApiError]) -> String {
    if errors.is_empty() {
        return "no error details".to_owned();
    }
    errors
        .iter()
        .map(|e| format!("{}: {}", e.id, e.msg))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Turn a non-2xx response into a `ClientError::Api`, salvaging whatever
/// envelope the body carries.
pub(crate) fn envelope_error(resp: &HttpResponse) -> ClientError {
    let errors = serde_json::from_slice::<ApiStatus>(&resp.body)
        .map(|s| s.errors)
        .unwrap_or_default();
    ClientError::Api {
        status: resp.status,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_request_uses_kebab_name_key() {
        let req = ComposeRequest {
            blueprint_name: "bp".to_owned(),
            format: "qcow2".to_owned(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["blueprint-name"], "bp");
        assert_eq!(json["format"], "qcow2");
    }

    #[test]
    fn api_status_ok_has_no_errors() {
        let status = ApiStatus::ok();
        assert!(status.status);
        let json = serde_json::to_string(&status).unwrap();
        assert!(!json.contains("errors"));
    }

    #[test]
    fn api_status_error_roundtrip() {
        let status = ApiStatus::error("UnknownCommit", "no commit FFFF");
        let json = serde_json::to_string(&status).unwrap();
        let back: ApiStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn join_errors_formats_id_and_message() {
        let joined = join_errors(&[
            ApiError {
                id: "NotFound".to_owned(),
                msg: "no bp".to_owned(),
            },
            ApiError {
                id: "ParseError".to_owned(),
                msg: "bad toml".to_owned(),
            },
        ]);
        assert_eq!(joined, "NotFound: no bp; ParseError: bad toml");
    }
}
