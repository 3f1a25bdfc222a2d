//! Blueprint API handlers.

use crate::{
    api_error_from_distro, api_error_from_solver, api_error_from_store, http_code_for,
    respond_envelope, respond_json, toml_header, ServerState,
};
use kiln_client::api::{
    ApiError, ApiStatus, BlueprintChanges, BlueprintDeps, BlueprintsChangesResponse,
    BlueprintsInfoResponse, BlueprintsListResponse, ChangeState, CommitMeta, ComposeRequest,
    ComposeResponse, DepsolveResponse, FreezeResponse, FrozenBlueprint,
};
use kiln_schema::{parse_blueprint_json, parse_blueprint_toml, Blueprint};
use kiln_solver::PackageNevra;
use kiln_store::StoreError;
use tiny_http::{Request, Response};
use tracing::info;

fn parse_error(msg: impl Into<String>) -> ApiStatus {
    ApiStatus::error("ParseError", msg)
}

/// Decode a request body as a blueprint, honoring the content type.
/// An empty or undecodable body is a `ParseError`.
fn decode_blueprint(body: Option<String>, json: bool) -> Result<Blueprint, ApiStatus> {
    let body = body.ok_or_else(|| parse_error("failed to read request body"))?;
    if body.trim().is_empty() {
        return Err(parse_error("request body is empty"));
    }
    let parsed = if json {
        parse_blueprint_json(&body)
    } else {
        parse_blueprint_toml(&body)
    };
    parsed.map_err(|e| parse_error(e.to_string()))
}

pub fn post_blueprint(
    state: &ServerState,
    req: Request,
    body: Option<String>,
    json: bool,
    workspace: bool,
) {
    let blueprint = match decode_blueprint(body, json) {
        Ok(bp) => bp,
        Err(status) => return respond_envelope(req, 400, status),
    };

    let result = if workspace {
        state.store.put_workspace(&blueprint)
    } else {
        state.store.commit(&blueprint).map(|_| ())
    };
    match result {
        Ok(()) => respond_envelope(req, 200, ApiStatus::ok()),
        Err(e) => {
            let error = api_error_from_store(&e);
            let code = http_code_for(&error);
            respond_envelope(req, code, ApiStatus {
                status: false,
                errors: vec![error],
            });
        }
    }
}

pub fn delete_blueprint(state: &ServerState, req: Request, name: &str) {
    match state.store.delete(name) {
        Ok(()) => respond_envelope(req, 200, ApiStatus::ok()),
        Err(e) => {
            let error = api_error_from_store(&e);
            let code = http_code_for(&error);
            respond_envelope(req, code, ApiStatus {
                status: false,
                errors: vec![error],
            });
        }
    }
}

pub fn delete_workspace(state: &ServerState, req: Request, name: &str) {
    match state.store.delete_workspace(name) {
        Ok(()) => respond_envelope(req, 200, ApiStatus::ok()),
        Err(e) => {
            let error = api_error_from_store(&e);
            let code = http_code_for(&error);
            respond_envelope(req, code, ApiStatus {
                status: false,
                errors: vec![error],
            });
        }
    }
}

pub fn blueprint_info(state: &ServerState, req: Request, name: &str, as_toml: bool) {
    match state.store.get_info(name) {
        Ok(info) if as_toml => match info.blueprint.to_toml() {
            Ok(text) => {
                let _ = req.respond(Response::from_string(text).with_header(toml_header()));
            }
            Err(e) => respond_envelope(
                req,
                500,
                ApiStatus::error("InternalError", e.to_string()),
            ),
        },
        Ok(info) => respond_json(req, 200, &BlueprintsInfoResponse {
            blueprints: vec![info.blueprint],
            changes: vec![ChangeState {
                name: name.to_owned(),
                changed: info.changed,
            }],
            errors: Vec::new(),
        }),
        Err(e @ StoreError::NotFound(_)) if !as_toml => {
            // The JSON form reports missing names inside the body.
            respond_json(req, 200, &BlueprintsInfoResponse {
                blueprints: Vec::new(),
                changes: Vec::new(),
                errors: vec![api_error_from_store(&e)],
            });
        }
        Err(e) => {
            let error = api_error_from_store(&e);
            let code = http_code_for(&error);
            respond_envelope(req, code, ApiStatus {
                status: false,
                errors: vec![error],
            });
        }
    }
}

pub fn list_blueprints(state: &ServerState, req: Request) {
    match state.store.list() {
        Ok(blueprints) => respond_json(req, 200, &BlueprintsListResponse { blueprints }),
        Err(e) => respond_envelope(
            req,
            500,
            ApiStatus::error("InternalError", e.to_string()),
        ),
    }
}

pub fn blueprint_changes(state: &ServerState, req: Request, names: &str) {
    let mut response = BlueprintsChangesResponse::default();
    for name in names.split(',').filter(|n| !n.is_empty()) {
        match state.store.changes(name) {
            Ok(commits) => {
                let changes: Vec<CommitMeta> = commits
                    .into_iter()
                    .map(|c| CommitMeta {
                        commit: c.id,
                        timestamp: c.timestamp,
                        revision: c.revision,
                    })
                    .collect();
                response.blueprints.push(BlueprintChanges {
                    name: name.to_owned(),
                    total: changes.len(),
                    changes,
                });
            }
            Err(e) => response.errors.push(api_error_from_store(&e)),
        }
    }
    respond_json(req, 200, &response);
}

pub fn tag_blueprint(state: &ServerState, req: Request, name: &str) {
    match state.store.tag(name) {
        Ok(revision) => {
            info!("blueprint '{name}' tagged as revision {revision}");
            respond_envelope(req, 200, ApiStatus::ok());
        }
        Err(e) => {
            let error = api_error_from_store(&e);
            let code = http_code_for(&error);
            respond_envelope(req, code, ApiStatus {
                status: false,
                errors: vec![error],
            });
        }
    }
}

pub fn undo_blueprint(state: &ServerState, req: Request, name: &str, commit: &str) {
    match state.store.undo(name, commit) {
        Ok(_) => respond_envelope(req, 200, ApiStatus::ok()),
        Err(e) => {
            let error = api_error_from_store(&e);
            let code = http_code_for(&error);
            respond_envelope(req, code, ApiStatus {
                status: false,
                errors: vec![error],
            });
        }
    }
}

fn solve_latest(
    state: &ServerState,
    name: &str,
) -> Result<(Blueprint, Vec<PackageNevra>), ApiError> {
    let blueprint = state
        .store
        .latest(name)
        .map_err(|e| api_error_from_store(&e))?;
    let dependencies = state
        .solver
        .depsolve(&state.distro.repositories(), &blueprint.solver_specs())
        .map_err(|e| api_error_from_solver(&e))?;
    Ok((blueprint, dependencies))
}

pub fn depsolve_blueprint(state: &ServerState, req: Request, name: &str) {
    match solve_latest(state, name) {
        Ok((blueprint, dependencies)) => respond_json(req, 200, &DepsolveResponse {
            blueprints: vec![BlueprintDeps {
                blueprint,
                dependencies,
            }],
            errors: Vec::new(),
        }),
        Err(error) if error.id == "NotFound" => {
            respond_json(req, 200, &DepsolveResponse {
                blueprints: Vec::new(),
                errors: vec![error],
            });
        }
        Err(error) => {
            let code = http_code_for(&error);
            respond_envelope(req, code, ApiStatus {
                status: false,
                errors: vec![error],
            });
        }
    }
}

/// Rewrite every package and module version glob with the exact
/// `epoch:version-release.arch` the solver resolved it to.
fn freeze(blueprint: Blueprint, dependencies: &[PackageNevra]) -> Blueprint {
    let mut frozen = blueprint;
    for spec in frozen.packages.iter_mut().chain(frozen.modules.iter_mut()) {
        if let Some(dep) = dependencies.iter().find(|d| d.name == spec.name) {
            spec.version = dep.evra();
        }
    }
    frozen
}

pub fn freeze_blueprint(state: &ServerState, req: Request, name: &str) {
    match solve_latest(state, name) {
        Ok((blueprint, dependencies)) => respond_json(req, 200, &FreezeResponse {
            blueprints: vec![FrozenBlueprint {
                blueprint: freeze(blueprint, &dependencies),
            }],
            errors: Vec::new(),
        }),
        Err(error) if error.id == "NotFound" => {
            respond_json(req, 200, &FreezeResponse {
                blueprints: Vec::new(),
                errors: vec![error],
            });
        }
        Err(error) => {
            let code = http_code_for(&error);
            respond_envelope(req, code, ApiStatus {
                status: false,
                errors: vec![error],
            });
        }
    }
}

pub fn compose(state: &ServerState, req: Request, body: Option<String>) {
    let Some(body) = body else {
        return respond_envelope(req, 400, parse_error("failed to read request body"));
    };
    let request: ComposeRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => return respond_envelope(req, 400, parse_error(e.to_string())),
    };

    let blueprint = match state.store.latest(&request.blueprint_name) {
        Ok(bp) => bp,
        Err(e) => {
            let error = api_error_from_store(&e);
            let code = http_code_for(&error);
            return respond_envelope(req, code, ApiStatus {
                status: false,
                errors: vec![error],
            });
        }
    };

    let recipe = match state.distro.compose(&blueprint, &request.format) {
        Ok(recipe) => recipe,
        Err(e) => {
            let error = api_error_from_distro(&e);
            let code = http_code_for(&error);
            return respond_envelope(req, code, ApiStatus {
                status: false,
                errors: vec![error],
            });
        }
    };

    let build_id = state.queue.enqueue(&request.format, recipe);
    info!(
        "queued build {build_id}: blueprint '{}' as {}",
        request.blueprint_name, request.format
    );
    respond_json(req, 200, &ComposeResponse {
        status: true,
        build_id,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_schema::PackageSpec;

    fn nevra(name: &str, version: &str) -> PackageNevra {
        PackageNevra {
            name: name.to_owned(),
            epoch: 0,
            version: version.to_owned(),
            release: "1.fc30".to_owned(),
            arch: "x86_64".to_owned(),
        }
    }

    #[test]
    fn decode_rejects_empty_body() {
        let err = decode_blueprint(Some("   ".to_owned()), false).unwrap_err();
        assert_eq!(err.errors[0].id, "ParseError");
    }

    #[test]
    fn decode_accepts_toml_and_json() {
        let toml_bp = decode_blueprint(
            Some("name = \"bp\"\nversion = \"0.0.1\"".to_owned()),
            false,
        )
        .unwrap();
        assert_eq!(toml_bp.name, "bp");

        let json_bp = decode_blueprint(
            Some(r#"{"name": "bp", "version": "0.0.1"}"#.to_owned()),
            true,
        )
        .unwrap();
        assert_eq!(json_bp.name, "bp");
    }

    #[test]
    fn decode_reports_parse_errors() {
        let err = decode_blueprint(Some("name = [unterminated".to_owned()), false).unwrap_err();
        assert!(!err.status);
        assert_eq!(err.errors[0].id, "ParseError");
    }

    #[test]
    fn freeze_rewrites_matching_versions() {
        let blueprint = Blueprint {
            name: "bp".to_owned(),
            version: "0.0.1".to_owned(),
            packages: vec![PackageSpec::new("bash", "*")],
            modules: vec![PackageSpec::new("util-linux", "*")],
            ..Blueprint::default()
        };
        let frozen = freeze(
            blueprint,
            &[nevra("bash", "5.0.7"), nevra("util-linux", "2.33.2")],
        );
        assert_eq!(frozen.packages[0].version, "0:5.0.7-1.fc30.x86_64");
        assert_eq!(frozen.modules[0].version, "0:2.33.2-1.fc30.x86_64");
    }

    #[test]
    fn freeze_leaves_unresolved_specs_alone() {
        let blueprint = Blueprint {
            name: "bp".to_owned(),
            version: "0.0.1".to_owned(),
            packages: vec![PackageSpec::new("ghost", "*")],
            ..Blueprint::default()
        };
        let frozen = freeze(blueprint, &[nevra("bash", "5.0.7")]);
        assert_eq!(frozen.packages[0].version, "*");
    }
}
