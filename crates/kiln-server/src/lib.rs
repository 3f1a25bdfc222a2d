//! Unix-socket HTTP service for Kiln.
//!
//! Two listeners share one [`ServerState`]: the blueprint API socket
//! (user-facing, `/api/v0/...`) and the job API socket (worker-facing,
//! `/job-queue/v1/...`). Every accepted request is handled on its own
//! thread so a long-polling job claim never blocks the accept loop.
//!
//! The [`TestServer`] helper binds both sockets under a temporary
//! directory for integration testing.

pub mod handlers;
pub mod jobs;

use kiln_client::api::{ApiError, ApiStatus};
use kiln_distro::{DistroError, Distribution};
use kiln_queue::{JobQueue, QueueError};
use kiln_solver::{SolverClient, SolverError};
use kiln_store::{BlueprintStore, StoreError};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, error, warn};

/// Everything a request handler needs, shared across both sockets.
pub struct ServerState {
    pub store: BlueprintStore,
    pub distro: Box<dyn Distribution>,
    pub solver: SolverClient,
    pub queue: JobQueue,
    /// How long a job claim may park before the handler returns 204.
    pub claim_timeout: Duration,
}

pub(crate) fn json_header() -> Header {
    Header::from_bytes("Content-Type", "application/json").expect("valid header")
}

pub(crate) fn toml_header() -> Header {
    Header::from_bytes("Content-Type", "text/x-toml").expect("valid header")
}

pub(crate) fn respond_json<T: Serialize>(req: Request, code: u16, payload: &T) {
    let body = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_owned());
    let _ = req.respond(
        Response::from_string(body)
            .with_header(json_header())
            .with_status_code(code),
    );
}

pub(crate) fn respond_envelope(req: Request, code: u16, status: ApiStatus) {
    respond_json(req, code, &status);
}

pub(crate) fn read_body(req: &mut Request) -> Option<String> {
    let mut body = String::new();
    match req.as_reader().read_to_string(&mut body) {
        Ok(_) => Some(body),
        Err(_) => None,
    }
}

/// A request body is JSON when the Content-Type says so; everything else
/// (including a missing header) is treated as TOML, the blueprint API's
/// native format.
pub(crate) fn body_is_json(req: &Request) -> bool {
    req.headers()
        .iter()
        .find(|h| h.field.equiv("Content-Type"))
        .map(|h| h.value.as_str().contains("json"))
        .unwrap_or(false)
}

pub(crate) fn api_error_from_store(err: &StoreError) -> ApiError {
    let id = match err {
        StoreError::InvalidBlueprint(_) | StoreError::InvalidName(_) => "InvalidBlueprint",
        StoreError::NotFound(_) => "NotFound",
        StoreError::UnknownCommit(_) => "UnknownCommit",
        _ => "InternalError",
    };
    ApiError {
        id: id.to_owned(),
        msg: err.to_string(),
    }
}

pub(crate) fn api_error_from_distro(err: &DistroError) -> ApiError {
    let id = match err {
        DistroError::UnknownFormat(_) => "UnknownFormat",
        DistroError::InvalidBlueprint(_) => "InvalidBlueprint",
        _ => "InternalError",
    };
    ApiError {
        id: id.to_owned(),
        msg: err.to_string(),
    }
}

/// Solver failures split two ways: structured solver errors go to the
/// client verbatim, protocol or I/O trouble is reported generically and
/// logged in full.
pub(crate) fn api_error_from_solver(err: &SolverError) -> ApiError {
    match err {
        SolverError::Marking { .. } | SolverError::Depsolve { .. } => ApiError {
            id: "SolverError".to_owned(),
            msg: err.to_string(),
        },
        SolverError::Protocol(_) | SolverError::Io(_) => {
            error!("dependency solver failure: {err}");
            ApiError {
                id: "SolverIOError".to_owned(),
                msg: "dependency solver failed".to_owned(),
            }
        }
    }
}

pub(crate) fn api_error_from_queue(err: &QueueError) -> ApiError {
    let id = match err {
        QueueError::NotFound(_) => "NotFound",
        QueueError::InvalidTransition { .. } | QueueError::MissingResult => "InvalidTransition",
    };
    ApiError {
        id: id.to_owned(),
        msg: err.to_string(),
    }
}

pub(crate) fn http_code_for(error: &ApiError) -> u16 {
    match error.id.as_str() {
        "InternalError" | "SolverIOError" => 500,
        _ => 400,
    }
}

/// Dispatch one request on the blueprint API socket.
pub fn handle_api_request(state: &ServerState, mut req: Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    debug!("api: {method} {url}");

    let (path, query) = match url.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (url.as_str(), None),
    };
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match (&method, segments.as_slice()) {
        (Method::Post, ["api", "v0", "blueprints", "new"]) => {
            let body = read_body(&mut req);
            let json = body_is_json(&req);
            handlers::post_blueprint(state, req, body, json, false);
        }
        (Method::Post, ["api", "v0", "blueprints", "workspace"]) => {
            let body = read_body(&mut req);
            let json = body_is_json(&req);
            handlers::post_blueprint(state, req, body, json, true);
        }
        (Method::Delete, ["api", "v0", "blueprints", "delete", name]) => {
            handlers::delete_blueprint(state, req, name);
        }
        (Method::Delete, ["api", "v0", "blueprints", "workspace", name]) => {
            handlers::delete_workspace(state, req, name);
        }
        (Method::Get, ["api", "v0", "blueprints", "info", name]) => {
            let as_toml = query.is_some_and(|q| q.split('&').any(|kv| kv == "format=toml"));
            handlers::blueprint_info(state, req, name, as_toml);
        }
        (Method::Get, ["api", "v0", "blueprints", "list"]) => {
            handlers::list_blueprints(state, req);
        }
        (Method::Get, ["api", "v0", "blueprints", "changes", names]) => {
            handlers::blueprint_changes(state, req, names);
        }
        (Method::Post, ["api", "v0", "blueprints", "tag", name]) => {
            handlers::tag_blueprint(state, req, name);
        }
        (Method::Post, ["api", "v0", "blueprints", "undo", name, commit]) => {
            handlers::undo_blueprint(state, req, name, commit);
        }
        (Method::Get, ["api", "v0", "blueprints", "depsolve", name]) => {
            handlers::depsolve_blueprint(state, req, name);
        }
        (Method::Get, ["api", "v0", "blueprints", "freeze", name]) => {
            handlers::freeze_blueprint(state, req, name);
        }
        (Method::Post, ["api", "v0", "compose"]) => {
            let body = read_body(&mut req);
            handlers::compose(state, req, body);
        }
        _ => {
            respond_envelope(req, 404, ApiStatus::error("NotFound", format!("{method} {path}")));
        }
    }
}

/// Dispatch one request on the worker-facing job socket.
pub fn handle_job_request(state: &ServerState, mut req: Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    debug!("jobs: {method} {url}");

    let segments: Vec<&str> = url.trim_matches('/').split('/').collect();
    match (&method, segments.as_slice()) {
        (Method::Post, ["job-queue", "v1", "jobs"]) => {
            jobs::claim(state, req);
        }
        (Method::Patch, ["job-queue", "v1", "jobs", id]) => {
            let body = read_body(&mut req);
            jobs::update(state, req, id, body);
        }
        _ => {
            respond_envelope(req, 404, ApiStatus::error("NotFound", format!("{method} {url}")));
        }
    }
}

/// Accept loop: one spawned handler thread per request, so a blocking
/// claim or a slow solver never stalls other callers.
fn serve(state: &Arc<ServerState>, server: &Server, handler: fn(&ServerState, Request)) {
    for request in server.incoming_requests() {
        let state = Arc::clone(state);
        std::thread::spawn(move || handler(&state, request));
    }
}

pub fn run_api_server(state: &Arc<ServerState>, server: &Server) {
    serve(state, server, handle_api_request);
}

pub fn run_job_server(state: &Arc<ServerState>, server: &Server) {
    serve(state, server, handle_job_request);
}

/// Bind a Unix-socket HTTP listener, replacing a stale socket file.
pub fn bind_unix(path: &Path) -> Result<Server, String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    if path.exists() {
        warn!("removing stale socket {}", path.display());
        std::fs::remove_file(path).map_err(|e| e.to_string())?;
    }
    Server::http_unix(path).map_err(|e| e.to_string())
}

/// A server bound to sockets under a test directory, stopped on drop.
pub struct TestServer {
    pub api_socket: PathBuf,
    pub job_socket: PathBuf,
    api_server: Arc<Server>,
    job_server: Arc<Server>,
    _api_loop: std::thread::JoinHandle<()>,
    _job_loop: std::thread::JoinHandle<()>,
}

impl TestServer {
    pub fn start(dir: &Path, state: ServerState) -> Self {
        let api_socket = dir.join("api.socket");
        let job_socket = dir.join("job.socket");
        let api_server = Arc::new(bind_unix(&api_socket).expect("bind api socket"));
        let job_server = Arc::new(bind_unix(&job_socket).expect("bind job socket"));
        let state = Arc::new(state);

        let api_loop = {
            let state = Arc::clone(&state);
            let server = Arc::clone(&api_server);
            std::thread::spawn(move || run_api_server(&state, &server))
        };
        let job_loop = {
            let state = Arc::clone(&state);
            let server = Arc::clone(&job_server);
            std::thread::spawn(move || run_job_server(&state, &server))
        };

        Self {
            api_socket,
            job_socket,
            api_server,
            job_server,
            _api_loop: api_loop,
            _job_loop: job_loop,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.api_server.unblock();
        self.job_server.unblock();
    }
}
