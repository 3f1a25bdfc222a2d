//! HTTP-over-Unix-socket client for the Kiln blueprint and job APIs.
//!
//! Used by the worker to claim and update jobs, and by the integration
//! test harness to drive a real server. The synchronous HTTP ecosystem
//! has no Unix-socket transport, so the small amount of HTTP/1.1 framing
//! lives here: one request per connection, `Connection: close`, bodies
//! delimited by `Content-Length` or EOF.

pub mod api;

pub use api::{
    ApiError, ApiStatus, BlueprintChanges, BlueprintDeps, BlueprintsChangesResponse,
    BlueprintsInfoResponse, BlueprintsListResponse, ChangeState, CommitMeta, ComposeRequest,
    ComposeResponse, DepsolveResponse, FreezeResponse, FrozenBlueprint, JobUpdateRequest,
};

use kiln_queue::{ImageResult, Job, JobStatus};
use serde::de::DeserializeOwned;
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed HTTP response: {0}")]
    MalformedResponse(String),
    #[error("response decoding failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("API error (HTTP {status}): {}", api::join_errors(.errors))]
    Api { status: u16, errors: Vec<ApiError> },
}

/// A decoded HTTP response: status code plus raw body.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Client for one Unix-socket HTTP endpoint.
pub struct ApiClient {
    socket: PathBuf,
}

impl ApiClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    fn request(
        &self,
        method: &str,
        path: &str,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<HttpResponse, ClientError> {
        let mut stream = UnixStream::connect(&self.socket)?;

        let mut head = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n");
        if let Some(ct) = content_type {
            head.push_str(&format!("Content-Type: {ct}\r\n"));
        }
        head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
        stream.write_all(head.as_bytes())?;
        stream.write_all(body)?;
        stream.flush()?;

        let mut reader = BufReader::new(stream);
        let mut status_line = String::new();
        reader.read_line(&mut status_line)?;
        let status: u16 = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .ok_or_else(|| {
                ClientError::MalformedResponse(format!("bad status line: {status_line:?}"))
            })?;

        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 || line.trim().is_empty() {
                break;
            }
            if let Some((key, value)) = line.trim_end().split_once(':') {
                if key.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().ok();
                }
            }
        }

        let body = match content_length {
            Some(len) => {
                let mut buf = vec![0u8; len];
                reader.read_exact(&mut buf)?;
                buf
            }
            None => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                buf
            }
        };

        Ok(HttpResponse { status, body })
    }

    pub fn get(&self, path: &str) -> Result<HttpResponse, ClientError> {
        self.request("GET", path, None, &[])
    }

    pub fn post(
        &self,
        path: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<HttpResponse, ClientError> {
        self.request("POST", path, Some(content_type), body)
    }

    pub fn patch(
        &self,
        path: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<HttpResponse, ClientError> {
        self.request("PATCH", path, Some(content_type), body)
    }

    pub fn delete(&self, path: &str) -> Result<HttpResponse, ClientError> {
        self.request("DELETE", path, None, &[])
    }

    /// Decode a read endpoint's body as `T` on 2xx, or surface the error
    /// envelope.
    fn read_typed<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let resp = self.get(path)?;
        if resp.status >= 400 {
            return Err(api::envelope_error(&resp));
        }
        Ok(serde_json::from_slice(&resp.body)?)
    }

    /// Decode a mutation endpoint's `{status, errors}` envelope from any
    /// HTTP status; failures arrive as `status: false`, not `Err`.
    fn status_envelope(&self, resp: HttpResponse) -> Result<ApiStatus, ClientError> {
        Ok(serde_json::from_slice(&resp.body)?)
    }

    // --- blueprint API ---

    pub fn post_blueprint_toml(&self, body: &str) -> Result<ApiStatus, ClientError> {
        let resp = self.post("/api/v0/blueprints/new", "text/x-toml", body.as_bytes())?;
        self.status_envelope(resp)
    }

    pub fn post_blueprint_json(&self, body: &str) -> Result<ApiStatus, ClientError> {
        let resp = self.post("/api/v0/blueprints/new", "application/json", body.as_bytes())?;
        self.status_envelope(resp)
    }

    pub fn post_workspace_toml(&self, body: &str) -> Result<ApiStatus, ClientError> {
        let resp = self.post(
            "/api/v0/blueprints/workspace",
            "text/x-toml",
            body.as_bytes(),
        )?;
        self.status_envelope(resp)
    }

    pub fn post_workspace_json(&self, body: &str) -> Result<ApiStatus, ClientError> {
        let resp = self.post(
            "/api/v0/blueprints/workspace",
            "application/json",
            body.as_bytes(),
        )?;
        self.status_envelope(resp)
    }

    pub fn delete_blueprint(&self, name: &str) -> Result<ApiStatus, ClientError> {
        let resp = self.delete(&format!("/api/v0/blueprints/delete/{name}"))?;
        self.status_envelope(resp)
    }

    pub fn delete_workspace(&self, name: &str) -> Result<ApiStatus, ClientError> {
        let resp = self.delete(&format!("/api/v0/blueprints/workspace/{name}"))?;
        self.status_envelope(resp)
    }

    pub fn blueprint_info(&self, name: &str) -> Result<BlueprintsInfoResponse, ClientError> {
        self.read_typed(&format!("/api/v0/blueprints/info/{name}"))
    }

    pub fn blueprint_info_toml(&self, name: &str) -> Result<String, ClientError> {
        let resp = self.get(&format!("/api/v0/blueprints/info/{name}?format=toml"))?;
        if resp.status >= 400 {
            return Err(api::envelope_error(&resp));
        }
        Ok(resp.body_str().into_owned())
    }

    pub fn list_blueprints(&self) -> Result<BlueprintsListResponse, ClientError> {
        self.read_typed("/api/v0/blueprints/list")
    }

    pub fn blueprint_changes(
        &self,
        names: &[&str],
    ) -> Result<BlueprintsChangesResponse, ClientError> {
        self.read_typed(&format!("/api/v0/blueprints/changes/{}", names.join(",")))
    }

    pub fn tag_blueprint(&self, name: &str) -> Result<ApiStatus, ClientError> {
        let resp = self.post(
            &format!("/api/v0/blueprints/tag/{name}"),
            "application/json",
            &[],
        )?;
        self.status_envelope(resp)
    }

    pub fn undo_blueprint(&self, name: &str, commit: &str) -> Result<ApiStatus, ClientError> {
        let resp = self.post(
            &format!("/api/v0/blueprints/undo/{name}/{commit}"),
            "application/json",
            &[],
        )?;
        self.status_envelope(resp)
    }

    pub fn depsolve_blueprint(&self, name: &str) -> Result<DepsolveResponse, ClientError> {
        self.read_typed(&format!("/api/v0/blueprints/depsolve/{name}"))
    }

    pub fn freeze_blueprint(&self, name: &str) -> Result<FreezeResponse, ClientError> {
        self.read_typed(&format!("/api/v0/blueprints/freeze/{name}"))
    }

    pub fn compose(&self, blueprint_name: &str, format: &str) -> Result<ComposeResponse, ClientError> {
        let body = serde_json::to_vec(&ComposeRequest {
            blueprint_name: blueprint_name.to_owned(),
            format: format.to_owned(),
        })?;
        let resp = self.post("/api/v0/compose", "application/json", &body)?;
        if resp.status >= 400 {
            return Err(api::envelope_error(&resp));
        }
        Ok(serde_json::from_slice(&resp.body)?)
    }

    // --- worker-facing job API ---

    /// Long-poll for the next job. `None` means the poll expired without
    /// a job; callers just poll again.
    pub fn claim_job(&self) -> Result<Option<Job>, ClientError> {
        let resp = self.post("/job-queue/v1/jobs", "application/json", b"{}")?;
        match resp.status {
            201 => Ok(Some(serde_json::from_slice(&resp.body)?)),
            204 => Ok(None),
            _ => Err(api::envelope_error(&resp)),
        }
    }

    pub fn update_job(
        &self,
        id: Uuid,
        status: JobStatus,
        image: Option<ImageResult>,
    ) -> Result<ApiStatus, ClientError> {
        let body = serde_json::to_vec(&JobUpdateRequest { status, image })?;
        let resp = self.patch(
            &format!("/job-queue/v1/jobs/{id}"),
            "application/json",
            &body,
        )?;
        self.status_envelope(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;

    /// Serve one canned HTTP response on a Unix socket.
    fn one_shot_server(response: &'static str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api.sock");
        let listener = UnixListener::bind(&path).unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut line = String::new();
                let mut content_length = 0usize;
                loop {
                    line.clear();
                    if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                        break;
                    }
                    if let Some((key, value)) = line.trim_end().split_once(':') {
                        if key.eq_ignore_ascii_case("content-length") {
                            content_length = value.trim().parse().unwrap_or(0);
                        }
                    }
                }
                let mut body = vec![0u8; content_length];
                let _ = reader.read_exact(&mut body);
                let _ = stream.write_all(response.as_bytes());
            }
        });
        (dir, path)
    }

    #[test]
    fn parses_status_and_body() {
        let (_dir, path) = one_shot_server(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 16\r\n\r\n{\"status\": true}",
        );
        let client = ApiClient::new(path);
        let resp = client.get("/api/v0/blueprints/list").unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body_str(), "{\"status\": true}");
    }

    #[test]
    fn reads_body_to_eof_without_content_length() {
        let (_dir, path) = one_shot_server("HTTP/1.1 200 OK\r\n\r\n[1,2,3]");
        let client = ApiClient::new(path);
        let resp = client.get("/anything").unwrap();
        assert_eq!(resp.body_str(), "[1,2,3]");
    }

    #[test]
    fn status_envelope_with_errors_decodes() {
        let (_dir, path) = one_shot_server(
            "HTTP/1.1 400 Bad Request\r\nContent-Length: 72\r\n\r\n{\"status\": false, \"errors\": [{\"id\": \"NotFound\", \"msg\": \"no such name\"}]}",
        );
        let client = ApiClient::new(path);
        let status = client.delete_blueprint("ghost").unwrap();
        assert!(!status.status);
        assert_eq!(status.errors[0].id, "NotFound");
    }

    #[test]
    fn typed_read_surfaces_envelope_error() {
        let (_dir, path) = one_shot_server(
            "HTTP/1.1 400 Bad Request\r\nContent-Length: 72\r\n\r\n{\"status\": false, \"errors\": [{\"id\": \"NotFound\", \"msg\": \"no such name\"}]}",
        );
        let client = ApiClient::new(path);
        let err = client.list_blueprints().unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 400, .. }));
    }

    #[test]
    fn missing_socket_is_io_error() {
        let client = ApiClient::new("/nonexistent/api.sock");
        assert!(matches!(
            client.get("/api/v0/blueprints/list"),
            Err(ClientError::Io(_))
        ));
    }

    #[test]
    fn claim_returns_none_on_204() {
        let (_dir, path) = one_shot_server("HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n");
        let client = ApiClient::new(path);
        assert!(client.claim_job().unwrap().is_none());
    }
}
