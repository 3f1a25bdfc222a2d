//! Worker-facing job API handlers.

use crate::{api_error_from_queue, respond_envelope, respond_json, ServerState};
use kiln_client::api::{ApiStatus, JobUpdateRequest};
use tiny_http::{Request, Response};
use tracing::info;
use uuid::Uuid;

/// Long-poll claim. 201 with the job on success; 204 when the poll
/// expires so the handler thread retires without consuming anything.
pub fn claim(state: &ServerState, req: Request) {
    match state.queue.claim_timeout(state.claim_timeout) {
        Some(job) => {
            info!("job {} claimed", job.id);
            respond_json(req, 201, &job);
        }
        None => {
            let _ = req.respond(Response::empty(204));
        }
    }
}

pub fn update(state: &ServerState, req: Request, id: &str, body: Option<String>) {
    let Ok(id) = Uuid::parse_str(id) else {
        return respond_envelope(
            req,
            400,
            ApiStatus::error("NotFound", format!("malformed job id '{id}'")),
        );
    };
    let Some(body) = body else {
        return respond_envelope(
            req,
            400,
            ApiStatus::error("ParseError", "failed to read request body"),
        );
    };
    let request: JobUpdateRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => {
            return respond_envelope(req, 400, ApiStatus::error("ParseError", e.to_string()))
        }
    };

    match state.queue.update(id, request.status, request.image) {
        Ok(()) => {
            info!("job {id} updated to {}", request.status);
            respond_envelope(req, 200, ApiStatus::ok());
        }
        Err(e) => {
            let error = api_error_from_queue(&e);
            respond_envelope(req, 400, ApiStatus {
                status: false,
                errors: vec![error],
            });
        }
    }
}
