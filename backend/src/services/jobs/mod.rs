//! HTTP API for OCR jobs.
//!
//! Uploads are handed to the job runner and processed in the background; the
//! client polls for status and downloads the result when it is ready.
//!
//! The provided routes are:
//! - `POST /jobs`: multipart upload with a `file` part plus optional OCR
//!   option fields (`languages`, `deskew`, `optimize`, ...). The file is
//!   streamed to a temp file, a job is created in the `started` state and
//!   its `job_id` is returned at once. 503 when too many jobs are admitted.
//!
//! - `GET /jobs/{job_id}`: the job's status, progress percentage, current
//!   message, page counters, processing time and error, as recorded in the
//!   shared `JobsState`.
//!
//! - `GET /jobs/{job_id}/result`: the searchable PDF of a completed job, as
//!   an attachment named `<upload>_OCR.pdf`. 400 while the job is not
//!   completed, 404 when the job or its file is gone.
//!
//! - `POST /process`: the synchronous variant. Same form as `POST /jobs`,
//!   but the answer is the PDF itself (or the error) once the job finishes.

use crate::error::ServiceError;
use actix_web::web::{get, post, resource, scope};
use actix_web::{Resource, Scope};
use common::jobs::JobId;

mod create;
mod download;
mod get_status;
mod process;
mod upload;

const API_PATH: &str = "/jobs";

/// Configures and returns the Actix scope for the job routes.
pub fn configure_routes() -> Scope {
    scope(API_PATH)
        // Upload a document and start a job.
        .route("", post().to(create::process))
        // Poll a job.
        .route("/{job_id}", get().to(get_status::process))
        // Fetch the finished PDF.
        .route("/{job_id}/result", get().to(download::process))
}

/// `POST /process`, the blocking upload-and-convert endpoint.
pub fn configure_process_route() -> Resource {
    resource("/process").route(post().to(process::process))
}

/// Ids that don't parse can't name a job.
pub(crate) fn parse_job_id(raw: &str) -> Result<JobId, ServiceError> {
    raw.parse().map_err(|_| ServiceError::JobNotFound)
}
