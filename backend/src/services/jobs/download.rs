use crate::error::ServiceError;
use crate::filename::download_name;
use crate::job_controller::state::JobsState;
use crate::services::jobs::parse_job_id;
use actix_files::NamedFile;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use mime_guess::mime;
use common::jobs::JobStatus;
use std::path::Path;

pub(crate) async fn process(
    req: HttpRequest,
    job_id: web::Path<String>,
    state: web::Data<JobsState>,
) -> impl Responder {
    download_result(req, job_id, state).await
}

async fn download_result(
    req: HttpRequest,
    job_id: web::Path<String>,
    state: web::Data<JobsState>,
) -> Result<HttpResponse, ServiceError> {
    let id = parse_job_id(&job_id)?;
    let job = state.store().get(id).await?;
    if job.status != JobStatus::Completed {
        return Err(ServiceError::NotCompleted(job.status.to_string()));
    }
    let output = job.output_location.ok_or(ServiceError::ResultMissing)?;
    send_pdf(&req, &output, &job.original_filename).await
}

/// Streams a finished PDF as an attachment named after the upload.
pub(crate) async fn send_pdf(
    req: &HttpRequest,
    path: &Path,
    original_filename: &str,
) -> Result<HttpResponse, ServiceError> {
    let file = NamedFile::open_async(path)
        .await
        .map_err(|_| ServiceError::ResultMissing)?;
    Ok(file
        .set_content_type(mime::APPLICATION_PDF)
        .set_content_disposition(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(download_name(original_filename))],
        })
        .into_response(req))
}
