use crate::error::ServiceError;
use crate::job_controller::state::JobsState;
use crate::services::jobs::upload::receive_upload;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse, Responder};
use log::info;
use common::jobs::CreateJobResponse;

pub(crate) async fn process(payload: Multipart, state: web::Data<JobsState>) -> impl Responder {
    create_job(payload, state).await
}

/// Accepts an upload and answers with the new job's id without waiting for
/// the conversion.
async fn create_job(
    payload: Multipart,
    state: web::Data<JobsState>,
) -> Result<HttpResponse, ServiceError> {
    let admission = state.runner.try_admit()?;
    let upload = receive_upload(payload, &state).await?;

    let job_id = state.store().create(upload.filename.clone()).await;
    info!("[{}] Accepted {}", job_id, upload.filename);
    state
        .runner
        .dispatch(admission, job_id, upload.file, upload.options);

    Ok(HttpResponse::Ok().json(CreateJobResponse { job_id }))
}
