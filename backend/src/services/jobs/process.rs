use crate::error::ServiceError;
use crate::job_controller::runner::JobOutcome;
use crate::job_controller::state::JobsState;
use crate::services::jobs::download::send_pdf;
use crate::services::jobs::upload::receive_upload;
use actix_multipart::Multipart;
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use log::info;

pub(crate) async fn process(
    req: HttpRequest,
    payload: Multipart,
    state: web::Data<JobsState>,
) -> impl Responder {
    process_now(req, payload, state).await
}

/// Same as creating a job, but holds the request open until the job is done
/// and answers with the PDF itself.
async fn process_now(
    req: HttpRequest,
    payload: Multipart,
    state: web::Data<JobsState>,
) -> Result<HttpResponse, ServiceError> {
    let admission = state.runner.try_admit()?;
    let upload = receive_upload(payload, &state).await?;

    let job_id = state.store().create(upload.filename.clone()).await;
    info!("[{}] Accepted {} for synchronous processing", job_id, upload.filename);
    let outcome = state
        .runner
        .dispatch(admission, job_id, upload.file, upload.options)
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?;

    match outcome {
        JobOutcome::Completed(output) => send_pdf(&req, &output, &upload.filename).await,
        JobOutcome::Failed {
            error,
            input_error: true,
        } => Err(ServiceError::InvalidInput(error)),
        JobOutcome::Failed { error, .. } => Err(ServiceError::Conversion(error)),
    }
}
