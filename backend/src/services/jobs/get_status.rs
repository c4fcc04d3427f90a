use crate::error::ServiceError;
use crate::job_controller::state::JobsState;
use crate::services::jobs::parse_job_id;
use actix_web::{web, HttpResponse, Responder};

pub(crate) async fn process(job_id: web::Path<String>, state: web::Data<JobsState>) -> impl Responder {
    get_job_status(job_id, state).await
}

async fn get_job_status(
    job_id: web::Path<String>,
    state: web::Data<JobsState>,
) -> Result<HttpResponse, ServiceError> {
    let id = parse_job_id(&job_id)?;
    let job = state.store().get(id).await?;
    Ok(HttpResponse::Ok().json(job.to_response()))
}
