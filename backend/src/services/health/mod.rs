use actix_web::web::{get, resource};
use actix_web::{HttpResponse, Resource, Responder};
use common::jobs::HealthResponse;

/// `GET /health`, for load balancers and container probes.
pub fn configure_routes() -> Resource {
    resource("/health").route(get().to(process))
}

pub(crate) async fn process() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        message: "OCR service is running".to_string(),
    })
}
