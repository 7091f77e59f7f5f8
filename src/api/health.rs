//! Health check endpoints.

use actix_web::{HttpResponse, get, web};
use chrono::Utc;
use serde::Serialize;

use crate::registry::JobRegistry;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    timestamp: String,
    tracked_jobs: usize,
}

/// Health check endpoint.
///
/// Returns 200 if the service is running.
#[get("/health")]
pub async fn health(registry: web::Data<JobRegistry>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339(),
        tracked_jobs: registry.job_count(),
    })
}

/// Configure health routes.
pub fn configure_health_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health);
}
