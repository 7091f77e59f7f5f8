//! Rerun submission and status endpoints.

use std::sync::Arc;

use actix_web::{HttpResponse, get, post, web};
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{RerunRequest, RerunResponse};
use crate::registry::JobRegistry;
use crate::services::JobDriver;

/// Submit a rerun of selected test cases.
///
/// Accepts the selection immediately and returns the generated job id; the
/// work itself runs in a background task. Progress is available through
/// the status endpoint.
#[post("/rerun")]
pub async fn submit_rerun(
    registry: web::Data<JobRegistry>,
    driver: web::Data<Arc<JobDriver>>,
    request: web::Json<RerunRequest>,
) -> ApiResult<HttpResponse> {
    let request = request.into_inner();
    if request.selected_cases.is_empty() {
        return Err(ApiError::InvalidInput(
            "No selectedCases provided".to_string(),
        ));
    }

    let job_id = Uuid::new_v4();
    registry
        .create(job_id)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    info!(
        "Accepted rerun of {} case(s) as job {job_id}",
        request.selected_cases.len()
    );

    driver.spawn(job_id, request);

    Ok(HttpResponse::Ok().json(RerunResponse {
        status: "queued".to_string(),
        message: "Rerun job initiated.".to_string(),
        job_id,
    }))
}

/// Query the current snapshot of a rerun job.
///
/// Always answers 200; unknown ids yield the `not_found` sentinel record.
#[get("/rerun_status/{job_id}")]
pub async fn rerun_status(
    registry: web::Data<JobRegistry>,
    job_id: web::Path<Uuid>,
) -> HttpResponse {
    HttpResponse::Ok().json(registry.snapshot(job_id.into_inner()))
}

/// Configure rerun routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(submit_rerun).service(rerun_status);
}
