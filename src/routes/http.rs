//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs its parameters and basic result info.

use std::sync::Arc;
use axum::{extract::{Path, State}, http::StatusCode, Json, response::IntoResponse};
use tracing::{info, instrument};

use crate::domain::CourseSpec;
use crate::protocol::*;
use crate::state::AppState;
use crate::logic::start_course;

fn error_response(status: StatusCode, error: impl Into<String>) -> axum::response::Response {
  (status, Json(ErrorOut { error: error.into() })).into_response()
}

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  let oracle = state.scheduler.context().text.name().to_string();
  Json(HealthOut { ok: true, oracle })
}

#[instrument(level = "info", skip(state, spec), fields(subject = %spec.subject))]
pub async fn http_post_course(
  State(state): State<Arc<AppState>>,
  Json(spec): Json<CourseSpec>,
) -> axum::response::Response {
  match start_course(&state, spec).await {
    Ok(artifact) => Json(artifact).into_response(),
    Err(e) => error_response(StatusCode::BAD_REQUEST, e),
  }
}

#[instrument(level = "info", skip(state), fields(%job_id))]
pub async fn http_get_course(
  State(state): State<Arc<AppState>>,
  Path(job_id): Path<String>,
) -> axum::response::Response {
  match state.scheduler.snapshot(&job_id).await {
    Some(artifact) => {
      info!(target: "coursegen", %job_id, complete = artifact.complete, "HTTP snapshot served");
      Json(artifact).into_response()
    }
    None => error_response(StatusCode::NOT_FOUND, format!("unknown job {job_id}")),
  }
}

#[instrument(level = "info", skip(state), fields(%job_id))]
pub async fn http_delete_subscribers(
  State(state): State<Arc<AppState>>,
  Path(job_id): Path<String>,
) -> axum::response::Response {
  if state.scheduler.remove_callback(&job_id).await {
    info!(target: "coursegen", %job_id, "HTTP subscribers removed");
    Json(RemovedOut { job_id, removed: true }).into_response()
  } else {
    error_response(StatusCode::NOT_FOUND, format!("unknown job {job_id}"))
  }
}
