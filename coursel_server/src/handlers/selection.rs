//! Admission funnel: `/select`, `/deselect`, task polling and cancellation,
//! queue stats.
//!
//! The funnel verifies the token, applies both rate buckets, runs the coarse
//! checks, and hands the intent to the dispatcher. It never mutates course
//! state itself.

use axum::{
  Extension, Json,
  extract::{Path, State},
  http::{HeaderMap, StatusCode},
  response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use coursel_core::contracts::{CourseRepository, UserRepository};
use coursel_core::models::user::AuthUser;
use coursel_core::models::{
  CourseId, FailureKind, SelectionTask, TaskId, TaskKind, TaskStatus,
};

use crate::error::AppError;
use crate::handlers::{check_ip_limit, check_user_limit};
use crate::services::QueueStats;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SelectRequest {
  pub course_id: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitResponse {
  pub task_id: TaskId,
  pub estimated_position: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskStatusResponse {
  pub task_id: TaskId,
  pub status: TaskStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub failure_kind: Option<FailureKind>,
  pub submitted_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
  pub attempt_count: u32,
}

#[utoipa::path(
  post,
  path = "/select",
  request_body = SelectRequest,
  responses(
    (status = 202, description = "Task accepted", body = SubmitResponse),
    (status = 403, description = "Caller is not a student"),
    (status = 404, description = "Course not found"),
    (status = 429, description = "Rate limited or queue full"),
    (status = 503, description = "Shutting down")
  ),
  security(("bearer" = [])),
  tag = "admission"
)]
pub async fn select_handler(
  State(state): State<AppState>,
  Extension(auth_user): Extension<AuthUser>,
  headers: HeaderMap,
  Json(payload): Json<SelectRequest>,
) -> Result<impl IntoResponse, AppError> {
  submit(state, auth_user, headers, payload.course_id, TaskKind::Select).await
}

#[utoipa::path(
  post,
  path = "/deselect",
  request_body = SelectRequest,
  responses(
    (status = 202, description = "Task accepted", body = SubmitResponse),
    (status = 403, description = "Caller is not a student"),
    (status = 404, description = "Course not found"),
    (status = 429, description = "Rate limited or queue full"),
    (status = 503, description = "Shutting down")
  ),
  security(("bearer" = [])),
  tag = "admission"
)]
pub async fn deselect_handler(
  State(state): State<AppState>,
  Extension(auth_user): Extension<AuthUser>,
  headers: HeaderMap,
  Json(payload): Json<SelectRequest>,
) -> Result<impl IntoResponse, AppError> {
  submit(
    state,
    auth_user,
    headers,
    payload.course_id,
    TaskKind::Deselect,
  )
  .await
}

async fn submit(
  state: AppState,
  auth_user: AuthUser,
  headers: HeaderMap,
  course_id: i64,
  kind: TaskKind,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
  if !auth_user.role.is_student() {
    return Err(AppError::Unauthorized(
      "only students submit selection tasks".to_string(),
    ));
  }

  check_ip_limit(&state, &headers)?;
  check_user_limit(&state, auth_user.id.0)?;

  let student = state
    .store
    .find_by_id(auth_user.id)
    .await?
    .ok_or(AppError::TokenInvalid)?;
  if !student.is_active {
    return Err(AppError::Inactive);
  }

  let course_id = CourseId(course_id);
  if !state.store.course_exists(course_id).await? {
    return Err(AppError::CourseNotFound(course_id.0));
  }

  let task = SelectionTask::new(auth_user.id, course_id, kind);
  let (task_id, estimated_position) = state.dispatcher.submit(task)?;

  Ok((
    StatusCode::ACCEPTED,
    Json(SubmitResponse {
      task_id,
      estimated_position,
    }),
  ))
}

#[utoipa::path(
  get,
  path = "/task/{task_id}",
  params(("task_id" = Uuid, Path, description = "Task handle returned by select/deselect")),
  responses(
    (status = 200, description = "Task state", body = TaskStatusResponse),
    (status = 403, description = "Not the task owner"),
    (status = 404, description = "Unknown or expired task")
  ),
  security(("bearer" = [])),
  tag = "admission"
)]
pub async fn task_status_handler(
  State(state): State<AppState>,
  Extension(auth_user): Extension<AuthUser>,
  Path(task_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
  let task = fetch_owned_task(&state, &auth_user, TaskId(task_id))?;

  Ok(Json(TaskStatusResponse {
    task_id: task.id,
    status: task.status,
    failure_kind: task.failure_kind,
    submitted_at: task.submitted_at,
    completed_at: task.completed_at,
    attempt_count: task.attempt_count,
  }))
}

/// Cancellation only reaches tasks that are still pending.
pub async fn cancel_task_handler(
  State(state): State<AppState>,
  Extension(auth_user): Extension<AuthUser>,
  Path(task_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
  let task_id = TaskId(task_id);
  fetch_owned_task(&state, &auth_user, task_id)?;

  state.dispatcher.cancel(task_id)?;
  Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
  get,
  path = "/queue/stats",
  responses(
    (status = 200, description = "Dispatcher queue statistics", body = QueueStats),
    (status = 403, description = "Admin only")
  ),
  security(("bearer" = [])),
  tag = "admission"
)]
pub async fn queue_stats_handler(
  State(state): State<AppState>,
  Extension(auth_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
  if !auth_user.role.is_admin() {
    return Err(AppError::Unauthorized(
      "queue stats are admin-only".to_string(),
    ));
  }
  Ok(Json(state.dispatcher.stats()))
}

/// Task records are visible to their owner and to admins.
fn fetch_owned_task(
  state: &AppState,
  auth_user: &AuthUser,
  task_id: TaskId,
) -> Result<SelectionTask, AppError> {
  let task = state
    .dispatcher
    .status(task_id)
    .ok_or_else(|| AppError::NotFound(format!("task {task_id}")))?;

  if task.user_id != auth_user.id && !auth_user.role.is_admin() {
    return Err(AppError::Unauthorized(
      "task belongs to another user".to_string(),
    ));
  }
  Ok(task)
}
