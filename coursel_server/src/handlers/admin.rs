//! Admin code issuance and the internal task-placement surface.

use axum::{
  Extension, Json,
  extract::State,
  http::{HeaderMap, StatusCode},
  response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use coursel_core::contracts::{CourseRepository, UserRepository};
use coursel_core::models::user::{AuthUser, UserRole};
use coursel_core::models::{CourseId, SelectionTask, TaskId, TaskKind, UserId};

use crate::error::AppError;
use crate::state::AppState;

const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

fn default_code_ttl() -> i64 {
  7 * 24 * 60 * 60
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRegistrationCodeRequest {
  pub role: UserRole,
  pub max_uses: i32,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default = "default_code_ttl")]
  pub ttl_seconds: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CodeResponse {
  pub code: String,
  pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateResetCodeRequest {
  pub username: String,
  #[serde(default = "default_code_ttl")]
  pub ttl_seconds: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InternalMutateRequest {
  pub user_id: i64,
  pub course_id: i64,
  pub kind: TaskKind,
  /// Admin placing the task on the student's behalf; recorded on the task.
  pub admin_id: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InternalMutateResponse {
  pub task_id: TaskId,
  pub estimated_position: usize,
}

fn require_admin(auth_user: &AuthUser) -> Result<(), AppError> {
  if auth_user.role.is_admin() {
    Ok(())
  } else {
    Err(AppError::Unauthorized("admin role required".to_string()))
  }
}

#[utoipa::path(
  post,
  path = "/admin/registration-code",
  request_body = CreateRegistrationCodeRequest,
  responses(
    (status = 201, description = "Registration code issued", body = CodeResponse),
    (status = 403, description = "Admin only")
  ),
  security(("bearer" = [])),
  tag = "admin"
)]
pub async fn create_registration_code_handler(
  State(state): State<AppState>,
  Extension(auth_user): Extension<AuthUser>,
  Json(payload): Json<CreateRegistrationCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
  require_admin(&auth_user)?;

  let code = state
    .auth
    .create_registration_code(
      payload.role,
      payload.max_uses,
      payload.tags,
      payload.ttl_seconds,
    )
    .await?;
  Ok((
    StatusCode::CREATED,
    Json(CodeResponse {
      code: code.code,
      expires_at: code.expires_at,
    }),
  ))
}

pub async fn create_reset_code_handler(
  State(state): State<AppState>,
  Extension(auth_user): Extension<AuthUser>,
  Json(payload): Json<CreateResetCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
  require_admin(&auth_user)?;

  let code = state
    .auth
    .create_reset_code(&payload.username, payload.ttl_seconds)
    .await?;
  Ok((
    StatusCode::CREATED,
    Json(CodeResponse {
      code: code.code,
      expires_at: code.expires_at,
    }),
  ))
}

/// Task placement on a student's behalf. This is the only caller besides the
/// funnel that can reach the dispatcher, and it is guarded by the static
/// internal token rather than a bearer token.
pub async fn internal_mutate_handler(
  State(state): State<AppState>,
  headers: HeaderMap,
  Json(payload): Json<InternalMutateRequest>,
) -> Result<impl IntoResponse, AppError> {
  let presented = headers
    .get(INTERNAL_TOKEN_HEADER)
    .and_then(|value| value.to_str().ok())
    .unwrap_or_default();
  if presented.is_empty() || presented != state.internal.token {
    return Err(AppError::Unauthorized(
      "internal token missing or wrong".to_string(),
    ));
  }

  let user_id = UserId(payload.user_id);
  let course_id = CourseId(payload.course_id);

  let student = state
    .store
    .find_by_id(user_id)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?;
  if !student.role.is_student() {
    return Err(AppError::InvalidInput(
      "selection tasks target student accounts".to_string(),
    ));
  }
  if !student.is_active {
    return Err(AppError::Inactive);
  }
  if !state.store.course_exists(course_id).await? {
    return Err(AppError::CourseNotFound(course_id.0));
  }

  let mut task = SelectionTask::new(user_id, course_id, payload.kind);
  task.impersonated_by = payload.admin_id.map(UserId);
  let (task_id, estimated_position) = state.dispatcher.submit(task)?;

  Ok((
    StatusCode::ACCEPTED,
    Json(InternalMutateResponse {
      task_id,
      estimated_position,
    }),
  ))
}
