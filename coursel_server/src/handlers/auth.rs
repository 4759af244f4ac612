//! Authentication surface: two-stage login and registration, TOTP reset,
//! refresh rotation, logout, `/me`.
//!
//! Handlers only coordinate HTTP concerns; the flows live in
//! [`AuthService`](crate::domains::auth::AuthService).

use axum::{
  Extension, Json,
  extract::State,
  http::{HeaderMap, StatusCode},
  response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use coursel_core::error::CoreError;
use coursel_core::models::user::{AuthUser, UserRole};

use crate::error::AppError;
use crate::handlers::{check_ip_limit, check_user_limit};
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginV1Request {
  pub username: String,
  pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginV1Response {
  pub refresh_token: String,
  pub requires_2fa: bool,
  pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ExchangeRequest {
  pub refresh_token: String,
  pub totp_code: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AccessTokenResponse {
  pub access_token: String,
  pub expires_in: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AdminLoginRequest {
  pub username: String,
  pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterV1Request {
  pub username: String,
  pub password: String,
  pub role: UserRole,
  pub registration_code: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterV1Response {
  pub refresh_token: String,
  pub expires_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub totp_secret: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub totp_uri: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResetV1Request {
  pub username: String,
  pub reset_code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
  pub refresh_token: String,
  pub totp_code: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
  pub access_token: String,
  pub expires_in: i64,
  pub refresh_token: String,
  pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LogoutRequest {
  pub refresh_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
  pub user_id: i64,
  pub username: String,
  pub role: UserRole,
  pub tags: Vec<String>,
}

#[utoipa::path(
  post,
  path = "/login/v1",
  request_body = LoginV1Request,
  responses(
    (status = 200, description = "Refresh token issued", body = LoginV1Response),
    (status = 401, description = "Bad credentials or inactive account"),
    (status = 429, description = "Rate limited")
  ),
  tag = "auth"
)]
pub async fn login_v1_handler(
  State(state): State<AppState>,
  headers: HeaderMap,
  Json(payload): Json<LoginV1Request>,
) -> Result<impl IntoResponse, AppError> {
  check_ip_limit(&state, &headers)?;

  let stage1 = state
    .auth
    .login_stage1(&payload.username, &payload.password)
    .await?;
  Ok(Json(LoginV1Response {
    refresh_token: stage1.refresh_token,
    requires_2fa: stage1.requires_2fa,
    expires_at: stage1.expires_at,
  }))
}

/// Shared stage-2 exchange: `/login/v2`, `/register/v2` and `/reset/v2` all
/// verify the refresh token plus TOTP and mint the access token. A failed
/// TOTP attempt burns the penalty from the user bucket.
#[utoipa::path(
  post,
  path = "/login/v2",
  request_body = ExchangeRequest,
  responses(
    (status = 200, description = "Access token issued", body = AccessTokenResponse),
    (status = 401, description = "Invalid refresh token or TOTP"),
    (status = 429, description = "Rate limited")
  ),
  tag = "auth"
)]
pub async fn exchange_handler(
  State(state): State<AppState>,
  headers: HeaderMap,
  Json(payload): Json<ExchangeRequest>,
) -> Result<impl IntoResponse, AppError> {
  check_ip_limit(&state, &headers)?;

  let (_, user) = state.auth.validate_refresh(&payload.refresh_token).await?;
  check_user_limit(&state, user.id.0)?;

  match state
    .auth
    .issue_access(&user, payload.totp_code.as_deref())
  {
    Ok(grant) => Ok(Json(AccessTokenResponse {
      access_token: grant.access_token,
      expires_in: grant.expires_in,
    })),
    Err(CoreError::BadTotp) => {
      state.limiter.penalize_totp_failure(&user.id.to_string());
      Err(AppError::BadTotp)
    }
    Err(e) => Err(e.into()),
  }
}

#[utoipa::path(
  post,
  path = "/login/admin",
  request_body = AdminLoginRequest,
  responses(
    (status = 200, description = "Access token issued", body = AccessTokenResponse),
    (status = 401, description = "Bad credentials"),
    (status = 403, description = "Not an admin account")
  ),
  tag = "auth"
)]
pub async fn admin_login_handler(
  State(state): State<AppState>,
  headers: HeaderMap,
  Json(payload): Json<AdminLoginRequest>,
) -> Result<impl IntoResponse, AppError> {
  check_ip_limit(&state, &headers)?;

  let grant = state
    .auth
    .admin_login(&payload.username, &payload.password)
    .await?;
  Ok(Json(AccessTokenResponse {
    access_token: grant.access_token,
    expires_in: grant.expires_in,
  }))
}

#[utoipa::path(
  post,
  path = "/register/v1",
  request_body = RegisterV1Request,
  responses(
    (status = 201, description = "Account created, TOTP setup material returned", body = RegisterV1Response),
    (status = 400, description = "Registration code invalid"),
    (status = 409, description = "Username taken")
  ),
  tag = "auth"
)]
pub async fn register_v1_handler(
  State(state): State<AppState>,
  headers: HeaderMap,
  Json(payload): Json<RegisterV1Request>,
) -> Result<impl IntoResponse, AppError> {
  check_ip_limit(&state, &headers)?;

  let stage1 = state
    .auth
    .register_stage1(
      &payload.username,
      &payload.password,
      payload.role,
      &payload.registration_code,
    )
    .await?;
  let body = Json(RegisterV1Response {
    refresh_token: stage1.refresh_token,
    expires_at: stage1.expires_at,
    totp_secret: stage1.totp_secret,
    totp_uri: stage1.totp_uri,
  });
  Ok((StatusCode::CREATED, body))
}

pub async fn reset_v1_handler(
  State(state): State<AppState>,
  headers: HeaderMap,
  Json(payload): Json<ResetV1Request>,
) -> Result<impl IntoResponse, AppError> {
  check_ip_limit(&state, &headers)?;

  let stage1 = state
    .auth
    .reset_stage1(&payload.username, &payload.reset_code)
    .await?;
  Ok(Json(RegisterV1Response {
    refresh_token: stage1.refresh_token,
    expires_at: stage1.expires_at,
    totp_secret: stage1.totp_secret,
    totp_uri: stage1.totp_uri,
  }))
}

/// Rotate the refresh token and mint a new access token. Students present
/// TOTP here too.
pub async fn refresh_handler(
  State(state): State<AppState>,
  headers: HeaderMap,
  Json(payload): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
  check_ip_limit(&state, &headers)?;

  let (record, user) = state.auth.validate_refresh(&payload.refresh_token).await?;
  check_user_limit(&state, user.id.0)?;

  let grant = match state
    .auth
    .issue_access(&user, payload.totp_code.as_deref())
  {
    Ok(grant) => grant,
    Err(CoreError::BadTotp) => {
      state.limiter.penalize_totp_failure(&user.id.to_string());
      return Err(AppError::BadTotp);
    }
    Err(e) => return Err(e.into()),
  };

  let (new_refresh, refresh_expires_at) = state.auth.rotate_refresh(&record).await?;
  Ok(Json(RefreshResponse {
    access_token: grant.access_token,
    expires_in: grant.expires_in,
    refresh_token: new_refresh,
    refresh_expires_at,
  }))
}

pub async fn logout_handler(
  State(state): State<AppState>,
  headers: HeaderMap,
  Json(payload): Json<LogoutRequest>,
) -> Result<impl IntoResponse, AppError> {
  check_ip_limit(&state, &headers)?;

  state.auth.logout(&payload.refresh_token).await?;
  Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
  get,
  path = "/me",
  responses(
    (status = 200, description = "Authenticated principal", body = MeResponse),
    (status = 401, description = "Missing or invalid access token")
  ),
  security(("bearer" = [])),
  tag = "auth"
)]
pub async fn me_handler(
  State(state): State<AppState>,
  Extension(auth_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
  let user = state
    .auth
    .find_user(auth_user.id)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("user {}", auth_user.id)))?;

  Ok(Json(MeResponse {
    user_id: user.id.0,
    username: user.username,
    role: user.role,
    tags: user.tags,
  }))
}
