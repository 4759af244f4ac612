use axum::http::{StatusCode, header};
use axum::response::Json;
use axum::{
  body::Body,
  response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use coursel_core::error::{CoreError, ErrorMapper, SelectionError, TokenValidationError};
use thiserror::Error;

/// Wire error envelope. `error_kind` strings are the stable taxonomy names;
/// `message` is human-readable text and never carries internals.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorOutput {
  pub error_kind: String,
  pub message: String,
}

impl ErrorOutput {
  pub fn new(error_kind: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      error_kind: error_kind.into(),
      message: message.into(),
    }
  }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AppError {
  #[error("bad credentials")]
  BadCredentials,

  #[error("bad TOTP code")]
  BadTotp,

  #[error("token invalid")]
  TokenInvalid,

  #[error("token expired")]
  TokenExpired,

  #[error("token revoked")]
  Revoked,

  #[error("account disabled")]
  Inactive,

  #[error("code invalid: {0}")]
  CodeInvalid(String),

  #[error("username taken: {0}")]
  UsernameTaken(String),

  #[error("unauthorized: {0}")]
  Unauthorized(String),

  #[error("rate limited, retry after {retry_after_secs}s")]
  RateLimited { retry_after_secs: u64 },

  #[error("course not found: {0}")]
  CourseNotFound(i64),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("selection rejected: {0}")]
  Selection(SelectionError),

  #[error("queue full")]
  QueueFull,

  #[error("shutting down")]
  ShuttingDown,

  #[error("storage unavailable")]
  StorageUnavailable,

  #[error("invalid input: {0}")]
  InvalidInput(String),

  #[error("internal error: {0}")]
  Internal(String),
}

impl AppError {
  /// Stable taxonomy name for the envelope.
  pub fn error_kind(&self) -> &'static str {
    match self {
      AppError::BadCredentials => "BadCredentials",
      AppError::BadTotp => "BadTOTP",
      AppError::TokenInvalid => "TokenInvalid",
      AppError::TokenExpired => "TokenExpired",
      AppError::Revoked => "Revoked",
      AppError::Inactive => "Inactive",
      AppError::CodeInvalid(_) => "CodeInvalid",
      AppError::UsernameTaken(_) => "UsernameTaken",
      AppError::Unauthorized(_) => "Unauthorized",
      AppError::RateLimited { .. } => "RateLimited",
      AppError::CourseNotFound(_) => "CourseNotFound",
      AppError::NotFound(_) => "NotFound",
      AppError::Selection(e) => match e {
        SelectionError::AlreadyEnrolled => "AlreadyEnrolled",
        SelectionError::NotEnrolled => "NotEnrolled",
        SelectionError::CourseFull => "CourseFull",
        SelectionError::TimeConflict => "TimeConflict",
        SelectionError::TagIneligible => "TagIneligible",
      },
      AppError::QueueFull => "QueueFull",
      AppError::ShuttingDown => "ShuttingDown",
      AppError::StorageUnavailable => "StorageUnavailable",
      AppError::InvalidInput(_) => "InvalidInput",
      AppError::Internal(_) => "Internal",
    }
  }

  fn status(&self) -> StatusCode {
    match self {
      AppError::BadCredentials
      | AppError::BadTotp
      | AppError::TokenInvalid
      | AppError::TokenExpired
      | AppError::Revoked
      | AppError::Inactive => StatusCode::UNAUTHORIZED,
      AppError::Unauthorized(_) => StatusCode::FORBIDDEN,
      AppError::CourseNotFound(_) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
      AppError::UsernameTaken(_) | AppError::Selection(_) => StatusCode::CONFLICT,
      AppError::RateLimited { .. } | AppError::QueueFull => StatusCode::TOO_MANY_REQUESTS,
      AppError::ShuttingDown | AppError::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
      AppError::CodeInvalid(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
      AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl ErrorMapper for AppError {
  type Error = AppError;

  fn map_error(error: CoreError) -> Self::Error {
    match error {
      CoreError::BadCredentials => AppError::BadCredentials,
      CoreError::BadTotp => AppError::BadTotp,
      CoreError::Inactive => AppError::Inactive,
      CoreError::CodeInvalid(msg) => AppError::CodeInvalid(msg),
      CoreError::UsernameTaken(name) => AppError::UsernameTaken(name),
      CoreError::InvalidToken(TokenValidationError::Expired) => AppError::TokenExpired,
      CoreError::InvalidToken(TokenValidationError::Revoked) => AppError::Revoked,
      CoreError::InvalidToken(_) => AppError::TokenInvalid,
      CoreError::Unauthorized(msg) => AppError::Unauthorized(msg),
      CoreError::CourseNotFound(id) => AppError::CourseNotFound(id),
      CoreError::NotFound(msg) => AppError::NotFound(msg),
      CoreError::Selection(e) => AppError::Selection(e),
      CoreError::QueueFull => AppError::QueueFull,
      CoreError::ShuttingDown => AppError::ShuttingDown,
      CoreError::StorageUnavailable(msg) => {
        tracing::error!("storage unavailable: {msg}");
        AppError::StorageUnavailable
      }
      CoreError::Database(msg) | CoreError::IntegrityViolation(msg) => {
        tracing::error!("storage error: {msg}");
        AppError::Internal("storage error".to_string())
      }
      CoreError::Validation(msg) => AppError::InvalidInput(msg),
      CoreError::Internal(msg) => {
        tracing::error!("internal error: {msg}");
        AppError::Internal("internal error".to_string())
      }
    }
  }
}

impl From<CoreError> for AppError {
  fn from(error: CoreError) -> Self {
    AppError::map_error(error)
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response<Body> {
    let status = self.status();
    let body = Json(ErrorOutput::new(self.error_kind(), self.to_string()));

    if let AppError::RateLimited { retry_after_secs } = self {
      return (
        status,
        [(header::RETRY_AFTER, retry_after_secs.to_string())],
        body,
      )
        .into_response();
    }

    (status, body).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn auth_errors_map_to_401() {
    for err in [
      AppError::BadCredentials,
      AppError::BadTotp,
      AppError::TokenExpired,
      AppError::Revoked,
      AppError::Inactive,
    ] {
      assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
  }

  #[test]
  fn admission_errors_map_per_taxonomy() {
    assert_eq!(
      AppError::RateLimited {
        retry_after_secs: 2
      }
      .status(),
      StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(AppError::QueueFull.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
      AppError::ShuttingDown.status(),
      StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(
      AppError::Unauthorized("role".into()).status(),
      StatusCode::FORBIDDEN
    );
    assert_eq!(
      AppError::Selection(SelectionError::CourseFull).status(),
      StatusCode::CONFLICT
    );
  }

  #[test]
  fn kind_strings_are_taxonomy_names() {
    assert_eq!(AppError::BadTotp.error_kind(), "BadTOTP");
    assert_eq!(
      AppError::Selection(SelectionError::TimeConflict).error_kind(),
      "TimeConflict"
    );
    assert_eq!(
      AppError::from(CoreError::QueueFull).error_kind(),
      "QueueFull"
    );
  }
}
