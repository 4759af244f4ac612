use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Specific token validation error types to provide more granular control
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenValidationError {
  /// Token not found in the store
  #[error("invalid or expired refresh token")]
  NotFound,

  /// Token is expired
  #[error("invalid or expired token")]
  Expired,

  /// Token has been revoked
  #[error("invalid or revoked token")]
  Revoked,

  /// Token failed signature or structural validation
  #[error("invalid token")]
  Malformed,
}

/// Rule violations raised by the serialized selection mutation path.
///
/// Every variant is non-retryable: the task that hit it terminates with the
/// matching failure kind and is never re-enqueued.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionError {
  #[error("student is already enrolled in this course")]
  AlreadyEnrolled,

  #[error("student is not enrolled in this course")]
  NotEnrolled,

  #[error("course has no remaining capacity")]
  CourseFull,

  #[error("course schedule conflicts with an existing enrollment")]
  TimeConflict,

  #[error("student tags do not satisfy the course tag restriction")]
  TagIneligible,
}

/// Core domain error types
/// These errors represent business domain issues, not technical implementation details
#[derive(Error, Debug)]
pub enum CoreError {
  /// Store reachable but the query itself failed
  #[error("database error: {0}")]
  Database(String),

  /// Store unreachable, pool exhausted, or statement timed out
  #[error("storage unavailable: {0}")]
  StorageUnavailable(String),

  /// An invariant the store must uphold was observed broken
  #[error("integrity violation: {0}")]
  IntegrityViolation(String),

  #[error("bad credentials")]
  BadCredentials,

  #[error("bad TOTP code")]
  BadTotp,

  #[error("account is disabled")]
  Inactive,

  #[error("registration or reset code is invalid: {0}")]
  CodeInvalid(String),

  #[error("username already taken: {0}")]
  UsernameTaken(String),

  #[error("invalid token: {0}")]
  InvalidToken(TokenValidationError),

  #[error("unauthorized: {0}")]
  Unauthorized(String),

  #[error("course not found: {0}")]
  CourseNotFound(i64),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("selection rejected: {0}")]
  Selection(SelectionError),

  #[error("task queue is full")]
  QueueFull,

  #[error("dispatcher is shutting down")]
  ShuttingDown,

  #[error("validation error: {0}")]
  Validation(String),

  #[error("internal error: {0}")]
  Internal(String),
}

impl CoreError {
  /// Whether a failed task may be re-enqueued. Only storage outages (which
  /// include worker deadline expiry) qualify; every rule violation is final.
  pub fn is_transient(&self) -> bool {
    matches!(self, CoreError::StorageUnavailable(_))
  }

  /// Map sqlx database errors to CoreError variants. Connection-level
  /// failures are transient; constraint violations surface as conflicts the
  /// call site can refine.
  pub fn from_database_error(error: sqlx::Error) -> Self {
    match &error {
      sqlx::Error::Io(_)
      | sqlx::Error::PoolTimedOut
      | sqlx::Error::PoolClosed
      | sqlx::Error::WorkerCrashed => CoreError::StorageUnavailable(error.to_string()),
      sqlx::Error::RowNotFound => CoreError::NotFound(error.to_string()),
      _ => {
        if let Some(db_err) = error.as_database_error() {
          if db_err.is_unique_violation() {
            return CoreError::Validation(format!("unique constraint: {}", db_err.message()));
          }
          if db_err.is_check_violation() {
            return CoreError::IntegrityViolation(db_err.message().to_string());
          }
        }
        CoreError::Database(error.to_string())
      }
    }
  }
}

impl From<sqlx::Error> for CoreError {
  fn from(err: sqlx::Error) -> Self {
    CoreError::from_database_error(err)
  }
}

impl From<jsonwebtoken::errors::Error> for CoreError {
  fn from(err: jsonwebtoken::errors::Error) -> Self {
    match err.kind() {
      jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
        CoreError::InvalidToken(TokenValidationError::Expired)
      }
      _ => CoreError::InvalidToken(TokenValidationError::Malformed),
    }
  }
}

impl From<SelectionError> for CoreError {
  fn from(err: SelectionError) -> Self {
    CoreError::Selection(err)
  }
}

impl From<anyhow::Error> for CoreError {
  fn from(err: anyhow::Error) -> Self {
    CoreError::Internal(err.to_string())
  }
}

pub trait ErrorMapper {
  type Error;

  fn map_error(error: CoreError) -> Self::Error;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_storage_unavailable_is_transient() {
    assert!(CoreError::StorageUnavailable("pool timeout".into()).is_transient());
    assert!(!CoreError::Selection(SelectionError::CourseFull).is_transient());
    assert!(!CoreError::Database("syntax".into()).is_transient());
    assert!(!CoreError::BadTotp.is_transient());
  }

  #[test]
  fn jwt_expiry_maps_to_expired_token() {
    let err = jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::ExpiredSignature);
    match CoreError::from(err) {
      CoreError::InvalidToken(TokenValidationError::Expired) => {}
      other => panic!("unexpected mapping: {other}"),
    }
  }
}
