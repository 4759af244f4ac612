use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::models::codes::{RegistrationCode, ResetCode};
use crate::models::course::{Course, Enrollment};
use crate::models::jwt::RefreshToken;
use crate::models::user::UserRepository;
use crate::models::{CourseId, UserId};

#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
  async fn store(
    &self,
    user_id: UserId,
    raw_token: &str,
    expires_at: DateTime<Utc>,
  ) -> Result<RefreshToken, CoreError>;

  /// Lookup by the sha256 digest of the raw token. Returns revoked and
  /// expired records too; the gateway runs the validation ladder.
  async fn find_by_token(&self, raw_token: &str) -> Result<Option<RefreshToken>, CoreError>;

  /// Rotation: revoke the old record and store the new raw token in one
  /// step.
  async fn replace(
    &self,
    old_token_id: i64,
    new_raw_token: &str,
    new_expires_at: DateTime<Utc>,
  ) -> Result<RefreshToken, CoreError>;

  async fn revoke(&self, token_id: i64) -> Result<(), CoreError>;
  async fn revoke_all_for_user(&self, user_id: UserId) -> Result<(), CoreError>;
}

#[async_trait]
pub trait CodeRepository: Send + Sync {
  async fn create_registration_code(&self, code: &RegistrationCode) -> Result<(), CoreError>;

  /// Atomically increments `used_count`; `CodeInvalid` when the code is
  /// missing, expired or exhausted.
  async fn consume_registration_code(&self, code: &str) -> Result<RegistrationCode, CoreError>;

  async fn create_reset_code(&self, code: &ResetCode) -> Result<(), CoreError>;

  /// Single-use and bound to the username it was issued for.
  async fn consume_reset_code(&self, code: &str, username: &str) -> Result<ResetCode, CoreError>;
}

#[async_trait]
pub trait CourseRepository: Send + Sync {
  /// Provisioning-side insert, used by seeds and tests. No public endpoint
  /// reaches this.
  async fn insert_course(&self, course: &Course) -> Result<(), CoreError>;

  async fn find_course(&self, id: CourseId) -> Result<Option<Course>, CoreError>;

  async fn course_exists(&self, id: CourseId) -> Result<bool, CoreError>;

  async fn enrollments_for_user(&self, user_id: UserId) -> Result<Vec<Enrollment>, CoreError>;

  /// The serialized mutation path for `select`. One atomic check-and-mutate:
  /// already-enrolled, capacity, tag eligibility and time-conflict checks
  /// run against current state, then the enrollment row is inserted and
  /// `selected_count` incremented in the same transaction.
  async fn apply_select(&self, user_id: UserId, course_id: CourseId) -> Result<(), CoreError>;

  /// The serialized mutation path for `deselect`: remove the enrollment row
  /// and decrement `selected_count`, or fail `NotEnrolled`.
  async fn apply_deselect(&self, user_id: UserId, course_id: CourseId) -> Result<(), CoreError>;
}

/// The full storage surface a backend provides.
pub trait Storage:
  UserRepository + RefreshTokenRepository + CodeRepository + CourseRepository
{
}

impl<T> Storage for T where
  T: UserRepository + RefreshTokenRepository + CodeRepository + CourseRepository
{
}
