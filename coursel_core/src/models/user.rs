use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::sync::OnceLock;
use utoipa::ToSchema;

use argon2::{
  Argon2, PasswordHash, PasswordVerifier,
  password_hash::{PasswordHasher, SaltString, rand_core::OsRng},
};

use crate::error::CoreError;
use crate::models::UserId;

#[derive(
  Debug, Serialize, Deserialize, sqlx::Type, ToSchema, Clone, Copy, PartialEq, Eq, Hash,
)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
  Student,
  Teacher,
  Admin,
}

impl UserRole {
  pub fn is_student(&self) -> bool {
    matches!(self, UserRole::Student)
  }

  pub fn is_admin(&self) -> bool {
    matches!(self, UserRole::Admin)
  }
}

#[derive(Debug, Serialize, Deserialize, FromRow, PartialEq, Eq, Clone)]
pub struct User {
  pub id: UserId,
  pub username: String,
  #[sqlx(default)]
  #[serde(skip)]
  pub password_hash: Option<String>,
  pub role: UserRole,
  /// Base32-encoded TOTP secret. `None` means the user is inside the 2FA
  /// setup window (students) or has not opted in (teachers). Admins never
  /// carry a secret.
  #[serde(skip)]
  pub totp_secret: Option<String>,
  pub is_active: bool,
  pub tags: Vec<String>,
  pub created_at: DateTime<Utc>,
}

impl User {
  /// Students must present TOTP on every token exchange once enrolled;
  /// teachers only when they opted in. Admins never do.
  pub fn requires_totp(&self) -> bool {
    match self.role {
      UserRole::Student => true,
      UserRole::Teacher => self.totp_secret.is_some(),
      UserRole::Admin => false,
    }
  }
}

/// Repository-level input for account creation. Registration-code handling
/// happens in the auth gateway before this is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
  pub username: String,
  pub password: String,
  pub role: UserRole,
  pub totp_secret: Option<String>,
  pub tags: Vec<String>,
}

/// Authenticated principal extracted from a verified access token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AuthUser {
  pub id: UserId,
  pub role: UserRole,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
  async fn create(&self, input: &CreateUser) -> Result<User, CoreError>;
  async fn find_by_id(&self, id: UserId) -> Result<Option<User>, CoreError>;
  async fn find_by_username(&self, username: &str) -> Result<Option<User>, CoreError>;
  /// Password check against the stored hash. Runs a dummy verification when
  /// the username is unknown so the two failure paths cost the same.
  async fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>, CoreError>;
  async fn set_totp_secret(&self, id: UserId, secret: Option<&str>) -> Result<(), CoreError>;
  async fn set_tags(&self, id: UserId, tags: &[String]) -> Result<(), CoreError>;
}

/// Authentication helper functions (pure algorithm parts)
pub fn hashed_password(password: &str) -> Result<String, CoreError> {
  let salt = SaltString::generate(OsRng);

  // Argon2 with default params (Argon2id v19)
  let argon2 = Argon2::default();

  let password_hash = argon2
    .hash_password(password.as_bytes(), &salt)
    .map_err(|e| CoreError::Internal(e.to_string()))?
    .to_string();

  Ok(password_hash)
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, CoreError> {
  let argon2 = Argon2::default();
  let parsed_hash =
    PasswordHash::new(password_hash).map_err(|e| CoreError::Internal(e.to_string()))?;

  let is_valid = argon2
    .verify_password(password.as_bytes(), &parsed_hash)
    .is_ok();

  Ok(is_valid)
}

/// Burn the same Argon2 work on the user-not-found path as on a real
/// mismatch, keeping `authenticate` constant-time across the two.
pub fn verify_password_dummy(password: &str) {
  static DUMMY_HASH: OnceLock<String> = OnceLock::new();
  let hash = DUMMY_HASH.get_or_init(|| {
    hashed_password("coursel-timing-pad").expect("argon2 hashing cannot fail on static input")
  });
  let _ = verify_password(password, hash);
}

#[cfg(test)]
mod tests {
  use super::*;
  use anyhow::Result;

  #[test]
  fn hashed_password_should_work() -> Result<()> {
    let password = "hunter4332";
    let password_hash = hashed_password(password)?;
    assert_eq!(password_hash.len(), 97);
    let is_valid = verify_password(password, &password_hash)?;
    assert!(is_valid);
    assert!(!verify_password("wrong_password", &password_hash)?);
    Ok(())
  }

  #[test]
  fn different_passwords_should_have_different_hashes() -> Result<()> {
    let hash1 = hashed_password("password1")?;
    let hash2 = hashed_password("password2")?;
    assert_ne!(hash1, hash2);
    Ok(())
  }

  #[test]
  fn totp_requirement_follows_role() {
    let mut user = User {
      id: UserId(1),
      username: "alice".into(),
      password_hash: None,
      role: UserRole::Student,
      totp_secret: None,
      is_active: true,
      tags: vec![],
      created_at: Utc::now(),
    };
    assert!(user.requires_totp());

    user.role = UserRole::Teacher;
    assert!(!user.requires_totp());
    user.totp_secret = Some("JBSWY3DPEHPK3PXP".into());
    assert!(user.requires_totp());

    user.role = UserRole::Admin;
    assert!(!user.requires_totp());
  }
}
