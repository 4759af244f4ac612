use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::user::UserRole;

/// Admin-issued consumable token authorizing account creation. The tags on
/// the code are inherited by the student at registration time.
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct RegistrationCode {
  pub code: String,
  pub target_role: UserRole,
  pub max_uses: i32,
  pub used_count: i32,
  pub assigned_tags: Vec<String>,
  pub expires_at: DateTime<Utc>,
  pub created_at: DateTime<Utc>,
}

impl RegistrationCode {
  pub fn is_exhausted(&self) -> bool {
    self.used_count >= self.max_uses
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.expires_at <= now
  }

  pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
    !self.is_exhausted() && !self.is_expired(now)
  }
}

/// Single-use code bound to one username. Consuming it clears the stored
/// TOTP secret so the user can run setup again.
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct ResetCode {
  pub code: String,
  pub username: String,
  pub used: bool,
  pub expires_at: DateTime<Utc>,
  pub created_at: DateTime<Utc>,
}

impl ResetCode {
  pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
    !self.used && self.expires_at > now
  }
}

/// Random url-safe code material for registration and reset codes.
pub fn generate_code() -> String {
  use rand::Rng;

  let bytes: [u8; 16] = rand::thread_rng().gen();
  hex::encode(bytes)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  #[test]
  fn registration_code_exhaustion_and_expiry() {
    let now = Utc::now();
    let mut code = RegistrationCode {
      code: generate_code(),
      target_role: UserRole::Student,
      max_uses: 2,
      used_count: 0,
      assigned_tags: vec!["cs".into()],
      expires_at: now + Duration::hours(1),
      created_at: now,
    };
    assert!(code.is_usable(now));

    code.used_count = 2;
    assert!(code.is_exhausted());
    assert!(!code.is_usable(now));

    code.used_count = 1;
    assert!(code.is_usable(now));
    assert!(!code.is_usable(now + Duration::hours(2)));
  }

  #[test]
  fn reset_code_is_single_use() {
    let now = Utc::now();
    let mut code = ResetCode {
      code: generate_code(),
      username: "alice".into(),
      used: false,
      expires_at: now + Duration::minutes(30),
      created_at: now,
    };
    assert!(code.is_usable(now));
    code.used = true;
    assert!(!code.is_usable(now));
  }

  #[test]
  fn generated_codes_are_unique_enough() {
    let a = generate_code();
    let b = generate_code();
    assert_eq!(a.len(), 32);
    assert_ne!(a, b);
  }
}
