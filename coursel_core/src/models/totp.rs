use std::time::{SystemTime, UNIX_EPOCH};
use totp_rs::{Algorithm, Secret, TOTP};

use crate::error::CoreError;

pub const TOTP_DIGITS: usize = 6;
pub const TOTP_STEP: u64 = 30;
/// Accept the current 30-second window plus one adjacent window for clock
/// drift.
pub const TOTP_SKEW: u8 = 1;

/// Standard time-based 6-digit codes over base32 secrets. One instance is
/// shared process-wide; the issuer ends up in the otpauth setup URI.
#[derive(Clone)]
pub struct TotpManager {
  issuer: String,
}

impl TotpManager {
  pub fn new(issuer: impl Into<String>) -> Self {
    Self {
      issuer: issuer.into(),
    }
  }

  /// Fresh 160-bit secret, base32-encoded for storage and for the setup URI.
  pub fn generate_secret(&self) -> String {
    Secret::generate_secret().to_encoded().to_string()
  }

  /// otpauth:// URI the client feeds to an authenticator app.
  pub fn setup_uri(&self, secret: &str, account: &str) -> Result<String, CoreError> {
    Ok(self.build(secret, account)?.get_url())
  }

  /// Verify a candidate code against the secret at the current time.
  pub fn verify(&self, secret: &str, code: &str) -> Result<(), CoreError> {
    self.verify_at(secret, code, unix_now())
  }

  /// Verify at an explicit unix timestamp. The skew of one step admits the
  /// adjacent windows on both sides.
  pub fn verify_at(&self, secret: &str, code: &str, time: u64) -> Result<(), CoreError> {
    let totp = self.build(secret, "account")?;
    if totp.check(code.trim(), time) {
      Ok(())
    } else {
      Err(CoreError::BadTotp)
    }
  }

  /// The valid code for the window containing `time`.
  pub fn code_at(&self, secret: &str, time: u64) -> Result<String, CoreError> {
    Ok(self.build(secret, "account")?.generate(time))
  }

  /// The valid code right now. Login flows in tests use this to play the
  /// authenticator side.
  pub fn current_code(&self, secret: &str) -> Result<String, CoreError> {
    self.code_at(secret, unix_now())
  }

  fn build(&self, secret: &str, account: &str) -> Result<TOTP, CoreError> {
    let secret_bytes = Secret::Encoded(secret.to_string())
      .to_bytes()
      .map_err(|e| CoreError::Validation(format!("malformed TOTP secret: {e:?}")))?;

    TOTP::new(
      Algorithm::SHA1,
      TOTP_DIGITS,
      TOTP_SKEW,
      TOTP_STEP,
      secret_bytes,
      Some(self.issuer.clone()),
      account.to_string(),
    )
    .map_err(|e| CoreError::Internal(format!("TOTP construction failed: {e}")))
  }
}

fn unix_now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0)
}
