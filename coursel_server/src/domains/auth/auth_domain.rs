//! Two-stage authentication flows.
//!
//! Stage 1 trades credentials for a refresh token. Stage 2 trades the
//! refresh token (plus TOTP where the role demands it) for a signed access
//! token. Registration and TOTP reset mirror the same two-stage shape.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use coursel_core::contracts::{
  CodeRepository, RefreshTokenRepository, Storage, UserRepository,
};
use coursel_core::error::{CoreError, TokenValidationError};
use coursel_core::models::user::{CreateUser, User, UserRole};
use coursel_core::models::{RefreshToken, TokenManager, TotpManager, UserId};
use coursel_core::{generate_code, generate_refresh_token};

#[derive(Debug)]
pub struct LoginStage1 {
  pub refresh_token: String,
  pub expires_at: DateTime<Utc>,
  pub requires_2fa: bool,
}

#[derive(Debug)]
pub struct AccessGrant {
  pub access_token: String,
  pub expires_in: i64,
}

#[derive(Debug)]
pub struct RegisterStage1 {
  pub refresh_token: String,
  pub expires_at: DateTime<Utc>,
  /// Present for students (and opted-in flows): shown exactly once.
  pub totp_secret: Option<String>,
  pub totp_uri: Option<String>,
}

pub struct AuthService {
  store: Arc<dyn Storage>,
  token_manager: TokenManager,
  totp: TotpManager,
  refresh_ttl_seconds: i64,
}

impl AuthService {
  pub fn new(
    store: Arc<dyn Storage>,
    token_manager: TokenManager,
    totp: TotpManager,
    refresh_ttl_seconds: i64,
  ) -> Self {
    Self {
      store,
      token_manager,
      totp,
      refresh_ttl_seconds,
    }
  }

  pub fn totp(&self) -> &TotpManager {
    &self.totp
  }

  /// Stage 1 of login: password check, then a refresh token. The refresh
  /// token alone grants no service access.
  pub async fn login_stage1(
    &self,
    username: &str,
    password: &str,
  ) -> Result<LoginStage1, CoreError> {
    let user = self
      .store
      .authenticate(username, password)
      .await?
      .ok_or(CoreError::BadCredentials)?;
    if !user.is_active {
      return Err(CoreError::Inactive);
    }

    let (raw, record) = self.issue_refresh(user.id).await?;
    Ok(LoginStage1 {
      refresh_token: raw,
      expires_at: record.expires_at,
      requires_2fa: user.requires_totp(),
    })
  }

  /// Resolve a refresh token to its record and user, running the full
  /// validation ladder. The funnel uses the user id for its rate bucket
  /// before completing the exchange.
  pub async fn validate_refresh(&self, raw_token: &str) -> Result<(RefreshToken, User), CoreError> {
    let record = self
      .store
      .find_by_token(raw_token)
      .await?
      .ok_or(CoreError::InvalidToken(TokenValidationError::NotFound))?;

    if record.revoked {
      return Err(CoreError::InvalidToken(TokenValidationError::Revoked));
    }
    if record.expires_at < Utc::now() {
      return Err(CoreError::InvalidToken(TokenValidationError::Expired));
    }

    let user = self
      .store
      .find_by_id(record.user_id)
      .await?
      .ok_or_else(|| CoreError::NotFound("user linked to refresh token not found".to_string()))?;
    if !user.is_active {
      return Err(CoreError::Inactive);
    }

    Ok((record, user))
  }

  /// Stage 2: verify TOTP where required and mint the access token.
  pub fn issue_access(&self, user: &User, totp_code: Option<&str>) -> Result<AccessGrant, CoreError> {
    if user.requires_totp() {
      let secret = user.totp_secret.as_deref().ok_or(CoreError::BadTotp)?;
      let code = totp_code.ok_or(CoreError::BadTotp)?;
      self.totp.verify(secret, code)?;
    }

    let access_token = self.token_manager.generate_token(user.id, user.role)?;
    Ok(AccessGrant {
      access_token,
      expires_in: self.token_manager.access_ttl_seconds(),
    })
  }

  /// One-stage admin login.
  pub async fn admin_login(&self, username: &str, password: &str) -> Result<AccessGrant, CoreError> {
    let user = self
      .store
      .authenticate(username, password)
      .await?
      .ok_or(CoreError::BadCredentials)?;
    if !user.is_active {
      return Err(CoreError::Inactive);
    }
    if !user.role.is_admin() {
      return Err(CoreError::Unauthorized(
        "admin login requires the admin role".to_string(),
      ));
    }
    self.issue_access(&user, None)
  }

  /// Stage 1 of registration: consume the code, create the account, enroll
  /// a TOTP secret for students.
  pub async fn register_stage1(
    &self,
    username: &str,
    password: &str,
    role: UserRole,
    registration_code: &str,
  ) -> Result<RegisterStage1, CoreError> {
    if role.is_admin() {
      return Err(CoreError::Unauthorized(
        "admin accounts are provisioned out of band".to_string(),
      ));
    }
    if self.store.find_by_username(username).await?.is_some() {
      return Err(CoreError::UsernameTaken(username.to_string()));
    }

    let code = self.store.consume_registration_code(registration_code).await?;
    if code.target_role != role {
      return Err(CoreError::CodeInvalid(
        "registration code was issued for a different role".to_string(),
      ));
    }

    let totp_secret = match role {
      UserRole::Student => Some(self.totp.generate_secret()),
      _ => None,
    };

    let user = self
      .store
      .create(&CreateUser {
        username: username.to_string(),
        password: password.to_string(),
        role,
        totp_secret: totp_secret.clone(),
        tags: code.assigned_tags.clone(),
      })
      .await?;

    let totp_uri = match &totp_secret {
      Some(secret) => Some(self.totp.setup_uri(secret, username)?),
      None => None,
    };

    let (raw, record) = self.issue_refresh(user.id).await?;
    Ok(RegisterStage1 {
      refresh_token: raw,
      expires_at: record.expires_at,
      totp_secret,
      totp_uri,
    })
  }

  /// Rotate a validated refresh token and mint a new access token.
  pub async fn rotate_refresh(
    &self,
    record: &RefreshToken,
  ) -> Result<(String, DateTime<Utc>), CoreError> {
    let new_raw = generate_refresh_token();
    let expires_at = Utc::now() + Duration::seconds(self.refresh_ttl_seconds);
    let new_record = self.store.replace(record.id, &new_raw, expires_at).await?;
    Ok((new_raw, new_record.expires_at))
  }

  /// Revoke the refresh token; later exchanges fail with `Revoked`.
  pub async fn logout(&self, raw_token: &str) -> Result<(), CoreError> {
    if let Some(record) = self.store.find_by_token(raw_token).await? {
      self.store.revoke(record.id).await?;
    }
    Ok(())
  }

  /// Stage 1 of TOTP reset: consume the single-use code bound to the
  /// username, rotate in a fresh secret, and invalidate existing sessions.
  pub async fn reset_stage1(
    &self,
    username: &str,
    reset_code: &str,
  ) -> Result<RegisterStage1, CoreError> {
    self.store.consume_reset_code(reset_code, username).await?;

    let user = self
      .store
      .find_by_username(username)
      .await?
      .ok_or_else(|| CoreError::CodeInvalid("reset code target not found".to_string()))?;

    let secret = self.totp.generate_secret();
    self.store.set_totp_secret(user.id, Some(&secret)).await?;
    self.store.revoke_all_for_user(user.id).await?;

    let uri = self.totp.setup_uri(&secret, username)?;
    let (raw, record) = self.issue_refresh(user.id).await?;
    Ok(RegisterStage1 {
      refresh_token: raw,
      expires_at: record.expires_at,
      totp_secret: Some(secret),
      totp_uri: Some(uri),
    })
  }

  /// Admin-side issuance of a registration code.
  pub async fn create_registration_code(
    &self,
    target_role: UserRole,
    max_uses: i32,
    assigned_tags: Vec<String>,
    ttl_seconds: i64,
  ) -> Result<coursel_core::RegistrationCode, CoreError> {
    if max_uses <= 0 {
      return Err(CoreError::Validation("max_uses must be positive".to_string()));
    }
    let now = Utc::now();
    let code = coursel_core::RegistrationCode {
      code: generate_code(),
      target_role,
      max_uses,
      used_count: 0,
      assigned_tags,
      expires_at: now + Duration::seconds(ttl_seconds),
      created_at: now,
    };
    self.store.create_registration_code(&code).await?;
    Ok(code)
  }

  /// Admin-side issuance of a TOTP reset code for one user.
  pub async fn create_reset_code(
    &self,
    username: &str,
    ttl_seconds: i64,
  ) -> Result<coursel_core::ResetCode, CoreError> {
    if self.store.find_by_username(username).await?.is_none() {
      return Err(CoreError::NotFound(format!("user {username}")));
    }
    let now = Utc::now();
    let code = coursel_core::ResetCode {
      code: generate_code(),
      username: username.to_string(),
      used: false,
      expires_at: now + Duration::seconds(ttl_seconds),
      created_at: now,
    };
    self.store.create_reset_code(&code).await?;
    Ok(code)
  }

  pub async fn find_user(&self, id: UserId) -> Result<Option<User>, CoreError> {
    self.store.find_by_id(id).await
  }

  async fn issue_refresh(&self, user_id: UserId) -> Result<(String, RefreshToken), CoreError> {
    let raw = generate_refresh_token();
    let expires_at = Utc::now() + Duration::seconds(self.refresh_ttl_seconds);
    let record = self.store.store(user_id, &raw, expires_at).await?;
    Ok((raw, record))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::MemoryStore;
  use anyhow::Result;
  use coursel_core::TokenConfigProvider;

  struct TestTokenConfig;

  impl TokenConfigProvider for TestTokenConfig {
    fn get_access_secret(&self) -> &str {
      "auth-domain-test-secret"
    }
  }

  fn service() -> AuthService {
    let store = Arc::new(MemoryStore::new());
    let token_manager = TokenManager::from_config(&TestTokenConfig).expect("token manager");
    AuthService::new(store, token_manager, TotpManager::new("coursel"), 7 * 24 * 3600)
  }

  async fn issue_student_code(auth: &AuthService) -> String {
    auth
      .create_registration_code(UserRole::Student, 10, vec!["cs".into()], 3600)
      .await
      .expect("code")
      .code
  }

  #[tokio::test]
  async fn register_then_login_two_stage() -> Result<()> {
    let auth = service();
    let code = issue_student_code(&auth).await;

    let reg = auth
      .register_stage1("alice", "hunter4332", UserRole::Student, &code)
      .await?;
    let secret = reg.totp_secret.clone().expect("student gets a secret");
    assert!(reg.totp_uri.as_deref().unwrap_or("").starts_with("otpauth://"));

    // Stage 2 of registration with the authenticator's current code
    let (_, user) = auth.validate_refresh(&reg.refresh_token).await?;
    let totp_code = auth.totp().current_code(&secret)?;
    let grant = auth.issue_access(&user, Some(&totp_code))?;
    assert!(!grant.access_token.is_empty());

    // Fresh login, both stages
    let stage1 = auth.login_stage1("alice", "hunter4332").await?;
    assert!(stage1.requires_2fa);
    let (_, user) = auth.validate_refresh(&stage1.refresh_token).await?;
    let totp_code = auth.totp().current_code(&secret)?;
    auth.issue_access(&user, Some(&totp_code))?;
    Ok(())
  }

  #[tokio::test]
  async fn wrong_password_is_bad_credentials() -> Result<()> {
    let auth = service();
    let code = issue_student_code(&auth).await;
    auth
      .register_stage1("alice", "hunter4332", UserRole::Student, &code)
      .await?;

    match auth.login_stage1("alice", "wrong").await {
      Err(CoreError::BadCredentials) => {}
      other => panic!("expected BadCredentials, got {other:?}"),
    }
    match auth.login_stage1("nobody", "hunter4332").await {
      Err(CoreError::BadCredentials) => {}
      other => panic!("expected BadCredentials, got {other:?}"),
    }
    Ok(())
  }

  #[tokio::test]
  async fn student_stage2_rejects_bad_totp() -> Result<()> {
    let auth = service();
    let code = issue_student_code(&auth).await;
    let reg = auth
      .register_stage1("alice", "hunter4332", UserRole::Student, &code)
      .await?;
    let secret = reg.totp_secret.expect("secret");

    let (_, user) = auth.validate_refresh(&reg.refresh_token).await?;
    let valid = auth.totp().current_code(&secret)?;
    let wrong = if valid == "000000" { "111111" } else { "000000" };
    match auth.issue_access(&user, Some(wrong)) {
      Err(CoreError::BadTotp) => {}
      other => panic!("expected BadTotp, got {other:?}"),
    }
    match auth.issue_access(&user, None) {
      Err(CoreError::BadTotp) => {}
      other => panic!("expected BadTotp, got {other:?}"),
    }
    Ok(())
  }

  #[tokio::test]
  async fn logout_revokes_the_refresh_token() -> Result<()> {
    let auth = service();
    let code = issue_student_code(&auth).await;
    let reg = auth
      .register_stage1("alice", "hunter4332", UserRole::Student, &code)
      .await?;

    auth.logout(&reg.refresh_token).await?;
    match auth.validate_refresh(&reg.refresh_token).await {
      Err(CoreError::InvalidToken(TokenValidationError::Revoked)) => {}
      other => panic!("expected Revoked, got {other:?}"),
    }
    Ok(())
  }

  #[tokio::test]
  async fn registration_code_role_must_match() -> Result<()> {
    let auth = service();
    let code = issue_student_code(&auth).await;

    match auth
      .register_stage1("ted", "hunter4332", UserRole::Teacher, &code)
      .await
    {
      Err(CoreError::CodeInvalid(_)) => {}
      other => panic!("expected CodeInvalid, got {other:?}"),
    }
    Ok(())
  }

  #[tokio::test]
  async fn teacher_without_totp_skips_2fa() -> Result<()> {
    let auth = service();
    let code = auth
      .create_registration_code(UserRole::Teacher, 1, vec![], 3600)
      .await?
      .code;

    let reg = auth
      .register_stage1("ted", "hunter4332", UserRole::Teacher, &code)
      .await?;
    assert!(reg.totp_secret.is_none());

    let stage1 = auth.login_stage1("ted", "hunter4332").await?;
    assert!(!stage1.requires_2fa);
    let (_, user) = auth.validate_refresh(&stage1.refresh_token).await?;
    auth.issue_access(&user, None)?;
    Ok(())
  }

  #[tokio::test]
  async fn reset_code_reopens_totp_setup_and_revokes_sessions() -> Result<()> {
    let auth = service();
    let code = issue_student_code(&auth).await;
    let reg = auth
      .register_stage1("alice", "hunter4332", UserRole::Student, &code)
      .await?;
    let old_secret = reg.totp_secret.expect("secret");

    let reset = auth.create_reset_code("alice", 3600).await?;
    let stage1 = auth.reset_stage1("alice", &reset.code).await?;
    let new_secret = stage1.totp_secret.expect("new secret");
    assert_ne!(old_secret, new_secret);

    // The pre-reset refresh token is gone
    match auth.validate_refresh(&reg.refresh_token).await {
      Err(CoreError::InvalidToken(TokenValidationError::Revoked)) => {}
      other => panic!("expected Revoked, got {other:?}"),
    }

    // Reset codes are single-use
    match auth.reset_stage1("alice", &reset.code).await {
      Err(CoreError::CodeInvalid(_)) => {}
      other => panic!("expected CodeInvalid, got {other:?}"),
    }

    // Stage 2 against the new secret
    let (_, user) = auth.validate_refresh(&stage1.refresh_token).await?;
    let totp_code = auth.totp().current_code(&new_secret)?;
    auth.issue_access(&user, Some(&totp_code))?;
    Ok(())
  }

  #[tokio::test]
  async fn refresh_rotation_invalidates_the_old_token() -> Result<()> {
    let auth = service();
    let code = auth
      .create_registration_code(UserRole::Teacher, 1, vec![], 3600)
      .await?
      .code;
    let reg = auth
      .register_stage1("ted", "hunter4332", UserRole::Teacher, &code)
      .await?;

    let (record, _) = auth.validate_refresh(&reg.refresh_token).await?;
    let (new_raw, _) = auth.rotate_refresh(&record).await?;

    match auth.validate_refresh(&reg.refresh_token).await {
      Err(CoreError::InvalidToken(TokenValidationError::Revoked)) => {}
      other => panic!("expected Revoked, got {other:?}"),
    }
    auth.validate_refresh(&new_raw).await?;
    Ok(())
  }
}
