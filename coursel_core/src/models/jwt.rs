use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{CoreError, TokenValidationError};
use crate::middlewares::TokenVerifier as MwTokenVerifier;
use crate::models::user::{AuthUser, UserRole};
use crate::models::UserId;

const JWT_ISSUER: &str = "coursel-server";
const JWT_AUDIENCE: &str = "coursel-api";
const JWT_LEEWAY: u64 = 60;
pub const ACCESS_TOKEN_EXPIRATION: i64 = 30 * 60; // 30 minutes
pub const REFRESH_TOKEN_EXPIRATION: i64 = 7 * 24 * 60 * 60; // 7 days

/// Access tokens are signed with a process-global symmetric secret.
pub trait TokenConfigProvider {
  fn get_access_secret(&self) -> &str;
  fn get_access_ttl_seconds(&self) -> i64 {
    ACCESS_TOKEN_EXPIRATION
  }
  fn get_jwt_leeway(&self) -> u64 {
    JWT_LEEWAY
  }
  fn get_jwt_audience(&self) -> Option<&str> {
    Some(JWT_AUDIENCE)
  }
  fn get_jwt_issuer(&self) -> Option<&str> {
    Some(JWT_ISSUER)
  }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
  sub: String, // User ID
  exp: i64,    // Expiration time (as UTC timestamp)
  iat: i64,    // Issued at (as UTC timestamp)
  aud: String, // Audience
  iss: String, // Issuer
  role: UserRole,
}

/// The verified payload every protected endpoint works with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccessClaims {
  pub user_id: UserId,
  pub role: UserRole,
}

impl From<AccessClaims> for AuthUser {
  fn from(claims: AccessClaims) -> Self {
    AuthUser {
      id: claims.user_id,
      role: claims.role,
    }
  }
}

/// Refresh-token record as persisted. Only the sha256 digest of the opaque
/// token is stored.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RefreshToken {
  pub id: i64,
  pub user_id: UserId,
  pub token_hash: String,
  pub issued_at: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
  pub revoked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenData {
  pub token: String,
  pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenManager {
  encoding_key: EncodingKey,
  decoding_key: DecodingKey,
  validation: Validation,
  access_ttl_seconds: i64,
}

impl TokenManager {
  pub fn from_config<C: TokenConfigProvider>(config: &C) -> Result<Self, CoreError> {
    let secret = config.get_access_secret();
    if secret.is_empty() {
      return Err(CoreError::Validation(
        "access token secret must not be empty".to_string(),
      ));
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = config.get_jwt_leeway();
    validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
    validation.validate_aud = true;
    if let Some(aud) = config.get_jwt_audience() {
      validation.set_audience(&[aud]);
    }
    if let Some(iss) = config.get_jwt_issuer() {
      validation.set_issuer(&[iss]);
    }

    Ok(Self {
      encoding_key: EncodingKey::from_secret(secret.as_bytes()),
      decoding_key: DecodingKey::from_secret(secret.as_bytes()),
      validation,
      access_ttl_seconds: config.get_access_ttl_seconds(),
    })
  }

  pub fn access_ttl_seconds(&self) -> i64 {
    self.access_ttl_seconds
  }

  pub fn generate_token(&self, user_id: UserId, role: UserRole) -> Result<String, CoreError> {
    let now = Utc::now().timestamp();
    let claims = Claims {
      sub: user_id.to_string(),
      exp: now + self.access_ttl_seconds,
      iat: now,
      aud: JWT_AUDIENCE.to_string(),
      iss: JWT_ISSUER.to_string(),
      role,
    };
    let header = Header::new(Algorithm::HS256);
    encode(&header, &claims, &self.encoding_key).map_err(CoreError::from)
  }

  pub fn verify_token(&self, token: &str) -> Result<AccessClaims, CoreError> {
    let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
    let user_id = token_data
      .claims
      .sub
      .parse::<i64>()
      .map_err(|_| CoreError::InvalidToken(TokenValidationError::Malformed))?;

    Ok(AccessClaims {
      user_id: UserId(user_id),
      role: token_data.claims.role,
    })
  }
}

impl MwTokenVerifier for TokenManager {
  type Error = CoreError;
  type Claims = AccessClaims;

  fn verify_token(&self, token: &str) -> Result<Self::Claims, Self::Error> {
    TokenManager::verify_token(self, token)
  }
}

/// Opaque refresh-token material; only its sha256 digest hits the store.
pub fn generate_refresh_token() -> String {
  use rand::Rng;

  let bytes: [u8; 32] = rand::thread_rng().gen();
  hex::encode(bytes)
}

pub fn sha256_hash(token: &str) -> String {
  use sha2::{Digest, Sha256};

  let mut hasher = Sha256::new();
  hasher.update(token.as_bytes());
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;
  use anyhow::Result;

  struct TestConfig {
    secret: String,
    ttl: i64,
    leeway: u64,
  }

  impl TokenConfigProvider for TestConfig {
    fn get_access_secret(&self) -> &str {
      &self.secret
    }
    fn get_access_ttl_seconds(&self) -> i64 {
      self.ttl
    }
    fn get_jwt_leeway(&self) -> u64 {
      self.leeway
    }
  }

  fn manager(ttl: i64, leeway: u64) -> TokenManager {
    TokenManager::from_config(&TestConfig {
      secret: "a-test-secret-that-is-long-enough".into(),
      ttl,
      leeway,
    })
    .expect("token manager")
  }

  #[test]
  fn token_round_trip_preserves_identity() -> Result<()> {
    let tm = manager(1800, 60);
    let token = tm.generate_token(UserId(42), UserRole::Student)?;
    let claims = tm.verify_token(&token)?;
    assert_eq!(claims.user_id, UserId(42));
    assert_eq!(claims.role, UserRole::Student);
    Ok(())
  }

  #[test]
  fn expired_token_is_rejected() -> Result<()> {
    let tm = manager(-120, 0);
    let token = tm.generate_token(UserId(7), UserRole::Teacher)?;
    match tm.verify_token(&token) {
      Err(CoreError::InvalidToken(TokenValidationError::Expired)) => Ok(()),
      other => panic!("expected expired token error, got {other:?}"),
    }
  }

  #[test]
  fn tampered_token_is_rejected() -> Result<()> {
    let tm = manager(1800, 60);
    let token = tm.generate_token(UserId(7), UserRole::Student)?;
    let mut forged = token.clone();
    forged.pop();
    forged.push(if token.ends_with('A') { 'B' } else { 'A' });
    assert!(tm.verify_token(&forged).is_err());
    Ok(())
  }

  #[test]
  fn token_from_other_secret_is_rejected() -> Result<()> {
    let tm = manager(1800, 60);
    let other = TokenManager::from_config(&TestConfig {
      secret: "a-different-secret-entirely".into(),
      ttl: 1800,
      leeway: 60,
    })?;
    let token = other.generate_token(UserId(7), UserRole::Admin)?;
    assert!(tm.verify_token(&token).is_err());
    Ok(())
  }

  #[test]
  fn refresh_token_hash_is_stable() {
    let raw = generate_refresh_token();
    assert_eq!(raw.len(), 64);
    assert_eq!(sha256_hash(&raw), sha256_hash(&raw));
    assert_ne!(sha256_hash(&raw), sha256_hash("other"));
  }
}
