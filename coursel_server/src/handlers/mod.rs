pub mod admin;
pub mod auth;
pub mod health;
pub mod selection;

use axum::http::HeaderMap;

use crate::error::AppError;
use crate::services::Scope;
use crate::state::AppState;

/// Rate-limit key for the client: first entry of `X-Forwarded-For` when a
/// proxy set it, else the direct-peer bucket.
pub(crate) fn client_ip(headers: &HeaderMap) -> String {
  if let Some(forwarded) = headers
    .get("x-forwarded-for")
    .and_then(|value| value.to_str().ok())
  {
    if let Some(first) = forwarded.split(',').next() {
      let first = first.trim();
      if !first.is_empty() {
        return first.to_string();
      }
    }
  }
  if let Some(real_ip) = headers
    .get("x-real-ip")
    .and_then(|value| value.to_str().ok())
  {
    return real_ip.trim().to_string();
  }
  "direct".to_string()
}

/// The funnel's two-bucket admission check: client IP first, then the
/// authenticated user.
pub(crate) fn check_ip_limit(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
  state
    .limiter
    .check(Scope::Ip, &client_ip(headers))
    .map_err(|retry| AppError::RateLimited {
      retry_after_secs: retry.secs,
    })
}

pub(crate) fn check_user_limit(state: &AppState, user_id: i64) -> Result<(), AppError> {
  state
    .limiter
    .check(Scope::User, &user_id.to_string())
    .map_err(|retry| AppError::RateLimited {
      retry_after_secs: retry.secs,
    })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn forwarded_header_wins_and_takes_first_entry() {
    let mut headers = HeaderMap::new();
    headers.insert("x-forwarded-for", "10.0.0.1, 172.16.0.9".parse().unwrap());
    headers.insert("x-real-ip", "192.168.1.1".parse().unwrap());
    assert_eq!(client_ip(&headers), "10.0.0.1");
  }

  #[test]
  fn real_ip_is_the_fallback() {
    let mut headers = HeaderMap::new();
    headers.insert("x-real-ip", "192.168.1.1".parse().unwrap());
    assert_eq!(client_ip(&headers), "192.168.1.1");
  }

  #[test]
  fn unproxied_requests_share_the_direct_bucket() {
    assert_eq!(client_ip(&HeaderMap::new()), "direct");
  }
}
