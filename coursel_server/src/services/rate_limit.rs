//! Token-bucket admission control keyed on (scope, key).
//!
//! The funnel checks the client-IP bucket first, then the authenticated-user
//! bucket. Buckets are process-local, refilled lazily on access, and evicted
//! after an idle window.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
  Ip,
  User,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
  scope: Scope,
  key: String,
}

#[derive(Debug)]
struct Bucket {
  tokens: f64,
  last_refill: Instant,
}

/// Denial carries the suggested wait until the next token is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAfter {
  pub secs: u64,
}

pub struct RateLimiter {
  buckets: DashMap<BucketKey, Bucket>,
  user_capacity: f64,
  user_refill_per_sec: f64,
  ip_capacity: f64,
  ip_refill_per_sec: f64,
  totp_failure_penalty: f64,
  idle: Duration,
}

impl RateLimiter {
  pub fn new(config: &RateLimitConfig) -> Self {
    Self {
      buckets: DashMap::new(),
      user_capacity: config.user_capacity,
      user_refill_per_sec: config.user_refill_per_minute / 60.0,
      ip_capacity: config.ip_capacity,
      ip_refill_per_sec: config.ip_refill_per_minute / 60.0,
      totp_failure_penalty: config.totp_failure_penalty,
      idle: Duration::from_secs(config.idle_seconds),
    }
  }

  /// Admit one request against the bucket, or report how long to wait.
  pub fn check(&self, scope: Scope, key: &str) -> Result<(), RetryAfter> {
    self.check_at(scope, key, 1.0, Instant::now())
  }

  pub fn check_at(
    &self,
    scope: Scope,
    key: &str,
    cost: f64,
    now: Instant,
  ) -> Result<(), RetryAfter> {
    let (capacity, rate) = self.params(scope);
    let mut bucket = self
      .buckets
      .entry(BucketKey {
        scope,
        key: key.to_string(),
      })
      .or_insert_with(|| Bucket {
        tokens: capacity,
        last_refill: now,
      });

    let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
    bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
    bucket.last_refill = now;

    if bucket.tokens >= cost {
      bucket.tokens -= cost;
      Ok(())
    } else {
      let deficit = cost - bucket.tokens;
      let secs = (deficit / rate).ceil().max(1.0) as u64;
      Err(RetryAfter { secs })
    }
  }

  /// Burn extra tokens from a bucket without admitting anything. Failed TOTP
  /// attempts use this so repeated guessing locks the user bucket out.
  pub fn penalize_totp_failure(&self, key: &str) {
    self.penalize_at(Scope::User, key, Instant::now());
  }

  fn penalize_at(&self, scope: Scope, key: &str, now: Instant) {
    let (capacity, _) = self.params(scope);
    let mut bucket = self
      .buckets
      .entry(BucketKey {
        scope,
        key: key.to_string(),
      })
      .or_insert_with(|| Bucket {
        tokens: capacity,
        last_refill: now,
      });
    bucket.tokens = (bucket.tokens - self.totp_failure_penalty).max(0.0);
  }

  /// Drop buckets that have not been touched within the idle window.
  pub fn sweep_idle(&self) {
    self.sweep_idle_at(Instant::now());
  }

  fn sweep_idle_at(&self, now: Instant) {
    let idle = self.idle;
    self
      .buckets
      .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) < idle);
  }

  pub fn bucket_count(&self) -> usize {
    self.buckets.len()
  }

  fn params(&self, scope: Scope) -> (f64, f64) {
    match scope {
      Scope::Ip => (self.ip_capacity, self.ip_refill_per_sec),
      Scope::User => (self.user_capacity, self.user_refill_per_sec),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn limiter(user_capacity: f64, user_refill_per_minute: f64) -> RateLimiter {
    RateLimiter::new(&RateLimitConfig {
      user_capacity,
      user_refill_per_minute,
      ip_capacity: 60.0,
      ip_refill_per_minute: 60.0,
      totp_failure_penalty: 3.0,
      idle_seconds: 600,
    })
  }

  #[test]
  fn admits_up_to_capacity_then_denies() {
    let rl = limiter(3.0, 3.0);
    let now = Instant::now();

    for _ in 0..3 {
      assert!(rl.check_at(Scope::User, "42", 1.0, now).is_ok());
    }
    let denied = rl.check_at(Scope::User, "42", 1.0, now);
    assert!(denied.is_err());
    let retry = denied.unwrap_err();
    assert!(retry.secs >= 1);
  }

  #[test]
  fn refills_over_time() {
    let rl = limiter(2.0, 60.0); // one token per second
    let now = Instant::now();

    assert!(rl.check_at(Scope::User, "42", 1.0, now).is_ok());
    assert!(rl.check_at(Scope::User, "42", 1.0, now).is_ok());
    assert!(rl.check_at(Scope::User, "42", 1.0, now).is_err());

    let later = now + Duration::from_secs(1);
    assert!(rl.check_at(Scope::User, "42", 1.0, later).is_ok());
  }

  #[test]
  fn admitted_requests_bounded_by_capacity_plus_refill() {
    let rl = limiter(5.0, 60.0); // one token per second
    let start = Instant::now();
    let window = 10u64;

    let mut admitted = 0;
    for tick in 0..window * 4 {
      let now = start + Duration::from_millis(tick * 250);
      if rl.check_at(Scope::User, "42", 1.0, now).is_ok() {
        admitted += 1;
      }
    }
    // capacity + refill_rate * window
    assert!(admitted as f64 <= 5.0 + window as f64);
  }

  #[test]
  fn buckets_are_independent_per_key_and_scope() {
    let rl = limiter(1.0, 1.0);
    let now = Instant::now();

    assert!(rl.check_at(Scope::User, "a", 1.0, now).is_ok());
    assert!(rl.check_at(Scope::User, "a", 1.0, now).is_err());
    assert!(rl.check_at(Scope::User, "b", 1.0, now).is_ok());
    assert!(rl.check_at(Scope::Ip, "a", 1.0, now).is_ok());
  }

  #[test]
  fn totp_failures_drain_the_user_bucket() {
    let rl = limiter(10.0, 10.0);
    let now = Instant::now();

    // Three failed attempts: each costs the entry token plus the penalty
    for _ in 0..3 {
      assert!(rl.check_at(Scope::User, "42", 1.0, now).is_ok());
      rl.penalize_at(Scope::User, "42", now);
    }
    assert!(rl.check_at(Scope::User, "42", 1.0, now).is_err());
  }

  #[test]
  fn idle_buckets_are_swept() {
    let rl = limiter(5.0, 5.0);
    let now = Instant::now();

    let _ = rl.check_at(Scope::User, "42", 1.0, now);
    let _ = rl.check_at(Scope::Ip, "10.0.0.1", 1.0, now);
    assert_eq!(rl.bucket_count(), 2);

    rl.sweep_idle_at(now + Duration::from_secs(601));
    assert_eq!(rl.bucket_count(), 0);
  }

  #[test]
  fn retry_after_reflects_refill_rate() {
    let rl = limiter(1.0, 6.0); // one token per 10 seconds
    let now = Instant::now();

    assert!(rl.check_at(Scope::User, "42", 1.0, now).is_ok());
    let retry = rl.check_at(Scope::User, "42", 1.0, now).unwrap_err();
    assert_eq!(retry.secs, 10);
  }
}
