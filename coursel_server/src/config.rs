//! Application configuration.
//!
//! Tunables come from a YAML file (`COURSEL_CONFIG` path override, then a
//! short search list) with per-knob environment overrides. Secrets are
//! accepted from the environment only; startup fails without them.

use anyhow::{Context, Result, bail};
use coursel_core::TokenConfigProvider;
use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf};

/// Main application configuration - loaded from YAML
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub auth: AuthConfig,
  #[serde(default)]
  pub rate_limit: RateLimitConfig,
  #[serde(default)]
  pub dispatcher: DispatcherConfig,
  #[serde(default)]
  pub observability: ObservabilityConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
  pub port: u16,
  /// Postgres URL, or the literal `memory` for the in-process backend.
  pub db_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
  /// HS256 signing secret for access tokens. Environment-only
  /// (`COURSEL_ACCESS_SECRET`), never read from the config file.
  #[serde(skip)]
  pub access_secret: String,
  pub access_ttl_seconds: i64,
  pub refresh_ttl_seconds: i64,
  pub totp_issuer: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
  pub user_capacity: f64,
  pub user_refill_per_minute: f64,
  pub ip_capacity: f64,
  pub ip_refill_per_minute: f64,
  /// Extra tokens a failed TOTP attempt burns from the user bucket.
  pub totp_failure_penalty: f64,
  /// Idle buckets are evicted after this long.
  pub idle_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DispatcherConfig {
  pub worker_count: usize,
  pub max_queue_depth: usize,
  pub max_task_attempts: u32,
  /// Wall-clock budget for one task attempt, transaction included.
  pub task_deadline_ms: u64,
  pub retry_base_backoff_ms: u64,
  /// Terminal tasks stay pollable this long.
  pub task_ttl_seconds: u64,
  pub shutdown_grace_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ObservabilityConfig {
  pub log_level: String,
}

/// Static shared secret guarding the internal surface. Environment-only.
#[derive(Debug, Clone, Default)]
pub struct InternalAuth {
  pub token: String,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      port: 8080,
      db_url: "memory".to_string(),
    }
  }
}

impl Default for AuthConfig {
  fn default() -> Self {
    Self {
      access_secret: String::new(),
      access_ttl_seconds: coursel_core::ACCESS_TOKEN_EXPIRATION,
      refresh_ttl_seconds: coursel_core::REFRESH_TOKEN_EXPIRATION,
      totp_issuer: "coursel".to_string(),
    }
  }
}

impl Default for RateLimitConfig {
  fn default() -> Self {
    Self {
      user_capacity: 10.0,
      user_refill_per_minute: 10.0,
      ip_capacity: 60.0,
      ip_refill_per_minute: 60.0,
      totp_failure_penalty: 3.0,
      idle_seconds: 600,
    }
  }
}

impl Default for DispatcherConfig {
  fn default() -> Self {
    Self {
      worker_count: 4,
      max_queue_depth: 10_000,
      max_task_attempts: 3,
      task_deadline_ms: 5_000,
      retry_base_backoff_ms: 100,
      task_ttl_seconds: 24 * 60 * 60,
      shutdown_grace_ms: 5_000,
    }
  }
}

impl Default for ObservabilityConfig {
  fn default() -> Self {
    Self {
      log_level: "info,sqlx=warn".to_string(),
    }
  }
}

impl TokenConfigProvider for AuthConfig {
  fn get_access_secret(&self) -> &str {
    &self.access_secret
  }

  fn get_access_ttl_seconds(&self) -> i64 {
    self.access_ttl_seconds
  }
}

impl AppConfig {
  /// Load the YAML file (if any), apply environment overrides, then demand
  /// the secrets. Missing secrets abort startup.
  pub fn load() -> Result<(Self, InternalAuth)> {
    let mut config = match Self::find_config_file() {
      Some(path) => {
        let raw = std::fs::read_to_string(&path)
          .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_yaml::from_str::<AppConfig>(&raw)
          .with_context(|| format!("failed to parse config file {}", path.display()))?
      }
      None => AppConfig::default(),
    };

    config.apply_env_overrides()?;

    config.auth.access_secret = env::var("COURSEL_ACCESS_SECRET").unwrap_or_default();
    let internal = InternalAuth {
      token: env::var("COURSEL_INTERNAL_TOKEN").unwrap_or_default(),
    };

    config.validate()?;
    if internal.token.is_empty() {
      bail!("COURSEL_INTERNAL_TOKEN must be set");
    }

    Ok((config, internal))
  }

  fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = env::var("COURSEL_CONFIG") {
      return Some(PathBuf::from(path));
    }

    for candidate in [
      "coursel.yml",
      "coursel.yaml",
      "/etc/coursel/coursel.yml",
    ] {
      let path = PathBuf::from(candidate);
      if path.exists() {
        return Some(path);
      }
    }
    None
  }

  fn apply_env_overrides(&mut self) -> Result<()> {
    override_parse("COURSEL_PORT", &mut self.server.port)?;
    if let Ok(v) = env::var("COURSEL_DB_URL") {
      self.server.db_url = v;
    }
    override_parse("COURSEL_ACCESS_TTL", &mut self.auth.access_ttl_seconds)?;
    override_parse("COURSEL_REFRESH_TTL", &mut self.auth.refresh_ttl_seconds)?;
    override_parse(
      "COURSEL_USER_RATE_CAPACITY",
      &mut self.rate_limit.user_capacity,
    )?;
    override_parse(
      "COURSEL_USER_RATE_REFILL",
      &mut self.rate_limit.user_refill_per_minute,
    )?;
    override_parse("COURSEL_IP_RATE_CAPACITY", &mut self.rate_limit.ip_capacity)?;
    override_parse(
      "COURSEL_IP_RATE_REFILL",
      &mut self.rate_limit.ip_refill_per_minute,
    )?;
    override_parse("COURSEL_WORKER_COUNT", &mut self.dispatcher.worker_count)?;
    override_parse(
      "COURSEL_MAX_QUEUE_DEPTH",
      &mut self.dispatcher.max_queue_depth,
    )?;
    override_parse(
      "COURSEL_MAX_TASK_ATTEMPTS",
      &mut self.dispatcher.max_task_attempts,
    )?;
    override_parse(
      "COURSEL_TASK_TTL_SECONDS",
      &mut self.dispatcher.task_ttl_seconds,
    )?;
    Ok(())
  }

  pub fn validate(&self) -> Result<()> {
    if self.auth.access_secret.is_empty() {
      bail!("COURSEL_ACCESS_SECRET must be set");
    }
    if self.dispatcher.worker_count == 0 {
      bail!("dispatcher.worker_count must be at least 1");
    }
    if self.dispatcher.max_queue_depth == 0 {
      bail!("dispatcher.max_queue_depth must be at least 1");
    }
    if self.rate_limit.user_capacity <= 0.0 || self.rate_limit.ip_capacity <= 0.0 {
      bail!("rate limit capacities must be positive");
    }
    Ok(())
  }
}

fn override_parse<T: std::str::FromStr>(key: &str, slot: &mut T) -> Result<()>
where
  T::Err: std::fmt::Display,
{
  if let Ok(raw) = env::var(key) {
    *slot = raw
      .parse::<T>()
      .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}"))?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_documented_values() {
    let config = AppConfig::default();
    assert_eq!(config.dispatcher.worker_count, 4);
    assert_eq!(config.dispatcher.max_queue_depth, 10_000);
    assert_eq!(config.dispatcher.max_task_attempts, 3);
    assert_eq!(config.rate_limit.user_capacity, 10.0);
    assert_eq!(config.rate_limit.ip_capacity, 60.0);
    assert_eq!(config.auth.access_ttl_seconds, 30 * 60);
    assert_eq!(config.auth.refresh_ttl_seconds, 7 * 24 * 60 * 60);
  }

  #[test]
  fn validate_rejects_missing_secret() {
    let config = AppConfig::default();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.auth.access_secret = "secret".into();
    assert!(config.validate().is_ok());
  }

  #[test]
  fn partial_yaml_fills_in_defaults() {
    let raw = "server:\n  port: 9100\n  db_url: memory\n";
    let config: AppConfig = serde_yaml::from_str(raw).expect("parse");
    assert_eq!(config.server.port, 9100);
    assert_eq!(config.dispatcher.worker_count, 4);
  }
}
