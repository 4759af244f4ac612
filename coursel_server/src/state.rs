use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use coursel_core::middlewares::TokenVerifier;
use coursel_core::models::{AccessClaims, TokenManager, TotpManager};
use coursel_core::contracts::Storage;

use crate::config::{AppConfig, InternalAuth};
use crate::domains::auth::AuthService;
use crate::error::AppError;
use crate::services::{Dispatcher, RateLimiter};
use crate::storage;

#[derive(Clone)]
pub struct AppState {
  inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
  pub config: AppConfig,
  pub internal: InternalAuth,
  pub token_manager: TokenManager,
  pub store: Arc<dyn Storage>,
  pub auth: AuthService,
  pub limiter: Arc<RateLimiter>,
  pub dispatcher: Dispatcher,
}

impl Deref for AppState {
  type Target = AppStateInner;

  fn deref(&self) -> &Self::Target {
    &self.inner
  }
}

impl AppState {
  pub async fn try_new(config: AppConfig, internal: InternalAuth) -> Result<Self> {
    config.validate()?;

    let (store, courses) = storage::connect(&config.server.db_url).await?;
    let token_manager = TokenManager::from_config(&config.auth)
      .map_err(|e| anyhow::anyhow!("token manager init failed: {e}"))?;
    let totp = TotpManager::new(config.auth.totp_issuer.clone());
    let auth = AuthService::new(
      store.clone(),
      token_manager.clone(),
      totp,
      config.auth.refresh_ttl_seconds,
    );
    let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
    let dispatcher = Dispatcher::start(courses, config.dispatcher.clone());

    // Idle rate buckets are evicted in the background.
    {
      let limiter = limiter.clone();
      let every = Duration::from_secs(config.rate_limit.idle_seconds.max(60));
      tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        loop {
          tick.tick().await;
          limiter.sweep_idle();
        }
      });
    }

    Ok(Self {
      inner: Arc::new(AppStateInner {
        config,
        internal,
        token_manager,
        store,
        auth,
        limiter,
        dispatcher,
      }),
    })
  }
}

impl TokenVerifier for AppState {
  type Claims = AccessClaims;
  type Error = AppError;

  fn verify_token(&self, token: &str) -> Result<AccessClaims, AppError> {
    self
      .token_manager
      .verify_token(token)
      .map_err(AppError::from)
  }
}
