use axum::{
  Json,
  body::Body,
  extract::{FromRequestParts, Request, State},
  http::StatusCode,
  middleware::Next,
  response::{IntoResponse, Response},
};

use axum_extra::{
  TypedHeader,
  headers::{Authorization, authorization::Bearer},
};
use tracing::warn;

use crate::middlewares::TokenVerifier;
use crate::models::user::AuthUser;

/// Generic `T` is any application state that implements
/// [`TokenVerifier`]. The function is intended to be wrapped via
/// `axum::middleware::from_fn_with_state` and matches the signature expected
/// by that helper. On success an [`AuthUser`] is inserted into request
/// extensions.
pub async fn verify_token_middleware<T>(
  State(state): State<T>,
  req: Request<Body>,
  next: Next,
) -> Response
where
  T: TokenVerifier + Clone + Send + Sync + 'static,
  AuthUser: From<T::Claims>,
  T::Error: IntoResponse,
{
  let (mut parts, body) = req.into_parts();
  let token =
    match TypedHeader::<Authorization<Bearer>>::from_request_parts(&mut parts, &state).await {
      Ok(bearer) => bearer.token().to_string(),
      Err(e) => {
        warn!("parse Bearer token failed: {}", e);
        return (
          StatusCode::UNAUTHORIZED,
          Json(serde_json::json!({
            "error_kind": "TokenInvalid",
            "message": "missing or malformed bearer token",
          })),
        )
          .into_response();
      }
    };

  match state.verify_token(&token) {
    Ok(claims) => {
      let user = AuthUser::from(claims);
      let mut req = Request::from_parts(parts, body);
      req.extensions_mut().insert(user);
      next.run(req).await
    }
    Err(e) => e.into_response(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::jwt::{AccessClaims, TokenConfigProvider, TokenManager};
  use crate::models::user::UserRole;
  use crate::models::UserId;

  use anyhow::Result;
  use axum::{Extension, Router, middleware::from_fn_with_state, routing::get};
  use std::sync::Arc;
  use tower::ServiceExt;

  struct TestConfig;

  impl TokenConfigProvider for TestConfig {
    fn get_access_secret(&self) -> &str {
      "middleware-test-secret-material"
    }
  }

  #[derive(Clone)]
  struct AppState {
    inner: Arc<TokenManager>,
  }

  impl TokenVerifier for AppState {
    type Claims = AccessClaims;
    type Error = (StatusCode, String);

    fn verify_token(&self, token: &str) -> Result<AccessClaims, Self::Error> {
      self
        .inner
        .verify_token(token)
        .map_err(|e| (StatusCode::UNAUTHORIZED, format!("{e}")))
    }
  }

  async fn whoami(Extension(user): Extension<AuthUser>) -> String {
    format!("{}:{:?}", user.id, user.role)
  }

  fn router(state: AppState) -> Router {
    Router::new()
      .route("/whoami", get(whoami))
      .layer(from_fn_with_state(state.clone(), verify_token_middleware::<AppState>))
  }

  #[tokio::test]
  async fn valid_token_passes_and_injects_auth_user() -> Result<()> {
    let tm = TokenManager::from_config(&TestConfig)?;
    let token = tm.generate_token(UserId(5), UserRole::Student)?;
    let app = router(AppState {
      inner: Arc::new(tm),
    });

    let resp = app
      .oneshot(
        Request::builder()
          .uri("/whoami")
          .header("Authorization", format!("Bearer {token}"))
          .body(Body::empty())?,
      )
      .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    Ok(())
  }

  #[tokio::test]
  async fn missing_header_is_unauthorized() -> Result<()> {
    let tm = TokenManager::from_config(&TestConfig)?;
    let app = router(AppState {
      inner: Arc::new(tm),
    });

    let resp = app
      .oneshot(Request::builder().uri("/whoami").body(Body::empty())?)
      .await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    Ok(())
  }

  #[tokio::test]
  async fn garbage_token_is_unauthorized() -> Result<()> {
    let tm = TokenManager::from_config(&TestConfig)?;
    let app = router(AppState {
      inner: Arc::new(tm),
    });

    let resp = app
      .oneshot(
        Request::builder()
          .uri("/whoami")
          .header("Authorization", "Bearer not-a-jwt")
          .body(Body::empty())?,
      )
      .await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    Ok(())
  }
}
