mod bearer_auth;

pub use bearer_auth::verify_token_middleware;

/// Anything that can validate an access token and hand back claims. The
/// server's `AppState` implements this by delegating to its `TokenManager`.
pub trait TokenVerifier {
  type Claims;
  type Error: std::fmt::Debug;

  fn verify_token(&self, token: &str) -> Result<Self::Claims, Self::Error>;
}
