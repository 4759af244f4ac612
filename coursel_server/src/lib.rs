pub mod config;
pub mod domains;
pub mod error;
pub mod handlers;
pub mod services;
pub mod state;
pub mod storage;

pub use config::AppConfig;
pub use error::{AppError, ErrorOutput};
pub use state::AppState;

use axum::{
  Router,
  middleware::from_fn_with_state,
  routing::{get, post},
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use coursel_core::verify_token_middleware;

use handlers::{admin, auth, health, selection};

#[derive(OpenApi)]
#[openapi(
  paths(
    handlers::auth::login_v1_handler,
    handlers::auth::exchange_handler,
    handlers::auth::admin_login_handler,
    handlers::auth::register_v1_handler,
    handlers::auth::me_handler,
    handlers::selection::select_handler,
    handlers::selection::deselect_handler,
    handlers::selection::task_status_handler,
    handlers::selection::queue_stats_handler,
    handlers::admin::create_registration_code_handler,
  ),
  components(schemas(ErrorOutput)),
  tags(
    (name = "auth", description = "Two-stage authentication"),
    (name = "admission", description = "Selection admission funnel"),
    (name = "admin", description = "Admin tooling"),
  )
)]
pub struct ApiDoc;

/// Assemble the full router: public auth surface, bearer-protected admission
/// surface, and the internal-token surface.
pub async fn get_router(state: AppState) -> Result<Router, AppError> {
  let protected = Router::new()
    .route("/select", post(selection::select_handler))
    .route("/deselect", post(selection::deselect_handler))
    .route("/task/{task_id}", get(selection::task_status_handler))
    .route("/task/{task_id}/cancel", post(selection::cancel_task_handler))
    .route("/queue/stats", get(selection::queue_stats_handler))
    .route("/me", get(auth::me_handler))
    .route(
      "/admin/registration-code",
      post(admin::create_registration_code_handler),
    )
    .route("/admin/reset-code", post(admin::create_reset_code_handler))
    .layer(from_fn_with_state(
      state.clone(),
      verify_token_middleware::<AppState>,
    ));

  let public = Router::new()
    .route("/login/v1", post(auth::login_v1_handler))
    .route("/login/v2", post(auth::exchange_handler))
    .route("/login/admin", post(auth::admin_login_handler))
    .route("/register/v1", post(auth::register_v1_handler))
    .route("/register/v2", post(auth::exchange_handler))
    .route("/reset/v1", post(auth::reset_v1_handler))
    .route("/reset/v2", post(auth::exchange_handler))
    .route("/refresh", post(auth::refresh_handler))
    .route("/logout", post(auth::logout_handler))
    .route("/internal/course/mutate", post(admin::internal_mutate_handler))
    .route("/health", get(health::health_handler));

  let app = Router::new()
    .merge(public)
    .merge(protected)
    .layer(TraceLayer::new_for_http())
    .with_state(state);

  Ok(app)
}
