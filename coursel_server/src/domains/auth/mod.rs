mod auth_domain;

pub use auth_domain::{AccessGrant, AuthService, LoginStage1, RegisterStage1};
