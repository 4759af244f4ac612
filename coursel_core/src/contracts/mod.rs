//! Async repository contracts the storage backends implement.
//!
//! The dispatcher and the auth gateway only ever talk to these traits; the
//! concrete backend (in-memory or Postgres) is picked at startup.

mod repositories;

pub use repositories::{CodeRepository, CourseRepository, RefreshTokenRepository, Storage};
pub use crate::models::user::UserRepository;
