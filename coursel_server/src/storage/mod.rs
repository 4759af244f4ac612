//! Storage backends behind the core repository contracts.
//!
//! `memory` is a single-process relational map used by tests and dev
//! deployments; `postgres` is the production backend. Both give `apply_select`
//! and `apply_deselect` one-transaction semantics, which together with the
//! dispatcher's per-course lock keeps `selected_count` consistent with the
//! enrollment rows.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use anyhow::Result;
use coursel_core::contracts::{CourseRepository, Storage};
use std::sync::Arc;

/// Pick the backend from the configured `db_url`. Returns the full storage
/// surface plus the course-repository view the dispatcher holds.
pub async fn connect(db_url: &str) -> Result<(Arc<dyn Storage>, Arc<dyn CourseRepository>)> {
  if db_url == "memory" {
    let store = Arc::new(MemoryStore::new());
    Ok((store.clone(), store))
  } else {
    let store = Arc::new(PgStore::connect(db_url).await?);
    Ok((store.clone(), store))
  }
}
