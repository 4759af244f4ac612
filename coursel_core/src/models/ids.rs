//! Newtype wrappers for the ID types in the system
//!
//! These types provide type safety and prevent mixing up different kinds of IDs

use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

/// User ID newtype
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Type, ToSchema,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// Course ID newtype
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Type, ToSchema,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct CourseId(pub i64);

/// Opaque task handle returned by the admission funnel
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Type, ToSchema,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
  pub fn new() -> Self {
    TaskId(Uuid::new_v4())
  }
}

impl Default for TaskId {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for UserId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl fmt::Display for CourseId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl fmt::Display for TaskId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<i64> for UserId {
  fn from(id: i64) -> Self {
    UserId(id)
  }
}

impl From<i64> for CourseId {
  fn from(id: i64) -> Self {
    CourseId(id)
  }
}

impl From<UserId> for i64 {
  fn from(id: UserId) -> Self {
    id.0
  }
}

impl From<CourseId> for i64 {
  fn from(id: CourseId) -> Self {
    id.0
  }
}
