use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::models::{CourseId, UserId};

#[derive(
  Debug, Serialize, Deserialize, sqlx::Type, ToSchema, Clone, Copy, PartialEq, Eq,
)]
#[sqlx(type_name = "course_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CourseType {
  Required,
  Elective,
}

/// A course as stored in the authoritative catalog.
///
/// `time_begin`/`time_end` encode HHMM of day; the occupied interval is
/// `[time_begin, time_end)`. `schedule` holds weekdays 1..=7 with set
/// semantics. `selected_count` is maintained inside the same transaction as
/// the enrollment rows and never exceeds `capacity`.
#[derive(Debug, Serialize, Deserialize, FromRow, PartialEq, Eq, Clone)]
pub struct Course {
  pub id: CourseId,
  pub name: String,
  pub credit: i32,
  pub course_type: CourseType,
  pub teacher_id: Option<UserId>,
  pub time_begin: i32,
  pub time_end: i32,
  pub schedule: Vec<i16>,
  pub location: String,
  pub capacity: i32,
  pub selected_count: i32,
  pub tags: Vec<String>,
}

/// One (student, course) relation. The unique index over the pair is what
/// backs select idempotence.
#[derive(Debug, Serialize, Deserialize, FromRow, PartialEq, Eq, Clone)]
pub struct Enrollment {
  pub user_id: UserId,
  pub course_id: CourseId,
  pub enrolled_at: DateTime<Utc>,
}

impl Course {
  pub fn is_full(&self) -> bool {
    self.selected_count >= self.capacity
  }

  /// Tag restriction: an empty course tag set admits everyone; a non-empty
  /// one requires at least one shared tag.
  pub fn admits_tags(&self, student_tags: &[String]) -> bool {
    self.tags.is_empty() || self.tags.iter().any(|t| student_tags.contains(t))
  }

  /// Two courses collide when they share a weekday and their half-open
  /// time intervals overlap.
  pub fn conflicts_with(&self, other: &Course) -> bool {
    shares_weekday(&self.schedule, &other.schedule)
      && intervals_overlap(
        self.time_begin,
        self.time_end,
        other.time_begin,
        other.time_end,
      )
  }
}

pub fn shares_weekday(a: &[i16], b: &[i16]) -> bool {
  a.iter().any(|day| b.contains(day))
}

pub fn intervals_overlap(begin_a: i32, end_a: i32, begin_b: i32, end_b: i32) -> bool {
  begin_a < end_b && begin_b < end_a
}

#[cfg(test)]
mod tests {
  use super::*;

  fn course(id: i64, schedule: Vec<i16>, time_begin: i32, time_end: i32) -> Course {
    Course {
      id: CourseId(id),
      name: format!("course-{id}"),
      credit: 2,
      course_type: CourseType::Elective,
      teacher_id: None,
      time_begin,
      time_end,
      schedule,
      location: "A-101".into(),
      capacity: 30,
      selected_count: 0,
      tags: vec![],
    }
  }

  #[test]
  fn overlap_requires_shared_weekday_and_time() {
    // Mon/Wed 10:00-11:30 vs Mon/Fri 11:00-12:00 overlap on Monday
    let x = course(1, vec![1, 3], 1000, 1130);
    let y = course(2, vec![1, 5], 1100, 1200);
    assert!(x.conflicts_with(&y));

    // Same times, disjoint weekdays
    let z = course(3, vec![2, 4], 1000, 1130);
    assert!(!x.conflicts_with(&z));

    // Shared weekday, back-to-back slots do not overlap
    let w = course(4, vec![1], 1130, 1300);
    assert!(!x.conflicts_with(&w));
  }

  #[test]
  fn tag_restriction_admits_on_intersection() {
    let mut c = course(1, vec![1], 800, 930);
    assert!(c.admits_tags(&[]));

    c.tags = vec!["cs".into(), "math".into()];
    assert!(!c.admits_tags(&[]));
    assert!(!c.admits_tags(&["bio".into()]));
    assert!(c.admits_tags(&["math".into()]));
  }

  #[test]
  fn capacity_check() {
    let mut c = course(1, vec![1], 800, 930);
    c.capacity = 1;
    assert!(!c.is_full());
    c.selected_count = 1;
    assert!(c.is_full());
  }
}
