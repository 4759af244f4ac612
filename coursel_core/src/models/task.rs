use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use utoipa::ToSchema;

use crate::error::SelectionError;
use crate::models::{CourseId, TaskId, UserId};

/// Deselection frees seats, so it outranks selection in the queue.
pub const DESELECT_PRIORITY: i32 = 10;
pub const SELECT_PRIORITY: i32 = 0;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
  Select,
  Deselect,
}

impl TaskKind {
  pub fn priority(&self) -> i32 {
    match self {
      TaskKind::Select => SELECT_PRIORITY,
      TaskKind::Deselect => DESELECT_PRIORITY,
    }
  }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
  Pending,
  Running,
  Succeeded,
  Failed,
}

impl TaskStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
  }
}

/// Terminal failure classification, stable across interfaces. Kind names are
/// the wire strings of the error envelope.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
  AlreadyEnrolled,
  NotEnrolled,
  CourseFull,
  TimeConflict,
  TagIneligible,
  TransientExhausted,
  ShuttingDown,
  Cancelled,
}

impl From<SelectionError> for FailureKind {
  fn from(err: SelectionError) -> Self {
    match err {
      SelectionError::AlreadyEnrolled => FailureKind::AlreadyEnrolled,
      SelectionError::NotEnrolled => FailureKind::NotEnrolled,
      SelectionError::CourseFull => FailureKind::CourseFull,
      SelectionError::TimeConflict => FailureKind::TimeConflict,
      SelectionError::TagIneligible => FailureKind::TagIneligible,
    }
  }
}

/// A selection intent admitted by the funnel, processed asynchronously by
/// the dispatcher and polled by its owner.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SelectionTask {
  pub id: TaskId,
  pub user_id: UserId,
  pub course_id: CourseId,
  pub kind: TaskKind,
  pub priority: i32,
  pub status: TaskStatus,
  pub failure_kind: Option<FailureKind>,
  pub submitted_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
  pub attempt_count: u32,
  /// Set when an admin placed this task on the student's behalf through the
  /// internal surface.
  pub impersonated_by: Option<UserId>,
}

impl SelectionTask {
  pub fn new(user_id: UserId, course_id: CourseId, kind: TaskKind) -> Self {
    Self {
      id: TaskId::new(),
      user_id,
      course_id,
      kind,
      priority: kind.priority(),
      status: TaskStatus::Pending,
      failure_kind: None,
      submitted_at: Utc::now(),
      started_at: None,
      completed_at: None,
      attempt_count: 0,
      impersonated_by: None,
    }
  }
}

/// Heap entry for the pending queue. The max-heap pops the greatest entry,
/// so the ordering puts higher priority first, then earlier submission, then
/// the smaller task id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
  pub task_id: TaskId,
  pub course_id: CourseId,
  pub priority: i32,
  pub submitted_at: DateTime<Utc>,
}

impl QueuedTask {
  pub fn from_task(task: &SelectionTask) -> Self {
    Self {
      task_id: task.id,
      course_id: task.course_id,
      priority: task.priority,
      submitted_at: task.submitted_at,
    }
  }
}

impl Ord for QueuedTask {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .priority
      .cmp(&other.priority)
      .then_with(|| other.submitted_at.cmp(&self.submitted_at))
      .then_with(|| other.task_id.cmp(&self.task_id))
  }
}

impl PartialOrd for QueuedTask {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BinaryHeap;
  use uuid::Uuid;

  fn entry(priority: i32, offset_ms: i64, id: u128) -> QueuedTask {
    QueuedTask {
      task_id: TaskId(Uuid::from_u128(id)),
      course_id: CourseId(1),
      priority,
      submitted_at: DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000 + offset_ms)
        .expect("valid timestamp"),
    }
  }

  #[test]
  fn deselect_outranks_select_submitted_at_same_instant() {
    let mut heap = BinaryHeap::new();
    let select = entry(SELECT_PRIORITY, 0, 1);
    let deselect = entry(DESELECT_PRIORITY, 0, 2);
    heap.push(select.clone());
    heap.push(deselect.clone());

    assert_eq!(heap.pop(), Some(deselect));
    assert_eq!(heap.pop(), Some(select));
  }

  #[test]
  fn same_priority_is_fifo() {
    let mut heap = BinaryHeap::new();
    let first = entry(SELECT_PRIORITY, 0, 9);
    let second = entry(SELECT_PRIORITY, 5, 1);
    heap.push(second.clone());
    heap.push(first.clone());

    assert_eq!(heap.pop(), Some(first));
    assert_eq!(heap.pop(), Some(second));
  }

  #[test]
  fn simultaneous_arrivals_break_ties_by_task_id() {
    let mut heap = BinaryHeap::new();
    let low = entry(SELECT_PRIORITY, 0, 1);
    let high = entry(SELECT_PRIORITY, 0, 2);
    heap.push(high.clone());
    heap.push(low.clone());

    assert_eq!(heap.pop(), Some(low));
    assert_eq!(heap.pop(), Some(high));
  }

  #[test]
  fn kind_maps_to_priority() {
    assert_eq!(TaskKind::Deselect.priority(), DESELECT_PRIORITY);
    assert_eq!(TaskKind::Select.priority(), SELECT_PRIORITY);
  }
}
