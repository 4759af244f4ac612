//! Bounded priority queue feeding the worker pool.

use std::collections::BinaryHeap;
use std::sync::Mutex;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use coursel_core::error::CoreError;
use coursel_core::models::QueuedTask;

pub struct TaskQueue {
  heap: Mutex<BinaryHeap<QueuedTask>>,
  notify: Notify,
  capacity: usize,
}

impl TaskQueue {
  pub fn new(capacity: usize) -> Self {
    Self {
      heap: Mutex::new(BinaryHeap::new()),
      notify: Notify::new(),
      capacity,
    }
  }

  /// Enqueue a fresh task. Returns the number of tasks that were already
  /// pending, which the funnel reports as the estimated queue position.
  pub fn push(&self, entry: QueuedTask) -> Result<usize, CoreError> {
    let position = {
      let mut heap = self.lock();
      if heap.len() >= self.capacity {
        return Err(CoreError::QueueFull);
      }
      let position = heap.len();
      heap.push(entry);
      position
    };
    self.notify.notify_one();
    Ok(position)
  }

  /// Re-enqueue a retried task. Retries never count against the bound; the
  /// task already holds a slot in the journal.
  pub fn push_retry(&self, entry: QueuedTask) {
    self.lock().push(entry);
    self.notify.notify_one();
  }

  /// Blocking dequeue. Returns `None` once `cancel` fires; workers use that
  /// as their exit signal and stop starting new tasks immediately.
  pub async fn pop(&self, cancel: &CancellationToken) -> Option<QueuedTask> {
    loop {
      if cancel.is_cancelled() {
        return None;
      }
      if let Some(entry) = self.lock().pop() {
        // More work may be waiting; pass the baton to another worker.
        if !self.is_empty() {
          self.notify.notify_one();
        }
        return Some(entry);
      }
      tokio::select! {
        _ = self.notify.notified() => {}
        _ = cancel.cancelled() => return None,
      }
    }
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  /// Drop everything still pending; used by shutdown after the journal has
  /// been marked.
  pub fn drain(&self) -> Vec<QueuedTask> {
    let mut heap = self.lock();
    let mut drained = Vec::with_capacity(heap.len());
    while let Some(entry) = heap.pop() {
      drained.push(entry);
    }
    drained
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, BinaryHeap<QueuedTask>> {
    self.heap.lock().unwrap_or_else(|e| e.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;
  use coursel_core::models::{CourseId, TaskId};

  fn entry(priority: i32) -> QueuedTask {
    QueuedTask {
      task_id: TaskId::new(),
      course_id: CourseId(1),
      priority,
      submitted_at: Utc::now(),
    }
  }

  #[tokio::test]
  async fn pop_returns_highest_priority_first() {
    let queue = TaskQueue::new(16);
    let cancel = CancellationToken::new();

    queue.push(entry(0)).expect("push");
    queue.push(entry(10)).expect("push");

    let first = queue.pop(&cancel).await.expect("entry");
    assert_eq!(first.priority, 10);
    let second = queue.pop(&cancel).await.expect("entry");
    assert_eq!(second.priority, 0);
  }

  #[tokio::test]
  async fn bound_is_enforced_for_fresh_pushes_only() {
    let queue = TaskQueue::new(2);
    queue.push(entry(0)).expect("push");
    queue.push(entry(0)).expect("push");

    match queue.push(entry(0)) {
      Err(CoreError::QueueFull) => {}
      other => panic!("expected QueueFull, got {other:?}"),
    }

    // Retries bypass the bound
    queue.push_retry(entry(0));
    assert_eq!(queue.len(), 3);
  }

  #[tokio::test]
  async fn cancelled_pop_returns_none_even_with_work_pending() {
    let queue = TaskQueue::new(4);
    queue.push(entry(0)).expect("push");

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(queue.pop(&cancel).await.is_none());
  }

  #[tokio::test]
  async fn pop_wakes_on_push() {
    let queue = std::sync::Arc::new(TaskQueue::new(4));
    let cancel = CancellationToken::new();

    let waiter = {
      let queue = queue.clone();
      let cancel = cancel.clone();
      tokio::spawn(async move { queue.pop(&cancel).await })
    };

    tokio::task::yield_now().await;
    queue.push(entry(0)).expect("push");

    let popped = waiter.await.expect("join").expect("entry");
    assert_eq!(popped.priority, 0);
  }
}
