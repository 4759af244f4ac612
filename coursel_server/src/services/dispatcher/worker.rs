//! Worker loop: dequeue, lock the course, run the store mutation, record the
//! outcome, retry transients with exponential backoff.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, warn};

use coursel_core::contracts::CourseRepository;
use coursel_core::error::CoreError;
use coursel_core::models::{CourseId, FailureKind, QueuedTask, TaskKind, TaskStatus, UserId};

use super::DispatcherInner;

pub(super) async fn worker_loop(inner: Arc<DispatcherInner>, worker_id: usize) {
  debug!("selection worker {worker_id} started");
  while let Some(entry) = inner.queue.pop(&inner.cancel).await {
    process(&inner, entry).await;
  }
  debug!("selection worker {worker_id} stopped");
}

async fn process(inner: &Arc<DispatcherInner>, entry: QueuedTask) {
  // Claim the task. Entries whose journal record is no longer pending were
  // cancelled (or already handled) while queued.
  let claimed = {
    let mut task = match inner.tasks.get_mut(&entry.task_id) {
      Some(task) => task,
      None => return,
    };
    if task.status != TaskStatus::Pending {
      return;
    }
    task.status = TaskStatus::Running;
    task.started_at = Some(Utc::now());
    task.attempt_count += 1;
    (task.user_id, task.course_id, task.kind, task.attempt_count)
  };
  let (user_id, course_id, kind, attempt) = claimed;

  inner.running.fetch_add(1, Ordering::Relaxed);
  let lock = inner.course_lock(course_id);
  let deadline = Duration::from_millis(inner.config.task_deadline_ms);
  let result = match tokio::time::timeout(deadline, async {
    let _guard = lock.lock().await;
    apply(inner, kind, user_id, course_id).await
  })
  .await
  {
    Ok(result) => result,
    Err(_) => Err(CoreError::StorageUnavailable(format!(
      "task {} exceeded its {}ms deadline",
      entry.task_id, inner.config.task_deadline_ms
    ))),
  };
  inner.running.fetch_sub(1, Ordering::Relaxed);

  match result {
    Ok(()) => inner.finish(entry.task_id, TaskStatus::Succeeded, None),
    Err(CoreError::Selection(rule)) => {
      inner.finish(entry.task_id, TaskStatus::Failed, Some(rule.into()));
    }
    Err(err) if err.is_transient() && attempt < inner.config.max_task_attempts => {
      warn!(
        "task {} attempt {attempt} hit a transient failure, re-enqueueing: {err}",
        entry.task_id
      );
      if let Some(mut task) = inner.tasks.get_mut(&entry.task_id) {
        task.status = TaskStatus::Pending;
      }
      let backoff = Duration::from_millis(
        inner
          .config
          .retry_base_backoff_ms
          .saturating_mul(1u64 << attempt.min(16)),
      );
      let inner = inner.clone();
      tokio::spawn(async move {
        tokio::select! {
          _ = tokio::time::sleep(backoff) => inner.queue.push_retry(entry),
          // Shutdown drains still-pending journal entries itself
          _ = inner.cancel.cancelled() => {}
        }
      });
    }
    Err(err) => {
      error!("task {} failed terminally: {err}", entry.task_id);
      inner.finish(
        entry.task_id,
        TaskStatus::Failed,
        Some(FailureKind::TransientExhausted),
      );
    }
  }
}

async fn apply(
  inner: &Arc<DispatcherInner>,
  kind: TaskKind,
  user_id: UserId,
  course_id: CourseId,
) -> Result<(), CoreError> {
  match kind {
    TaskKind::Select => inner.store.apply_select(user_id, course_id).await,
    TaskKind::Deselect => inner.store.apply_deselect(user_id, course_id).await,
  }
}
