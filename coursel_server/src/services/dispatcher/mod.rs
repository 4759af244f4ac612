//! Selection dispatcher: the single writer over course state.
//!
//! A bounded priority queue feeds a pool of workers. Every task acquires an
//! exclusive per-course lock before touching the store, so mutations on one
//! course are strictly serial while distinct courses proceed concurrently.
//! Terminal tasks stay in the journal for a TTL so owners can poll them.

mod queue;
mod worker;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use utoipa::ToSchema;

use coursel_core::contracts::CourseRepository;
use coursel_core::error::CoreError;
use coursel_core::models::{
  CourseId, FailureKind, QueuedTask, SelectionTask, TaskId, TaskStatus,
};

use crate::config::DispatcherConfig;
use queue::TaskQueue;

#[derive(Debug, Serialize, ToSchema)]
pub struct QueueStats {
  pub pending: usize,
  pub running: usize,
  pub avg_latency_ms: u64,
}

pub(crate) struct DispatcherInner {
  pub(crate) queue: TaskQueue,
  pub(crate) tasks: DashMap<TaskId, SelectionTask>,
  course_locks: DashMap<CourseId, Arc<tokio::sync::Mutex<()>>>,
  pub(crate) store: Arc<dyn CourseRepository>,
  pub(crate) config: DispatcherConfig,
  pub(crate) cancel: CancellationToken,
  accepting: AtomicBool,
  pub(crate) running: AtomicUsize,
  latency_ms_sum: AtomicU64,
  completed: AtomicU64,
}

impl DispatcherInner {
  pub(crate) fn course_lock(&self, id: CourseId) -> Arc<tokio::sync::Mutex<()>> {
    self
      .course_locks
      .entry(id)
      .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
      .clone()
  }

  pub(crate) fn finish(&self, id: TaskId, status: TaskStatus, failure_kind: Option<FailureKind>) {
    if let Some(mut task) = self.tasks.get_mut(&id) {
      let now = Utc::now();
      task.status = status;
      task.failure_kind = failure_kind;
      task.completed_at = Some(now);

      let latency = (now - task.submitted_at).num_milliseconds().max(0) as u64;
      self.latency_ms_sum.fetch_add(latency, Ordering::Relaxed);
      self.completed.fetch_add(1, Ordering::Relaxed);
    }
  }

  fn purge_expired(&self) {
    let ttl = ChronoDuration::seconds(self.config.task_ttl_seconds as i64);
    let now = Utc::now();
    self.tasks.retain(|_, task| {
      !(task.status.is_terminal()
        && task
          .completed_at
          .map(|done| now - done > ttl)
          .unwrap_or(false))
    });
  }
}

#[derive(Clone)]
pub struct Dispatcher {
  inner: Arc<DispatcherInner>,
  workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Dispatcher {
  /// Spawn the worker pool and the journal janitor.
  pub fn start(store: Arc<dyn CourseRepository>, config: DispatcherConfig) -> Self {
    let inner = Arc::new(DispatcherInner {
      queue: TaskQueue::new(config.max_queue_depth),
      tasks: DashMap::new(),
      course_locks: DashMap::new(),
      store,
      config,
      cancel: CancellationToken::new(),
      accepting: AtomicBool::new(true),
      running: AtomicUsize::new(0),
      latency_ms_sum: AtomicU64::new(0),
      completed: AtomicU64::new(0),
    });

    let mut handles = Vec::with_capacity(inner.config.worker_count);
    for worker_id in 0..inner.config.worker_count {
      let inner = inner.clone();
      handles.push(tokio::spawn(worker::worker_loop(inner, worker_id)));
    }

    {
      let inner = inner.clone();
      tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
          tokio::select! {
            _ = tick.tick() => inner.purge_expired(),
            _ = inner.cancel.cancelled() => break,
          }
        }
      });
    }

    Self {
      inner,
      workers: Arc::new(Mutex::new(handles)),
    }
  }

  /// Accept a task into the queue. Returns the task id and its estimated
  /// position among pending tasks.
  pub fn submit(&self, task: SelectionTask) -> Result<(TaskId, usize), CoreError> {
    if !self.inner.accepting.load(Ordering::SeqCst) {
      return Err(CoreError::ShuttingDown);
    }

    let id = task.id;
    let entry = QueuedTask::from_task(&task);
    self.inner.tasks.insert(id, task);
    match self.inner.queue.push(entry) {
      Ok(position) => Ok((id, position)),
      Err(e) => {
        self.inner.tasks.remove(&id);
        Err(e)
      }
    }
  }

  pub fn status(&self, id: TaskId) -> Option<SelectionTask> {
    self.inner.tasks.get(&id).map(|t| t.clone())
  }

  /// Cancel a task that has not started. Running and terminal tasks are
  /// untouchable.
  pub fn cancel(&self, id: TaskId) -> Result<(), CoreError> {
    let mut task = self
      .inner
      .tasks
      .get_mut(&id)
      .ok_or_else(|| CoreError::NotFound(format!("task {id}")))?;

    match task.status {
      TaskStatus::Pending => {
        task.status = TaskStatus::Failed;
        task.failure_kind = Some(FailureKind::Cancelled);
        task.completed_at = Some(Utc::now());
        Ok(())
      }
      _ => Err(CoreError::Validation(
        "only pending tasks can be cancelled".to_string(),
      )),
    }
  }

  pub fn stats(&self) -> QueueStats {
    let completed = self.inner.completed.load(Ordering::Relaxed);
    let avg_latency_ms = if completed == 0 {
      0
    } else {
      self.inner.latency_ms_sum.load(Ordering::Relaxed) / completed
    };
    QueueStats {
      pending: self.inner.queue.len(),
      running: self.inner.running.load(Ordering::Relaxed),
      avg_latency_ms,
    }
  }

  /// Stop intake, give in-flight tasks a grace period, then mark whatever is
  /// left pending as failed with `ShuttingDown`.
  pub async fn shutdown(&self) {
    self.inner.accepting.store(false, Ordering::SeqCst);
    self.inner.cancel.cancel();

    let handles: Vec<JoinHandle<()>> = {
      let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
      workers.drain(..).collect()
    };
    let grace = Duration::from_millis(self.inner.config.shutdown_grace_ms);
    for mut handle in handles {
      if tokio::time::timeout(grace, &mut handle).await.is_err() {
        warn!("worker did not finish within shutdown grace period, aborting");
        handle.abort();
      }
    }

    self.inner.queue.drain();
    let mut abandoned = 0usize;
    for mut entry in self.inner.tasks.iter_mut() {
      if !entry.status.is_terminal() {
        entry.status = TaskStatus::Failed;
        entry.failure_kind = Some(FailureKind::ShuttingDown);
        entry.completed_at = Some(Utc::now());
        abandoned += 1;
      }
    }
    if abandoned > 0 {
      info!("marked {abandoned} unfinished tasks as ShuttingDown");
    }
  }

  /// Whether new submissions are still accepted.
  pub fn is_accepting(&self) -> bool {
    self.inner.accepting.load(Ordering::SeqCst)
  }
}
