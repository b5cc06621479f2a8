use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pa_store::{ScheduleType, Store, Task, TaskFilter};
use tracing::{error, info, warn};

use crate::error::{CoreError, Result};
use crate::executor::{Executor, RunOptions};

/// One registered task's running job, grounded on the teacher's `Job`/`JobRegistry` pair
/// (`crates/core/src/scheduler.rs`) but adapted from a single cron-only ticker to the three
/// schedule types this engine supports.
struct JobHandle {
  abort: tokio::task::AbortHandle,
}

struct Inner {
  store: Arc<Store>,
  executor: Arc<Executor>,
  jobs: Mutex<HashMap<i64, JobHandle>>,
  sweep: Mutex<Option<tokio::task::AbortHandle>>,
  running: AtomicBool,
  sweep_interval: std::time::Duration,
  /// Task ids with a fire of `execute_task_job` currently in progress. Guards against
  /// `catch_up_sweep` invoking a second concurrent fire for a task whose own `run_job_loop` fire
  /// hasn't finished yet — `jobs` only reflects registration, not in-flight status, and
  /// `next_run_at` isn't advanced until after the (potentially long) `Executor::run` call returns
  /// (spec §8: a task is never executed by two concurrent fires).
  in_flight: Mutex<HashSet<i64>>,
}

/// Releases a task's `in_flight` membership on every exit path out of `execute_task_job`,
/// including its several early returns.
struct InFlightGuard<'a> {
  inner: &'a Arc<Inner>,
  task_id: i64,
}

impl Drop for InFlightGuard<'_> {
  fn drop(&mut self) {
    self.inner.in_flight.lock().remove(&self.task_id);
  }
}

/// Drives every enabled task's schedule into timed `Executor` invocations, surviving process
/// restarts by recomputing each job from the Store at `start`. See spec §4.5.
#[derive(Clone)]
pub struct Scheduler {
  inner: Arc<Inner>,
}

impl Scheduler {
  pub fn new(store: Arc<Store>, executor: Arc<Executor>, sweep_interval: std::time::Duration) -> Self {
    Self {
      inner: Arc::new(Inner {
        store,
        executor,
        jobs: Mutex::new(HashMap::new()),
        sweep: Mutex::new(None),
        running: AtomicBool::new(false),
        sweep_interval,
        in_flight: Mutex::new(HashSet::new()),
      }),
    }
  }

  pub fn is_running(&self) -> bool {
    self.inner.running.load(Ordering::Relaxed)
  }

  pub fn job_count(&self) -> usize {
    self.inner.jobs.lock().len()
  }

  pub fn is_task_registered(&self, id: i64) -> bool {
    self.inner.jobs.lock().contains_key(&id)
  }

  /// Orphan sweep (running → failed "process restart"), full reschedule of every enabled task,
  /// then the periodic catch-up sweep. See spec §4.5 and DESIGN.md's resolution of the orphan
  /// open question.
  pub async fn start(&self) -> Result<()> {
    self.sweep_orphaned_executions().await?;
    self.reschedule_all().await?;
    self.start_catch_up_sweep();
    self.inner.running.store(true, Ordering::Relaxed);
    info!("scheduler started");
    Ok(())
  }

  pub fn stop(&self) {
    let mut jobs = self.inner.jobs.lock();
    for (_, job) in jobs.drain() {
      job.abort.abort();
    }
    drop(jobs);
    if let Some(handle) = self.inner.sweep.lock().take() {
      handle.abort();
    }
    self.inner.running.store(false, Ordering::Relaxed);
    info!("scheduler stopped");
  }

  async fn sweep_orphaned_executions(&self) -> Result<()> {
    let orphans = self.inner.store.executions().list_running().await?;
    if orphans.is_empty() {
      return Ok(());
    }
    warn!(count = orphans.len(), "closing executions orphaned by a prior process restart");
    for execution in orphans {
      let finished_at = Utc::now();
      let duration_ms = (finished_at - execution.started_at).num_milliseconds().max(0);
      self
        .inner
        .store
        .executions()
        .finish(
          execution.id,
          finished_at,
          pa_store::ExecutionStatus::Failed,
          None,
          Some("process restart".to_string()),
          duration_ms,
        )
        .await?;
    }
    Ok(())
  }

  pub async fn reschedule_all(&self) -> Result<()> {
    let tasks = self
      .inner
      .store
      .tasks()
      .list(TaskFilter {
        enabled: Some(true),
        template_id: None,
        has_errors_last_24h: None,
      })
      .await?;
    for task in tasks {
      self.register_task(task).await?;
    }
    Ok(())
  }

  /// Re-read a task from the Store and (re-)register it if enabled, else unregister it — used
  /// by the external API after a task's schedule-affecting fields change.
  pub async fn update_task_schedule(&self, id: i64) -> Result<()> {
    match self.inner.store.tasks().get(id).await? {
      Some(task) if task.enabled => self.register_task(task).await,
      _ => {
        self.unregister_task(id);
        Ok(())
      }
    }
  }

  pub async fn register_task(&self, task: Task) -> Result<()> {
    self.unregister_task(task.id);

    let initial_next_run = initial_next_run_at(&task)?;
    self.inner.store.tasks().set_next_run_at(task.id, initial_next_run).await?;

    let inner = self.inner.clone();
    let task_id = task.id;
    let join = tokio::spawn(async move {
      run_job_loop(inner, task_id).await;
    });
    self.inner.jobs.lock().insert(task.id, JobHandle { abort: join.abort_handle() });
    Ok(())
  }

  pub fn unregister_task(&self, id: i64) {
    if let Some(job) = self.inner.jobs.lock().remove(&id) {
      job.abort.abort();
    }
  }

  fn start_catch_up_sweep(&self) {
    let inner = self.inner.clone();
    let interval = self.inner.sweep_interval;
    let join = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.tick().await; // first tick fires immediately; skip it, the initial reschedule already ran.
      loop {
        ticker.tick().await;
        if let Err(err) = catch_up_sweep(&inner).await {
          error!(%err, "catch-up sweep failed");
        }
      }
    });
    *self.inner.sweep.lock() = Some(join.abort_handle());
  }
}

/// Every non-cron enabled task whose `next_run_at` has already passed gets one fire through
/// `execute_task_job`. Heals missed fires from process pauses or clock skew (spec §4.5, §8
/// property 10). Cron jobs own their own cadence via their ticker and are excluded.
///
/// A task whose own `run_job_loop` fire is still in flight is skipped here — `execute_task_job`
/// itself enforces that via its `in_flight` guard, so this never races a job's own timed fire.
async fn catch_up_sweep(inner: &Arc<Inner>) -> Result<()> {
  let due = inner.store.tasks().get_due_to_run(Utc::now()).await?;
  for task in due {
    if matches!(task.schedule_type, ScheduleType::Cron) {
      continue;
    }
    if !inner.jobs.lock().contains_key(&task.id) {
      continue;
    }
    execute_task_job(inner, task.id).await;
  }
  Ok(())
}

/// One task's private loop: sleep until the next fire, run it, recompute the next fire, repeat.
/// Mirrors the teacher's per-job `tokio::spawn` loop (`Job::start`) generalized from
/// cron-only to cron/once/interval.
async fn run_job_loop(inner: Arc<Inner>, task_id: i64) {
  loop {
    let task = match inner.store.tasks().get(task_id).await {
      Ok(Some(task)) if task.enabled => task,
      Ok(_) => return,
      Err(err) => {
        error!(task_id, %err, "failed to read task for scheduling, abandoning job");
        return;
      }
    };

    let Some(next_run_at) = task.next_run_at else {
      return;
    };

    let delay = (next_run_at - Utc::now()).to_std().unwrap_or(std::time::Duration::ZERO);
    tokio::time::sleep(delay).await;

    execute_task_job(&inner, task_id).await;

    if matches!(task.schedule_type, ScheduleType::Once) {
      return;
    }
    if !inner.jobs.lock().contains_key(&task_id) {
      return;
    }
  }
}

/// `executeTaskJob(id)` from spec §4.5: re-read, run, recompute `next_run_at`, persist
/// transactionally, and for `once` tasks disable and unregister.
///
/// Skips entirely if this task already has a fire in progress — `run_job_loop`'s own timed fire
/// and a `catch_up_sweep` pass can otherwise race for the same `task_id` (spec §8: never executed
/// by two concurrent fires).
async fn execute_task_job(inner: &Arc<Inner>, task_id: i64) {
  if !inner.in_flight.lock().insert(task_id) {
    return;
  }
  let _guard = InFlightGuard { inner, task_id };

  let task = match inner.store.tasks().get(task_id).await {
    Ok(Some(task)) if task.enabled => task,
    Ok(_) => {
      if let Some(job) = inner.jobs.lock().remove(&task_id) {
        job.abort.abort();
      }
      return;
    }
    Err(err) => {
      error!(task_id, %err, "failed to re-read task before firing");
      return;
    }
  };

  match inner.executor.run(task_id, RunOptions::default()).await {
    Ok(result) => info!(
      task_id,
      execution_id = result.execution.id,
      success = result.success,
      "task fired"
    ),
    Err(err) => error!(task_id, %err, "executor failed to run task"),
  }

  let next_run_at = match next_run_after_fire(&task) {
    Ok(next) => next,
    Err(err) => {
      error!(task_id, %err, "failed to compute next run, unregistering task");
      if let Some(job) = inner.jobs.lock().remove(&task_id) {
        job.abort.abort();
      }
      return;
    }
  };

  if matches!(task.schedule_type, ScheduleType::Once) {
    if let Err(err) = inner.store.tasks().disable_and_clear_next_run(task_id).await {
      error!(task_id, %err, "failed to disable one-shot task after firing");
    }
    if let Some(job) = inner.jobs.lock().remove(&task_id) {
      job.abort.abort();
    }
    return;
  }

  if let Err(err) = inner.store.tasks().set_next_run_at(task_id, next_run_at).await {
    error!(task_id, %err, "failed to persist next run time");
  }
}

/// The `next_run_at` a freshly (re-)registered task should carry before its first fire.
fn initial_next_run_at(task: &Task) -> Result<Option<DateTime<Utc>>> {
  match task.schedule_type {
    ScheduleType::Cron => pa_cron::next_after(&task.schedule_value, Utc::now())
      .map_err(CoreError::from),
    ScheduleType::Once => {
      let instant = pa_cron::validate_once_instant(&task.schedule_value).map_err(CoreError::from)?;
      Ok(Some(instant))
    }
    ScheduleType::Interval => {
      if let Some(existing) = task.next_run_at {
        return Ok(Some(existing));
      }
      let minutes = pa_cron::validate_interval_minutes(&task.schedule_value).map_err(CoreError::from)?;
      Ok(Some(Utc::now() + chrono::Duration::minutes(minutes)))
    }
  }
}

/// The `next_run_at` policy after a fire completes (spec §4.5 step 3, §8 property 4): cron
/// advances by `nextAfter(now)`; interval advances by a fixed `minutes` from now (the source's
/// drifting behavior, kept deliberately — see DESIGN.md); once has no next fire.
fn next_run_after_fire(task: &Task) -> Result<Option<DateTime<Utc>>> {
  match task.schedule_type {
    ScheduleType::Cron => pa_cron::next_after(&task.schedule_value, Utc::now()).map_err(CoreError::from),
    ScheduleType::Once => Ok(None),
    ScheduleType::Interval => {
      let minutes = pa_cron::validate_interval_minutes(&task.schedule_value).map_err(CoreError::from)?;
      Ok(Some(Utc::now() + chrono::Duration::minutes(minutes)))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::settings::Settings;
  use pa_store::{ExecutionStatus, NewTask, NewTemplate, ParamDef, ParamType};

  async fn harness() -> (Arc<Store>, Arc<Executor>, tempfile::TempDir) {
    let store = Arc::new(Store::open_in_memory().await.unwrap());
    let dir = tempfile::tempdir().unwrap();
    let vault = Arc::new(pa_vault::Vault::initialize(dir.path()).unwrap());
    let settings = Arc::new(Settings::default());
    let executor = Arc::new(Executor::new(store.clone(), vault, settings));
    (store, executor, dir)
  }

  async fn make_template(store: &Store) -> String {
    store
      .templates()
      .create(NewTemplate {
        name: format!("tpl-{}", uuid::Uuid::new_v4()),
        description: None,
        category: None,
        code: "return 1;".into(),
        params_schema: vec![ParamDef {
          name: "n".into(),
          param_type: ParamType::Number,
          required: false,
          default: None,
          description: None,
        }],
        required_credentials: vec![],
        suggested_schedule: None,
        is_builtin: false,
      })
      .await
      .unwrap()
      .id
  }

  // S2 — a `once` task due in the past fires promptly and then disables itself.
  #[tokio::test]
  async fn once_task_fires_and_disables() {
    let (store, executor, _dir) = harness().await;
    let template_id = make_template(&store).await;
    let task = store
      .tasks()
      .create(NewTask {
        template_id,
        name: "once-job".into(),
        description: None,
        params: serde_json::Map::new(),
        schedule_type: ScheduleType::Once,
        schedule_value: (Utc::now() - chrono::Duration::minutes(1)).to_rfc3339(),
        credentials: vec![],
        enabled: true,
      })
      .await
      .unwrap();

    let scheduler = Scheduler::new(store.clone(), executor, std::time::Duration::from_secs(3600));
    scheduler.register_task(task.clone()).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let reloaded = store.tasks().get(task.id).await.unwrap().unwrap();
    assert!(!reloaded.enabled);
    assert!(reloaded.next_run_at.is_none());
    assert!(reloaded.last_run_at.is_some());
    assert!(!scheduler.is_task_registered(task.id));

    let (executions, _total) = store
      .executions()
      .list(pa_store::ExecutionFilter {
        task_id: Some(task.id),
        ..Default::default()
      })
      .await
      .unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Success);
  }

  // Registering a cron task computes a strictly-future `next_run_at` immediately.
  #[tokio::test]
  async fn cron_task_registration_sets_next_run_in_future() {
    let (store, executor, _dir) = harness().await;
    let template_id = make_template(&store).await;
    let task = store
      .tasks()
      .create(NewTask {
        template_id,
        name: "cron-job".into(),
        description: None,
        params: serde_json::Map::new(),
        schedule_type: ScheduleType::Cron,
        schedule_value: "* * * * *".into(),
        credentials: vec![],
        enabled: true,
      })
      .await
      .unwrap();

    let scheduler = Scheduler::new(store.clone(), executor, std::time::Duration::from_secs(3600));
    let before = Utc::now();
    scheduler.register_task(task.clone()).await.unwrap();

    let reloaded = store.tasks().get(task.id).await.unwrap().unwrap();
    assert!(reloaded.next_run_at.unwrap() > before);
    assert!(scheduler.is_task_registered(task.id));
    scheduler.stop();
  }

  // A concurrent fire for a task already in flight is skipped rather than double-run — the race
  // `catch_up_sweep` and a task's own `run_job_loop` could otherwise hit (spec §8).
  #[tokio::test]
  async fn execute_task_job_skips_concurrent_fire_for_same_task() {
    let (store, executor, _dir) = harness().await;
    let template_id = make_template(&store).await;
    let task = store
      .tasks()
      .create(NewTask {
        template_id,
        name: "race-job".into(),
        description: None,
        params: serde_json::Map::new(),
        schedule_type: ScheduleType::Once,
        schedule_value: (Utc::now() - chrono::Duration::minutes(1)).to_rfc3339(),
        credentials: vec![],
        enabled: true,
      })
      .await
      .unwrap();

    let scheduler = Scheduler::new(store.clone(), executor, std::time::Duration::from_secs(3600));
    let inner = scheduler.inner.clone();

    tokio::join!(execute_task_job(&inner, task.id), execute_task_job(&inner, task.id));

    let (executions, _total) = store
      .executions()
      .list(pa_store::ExecutionFilter {
        task_id: Some(task.id),
        ..Default::default()
      })
      .await
      .unwrap();
    assert_eq!(executions.len(), 1);
  }

  // Startup orphan sweep closes a `running` row left behind by a prior process.
  #[tokio::test]
  async fn start_sweeps_orphaned_running_executions() {
    let (store, executor, _dir) = harness().await;
    let template_id = make_template(&store).await;
    let task = store
      .tasks()
      .create(NewTask {
        template_id,
        name: "orphan-job".into(),
        description: None,
        params: serde_json::Map::new(),
        schedule_type: ScheduleType::Once,
        schedule_value: (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
        credentials: vec![],
        enabled: false,
      })
      .await
      .unwrap();
    let execution_id = store
      .executions()
      .create_running(task.id, Utc::now() - chrono::Duration::minutes(5))
      .await
      .unwrap();

    let scheduler = Scheduler::new(store.clone(), executor, std::time::Duration::from_secs(3600));
    scheduler.start().await.unwrap();
    scheduler.stop();

    let execution = store.executions().get(execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error.as_deref(), Some("process restart"));
    assert!(execution.finished_at.is_some());
  }
}
