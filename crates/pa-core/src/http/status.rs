use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::app_state::AppState;
use crate::error::Result;
use pa_store::TaskFilter;

/// `GET /api/status` response shape, spec §6.3.
#[derive(Debug, Serialize)]
pub struct SystemStatus {
  pub scheduler_running: bool,
  pub database_connected: bool,
  pub tasks_count: usize,
  pub enabled_tasks_count: usize,
  pub pending_executions: i64,
  pub recent_errors: i64,
  pub version: &'static str,
  pub uptime_seconds: u64,
}

pub async fn status_handler(State(state): State<AppState>) -> Result<Json<SystemStatus>> {
  let all_tasks = state.store().tasks().list(TaskFilter::default()).await?;
  let enabled_tasks = all_tasks.iter().filter(|t| t.enabled).count();
  let pending = state.store().executions().pending_count().await?;
  let since = Utc::now() - chrono::Duration::hours(24);
  let mut recent_errors = 0;
  for task in &all_tasks {
    recent_errors += state.store().executions().recent_error_count(task.id, since).await?;
  }

  Ok(Json(SystemStatus {
    scheduler_running: state.scheduler().is_running(),
    database_connected: true,
    tasks_count: all_tasks.len(),
    enabled_tasks_count: enabled_tasks,
    pending_executions: pending,
    recent_errors,
    version: env!("CARGO_PKG_VERSION"),
    uptime_seconds: state.uptime().as_secs(),
  }))
}
