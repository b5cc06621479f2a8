use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::error::{CoreError, ErrorKind, Result};
use crate::executor::{PreflightReport, RunOptions};
use pa_store::{NewTask, ScheduleType, Task, TaskFilter, TaskUpdate};

fn validate_schedule(schedule_type: ScheduleType, schedule_value: &str) -> Result<()> {
  match schedule_type {
    ScheduleType::Cron => pa_cron::validate(schedule_value).map_err(CoreError::from)?,
    ScheduleType::Once => {
      pa_cron::validate_once_instant(schedule_value).map_err(CoreError::from)?;
    }
    ScheduleType::Interval => {
      pa_cron::validate_interval_minutes(schedule_value).map_err(CoreError::from)?;
    }
  }
  Ok(())
}

/// `name` must be uppercase letters, digits, or underscores — spec §7's credential name format,
/// reused here because a task's extra `credentials` list references the same names.
fn validate_credential_name(name: &str) -> Result<()> {
  if !name.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_') || name.is_empty() {
    return Err(CoreError::new(
      ErrorKind::ValidationError,
      format!("invalid credential name '{name}'"),
    ));
  }
  Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
  pub enabled: Option<bool>,
  pub template_id: Option<String>,
  pub has_errors_last_24h: Option<bool>,
}

pub async fn list_tasks_handler(
  State(state): State<AppState>,
  Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<Task>>> {
  let tasks = state
    .store()
    .tasks()
    .list(TaskFilter {
      enabled: query.enabled,
      template_id: query.template_id,
      has_errors_last_24h: query.has_errors_last_24h,
    })
    .await?;
  Ok(Json(tasks))
}

pub async fn get_task_handler(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Task>> {
  let task = state
    .store()
    .tasks()
    .get(id)
    .await?
    .ok_or_else(|| CoreError::new(ErrorKind::NotFound, format!("no task {id}")))?;
  Ok(Json(task))
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
  pub template_id: String,
  pub name: String,
  pub description: Option<String>,
  #[serde(default)]
  pub params: serde_json::Map<String, serde_json::Value>,
  pub schedule_type: ScheduleType,
  pub schedule_value: String,
  #[serde(default)]
  pub credentials: Vec<String>,
  #[serde(default = "default_enabled")]
  pub enabled: bool,
}

fn default_enabled() -> bool {
  true
}

pub async fn create_task_handler(
  State(state): State<AppState>,
  Json(request): Json<CreateTaskRequest>,
) -> Result<Json<Task>> {
  if !state.store().templates().exists(&request.template_id).await? {
    return Err(CoreError::new(
      ErrorKind::ValidationError,
      format!("unknown template '{}'", request.template_id),
    ));
  }
  validate_schedule(request.schedule_type, &request.schedule_value)?;
  for name in &request.credentials {
    validate_credential_name(name)?;
  }

  let task = state
    .store()
    .tasks()
    .create(NewTask {
      template_id: request.template_id,
      name: request.name,
      description: request.description,
      params: request.params,
      schedule_type: request.schedule_type,
      schedule_value: request.schedule_value,
      credentials: request.credentials,
      enabled: request.enabled,
    })
    .await?;

  if task.enabled {
    state.scheduler().register_task(task.clone()).await?;
  }

  let task = state.store().tasks().get(task.id).await?.unwrap_or(task);
  Ok(Json(task))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTaskRequest {
  pub name: Option<String>,
  pub description: Option<Option<String>>,
  pub params: Option<serde_json::Map<String, serde_json::Value>>,
  pub schedule_type: Option<ScheduleType>,
  pub schedule_value: Option<String>,
  pub credentials: Option<Vec<String>>,
  pub enabled: Option<bool>,
}

pub async fn update_task_handler(
  State(state): State<AppState>,
  Path(id): Path<i64>,
  Json(request): Json<UpdateTaskRequest>,
) -> Result<Json<Task>> {
  let existing = state
    .store()
    .tasks()
    .get(id)
    .await?
    .ok_or_else(|| CoreError::new(ErrorKind::NotFound, format!("no task {id}")))?;

  let schedule_type = request.schedule_type.unwrap_or(existing.schedule_type);
  let schedule_value = request.schedule_value.clone().unwrap_or(existing.schedule_value.clone());
  validate_schedule(schedule_type, &schedule_value)?;
  if let Some(names) = &request.credentials {
    for name in names {
      validate_credential_name(name)?;
    }
  }

  let task = state
    .store()
    .tasks()
    .update(
      id,
      TaskUpdate {
        name: request.name,
        description: request.description,
        params: request.params,
        schedule_type: request.schedule_type,
        schedule_value: request.schedule_value,
        credentials: request.credentials,
        enabled: request.enabled,
      },
    )
    .await?;

  state.scheduler().update_task_schedule(id).await?;
  Ok(Json(task))
}

pub async fn delete_task_handler(State(state): State<AppState>, Path(id): Path<i64>) -> Result<()> {
  state.scheduler().unregister_task(id);
  state.store().tasks().delete(id).await?;
  Ok(())
}

pub async fn toggle_task_handler(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Task>> {
  let task = state.store().tasks().toggle_enabled(id).await?;
  state.scheduler().update_task_schedule(id).await?;
  Ok(Json(task))
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteTaskRequest {
  pub timeout_ms: Option<u64>,
}

#[derive(Debug, serde::Serialize)]
pub struct ExecuteTaskResponse {
  pub success: bool,
  pub execution_id: i64,
  pub status: pa_store::ExecutionStatus,
  pub output: Option<pa_store::ExecutionOutput>,
  pub error: Option<String>,
  pub duration_ms: Option<i64>,
}

pub async fn execute_task_handler(
  State(state): State<AppState>,
  Path(id): Path<i64>,
  body: Option<Json<ExecuteTaskRequest>>,
) -> Result<Json<ExecuteTaskResponse>> {
  let request = body.map(|Json(r)| r).unwrap_or_default();
  let result = state
    .executor()
    .run(
      id,
      RunOptions {
        timeout_ms: request.timeout_ms,
      },
    )
    .await?;

  Ok(Json(ExecuteTaskResponse {
    success: result.success,
    execution_id: result.execution.id,
    status: result.execution.status,
    output: result.output,
    error: result.error,
    duration_ms: result.execution.duration_ms,
  }))
}

pub async fn preflight_task_handler(
  State(state): State<AppState>,
  Path(id): Path<i64>,
) -> Result<Json<PreflightReport>> {
  let report = state.executor().preflight(id).await?;
  Ok(Json(report))
}
