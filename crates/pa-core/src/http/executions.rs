use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::error::{CoreError, ErrorKind, Result};
use pa_store::{Execution, ExecutionFilter, ExecutionStatus};

#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
  pub task_id: Option<i64>,
  pub status: Option<ExecutionStatus>,
  pub start_date: Option<DateTime<Utc>>,
  pub end_date: Option<DateTime<Utc>>,
  #[serde(default = "default_limit")]
  pub limit: i64,
  #[serde(default)]
  pub offset: i64,
}

fn default_limit() -> i64 {
  50
}

#[derive(Debug, Serialize)]
pub struct ListExecutionsResponse {
  pub data: Vec<Execution>,
  pub total: i64,
  pub limit: i64,
  pub offset: i64,
}

pub async fn list_executions_handler(
  State(state): State<AppState>,
  Query(query): Query<ListExecutionsQuery>,
) -> Result<Json<ListExecutionsResponse>> {
  let (data, total) = state
    .store()
    .executions()
    .list(ExecutionFilter {
      task_id: query.task_id,
      status: query.status,
      start_date_from: query.start_date,
      start_date_to: query.end_date,
      limit: query.limit,
      offset: query.offset,
    })
    .await?;

  Ok(Json(ListExecutionsResponse {
    data,
    total,
    limit: query.limit,
    offset: query.offset,
  }))
}

pub async fn get_execution_handler(
  State(state): State<AppState>,
  Path(id): Path<i64>,
) -> Result<Json<Execution>> {
  let execution = state
    .store()
    .executions()
    .get(id)
    .await?
    .ok_or_else(|| CoreError::new(ErrorKind::NotFound, format!("no execution {id}")))?;
  Ok(Json(execution))
}
