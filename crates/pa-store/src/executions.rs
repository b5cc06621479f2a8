use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use crate::error::StoreError;
use crate::models::{Execution, ExecutionFilter, ExecutionOutput, ExecutionStatus};
use crate::Result;

/// Typed access to the `executions` table. See spec §4.1/§4.2.
pub struct Executions<'a> {
  pub(crate) conn: &'a pa_sqlite::Connection,
}

fn parse_status(s: &str) -> rusqlite::Result<ExecutionStatus> {
  match s {
    "running" => Ok(ExecutionStatus::Running),
    "success" => Ok(ExecutionStatus::Success),
    "failed" => Ok(ExecutionStatus::Failed),
    "timeout" => Ok(ExecutionStatus::Timeout),
    other => Err(rusqlite::Error::InvalidColumnType(
      0,
      format!("status={other}"),
      rusqlite::types::Type::Text,
    )),
  }
}

pub(crate) fn status_str(s: ExecutionStatus) -> &'static str {
  match s {
    ExecutionStatus::Running => "running",
    ExecutionStatus::Success => "success",
    ExecutionStatus::Failed => "failed",
    ExecutionStatus::Timeout => "timeout",
  }
}

fn row_to_execution(row: &rusqlite::Row) -> rusqlite::Result<Execution> {
  let status: String = row.get("status")?;
  let output: Option<String> = row.get("output")?;

  Ok(Execution {
    id: row.get("id")?,
    task_id: row.get("task_id")?,
    started_at: row.get("started_at")?,
    finished_at: row.get("finished_at")?,
    status: parse_status(&status)?,
    output: output
      .map(|s| serde_json::from_str::<ExecutionOutput>(&s))
      .transpose()
      .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
    error: row.get("error")?,
    duration_ms: row.get("duration_ms")?,
  })
}

impl<'a> Executions<'a> {
  /// Insert a `running` row for `task_id`, stamped with `started_at`. Returns the new id.
  pub async fn create_running(&self, task_id: i64, started_at: DateTime<Utc>) -> Result<i64> {
    let id = self
      .conn
      .call(move |conn| {
        conn
          .execute(
            "INSERT INTO executions (task_id, started_at, status) VALUES (?1, ?2, 'running')",
            rusqlite::params![task_id, started_at.to_rfc3339()],
          )
          .map_err(pa_sqlite::Error::Rusqlite)?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    Ok(id)
  }

  /// Close out a running execution with a terminal status, output/error, and measured duration.
  pub async fn finish(
    &self,
    id: i64,
    finished_at: DateTime<Utc>,
    status: ExecutionStatus,
    output: Option<ExecutionOutput>,
    error: Option<String>,
    duration_ms: i64,
  ) -> Result<()> {
    let output_json = output.map(|o| serde_json::to_string(&o)).transpose()?;
    let status_s = status_str(status);

    self
      .conn
      .call(move |conn| {
        conn
          .execute(
            "UPDATE executions SET finished_at = ?2, status = ?3, output = ?4, error = ?5, \
             duration_ms = ?6 WHERE id = ?1",
            rusqlite::params![id, finished_at.to_rfc3339(), status_s, output_json, error, duration_ms],
          )
          .map_err(pa_sqlite::Error::Rusqlite)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn get(&self, id: i64) -> Result<Option<Execution>> {
    let row = self
      .conn
      .call(move |conn| {
        conn
          .query_row("SELECT * FROM executions WHERE id = ?1", [id], row_to_execution)
          .optional()
          .map_err(pa_sqlite::Error::Rusqlite)
      })
      .await?;
    Ok(row)
  }

  pub async fn list(&self, filter: ExecutionFilter) -> Result<(Vec<Execution>, i64)> {
    self
      .conn
      .call(move |conn| {
        let mut where_sql = " WHERE 1=1".to_string();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(task_id) = filter.task_id {
          where_sql.push_str(" AND task_id = ?");
          params.push(Box::new(task_id));
        }
        if let Some(status) = filter.status {
          where_sql.push_str(" AND status = ?");
          params.push(Box::new(status_str(status)));
        }
        if let Some(from) = filter.start_date_from {
          where_sql.push_str(" AND started_at >= ?");
          params.push(Box::new(from.to_rfc3339()));
        }
        if let Some(to) = filter.start_date_to {
          where_sql.push_str(" AND started_at <= ?");
          params.push(Box::new(to.to_rfc3339()));
        }

        let count_sql = format!("SELECT COUNT(*) FROM executions{where_sql}");
        let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();
        let total: i64 = conn
          .query_row(&count_sql, refs.as_slice(), |row| row.get(0))
          .map_err(pa_sqlite::Error::Rusqlite)?;

        let limit = if filter.limit > 0 { filter.limit } else { 50 };
        let list_sql = format!(
          "SELECT * FROM executions{where_sql} ORDER BY started_at DESC LIMIT {} OFFSET {}",
          limit, filter.offset.max(0)
        );
        let mut stmt = conn.prepare(&list_sql).map_err(pa_sqlite::Error::Rusqlite)?;
        let rows = stmt
          .query_map(refs.as_slice(), row_to_execution)
          .map_err(pa_sqlite::Error::Rusqlite)?
          .collect::<rusqlite::Result<Vec<_>>>()
          .map_err(pa_sqlite::Error::Rusqlite)?;

        Ok((rows, total))
      })
      .await
      .map_err(StoreError::from)
  }

  /// Executions still `running` at process start, per task, are the orphans the Scheduler's
  /// startup sweep closes out as `failed` (spec §4.5, Open Question resolved in DESIGN.md).
  pub async fn list_running(&self) -> Result<Vec<Execution>> {
    self
      .conn
      .call(move |conn| {
        let mut stmt = conn
          .prepare("SELECT * FROM executions WHERE status = 'running'")
          .map_err(pa_sqlite::Error::Rusqlite)?;
        let rows = stmt
          .query_map([], row_to_execution)
          .map_err(pa_sqlite::Error::Rusqlite)?
          .collect::<rusqlite::Result<Vec<_>>>()
          .map_err(pa_sqlite::Error::Rusqlite)?;
        Ok(rows)
      })
      .await
      .map_err(StoreError::from)
  }

  pub async fn recent_error_count(&self, task_id: i64, since: DateTime<Utc>) -> Result<i64> {
    let count = self
      .conn
      .call(move |conn| {
        conn
          .query_row(
            "SELECT COUNT(*) FROM executions WHERE task_id = ?1 AND status IN ('failed', 'timeout') \
             AND started_at >= ?2",
            rusqlite::params![task_id, since.to_rfc3339()],
            |row| row.get(0),
          )
          .map_err(pa_sqlite::Error::Rusqlite)
      })
      .await?;
    Ok(count)
  }

  pub async fn pending_count(&self) -> Result<i64> {
    let count = self
      .conn
      .call(move |conn| {
        conn
          .query_row("SELECT COUNT(*) FROM executions WHERE status = 'running'", [], |row| {
            row.get(0)
          })
          .map_err(pa_sqlite::Error::Rusqlite)
      })
      .await?;
    Ok(count)
  }

  /// Retention: drop executions older than `days`, per spec §4.6 history retention note.
  pub async fn delete_older_than_days(&self, days: i64) -> Result<u64> {
    let affected = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .execute(
              "DELETE FROM executions WHERE started_at < datetime('now', ?1)",
              [format!("-{days} days")],
            )
            .map_err(pa_sqlite::Error::Rusqlite)?,
        )
      })
      .await?;
    Ok(affected as u64)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{NewTask, NewTemplate, ParamDef, ParamType, ScheduleType};
  use crate::store::Store;

  async fn setup_task(store: &Store) -> i64 {
    let template = store
      .templates()
      .create(NewTemplate {
        name: "greet".into(),
        description: None,
        category: None,
        code: "return 1;".into(),
        params_schema: vec![ParamDef {
          name: "n".into(),
          param_type: ParamType::Number,
          required: true,
          default: None,
          description: None,
        }],
        required_credentials: vec![],
        suggested_schedule: None,
        is_builtin: false,
      })
      .await
      .unwrap();

    let task = store
      .tasks()
      .create(NewTask {
        template_id: template.id,
        name: "job".into(),
        description: None,
        params: serde_json::json!({"n": 1}).as_object().unwrap().clone(),
        schedule_type: ScheduleType::Cron,
        schedule_value: "* * * * *".into(),
        credentials: vec![],
        enabled: true,
      })
      .await
      .unwrap();
    task.id
  }

  #[tokio::test]
  async fn create_running_then_finish_round_trip() {
    let store = Store::open_in_memory().await.unwrap();
    let task_id = setup_task(&store).await;

    let started = Utc::now();
    let id = store.executions().create_running(task_id, started).await.unwrap();

    let running = store.executions().get(id).await.unwrap().unwrap();
    assert_eq!(running.status, ExecutionStatus::Running);
    assert!(running.finished_at.is_none());

    store
      .executions()
      .finish(
        id,
        Utc::now(),
        ExecutionStatus::Success,
        Some(ExecutionOutput {
          console: vec![],
          result: serde_json::json!({"ok": true}),
        }),
        None,
        42,
      )
      .await
      .unwrap();

    let finished = store.executions().get(id).await.unwrap().unwrap();
    assert_eq!(finished.status, ExecutionStatus::Success);
    assert!(finished.finished_at.is_some());
    assert_eq!(finished.duration_ms, Some(42));
    assert!(finished.output.is_some());
  }

  #[tokio::test]
  async fn list_filters_by_task_and_status_and_returns_total() {
    let store = Store::open_in_memory().await.unwrap();
    let task_id = setup_task(&store).await;

    let id1 = store.executions().create_running(task_id, Utc::now()).await.unwrap();
    store
      .executions()
      .finish(id1, Utc::now(), ExecutionStatus::Success, None, None, 1)
      .await
      .unwrap();

    let id2 = store.executions().create_running(task_id, Utc::now()).await.unwrap();
    store
      .executions()
      .finish(id2, Utc::now(), ExecutionStatus::Failed, None, Some("boom".into()), 2)
      .await
      .unwrap();

    let (all, total) = store
      .executions()
      .list(ExecutionFilter {
        task_id: Some(task_id),
        status: None,
        start_date_from: None,
        start_date_to: None,
        limit: 50,
        offset: 0,
      })
      .await
      .unwrap();
    assert_eq!(total, 2);
    assert_eq!(all.len(), 2);

    let (failed_only, failed_total) = store
      .executions()
      .list(ExecutionFilter {
        task_id: Some(task_id),
        status: Some(ExecutionStatus::Failed),
        start_date_from: None,
        start_date_to: None,
        limit: 50,
        offset: 0,
      })
      .await
      .unwrap();
    assert_eq!(failed_total, 1);
    assert_eq!(failed_only[0].id, id2);
  }

  #[tokio::test]
  async fn list_running_and_pending_count_reflect_in_flight_executions() {
    let store = Store::open_in_memory().await.unwrap();
    let task_id = setup_task(&store).await;

    let running_id = store.executions().create_running(task_id, Utc::now()).await.unwrap();
    let finished_id = store.executions().create_running(task_id, Utc::now()).await.unwrap();
    store
      .executions()
      .finish(finished_id, Utc::now(), ExecutionStatus::Success, None, None, 1)
      .await
      .unwrap();

    let running = store.executions().list_running().await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, running_id);

    assert_eq!(store.executions().pending_count().await.unwrap(), 1);
  }

  #[tokio::test]
  async fn recent_error_count_only_counts_failed_and_timeout_within_window() {
    let store = Store::open_in_memory().await.unwrap();
    let task_id = setup_task(&store).await;

    let success = store.executions().create_running(task_id, Utc::now()).await.unwrap();
    store
      .executions()
      .finish(success, Utc::now(), ExecutionStatus::Success, None, None, 1)
      .await
      .unwrap();

    let failed = store.executions().create_running(task_id, Utc::now()).await.unwrap();
    store
      .executions()
      .finish(failed, Utc::now(), ExecutionStatus::Failed, None, Some("boom".into()), 1)
      .await
      .unwrap();

    let timed_out = store.executions().create_running(task_id, Utc::now()).await.unwrap();
    store
      .executions()
      .finish(timed_out, Utc::now(), ExecutionStatus::Timeout, None, Some("timeout".into()), 1)
      .await
      .unwrap();

    let since = Utc::now() - chrono::Duration::hours(24);
    let count = store.executions().recent_error_count(task_id, since).await.unwrap();
    assert_eq!(count, 2);
  }
}
