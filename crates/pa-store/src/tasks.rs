use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use crate::error::{classify, StoreError};
use crate::models::{NewTask, ScheduleType, Task, TaskUpdate};
use crate::Result;

/// Typed access to the `tasks` table. See spec §4.1. `next_run_at`/`last_run_at` mutations are
/// owned by the Scheduler (spec §4.5) — the Store only enforces the column-level shape.
pub struct Tasks<'a> {
  pub(crate) conn: &'a pa_sqlite::Connection,
}

#[derive(Default)]
pub struct TaskFilter {
  pub enabled: Option<bool>,
  pub template_id: Option<String>,
  /// Spec §4.1 `hasErrorsLast24h`: restrict to tasks with at least one `failed`/`timeout`
  /// execution started within the last 24 hours (`Some(true)`) or none at all (`Some(false)`).
  pub has_errors_last_24h: Option<bool>,
}

fn parse_schedule_type(s: &str) -> rusqlite::Result<ScheduleType> {
  match s {
    "cron" => Ok(ScheduleType::Cron),
    "once" => Ok(ScheduleType::Once),
    "interval" => Ok(ScheduleType::Interval),
    other => Err(rusqlite::Error::InvalidColumnType(
      0,
      format!("schedule_type={other}"),
      rusqlite::types::Type::Text,
    )),
  }
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
  let params: String = row.get("params")?;
  let credentials: String = row.get("credentials")?;
  let schedule_type: String = row.get("schedule_type")?;

  Ok(Task {
    id: row.get("id")?,
    template_id: row.get("template_id")?,
    name: row.get("name")?,
    description: row.get("description")?,
    params: serde_json::from_str(&params).unwrap_or_default(),
    schedule_type: parse_schedule_type(&schedule_type)?,
    schedule_value: row.get("schedule_value")?,
    credentials: serde_json::from_str(&credentials).unwrap_or_default(),
    enabled: row.get::<_, i64>("enabled")? != 0,
    last_run_at: row.get("last_run_at")?,
    next_run_at: row.get("next_run_at")?,
  })
}

fn schedule_type_str(t: ScheduleType) -> &'static str {
  match t {
    ScheduleType::Cron => "cron",
    ScheduleType::Once => "once",
    ScheduleType::Interval => "interval",
  }
}

impl<'a> Tasks<'a> {
  pub async fn create(&self, new: NewTask) -> Result<Task> {
    let params = serde_json::to_string(&new.params)?;
    let credentials = serde_json::to_string(&new.credentials)?;
    let schedule_type = schedule_type_str(new.schedule_type);

    let id: i64 = self
      .conn
      .call(move |conn| {
        conn
          .execute(
            "INSERT INTO tasks (template_id, name, description, params, schedule_type, \
             schedule_value, credentials, enabled, last_run_at, next_run_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, NULL)",
            rusqlite::params![
              new.template_id,
              new.name,
              new.description,
              params,
              schedule_type,
              new.schedule_value,
              credentials,
              new.enabled as i64,
            ],
          )
          .map_err(pa_sqlite::Error::Rusqlite)?;
        Ok(conn.last_insert_rowid())
      })
      .await
      .map_err(|err| classify(err, "tasks.name"))?;

    self.get(id).await?.ok_or(StoreError::NotFound)
  }

  pub async fn get(&self, id: i64) -> Result<Option<Task>> {
    let row = self
      .conn
      .call(move |conn| {
        conn
          .query_row("SELECT * FROM tasks WHERE id = ?1", [id], row_to_task)
          .optional()
          .map_err(pa_sqlite::Error::Rusqlite)
      })
      .await?;
    Ok(row)
  }

  pub async fn get_by_name(&self, name: &str) -> Result<Option<Task>> {
    let name = name.to_string();
    let row = self
      .conn
      .call(move |conn| {
        conn
          .query_row("SELECT * FROM tasks WHERE name = ?1", [&name], row_to_task)
          .optional()
          .map_err(pa_sqlite::Error::Rusqlite)
      })
      .await?;
    Ok(row)
  }

  pub async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>> {
    self
      .conn
      .call(move |conn| {
        let mut sql = "SELECT * FROM tasks WHERE 1=1".to_string();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(enabled) = filter.enabled {
          sql.push_str(" AND enabled = ?");
          params.push(Box::new(enabled as i64));
        }
        if let Some(template_id) = &filter.template_id {
          sql.push_str(" AND template_id = ?");
          params.push(Box::new(template_id.clone()));
        }
        if let Some(has_errors) = filter.has_errors_last_24h {
          let since = (Utc::now() - chrono::Duration::hours(24)).to_rfc3339();
          let exists = "EXISTS (SELECT 1 FROM executions e WHERE e.task_id = tasks.id \
             AND e.status IN ('failed', 'timeout') AND e.started_at >= ?)";
          if has_errors {
            sql.push_str(&format!(" AND {exists}"));
          } else {
            sql.push_str(&format!(" AND NOT {exists}"));
          }
          params.push(Box::new(since));
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = conn.prepare(&sql).map_err(pa_sqlite::Error::Rusqlite)?;
        let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();
        let rows = stmt
          .query_map(refs.as_slice(), row_to_task)
          .map_err(pa_sqlite::Error::Rusqlite)?
          .collect::<rusqlite::Result<Vec<_>>>()
          .map_err(pa_sqlite::Error::Rusqlite)?;
        Ok(rows)
      })
      .await
      .map_err(StoreError::from)
  }

  /// Tasks due to run: `enabled ∧ next_run_at ≤ now`. Used by the Scheduler's catch-up sweep.
  pub async fn get_due_to_run(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
    self
      .conn
      .call(move |conn| {
        let mut stmt = conn
          .prepare(
            "SELECT * FROM tasks WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1",
          )
          .map_err(pa_sqlite::Error::Rusqlite)?;
        let rows = stmt
          .query_map([now.to_rfc3339()], row_to_task)
          .map_err(pa_sqlite::Error::Rusqlite)?
          .collect::<rusqlite::Result<Vec<_>>>()
          .map_err(pa_sqlite::Error::Rusqlite)?;
        Ok(rows)
      })
      .await
      .map_err(StoreError::from)
  }

  pub async fn update(&self, id: i64, update: TaskUpdate) -> Result<Task> {
    let existing = self.get(id).await?.ok_or(StoreError::NotFound)?;

    let name = update.name.unwrap_or(existing.name);
    let description = match update.description {
      Some(d) => d,
      None => existing.description,
    };
    let params = update.params.unwrap_or(existing.params);
    let schedule_type = update.schedule_type.unwrap_or(existing.schedule_type);
    let schedule_value = update.schedule_value.unwrap_or(existing.schedule_value);
    let credentials = update.credentials.unwrap_or(existing.credentials);
    let enabled = update.enabled.unwrap_or(existing.enabled);

    let params_json = serde_json::to_string(&params)?;
    let credentials_json = serde_json::to_string(&credentials)?;
    let schedule_type_s = schedule_type_str(schedule_type);

    self
      .conn
      .call(move |conn| {
        conn
          .execute(
            "UPDATE tasks SET name = ?2, description = ?3, params = ?4, schedule_type = ?5, \
             schedule_value = ?6, credentials = ?7, enabled = ?8 WHERE id = ?1",
            rusqlite::params![
              id,
              name,
              description,
              params_json,
              schedule_type_s,
              schedule_value,
              credentials_json,
              enabled as i64,
            ],
          )
          .map_err(pa_sqlite::Error::Rusqlite)?;
        Ok(())
      })
      .await
      .map_err(|err| classify(err, "tasks.name"))?;

    self.get(id).await?.ok_or(StoreError::NotFound)
  }

  pub async fn toggle_enabled(&self, id: i64) -> Result<Task> {
    let existing = self.get(id).await?.ok_or(StoreError::NotFound)?;
    let new_enabled = !existing.enabled;
    self
      .conn
      .call(move |conn| {
        conn
          .execute(
            "UPDATE tasks SET enabled = ?2 WHERE id = ?1",
            rusqlite::params![id, new_enabled as i64],
          )
          .map_err(pa_sqlite::Error::Rusqlite)?;
        Ok(())
      })
      .await?;
    self.get(id).await?.ok_or(StoreError::NotFound)
  }

  /// Stamp `last_run_at`/`next_run_at` alone, outside any wider transaction. Used where there is
  /// no accompanying execution row to close atomically (e.g. the Scheduler advancing a cron/
  /// interval task's `next_run_at` after the Executor has already closed that fire's execution).
  /// When a caller must close an execution row and stamp the owning task as one atomic unit
  /// (spec §8 property 4/5's "close execution + stamp task"), use
  /// [`crate::Store::close_execution_and_stamp_task`] instead of this method.
  pub async fn update_last_run(
    &self,
    id: i64,
    last_run_at: DateTime<Utc>,
    next_run_at: Option<DateTime<Utc>>,
  ) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn
          .execute(
            "UPDATE tasks SET last_run_at = ?2, next_run_at = ?3 WHERE id = ?1",
            rusqlite::params![
              id,
              last_run_at.to_rfc3339(),
              next_run_at.map(|t| t.to_rfc3339()),
            ],
          )
          .map_err(pa_sqlite::Error::Rusqlite)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Stamp `next_run_at` alone, without touching `last_run_at` — used when the Scheduler first
  /// registers a task and computes its initial fire time, before any run has actually happened.
  pub async fn set_next_run_at(&self, id: i64, next_run_at: Option<DateTime<Utc>>) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn
          .execute(
            "UPDATE tasks SET next_run_at = ?2 WHERE id = ?1",
            rusqlite::params![id, next_run_at.map(|t| t.to_rfc3339())],
          )
          .map_err(pa_sqlite::Error::Rusqlite)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Disable a `once` task after it has fired, per spec §4.5 / §8 property 5.
  pub async fn disable_and_clear_next_run(&self, id: i64) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn
          .execute(
            "UPDATE tasks SET enabled = 0, next_run_at = NULL WHERE id = ?1",
            [id],
          )
          .map_err(pa_sqlite::Error::Rusqlite)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Deletes the task. `executions` cascade via the `ON DELETE CASCADE` foreign key (spec §3,
  /// §8 property 7) — the Store does not need to delete executions itself.
  pub async fn delete(&self, id: i64) -> Result<()> {
    let affected = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .execute("DELETE FROM tasks WHERE id = ?1", [id])
            .map_err(pa_sqlite::Error::Rusqlite)?,
        )
      })
      .await?;
    if affected == 0 {
      return Err(StoreError::NotFound);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{NewTemplate, ParamDef, ParamType};
  use crate::store::Store;

  async fn setup_with_template(store: &Store) -> String {
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
    template.id
  }

  fn new_task(template_id: &str, name: &str) -> NewTask {
    NewTask {
      template_id: template_id.to_string(),
      name: name.to_string(),
      description: None,
      params: serde_json::json!({"n": 1}).as_object().unwrap().clone(),
      schedule_type: ScheduleType::Cron,
      schedule_value: "* * * * *".into(),
      credentials: vec![],
      enabled: true,
    }
  }

  #[tokio::test]
  async fn create_get_and_list_round_trip() {
    let store = Store::open_in_memory().await.unwrap();
    let template_id = setup_with_template(&store).await;

    let created = store.tasks().create(new_task(&template_id, "job")).await.unwrap();
    assert!(created.enabled);
    assert!(created.next_run_at.is_none());

    let fetched = store.tasks().get(created.id).await.unwrap().unwrap();
    assert_eq!(fetched.name, "job");

    let by_name = store.tasks().get_by_name("job").await.unwrap().unwrap();
    assert_eq!(by_name.id, created.id);

    let listed = store
      .tasks()
      .list(TaskFilter {
        enabled: Some(true),
        template_id: None,
        has_errors_last_24h: None,
      })
      .await
      .unwrap();
    assert_eq!(listed.len(), 1);

    let by_template = store
      .tasks()
      .list(TaskFilter {
        enabled: None,
        template_id: Some(template_id),
        has_errors_last_24h: None,
      })
      .await
      .unwrap();
    assert_eq!(by_template.len(), 1);
  }

  #[tokio::test]
  async fn unknown_template_is_a_foreign_key_violation() {
    let store = Store::open_in_memory().await.unwrap();
    let err = store.tasks().create(new_task("missing-template", "job")).await.unwrap_err();
    assert!(matches!(err, StoreError::ForeignKeyViolation(_)));
  }

  #[tokio::test]
  async fn toggle_enabled_flips_and_persists() {
    let store = Store::open_in_memory().await.unwrap();
    let template_id = setup_with_template(&store).await;
    let created = store.tasks().create(new_task(&template_id, "job")).await.unwrap();
    assert!(created.enabled);

    let toggled = store.tasks().toggle_enabled(created.id).await.unwrap();
    assert!(!toggled.enabled);

    let toggled_again = store.tasks().toggle_enabled(created.id).await.unwrap();
    assert!(toggled_again.enabled);
  }

  #[tokio::test]
  async fn get_due_to_run_respects_enabled_and_next_run_at() {
    let store = Store::open_in_memory().await.unwrap();
    let template_id = setup_with_template(&store).await;
    let created = store.tasks().create(new_task(&template_id, "job")).await.unwrap();

    let past = Utc::now() - chrono::Duration::minutes(5);
    store.tasks().set_next_run_at(created.id, Some(past)).await.unwrap();

    let due = store.tasks().get_due_to_run(Utc::now()).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, created.id);

    store.tasks().toggle_enabled(created.id).await.unwrap();
    let due_after_disable = store.tasks().get_due_to_run(Utc::now()).await.unwrap();
    assert!(due_after_disable.is_empty());
  }

  #[tokio::test]
  async fn disable_and_clear_next_run_implements_one_shot_semantics() {
    let store = Store::open_in_memory().await.unwrap();
    let template_id = setup_with_template(&store).await;
    let created = store.tasks().create(new_task(&template_id, "job")).await.unwrap();
    store
      .tasks()
      .set_next_run_at(created.id, Some(Utc::now()))
      .await
      .unwrap();

    store.tasks().disable_and_clear_next_run(created.id).await.unwrap();

    let reloaded = store.tasks().get(created.id).await.unwrap().unwrap();
    assert!(!reloaded.enabled);
    assert!(reloaded.next_run_at.is_none());
  }

  #[tokio::test]
  async fn delete_cascades_to_executions() {
    let store = Store::open_in_memory().await.unwrap();
    let template_id = setup_with_template(&store).await;
    let created = store.tasks().create(new_task(&template_id, "job")).await.unwrap();
    let execution_id = store
      .executions()
      .create_running(created.id, Utc::now())
      .await
      .unwrap();

    store.tasks().delete(created.id).await.unwrap();

    assert!(store.executions().get(execution_id).await.unwrap().is_none());
    let err = store.tasks().delete(created.id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
  }

  #[tokio::test]
  async fn has_errors_last_24h_filter_splits_tasks() {
    let store = Store::open_in_memory().await.unwrap();
    let template_id = setup_with_template(&store).await;
    let failing = store.tasks().create(new_task(&template_id, "failing")).await.unwrap();
    let clean = store.tasks().create(new_task(&template_id, "clean")).await.unwrap();

    let execution_id = store
      .executions()
      .create_running(failing.id, Utc::now())
      .await
      .unwrap();
    store
      .executions()
      .finish(
        execution_id,
        Utc::now(),
        crate::models::ExecutionStatus::Failed,
        None,
        Some("boom".into()),
        5,
      )
      .await
      .unwrap();

    let with_errors = store
      .tasks()
      .list(TaskFilter {
        enabled: None,
        template_id: None,
        has_errors_last_24h: Some(true),
      })
      .await
      .unwrap();
    assert_eq!(with_errors.iter().map(|t| t.id).collect::<Vec<_>>(), vec![failing.id]);

    let without_errors = store
      .tasks()
      .list(TaskFilter {
        enabled: None,
        template_id: None,
        has_errors_last_24h: Some(false),
      })
      .await
      .unwrap();
    assert_eq!(without_errors.iter().map(|t| t.id).collect::<Vec<_>>(), vec![clean.id]);
  }
}
