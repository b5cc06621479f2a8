use std::path::Path;

use chrono::{DateTime, Utc};

use crate::credentials::Credentials;
use crate::executions::{status_str, Executions};
use crate::migrations;
use crate::models::{ExecutionOutput, ExecutionStatus};
use crate::tasks::Tasks;
use crate::templates::Templates;
use crate::Result;

/// Entry point into durable state. One `Store` per process, backed by one dedicated writer
/// thread (see `pa_sqlite::Connection`). Sub-namespaces borrow the same connection, so a
/// `templates()`/`tasks()`/`executions()`/`credentials()` call never contends with another for a
/// second connection — they all funnel through the one writer.
pub struct Store {
  conn: pa_sqlite::Connection,
}

impl Store {
  /// Open (creating if absent) the SQLite database at `data_dir/personal-automator.db`, run
  /// pending migrations, and set the pragmas the schema relies on: WAL for concurrent readers,
  /// foreign keys on (SQLite leaves them off by default) for the executions cascade.
  pub async fn open(data_dir: &Path) -> Result<Self> {
    std::fs::create_dir_all(data_dir).map_err(|e| {
      crate::error::StoreError::Sqlite(pa_sqlite::Error::Other(Box::new(e)))
    })?;
    let db_path = data_dir.join("personal-automator.db");

    let conn = pa_sqlite::Connection::from_conn(
      rusqlite::Connection::open(&db_path).map_err(pa_sqlite::Error::Rusqlite)?,
    )
    .await?;

    conn
      .call(|conn| {
        conn
          .execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
          .map_err(pa_sqlite::Error::Rusqlite)?;
        migrations::apply(conn).map_err(|e| {
          pa_sqlite::Error::Other(Box::new(e))
        })?;
        Ok(())
      })
      .await?;

    Ok(Self { conn })
  }

  /// In-memory store for tests: migrations still run, pragmas still set.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = pa_sqlite::Connection::open_in_memory().await?;
    conn
      .call(|conn| {
        conn
          .execute_batch("PRAGMA foreign_keys = ON;")
          .map_err(pa_sqlite::Error::Rusqlite)?;
        migrations::apply(conn).map_err(|e| pa_sqlite::Error::Other(Box::new(e)))?;
        Ok(())
      })
      .await?;
    Ok(Self { conn })
  }

  pub fn templates(&self) -> Templates<'_> {
    Templates { conn: &self.conn }
  }

  pub fn tasks(&self) -> Tasks<'_> {
    Tasks { conn: &self.conn }
  }

  pub fn executions(&self) -> Executions<'_> {
    Executions { conn: &self.conn }
  }

  pub fn credentials(&self) -> Credentials<'_> {
    Credentials { conn: &self.conn }
  }

  /// Run `function` inside a single SQLite transaction, committing on `Ok` and rolling back on
  /// `Err`. Used where the Executor must stamp a task's `last_run_at` and close its execution
  /// row as one atomic unit (spec §8 properties 4/5).
  pub async fn transaction<F, R>(&self, function: F) -> Result<R>
  where
    F: FnOnce(&rusqlite::Transaction) -> rusqlite::Result<R> + Send + 'static,
    R: Send + 'static,
  {
    self
      .conn
      .transaction(move |tx| function(tx).map_err(pa_sqlite::Error::Rusqlite))
      .await
      .map_err(crate::error::StoreError::from)
  }

  /// Close an execution row and stamp the owning task's `last_run_at` (preserving whatever
  /// `next_run_at` the caller passes — the Scheduler, not the Executor, owns advancing it) as one
  /// atomic unit. This is spec §4.1/§8's named example of a compound write that must be
  /// transactional: a crash between the two writes would otherwise leave an execution closed as
  /// `success`/`failed`/`timeout` while its task's `last_run_at` is never stamped.
  #[allow(clippy::too_many_arguments)]
  pub async fn close_execution_and_stamp_task(
    &self,
    execution_id: i64,
    task_id: i64,
    finished_at: DateTime<Utc>,
    status: ExecutionStatus,
    output: Option<ExecutionOutput>,
    error: Option<String>,
    duration_ms: i64,
    next_run_at: Option<DateTime<Utc>>,
  ) -> Result<()> {
    let output_json = output.map(|o| serde_json::to_string(&o)).transpose()?;
    let status_s = status_str(status);
    let finished_at_s = finished_at.to_rfc3339();
    let next_run_at_s = next_run_at.map(|t| t.to_rfc3339());

    self
      .transaction(move |tx| {
        tx.execute(
          "UPDATE executions SET finished_at = ?2, status = ?3, output = ?4, error = ?5, \
           duration_ms = ?6 WHERE id = ?1",
          rusqlite::params![execution_id, finished_at_s, status_s, output_json, error, duration_ms],
        )?;
        tx.execute(
          "UPDATE tasks SET last_run_at = ?2, next_run_at = ?3 WHERE id = ?1",
          rusqlite::params![task_id, finished_at_s, next_run_at_s],
        )?;
        Ok(())
      })
      .await
  }
}
