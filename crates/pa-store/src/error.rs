/// Storage-layer error taxonomy. Callers above this crate (the Executor, the Scheduler, the
/// HTTP layer) translate these into the engine-wide `ErrorKind` taxonomy from spec §7.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
  #[error("not found")]
  NotFound,

  #[error("unique violation: {0}")]
  UniqueViolation(String),

  #[error("foreign key violation: {0}")]
  ForeignKeyViolation(String),

  #[error("schema mismatch: {0}")]
  SchemaMismatch(String),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] pa_sqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("migration error: {0}")]
  Migration(#[from] refinery::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Inspect a raw rusqlite error surfaced through [`pa_sqlite::Error`] and reclassify it as a
/// [`StoreError::UniqueViolation`] / [`StoreError::ForeignKeyViolation`] when applicable, instead
/// of leaking the SQLite-specific error code to callers.
pub(crate) fn classify(err: pa_sqlite::Error, context: &str) -> StoreError {
  if let pa_sqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(sqlite_err, _)) = &err {
    match sqlite_err.code {
      rusqlite::ErrorCode::ConstraintViolation => {
        let msg = err.to_string();
        if msg.contains("FOREIGN KEY") {
          return StoreError::ForeignKeyViolation(context.to_string());
        }
        return StoreError::UniqueViolation(context.to_string());
      }
      _ => {}
    }
  }
  StoreError::Sqlite(err)
}
