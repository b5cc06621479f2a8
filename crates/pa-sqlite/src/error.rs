#[derive(thiserror::Error, Debug)]
pub enum Error {
  #[error("Connection closed")]
  ConnectionClosed,

  /// Contains the [`crate::Connection`] so a failed close can be retried, plus the
  /// underlying error that made closing impossible.
  #[error("Close error: {1}")]
  Close(crate::connection::Connection, rusqlite::Error),

  #[error("Rusqlite error: {0}")]
  Rusqlite(#[from] rusqlite::Error),

  #[error("SerdeRusqlite error: {0}")]
  SerdeRusqlite(#[from] serde_rusqlite::Error),

  #[error("Other error: {0}")]
  Other(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}
