use crossbeam_channel::{Receiver, Sender};
use std::fmt::{self, Debug};
use tokio::sync::oneshot;

use crate::error::Error;
pub use crate::params::Params;
pub use crate::rows::{Row, Rows};

/// The result type returned by every method on [`Connection`].
pub type Result<T> = std::result::Result<T, Error>;

type CallFn = Box<dyn FnOnce(&mut rusqlite::Connection) + Send + 'static>;

enum Message {
  Run(CallFn),
  Close(oneshot::Sender<std::result::Result<(), rusqlite::Error>>),
}

/// A handle to a SQLite connection that lives on a single dedicated writer thread.
///
/// `rusqlite::Connection` is `!Send` across awaits in practice once statements are cached, so
/// every access is proxied through a channel to the thread that owns the connection. This is the
/// single-writer model the rest of the engine relies on: all mutating access to a given SQLite
/// file funnels through one `Connection`, serializing writers while readers stay lock-free at
/// the call layer (SQLite itself still allows concurrent readers under WAL).
#[derive(Clone)]
pub struct Connection {
  sender: Sender<Message>,
}

impl Connection {
  /// Wrap an already-open `rusqlite::Connection`, spawning its dedicated writer thread.
  pub async fn from_conn(conn: rusqlite::Connection) -> Result<Self> {
    start(move || Ok(conn)).await
  }

  /// Open a new in-memory SQLite database. Useful for tests.
  pub async fn open_in_memory() -> Result<Self> {
    start(rusqlite::Connection::open_in_memory).await
  }

  /// Run an arbitrary closure against the connection on its owning thread and await the result.
  pub async fn call<F, R>(&self, function: F) -> Result<R>
  where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R> + 'static + Send,
    R: Send + 'static,
  {
    let (sender, receiver) = oneshot::channel::<Result<R>>();

    self
      .sender
      .send(Message::Run(Box::new(move |conn| {
        let value = function(conn);
        let _ = sender.send(value);
      })))
      .map_err(|_| Error::ConnectionClosed)?;

    receiver.await.map_err(|_| Error::ConnectionClosed)?
  }

  pub async fn query(&self, sql: &str, params: impl Params + Send + 'static) -> Result<Rows> {
    let sql = sql.to_string();
    self
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        params.bind(&mut stmt)?;
        let rows = stmt.raw_query();
        Ok(Rows::from_rows(rows)?)
      })
      .await
  }

  pub async fn query_row(
    &self,
    sql: &str,
    params: impl Params + Send + 'static,
  ) -> Result<Option<Row>> {
    let sql = sql.to_string();
    self
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        params.bind(&mut stmt)?;
        let mut rows = stmt.raw_query();
        if let Some(row) = rows.next()? {
          return Ok(Some(Row::from_row(row, None)?));
        }
        Ok(None)
      })
      .await
  }

  pub async fn query_value<T: serde::de::DeserializeOwned + Send + 'static>(
    &self,
    sql: &str,
    params: impl Params + Send + 'static,
  ) -> Result<Option<T>> {
    let sql = sql.to_string();
    self
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        params.bind(&mut stmt)?;
        let mut rows = stmt.raw_query();
        if let Some(row) = rows.next()? {
          return Ok(Some(serde_rusqlite::from_row(row)?));
        }
        Ok(None)
      })
      .await
  }

  pub async fn query_values<T: serde::de::DeserializeOwned + Send + 'static>(
    &self,
    sql: &str,
    params: impl Params + Send + 'static,
  ) -> Result<Vec<T>> {
    let sql = sql.to_string();
    self
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        params.bind(&mut stmt)?;
        let mut rows = stmt.raw_query();

        let mut values = vec![];
        while let Some(row) = rows.next()? {
          values.push(serde_rusqlite::from_row(row)?);
        }
        Ok(values)
      })
      .await
  }

  /// Execute a single SQL statement, returning the number of affected rows.
  pub async fn execute(&self, sql: &str, params: impl Params + Send + 'static) -> Result<usize> {
    let sql = sql.to_string();
    self
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        params.bind(&mut stmt)?;
        Ok(stmt.raw_execute()?)
      })
      .await
  }

  /// Execute a closure as a single SQLite transaction (`BEGIN` / `COMMIT` / `ROLLBACK`).
  ///
  /// Any compound Store operation that must be atomic (`pa_store::Store::close_execution_and_
  /// stamp_task` closing an execution while stamping the owning task, for instance) goes through
  /// this rather than a sequence of independent `call`s.
  pub async fn transaction<F, R>(&self, function: F) -> Result<R>
  where
    F: FnOnce(&rusqlite::Transaction<'_>) -> Result<R> + 'static + Send,
    R: Send + 'static,
  {
    self
      .call(move |conn| {
        let tx = conn.transaction()?;
        let result = function(&tx);
        match result {
          Ok(value) => {
            tx.commit()?;
            Ok(value)
          }
          Err(err) => {
            let _ = tx.rollback();
            Err(err)
          }
        }
      })
      .await
  }

  pub async fn close(self) -> Result<()> {
    let (sender, receiver) = oneshot::channel::<std::result::Result<(), rusqlite::Error>>();

    if let Err(crossbeam_channel::SendError(_)) = self.sender.send(Message::Close(sender)) {
      return Ok(());
    }

    let Ok(result) = receiver.await else {
      return Ok(());
    };

    result.map_err(|e| Error::Close(self, e))
  }
}

impl Debug for Connection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Connection").finish()
  }
}

async fn start<F>(open: F) -> Result<Connection>
where
  F: FnOnce() -> rusqlite::Result<rusqlite::Connection> + Send + 'static,
{
  let (sender, receiver) = crossbeam_channel::unbounded::<Message>();
  let (result_sender, result_receiver) = oneshot::channel();

  std::thread::spawn(move || {
    let conn = match open() {
      Ok(c) => c,
      Err(e) => {
        let _ = result_sender.send(Err(e));
        return;
      }
    };

    if result_sender.send(Ok(())).is_err() {
      return;
    }

    event_loop(conn, receiver);
  });

  result_receiver
    .await
    .expect(BUG_TEXT)
    .map(|_| Connection { sender })
    .map_err(Error::Rusqlite)
}

fn event_loop(mut conn: rusqlite::Connection, receiver: Receiver<Message>) {
  while let Ok(message) = receiver.recv() {
    match message {
      Message::Run(f) => f(&mut conn),
      Message::Close(s) => {
        match conn.close() {
          Ok(()) => s.send(Ok(())).expect(BUG_TEXT),
          Err((_conn, e)) => s.send(Err(e)).expect(BUG_TEXT),
        };
        return;
      }
    }
  }
}

const BUG_TEXT: &str = "bug in pa-sqlite, please report";

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn open_in_memory_test() {
    let conn = Connection::open_in_memory().await.unwrap();
    assert!(conn.close().await.is_ok());
  }

  #[tokio::test]
  async fn call_success_test() {
    let conn = Connection::open_in_memory().await.unwrap();

    let result = conn
      .call(|conn| {
        Ok(conn.execute(
          "CREATE TABLE person(id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)",
          [],
        )?)
      })
      .await;

    assert_eq!(0, result.unwrap());
  }

  #[tokio::test]
  async fn call_failure_test() {
    let conn = Connection::open_in_memory().await.unwrap();

    let result = conn
      .call(|conn| Ok(conn.execute("not sql", [])?))
      .await;

    assert!(matches!(result, Err(Error::Rusqlite(_))));
  }

  #[tokio::test]
  async fn transaction_rolls_back_on_error() {
    let conn = Connection::open_in_memory().await.unwrap();
    conn
      .execute("CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT NOT NULL)", ())
      .await
      .unwrap();

    let result: Result<()> = conn
      .transaction(|tx| {
        tx.execute("INSERT INTO t(id, v) VALUES (1, 'a')", [])?;
        Err(Error::Other("boom".into()))
      })
      .await;
    assert!(result.is_err());

    let count: Option<i64> = conn
      .query_value("SELECT COUNT(*) FROM t", ())
      .await
      .unwrap();
    assert_eq!(count, Some(0));
  }

  #[tokio::test]
  async fn query_values_round_trip() {
    let conn = Connection::open_in_memory().await.unwrap();
    conn
      .execute("CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT NOT NULL)", ())
      .await
      .unwrap();
    conn
      .execute("INSERT INTO t(id, v) VALUES (1, 'a'), (2, 'b')", ())
      .await
      .unwrap();

    #[derive(Debug, serde::Deserialize, PartialEq)]
    struct T {
      id: i64,
      v: String,
    }

    let rows: Vec<T> = conn
      .query_values("SELECT id, v FROM t ORDER BY id", ())
      .await
      .unwrap();

    assert_eq!(
      rows,
      vec![
        T { id: 1, v: "a".into() },
        T { id: 2, v: "b".into() },
      ]
    );
  }
}
