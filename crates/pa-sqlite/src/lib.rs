//! A minimal async wrapper around `rusqlite`: every [`Connection`] owns a dedicated writer
//! thread, and all access is proxied through channels. This is the building block the `pa-store`
//! crate layers its schema and invariants on top of.

mod connection;
mod error;
mod params;
mod rows;

pub use connection::Connection;
pub use error::Error;
pub use params::{Params, ToSqlType};
pub use rows::{Row, Rows, ValueType};

pub type Result<T> = std::result::Result<T, Error>;
