use rusqlite::types::ToSqlOutput;
use rusqlite::{types, Result, Statement};

/// A strong typedef over SQLite-representable values so we can implement `From<Option<T>>`
/// without running into coherence issues with `rusqlite::ToSql`.
#[allow(missing_debug_implementations)]
pub enum ToSqlType {
  Borrowed(types::ValueRef<'static>),
  Owned(types::Value),
}

impl rusqlite::ToSql for ToSqlType {
  #[inline]
  fn to_sql(&self) -> Result<ToSqlOutput<'_>> {
    Ok(match *self {
      ToSqlType::Borrowed(v) => ToSqlOutput::Borrowed(v),
      ToSqlType::Owned(ref v) => ToSqlOutput::Borrowed(types::ValueRef::from(v)),
    })
  }
}

impl<T: ?Sized> From<&'static T> for ToSqlType
where
  &'static T: Into<types::ValueRef<'static>>,
{
  #[inline]
  fn from(t: &'static T) -> Self {
    ToSqlType::Borrowed(t.into())
  }
}

macro_rules! from_value(
    ($t:ty) => (
        impl From<$t> for ToSqlType {
            #[inline]
            fn from(t: $t) -> Self { ToSqlType::Owned(t.into())}
        }
        impl From<Option<$t>> for ToSqlType {
            #[inline]
            fn from(t: Option<$t>) -> Self {
                match t {
                    Some(t) => ToSqlType::Owned(t.into()),
                    None => ToSqlType::Owned(types::Value::Null),
                }
            }
        }
    )
);

from_value!(String);
from_value!(bool);
from_value!(i64);
from_value!(f64);
from_value!(Vec<u8>);
from_value!(types::Value);

impl<const N: usize> From<[u8; N]> for ToSqlType {
  fn from(t: [u8; N]) -> Self {
    ToSqlType::Owned(types::Value::Blob(t.into()))
  }
}

/// Binds a collection of values to a prepared statement.
pub trait Params {
  fn bind(self, stmt: &mut Statement<'_>) -> rusqlite::Result<()>;
}

impl Params for () {
  fn bind(self, _stmt: &mut Statement<'_>) -> rusqlite::Result<()> {
    Ok(())
  }
}

impl Params for Vec<(&str, types::Value)> {
  fn bind(self, stmt: &mut Statement<'_>) -> rusqlite::Result<()> {
    for (name, v) in self {
      if let Some(idx) = stmt.parameter_index(name)? {
        stmt.raw_bind_parameter(idx, v)?;
      }
    }
    Ok(())
  }
}

impl<const N: usize> Params for [(&str, ToSqlType); N] {
  fn bind(self, stmt: &mut Statement<'_>) -> rusqlite::Result<()> {
    for (name, v) in self {
      if let Some(idx) = stmt.parameter_index(name)? {
        stmt.raw_bind_parameter(idx, v)?;
      }
    }
    Ok(())
  }
}

impl<const N: usize> Params for [ToSqlType; N] {
  fn bind(self, stmt: &mut Statement<'_>) -> rusqlite::Result<()> {
    for (idx, p) in self.into_iter().enumerate() {
      stmt.raw_bind_parameter(idx + 1, p)?;
    }
    Ok(())
  }
}

impl<T, const N: usize> Params for [T; N]
where
  T: rusqlite::ToSql,
{
  fn bind(self, stmt: &mut Statement<'_>) -> rusqlite::Result<()> {
    for (idx, p) in self.into_iter().enumerate() {
      stmt.raw_bind_parameter(idx + 1, p)?;
    }
    Ok(())
  }
}

impl<T> Params for (T,)
where
  T: rusqlite::ToSql,
{
  fn bind(self, stmt: &mut Statement<'_>) -> rusqlite::Result<()> {
    stmt.raw_bind_parameter(1, self.0)
  }
}

/// Build a positional parameter array, converting each value via [`ToSqlType`].
#[macro_export]
macro_rules! params {
    () => {
        [] as [$crate::params::ToSqlType; 0]
    };
    ($($param:expr),+ $(,)?) => {
        [$(Into::<$crate::params::ToSqlType>::into($param)),+]
    };
}

/// Build a named parameter array, converting each value via [`ToSqlType`].
#[macro_export]
macro_rules! named_params {
    () => {
        [] as [(&str, $crate::params::ToSqlType); 0]
    };
    ($($param_name:literal: $param_val:expr),+ $(,)?) => {
        [$(($param_name as &str, Into::<$crate::params::ToSqlType>::into($param_val))),+]
    };
}
