use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// The taxonomy every crate-local error is translated into at the point it crosses into the
/// executor or the HTTP boundary. Mirrors the kinds enumerated in the error handling design, not
/// a 1:1 mapping of any single crate's error enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  ValidationError,
  CredentialError,
  ExecutionError,
  Timeout,
  ModuleNotAllowed,
  NotFound,
  Conflict,
  Integrity,
  CryptoError,
  IoError,
}

impl ErrorKind {
  fn status(&self) -> StatusCode {
    match self {
      ErrorKind::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
      ErrorKind::CredentialError => StatusCode::UNPROCESSABLE_ENTITY,
      ErrorKind::ExecutionError => StatusCode::INTERNAL_SERVER_ERROR,
      ErrorKind::Timeout => StatusCode::INTERNAL_SERVER_ERROR,
      ErrorKind::ModuleNotAllowed => StatusCode::UNPROCESSABLE_ENTITY,
      ErrorKind::NotFound => StatusCode::NOT_FOUND,
      ErrorKind::Conflict => StatusCode::CONFLICT,
      ErrorKind::Integrity => StatusCode::CONFLICT,
      ErrorKind::CryptoError => StatusCode::INTERNAL_SERVER_ERROR,
      ErrorKind::IoError => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

/// The engine-wide error type. Every crate-local error enum converts into this at the seam
/// (Executor, Scheduler, HTTP handlers) rather than leaking `StoreError`/`VaultError`/... up to
/// callers that shouldn't need to know which crate produced a failure.
#[derive(Debug, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
  pub kind: ErrorKind,
  pub message: String,
}

impl CoreError {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }
}

impl From<pa_store::StoreError> for CoreError {
  fn from(err: pa_store::StoreError) -> Self {
    let kind = match &err {
      pa_store::StoreError::NotFound => ErrorKind::NotFound,
      pa_store::StoreError::UniqueViolation(_) => ErrorKind::Conflict,
      pa_store::StoreError::ForeignKeyViolation(_) => ErrorKind::Integrity,
      pa_store::StoreError::SchemaMismatch(_) => ErrorKind::IoError,
      pa_store::StoreError::Sqlite(_) => ErrorKind::IoError,
      pa_store::StoreError::Json(_) => ErrorKind::ValidationError,
      pa_store::StoreError::Migration(_) => ErrorKind::IoError,
    };
    CoreError::new(kind, err.to_string())
  }
}

impl From<pa_vault::VaultError> for CoreError {
  fn from(err: pa_vault::VaultError) -> Self {
    let kind = match &err {
      pa_vault::VaultError::UnknownCredential(_) | pa_vault::VaultError::MissingValue(_) => {
        ErrorKind::CredentialError
      }
      pa_vault::VaultError::Store(_) => ErrorKind::IoError,
      _ => ErrorKind::CryptoError,
    };
    CoreError::new(kind, err.to_string())
  }
}

impl From<pa_cron::CronError> for CoreError {
  fn from(err: pa_cron::CronError) -> Self {
    CoreError::new(ErrorKind::ValidationError, err.to_string())
  }
}

impl From<pa_sandbox::SandboxError> for CoreError {
  fn from(err: pa_sandbox::SandboxError) -> Self {
    let kind = match &err {
      pa_sandbox::SandboxError::Timeout(_) => ErrorKind::Timeout,
      pa_sandbox::SandboxError::ModuleNotAllowed(_) => ErrorKind::ModuleNotAllowed,
      pa_sandbox::SandboxError::Throw(_) => ErrorKind::ExecutionError,
      pa_sandbox::SandboxError::StartupFailed(_) => ErrorKind::ExecutionError,
    };
    CoreError::new(kind, err.to_string())
  }
}

#[derive(Serialize)]
struct ErrorBody {
  error: String,
}

impl IntoResponse for CoreError {
  fn into_response(self) -> Response {
    (self.kind.status(), Json(ErrorBody { error: self.message })).into_response()
  }
}

pub type Result<T> = std::result::Result<T, CoreError>;
