#[derive(thiserror::Error, Debug)]
pub enum SandboxError {
  #[error("Module '{0}' is not allowed")]
  ModuleNotAllowed(String),

  #[error("script threw: {0}")]
  Throw(String),

  #[error("execution timed out after {0}ms")]
  Timeout(u64),

  #[error("sandbox worker failed to start: {0}")]
  StartupFailed(String),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
