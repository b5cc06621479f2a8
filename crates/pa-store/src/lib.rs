//! Durable state for the automation engine: templates, tasks, executions, and credential
//! metadata, backed by a single SQLite database under a dedicated writer thread (`pa_sqlite`).
//! Schema and invariants live in `migrations/`; this crate is the only thing allowed to touch
//! SQL directly — everything above it (the scheduler, the executor, the HTTP layer) goes through
//! [`Store`].

mod credentials;
mod error;
mod executions;
mod migrations;
mod models;
mod store;
mod tasks;
mod templates;

pub use credentials::Credentials;
pub use error::{StoreError, Result};
pub use executions::Executions;
pub use models::{
  Credential, CredentialType, Execution, ExecutionFilter, ExecutionOutput, ExecutionStatus,
  NewCredential, NewTask, NewTemplate, ParamDef, ParamType, ScheduleType, Task, TaskUpdate,
  Template,
};
pub use store::Store;
pub use tasks::{TaskFilter, Tasks};
pub use templates::Templates;
