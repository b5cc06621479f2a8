//! Wires the store, vault, sandbox and cron crates into the running engine: the [`Scheduler`]
//! that turns schedules into timed fires, the [`Executor`] that runs one task, and the `axum`
//! [`http::router`] the CLI binary serves. See spec §2 "System Overview".

mod app_state;
mod error;
mod executor;
mod http;
mod scheduler;
mod settings;

pub use app_state::AppState;
pub use error::{CoreError, ErrorKind, Result};
pub use executor::{ExecutionResult, Executor, PreflightReport, RunOptions};
pub use http::router;
pub use scheduler::Scheduler;
pub use settings::{ConfigError, Settings};
