//! Thin `axum` adapter over [`crate::app_state::AppState`] — the HTTP/JSON control plane spec
//! §6.3 describes as the shape external collaborators (the browser UI, the MCP adapter) consume.
//! No business logic lives here; every handler is a few lines translating a request into a
//! Store/Scheduler/Executor call, mirroring the teacher's admin handler modules
//! (`crates/core/src/admin/rows/insert_row.rs`): one file per resource, one function per route.

mod credentials;
mod executions;
mod status;
mod tasks;
mod templates;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Builds the full `/api/...` router described in spec §6.3 / §4.7.
pub fn router() -> Router<AppState> {
  Router::new()
    .route("/api/status", get(status::status_handler))
    .route(
      "/api/templates",
      get(templates::list_templates_handler).post(templates::create_template_handler),
    )
    .route(
      "/api/templates/{id}",
      get(templates::get_template_handler)
        .put(templates::update_template_handler)
        .delete(templates::delete_template_handler),
    )
    .route(
      "/api/tasks",
      get(tasks::list_tasks_handler).post(tasks::create_task_handler),
    )
    .route(
      "/api/tasks/{id}",
      get(tasks::get_task_handler)
        .put(tasks::update_task_handler)
        .delete(tasks::delete_task_handler),
    )
    .route("/api/tasks/{id}/toggle", post(tasks::toggle_task_handler))
    .route("/api/tasks/{id}/execute", post(tasks::execute_task_handler))
    .route("/api/tasks/{id}/preflight", get(tasks::preflight_task_handler))
    .route("/api/executions", get(executions::list_executions_handler))
    .route("/api/executions/{id}", get(executions::get_execution_handler))
    .route(
      "/api/credentials",
      get(credentials::list_credentials_handler).post(credentials::create_credential_handler),
    )
    .route("/api/credentials/{id}", delete(credentials::delete_credential_handler))
    .route(
      "/api/credentials/{name}/value",
      put(credentials::set_credential_value_handler).delete(credentials::clear_credential_value_handler),
    )
    .layer(TraceLayer::new_for_http())
}
