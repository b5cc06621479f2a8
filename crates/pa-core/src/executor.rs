use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use pa_sandbox::{CapabilitySet, SandboxError};
use pa_store::{ExecutionOutput, ExecutionStatus, Store};
use pa_vault::{CredentialInjector, Vault};

use crate::error::{CoreError, ErrorKind, Result};
use crate::settings::Settings;

/// What a call to `Executor::run` produced — always `Ok` once the task/template were found;
/// in-task failures (missing credential, sandbox throw, timeout) are reported through the
/// returned `ExecutionResult`, never as an `Err`, so a scheduler loop can advance `next_run_at`
/// regardless of how the run went (spec §4.2 "Failure semantics").
pub struct ExecutionResult {
  pub success: bool,
  pub execution: pa_store::Execution,
  pub output: Option<ExecutionOutput>,
  pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
  pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PreflightReport {
  pub valid: bool,
  pub errors: Vec<String>,
  pub warnings: Vec<String>,
}

/// Runs a template body with a task's params and decrypted credentials, bounded in time and
/// output size, and persists the resulting execution row. See spec §4.2.
pub struct Executor {
  store: Arc<Store>,
  vault: Arc<Vault>,
  settings: Arc<Settings>,
}

impl Executor {
  pub fn new(store: Arc<Store>, vault: Arc<Vault>, settings: Arc<Settings>) -> Self {
    Self {
      store,
      vault,
      settings,
    }
  }

  pub async fn run(&self, task_id: i64, opts: RunOptions) -> Result<ExecutionResult> {
    let task = self
      .store
      .tasks()
      .get(task_id)
      .await?
      .ok_or_else(|| CoreError::new(ErrorKind::ValidationError, format!("unknown task {task_id}")))?;
    let template = self
      .store
      .templates()
      .get(&task.template_id)
      .await?
      .ok_or_else(|| {
        CoreError::new(
          ErrorKind::ValidationError,
          format!("unknown template {}", task.template_id),
        )
      })?;

    let started_at = Utc::now();
    let execution_id = self.store.executions().create_running(task.id, started_at).await?;

    let required_names: Vec<String> = template
      .required_credentials
      .iter()
      .cloned()
      .chain(task.credentials.iter().cloned())
      .collect();

    let injector = CredentialInjector::new(&self.vault, &self.store);
    let resolved = match injector.resolve(&required_names).await {
      Ok(resolved) => resolved,
      Err(err) => {
        return self
          .close_with_failure(execution_id, task.id, task.next_run_at, started_at, err.to_string())
          .await;
      }
    };

    let deadline = self.settings.effective_timeout(opts.timeout_ms);
    let capabilities = CapabilitySet::new(self.settings.allowed_capabilities.iter().copied());
    let params_value = serde_json::Value::Object(task.params.clone());
    let credentials_map: HashMap<String, String> = resolved
      .iter()
      .map(|(name, value)| (name.clone(), value.to_string()))
      .collect();

    let outcome = pa_sandbox::run(
      template.code.clone(),
      params_value,
      credentials_map,
      capabilities,
      self.settings.max_console_output_size,
      deadline,
    )
    .await;

    pa_vault::clear(resolved);

    let finished_at = Utc::now();
    let duration_ms = (finished_at - started_at).num_milliseconds();

    let (status, output, error) = match outcome.result {
      Ok(value) => (
        ExecutionStatus::Success,
        Some(ExecutionOutput {
          console: outcome.console,
          result: value,
        }),
        None,
      ),
      Err(SandboxError::Timeout(ms)) => (
        ExecutionStatus::Timeout,
        Some(ExecutionOutput {
          console: outcome.console,
          result: serde_json::Value::Null,
        }),
        Some(format!("Execution timed out after {ms}ms")),
      ),
      Err(other) => (
        ExecutionStatus::Failed,
        Some(ExecutionOutput {
          console: outcome.console,
          result: serde_json::Value::Null,
        }),
        Some(other.to_string()),
      ),
    };

    // Close the execution row and stamp the task's last_run_at as one atomic write (spec §4.2
    // step 10 / §8 properties 4-6): a crash between the two would otherwise leave an execution
    // closed while its task's last_run_at never advances.
    self
      .store
      .close_execution_and_stamp_task(
        execution_id,
        task.id,
        finished_at,
        status,
        output.clone(),
        error.clone(),
        duration_ms,
        task.next_run_at,
      )
      .await?;

    let execution = self
      .store
      .executions()
      .get(execution_id)
      .await?
      .ok_or_else(|| CoreError::new(ErrorKind::IoError, "execution vanished after finish"))?;

    Ok(ExecutionResult {
      success: matches!(status, ExecutionStatus::Success),
      execution,
      output,
      error,
    })
  }

  /// Step 4's failure path: close the execution as `failed` without ever invoking the sandbox,
  /// and without attempting to decrypt anything further (spec §4.2 step 4 / S5).
  async fn close_with_failure(
    &self,
    execution_id: i64,
    task_id: i64,
    next_run_at: Option<chrono::DateTime<Utc>>,
    started_at: chrono::DateTime<Utc>,
    message: String,
  ) -> Result<ExecutionResult> {
    let finished_at = Utc::now();
    let duration_ms = (finished_at - started_at).num_milliseconds();

    self
      .store
      .close_execution_and_stamp_task(
        execution_id,
        task_id,
        finished_at,
        ExecutionStatus::Failed,
        None,
        Some(message.clone()),
        duration_ms,
        next_run_at,
      )
      .await?;

    let execution = self
      .store
      .executions()
      .get(execution_id)
      .await?
      .ok_or_else(|| CoreError::new(ErrorKind::IoError, "execution vanished after finish"))?;

    Ok(ExecutionResult {
      success: false,
      execution,
      output: None,
      error: Some(message),
    })
  }

  /// Validate a task can run without actually running it: presence/type checks on params,
  /// presence-only (no decrypt) checks on credentials. No execution row is created.
  pub async fn preflight(&self, task_id: i64) -> Result<PreflightReport> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let task = match self.store.tasks().get(task_id).await? {
      Some(task) => task,
      None => {
        errors.push(format!("unknown task {task_id}"));
        return Ok(PreflightReport {
          valid: false,
          errors,
          warnings,
        });
      }
    };

    let template = match self.store.templates().get(&task.template_id).await? {
      Some(template) => template,
      None => {
        errors.push(format!("unknown template {}", task.template_id));
        return Ok(PreflightReport {
          valid: false,
          errors,
          warnings,
        });
      }
    };

    if !task.enabled {
      warnings.push("task is disabled".to_string());
    }

    for param in &template.params_schema {
      match task.params.get(&param.name) {
        Some(value) if !param.param_type.matches(value) => {
          errors.push(format!("param '{}' does not match declared type", param.name));
        }
        None if param.required && param.default.is_none() => {
          errors.push(format!("missing required param '{}'", param.name));
        }
        _ => {}
      }
    }

    let required_names: Vec<String> = template
      .required_credentials
      .iter()
      .cloned()
      .chain(task.credentials.iter().cloned())
      .collect();
    let injector = CredentialInjector::new(&self.vault, &self.store);
    if let Err(err) = injector.validate(&required_names).await {
      errors.push(err.to_string());
    }

    Ok(PreflightReport {
      valid: errors.is_empty(),
      errors,
      warnings,
    })
  }
}
