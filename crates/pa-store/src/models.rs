use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single parameter a template expects, per spec §3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParamDef {
  pub name: String,
  #[serde(rename = "type")]
  pub param_type: ParamType,
  pub required: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
  String,
  Number,
  Boolean,
}

impl ParamType {
  /// Does `value` conform to this param's declared type?
  pub fn matches(&self, value: &serde_json::Value) -> bool {
    match self {
      ParamType::String => value.is_string(),
      ParamType::Number => value.is_number(),
      ParamType::Boolean => value.is_boolean(),
    }
  }
}

/// An immutable script artifact. See spec §3 "Template".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
  pub id: String,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
  pub code: String,
  pub params_schema: Vec<ParamDef>,
  pub required_credentials: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub suggested_schedule: Option<String>,
  pub is_builtin: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// A new template to be inserted. `id`/timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewTemplate {
  pub name: String,
  pub description: Option<String>,
  pub category: Option<String>,
  pub code: String,
  pub params_schema: Vec<ParamDef>,
  pub required_credentials: Vec<String>,
  pub suggested_schedule: Option<String>,
  pub is_builtin: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
  Cron,
  Once,
  Interval,
}

/// A scheduled instance of a template. See spec §3 "Task".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
  pub id: i64,
  pub template_id: String,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  pub params: serde_json::Map<String, serde_json::Value>,
  pub schedule_type: ScheduleType,
  pub schedule_value: String,
  pub credentials: Vec<String>,
  pub enabled: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_run_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub next_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewTask {
  pub template_id: String,
  pub name: String,
  pub description: Option<String>,
  pub params: serde_json::Map<String, serde_json::Value>,
  pub schedule_type: ScheduleType,
  pub schedule_value: String,
  pub credentials: Vec<String>,
  pub enabled: bool,
}

/// Partial update for a task. `None` means "leave unchanged".
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
  pub name: Option<String>,
  pub description: Option<Option<String>>,
  pub params: Option<serde_json::Map<String, serde_json::Value>>,
  pub schedule_type: Option<ScheduleType>,
  pub schedule_value: Option<String>,
  pub credentials: Option<Vec<String>>,
  pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
  Running,
  Success,
  Failed,
  Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutput {
  pub console: Vec<String>,
  pub result: serde_json::Value,
}

/// One past or in-progress run of a task. See spec §3 "Execution".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
  pub id: i64,
  pub task_id: i64,
  pub started_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<DateTime<Utc>>,
  pub status: ExecutionStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<ExecutionOutput>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
  pub task_id: Option<i64>,
  pub status: Option<ExecutionStatus>,
  pub start_date_from: Option<DateTime<Utc>>,
  pub start_date_to: Option<DateTime<Utc>>,
  pub limit: i64,
  pub offset: i64,
}

impl Default for ExecutionStatus {
  fn default() -> Self {
    ExecutionStatus::Running
  }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
  ApiKey,
  OauthToken,
  EnvVar,
  Secret,
}

/// Secret metadata. The encrypted value, when present, lives in a separate column/accessor so
/// listing never touches ciphertext. See spec §3 "Credential".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
  pub id: i64,
  pub name: String,
  #[serde(rename = "type")]
  pub credential_type: CredentialType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  pub has_value: bool,
  pub created_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewCredential {
  pub name: String,
  pub credential_type: CredentialType,
  pub description: Option<String>,
  pub encrypted_value: Option<String>,
}
