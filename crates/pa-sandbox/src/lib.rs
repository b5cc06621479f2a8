//! Capability-gated JavaScript sandbox for running template bodies: params and credentials go
//! in, a captured console and a result value come out, bounded by a deadline the template code
//! cannot suppress.

mod capability;
mod console;
mod error;
mod runtime;

pub use capability::{Capability, CapabilitySet};
pub use console::Severity;
pub use error::{Result, SandboxError};
pub use runtime::{run, SandboxOutcome};

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;
  use std::time::Duration;

  #[tokio::test]
  async fn simple_expression_returns_value() {
    let outcome = run(
      "return params.n + 1;".to_string(),
      serde_json::json!({"n": 41}),
      HashMap::new(),
      CapabilitySet::full(),
      64 * 1024,
      Duration::from_secs(5),
    )
    .await;

    assert_eq!(outcome.result.unwrap(), serde_json::json!(42));
  }

  #[tokio::test]
  async fn disallowed_capability_fails_at_resolution() {
    let outcome = run(
      "require('http'); return 1;".to_string(),
      serde_json::json!({}),
      HashMap::new(),
      CapabilitySet::new([Capability::Params]),
      64 * 1024,
      Duration::from_secs(5),
    )
    .await;

    assert!(matches!(outcome.result, Err(SandboxError::ModuleNotAllowed(ref m)) if m == "http"));
  }

  // S6 — a module name not in the capability table at all is rejected the same as a withheld one.
  #[tokio::test]
  async fn unrecognized_module_name_fails() {
    let outcome = run(
      "require('net'); return 1;".to_string(),
      serde_json::json!({}),
      HashMap::new(),
      CapabilitySet::full(),
      64 * 1024,
      Duration::from_secs(5),
    )
    .await;

    assert_eq!(outcome.result.unwrap_err().to_string(), "Module 'net' is not allowed");
  }

  #[tokio::test]
  async fn allowed_capability_resolves_without_throwing() {
    let outcome = run(
      "const http = require('http'); return typeof http;".to_string(),
      serde_json::json!({}),
      HashMap::new(),
      CapabilitySet::full(),
      64 * 1024,
      Duration::from_secs(5),
    )
    .await;

    assert_eq!(outcome.result.unwrap(), serde_json::json!("object"));
  }

  #[tokio::test]
  async fn long_running_script_times_out() {
    let outcome = run(
      "while (true) {}".to_string(),
      serde_json::json!({}),
      HashMap::new(),
      CapabilitySet::full(),
      64 * 1024,
      Duration::from_millis(200),
    )
    .await;

    assert!(matches!(
      outcome.result,
      Err(SandboxError::Timeout(_))
    ));
  }
}
