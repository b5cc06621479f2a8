use std::sync::{Arc, Mutex};

fn now_iso8601() -> String {
  chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
  Log,
  Warn,
  Error,
  Info,
  Debug,
}

impl Severity {
  fn as_str(&self) -> &'static str {
    match self {
      Severity::Log => "LOG",
      Severity::Warn => "WARN",
      Severity::Error => "ERROR",
      Severity::Info => "INFO",
      Severity::Debug => "DEBUG",
    }
  }
}

const TRUNCATION_SENTINEL: &str = "[OUTPUT TRUNCATED - exceeded maximum size]";

/// Lock-free-from-the-caller's-perspective append buffer shared between the isolate's registered
/// console functions and the harness that eventually reads it back. Truncation is sticky: once
/// the running byte total would exceed the configured bound, every subsequent call is a no-op.
#[derive(Clone)]
pub struct ConsoleCapture {
  inner: Arc<Mutex<Inner>>,
}

struct Inner {
  lines: Vec<String>,
  total_bytes: usize,
  max_bytes: usize,
  truncated: bool,
}

impl ConsoleCapture {
  pub fn new(max_bytes: usize) -> Self {
    Self {
      inner: Arc::new(Mutex::new(Inner {
        lines: Vec::new(),
        total_bytes: 0,
        max_bytes,
        truncated: false,
      })),
    }
  }

  pub fn push(&self, severity: Severity, args: &[serde_json::Value]) {
    let formatted = args
      .iter()
      .map(format_arg)
      .collect::<Vec<_>>()
      .join(" ");
    let line = format!("[{}] [{}] {}", now_iso8601(), severity.as_str(), formatted);

    let mut inner = self.inner.lock().expect("console capture mutex poisoned");
    if inner.truncated {
      return;
    }
    if inner.total_bytes + line.len() > inner.max_bytes {
      inner.lines.push(TRUNCATION_SENTINEL.to_string());
      inner.truncated = true;
      return;
    }
    inner.total_bytes += line.len();
    inner.lines.push(line);
  }

  pub fn into_lines(self) -> Vec<String> {
    Arc::try_unwrap(self.inner)
      .map(|m| m.into_inner().expect("console capture mutex poisoned").lines)
      .unwrap_or_else(|arc| arc.lock().expect("console capture mutex poisoned").lines.clone())
  }
}

fn format_arg(value: &serde_json::Value) -> String {
  match value {
    serde_json::Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn truncation_is_sticky() {
    let capture = ConsoleCapture::new(10);
    capture.push(Severity::Log, &[serde_json::json!("first message")]);
    capture.push(Severity::Log, &[serde_json::json!("second")]);
    let lines = capture.into_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with(super::TRUNCATION_SENTINEL));
  }

  #[test]
  fn objects_are_json_stringified() {
    let capture = ConsoleCapture::new(10_000);
    capture.push(Severity::Info, &[serde_json::json!({"a": 1})]);
    let lines = capture.into_lines();
    assert!(lines[0].contains(r#"{"a":1}"#));
  }
}
