use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustyscript::{json_args, Module, Runtime, RuntimeOptions};

use crate::capability::{Capability, CapabilitySet};
use crate::console::{ConsoleCapture, Severity};
use crate::error::{Result, SandboxError};

/// Set the moment a withheld capability is touched, so the caller can translate the resulting
/// `rustyscript` throw into a real [`SandboxError::ModuleNotAllowed`] instead of pattern-matching
/// on the thrown message text.
type PoisonFlag = Arc<Mutex<Option<String>>>;

fn mark_poisoned(poison: &PoisonFlag, module_name: &str) -> rustyscript::Error {
  *poison.lock().expect("poison flag mutex poisoned") = Some(module_name.to_string());
  rustyscript::Error::Runtime(format!("Module '{module_name}' is not allowed"))
}

fn into_sandbox_error(poison: &PoisonFlag, err: rustyscript::Error) -> SandboxError {
  if let Some(module_name) = poison.lock().expect("poison flag mutex poisoned").take() {
    return SandboxError::ModuleNotAllowed(module_name);
  }
  match err {
    rustyscript::Error::Runtime(msg) => SandboxError::Throw(msg),
    other => SandboxError::Throw(other.to_string()),
  }
}

/// What a sandboxed run produced, regardless of how it ended. The caller (the Executor) maps
/// this onto an execution row's `status`/`output`/`error` columns.
pub struct SandboxOutcome {
  pub console: Vec<String>,
  pub result: Result<serde_json::Value>,
}

/// Run `code` as the body of an `export default` function, with `params` and `credentials`
/// injected as read-only globals, bounded by `deadline`. Spawns a dedicated OS thread so a
/// runaway script cannot block the caller beyond the deadline — the thread is simply abandoned
/// (never joined) if it outlives its budget, matching "the sandbox MUST NOT allow template code
/// to suppress the deadline" (spec §4.2/§4.5).
pub async fn run(
  code: String,
  params: serde_json::Value,
  credentials: HashMap<String, String>,
  capabilities: CapabilitySet,
  max_console_output_size: usize,
  deadline: Duration,
) -> SandboxOutcome {
  let console = ConsoleCapture::new(max_console_output_size);
  let (tx, rx) = tokio::sync::oneshot::channel::<Result<serde_json::Value>>();

  let worker_console = console.clone();
  std::thread::spawn(move || {
    let result = execute_in_isolate(code, params, credentials, capabilities, worker_console, deadline);
    let _ = tx.send(result);
  });

  let result = match tokio::time::timeout(deadline, rx).await {
    Ok(Ok(result)) => result,
    Ok(Err(_)) => Err(SandboxError::Throw("sandbox worker disconnected".into())),
    Err(_) => Err(SandboxError::Timeout(deadline.as_millis() as u64)),
  };

  SandboxOutcome {
    console: console.into_lines(),
    result,
  }
}

fn execute_in_isolate(
  code: String,
  params: serde_json::Value,
  credentials: HashMap<String, String>,
  capabilities: CapabilitySet,
  console: ConsoleCapture,
  deadline: Duration,
) -> Result<serde_json::Value> {
  let mut runtime = Runtime::new(RuntimeOptions::default())
    .map_err(|e| SandboxError::StartupFailed(e.to_string()))?;

  let poison: PoisonFlag = Arc::new(Mutex::new(None));

  bind_console(&mut runtime, &capabilities, &console, &poison)?;
  bind_getter(&mut runtime, &capabilities, Capability::Params, "__params_get", &params, &poison)?;
  bind_getter(
    &mut runtime,
    &capabilities,
    Capability::Credentials,
    "__credentials_get",
    &credentials,
    &poison,
  )?;
  bind_require(&mut runtime, &capabilities, &poison)?;

  let module = Module::new(
    "template.js",
    &format!(
      "const params = __params_get();\n\
       const credentials = __credentials_get();\n\
       const console = {{ log: __console_log, warn: __console_warn, error: __console_error, \
       info: __console_info, debug: __console_debug }};\n\
       export default async function() {{\n{code}\n}}"
    ),
  );

  let handle = runtime
    .load_module(&module)
    .map_err(|e| into_sandbox_error(&poison, e))?;

  // The template body is wrapped as `export default async function`, so the entrypoint call
  // returns a promise the event loop must drive to completion (spec §4.2 step 6: "treat the body
  // as an asynchronous computation that yields a single final value"). `call_entrypoint_async`
  // awaits it; a single-threaded Tokio runtime built here drives that await loop on this worker
  // thread (the `Runtime`/isolate is not `Send`, so it cannot cross into the caller's own Tokio
  // runtime — see the `tokio::time::timeout` racing this thread in `run` above).
  let local_rt = tokio::runtime::Builder::new_current_thread()
    .enable_time()
    .build()
    .map_err(|e| SandboxError::StartupFailed(e.to_string()))?;

  local_rt.block_on(async {
    tokio::time::timeout(
      deadline,
      runtime.call_entrypoint_async::<serde_json::Value>(&handle, json_args!()),
    )
    .await
    .map_err(|_| SandboxError::Timeout(deadline.as_millis() as u64))?
    .map_err(|e| into_sandbox_error(&poison, e))
  })
}

fn bind_console(
  runtime: &mut Runtime,
  capabilities: &CapabilitySet,
  console: &ConsoleCapture,
  poison: &PoisonFlag,
) -> Result<()> {
  let allowed = capabilities.allows(Capability::Console);
  for (name, severity) in [
    ("log", Severity::Log),
    ("warn", Severity::Warn),
    ("error", Severity::Error),
    ("info", Severity::Info),
    ("debug", Severity::Debug),
  ] {
    let global = format!("__console_{name}");
    if !allowed {
      let poison = poison.clone();
      runtime
        .register_function(&global, move |_args: &[serde_json::Value]| {
          Err(mark_poisoned(&poison, Capability::Console.module_specifier()))
        })
        .map_err(|e| SandboxError::StartupFailed(e.to_string()))?;
      continue;
    }
    let console = console.clone();
    runtime
      .register_function(&global, move |args: &[serde_json::Value]| {
        console.push(severity, args);
        Ok(serde_json::Value::Null)
      })
      .map_err(|e| SandboxError::StartupFailed(e.to_string()))?;
  }
  Ok(())
}

/// Bind `global_name` as a zero-arg getter returning `value`'s JSON form, or a poison stub if
/// `capability` is withheld.
fn bind_getter<T: serde::Serialize>(
  runtime: &mut Runtime,
  capabilities: &CapabilitySet,
  capability: Capability,
  global_name: &str,
  value: &T,
  poison: &PoisonFlag,
) -> Result<()> {
  if !capabilities.allows(capability) {
    let poison = poison.clone();
    let module_name = capability.module_specifier();
    return runtime
      .register_function(global_name, move |_args: &[serde_json::Value]| {
        Err(mark_poisoned(&poison, module_name))
      })
      .map_err(|e| SandboxError::StartupFailed(e.to_string()));
  }
  let json = serde_json::to_value(value).map_err(|e| SandboxError::StartupFailed(e.to_string()))?;
  runtime
    .register_function(global_name, move |_args: &[serde_json::Value]| Ok(json.clone()))
    .map_err(|e| SandboxError::StartupFailed(e.to_string()))
}

/// Bind the `require(name)` global template code uses to reach the remaining facilities (clock,
/// JSON, subprocess, filesystem, HTTP, crypto, OS, timers). Resolution is the only way in: a name
/// this sandbox doesn't recognize, or one that maps to a withheld [`Capability`], fails the call
/// itself rather than returning a module whose members throw later. Granted modules resolve to an
/// empty object — this sandbox performs no real subprocess/filesystem/network I/O, it only
/// exercises the allow/deny contract those facilities are gated by.
fn bind_require(runtime: &mut Runtime, capabilities: &CapabilitySet, poison: &PoisonFlag) -> Result<()> {
  let capabilities = capabilities.clone();
  let poison = poison.clone();
  runtime
    .register_function("require", move |args: &[serde_json::Value]| {
      let name = args.first().and_then(|v| v.as_str()).unwrap_or_default();
      match Capability::all().into_iter().find(|c| c.module_specifier() == name) {
        Some(capability) if capabilities.allows(capability) => Ok(serde_json::json!({})),
        _ => Err(mark_poisoned(&poison, name)),
      }
    })
    .map_err(|e| SandboxError::StartupFailed(e.to_string()))
}
