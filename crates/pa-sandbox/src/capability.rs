use std::collections::HashSet;

/// One gated facility exposed to template code through `require(module_specifier())`. Anything
/// not in a config's allow-set — including a name this sandbox doesn't recognize at all — fails
/// resolution with `module_not_allowed` rather than silently omitting the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
  Console,
  Params,
  Credentials,
  Clock,
  Json,
  Subprocess,
  Fs,
  Http,
  Crypto,
  Os,
  Timers,
}

impl Capability {
  /// The bare module name template code resolves through `require(...)` (or, for
  /// console/params/credentials, the name used in the poison error when withheld). Matches the
  /// `"http"`, `"fs"`, `"process"`, `"crypto"`, `"timers"`, ... table the design notes name.
  pub fn module_specifier(&self) -> &'static str {
    match self {
      Capability::Console => "console",
      Capability::Params => "params",
      Capability::Credentials => "credentials",
      Capability::Clock => "clock",
      Capability::Json => "json",
      Capability::Subprocess => "process",
      Capability::Fs => "fs",
      Capability::Http => "http",
      Capability::Crypto => "crypto",
      Capability::Os => "os",
      Capability::Timers => "timers",
    }
  }

  /// Every capability this sandbox knows about, in the order the spec's "allowed stdlib" list
  /// enumerates them.
  pub fn all() -> [Capability; 11] {
    [
      Capability::Console,
      Capability::Params,
      Capability::Credentials,
      Capability::Clock,
      Capability::Json,
      Capability::Subprocess,
      Capability::Fs,
      Capability::Http,
      Capability::Crypto,
      Capability::Os,
      Capability::Timers,
    ]
  }
}

/// The allowed-stdlib set for one sandbox invocation.
#[derive(Debug, Clone)]
pub struct CapabilitySet {
  allowed: HashSet<Capability>,
}

impl CapabilitySet {
  pub fn new(allowed: impl IntoIterator<Item = Capability>) -> Self {
    Self {
      allowed: allowed.into_iter().collect(),
    }
  }

  /// The default set: everything the spec lists as available to template code.
  pub fn full() -> Self {
    Self::new(Capability::all())
  }

  pub fn allows(&self, capability: Capability) -> bool {
    self.allowed.contains(&capability)
  }

  pub fn iter(&self) -> impl Iterator<Item = &Capability> {
    self.allowed.iter()
  }
}
