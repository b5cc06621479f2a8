use std::path::Path;
use std::time::Duration;

use pa_sandbox::Capability;
use serde::Deserialize;

/// Tunables that would otherwise be scattered constants. Loaded from an optional
/// `<data_dir>/config.toml`; every field falls back to a hardcoded default when the file is
/// absent or a key is missing, so a fresh data directory works with zero configuration.
#[derive(Debug, Clone)]
pub struct Settings {
  pub default_timeout_ms: u64,
  pub max_timeout_ms: u64,
  pub max_console_output_size: usize,
  pub allowed_capabilities: Vec<Capability>,
  pub catch_up_sweep_interval: Duration,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      default_timeout_ms: 30_000,
      max_timeout_ms: 300_000,
      max_console_output_size: 1024 * 1024,
      allowed_capabilities: Capability::all().to_vec(),
      catch_up_sweep_interval: Duration::from_secs(60),
    }
  }
}

/// On-disk shape of `config.toml`. Every field is optional; absence means "use the default".
///
/// `pbkdf2_iterations` deliberately has no knob here: it's burned into `pa_vault::Vault` as a
/// fixed constant, because the master secret it derives from is already 32 random bytes (not a
/// low-entropy password) and changing the iteration count between an `initialize` and a later
/// `open` would silently re-derive a different key and break every credential encrypted so far.
#[derive(Debug, Default, Deserialize)]
struct RawSettings {
  default_timeout_ms: Option<u64>,
  max_timeout_ms: Option<u64>,
  max_console_output_size: Option<usize>,
  allowed_capabilities: Option<Vec<Capability>>,
  catch_up_sweep_interval_secs: Option<u64>,
}

impl Settings {
  /// Reads `<data_dir>/config.toml` if present; a missing file is not an error, a malformed one
  /// is (fail-stop, matching the store's migration policy rather than silently degrading).
  pub async fn load(data_dir: &Path) -> Result<Self, ConfigError> {
    let path = data_dir.join("config.toml");
    let defaults = Settings::default();

    let raw = match tokio::fs::read_to_string(&path).await {
      Ok(contents) => toml::from_str::<RawSettings>(&contents).map_err(ConfigError::Parse)?,
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => RawSettings::default(),
      Err(err) => return Err(ConfigError::Io(err)),
    };

    Ok(Settings {
      default_timeout_ms: raw.default_timeout_ms.unwrap_or(defaults.default_timeout_ms),
      max_timeout_ms: raw.max_timeout_ms.unwrap_or(defaults.max_timeout_ms),
      max_console_output_size: raw
        .max_console_output_size
        .unwrap_or(defaults.max_console_output_size),
      allowed_capabilities: raw
        .allowed_capabilities
        .unwrap_or(defaults.allowed_capabilities),
      catch_up_sweep_interval: raw
        .catch_up_sweep_interval_secs
        .map(Duration::from_secs)
        .unwrap_or(defaults.catch_up_sweep_interval),
    })
  }

  /// `min(requested, MAX_TIMEOUT)`, falling back to the default when the caller doesn't ask for
  /// a specific timeout.
  pub fn effective_timeout(&self, requested_ms: Option<u64>) -> Duration {
    let ms = requested_ms.unwrap_or(self.default_timeout_ms).min(self.max_timeout_ms);
    Duration::from_millis(ms)
  }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config.toml: {0}")]
  Io(std::io::Error),
  #[error("failed to parse config.toml: {0}")]
  Parse(toml::de::Error),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn load_without_config_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::load(dir.path()).await.unwrap();
    assert_eq!(settings.default_timeout_ms, Settings::default().default_timeout_ms);
    assert_eq!(settings.allowed_capabilities.len(), Capability::all().len());
  }

  #[tokio::test]
  async fn load_partial_config_overrides_only_named_fields() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("config.toml"), "default_timeout_ms = 5000\n")
      .await
      .unwrap();
    let settings = Settings::load(dir.path()).await.unwrap();
    assert_eq!(settings.default_timeout_ms, 5_000);
    assert_eq!(settings.max_timeout_ms, Settings::default().max_timeout_ms);
  }

  #[tokio::test]
  async fn load_malformed_config_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("config.toml"), "not valid toml {{{")
      .await
      .unwrap();
    assert!(Settings::load(dir.path()).await.is_err());
  }

  #[test]
  fn effective_timeout_clamps_to_max() {
    let settings = Settings {
      default_timeout_ms: 1_000,
      max_timeout_ms: 5_000,
      ..Settings::default()
    };
    assert_eq!(settings.effective_timeout(None), Duration::from_millis(1_000));
    assert_eq!(settings.effective_timeout(Some(50_000)), Duration::from_millis(5_000));
    assert_eq!(settings.effective_timeout(Some(2_000)), Duration::from_millis(2_000));
  }
}
