use std::collections::HashMap;

use zeroize::Zeroizing;

use crate::error::{Result, VaultError};
use crate::vault::Vault;

/// What resolving a set of credential names produced. Mirrors spec §4.4's algorithm precisely:
/// a missing/valueless credential and a failed decrypt are both reported per-name rather than
/// aborting the whole resolution on the first problem, so a caller can see exactly which names
/// came back and why the rest didn't (spec §8 property 8).
#[derive(Debug, Default)]
pub struct InjectionResult {
  pub success: bool,
  pub credentials: HashMap<String, Zeroizing<String>>,
  pub missing: Vec<String>,
  pub errors: Vec<(String, String)>,
}

/// Resolves a task's declared credential names into decrypted values right before a run, and
/// nothing before that — decrypted values never touch the Store or any log line.
pub struct CredentialInjector<'a> {
  vault: &'a Vault,
  store: &'a pa_store::Store,
}

fn dedup(names: &[String]) -> Vec<String> {
  let mut seen = std::collections::HashSet::new();
  names.iter().filter(|n| seen.insert((*n).clone())).cloned().collect()
}

impl<'a> CredentialInjector<'a> {
  pub fn new(vault: &'a Vault, store: &'a pa_store::Store) -> Self {
    Self { vault, store }
  }

  /// Step through spec §4.4's algorithm: dedup, fetch every ciphertext in one Store call, then
  /// per name classify as "not found" / "exists but no value" / decrypt failure / resolved.
  /// `success` is `missing` and `errors` both empty, matching §8 property 8's iff.
  pub async fn inject(&self, names: &[String]) -> Result<InjectionResult> {
    let unique = dedup(names);
    if unique.is_empty() {
      return Ok(InjectionResult {
        success: true,
        ..Default::default()
      });
    }

    let encrypted = self
      .store
      .credentials()
      .get_encrypted_values(unique.clone())
      .await
      .map_err(VaultError::Store)?;

    let mut result = InjectionResult::default();
    let mut decrypted_names = Vec::new();

    for name in &unique {
      match encrypted.get(name) {
        None => {
          if self
            .store
            .credentials()
            .get_by_name(name)
            .await
            .map_err(VaultError::Store)?
            .is_some()
          {
            result.missing.push(name.clone());
            result.errors.push((name.clone(), "exists but has no value stored".to_string()));
          } else {
            result.missing.push(name.clone());
            result.errors.push((name.clone(), "not found".to_string()));
          }
        }
        Some(ciphertext) => match self.vault.decrypt(ciphertext) {
          Ok(plaintext) => {
            result.credentials.insert(name.clone(), plaintext);
            decrypted_names.push(name.clone());
          }
          Err(err) => {
            result.errors.push((name.clone(), err.to_string()));
          }
        },
      }
    }

    if !decrypted_names.is_empty() {
      self
        .store
        .credentials()
        .touch_last_used(decrypted_names)
        .await
        .map_err(VaultError::Store)?;
    }

    result.success = result.missing.is_empty() && result.errors.is_empty();
    Ok(result)
  }

  /// Convenience over [`CredentialInjector::inject`] for a caller (the Executor) that wants "all
  /// or nothing" semantics: a task cannot partially run with some credentials absent, so the
  /// first missing/errored name becomes the failure message.
  pub async fn resolve(&self, names: &[String]) -> Result<HashMap<String, Zeroizing<String>>> {
    let result = self.inject(names).await?;
    if !result.success {
      let (name, reason) = result
        .errors
        .first()
        .cloned()
        .unwrap_or_else(|| ("credential".to_string(), "unresolved".to_string()));
      return Err(VaultError::MissingValue(format!("{name}: {reason}")));
    }
    Ok(result.credentials)
  }

  /// Check that every name in `names` resolves to *some* value, without decrypting it — used by
  /// the Executor's preflight check (spec §4.2) before a sandbox is even spun up.
  pub async fn validate(&self, names: &[String]) -> Result<()> {
    let unique = dedup(names);
    let encrypted = self
      .store
      .credentials()
      .get_encrypted_values(unique.clone())
      .await
      .map_err(VaultError::Store)?;

    for name in &unique {
      if !encrypted.contains_key(name) {
        return Err(VaultError::MissingValue(name.clone()));
      }
    }
    Ok(())
  }
}

/// Zeroize every decrypted value once a run has finished, regardless of outcome.
pub fn clear(mut resolved: HashMap<String, Zeroizing<String>>) {
  resolved.clear();
}
