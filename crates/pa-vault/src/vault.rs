use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::Hmac;
use parking_lot::RwLock;
use pbkdf2::pbkdf2;
use sha2::Sha256;
use tracing::info;
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

const KEY_FILE: &str = "master.key";
const SALT_FILE: &str = "key.salt";
const PBKDF2_ITERATIONS: u32 = 100_000;
const KEY_LEN: usize = 32;
const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Holds the derived AES-256 key in memory for the lifetime of the process. The key material on
/// disk (`master.key`) never leaves the vault directory and is never logged.
///
/// The key sits behind an `RwLock<Option<_>>` rather than a bare buffer so [`Vault::clear_key`]
/// can zero it out and flip every later `encrypt`/`decrypt` to `VaultError::NotInitialized`
/// without needing to consume the `Vault` by value — callers hold it behind an `Arc` shared with
/// the scheduler and executor, so a move-out-on-clear API isn't an option here.
pub struct Vault {
  key: RwLock<Option<Zeroizing<Vec<u8>>>>,
}

impl Vault {
  /// Create a fresh master key and salt under `dir` if none exists yet, then derive and hold the
  /// AES key. Fails if a vault already exists there — use [`Vault::open`] instead.
  pub fn initialize(dir: &Path) -> Result<Self> {
    if dir.join(KEY_FILE).exists() {
      return Err(VaultError::AlreadyInitialized(dir.to_path_buf()));
    }
    std::fs::create_dir_all(dir)?;
    set_dir_permissions(dir)?;

    let master_secret = random_bytes(KEY_LEN);
    let salt = random_bytes(SALT_LEN);

    write_secret_file(&dir.join(KEY_FILE), &BASE64.encode(&master_secret))?;
    write_secret_file(&dir.join(SALT_FILE), &BASE64.encode(&salt))?;

    info!(path = %dir.display(), "initialized credential vault");

    let key = derive_key(&master_secret, &salt);
    Ok(Self { key: RwLock::new(Some(key)) })
  }

  /// Load an existing vault's key material and derive the AES key. Fails if no vault exists yet.
  pub fn open(dir: &Path) -> Result<Self> {
    let key_path = dir.join(KEY_FILE);
    let salt_path = dir.join(SALT_FILE);
    if !key_path.exists() || !salt_path.exists() {
      return Err(VaultError::NotInitialized(dir.to_path_buf()));
    }

    let master_secret = BASE64
      .decode(std::fs::read_to_string(&key_path)?.trim())
      .map_err(VaultError::Base64)?;
    let salt = BASE64
      .decode(std::fs::read_to_string(&salt_path)?.trim())
      .map_err(VaultError::Base64)?;

    let key = derive_key(&master_secret, &salt);
    Ok(Self { key: RwLock::new(Some(key)) })
  }

  /// `initialize` if absent, `open` otherwise. The convenience entry point `pa-cli` actually uses.
  pub fn open_or_initialize(dir: &Path) -> Result<Self> {
    if dir.join(KEY_FILE).exists() {
      Self::open(dir)
    } else {
      Self::initialize(dir)
    }
  }

  /// Encrypts `plaintext`, returning base64(IV(12) || TAG(16) || CIPHERTEXT(n)) — the wire
  /// layout spec §6.2 fixes, rather than the `aes-gcm` crate's native IV||CT||TAG ordering, so
  /// a byte-level description of the stored ciphertext matches the spec exactly.
  pub fn encrypt(&self, plaintext: &str) -> Result<String> {
    let guard = self.key.read();
    let key = guard.as_ref().ok_or(VaultError::KeyCleared)?;
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| VaultError::EncryptionFailed)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let mut combined = cipher
      .encrypt(&nonce, plaintext.as_bytes())
      .map_err(|_| VaultError::EncryptionFailed)?;

    // `aes-gcm` appends the tag to the ciphertext; split it off and move it before the
    // ciphertext to produce IV || TAG || CT.
    let tag_start = combined.len().saturating_sub(TAG_LEN);
    let ciphertext = combined.split_off(tag_start);
    let tag = combined;

    let mut out = Vec::with_capacity(NONCE_LEN + TAG_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&tag);
    out.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(out))
  }

  /// Reverses [`Vault::encrypt`]. Any tampering with IV, tag, or ciphertext is detected by the
  /// GCM authentication tag and surfaces as [`VaultError::DecryptionFailed`].
  pub fn decrypt(&self, encoded: &str) -> Result<Zeroizing<String>> {
    let raw = BASE64.decode(encoded).map_err(VaultError::Base64)?;
    if raw.len() < NONCE_LEN + TAG_LEN {
      return Err(VaultError::CorruptCiphertext);
    }
    let (nonce_bytes, rest) = raw.split_at(NONCE_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    let guard = self.key.read();
    let key = guard.as_ref().ok_or(VaultError::KeyCleared)?;
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| VaultError::DecryptionFailed)?;
    let plaintext = cipher
      .decrypt(nonce, combined.as_slice())
      .map_err(|_| VaultError::DecryptionFailed)?;

    let text = String::from_utf8(plaintext).map_err(|_| VaultError::CorruptCiphertext)?;
    Ok(Zeroizing::new(text))
  }

  /// Round-trip probe used at startup to confirm the derived key actually opens existing
  /// ciphertext before the engine starts accepting scheduled runs.
  pub fn verify(&self) -> Result<()> {
    let probe = "pa-vault-self-test";
    let encrypted = self.encrypt(probe)?;
    let decrypted = self.decrypt(&encrypted)?;
    if decrypted.as_str() != probe {
      return Err(VaultError::DecryptionFailed);
    }
    Ok(())
  }

  /// Zero-fill and drop the derived key. Every `encrypt`/`decrypt` call after this fails with
  /// [`VaultError::KeyCleared`] until the process restarts and re-derives it — there is no
  /// `reopen` by design, matching spec §4.3's `clearKey` lifecycle note.
  pub fn clear_key(&self) {
    let mut guard = self.key.write();
    if let Some(mut key) = guard.take() {
      zeroize::Zeroize::zeroize(key.as_mut());
    }
  }

  /// Whether the derived key is still held — `false` after [`Vault::clear_key`].
  pub fn is_initialized(&self) -> bool {
    self.key.read().is_some()
  }
}

fn derive_key(master_secret: &[u8], salt: &[u8]) -> Zeroizing<Vec<u8>> {
  let mut key = Zeroizing::new(vec![0u8; KEY_LEN]);
  pbkdf2::<Hmac<Sha256>>(master_secret, salt, PBKDF2_ITERATIONS, key.as_mut_slice())
    .expect("pbkdf2 output length is statically correct");
  key
}

fn random_bytes(len: usize) -> Zeroizing<Vec<u8>> {
  use rand::RngCore;
  let mut buf = Zeroizing::new(vec![0u8; len]);
  rand::thread_rng().fill_bytes(buf.as_mut_slice());
  buf
}

#[cfg(unix)]
fn set_dir_permissions(dir: &Path) -> Result<()> {
  use std::os::unix::fs::PermissionsExt;
  std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
  Ok(())
}

#[cfg(not(unix))]
fn set_dir_permissions(_dir: &Path) -> Result<()> {
  Ok(())
}

fn write_secret_file(path: &PathBuf, contents: &str) -> Result<()> {
  std::fs::write(path, contents)?;
  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o400))?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn encrypt_decrypt_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let vault = Vault::initialize(dir.path()).unwrap();

    let encrypted = vault.encrypt("top secret value").unwrap();
    assert_ne!(encrypted, "top secret value");

    let decrypted = vault.decrypt(&encrypted).unwrap();
    assert_eq!(decrypted.as_str(), "top secret value");
  }

  #[test]
  fn open_reuses_persisted_key() {
    let dir = tempfile::tempdir().unwrap();
    let vault = Vault::initialize(dir.path()).unwrap();
    let encrypted = vault.encrypt("persisted").unwrap();
    drop(vault);

    let reopened = Vault::open(dir.path()).unwrap();
    let decrypted = reopened.decrypt(&encrypted).unwrap();
    assert_eq!(decrypted.as_str(), "persisted");
  }

  #[test]
  fn initialize_twice_fails() {
    let dir = tempfile::tempdir().unwrap();
    Vault::initialize(dir.path()).unwrap();
    assert!(matches!(
      Vault::initialize(dir.path()),
      Err(VaultError::AlreadyInitialized(_))
    ));
  }

  #[test]
  fn tampered_ciphertext_fails_to_decrypt() {
    let dir = tempfile::tempdir().unwrap();
    let vault = Vault::initialize(dir.path()).unwrap();
    let mut encrypted = vault.encrypt("value").unwrap();
    encrypted.push('x');
    assert!(vault.decrypt(&encrypted).is_err());
  }

  #[test]
  fn verify_self_test_passes() {
    let dir = tempfile::tempdir().unwrap();
    let vault = Vault::initialize(dir.path()).unwrap();
    assert!(vault.verify().is_ok());
  }

  #[test]
  fn clear_key_disables_further_encrypt_decrypt() {
    let dir = tempfile::tempdir().unwrap();
    let vault = Vault::initialize(dir.path()).unwrap();
    let encrypted = vault.encrypt("value").unwrap();

    vault.clear_key();

    assert!(!vault.is_initialized());
    assert!(matches!(vault.encrypt("value"), Err(VaultError::KeyCleared)));
    assert!(matches!(vault.decrypt(&encrypted), Err(VaultError::KeyCleared)));
  }
}
