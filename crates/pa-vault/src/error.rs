#[derive(thiserror::Error, Debug)]
pub enum VaultError {
  #[error("vault is not initialized at {0}")]
  NotInitialized(std::path::PathBuf),

  #[error("vault key has been cleared for this process")]
  KeyCleared,

  #[error("vault is already initialized at {0}")]
  AlreadyInitialized(std::path::PathBuf),

  #[error("failed to read vault key material: {0}")]
  Io(#[from] std::io::Error),

  #[error("ciphertext is corrupt or truncated")]
  CorruptCiphertext,

  #[error("decryption failed: wrong key or tampered ciphertext")]
  DecryptionFailed,

  #[error("encryption failed")]
  EncryptionFailed,

  #[error("base64 decode failed: {0}")]
  Base64(#[from] base64::DecodeError),

  #[error("credential store error: {0}")]
  Store(#[from] pa_store::StoreError),

  #[error("unknown credential: {0}")]
  UnknownCredential(String),

  #[error("credential has no value set: {0}")]
  MissingValue(String),
}

pub type Result<T> = std::result::Result<T, VaultError>;
