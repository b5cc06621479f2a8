//! Master-key lifecycle and AES-256-GCM encryption for stored credentials, plus the injector that
//! turns a task's declared credential names into decrypted values for one run.

mod error;
mod injector;
mod vault;

pub use error::{Result, VaultError};
pub use injector::{clear, CredentialInjector, InjectionResult};
pub use vault::Vault;
