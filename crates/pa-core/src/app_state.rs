use std::sync::Arc;
use std::time::Instant;

use pa_store::Store;
use pa_vault::Vault;

use crate::executor::Executor;
use crate::scheduler::Scheduler;
use crate::settings::Settings;

/// Shared, clonable handle to the process's wired-up components — the HTTP layer's `State`,
/// matching the teacher's `AppState` (`crates/core/src/app_state.rs`): a cheap `Arc` clone
/// rather than a singleton accessor, so every component is an explicit constructor argument
/// (spec §9 "global/singleton state").
#[derive(Clone)]
pub struct AppState {
  inner: Arc<Inner>,
}

struct Inner {
  store: Arc<Store>,
  vault: Arc<Vault>,
  executor: Arc<Executor>,
  scheduler: Scheduler,
  settings: Arc<Settings>,
  started_at: Instant,
}

impl AppState {
  pub fn new(store: Arc<Store>, vault: Arc<Vault>, settings: Arc<Settings>) -> Self {
    let executor = Arc::new(Executor::new(store.clone(), vault.clone(), settings.clone()));
    let scheduler = Scheduler::new(store.clone(), executor.clone(), settings.catch_up_sweep_interval);

    Self {
      inner: Arc::new(Inner {
        store,
        vault,
        executor,
        scheduler,
        settings,
        started_at: Instant::now(),
      }),
    }
  }

  pub fn store(&self) -> &Store {
    &self.inner.store
  }

  pub fn vault(&self) -> &Vault {
    &self.inner.vault
  }

  pub fn executor(&self) -> &Executor {
    &self.inner.executor
  }

  pub fn scheduler(&self) -> &Scheduler {
    &self.inner.scheduler
  }

  pub fn settings(&self) -> &Settings {
    &self.inner.settings
  }

  pub fn uptime(&self) -> std::time::Duration {
    self.inner.started_at.elapsed()
  }
}
