//! `personal-automator`: parses `DATA_DIR`, opens the store, bootstraps the vault, starts the
//! scheduler, and serves the HTTP control plane until Ctrl-C / SIGTERM. Mirrors the teacher's
//! `trailbase-cli` shutdown handling style (`crates/cli/src/bin/trail.rs`).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use pa_core::{AppState, Settings};
use pa_store::Store;
use pa_vault::Vault;
use tracing::info;

/// Default data directory: `${HOME}/.personal-automator`, per spec §6.1.
fn default_data_dir() -> PathBuf {
  dirs_next_home()
    .unwrap_or_else(|| PathBuf::from("."))
    .join(".personal-automator")
}

fn dirs_next_home() -> Option<PathBuf> {
  std::env::var_os("HOME").map(PathBuf::from)
}

#[derive(Parser, Debug, Clone)]
#[command(name = "personal-automator", version, about = "Local-first task automation engine")]
struct Args {
  /// Directory for the database and vault key material. Created if it doesn't exist.
  #[arg(long, env = "DATA_DIR", default_value_os_t = default_data_dir())]
  data_dir: PathBuf,

  /// TCP port the HTTP control plane listens on.
  #[arg(long, env = "PORT", default_value_t = 8090)]
  port: u16,
}

fn init_logging() {
  use tracing_subscriber::{fmt, EnvFilter};

  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new("personal_automator=info,pa_core=info,tower_http=warn"));
  fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  init_logging();
  let args = Args::parse();

  info!(data_dir = %args.data_dir.display(), "starting personal-automator");

  let settings = Arc::new(Settings::load(&args.data_dir).await?);
  let store = Arc::new(Store::open(&args.data_dir).await?);
  let vault = Arc::new(Vault::open_or_initialize(&args.data_dir)?);
  vault.verify()?;

  let state = AppState::new(store, vault, settings);
  state.scheduler().start().await?;

  let app = pa_core::router().with_state(state.clone());
  let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port)).await?;
  info!(port = args.port, "listening");

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  state.scheduler().stop();
  info!("clean shutdown");
  Ok(())
}

/// Waits for Ctrl-C or, on unix, SIGTERM — whichever arrives first.
async fn shutdown_signal() {
  let ctrl_c = async {
    tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
  };

  #[cfg(unix)]
  let terminate = async {
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
      .expect("failed to install SIGTERM handler")
      .recv()
      .await;
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {},
    _ = terminate => {},
  }
}
