use tracing::info;

refinery::embed_migrations!("migrations");

/// Apply all pending migrations, tracked in refinery's own `refinery_schema_history` table.
/// Idempotent: already-applied migrations are skipped. Fails stop on the first error without
/// marking the failing migration as applied, per spec §4.1.
pub(crate) fn apply(conn: &mut rusqlite::Connection) -> Result<(), refinery::Error> {
  let report = migrations::runner().run(conn)?;

  let applied = report.applied_migrations();
  if !applied.is_empty() {
    info!(
      count = applied.len(),
      "applied store migrations: {}",
      applied
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(", ")
    );
  }

  Ok(())
}
