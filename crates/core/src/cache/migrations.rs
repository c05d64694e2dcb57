//! Database schema migrations.
//!
//! A `_migrations` table records which versions have been applied; each
//! pending migration runs inside its own transaction.

use super::Error;
use tokio_rusqlite::{Connection, params};

/// Ordered (version, SQL) pairs. Versions must be strictly increasing.
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../../migrations/001_answers.sql"))];

/// Apply every migration newer than the recorded schema version.
///
/// # Errors
///
/// Returns `Error::MigrationFailed` if a migration batch fails, or
/// `Error::Database` if the version table cannot be read.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    let applied = conn
        .call(|conn| -> Result<Vec<i64>, Error> {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS _migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                )",
                [],
            )?;

            let current: i64 =
                conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?;

            let mut applied = Vec::new();
            for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
                let tx = conn.transaction()?;
                tx.execute_batch(sql)
                    .map_err(|e| Error::MigrationFailed(format!("version {version}: {e}")))?;
                tx.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
                    params![version, chrono::Utc::now().to_rfc3339()],
                )?;
                tx.commit()?;
                applied.push(*version);
            }

            Ok(applied)
        })
        .await
        .map_err(Error::from)?;

    if !applied.is_empty() {
        tracing::info!(versions = ?applied, "applied cache schema migrations");
    }

    Ok(())
}
