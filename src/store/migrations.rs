//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS submissions (
                id TEXT PRIMARY KEY,
                author_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                approvals INTEGER NOT NULL DEFAULT 0,
                rejections INTEGER NOT NULL DEFAULT 0,
                upvotes INTEGER NOT NULL DEFAULT 0,
                downvotes INTEGER NOT NULL DEFAULT 0,
                reports INTEGER NOT NULL DEFAULT 0,
                published_at TEXT,
                channel_chat_id INTEGER,
                channel_message_id INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_submissions_state ON submissions(state);
            CREATE INDEX IF NOT EXISTS idx_submissions_author ON submissions(author_id);

            CREATE TABLE IF NOT EXISTS moderator_votes (
                submission_id TEXT NOT NULL REFERENCES submissions(id),
                moderator_id INTEGER NOT NULL,
                decision TEXT NOT NULL,
                cast_at TEXT NOT NULL,
                PRIMARY KEY (submission_id, moderator_id)
            );

            CREATE TABLE IF NOT EXISTS public_votes (
                submission_id TEXT NOT NULL REFERENCES submissions(id),
                voter_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                cast_at TEXT NOT NULL,
                PRIMARY KEY (submission_id, voter_id)
            );

            CREATE TABLE IF NOT EXISTS reports (
                submission_id TEXT NOT NULL REFERENCES submissions(id),
                reporter_id INTEGER NOT NULL,
                reported_at TEXT NOT NULL,
                PRIMARY KEY (submission_id, reporter_id)
            );

            CREATE TABLE IF NOT EXISTS queue_slots (
                submission_id TEXT PRIMARY KEY REFERENCES submissions(id),
                seq INTEGER NOT NULL,
                enqueued_at TEXT NOT NULL,
                release_at TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_queue_slots_seq ON queue_slots(seq);
        "#,
    },
    Migration {
        version: 2,
        name: "published_at_index",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_submissions_published_at ON submissions(published_at);
        "#,
    },
    Migration {
        version: 3,
        name: "rejection_reason",
        sql: r#"
            ALTER TABLE submissions ADD COLUMN rejection_reason TEXT;
            ALTER TABLE moderator_votes ADD COLUMN reason TEXT;
        "#,
    },
];

/// Apply every migration newer than the recorded version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    tracing::debug!(
        version = MIGRATIONS.last().map(|m| m.version).unwrap_or(0),
        "Database migrations complete"
    );
    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0)),
        Ok(None) => Ok(0),
        Err(e) => Err(DatabaseError::Migration(format!(
            "Failed to read migration version: {e}"
        ))),
    }
}

async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
