//! Schema versioning for the document store.
//!
//! The version lives in the `metadata` table. Each migration brings the schema
//! from `version - 1` to `version` and runs inside the caller's connection.

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::schema::SCHEMA_STATEMENTS;

/// The schema version this build writes.
pub const CURRENT_VERSION: i32 = 1;

const VERSION_KEY: &str = "schema_version";

type Migration = fn(&Connection) -> Result<()>;

/// Ordered migrations; index `n` upgrades to version `n + 1`.
const MIGRATIONS: &[Migration] = &[migrate_v1];

/// Create the base schema and apply pending migrations.
///
/// # Errors
///
/// Returns an error if schema creation fails, a migration fails, or the
/// database was written by a newer build.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }

    let version = schema_version(conn)?;
    if version > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {version} is newer than supported version {CURRENT_VERSION}"
            ),
        });
    }

    for target in (version + 1)..=CURRENT_VERSION {
        let migration = usize::try_from(target - 1)
            .ok()
            .and_then(|idx| MIGRATIONS.get(idx))
            .ok_or_else(|| Error::DatabaseMigration {
                message: format!("unknown migration version: {target}"),
            })?;
        debug!(version = target, "Applying schema migration");
        migration(conn)?;
        set_schema_version(conn, target)?;
    }

    if version < CURRENT_VERSION {
        info!(from = version, to = CURRENT_VERSION, "Database schema upgraded");
    }

    Ok(())
}

/// Read the schema version; 0 for a fresh database.
fn schema_version(conn: &Connection) -> Result<i32> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        None => Ok(0),
        Some(value) => value.parse().map_err(|_| Error::DatabaseMigration {
            message: format!("invalid schema version: {value}"),
        }),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, version.to_string()),
    )?;
    Ok(())
}

/// Version 1 is the base schema from `SCHEMA_STATEMENTS`.
fn migrate_v1(_conn: &Connection) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        Connection::open_in_memory().expect("failed to create in-memory database")
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [name],
                |row| row.get(0),
            )
            .expect("failed to query sqlite_master");
        count == 1
    }

    #[test]
    fn test_initialize_creates_tables() {
        let conn = memory_db();
        initialize_schema(&conn).expect("failed to initialize schema");

        assert!(table_exists(&conn, "documents"));
        assert!(table_exists(&conn, "metadata"));
    }

    #[test]
    fn test_initialize_sets_current_version() {
        let conn = memory_db();
        initialize_schema(&conn).expect("failed to initialize schema");
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_initialize_twice() {
        let conn = memory_db();
        initialize_schema(&conn).expect("failed to initialize schema");
        initialize_schema(&conn).expect("failed to initialize schema");
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_fresh_database_is_version_zero() {
        let conn = memory_db();
        conn.execute(
            "CREATE TABLE metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .expect("failed to create metadata table");
        assert_eq!(schema_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let conn = memory_db();
        initialize_schema(&conn).expect("failed to initialize schema");
        set_schema_version(&conn, CURRENT_VERSION + 1).expect("failed to set schema version");

        let err = initialize_schema(&conn).unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
    }

    #[test]
    fn test_garbage_version_is_rejected() {
        let conn = memory_db();
        initialize_schema(&conn).expect("failed to initialize schema");
        conn.execute(
            "UPDATE metadata SET value = 'two' WHERE key = ?1",
            [VERSION_KEY],
        )
        .expect("failed to overwrite schema version");

        let err = initialize_schema(&conn).unwrap_err();
        assert!(err.to_string().contains("invalid schema version"));
    }

    #[test]
    fn test_migration_table_covers_current_version() {
        assert_eq!(
            MIGRATIONS.len(),
            usize::try_from(CURRENT_VERSION).unwrap()
        );
    }
}
