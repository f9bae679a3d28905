//! `SQLite` adapter for [`DocumentStore`].

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{migrations, paths, Document, DocumentStore, Query};
use crate::error::{Error, Result};

const MEMORY_PATH: &str = ":memory:";

/// Document store backed by a single `SQLite` file.
///
/// The connection sits behind a mutex; every call holds it for one short
/// statement sequence and never across an await point.
#[derive(Debug)]
pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

type RawRow = (String, String, String);

impl SqliteStore {
    /// Open or create a store at the given path.
    ///
    /// Creates parent directories as needed and brings the schema up to date.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store, mainly for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(MEMORY_PATH),
            source,
        })?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(MEMORY_PATH),
            conn: Mutex::new(conn),
        })
    }

    /// Path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("database connection mutex poisoned"))
    }

    fn insert_document(&self, collection: &str, fields: &Map<String, Value>) -> Result<String> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let now = Utc::now().to_rfc3339();
        let body = serde_json::to_string(fields)?;

        self.conn()?.execute(
            r"
            INSERT INTO documents (collection, id, fields, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ",
            params![collection, id, body, now],
        )?;

        debug!(collection, id = %id, "Created document");
        Ok(id)
    }

    fn select_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let raw: Option<RawRow> = self
            .conn()?
            .query_row(
                "SELECT id, fields, created_at FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        raw.map(|row| decode_row(collection, row)).transpose()
    }

    fn select_documents(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        let mut sql = String::from(
            "SELECT id, fields, created_at FROM documents WHERE collection = ?",
        );
        let mut bindings = vec![SqlValue::Text(collection.to_string())];

        for (field, value) in &query.filters {
            check_field_name(field)?;
            sql.push_str(" AND json_extract(fields, ?) = json_extract(?, '$')");
            bindings.push(SqlValue::Text(format!("$.{field}")));
            bindings.push(SqlValue::Text(value.to_string()));
        }

        sql.push_str(" ORDER BY seq ASC");
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bindings.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(bindings.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<std::result::Result<Vec<RawRow>, _>>()?;

        rows.into_iter()
            .map(|row| decode_row(collection, row))
            .collect()
    }

    fn merge_document(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let current: Option<String> = conn
            .query_row(
                "SELECT fields FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;

        let path = paths::document(collection, id);
        let Some(current) = current else {
            return Err(Error::persistence(format!("no document at {path}")));
        };

        let mut merged: Map<String, Value> = serde_json::from_str(&current)
            .map_err(|e| Error::malformed(&path, e.to_string()))?;
        merged.extend(fields);

        conn.execute(
            "UPDATE documents SET fields = ?1, updated_at = ?2 WHERE collection = ?3 AND id = ?4",
            params![
                serde_json::to_string(&merged)?,
                Utc::now().to_rfc3339(),
                collection,
                id
            ],
        )?;

        debug!(path = %path, "Updated document");
        Ok(())
    }

    fn remove_document(&self, collection: &str, id: &str) -> Result<bool> {
        let affected = self.conn()?.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        if affected > 0 {
            debug!(collection, id, "Deleted document");
        }
        Ok(affected > 0)
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn create(&self, collection: &str, fields: Map<String, Value>) -> Result<String> {
        self.insert_document(collection, &fields)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.select_document(collection, id)
    }

    async fn list(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        self.select_documents(collection, query)
    }

    async fn update(&self, collection: &str, id: &str, fields: Map<String, Value>) -> Result<()> {
        self.merge_document(collection, id, fields)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        self.remove_document(collection, id)
    }
}

/// Filter fields become JSON paths; keep them to plain identifiers.
fn check_field_name(field: &str) -> Result<()> {
    if !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(Error::validation("filter", format!("unsupported field name '{field}'")))
    }
}

fn decode_row(collection: &str, (id, body, created_at): RawRow) -> Result<Document> {
    let path = paths::document(collection, &id);
    let fields: Map<String, Value> =
        serde_json::from_str(&body).map_err(|e| Error::malformed(&path, e.to_string()))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::malformed(&path, format!("bad created_at: {e}")))?
        .with_timezone(&Utc);

    Ok(Document {
        id,
        fields,
        created_at,
    })
}
