//! Document store for buses, students, trips and attendance.
//!
//! The store is a port: [`DocumentStore`] describes hierarchical collections of
//! JSON documents with store-assigned ids and timestamps. [`SqliteStore`] is the
//! shipped adapter. Typed access with boundary validation goes through
//! [`Records`].

pub mod migrations;
pub mod records;
pub mod schema;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::Result;

pub use records::Records;
pub use sqlite::SqliteStore;

/// Collection path helpers.
///
/// Collections nest under their owning document:
/// `buses/{bus}/students`, `buses/{bus}/trips`,
/// `buses/{bus}/trips/{trip}/attendance`.
pub mod paths {
    /// Top-level bus collection.
    pub const BUSES: &str = "buses";

    /// Students owned by a bus.
    #[must_use]
    pub fn students(bus_id: &str) -> String {
        format!("{BUSES}/{bus_id}/students")
    }

    /// Trips owned by a bus.
    #[must_use]
    pub fn trips(bus_id: &str) -> String {
        format!("{BUSES}/{bus_id}/trips")
    }

    /// Attendance records owned by a trip.
    #[must_use]
    pub fn attendance(bus_id: &str, trip_id: &str) -> String {
        format!("{BUSES}/{bus_id}/trips/{trip_id}/attendance")
    }

    /// Full path of one document, for error messages.
    #[must_use]
    pub fn document(collection: &str, id: &str) -> String {
        format!("{collection}/{id}")
    }
}

/// A stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Store-assigned identifier, unique within its collection.
    pub id: String,
    /// The document body.
    pub fields: Map<String, Value>,
    /// When the store created the document.
    pub created_at: DateTime<Utc>,
}

/// A listing query: equality filters joined with AND, plus an optional limit.
///
/// Results come back in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// `(field, value)` pairs that must all match.
    pub filters: Vec<(String, Value)>,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
}

impl Query {
    /// A query matching every document.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Add an equality filter.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    /// Cap the number of results.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check a document body against the filters.
    #[must_use]
    pub fn matches(&self, fields: &Map<String, Value>) -> bool {
        self.filters
            .iter()
            .all(|(field, value)| fields.get(field) == Some(value))
    }
}

/// Hierarchical document persistence.
///
/// Implementations assign ids and creation timestamps. None of the operations
/// are transactional across calls.
#[async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug {
    /// Create a document and return its id.
    async fn create(&self, collection: &str, fields: Map<String, Value>) -> Result<String>;

    /// Fetch one document.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// List documents matching `query`, in insertion order.
    async fn list(&self, collection: &str, query: &Query) -> Result<Vec<Document>>;

    /// Merge `fields` into an existing document.
    ///
    /// Keys not present in `fields` are left as they are.
    async fn update(&self, collection: &str, id: &str, fields: Map<String, Value>) -> Result<()>;

    /// Delete a document. Returns `false` if it did not exist.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool>;
}
