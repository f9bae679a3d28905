//! Error types for busroll.
//!
//! This module defines all error types used throughout the busroll crate,
//! providing detailed context for debugging and operator-friendly messages.
//!
//! Scan outcomes such as "student not found" or "already recorded" are not
//! errors; they are reported as [`crate::scan::ScanFeedback`] values so the
//! intake loop keeps running.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for busroll operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Trip Lifecycle Errors ===
    /// An action required an active trip but none exists.
    #[error("no active trip for bus {bus_id}")]
    NoActiveTrip {
        /// The bus the action targeted.
        bus_id: String,
    },

    /// A trip is already running for this bus.
    #[error("bus {bus_id} already has an active trip ({trip_id})")]
    TripAlreadyActive {
        /// The bus the action targeted.
        bus_id: String,
        /// The trip that is currently active.
        trip_id: String,
    },

    // === Lookup Errors ===
    /// The bus does not exist.
    #[error("bus not found: {0}")]
    BusNotFound(String),

    /// The student does not exist on the bus.
    #[error("student not found: {0}")]
    StudentNotFound(String),

    /// The trip does not exist on the bus.
    #[error("trip not found: {0}")]
    TripNotFound(String),

    /// Input failed validation before reaching the store.
    #[error("invalid {field}: {message}")]
    Validation {
        /// The offending field.
        field: &'static str,
        /// Description of the validation failure.
        message: String,
    },

    // === Storage Errors ===
    /// A store operation failed; the trip may be partially updated.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A document read from the store does not have the expected shape.
    #[error("malformed document at {path}: {message}")]
    MalformedDocument {
        /// Collection path and id of the document.
        path: String,
        /// What was wrong with it.
        message: String,
    },

    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Session Errors ===
    /// No session is active.
    #[error("not logged in; run `busroll login` first")]
    NotLoggedIn,

    /// Email or password did not match a configured account.
    #[error("invalid email or password")]
    InvalidCredentials,

    /// The session role may not perform this action.
    #[error("{action} requires the {required} role")]
    Unauthorized {
        /// What was attempted.
        action: &'static str,
        /// The role needed for it.
        required: &'static str,
    },

    // === Capture Errors ===
    /// The scan source failed to start.
    #[error("failed to start scan source '{name}': {message}")]
    CaptureSourceStart {
        /// Name of the scan source.
        name: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    // === Notification Errors ===
    /// Sending the trip summary failed.
    #[error("notification failed: {0}")]
    Notify(String),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for busroll operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Notify(err.to_string())
    }
}

impl Error {
    /// Create a new persistence error.
    #[must_use]
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a malformed document error.
    #[must_use]
    pub fn malformed(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedDocument {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a validation error for a field.
    #[must_use]
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Create a no-active-trip error.
    #[must_use]
    pub fn no_active_trip(bus_id: impl Into<String>) -> Self {
        Self::NoActiveTrip {
            bus_id: bus_id.into(),
        }
    }

    /// Create a scan source start error.
    #[must_use]
    pub fn capture_source_start(name: &'static str, message: impl Into<String>) -> Self {
        Self::CaptureSourceStart {
            name,
            message: message.into(),
        }
    }

    /// Check if this error is the "no active trip" condition.
    #[must_use]
    pub fn is_no_active_trip(&self) -> bool {
        matches!(self, Self::NoActiveTrip { .. })
    }

    /// Check if this error came from the store, including documents that
    /// failed to encode on a write.
    ///
    /// These leave trip state as last written; the operator retries by hand.
    #[must_use]
    pub fn is_persistence_error(&self) -> bool {
        matches!(
            self,
            Self::Persistence(_)
                | Self::MalformedDocument { .. }
                | Self::DatabaseOpen { .. }
                | Self::DatabaseQuery(_)
                | Self::DatabaseMigration { .. }
                | Self::Json(_)
        )
    }

    /// Check if the message is meant for the operator rather than a system failure.
    #[must_use]
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::NoActiveTrip { .. }
                | Self::TripAlreadyActive { .. }
                | Self::BusNotFound(_)
                | Self::StudentNotFound(_)
                | Self::TripNotFound(_)
                | Self::Validation { .. }
                | Self::NotLoggedIn
                | Self::InvalidCredentials
                | Self::Unauthorized { .. }
        )
    }
}
