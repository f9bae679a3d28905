//! Login session and role checks.
//!
//! A [`Session`] is created by [`login`] against the configured accounts and
//! passed explicitly to role-gated operations. The CLI keeps it in a small
//! JSON file between invocations.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Account;
use crate::error::{Error, Result};

/// What a logged-in user may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Fleet administration, reports and trip deletion, plus everything a
    /// supervisor can do.
    Manager,
    /// Start and end trips, scan.
    Supervisor,
}

impl Role {
    /// The role name as written in config files.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::Supervisor => "supervisor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Login email.
    pub email: String,
    /// Granted role.
    pub role: Role,
    /// When the login happened.
    pub logged_in_at: DateTime<Utc>,
}

impl Session {
    /// Fail unless this session holds the manager role.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] for supervisors.
    pub fn require_manager(&self, action: &'static str) -> Result<()> {
        match self.role {
            Role::Manager => Ok(()),
            Role::Supervisor => Err(Error::Unauthorized {
                action,
                required: Role::Manager.as_str(),
            }),
        }
    }

    /// Whether this session holds the manager role.
    #[must_use]
    pub fn is_manager(&self) -> bool {
        self.role == Role::Manager
    }
}

/// Hex BLAKE3 digest of a password, the form stored in `auth.accounts`.
#[must_use]
pub fn hash_password(password: &str) -> String {
    blake3::hash(password.as_bytes()).to_hex().to_string()
}

/// Check credentials against the configured accounts.
///
/// Emails compare case-insensitively.
///
/// # Errors
///
/// Returns [`Error::InvalidCredentials`] if no account matches.
pub fn login(accounts: &[Account], email: &str, password: &str) -> Result<Session> {
    let email = email.trim();
    let digest = hash_password(password);

    let account = accounts
        .iter()
        .find(|a| a.email.eq_ignore_ascii_case(email))
        .filter(|a| a.password_blake3.eq_ignore_ascii_case(&digest))
        .ok_or(Error::InvalidCredentials)?;

    info!(email = %account.email, role = %account.role, "Logged in");
    Ok(Session {
        email: account.email.clone(),
        role: account.role,
        logged_in_at: Utc::now(),
    })
}

/// The file a CLI session is kept in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    /// Use the session file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved session, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Option<Session>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the saved session, failing if there is none.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotLoggedIn`] if no session is saved.
    pub fn require(&self) -> Result<Session> {
        self.load()?.ok_or(Error::NotLoggedIn)
    }

    /// Persist a session, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its directory cannot be written.
    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(session)?)?;
        debug!(path = %self.path.display(), "Session saved");
        Ok(())
    }

    /// Remove the saved session. Returns `false` if there was none.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
