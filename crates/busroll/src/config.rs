//! Configuration management for busroll.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::scan::CameraFacing;
use crate::session::Role;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "busroll";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "busroll.db";

/// Default session file name.
const SESSION_FILE_NAME: &str = "session.json";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `BUSROLL_`)
/// 2. TOML config file at `~/.config/busroll/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Organization-wide settings.
    pub organization: OrganizationConfig,
    /// Scan intake configuration.
    pub scan: ScanConfig,
    /// Trip summary notification configuration.
    pub notify: NotifyConfig,
    /// Login accounts.
    pub auth: AuthConfig,
    /// Student registration rules.
    pub students: StudentConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/busroll/busroll.db`
    pub database_path: Option<PathBuf>,
    /// Path to the login session file.
    /// Defaults to `~/.local/share/busroll/session.json`
    pub session_path: Option<PathBuf>,
}

/// Organization-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizationConfig {
    /// Display name used in trip summaries.
    pub name: String,
    /// IANA timezone that defines a trip's operating day.
    pub timezone: String,
}

/// Scan intake configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Delay after a payload is processed before the lock is released and the
    /// last-seen marker is cleared.
    pub release_delay_ms: u64,
    /// Camera facing used when a session starts.
    pub default_facing: CameraFacing,
    /// Capacity of the decode and feedback channels.
    pub channel_capacity: usize,
}

/// Trip summary notification configuration.
///
/// When `endpoint` is unset, summaries are only written to the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// HTTP email API endpoint accepting `{from, to, subject, html}`.
    pub endpoint: Option<String>,
    /// Bearer token for the email API.
    pub api_key: Option<String>,
    /// Sender address.
    pub from: String,
    /// Destination address for trip summaries.
    pub to: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

/// Login accounts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Accounts allowed to log in.
    pub accounts: Vec<Account>,
}

/// A single login account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Login email.
    pub email: String,
    /// BLAKE3 hex digest of the password.
    pub password_blake3: String,
    /// Role granted on login.
    pub role: Role,
}

/// Student registration rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudentConfig {
    /// Optional regex a national id must match when a student is added.
    pub national_id_pattern: Option<String>,
}

impl Default for OrganizationConfig {
    fn default() -> Self {
        Self {
            name: "School Bus".to_string(),
            timezone: "Asia/Qatar".to_string(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            release_delay_ms: 400,
            default_facing: CameraFacing::Back,
            channel_capacity: 64,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            from: "School Bus <noreply@busroll.local>".to_string(),
            to: "transport-office@busroll.local".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `BUSROLL_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("BUSROLL_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.organization.timezone.parse::<Tz>().is_err() {
            return Err(Error::ConfigValidation {
                message: format!("unknown timezone: {}", self.organization.timezone),
            });
        }

        if self.scan.release_delay_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "release_delay_ms must be greater than 0".to_string(),
            });
        }

        if self.scan.channel_capacity == 0 {
            return Err(Error::ConfigValidation {
                message: "channel_capacity must be greater than 0".to_string(),
            });
        }

        if let Some(pattern) = &self.students.national_id_pattern {
            if regex::Regex::new(pattern).is_err() {
                return Err(Error::ConfigValidation {
                    message: format!("invalid regex pattern: {pattern}"),
                });
            }
        }

        for account in &self.auth.accounts {
            if account.email.trim().is_empty() {
                return Err(Error::ConfigValidation {
                    message: "account email cannot be empty".to_string(),
                });
            }
            if account.password_blake3.len() != 64 {
                return Err(Error::ConfigValidation {
                    message: format!(
                        "password_blake3 for {} must be a 64-character hex digest",
                        account.email
                    ),
                });
            }
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the session file path, resolving defaults if not set.
    #[must_use]
    pub fn session_path(&self) -> PathBuf {
        self.storage
            .session_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(SESSION_FILE_NAME))
    }

    /// Get the organization timezone.
    ///
    /// Falls back to UTC if the configured name does not parse; `validate`
    /// rejects such configs on load.
    #[must_use]
    pub fn timezone(&self) -> Tz {
        self.organization.timezone.parse().unwrap_or(chrono_tz::UTC)
    }

    /// Get the scan lock release delay as a Duration.
    #[must_use]
    pub fn release_delay(&self) -> Duration {
        Duration::from_millis(self.scan.release_delay_ms)
    }

    /// Get the notifier request timeout as a Duration.
    #[must_use]
    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.organization.timezone, "Asia/Qatar");
        assert_eq!(config.scan.release_delay_ms, 400);
        assert_eq!(config.scan.default_facing, CameraFacing::Back);
        assert!(config.notify.endpoint.is_none());
        assert!(config.auth.accounts.is_empty());
        assert!(config.students.national_id_pattern.is_none());
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_unknown_timezone() {
        let mut config = Config::default();
        config.organization.timezone = "Mars/Olympus".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("unknown timezone"));
    }

    #[test]
    fn test_validate_zero_release_delay() {
        let mut config = Config::default();
        config.scan.release_delay_ms = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("release_delay_ms"));
    }

    #[test]
    fn test_validate_invalid_regex() {
        let mut config = Config::default();
        config.students.national_id_pattern = Some("[invalid".to_string());

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("invalid regex"));
    }

    #[test]
    fn test_validate_account_without_email() {
        let mut config = Config::default();
        config.auth.accounts.push(Account {
            email: "  ".to_string(),
            password_blake3: "0".repeat(64),
            role: Role::Manager,
        });

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("email"));
    }

    #[test]
    fn test_validate_short_password_digest() {
        let mut config = Config::default();
        config.auth.accounts.push(Account {
            email: "admin@school.com".to_string(),
            password_blake3: "abc".to_string(),
            role: Role::Manager,
        });

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("password_blake3"));
    }

    #[test]
    fn test_timezone_parses() {
        let config = Config::default();
        assert_eq!(config.timezone(), chrono_tz::Asia::Qatar);
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        assert!(config.database_path().to_string_lossy().contains("busroll.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_session_path_default() {
        let config = Config::default();
        assert!(config
            .session_path()
            .to_string_lossy()
            .contains("session.json"));
    }

    #[test]
    fn test_release_delay() {
        let config = Config::default();
        assert_eq!(config.release_delay(), Duration::from_millis(400));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("busroll"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), Config::default());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[organization]
name = "Al Noor School"
timezone = "Europe/London"

[scan]
release_delay_ms = 800
default_facing = "front"

[notify]
endpoint = "https://mail.example.com/emails"
to = "office@school.qa"

[[auth.accounts]]
email = "admin@school.com"
password_blake3 = "0000000000000000000000000000000000000000000000000000000000000000"
role = "manager"
"#,
        )
        .unwrap();

        let config = Config::load_from(Some(path)).unwrap();
        assert_eq!(config.organization.name, "Al Noor School");
        assert_eq!(config.timezone(), chrono_tz::Europe::London);
        assert_eq!(config.scan.release_delay_ms, 800);
        assert_eq!(config.scan.default_facing, CameraFacing::Front);
        assert_eq!(config.auth.accounts.len(), 1);
        assert_eq!(config.auth.accounts[0].role, Role::Manager);
        assert_eq!(
            config.notify.endpoint.as_deref(),
            Some("https://mail.example.com/emails")
        );
        assert_eq!(config.notify.to, "office@school.qa");
        assert_eq!(config.notify.timeout_secs, 10);
    }

    #[test]
    fn test_scan_config_deserialize() {
        let json = r#"{"release_delay_ms": 600}"#;
        let scan: ScanConfig = serde_json::from_str(json).unwrap();
        assert_eq!(scan.release_delay_ms, 600);
        assert_eq!(scan.channel_capacity, 64);
    }

    #[test]
    fn test_notify_config_serialize() {
        let notify = NotifyConfig::default();
        let json = serde_json::to_string(&notify).unwrap();
        assert!(json.contains("endpoint"));
    }
}
