//! Store connection configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default time to wait on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings for [`SqliteStore`](super::SqliteStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database file path.
    pub path: PathBuf,
    /// How long to wait on a locked database.
    pub busy_timeout: Duration,
    /// Open without write access. Inspection and integrity checks only.
    pub read_only: bool,
    /// Create the database file if missing.
    pub create_if_missing: bool,
    /// Turn on referential enforcement for the connection.
    pub enforce_foreign_keys: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("schemafix.db"),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            read_only: false,
            create_if_missing: false,
            enforce_foreign_keys: true,
        }
    }
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn create_if_missing(mut self) -> Self {
        self.create_if_missing = true;
        self
    }

    /// Turn referential enforcement on or off for the connection.
    pub fn with_foreign_keys(mut self, enabled: bool) -> Self {
        self.enforce_foreign_keys = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.path, PathBuf::from("schemafix.db"));
        assert_eq!(config.busy_timeout, DEFAULT_BUSY_TIMEOUT);
        assert!(config.enforce_foreign_keys);
        assert!(!config.read_only);
        assert!(!config.create_if_missing);
    }

    #[test]
    fn test_builders() {
        let config = StoreConfig::new("app.db")
            .with_busy_timeout(Duration::from_millis(250))
            .with_foreign_keys(false)
            .read_only();
        assert_eq!(config.path, PathBuf::from("app.db"));
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert!(!config.enforce_foreign_keys);
        assert!(config.read_only);
    }
}
