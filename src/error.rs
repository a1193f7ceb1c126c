use std::path::PathBuf;

#[derive(Debug)]
pub enum StoreError {
    /// Store is closed (restore in progress or a failed reopen).
    NotInitialized,
    /// A batched write did not commit. Retryable.
    WriteFailed(String),
    BackupNotFound(PathBuf),
    InvalidPeriod(String),
    Database(String),
    Io(std::io::Error),
    Serialization(serde_json::Error),
}

impl StoreError {
    /// Only failed writes are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::WriteFailed(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotInitialized => write!(f, "Store not initialized"),
            StoreError::WriteFailed(e) => write!(f, "Write failed: {}", e),
            StoreError::BackupNotFound(p) => write!(f, "Backup not found: {}", p.display()),
            StoreError::InvalidPeriod(msg) => write!(f, "Invalid period: {}", msg),
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
