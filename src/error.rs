use thiserror::Error;
use uuid::Uuid;

/// Failures from the live task store. Every mutation is transactional, so
/// any of these leaves the stored state as it was before the call.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Failures while loading the template row-set.
#[derive(Debug, Error)]
pub enum SheetError {
    #[error("template request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("template endpoint returned HTTP {0}")]
    Status(u16),

    #[error("malformed template payload: {0}")]
    Malformed(String),

    #[error("template file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no template source configured")]
    NotConfigured,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("settings file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not locate a config directory for this platform")]
    NoConfigDir,

    #[error("ignoring {key}={value:?}: not a number")]
    InvalidEnv { key: &'static str, value: String },
}
