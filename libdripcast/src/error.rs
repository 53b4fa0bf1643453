//! Error types for Dripcast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DripcastError>;

/// Result type for the dispatch seam, where callers decide between retry
/// and permanent failure based on the concrete error.
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

#[derive(Error, Debug)]
pub enum DripcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl DripcastError {
    /// Exit code for this error: 3 for invalid input, 2 for a broken
    /// environment, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            DripcastError::InvalidInput(_) => 3,
            DripcastError::Dispatch(DispatchError::MissingProfileKey(_)) => 2,
            DripcastError::Config(_) => 2,
            DripcastError::Database(_) => 2,
            DripcastError::Dispatch(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to write config file: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Payload encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A bulk insert chunk failed. Chunks before `inserted` are already
    /// committed and stay committed; callers compare `inserted` against
    /// the count they asked for.
    #[error("Bulk insert aborted after {inserted} rows: {source}")]
    BulkAborted {
        inserted: usize,
        source: sqlx::Error,
    },
}

#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    #[error("No profile key for {0}")]
    MissingProfileKey(String),

    #[error("Post API error: {0}")]
    Api(String),

    #[error("Device automation error: {0}")]
    Device(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Unsupported dispatch: {0}")]
    Unsupported(String),
}
