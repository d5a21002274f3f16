use arrow_schema::ArrowError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required source table does not exist in the store.
    #[error("table not found: {0}")]
    MissingTable(String),

    #[error("table {table} has no column {column}")]
    MissingColumn { table: String, column: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot decode table {table}: {reason}")]
    Decode { table: String, reason: String },
}

pub type Result<T> = std::result::Result<T, DetectError>;
