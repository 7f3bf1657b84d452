use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV export error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON export error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input size {0:?}: expected (channels, height, width)")]
    InvalidInputShape(Vec<usize>),

    #[error("Failed to attach hook to unit '{unit}': {reason}")]
    HookAttachment { unit: String, reason: String },

    #[error("Forward execution failed in unit '{unit}': {reason}")]
    ForwardExecution { unit: String, reason: String },

    #[error("No stat node found at path '{0}'")]
    PathNotFound(String),

    #[error("Invalid model structure: {0}")]
    InvalidModel(String),
}
