use thiserror::Error;

/// Main error type for chemkg
#[derive(Error, Debug)]
pub enum ChemkgError {
    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Knowledge store errors (unwritable path, corrupt header while appending)
    #[error("Store error: {0}")]
    Store(String),

    /// External parser errors
    #[error("Parser error: {0}")]
    Parser(String),

    /// Directory watch errors
    #[error("Watch error: {0}")]
    Watch(String),

    /// Query errors
    #[error("Query error: {0}")]
    Query(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<notify::Error> for ChemkgError {
    fn from(err: notify::Error) -> Self {
        ChemkgError::Watch(err.to_string())
    }
}

/// Convenient Result type using ChemkgError
pub type Result<T> = std::result::Result<T, ChemkgError>;
