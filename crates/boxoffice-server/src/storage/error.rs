use thiserror::Error;

/// Errors from storage backends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend could not read or write.
    #[error("storage I/O error: {0}")]
    Io(String),

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Stored data contradicts itself, e.g. an event without its reserved
    /// count.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Every event id has been handed out.
    #[error("event id space exhausted")]
    Exhausted,
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
