//! Driver error types.
//!
//! Provides strongly-typed errors for request handling:
//! - Storage failures surfaced while serving a verb
//! - Lifecycle evaluation and ledger failures
//! - Events referring to connections the driver does not know

use std::fmt;

use crate::{ledger::LedgerError, lifecycle::LifecycleError, storage::StorageError};

/// Errors that can occur while the driver processes an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Connection not found in the table.
    ///
    /// A request or close arrived for a connection that was never admitted
    /// or was already released. This is a runtime bug.
    UnknownConnection(u64),

    /// Storage operation failed.
    ///
    /// The request is answered with the verb's `NOK`. May be transient (I/O
    /// errors) or permanent (corrupt records).
    Storage(StorageError),

    /// Lifecycle evaluation failed.
    ///
    /// Usually an event whose start metadata is missing.
    Lifecycle(LifecycleError),

    /// Reservation ledger failed.
    ///
    /// Any partial write has already been rolled back.
    Ledger(LedgerError),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownConnection(id) => write!(f, "unknown connection: {id}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
            Self::Lifecycle(err) => write!(f, "lifecycle error: {err}"),
            Self::Ledger(err) => write!(f, "ledger error: {err}"),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            Self::Lifecycle(err) => Some(err),
            Self::Ledger(err) => Some(err),
            Self::UnknownConnection(_) => None,
        }
    }
}

impl From<StorageError> for DriverError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl From<LifecycleError> for DriverError {
    fn from(err: LifecycleError) -> Self {
        Self::Lifecycle(err)
    }
}

impl From<LedgerError> for DriverError {
    fn from(err: LedgerError) -> Self {
        Self::Ledger(err)
    }
}

#[cfg(test)]
mod tests {
    use boxoffice_proto::EventId;

    use super::*;

    #[test]
    fn driver_error_display() {
        let err = DriverError::UnknownConnection(42);
        assert_eq!(err.to_string(), "unknown connection: 42");

        let err = DriverError::from(StorageError::Exhausted);
        assert_eq!(err.to_string(), "storage error: event id space exhausted");

        let eid = EventId::FIRST;
        let err = DriverError::from(LifecycleError::MissingMetadata(eid));
        assert_eq!(err.to_string(), "lifecycle error: event 001 has no start metadata");
    }

    #[test]
    fn driver_error_source() {
        use std::error::Error;

        let err = DriverError::from(LedgerError::Storage(StorageError::Io("disk full".into())));
        assert!(err.source().is_some());
        assert!(DriverError::UnknownConnection(1).source().is_none());
    }
}
