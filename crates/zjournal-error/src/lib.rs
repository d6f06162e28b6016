//! Error types for the zone changeset journal.
//!
//! Two layers, two enums: [`StoreError`] for the ordered key/value store
//! and [`JournalError`] for the journal proper. Store errors convert into
//! journal errors via `#[from]`, so journal code can use `?` across the
//! seam without mapping boilerplate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the backing key/value store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot file failed structural validation.
    #[error("store file is malformed: {detail}")]
    Corrupt { detail: String },

    /// An insert would grow the environment past its mapping size.
    #[error("environment mapping is full")]
    MapFull,

    /// The write transaction exceeded its operation budget.
    ///
    /// The caller is expected to commit and retry the offending operation
    /// in a fresh transaction.
    #[error("write transaction is full")]
    TxnFull,

    /// A named sub-database was requested past the configured `max_dbs`.
    #[error("too many sub-databases (max {max})")]
    TooManyDbs { max: usize },

    /// The environment directory cannot be opened or created.
    #[error("unable to open store environment: '{path}'")]
    CannotOpen { path: PathBuf },
}

/// Errors surfaced by the journal.
///
/// `Busy` and `TryAgain` are control signals rather than failures: `Busy`
/// asks the caller to flush the zone and retry, `TryAgain` asks it to
/// reopen with the previous size limit, flush, and retry.
#[derive(Error, Debug)]
pub enum JournalError {
    // === Caller mistakes ===
    /// An argument failed basic validation.
    #[error("invalid argument: {what}")]
    InvalidArgument { what: &'static str },

    // === Control signals ===
    /// The caller must externalize the zone (flush) before the journal can
    /// accept more history; also returned when opening an already-open
    /// handle.
    #[error("journal requires a flush before it can continue")]
    Busy,

    /// The journal was reopened with a smaller size limit while unflushed
    /// history exists. Flush under the old limit, then retry.
    #[error("journal mapping shrank with unflushed history present")]
    TryAgain,

    // === Capacity ===
    /// The changeset does not fit even after all permissible eviction.
    #[error("journal is out of space")]
    NoSpace,

    // === Lookup ===
    /// The requested changeset range does not start at a stored serial.
    #[error("changeset not found")]
    NotFound,

    // === Format ===
    /// A stored record has an unexpected size or content.
    #[error("journal record is malformed: {detail}")]
    Malformed { detail: String },

    /// The stored format version has a different major digit.
    #[error("unsupported journal format version {stored}")]
    Unsupported { stored: u32 },

    /// The stored zone name differs from the zone the caller claims to
    /// own. Non-fatal; the stored name rides along so the caller can
    /// decide.
    #[error("journal belongs to zone '{stored}'")]
    SemanticCheck { stored: String },

    // === Backing store ===
    /// Any error surfaced by the backing store.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result alias for store-level operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result alias for journal-level operations.
pub type Result<T> = std::result::Result<T, JournalError>;

impl JournalError {
    /// Whether this value is a control signal (`Busy` / `TryAgain`)
    /// rather than a failure.
    #[must_use]
    pub fn is_control_signal(&self) -> bool {
        matches!(self, Self::Busy | Self::TryAgain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_converts_into_journal_error() {
        fn inner() -> Result<()> {
            Err(StoreError::MapFull)?
        }
        match inner() {
            Err(JournalError::Store(StoreError::MapFull)) => {}
            other => panic!("unexpected conversion result: {other:?}"),
        }
    }

    #[test]
    fn control_signals_are_recognized() {
        assert!(JournalError::Busy.is_control_signal());
        assert!(JournalError::TryAgain.is_control_signal());
        assert!(!JournalError::NoSpace.is_control_signal());
        assert!(!JournalError::NotFound.is_control_signal());
    }

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(
            JournalError::Unsupported { stored: 20 }.to_string(),
            "unsupported journal format version 20"
        );
        assert_eq!(StoreError::TxnFull.to_string(), "write transaction is full");
    }
}
