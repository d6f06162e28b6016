//! An ordered key/value store with MVCC snapshot transactions.
//!
//! This is the backing store the journal consumes: an LMDB-shaped
//! environment with named sub-databases, byte-ordered keys, one writer at
//! a time and any number of snapshot readers. State lives in memory as
//! ordered maps and is made durable by writing a full snapshot file and
//! atomically renaming it over the previous one on every write-commit, so
//! a crash at any point leaves the last committed state intact.
//!
//! Two capacity signals matter to callers:
//!
//! - [`StoreError::MapFull`]: an insert would push the environment past
//!   its mapping size.
//! - [`StoreError::TxnFull`]: a write transaction exceeded its operation
//!   budget; commit and retry in a fresh transaction.
//!
//! The persisted mapping size is monotonic: reopening an environment with
//! a smaller requested size leaves the recorded mapping in place, and
//! [`Env::mapsize`] reports the recorded value. Callers that care (the
//! journal's shrunk-mapping check) compare it against what they asked
//! for.

mod env;
mod file;
mod txn;

pub use env::{Db, Env, EnvOptions};
pub use txn::{Cursor, ReadTxn, TxnRead, WriteTxn};

pub use zjournal_error::{StoreError, StoreResult};

/// Fixed per-record overhead charged to [`Env::used_bytes`], mirroring
/// page-granular storage backends.
pub const RECORD_OVERHEAD: usize = 4096;
