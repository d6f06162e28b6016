//! A per-zone changeset journal.
//!
//! An append-only, crash-safe, bounded-size log of incremental zone
//! updates ("from serial X to serial Y" deltas), backed by an ordered
//! key/value store with multi-reader / single-writer transactions. The
//! journal records zone mutations between full zone-file flushes, replays
//! them after restart, serves incremental transfers from them, and, when
//! the zone's policy defers flushing, merges accumulated history into a
//! single compacted changeset so the log never grows without bound.
//!
//! # On-disk model
//!
//! A changeset is stored as one or more chunks under 8-octet
//! `(serial, chunk_index)` big-endian keys; each chunk value carries a
//! 12-octet header `{serial_to, chunk_count, chunk_size}` followed by the
//! payload (see [`codec`]). Journal metadata (serial watermarks, validity
//! flags, format version, zone identity) lives as string-keyed records in
//! the same store, written in the same transactions as the data they
//! describe.
//!
//! # Typical use
//!
//! ```no_run
//! use zjournal::{Journal, JournalOptions};
//! use zjournal_types::{Changeset, Dname, Serial};
//!
//! # fn demo() -> zjournal_error::Result<()> {
//! let zone = Dname::parse("example.com")?;
//! let mut journal = Journal::open("/var/lib/zones/example.com.db".as_ref(), 10 << 20, zone.clone())?;
//!
//! let delta = Changeset::new(zone, Serial(1), Serial(2));
//! journal.store_changeset(&delta)?;
//!
//! let replay = journal.load_changesets(Serial(1))?;
//! assert_eq!(replay[0].serial_to, Serial(2));
//! # Ok(())
//! # }
//! ```
//!
//! `store_changeset` returning [`JournalError::Busy`] means: externalize
//! the zone, call [`Journal::flush`], retry.

mod codec;
mod compact;
mod iter;
mod journal;
mod meta;
mod policy;
mod sweep;
mod txn;
mod write;

pub use codec::{ChunkHeader, ChunkKey, CHUNK_MAX, HEADER_LEN, KEY_LEN};
pub use journal::{CheckLevel, CheckSummary, Journal, SIZE_LIMIT_MIN};
pub use meta::{MetaFlags, Metadata, VERSION};
pub use policy::{JournalOptions, SpacePolicy};

pub use zjournal_error::{JournalError, Result, StoreError};
