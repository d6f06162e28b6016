//! Core types for the zone changeset journal.
//!
//! This crate carries the DNS-facing vocabulary the journal stores and
//! returns: [`Serial`] (RFC 1982 serial arithmetic), [`Dname`] (canonical
//! wire-format domain names), [`Record`] (a minimal resource record) and
//! [`Changeset`] (a zone delta between two SOA serials).
//!
//! The journal itself treats a changeset as opaque: it touches only the
//! two serials and the four operations `serialized_size`,
//! `serialize_chunks`, `deserialize_chunks` and `merge`. Everything else
//! in here exists for the callers and the tests.

pub mod changeset;
pub mod name;
pub mod record;
pub mod serial;

pub use changeset::Changeset;
pub use name::Dname;
pub use record::{CLASS_IN, RTYPE_A, RTYPE_SOA, RTYPE_TXT, Record};
pub use serial::Serial;
