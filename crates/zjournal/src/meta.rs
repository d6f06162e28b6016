//! Journal metadata.
//!
//! A handful of string-keyed records in the `meta` sub-database of the
//! same environment as the chunk data, so metadata and data commit
//! together. Integer values are 4-octet big-endian; `zone_name` is the
//! canonical wire-format dname; `version` is BCD-style (`10` reads
//! "1.0") and only its leading decimal digit takes part in the
//! compatibility check.

use zjournal_error::{JournalError, Result, StoreResult};
use zjournal_store::{Db, TxnRead, WriteTxn};
use zjournal_types::{Dname, Serial};

/// Current format version in BCD code.
pub const VERSION: u32 = 10;

const KEY_VERSION: &[u8] = b"version";
const KEY_ZONE_NAME: &[u8] = b"zone_name";
const KEY_FIRST_SERIAL: &[u8] = b"first_serial";
const KEY_LAST_SERIAL: &[u8] = b"last_serial";
const KEY_LAST_SERIAL_TO: &[u8] = b"last_serial_to";
const KEY_LAST_FLUSHED: &[u8] = b"last_flushed";
const KEY_MERGED_SERIAL: &[u8] = b"merged_serial";
const KEY_DIRTY_SERIAL: &[u8] = b"dirty_serial";
const KEY_FLAGS: &[u8] = b"flags";

bitflags::bitflags! {
    /// Validity bits of the metadata fields.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MetaFlags: u32 {
        /// `last_flushed` names a changeset the caller has externalized.
        const LAST_FLUSHED_VALID = 1 << 0;
        /// Non-merged history exists; `last_serial`/`last_serial_to` are
        /// meaningful.
        const SERIAL_TO_VALID = 1 << 1;
        /// A merged changeset exists under the reserved sub-database.
        const MERGED_SERIAL_VALID = 1 << 2;
        /// An insert was interrupted between sub-commits; `dirty_serial`
        /// names it. Swept on the next open.
        const DIRTY_SERIAL_VALID = 1 << 3;
    }
}

/// The journal's metadata record set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metadata {
    /// From-serial of the oldest stored non-merged changeset.
    pub first_serial: Serial,
    /// From-serial of the newest stored changeset.
    pub last_serial: Serial,
    /// To-serial of the newest stored changeset.
    pub last_serial_to: Serial,
    /// From-serial of the newest externally flushed changeset.
    pub last_flushed: Serial,
    /// From-serial of the merged changeset.
    pub merged_serial: Serial,
    /// From-serial of an interrupted insert.
    pub dirty_serial: Serial,
    pub flags: MetaFlags,
}

impl Metadata {
    /// Whether `serial` is the flushed watermark.
    #[must_use]
    pub fn is_last_flushed(&self, serial: Serial) -> bool {
        self.flags.contains(MetaFlags::LAST_FLUSHED_VALID) && self.last_flushed == serial
    }

    /// Whether the whole history is flushed.
    #[must_use]
    pub fn is_flushed(&self) -> bool {
        !self.flags.contains(MetaFlags::SERIAL_TO_VALID) || self.is_last_flushed(self.last_serial)
    }
}

fn first_digit(mut of: u32) -> u32 {
    while of > 9 {
        of /= 10;
    }
    of
}

fn read_u32(txn: &impl TxnRead, db: Db, key: &[u8]) -> Result<u32> {
    let val = txn.get(db, key).ok_or_else(|| JournalError::Malformed {
        detail: format!("missing metadata record '{}'", String::from_utf8_lossy(key)),
    })?;
    let raw: [u8; 4] = val.as_ref().try_into().map_err(|_| JournalError::Malformed {
        detail: format!(
            "metadata record '{}' of {} octets",
            String::from_utf8_lossy(key),
            val.len()
        ),
    })?;
    Ok(u32::from_be_bytes(raw))
}

/// Loads the metadata set, or `None` for a freshly created journal (no
/// version record yet).
pub fn load(txn: &impl TxnRead, db: Db) -> Result<Option<Metadata>> {
    let Some(version_val) = txn.get(db, KEY_VERSION) else {
        return Ok(None);
    };
    let stored = match <[u8; 4]>::try_from(version_val.as_ref()) {
        Ok(raw) => u32::from_be_bytes(raw),
        // A version record of the wrong size also fails the major check.
        Err(_) => 0,
    };
    if first_digit(stored) != first_digit(VERSION) {
        return Err(JournalError::Unsupported { stored });
    }

    let flags_raw = read_u32(txn, db, KEY_FLAGS)?;
    let flags = MetaFlags::from_bits(flags_raw).ok_or_else(|| JournalError::Malformed {
        detail: format!("unknown metadata flags {flags_raw:#x}"),
    })?;

    Ok(Some(Metadata {
        first_serial: Serial(read_u32(txn, db, KEY_FIRST_SERIAL)?),
        last_serial: Serial(read_u32(txn, db, KEY_LAST_SERIAL)?),
        last_serial_to: Serial(read_u32(txn, db, KEY_LAST_SERIAL_TO)?),
        last_flushed: Serial(read_u32(txn, db, KEY_LAST_FLUSHED)?),
        merged_serial: Serial(read_u32(txn, db, KEY_MERGED_SERIAL)?),
        dirty_serial: Serial(read_u32(txn, db, KEY_DIRTY_SERIAL)?),
        flags,
    }))
}

/// Writes the mutable metadata fields into the transaction.
pub fn write_fields(txn: &mut WriteTxn<'_>, db: Db, meta: &Metadata) -> StoreResult<()> {
    for (key, value) in [
        (KEY_FIRST_SERIAL, meta.first_serial.get()),
        (KEY_LAST_SERIAL, meta.last_serial.get()),
        (KEY_LAST_SERIAL_TO, meta.last_serial_to.get()),
        (KEY_LAST_FLUSHED, meta.last_flushed.get()),
        (KEY_MERGED_SERIAL, meta.merged_serial.get()),
        (KEY_DIRTY_SERIAL, meta.dirty_serial.get()),
        (KEY_FLAGS, meta.flags.bits()),
    ] {
        // Reserved puts: the metadata set must be writable even when the
        // transaction has spent its operation budget on data.
        txn.put_reserved(db, key, &value.to_be_bytes())?;
    }
    Ok(())
}

/// Writes the identity records of a freshly created journal: the format
/// version, the owning zone, and zeroed fields.
pub fn init(txn: &mut WriteTxn<'_>, db: Db, zone: &Dname) -> StoreResult<()> {
    txn.put(db, KEY_VERSION, &VERSION.to_be_bytes())?;
    txn.put(db, KEY_ZONE_NAME, zone.as_wire())?;
    write_fields(txn, db, &Metadata::default())
}

/// Reads the stored zone name.
pub fn read_zone_name(txn: &impl TxnRead, db: Db) -> Result<Dname> {
    let val = txn.get(db, KEY_ZONE_NAME).ok_or_else(|| JournalError::Malformed {
        detail: "missing metadata record 'zone_name'".to_string(),
    })?;
    Dname::from_wire(&val)
}
