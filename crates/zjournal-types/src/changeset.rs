//! Zone changesets.
//!
//! A changeset is the delta between two versions of one zone: the records
//! removed, the records added, and the SOA serial pair `from -> to` that
//! names the versions. The journal stores changesets as opaque payloads;
//! the operations here are the whole surface it consumes: serialized
//! size, chunked serialization, chunked deserialization, and merge.
//!
//! Serialized layout, all integers big-endian:
//!
//! ```text
//! [serial_from: u32] [serial_to: u32]
//! [removal_count: u32] [addition_count: u32]
//! [removals: records] [additions: records]
//! ```
//!
//! Chunking is a plain byte split: the serialized stream cut into pieces
//! of at most the requested capacity. Concatenating the chunks in order
//! restores the stream exactly.

use zjournal_error::{JournalError, Result};

use crate::name::Dname;
use crate::record::Record;
use crate::serial::Serial;

const FIXED_HEADER_LEN: usize = 4 + 4 + 4 + 4;

/// A delta between two SOA serials of one zone.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Changeset {
    pub apex: Dname,
    pub serial_from: Serial,
    pub serial_to: Serial,
    pub removals: Vec<Record>,
    pub additions: Vec<Record>,
}

impl Changeset {
    /// Creates an empty changeset for the given serial transition.
    #[must_use]
    pub fn new(apex: Dname, serial_from: Serial, serial_to: Serial) -> Self {
        Self {
            apex,
            serial_from,
            serial_to,
            removals: Vec::new(),
            additions: Vec::new(),
        }
    }

    /// Records an addition, cancelling a pending removal of the same
    /// record if one exists.
    pub fn add_addition(&mut self, record: Record) {
        if let Some(pos) = self.removals.iter().position(|r| *r == record) {
            self.removals.remove(pos);
        } else {
            self.additions.push(record);
        }
    }

    /// Records a removal, cancelling a pending addition of the same
    /// record if one exists.
    pub fn add_removal(&mut self, record: Record) {
        if let Some(pos) = self.additions.iter().position(|r| *r == record) {
            self.additions.remove(pos);
        } else {
            self.removals.push(record);
        }
    }

    /// Size of the serialized stream in octets.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        FIXED_HEADER_LEN
            + self
                .removals
                .iter()
                .chain(self.additions.iter())
                .map(Record::encoded_len)
                .sum::<usize>()
    }

    /// Serializes into chunks of at most `max_chunk` octets each.
    pub fn serialize_chunks(&self, max_chunk: usize) -> Result<Vec<Vec<u8>>> {
        if max_chunk == 0 {
            return Err(JournalError::InvalidArgument {
                what: "zero chunk capacity",
            });
        }
        let mut stream = Vec::with_capacity(self.serialized_size());
        stream.extend_from_slice(&self.serial_from.to_be_bytes());
        stream.extend_from_slice(&self.serial_to.to_be_bytes());
        stream.extend_from_slice(&(self.removals.len() as u32).to_be_bytes());
        stream.extend_from_slice(&(self.additions.len() as u32).to_be_bytes());
        for record in self.removals.iter().chain(self.additions.iter()) {
            record.encode_into(&mut stream);
        }
        Ok(stream.chunks(max_chunk).map(<[u8]>::to_vec).collect())
    }

    /// Rebuilds a changeset from its chunk payloads, in order.
    pub fn deserialize_chunks(apex: Dname, chunks: &[&[u8]]) -> Result<Self> {
        let stream: Vec<u8> = chunks.concat();
        if stream.len() < FIXED_HEADER_LEN {
            return Err(JournalError::Malformed {
                detail: format!("changeset stream of {} octets", stream.len()),
            });
        }
        let serial_from = Serial::from_be_bytes(stream[0..4].try_into().unwrap());
        let serial_to = Serial::from_be_bytes(stream[4..8].try_into().unwrap());
        let removal_count = u32::from_be_bytes(stream[8..12].try_into().unwrap()) as usize;
        let addition_count = u32::from_be_bytes(stream[12..16].try_into().unwrap()) as usize;

        let mut pos = FIXED_HEADER_LEN;
        let mut decode_list = |count: usize| -> Result<Vec<Record>> {
            let mut records = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                let (record, used) = Record::decode_from(&stream[pos..])?;
                records.push(record);
                pos += used;
            }
            Ok(records)
        };
        let removals = decode_list(removal_count)?;
        let additions = decode_list(addition_count)?;
        if pos != stream.len() {
            return Err(JournalError::Malformed {
                detail: "trailing octets after changeset records".to_string(),
            });
        }

        Ok(Self {
            apex,
            serial_from,
            serial_to,
            removals,
            additions,
        })
    }

    /// Folds `other` into `self`, advancing `serial_to`.
    ///
    /// Removals in `other` cancel matching pending additions and
    /// additions cancel matching pending removals, so a record removed
    /// and later re-added leaves no trace in the merged delta.
    pub fn merge(&mut self, other: &Changeset) -> Result<()> {
        if self.serial_to != other.serial_from {
            return Err(JournalError::InvalidArgument {
                what: "merging discontinuous changesets",
            });
        }
        for record in &other.removals {
            self.add_removal(record.clone());
        }
        for record in &other.additions {
            self.add_addition(record.clone());
        }
        self.serial_to = other.serial_to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RTYPE_A;

    fn apex() -> Dname {
        Dname::parse("test").unwrap()
    }

    fn rr(label: &[u8], rdata: &[u8]) -> Record {
        Record::new(apex().prepend(label).unwrap(), RTYPE_A, 3600, rdata.to_vec())
    }

    fn sample(from: u32, to: u32) -> Changeset {
        let mut ch = Changeset::new(apex(), Serial(from), Serial(to));
        ch.add_removal(rr(b"old", b"\x01\x02\x03\x04"));
        ch.add_addition(rr(b"new", b"\x05\x06\x07\x08"));
        ch
    }

    #[test]
    fn chunked_round_trip() {
        let ch = sample(7, 8);
        for max_chunk in [1, 7, 16, 64, 4096] {
            let chunks = ch.serialize_chunks(max_chunk).unwrap();
            assert!(chunks.iter().all(|c| c.len() <= max_chunk));
            assert_eq!(
                chunks.iter().map(Vec::len).sum::<usize>(),
                ch.serialized_size()
            );
            let borrowed: Vec<&[u8]> = chunks.iter().map(Vec::as_slice).collect();
            assert_eq!(Changeset::deserialize_chunks(apex(), &borrowed).unwrap(), ch);
        }
    }

    #[test]
    fn deserialize_rejects_truncated_stream() {
        let chunks = sample(0, 1).serialize_chunks(4096).unwrap();
        let cut = &chunks[0][..chunks[0].len() - 1];
        assert!(Changeset::deserialize_chunks(apex(), &[cut]).is_err());
    }

    #[test]
    fn merge_cancels_remove_then_re_add() {
        // c0 (0->1): +A +B, c1 (1->2): -B +C, c2 (2->3): -C +B.
        let a = rr(b"a", b"\x01\x01\x01\x01");
        let b = rr(b"b", b"\x02\x02\x02\x02");
        let c = rr(b"c", b"\x03\x03\x03\x03");

        let mut merged = Changeset::new(apex(), Serial(0), Serial(1));
        merged.add_addition(a.clone());
        merged.add_addition(b.clone());

        let mut c1 = Changeset::new(apex(), Serial(1), Serial(2));
        c1.add_removal(b.clone());
        c1.add_addition(c.clone());

        let mut c2 = Changeset::new(apex(), Serial(2), Serial(3));
        c2.add_removal(c.clone());
        c2.add_addition(b.clone());

        merged.merge(&c1).unwrap();
        merged.merge(&c2).unwrap();

        assert_eq!(merged.serial_from, Serial(0));
        assert_eq!(merged.serial_to, Serial(3));
        assert_eq!(merged.additions, vec![a, b]);
        assert!(merged.removals.is_empty());
    }

    #[test]
    fn merge_rejects_serial_gap() {
        let mut base = sample(0, 1);
        assert!(base.merge(&sample(5, 6)).is_err());
    }
}
