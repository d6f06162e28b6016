//! A minimal resource record.
//!
//! The journal never interprets record data; it needs records only as the
//! payload of changesets, with a stable wire encoding and whole-record
//! equality (the unit of the merge cancellation algebra).

use zjournal_error::{JournalError, Result};

use crate::name::Dname;

/// The IN class.
pub const CLASS_IN: u16 = 1;

/// A record type.
pub const RTYPE_A: u16 = 1;
/// SOA record type.
pub const RTYPE_SOA: u16 = 6;
/// TXT record type.
pub const RTYPE_TXT: u16 = 16;

/// One resource record: owner, type, class, TTL and raw rdata.
///
/// Wire encoding, all integers big-endian:
///
/// ```text
/// [owner: wire-format dname] [rtype: u16] [class: u16] [ttl: u32]
/// [rdlen: u16] [rdata: rdlen octets]
/// ```
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Record {
    pub owner: Dname,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl Record {
    /// Creates an IN-class record.
    #[must_use]
    pub fn new(owner: Dname, rtype: u16, ttl: u32, rdata: Vec<u8>) -> Self {
        Self {
            owner,
            rtype,
            class: CLASS_IN,
            ttl,
            rdata,
        }
    }

    /// Encoded size in octets.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.owner.len() + 2 + 2 + 4 + 2 + self.rdata.len()
    }

    /// Appends the wire encoding to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.owner.as_wire());
        out.extend_from_slice(&self.rtype.to_be_bytes());
        out.extend_from_slice(&self.class.to_be_bytes());
        out.extend_from_slice(&self.ttl.to_be_bytes());
        out.extend_from_slice(&(self.rdata.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.rdata);
    }

    /// Decodes one record from the front of `input`, returning it and the
    /// number of octets consumed.
    pub fn decode_from(input: &[u8]) -> Result<(Self, usize)> {
        // The owner is self-delimiting: scan to the root label first.
        let mut pos = 0;
        loop {
            let len = *input.get(pos).ok_or_else(truncated)? as usize;
            pos += 1;
            if len == 0 {
                break;
            }
            pos += len;
        }
        if pos > input.len() {
            return Err(truncated());
        }
        let owner = Dname::from_wire(&input[..pos])?;

        let fixed = input.get(pos..pos + 10).ok_or_else(truncated)?;
        let rtype = u16::from_be_bytes([fixed[0], fixed[1]]);
        let class = u16::from_be_bytes([fixed[2], fixed[3]]);
        let ttl = u32::from_be_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);
        let rdlen = u16::from_be_bytes([fixed[8], fixed[9]]) as usize;
        pos += 10;

        let rdata = input.get(pos..pos + rdlen).ok_or_else(truncated)?.to_vec();
        pos += rdlen;

        Ok((
            Self {
                owner,
                rtype,
                class,
                ttl,
                rdata,
            },
            pos,
        ))
    }
}

fn truncated() -> JournalError {
    JournalError::Malformed {
        detail: "truncated record".to_string(),
    }
}
