//! Canonical wire-format domain names.
//!
//! The journal stores the owning zone's apex as a wire-format dname (a
//! sequence of length-prefixed labels terminated by the root label), and
//! record owners use the same representation. Names are normalized to
//! lowercase on construction, so equality is canonical equality.

use core::fmt;

use zjournal_error::{JournalError, Result};

/// Maximum wire length of a domain name, including the root label.
pub const MAX_NAME_LEN: usize = 255;

/// Maximum length of a single label.
pub const MAX_LABEL_LEN: usize = 63;

/// A canonical (lowercased) wire-format domain name.
///
/// The underlying octets are always a valid label sequence ending with the
/// root label, e.g. `\x04test\x00` for `test.`.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Dname(Vec<u8>);

impl Dname {
    /// The root name, a single zero octet.
    #[must_use]
    pub fn root() -> Self {
        Self(vec![0])
    }

    /// Parses a name from presentation format, e.g. `"test"` or
    /// `"www.example.com."`. Escapes are not supported; labels are plain
    /// byte sequences split on `.`.
    pub fn parse(text: &str) -> Result<Self> {
        if text.is_empty() || text == "." {
            return Ok(Self::root());
        }
        let mut wire = Vec::with_capacity(text.len() + 2);
        for label in text.strip_suffix('.').unwrap_or(text).split('.') {
            if label.is_empty() {
                return Err(JournalError::InvalidArgument {
                    what: "empty label in domain name",
                });
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(JournalError::InvalidArgument {
                    what: "domain name label longer than 63 octets",
                });
            }
            wire.push(label.len() as u8);
            wire.extend(label.bytes().map(|b| b.to_ascii_lowercase()));
        }
        wire.push(0);
        if wire.len() > MAX_NAME_LEN {
            return Err(JournalError::InvalidArgument {
                what: "domain name longer than 255 octets",
            });
        }
        Ok(Self(wire))
    }

    /// Builds a name from wire-format octets, validating the label
    /// structure.
    pub fn from_wire(wire: &[u8]) -> Result<Self> {
        if wire.is_empty() || wire.len() > MAX_NAME_LEN {
            return Err(JournalError::Malformed {
                detail: format!("domain name of {} octets", wire.len()),
            });
        }
        let mut pos = 0;
        loop {
            let len = *wire.get(pos).ok_or_else(|| JournalError::Malformed {
                detail: "truncated domain name".to_string(),
            })? as usize;
            pos += 1;
            if len == 0 {
                break;
            }
            if len > MAX_LABEL_LEN || pos + len > wire.len() {
                return Err(JournalError::Malformed {
                    detail: "invalid label length in domain name".to_string(),
                });
            }
            pos += len;
        }
        if pos != wire.len() {
            return Err(JournalError::Malformed {
                detail: "trailing octets after root label".to_string(),
            });
        }
        Ok(Self(wire.iter().map(|b| b.to_ascii_lowercase()).collect()))
    }

    /// Returns a new name with `label` prepended, e.g. turning the apex
    /// `test.` into `xyz.test.`.
    pub fn prepend(&self, label: &[u8]) -> Result<Self> {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(JournalError::InvalidArgument {
                what: "label must be 1..=63 octets",
            });
        }
        let mut wire = Vec::with_capacity(1 + label.len() + self.0.len());
        wire.push(label.len() as u8);
        wire.extend(label.iter().map(|b| b.to_ascii_lowercase()));
        wire.extend_from_slice(&self.0);
        if wire.len() > MAX_NAME_LEN {
            return Err(JournalError::InvalidArgument {
                what: "domain name longer than 255 octets",
            });
        }
        Ok(Self(wire))
    }

    /// The wire-format octets, root label included.
    #[must_use]
    pub fn as_wire(&self) -> &[u8] {
        &self.0
    }

    /// Wire length in octets.
    #[must_use]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this is the root name.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == [0]
    }
}

impl fmt::Display for Dname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        let mut pos = 0;
        while self.0[pos] != 0 {
            let len = self.0[pos] as usize;
            for &b in &self.0[pos + 1..pos + 1 + len] {
                if b.is_ascii_graphic() && b != b'.' && b != b'\\' {
                    write!(f, "{}", b as char)?;
                } else {
                    write!(f, "\\{b:03}")?;
                }
            }
            f.write_str(".")?;
            pos += 1 + len;
        }
        Ok(())
    }
}
