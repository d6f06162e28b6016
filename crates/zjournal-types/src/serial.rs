//! Zone serial numbers.
//!
//! DNS zone serials are 32-bit values understood as the modulus of a
//! larger number space, with the comparison rules of [RFC 1982]. Plain
//! integer ordering gives wrong answers once a zone's serial wraps, so the
//! journal routes every "is this older" decision through this type.
//!
//! [RFC 1982]: https://tools.ietf.org/html/rfc1982

use core::cmp::Ordering;
use core::fmt;

/// A zone serial number with RFC 1982 semantics.
///
/// Comparison is partial: two values exactly `2^31` apart are neither less
/// than nor greater than each other. Addition accepts only increments up
/// to `2^31 - 1`; there is deliberately no `Add` impl, so the restriction
/// is visible at the call site.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Serial(pub u32);

impl Serial {
    /// Creates a serial from its big-endian octets.
    #[must_use]
    pub fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }

    /// Returns the big-endian octets of this serial.
    #[must_use]
    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Returns the raw integer value.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Adds `other` to `self` in the serial number space.
    ///
    /// # Panics
    ///
    /// Panics if `other` is greater than `2^31 - 1`, which RFC 1982
    /// forbids as an increment.
    #[allow(clippy::should_implement_trait)]
    #[must_use]
    pub fn add(self, other: u32) -> Self {
        assert!(other <= 0x7FFF_FFFF);
        Self(self.0.wrapping_add(other))
    }
}

impl From<u32> for Serial {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Serial> for u32 {
    fn from(serial: Serial) -> u32 {
        serial.0
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd for Serial {
    fn partial_cmp(&self, other: &Serial) -> Option<Ordering> {
        match self.0.cmp(&other.0) {
            Ordering::Equal => Some(Ordering::Equal),
            Ordering::Less => match (other.0 - self.0).cmp(&0x8000_0000) {
                Ordering::Less => Some(Ordering::Less),
                Ordering::Greater => Some(Ordering::Greater),
                Ordering::Equal => None,
            },
            Ordering::Greater => match (self.0 - other.0).cmp(&0x8000_0000) {
                Ordering::Less => Some(Ordering::Greater),
                Ordering::Greater => Some(Ordering::Less),
                Ordering::Equal => None,
            },
        }
    }
}
