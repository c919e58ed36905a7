use std::fmt;

use crate::error::{Error, Result};

/// Largest value representable with four 7-bit digits.
pub const MAX_VALUE: u32 = 0x0FFF_FFFF;

/// Split a 28-bit value into four 7-bit digits, most significant first.
pub fn to_digits(value: u32) -> [u8; 4] {
    [
        ((value >> 21) & 0x7F) as u8,
        ((value >> 14) & 0x7F) as u8,
        ((value >> 7) & 0x7F) as u8,
        (value & 0x7F) as u8,
    ]
}

/// Join four 7-bit digits into a 28-bit value. Digits must already be 7-bit.
pub fn from_digits(digits: [u8; 4]) -> u32 {
    (digits[0] as u32) << 21 | (digits[1] as u32) << 14 | (digits[2] as u32) << 7 | digits[3] as u32
}

/// A device address.
///
/// Stored as the plain integer so that arithmetic carries from one 7-bit
/// digit into the next, the same way the device walks a span longer than
/// 127 bytes into the next-higher address byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(u32);

impl Address {
    pub fn from_bytes(b1: u8, b2: u8, b3: u8, b4: u8) -> Result<Self> {
        let bytes = [b1, b2, b3, b4];
        if bytes.iter().any(|&b| b > 0x7F) {
            return Err(Error::InvalidAddress(format!(
                "address byte out of 7-bit range: {:02X?}",
                bytes
            )));
        }
        Ok(Address(from_digits(bytes)))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        match bytes {
            [b1, b2, b3, b4] => Self::from_bytes(*b1, *b2, *b3, *b4),
            _ => Err(Error::InvalidAddress(format!(
                "address needs 4 bytes, got {}",
                bytes.len()
            ))),
        }
    }

    pub fn from_value(value: u32) -> Result<Self> {
        if value > MAX_VALUE {
            return Err(Error::InvalidAddress(format!(
                "address value {:#X} exceeds 28 bits",
                value
            )));
        }
        Ok(Address(value))
    }

    /// Build from location bytes and a block selector; every digit is masked to 7 bits.
    pub(crate) fn from_parts(location: (u8, u8), selector: u8) -> Self {
        Address(from_digits([
            location.0 & 0x7F,
            location.1 & 0x7F,
            selector & 0x7F,
            0,
        ]))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn to_bytes(self) -> [u8; 4] {
        to_digits(self.0)
    }

    /// Domain and location bytes (first two digits).
    pub fn location(self) -> (u8, u8) {
        let b = self.to_bytes();
        (b[0], b[1])
    }

    /// Third digit, which identifies the parameter block within a patch.
    pub fn selector(self) -> u8 {
        self.to_bytes()[2]
    }

    pub fn add(self, offset: usize) -> Result<Address> {
        let value = self.0 as u64 + offset as u64;
        if value > MAX_VALUE as u64 {
            return Err(Error::address(self, "offset overflows 28-bit address space"));
        }
        Ok(Address(value as u32))
    }

    /// Distance from `self` to `other`.
    ///
    /// Only defined when both addresses share their domain and location
    /// bytes; the result is negative when `other` lies below `self`.
    pub fn offset_of(self, other: Address) -> Result<i64> {
        if self.location() != other.location() {
            return Err(Error::address(other, "address lies in a different location"));
        }
        Ok(other.0 as i64 - self.0 as i64)
    }

    /// Compare only the parameter-identity digits, ignoring whether the
    /// address points at the temporary patch or a user patch slot.
    pub fn fuzzy_eq(self, other: Address) -> bool {
        self.to_bytes()[2..] == other.to_bytes()[2..]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.to_bytes();
        write!(f, "{:02X} {:02X} {:02X} {:02X}", b[0], b[1], b[2], b[3])
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digits_round_trip() {
        for value in [0, 1, 0x7F, 0x80, 0x3FFF, 0x4000, 0x12_3456, MAX_VALUE] {
            let digits = to_digits(value);
            assert!(digits.iter().all(|&d| d <= 0x7F));
            assert_eq!(from_digits(digits), value);
        }
    }

    #[test]
    fn test_rejects_high_bit() {
        assert!(matches!(
            Address::from_bytes(0x10, 0x80, 0x00, 0x00),
            Err(Error::InvalidAddress(_))
        ));
        assert!(matches!(
            Address::from_value(MAX_VALUE + 1),
            Err(Error::InvalidAddress(_))
        ));
        assert!(matches!(
            Address::from_slice(&[0x10, 0x00, 0x00]),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_digits_round_trip_sweep() {
        // every digit pattern of the low two digits, strided over the rest
        for value in (0..=MAX_VALUE).step_by(0x1_0003).chain(0..=0x3FFF) {
            let digits = to_digits(value);
            assert!(digits.iter().all(|&d| d <= 0x7F));
            assert_eq!(from_digits(digits), value);
            let address = Address::from_bytes(digits[0], digits[1], digits[2], digits[3]).unwrap();
            assert_eq!(address.value(), value);
        }
    }

    #[test]
    fn test_add_carries_into_next_digit() {
        let base = Address::from_bytes(0x10, 0x00, 0x04, 0x00).unwrap();
        let next = base.add(0x80).unwrap();
        assert_eq!(next.to_bytes(), [0x10, 0x00, 0x05, 0x00]);
        assert_eq!(base.offset_of(next).unwrap(), 0x80);
        assert_eq!(next.offset_of(base).unwrap(), -0x80);
    }

    #[test]
    fn test_offset_requires_same_location() {
        let temporary = Address::from_bytes(0x10, 0x00, 0x01, 0x00).unwrap();
        let user = Address::from_bytes(0x20, 0x05, 0x01, 0x00).unwrap();
        assert!(temporary.offset_of(user).is_err());
        assert!(temporary.fuzzy_eq(user));
        assert_ne!(temporary, user);
    }

    #[test]
    fn test_display() {
        let address = Address::from_bytes(0x20, 0x3F, 0x0A, 0x7F).unwrap();
        assert_eq!(address.to_string(), "20 3F 0A 7F");
    }
}
