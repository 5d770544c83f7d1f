//! Fixed-width host/target addresses.
//!
//! An [`Address`] is a 32- or 64-bit unsigned integer, stored internally as a
//! little-endian sequence of 16-bit limbs, together with a preferred
//! [`Endian`] used when no explicit one is given to [`Address::bytes`]. Two
//! addresses of different widths never compare or combine; every operation
//! that would mix widths returns [`AddressWidthMismatch`](crate::error::AssemblerError::AddressWidthMismatch).

use crate::error::AssemblerError;
use std::cmp::Ordering;
use std::fmt;

/// The bit width of an [`Address`]. Only 32 and 64 bits are supported.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    W32,
    W64,
}

impl Width {
    pub fn bits(self) -> u32 {
        match self {
            Width::W32 => 32,
            Width::W64 => 64,
        }
    }

    pub fn bytes(self) -> usize {
        (self.bits() / 8) as usize
    }

    fn limb_count(self) -> usize {
        self.bytes() / 2
    }

    fn mask(self) -> u128 {
        if self.bits() == 128 {
            u128::MAX
        } else {
            (1u128 << self.bits()) - 1
        }
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

impl fmt::Debug for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// Byte order used when serializing an [`Address`] to or from a byte slice.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Endian {
    Little,
    Big,
}

/// A fixed-width unsigned address.
///
/// Internally stored as up to four little-endian 16-bit limbs (only the
/// first `width.limb_count()` are meaningful); arithmetic is performed via a
/// 128-bit accumulator and masked back down to `width` bits.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Address {
    width: Width,
    limbs: [u16; 4],
    preferred_endian: Endian,
}

impl Address {
    /// Builds an address of the given width from a raw value, truncating any
    /// bits above `width`.
    pub fn from_value(width: Width, value: u64, preferred_endian: Endian) -> Address {
        let masked = (value as u128) & width.mask();
        let mut limbs = [0u16; 4];
        for i in 0..width.limb_count() {
            limbs[i] = ((masked >> (16 * i)) & 0xffff) as u16;
        }
        Address {
            width,
            limbs,
            preferred_endian,
        }
    }

    /// Parses an address out of its byte representation. `bytes` must be
    /// exactly 4 or 8 bytes long; the width is inferred from the length.
    pub fn from_bytes(bytes: &[u8], endian: Endian) -> Result<Address, AssemblerError> {
        let width = match bytes.len() {
            4 => Width::W32,
            8 => Width::W64,
            n => return Err(AssemblerError::InvalidAddressByteLength(n)),
        };
        let mut value: u128 = 0;
        match endian {
            Endian::Little => {
                for (i, b) in bytes.iter().enumerate() {
                    value |= (*b as u128) << (8 * i);
                }
            }
            Endian::Big => {
                for (i, b) in bytes.iter().rev().enumerate() {
                    value |= (*b as u128) << (8 * i);
                }
            }
        }
        Ok(Address::from_value(width, value as u64, endian))
    }

    pub fn width(&self) -> Width {
        self.width
    }

    pub fn preferred_endian(&self) -> Endian {
        self.preferred_endian
    }

    pub fn value(&self) -> u64 {
        let mut acc: u128 = 0;
        for i in 0..self.width.limb_count() {
            acc |= (self.limbs[i] as u128) << (16 * i);
        }
        acc as u64
    }

    /// Serializes this address to bytes, using `endian` if given or this
    /// address's preferred endianness otherwise.
    pub fn bytes(&self, endian: Option<Endian>) -> Vec<u8> {
        let endian = endian.unwrap_or(self.preferred_endian);
        let value = self.value();
        let n = self.width.bytes();
        let mut out = vec![0u8; n];
        match endian {
            Endian::Little => {
                for i in 0..n {
                    out[i] = ((value >> (8 * i)) & 0xff) as u8;
                }
            }
            Endian::Big => {
                for i in 0..n {
                    out[n - 1 - i] = ((value >> (8 * i)) & 0xff) as u8;
                }
            }
        }
        out
    }

    /// Returns a copy of this address with the same width, value and
    /// preferred endianness.
    pub fn copy(&self) -> Address {
        self.clone()
    }

    /// Adds a signed offset, erroring if the result leaves `0 ..= 2^width - 1`.
    /// This is a checked operation, unlike [`Address::add`].
    pub fn add_offset(&self, offset: i64) -> Result<Address, AssemblerError> {
        let new = self.value() as i128 + offset as i128;
        self.from_checked(new)
    }

    /// Subtracts a signed offset; equivalent to `add_offset(-offset)` but
    /// avoids the `i64::MIN` negation edge case by working in `i128`.
    pub fn sub_offset(&self, offset: i64) -> Result<Address, AssemblerError> {
        let new = self.value() as i128 - offset as i128;
        self.from_checked(new)
    }

    fn from_checked(&self, new: i128) -> Result<Address, AssemblerError> {
        if new < 0 {
            return Err(AssemblerError::AddressUnderflow { width: self.width });
        }
        if new > self.width.mask() as i128 {
            return Err(AssemblerError::AddressOverflow { width: self.width });
        }
        Ok(Address::from_value(
            self.width,
            new as u64,
            self.preferred_endian,
        ))
    }

    /// Adds two addresses of the same width modulo `2^width`, discarding any
    /// carry out of the top bit. Unlike [`Address::add_offset`] this never
    /// fails on overflow — it is meant for combining a base and a relative
    /// displacement that are already known to land in range.
    pub fn add(&self, other: &Address) -> Result<Address, AssemblerError> {
        self.require_same_width(other)?;
        let sum = (self.value() as u128 + other.value() as u128) & self.width.mask();
        Ok(Address::from_value(
            self.width,
            sum as u64,
            self.preferred_endian,
        ))
    }

    /// One's-complement (bitwise NOT) modulo `2^width`: every bit within
    /// `width` is flipped. The two's-complement negation identity is
    /// obtained by composing with `add_offset(1)` at the call site:
    /// `self.complement().add_offset(1)?.add(self)?.value() == 0`.
    pub fn complement(&self) -> Address {
        let mask = self.width.mask();
        let inv = mask - (self.value() as u128);
        Address::from_value(self.width, inv as u64, self.preferred_endian)
    }

    /// Compares two addresses of the same width numerically (equivalently,
    /// lexicographically on their limbs from most to least significant).
    pub fn compare(&self, other: &Address) -> Result<Ordering, AssemblerError> {
        self.require_same_width(other)?;
        Ok(self.value().cmp(&other.value()))
    }

    /// Computes `other - self` as a 32-bit two's-complement displacement and
    /// serializes it. Both addresses must be 32-bit; 64-bit relative offsets
    /// are out of scope (see [`AssemblerError::InvalidWidth`]).
    pub fn offset_bytes_to(
        &self,
        other: &Address,
        endian: Option<Endian>,
    ) -> Result<Vec<u8>, AssemblerError> {
        if self.width != Width::W32 {
            return Err(AssemblerError::InvalidWidth(self.width.bits()));
        }
        self.require_same_width(other)?;
        let mask = self.width.mask();
        let diff = (other.value() as u128).wrapping_sub(self.value() as u128) & mask;
        let diff_addr = Address::from_value(self.width, diff as u64, self.preferred_endian);
        Ok(diff_addr.bytes(endian))
    }

    fn require_same_width(&self, other: &Address) -> Result<(), AssemblerError> {
        if self.width != other.width {
            return Err(AssemblerError::AddressWidthMismatch {
                expected: self.width,
                found: other.width,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address<{}>(0x{:x})", self.width, self.value())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.width {
            Width::W32 => write!(f, "0x{:08x}", self.value()),
            Width::W64 => write!(f, "0x{:016x}", self.value()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let a = Address::from_value(Width::W32, 0xdead_beef, Endian::Little);
        let bytes = a.bytes(None);
        assert_eq!(bytes, vec![0xef, 0xbe, 0xad, 0xde]);
        let b = Address::from_bytes(&bytes, Endian::Little).unwrap();
        assert_eq!(a.compare(&b).unwrap(), Ordering::Equal);
    }

    #[test]
    fn big_endian_round_trip() {
        let a = Address::from_value(Width::W64, 0x0102_0304_0506_0708, Endian::Big);
        let bytes = a.bytes(None);
        assert_eq!(bytes, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let b = Address::from_bytes(&bytes, Endian::Big).unwrap();
        assert_eq!(a.value(), b.value());
    }

    #[test]
    fn add_offset_and_sub_offset_are_inverse() {
        let a = Address::from_value(Width::W32, 100, Endian::Little);
        let b = a.add_offset(50).unwrap();
        let c = b.sub_offset(50).unwrap();
        assert_eq!(a.value(), c.value());
    }

    #[test]
    fn add_offset_overflow_is_an_error() {
        let a = Address::from_value(Width::W32, u32::MAX as u64, Endian::Little);
        assert!(matches!(
            a.add_offset(1),
            Err(AssemblerError::AddressOverflow { .. })
        ));
    }

    #[test]
    fn add_offset_underflow_is_an_error() {
        let a = Address::from_value(Width::W32, 0, Endian::Little);
        assert!(matches!(
            a.sub_offset(1),
            Err(AssemblerError::AddressUnderflow { .. })
        ));
    }

    #[test]
    fn complement_of_zero_is_all_ones() {
        let a = Address::from_value(Width::W32, 0, Endian::Little);
        assert_eq!(a.complement().value(), u32::MAX as u64);
    }

    #[test]
    fn complement_then_increment_matches_two_complement_identity() {
        let a = Address::from_value(Width::W32, 5, Endian::Little);
        let c = a.complement().add_offset(1).unwrap();
        let sum = a.add(&c).unwrap();
        assert_eq!(sum.value(), 0);
    }

    #[test]
    fn width_mismatch_is_rejected() {
        let a = Address::from_value(Width::W32, 1, Endian::Little);
        let b = Address::from_value(Width::W64, 1, Endian::Little);
        assert!(matches!(
            a.add(&b),
            Err(AssemblerError::AddressWidthMismatch { .. })
        ));
    }

    #[test]
    fn offset_bytes_to_wraps_modularly() {
        let base = Address::from_value(Width::W32, 0x1000, Endian::Little);
        let target = Address::from_value(Width::W32, 0x0f00, Endian::Little);
        let bytes = base.offset_bytes_to(&target, Some(Endian::Little)).unwrap();
        let back = Address::from_bytes(&bytes, Endian::Little).unwrap();
        assert_eq!(back.value() as i32, -0x100);
    }
}
