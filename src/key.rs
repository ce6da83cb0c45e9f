//! # Fixed-Width Key and Value Encoding
//!
//! Every key and value stored by the tree occupies a fixed number of bytes
//! inside a node slot, so slot offsets are pure arithmetic and pages never
//! fragment. The [`FixedKey`] trait describes that contract: a type knows
//! its encoded width at compile time and can round-trip itself through a
//! byte buffer of exactly that width.
//!
//! Ordering is the type's own `Ord`; comparisons always happen on decoded
//! values, so the byte encoding does not need to be order-preserving.
//! Integers therefore use plain little-endian bytes, matching the rest of
//! the on-disk layout.
//!
//! ## Provided Implementations
//!
//! - `u32`, `u64`, `i32`, `i64` — little-endian fixed width
//! - [`FixedStr<N>`] — NUL-padded byte string of capacity `N`, ordered
//!   bytewise, used by the command-line driver for its word keys
//!
//! ## Implementing `FixedKey`
//!
//! `write_to` must fill exactly `ENCODED_LEN` bytes and `read_from` must
//! decode from exactly that many; callers always hand over a slice of the
//! correct length. Types with padding or interior mutability are not
//! suitable.

use std::fmt;
use std::str::FromStr;

use eyre::{ensure, Result};

/// A type storable inside a node slot: fixed encoded width, total order.
pub trait FixedKey: Clone + Ord + fmt::Debug {
    /// Number of bytes the encoded form occupies inside a slot.
    const ENCODED_LEN: usize;

    /// Encodes `self` into `buf`, which is exactly `ENCODED_LEN` bytes.
    fn write_to(&self, buf: &mut [u8]);

    /// Decodes a value from `buf`, which is exactly `ENCODED_LEN` bytes.
    fn read_from(buf: &[u8]) -> Self;
}

macro_rules! fixed_key_int {
    ($($ty:ty),*) => {
        $(
            impl FixedKey for $ty {
                const ENCODED_LEN: usize = size_of::<$ty>();

                fn write_to(&self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_le_bytes());
                }

                fn read_from(buf: &[u8]) -> Self {
                    <$ty>::from_le_bytes(buf.try_into().expect("slot width mismatch"))
                }
            }
        )*
    };
}

fixed_key_int!(u32, u64, i32, i64);

/// A fixed-capacity, NUL-padded byte string.
///
/// Holds up to `N` bytes; unused tail bytes are zero. Ordering is bytewise
/// over the padded buffer, which for NUL-free text matches ordinary string
/// order (a proper prefix sorts first).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedStr<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> FixedStr<N> {
    /// Builds a `FixedStr` from a string slice. Fails if the string does
    /// not fit in `N` bytes or contains NUL.
    pub fn new(s: &str) -> Result<Self> {
        ensure!(
            s.len() <= N,
            "string of {} bytes exceeds fixed capacity {}",
            s.len(),
            N
        );
        ensure!(!s.as_bytes().contains(&0), "string contains NUL byte");

        let mut bytes = [0u8; N];
        bytes[..s.len()].copy_from_slice(s.as_bytes());
        Ok(Self { bytes })
    }

    /// The stored bytes including the zero padding.
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.bytes
    }

    /// The stored text up to the first padding byte.
    pub fn as_str(&self) -> &str {
        let end = self.bytes.iter().position(|&b| b == 0).unwrap_or(N);
        std::str::from_utf8(&self.bytes[..end]).unwrap_or("")
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        Self { bytes: [0u8; N] }
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedStr({:?})", self.as_str())
    }
}

impl<const N: usize> fmt::Display for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> FromStr for FixedStr<N> {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl<const N: usize> FixedKey for FixedStr<N> {
    const ENCODED_LEN: usize = N;

    fn write_to(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.bytes);
    }

    fn read_from(buf: &[u8]) -> Self {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(buf);
        Self { bytes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<K: FixedKey>(value: K) -> K {
        let mut buf = vec![0u8; K::ENCODED_LEN];
        value.write_to(&mut buf);
        K::read_from(&buf)
    }

    #[test]
    fn int_round_trips() {
        assert_eq!(round_trip(0u32), 0);
        assert_eq!(round_trip(u32::MAX), u32::MAX);
        assert_eq!(round_trip(-1i32), -1);
        assert_eq!(round_trip(i64::MIN), i64::MIN);
        assert_eq!(round_trip(0xdead_beef_u64), 0xdead_beef_u64);
    }

    #[test]
    fn fixed_str_round_trips() {
        let s = FixedStr::<16>::new("hello").unwrap();
        assert_eq!(round_trip(s), s);
        assert_eq!(s.as_str(), "hello");
    }

    #[test]
    fn fixed_str_rejects_oversized() {
        assert!(FixedStr::<4>::new("hello").is_err());
    }

    #[test]
    fn fixed_str_rejects_nul() {
        assert!(FixedStr::<8>::new("a\0b").is_err());
    }

    #[test]
    fn fixed_str_orders_like_text() {
        let a = FixedStr::<8>::new("apple").unwrap();
        let b = FixedStr::<8>::new("banana").unwrap();
        let ap = FixedStr::<8>::new("app").unwrap();
        assert!(a < b);
        assert!(ap < a);
        assert!(FixedStr::<8>::default() < ap);
    }

    #[test]
    fn fixed_str_full_capacity() {
        let s = FixedStr::<4>::new("abcd").unwrap();
        assert_eq!(s.as_str(), "abcd");
        assert_eq!(round_trip(s), s);
    }
}
