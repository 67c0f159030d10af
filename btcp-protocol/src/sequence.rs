//! Sequence Number Handling
//!
//! bTCP numbers segments, not bytes, with a 16-bit counter that wraps. The
//! comparison helpers here treat the space as circular so that cumulative ACK
//! checks keep working after the counter rolls over.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// 16-bit sequence number with wraparound semantics
///
/// Ordering is circular: `a.lt(b)` holds when `b` is less than half the space
/// ahead of `a`. No `Ord` impl is provided because a circular order is not a
/// total order.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct SeqNumber(u16);

impl SeqNumber {
    /// Create a new sequence number
    #[inline]
    pub const fn new(value: u16) -> Self {
        SeqNumber(value)
    }

    /// Get the raw sequence number value
    #[inline]
    pub const fn as_raw(self) -> u16 {
        self.0
    }

    /// Pick a random initial sequence number
    pub fn random() -> Self {
        SeqNumber(rand::random())
    }

    /// Increment the sequence number by 1
    #[inline]
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// Get the next sequence number
    #[inline]
    pub fn next(self) -> Self {
        SeqNumber(self.0.wrapping_add(1))
    }

    /// Signed distance from this sequence number to `other`
    ///
    /// Positive when `other` is ahead of `self`.
    #[inline]
    pub fn distance_to(self, other: SeqNumber) -> i16 {
        other.0.wrapping_sub(self.0) as i16
    }

    /// Check if this sequence number is less than another (accounting for wraparound)
    #[inline]
    pub fn lt(self, other: SeqNumber) -> bool {
        self.distance_to(other) > 0
    }

    /// Check if this sequence number is less than or equal to another
    #[inline]
    pub fn le(self, other: SeqNumber) -> bool {
        self == other || self.lt(other)
    }

    /// Check if this sequence number is greater than another
    #[inline]
    pub fn gt(self, other: SeqNumber) -> bool {
        self.distance_to(other) < 0
    }

    /// Check if this sequence number is greater than or equal to another
    #[inline]
    pub fn ge(self, other: SeqNumber) -> bool {
        self == other || self.gt(other)
    }
}

impl fmt::Debug for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqNumber({})", self.0)
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for SeqNumber {
    fn from(value: u16) -> Self {
        SeqNumber(value)
    }
}

impl From<SeqNumber> for u16 {
    fn from(seq: SeqNumber) -> u16 {
        seq.0
    }
}

impl Add<u16> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: u16) -> SeqNumber {
        SeqNumber(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u16> for SeqNumber {
    fn add_assign(&mut self, rhs: u16) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl Sub for SeqNumber {
    type Output = i16;

    /// Signed distance from `rhs` up to `self`
    fn sub(self, rhs: SeqNumber) -> i16 {
        rhs.distance_to(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_increment_wraparound() {
        let mut seq = SeqNumber::new(u16::MAX);
        seq.increment();
        assert_eq!(seq.as_raw(), 0);
        assert_eq!(SeqNumber::new(u16::MAX).next(), SeqNumber::new(0));
    }

    #[test]
    fn test_distance_simple() {
        let a = SeqNumber::new(100);
        let b = SeqNumber::new(200);
        assert_eq!(a.distance_to(b), 100);
        assert_eq!(b.distance_to(a), -100);
        assert_eq!(b - a, 100);
    }

    #[test]
    fn test_distance_wraparound() {
        let a = SeqNumber::new(u16::MAX - 10);
        let b = SeqNumber::new(10);
        assert_eq!(a.distance_to(b), 21);
        assert_eq!(b.distance_to(a), -21);
    }

    #[test]
    fn test_comparison() {
        let a = SeqNumber::new(100);
        let b = SeqNumber::new(200);

        assert!(a.lt(b));
        assert!(a.le(b));
        assert!(b.gt(a));
        assert!(b.ge(a));
        assert!(a.le(a));
        assert!(!a.lt(a));
    }

    #[test]
    fn test_comparison_wraparound() {
        let a = SeqNumber::new(u16::MAX - 10);
        let b = SeqNumber::new(10);

        assert!(a.lt(b));
        assert!(b.gt(a));
    }

    #[test]
    fn test_add_wraparound() {
        let seq = SeqNumber::new(u16::MAX - 10);
        assert_eq!((seq + 20).as_raw(), 9);
    }

    proptest! {
        #[test]
        fn prop_add_then_distance(start in any::<u16>(), step in 0u16..0x8000) {
            let a = SeqNumber::new(start);
            prop_assert_eq!(a.distance_to(a + step), step as i16);
            prop_assert_eq!(step > 0, a.lt(a + step));
        }
    }
}
