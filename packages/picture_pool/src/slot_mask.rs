use crate::{Error, Result};

/// The maximum number of pictures a single [`PicturePool`][crate::PicturePool] can hold.
///
/// Every slot is tracked by one bit of a 64-bit availability mask.
pub const MAX_CAPACITY: usize = 64;

/// Fails with [`Error::CapacityExceeded`] if `requested` slots do not fit in a mask.
pub(crate) fn check_capacity(requested: usize) -> Result<()> {
    if requested > MAX_CAPACITY {
        return Err(Error::CapacityExceeded {
            requested,
            max: MAX_CAPACITY,
        });
    }

    Ok(())
}

/// Availability bitmask of a pool. A set bit means the slot is available for leasing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct SlotMask(u64);

impl SlotMask {
    /// A mask with the low `capacity` bits set.
    pub(crate) fn all(capacity: usize) -> Self {
        assert!(capacity <= MAX_CAPACITY, "slot mask capacity {capacity} out of range");

        // For capacity 64 the shift overflows and we want every bit set.
        let bits = u32::try_from(capacity)
            .ok()
            .and_then(|capacity| 1_u64.checked_shl(capacity))
            .map_or(u64::MAX, |bit| bit.wrapping_sub(1));

        Self(bits)
    }

    pub(crate) fn bits(self) -> u64 {
        self.0
    }

    pub(crate) fn is_set(self, index: usize) -> bool {
        self.0 & Self::bit(index) != 0
    }

    pub(crate) fn set(&mut self, index: usize) {
        self.0 |= Self::bit(index);
    }

    pub(crate) fn clear(&mut self, index: usize) {
        self.0 &= !Self::bit(index);
    }

    /// Number of set bits.
    pub(crate) fn count(self) -> usize {
        // Cannot truncate, there are at most 64 bits.
        self.0.count_ones() as usize
    }

    /// Index of the lowest set bit at or above `start`.
    pub(crate) fn first_set_from(self, start: usize) -> Option<usize> {
        let start = u32::try_from(start).ok()?;
        let candidates = self.0 & u64::MAX.checked_shl(start)?;

        (candidates != 0).then(|| candidates.trailing_zeros() as usize)
    }

    /// Index of the lowest clear bit below `capacity`.
    pub(crate) fn first_clear(self, capacity: usize) -> Option<usize> {
        let leased = !self.0 & Self::all(capacity).0;

        (leased != 0).then(|| leased.trailing_zeros() as usize)
    }

    fn bit(index: usize) -> u64 {
        assert!(index < MAX_CAPACITY, "slot index {index} out of range");

        1 << index
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn all_sets_low_bits() {
        assert_eq!(SlotMask::all(0).bits(), 0);
        assert_eq!(SlotMask::all(3).bits(), 0b111);
        assert_eq!(SlotMask::all(63).bits(), u64::MAX >> 1);
        assert_eq!(SlotMask::all(64).bits(), u64::MAX);
    }

    #[test]
    #[should_panic]
    fn all_rejects_oversized_capacity() {
        drop(SlotMask::all(65));
    }

    #[test]
    fn set_and_clear() {
        let mut mask = SlotMask::all(4);

        mask.clear(1);
        assert!(!mask.is_set(1));
        assert!(mask.is_set(0));
        assert_eq!(mask.count(), 3);

        mask.set(1);
        assert_eq!(mask, SlotMask::all(4));

        mask.clear(63);
        assert_eq!(mask.bits(), 0b1111);
    }

    #[test]
    fn first_set_from_scans_upwards() {
        let mut mask = SlotMask::all(5);
        mask.clear(0);
        mask.clear(2);

        assert_eq!(mask.first_set_from(0), Some(1));
        assert_eq!(mask.first_set_from(2), Some(3));
        assert_eq!(mask.first_set_from(5), None);
        assert_eq!(mask.first_set_from(64), None);
        assert_eq!(mask.first_set_from(1000), None);
    }

    #[test]
    fn first_clear_ignores_bits_beyond_capacity() {
        let mut mask = SlotMask::all(3);
        assert_eq!(mask.first_clear(3), None);

        mask.clear(2);
        assert_eq!(mask.first_clear(3), Some(2));

        mask.clear(0);
        assert_eq!(mask.first_clear(3), Some(0));

        assert_eq!(SlotMask::all(64).first_clear(64), None);
    }

    #[test]
    fn capacity_check() {
        check_capacity(0).unwrap();
        check_capacity(MAX_CAPACITY).unwrap();

        assert!(matches!(
            check_capacity(MAX_CAPACITY + 1),
            Err(Error::CapacityExceeded {
                requested: 65,
                max: 64
            })
        ));
    }
}
