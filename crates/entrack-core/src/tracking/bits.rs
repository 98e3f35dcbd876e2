//! Bit-packed lifecycle state plus one "modified" flag per property.
//!
//! Layout (32-bit words):
//! - word 0, bits 0..3: `EntityState`
//! - bit `index + 3` across the word array: property `index` is modified
//! - bits past `3 + property_count` in the last word are padding and stay 0

use crate::{STATE_BITS_RESERVED, error::InternalError, tracking::EntityState};

const WORD_BITS: usize = u32::BITS as usize;
const STATE_MASK: u32 = (1 << STATE_BITS_RESERVED) - 1;

///
/// StateBits
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StateBits {
    words: Box<[u32]>,
    property_count: usize,
}

impl StateBits {
    /// Allocate bits for `property_count` properties. Zero properties still
    /// allocates the word holding the state field.
    #[must_use]
    pub fn new(property_count: usize) -> Self {
        let total = STATE_BITS_RESERVED + property_count;
        let words = total.div_ceil(WORD_BITS).max(1);

        Self {
            words: vec![0; words].into_boxed_slice(),
            property_count,
        }
    }

    #[must_use]
    pub const fn property_count(&self) -> usize {
        self.property_count
    }

    #[must_use]
    pub fn entity_state(&self) -> EntityState {
        EntityState::from_bits(self.words[0] & STATE_MASK)
    }

    /// Set the state. `Modified` marks every property modified; any other
    /// state clears all property flags.
    pub fn set_entity_state(&mut self, state: EntityState) {
        self.write_state(state);
        self.fill_flags(state == EntityState::Modified);
    }

    /// Set the state without touching property flags.
    pub fn set_entity_state_preserving_flags(&mut self, state: EntityState) {
        self.write_state(state);
    }

    /// Modified flag for one property, gated by the state: reports false
    /// unless the entry is `Modified`.
    pub fn is_property_modified(&self, index: usize) -> Result<bool, InternalError> {
        let (word, mask) = self.locate(index)?;

        Ok(self.entity_state() == EntityState::Modified && self.words[word] & mask != 0)
    }

    /// Flip one property flag. Never changes the entity state.
    pub fn set_property_modified(&mut self, index: usize, modified: bool) -> Result<(), InternalError> {
        let (word, mask) = self.locate(index)?;
        if modified {
            self.words[word] |= mask;
        } else {
            self.words[word] &= !mask;
        }

        Ok(())
    }

    /// Whether any property flag is set, ignoring state bits and padding.
    #[must_use]
    pub fn any_properties_modified(&self) -> bool {
        let last = self.words.len() - 1;
        self.words
            .iter()
            .enumerate()
            .any(|(i, &word)| word & self.flag_mask(i, last) != 0)
    }

    /// Indices of properties whose flag is set (state gating not applied).
    #[must_use]
    pub fn modified_indices(&self) -> Vec<usize> {
        (0..self.property_count)
            .filter(|&index| {
                let bit = index + STATE_BITS_RESERVED;
                self.words[bit / WORD_BITS] & (1 << (bit % WORD_BITS)) != 0
            })
            .collect()
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn write_state(&mut self, state: EntityState) {
        self.words[0] = (self.words[0] & !STATE_MASK) | state.to_bits();
    }

    // Set or clear every flag bit, keeping state bits and padding intact.
    fn fill_flags(&mut self, value: bool) {
        let last = self.words.len() - 1;
        for i in 0..self.words.len() {
            let mask = self.flag_mask(i, last);
            if value {
                self.words[i] |= mask;
            } else {
                self.words[i] &= !mask;
            }
        }
    }

    // Mask of the property-flag bits that live in word `i`.
    fn flag_mask(&self, i: usize, last: usize) -> u32 {
        let mut mask = u32::MAX;
        if i == 0 {
            mask &= !STATE_MASK;
        }
        if i == last {
            let used = (STATE_BITS_RESERVED + self.property_count) - last * WORD_BITS;
            if used < WORD_BITS {
                mask &= (1u32 << used) - 1;
            }
        }

        mask
    }

    fn locate(&self, index: usize) -> Result<(usize, u32), InternalError> {
        if index >= self.property_count {
            return Err(InternalError::tracking_invariant(format!(
                "property index {index} out of range for {} tracked properties",
                self.property_count
            )));
        }
        let bit = index + STATE_BITS_RESERVED;

        Ok((bit / WORD_BITS, 1 << (bit % WORD_BITS)))
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_properties_still_hold_a_state() {
        let mut bits = StateBits::new(0);
        bits.set_entity_state(EntityState::Modified);

        assert_eq!(bits.entity_state(), EntityState::Modified);
        assert!(!bits.any_properties_modified());
        assert!(bits.set_property_modified(0, true).is_err());
    }

    #[test]
    fn modified_marks_every_property_and_other_states_clear() {
        let mut bits = StateBits::new(40);
        bits.set_entity_state(EntityState::Modified);
        assert_eq!(bits.modified_indices().len(), 40);

        bits.set_entity_state(EntityState::Unchanged);
        assert!(!bits.any_properties_modified());
        assert_eq!(bits.entity_state(), EntityState::Unchanged);
    }

    #[test]
    fn flags_are_gated_by_the_modified_state() {
        let mut bits = StateBits::new(3);
        bits.set_entity_state(EntityState::Unchanged);
        bits.set_property_modified(1, true).unwrap();

        assert!(!bits.is_property_modified(1).unwrap());

        bits.set_entity_state_preserving_flags(EntityState::Modified);
        assert!(bits.is_property_modified(1).unwrap());
        assert!(!bits.is_property_modified(0).unwrap());
        assert_eq!(bits.modified_indices(), vec![1]);
    }

    #[test]
    fn padding_bits_never_count_as_modified() {
        // 29 properties + 3 state bits fill exactly one word.
        for count in [28, 29, 30] {
            let mut bits = StateBits::new(count);
            bits.set_entity_state(EntityState::Modified);
            assert_eq!(bits.modified_indices().len(), count);

            for index in 0..count {
                bits.set_property_modified(index, false).unwrap();
            }
            assert!(!bits.any_properties_modified(), "count {count}");
            assert_eq!(bits.entity_state(), EntityState::Modified);
        }
    }

    proptest! {
        #[test]
        fn property_flags_never_disturb_the_state(
            count in 1usize..100,
            flips in proptest::collection::vec((0usize..100, any::<bool>()), 0..64),
        ) {
            let mut bits = StateBits::new(count);
            bits.set_entity_state(EntityState::Deleted);

            let mut expected = vec![false; count];
            for (index, flag) in flips {
                let index = index % count;
                bits.set_property_modified(index, flag).unwrap();
                expected[index] = flag;
            }

            prop_assert_eq!(bits.entity_state(), EntityState::Deleted);
            let want: Vec<usize> = (0..count).filter(|&i| expected[i]).collect();
            prop_assert_eq!(bits.modified_indices(), want);
            prop_assert_eq!(bits.any_properties_modified(), expected.iter().any(|&f| f));
        }
    }
}
