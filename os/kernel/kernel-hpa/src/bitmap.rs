use crate::error::{HpaError, HpaResult};
use alloc::vec::Vec;

const WORD_BITS: u32 = u64::BITS;

/// Exactly-sized bit set indexed by page number within a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Bitmap {
    words: Vec<u64>,
    len: u32,
}

impl Bitmap {
    /// All-clear bitmap of `len` bits.
    ///
    /// # Errors
    /// [`HpaError::OutOfMemory`] if the backing words cannot be allocated.
    pub(crate) fn try_new(len: u32) -> HpaResult<Self> {
        let n = len.div_ceil(WORD_BITS) as usize;
        let mut words = Vec::new();
        words
            .try_reserve_exact(n)
            .map_err(|_| HpaError::OutOfMemory)?;
        words.resize(n, 0);
        Ok(Self { words, len })
    }

    #[inline]
    const fn split(bit: u32) -> (usize, u64) {
        ((bit / WORD_BITS) as usize, 1 << (bit % WORD_BITS))
    }

    #[inline]
    pub(crate) fn test(&self, bit: u32) -> bool {
        debug_assert!(bit < self.len);
        let (w, m) = Self::split(bit);
        self.words[w] & m != 0
    }

    #[inline]
    pub(crate) fn set(&mut self, bit: u32) {
        debug_assert!(bit < self.len);
        let (w, m) = Self::split(bit);
        self.words[w] |= m;
    }

    #[inline]
    pub(crate) fn clear(&mut self, bit: u32) {
        debug_assert!(bit < self.len);
        let (w, m) = Self::split(bit);
        self.words[w] &= !m;
    }

    /// Sets `bit` and returns its previous value.
    #[inline]
    pub(crate) fn test_and_set(&mut self, bit: u32) -> bool {
        let was = self.test(bit);
        self.set(bit);
        was
    }

    /// Clears `bit` and returns its previous value.
    #[inline]
    pub(crate) fn test_and_clear(&mut self, bit: u32) -> bool {
        let was = self.test(bit);
        self.clear(bit);
        was
    }

    pub(crate) fn set_range(&mut self, start: u32, count: u32) {
        for bit in start..start + count {
            self.set(bit);
        }
    }

    /// First clear bit at or after `from`.
    pub(crate) fn next_zero(&self, from: u32) -> Option<u32> {
        if from >= self.len {
            return None;
        }
        let (mut w, _) = Self::split(from);
        // Pretend the bits below `from` are set.
        let mut word = self.words[w] | ((1u64 << (from % WORD_BITS)) - 1);
        loop {
            if word != u64::MAX {
                #[allow(clippy::cast_possible_truncation)]
                let bit = w as u32 * WORD_BITS + (!word).trailing_zeros();
                return (bit < self.len).then_some(bit);
            }
            w += 1;
            word = *self.words.get(w)?;
        }
    }

    pub(crate) fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Indices of all set bits, ascending.
    pub(crate) fn ones(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len).filter(|&bit| self.test(bit))
    }

    /// Whether every set bit of `self` is also set in `other`.
    pub(crate) fn is_subset_of(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .all(|(a, b)| a & !b == 0)
    }
}
