//! A growable bit vector keyed by small integer indices.
//!
//! Used by block discovery for the visited/active sets of loop marking and for the
//! per-block and per-scope sets of local slots written by store bytecodes.
//!
//! # Example
//!
//! ```rust,ignore
//! use jitfront::utils::BitSet;
//!
//! let mut written = BitSet::new(4);
//! written.insert(1);
//! written.insert(9); // grows on demand
//!
//! assert!(written.contains(9));
//! assert_eq!(written.iter().collect::<Vec<_>>(), vec![1, 9]);
//! ```

/// A bit vector for set operations over small integer indices.
///
/// Unlike a fixed-capacity set, inserting past the current capacity grows the
/// backing storage, and queries past it answer `false`.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct BitSet {
    /// The bits, 64 per word.
    words: Vec<u64>,
}

impl BitSet {
    /// Creates a new empty bit set with room for `capacity` indices.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
        }
    }

    /// Returns `true` if no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Sets the bit at the given index, growing the set if needed.
    pub fn insert(&mut self, index: usize) {
        let word = index / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (index % 64);
    }

    /// Clears the bit at the given index.
    pub fn remove(&mut self, index: usize) {
        if let Some(word) = self.words.get_mut(index / 64) {
            *word &= !(1u64 << (index % 64));
        }
    }

    /// Returns `true` if the bit at the given index is set.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .is_some_and(|word| word & (1u64 << (index % 64)) != 0)
    }

    /// Returns the number of bits set.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Clears all bits.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// Adds every bit of `other` to `self`.
    ///
    /// Returns `true` if `self` changed.
    pub fn union_with(&mut self, other: &Self) -> bool {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            let old = *a;
            *a |= *b;
            changed |= old != *a;
        }
        changed
    }

    /// Returns an iterator over the indices of set bits, in ascending order.
    pub fn iter(&self) -> BitSetIter<'_> {
        BitSetIter {
            set: self,
            word_idx: 0,
            pending: self.words.first().copied().unwrap_or(0),
        }
    }
}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Iterator over the set bits in a `BitSet`.
pub struct BitSetIter<'a> {
    set: &'a BitSet,
    word_idx: usize,
    pending: u64,
}

impl Iterator for BitSetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.pending != 0 {
                let bit = self.pending.trailing_zeros() as usize;
                self.pending &= self.pending - 1;
                return Some(self.word_idx * 64 + bit);
            }
            self.word_idx += 1;
            self.pending = *self.set.words.get(self.word_idx)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitset_basic() {
        let mut bs = BitSet::new(100);
        assert!(bs.is_empty());

        bs.insert(0);
        bs.insert(50);
        bs.insert(99);

        assert_eq!(bs.count(), 3);
        assert!(bs.contains(50));
        assert!(!bs.contains(1));
        assert!(!bs.contains(1000));

        bs.remove(50);
        assert!(!bs.contains(50));
    }

    #[test]
    fn test_bitset_grows() {
        let mut bs = BitSet::new(0);
        bs.insert(130);
        assert!(bs.contains(130));
        assert_eq!(bs.iter().collect::<Vec<_>>(), vec![130]);
    }

    #[test]
    fn test_bitset_union() {
        let mut a = BitSet::new(8);
        let mut b = BitSet::new(200);
        a.insert(1);
        b.insert(1);
        b.insert(150);

        assert!(a.union_with(&b));
        assert!(!a.union_with(&b));
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![1, 150]);
    }

    #[test]
    fn test_bitset_clear() {
        let mut bs = BitSet::new(10);
        bs.insert(3);
        bs.clear();
        assert!(bs.is_empty());
        assert_eq!(format!("{bs:?}"), "{}");
    }
}
