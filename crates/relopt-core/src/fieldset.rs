//! # Field Sets
//!
//! A [`FieldSet`] is an immutable, ordered set of column ordinals. Every rule uses
//! field sets to answer "which input columns does this expression read?" and then
//! decides, by containment, whether an expression can move across an operator.
//!
//! Field sets are only built through a [`FieldSetBuilder`] (or one of the
//! convenience constructors that wrap it). Once built, a set cannot change; all
//! operations return new sets.
//!
//! ## Representation
//!
//! Bits are stored in 64-bit words with trailing zero words trimmed, so two sets
//! with the same members always have the same representation and derived
//! `Eq`/`Hash` are structural.

use serde::{Deserialize, Serialize};
use std::fmt;

const WORD_BITS: usize = 64;

/// Immutable set of non-negative column ordinals.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<usize>", into = "Vec<usize>")]
pub struct FieldSet {
    words: Vec<u64>,
}

impl FieldSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Set containing exactly the given ordinals.
    pub fn of(ordinals: impl IntoIterator<Item = usize>) -> Self {
        let mut builder = FieldSetBuilder::new();
        for i in ordinals {
            builder.set(i);
        }
        builder.build()
    }

    /// Set containing `start..end`.
    pub fn range(start: usize, end: usize) -> Self {
        let mut builder = FieldSetBuilder::new();
        builder.set_range(start, end);
        builder.build()
    }

    /// Set containing `0..end`.
    pub fn range_to(end: usize) -> Self {
        Self::range(0, end)
    }

    pub fn builder() -> FieldSetBuilder {
        FieldSetBuilder::new()
    }

    /// Builder seeded with the members of this set.
    pub fn rebuild(&self) -> FieldSetBuilder {
        FieldSetBuilder {
            words: self.words.clone(),
        }
    }

    pub fn contains(&self, ordinal: usize) -> bool {
        self.words
            .get(ordinal / WORD_BITS)
            .map_or(false, |w| w & (1u64 << (ordinal % WORD_BITS)) != 0)
    }

    /// Whether every member of `other` is also a member of `self`.
    pub fn contains_all(&self, other: &FieldSet) -> bool {
        other.words.iter().enumerate().all(|(i, w)| {
            let mine = self.words.get(i).copied().unwrap_or(0);
            w & !mine == 0
        })
    }

    pub fn intersects(&self, other: &FieldSet) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn iter(&self) -> FieldSetIter<'_> {
        FieldSetIter {
            words: &self.words,
            index: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.iter().collect()
    }

    /// Smallest member.
    pub fn first(&self) -> Option<usize> {
        self.iter().next()
    }

    /// Largest member.
    pub fn last(&self) -> Option<usize> {
        let (i, w) = self.words.iter().enumerate().last()?;
        Some(i * WORD_BITS + (WORD_BITS - 1 - w.leading_zeros() as usize))
    }

    /// The `n`-th smallest member.
    pub fn nth(&self, n: usize) -> Option<usize> {
        self.iter().nth(n)
    }

    /// Rank of `ordinal` within the set: the number of members smaller than it.
    /// Returns `None` when `ordinal` is not a member.
    pub fn index_of(&self, ordinal: usize) -> Option<usize> {
        if !self.contains(ordinal) {
            return None;
        }
        let word = ordinal / WORD_BITS;
        let below: usize = self.words[..word]
            .iter()
            .map(|w| w.count_ones() as usize)
            .sum();
        let mask = (1u64 << (ordinal % WORD_BITS)) - 1;
        Some(below + (self.words[word] & mask).count_ones() as usize)
    }

    pub fn union(&self, other: &FieldSet) -> FieldSet {
        let len = self.words.len().max(other.words.len());
        let words = (0..len)
            .map(|i| {
                self.words.get(i).copied().unwrap_or(0) | other.words.get(i).copied().unwrap_or(0)
            })
            .collect();
        FieldSet::from_words(words)
    }

    pub fn intersect(&self, other: &FieldSet) -> FieldSet {
        let words = self
            .words
            .iter()
            .zip(other.words.iter())
            .map(|(a, b)| a & b)
            .collect();
        FieldSet::from_words(words)
    }

    /// Members of `self` that are not in `other`.
    pub fn except(&self, other: &FieldSet) -> FieldSet {
        let words = self
            .words
            .iter()
            .enumerate()
            .map(|(i, w)| w & !other.words.get(i).copied().unwrap_or(0))
            .collect();
        FieldSet::from_words(words)
    }

    /// Set with `ordinal` added.
    pub fn with(&self, ordinal: usize) -> FieldSet {
        let mut builder = self.rebuild();
        builder.set(ordinal);
        builder.build()
    }

    /// Set with `ordinal` removed.
    pub fn without(&self, ordinal: usize) -> FieldSet {
        let mut builder = self.rebuild();
        builder.clear(ordinal);
        builder.build()
    }

    /// Every member moved by `offset`.
    ///
    /// # Panics
    /// If a member would become negative.
    pub fn shift(&self, offset: isize) -> FieldSet {
        FieldSet::of(self.iter().map(|i| {
            let shifted = i as isize + offset;
            assert!(
                shifted >= 0,
                "shifting ordinal {i} by {offset} yields a negative ordinal"
            );
            shifted as usize
        }))
    }

    /// Intersection of all sets; the empty set when `sets` is empty.
    pub fn intersect_all<'a>(sets: impl IntoIterator<Item = &'a FieldSet>) -> FieldSet {
        let mut iter = sets.into_iter();
        let Some(first) = iter.next() else {
            return FieldSet::empty();
        };
        iter.fold(first.clone(), |acc, s| acc.intersect(s))
    }

    /// Union of all sets.
    pub fn union_all<'a>(sets: impl IntoIterator<Item = &'a FieldSet>) -> FieldSet {
        sets.into_iter()
            .fold(FieldSet::empty(), |acc, s| acc.union(s))
    }

    fn from_words(mut words: Vec<u64>) -> FieldSet {
        while words.last() == Some(&0) {
            words.pop();
        }
        FieldSet { words }
    }
}

/// Accumulator used to construct a [`FieldSet`].
#[derive(Debug, Clone, Default)]
pub struct FieldSetBuilder {
    words: Vec<u64>,
}

impl FieldSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, ordinal: usize) -> &mut Self {
        let word = ordinal / WORD_BITS;
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (ordinal % WORD_BITS);
        self
    }

    pub fn set_range(&mut self, start: usize, end: usize) -> &mut Self {
        for i in start..end {
            self.set(i);
        }
        self
    }

    pub fn add_all(&mut self, other: &FieldSet) -> &mut Self {
        for i in other.iter() {
            self.set(i);
        }
        self
    }

    pub fn clear(&mut self, ordinal: usize) -> &mut Self {
        if let Some(w) = self.words.get_mut(ordinal / WORD_BITS) {
            *w &= !(1u64 << (ordinal % WORD_BITS));
        }
        self
    }

    pub fn contains(&self, ordinal: usize) -> bool {
        self.words
            .get(ordinal / WORD_BITS)
            .map_or(false, |w| w & (1u64 << (ordinal % WORD_BITS)) != 0)
    }

    pub fn build(&self) -> FieldSet {
        FieldSet::from_words(self.words.clone())
    }
}

/// Ascending iterator over the members of a [`FieldSet`].
pub struct FieldSetIter<'a> {
    words: &'a [u64],
    index: usize,
    current: u64,
}

impl Iterator for FieldSetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.index * WORD_BITS + bit);
            }
            self.index += 1;
            if self.index >= self.words.len() {
                return None;
            }
            self.current = self.words[self.index];
        }
    }
}

impl<'a> IntoIterator for &'a FieldSet {
    type Item = usize;
    type IntoIter = FieldSetIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<usize> for FieldSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        FieldSet::of(iter)
    }
}

impl From<Vec<usize>> for FieldSet {
    fn from(ordinals: Vec<usize>) -> Self {
        FieldSet::of(ordinals)
    }
}

impl From<FieldSet> for Vec<usize> {
    fn from(set: FieldSet) -> Self {
        set.to_vec()
    }
}

impl fmt::Display for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, ordinal) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{ordinal}")?;
        }
        write!(f, "}}")
    }
}

impl fmt::Debug for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_of_and_iter_ascending() {
        let set = FieldSet::of([70, 3, 0, 64, 3]);
        assert_eq!(set.to_vec(), vec![0, 3, 64, 70]);
        assert_eq!(set.len(), 4);
        assert_eq!(set.first(), Some(0));
        assert_eq!(set.last(), Some(70));
        assert_eq!(set.to_string(), "{0, 3, 64, 70}");
    }

    #[test]
    fn test_representation_is_canonical() {
        let a = FieldSet::of([1, 100]).without(100);
        let b = FieldSet::of([1]);
        assert_eq!(a, b);
        assert!(FieldSet::of([5]).without(5).is_empty());
    }

    #[test]
    fn test_set_algebra() {
        let a = FieldSet::range(0, 4);
        let b = FieldSet::of([2, 3, 4, 5]);
        assert_eq!(a.union(&b), FieldSet::range(0, 6));
        assert_eq!(a.intersect(&b), FieldSet::of([2, 3]));
        assert_eq!(a.except(&b), FieldSet::of([0, 1]));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&FieldSet::of([9])));
    }

    #[test]
    fn test_contains_all() {
        let group = FieldSet::of([0, 1, 2]);
        assert!(group.contains_all(&FieldSet::of([0, 2])));
        assert!(group.contains_all(&FieldSet::empty()));
        assert!(!group.contains_all(&FieldSet::of([2, 3])));
        assert!(!group.contains_all(&FieldSet::of([130])));
    }

    #[test]
    fn test_shift() {
        let set = FieldSet::of([3, 5]);
        assert_eq!(set.shift(2), FieldSet::of([5, 7]));
        assert_eq!(set.shift(-3), FieldSet::of([0, 2]));
    }

    #[test]
    #[should_panic(expected = "negative ordinal")]
    fn test_shift_below_zero_panics() {
        FieldSet::of([1]).shift(-2);
    }

    #[test]
    fn test_index_of_and_nth() {
        let set = FieldSet::of([2, 5, 9, 66]);
        assert_eq!(set.index_of(2), Some(0));
        assert_eq!(set.index_of(9), Some(2));
        assert_eq!(set.index_of(66), Some(3));
        assert_eq!(set.index_of(3), None);
        assert_eq!(set.nth(1), Some(5));
    }

    #[test]
    fn test_intersect_all() {
        let sets = [
            FieldSet::of([0, 1, 2]),
            FieldSet::of([0, 1]),
            FieldSet::of([0, 2]),
        ];
        assert_eq!(FieldSet::intersect_all(&sets), FieldSet::of([0]));
        assert_eq!(FieldSet::union_all(&sets), FieldSet::of([0, 1, 2]));
        assert!(FieldSet::intersect_all(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_serde_as_ordinal_list() {
        let set = FieldSet::of([1, 4]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, "[1,4]");
        let back: FieldSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
