//! # Column Mappings
//!
//! A [`Mapping`] is a partial, injective function from source ordinals to target
//! ordinals. It is the backbone of every rule that changes column order or count:
//! a rule builds the mapping that describes how the new plan lays out columns,
//! then pushes every affected expression through it (see
//! [`crate::shuttle::permute_inputs`]).
//!
//! Two constructions cover almost every rule:
//!
//! - [`Mapping::shift`] concatenates contiguous ranges, each retargeted by an
//!   independent offset. Join reordering rules describe "columns of B move to the
//!   front, columns of C follow them" this way.
//! - [`Mapping::target`] renumbers the members of a field set densely. Rules that
//!   prune columns with a Project use it to rewrite references to the kept columns.
//!
//! A projection may repeat a column (`Project($0, $0)`), which no injective
//! mapping can describe. [`FunctionMapping`] covers that case: a partial function
//! from target ordinals to source ordinals in which several targets may share a
//! source. Its inverse keeps the first target of every source and is an ordinary
//! [`Mapping`].
//!
//! Ordinals outside `0..source_count` / `0..target_count`, or lookups of unmapped
//! ordinals through the non-optional accessors, are programming errors and panic.

use crate::fieldset::FieldSet;
use std::fmt;

/// One contiguous block of a shift mapping: sources `source..source + len` map to
/// targets `target..target + len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftBlock {
    pub target: usize,
    pub source: usize,
    pub len: usize,
}

impl ShiftBlock {
    pub fn new(target: usize, source: usize, len: usize) -> Self {
        Self {
            target,
            source,
            len,
        }
    }
}

/// Partial injective mapping between column ordinals.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Mapping {
    targets: Vec<Option<usize>>,
    sources: Vec<Option<usize>>,
}

impl Mapping {
    /// Mapping with no pairs.
    pub fn partial(source_count: usize, target_count: usize) -> Self {
        Self {
            targets: vec![None; source_count],
            sources: vec![None; target_count],
        }
    }

    pub fn identity(count: usize) -> Self {
        let mut mapping = Self::partial(count, count);
        for i in 0..count {
            mapping.set(i, i);
        }
        mapping
    }

    /// Builds a mapping by concatenating contiguous blocks.
    ///
    /// The target count is the end of the highest block.
    pub fn shift(source_count: usize, blocks: &[ShiftBlock]) -> Self {
        let target_count = blocks
            .iter()
            .map(|b| b.target + b.len)
            .max()
            .unwrap_or(0);
        let mut mapping = Self::partial(source_count, target_count);
        for block in blocks {
            for i in 0..block.len {
                mapping.set(block.source + i, block.target + i);
            }
        }
        mapping
    }

    /// Dense renumbering of the members of `kept`: the `i`-th smallest member maps
    /// to `i`. Used when a Project keeps only some of `source_count` columns.
    pub fn target(kept: &FieldSet, source_count: usize) -> Self {
        let mut mapping = Self::partial(source_count, kept.len());
        for (target, source) in kept.iter().enumerate() {
            mapping.set(source, target);
        }
        mapping
    }

    /// Adds the pair `source -> target`.
    ///
    /// # Panics
    /// If either ordinal is out of range, or either side is already mapped.
    pub fn set(&mut self, source: usize, target: usize) {
        assert!(
            source < self.targets.len(),
            "source ordinal {source} out of range (source count {})",
            self.targets.len()
        );
        assert!(
            target < self.sources.len(),
            "target ordinal {target} out of range (target count {})",
            self.sources.len()
        );
        assert!(
            self.targets[source].map_or(true, |t| t == target),
            "source ordinal {source} is already mapped"
        );
        assert!(
            self.sources[target].map_or(true, |s| s == source),
            "target ordinal {target} is already mapped"
        );
        self.targets[source] = Some(target);
        self.sources[target] = Some(source);
    }

    pub fn source_count(&self) -> usize {
        self.targets.len()
    }

    pub fn target_count(&self) -> usize {
        self.sources.len()
    }

    /// Target of `source`.
    ///
    /// # Panics
    /// If `source` is out of range or unmapped.
    pub fn target_of(&self, source: usize) -> usize {
        self.target_opt(source)
            .unwrap_or_else(|| panic!("source ordinal {source} is not mapped"))
    }

    /// Target of `source`, `None` if unmapped.
    ///
    /// # Panics
    /// If `source` is out of range.
    pub fn target_opt(&self, source: usize) -> Option<usize> {
        assert!(
            source < self.targets.len(),
            "source ordinal {source} out of range (source count {})",
            self.targets.len()
        );
        self.targets[source]
    }

    /// Source of `target`.
    ///
    /// # Panics
    /// If `target` is out of range or unmapped.
    pub fn source_of(&self, target: usize) -> usize {
        self.source_opt(target)
            .unwrap_or_else(|| panic!("target ordinal {target} is not mapped"))
    }

    pub fn source_opt(&self, target: usize) -> Option<usize> {
        assert!(
            target < self.sources.len(),
            "target ordinal {target} out of range (target count {})",
            self.sources.len()
        );
        self.sources[target]
    }

    /// Number of mapped pairs.
    pub fn len(&self) -> usize {
        self.targets.iter().filter(|t| t.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mapped `(source, target)` pairs in ascending source order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.targets
            .iter()
            .enumerate()
            .filter_map(|(s, t)| t.map(|t| (s, t)))
    }

    /// Whether every ordinal maps to itself and both sides have the same count.
    pub fn is_identity(&self) -> bool {
        self.source_count() == self.target_count()
            && self
                .targets
                .iter()
                .enumerate()
                .all(|(s, t)| *t == Some(s))
    }

    /// The same pairs with source and target exchanged.
    pub fn inverse(&self) -> Mapping {
        Mapping {
            targets: self.sources.clone(),
            sources: self.targets.clone(),
        }
    }

    /// `self` followed by `next`: maps `s` to `next(self(s))`. Pairs whose
    /// intermediate ordinal is unmapped by `next` are dropped.
    ///
    /// # Panics
    /// If `self.target_count() != next.source_count()`.
    pub fn compose(&self, next: &Mapping) -> Mapping {
        assert_eq!(
            self.target_count(),
            next.source_count(),
            "cannot compose mappings with mismatched counts"
        );
        let mut result = Mapping::partial(self.source_count(), next.target_count());
        for (s, mid) in self.iter() {
            if let Some(t) = next.target_opt(mid) {
                result.set(s, t);
            }
        }
        result
    }

    /// Mapping whose sources are moved up by `offset` within a source range of
    /// `source_count`.
    pub fn offset_source(&self, offset: usize, source_count: usize) -> Mapping {
        let mut result = Mapping::partial(source_count, self.target_count());
        for (s, t) in self.iter() {
            result.set(s + offset, t);
        }
        result
    }

    /// Mapping whose targets are moved up by `offset` within a target range of
    /// `target_count`.
    pub fn offset_target(&self, offset: usize, target_count: usize) -> Mapping {
        let mut result = Mapping::partial(self.source_count(), target_count);
        for (s, t) in self.iter() {
            result.set(s, t + offset);
        }
        result
    }

    /// Targets of every member of `set`.
    ///
    /// # Panics
    /// If a member is unmapped.
    pub fn apply_set(&self, set: &FieldSet) -> FieldSet {
        set.iter().map(|s| self.target_of(s)).collect()
    }

    /// Targets of `ordinals`, in order.
    pub fn apply_list(&self, ordinals: &[usize]) -> Vec<usize> {
        ordinals.iter().map(|&s| self.target_of(s)).collect()
    }
}

/// Partial function from target ordinals to source ordinals. Unlike [`Mapping`],
/// several targets may map to the same source.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FunctionMapping {
    sources: Vec<Option<usize>>,
    source_count: usize,
}

impl FunctionMapping {
    /// Mapping of a projection: `refs[target]` is the input ordinal the output at
    /// `target` reads, `None` for an output that is not a plain column.
    ///
    /// # Panics
    /// If an ordinal is not below `source_count`.
    pub fn from_projection(refs: &[Option<usize>], source_count: usize) -> Self {
        for source in refs.iter().flatten() {
            assert!(
                *source < source_count,
                "source ordinal {source} out of range (source count {source_count})"
            );
        }
        Self {
            sources: refs.to_vec(),
            source_count,
        }
    }

    pub fn source_count(&self) -> usize {
        self.source_count
    }

    pub fn target_count(&self) -> usize {
        self.sources.len()
    }

    /// Source of `target`, `None` if unmapped.
    ///
    /// # Panics
    /// If `target` is out of range.
    pub fn source_opt(&self, target: usize) -> Option<usize> {
        assert!(
            target < self.sources.len(),
            "target ordinal {target} out of range (target count {})",
            self.sources.len()
        );
        self.sources[target]
    }

    /// Source of `target`.
    ///
    /// # Panics
    /// If `target` is out of range or unmapped.
    pub fn source_of(&self, target: usize) -> usize {
        self.source_opt(target)
            .unwrap_or_else(|| panic!("target ordinal {target} is not mapped"))
    }

    /// Every target reading `source`, ascending.
    pub fn targets_of(&self, source: usize) -> impl Iterator<Item = usize> + '_ {
        self.sources
            .iter()
            .enumerate()
            .filter_map(move |(t, s)| (*s == Some(source)).then_some(t))
    }

    /// Whether every target is mapped.
    pub fn is_total(&self) -> bool {
        self.sources.iter().all(Option::is_some)
    }

    /// Whether no two targets share a source.
    pub fn is_injective(&self) -> bool {
        let mut seen = vec![false; self.source_count];
        self.sources.iter().flatten().all(|&s| !std::mem::replace(&mut seen[s], true))
    }

    /// Source-to-target mapping keeping the first target of every source.
    /// `self.source_of(inverse.target_of(s)) == s` for every mapped `s`.
    pub fn inverse(&self) -> Mapping {
        let mut mapping = Mapping::partial(self.source_count, self.sources.len());
        for (target, source) in self.sources.iter().enumerate() {
            if let Some(source) = *source {
                if mapping.target_opt(source).is_none() {
                    mapping.set(source, target);
                }
            }
        }
        mapping
    }

    /// The same pairs as an injective [`Mapping`] (`source -> target`), or `None`
    /// if some source is read twice.
    pub fn to_injective(&self) -> Option<Mapping> {
        self.is_injective().then(|| self.inverse())
    }
}

impl fmt::Debug for FunctionMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        let mut first = true;
        for (t, s) in self.sources.iter().enumerate() {
            if let Some(s) = s {
                if !first {
                    write!(f, ", ")?;
                }
                first = false;
                write!(f, "{t}<-{s}")?;
            }
        }
        write!(f, "] ({} <- {})", self.target_count(), self.source_count)
    }
}

impl fmt::Display for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (s, t)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{s}->{t}")?;
        }
        write!(
            f,
            "] ({} -> {})",
            self.source_count(),
            self.target_count()
        )
    }
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_mapping_blocks() {
        // | A(2) | B(1) | C(3) |  ->  | B | C |
        let mapping = Mapping::shift(6, &[ShiftBlock::new(0, 2, 1), ShiftBlock::new(1, 3, 3)]);
        assert_eq!(mapping.source_count(), 6);
        assert_eq!(mapping.target_count(), 4);
        assert_eq!(mapping.target_opt(0), None);
        assert_eq!(mapping.target_of(2), 0);
        assert_eq!(mapping.target_of(5), 3);
    }

    #[test]
    fn test_shift_round_trip() {
        // | A(2) | B(3) | C(2) |  ->  | A | C | B |
        let mapping = Mapping::shift(
            7,
            &[
                ShiftBlock::new(0, 0, 2),
                ShiftBlock::new(4, 2, 3),
                ShiftBlock::new(2, 5, 2),
            ],
        );
        let inverse = mapping.inverse();
        for source in 0..7 {
            assert_eq!(inverse.target_of(mapping.target_of(source)), source);
        }
        assert!(mapping.compose(&inverse).is_identity());
    }

    #[test]
    fn test_target_mapping() {
        let kept = FieldSet::of([1, 4, 5]);
        let mapping = Mapping::target(&kept, 6);
        assert_eq!(mapping.target_count(), 3);
        assert_eq!(mapping.target_of(4), 1);
        assert_eq!(mapping.target_opt(0), None);
        assert_eq!(mapping.apply_set(&FieldSet::of([1, 5])), FieldSet::of([0, 2]));
        assert_eq!(mapping.apply_list(&[5, 1]), vec![2, 0]);
    }

    #[test]
    fn test_from_projection() {
        let mapping = FunctionMapping::from_projection(&[Some(2), Some(0)], 3);
        assert!(mapping.is_total());
        assert_eq!(mapping.source_of(0), 2);
        let injective = mapping.to_injective().unwrap();
        assert_eq!(injective.target_of(2), 0);
        assert_eq!(injective.source_of(1), 0);

        let partial = FunctionMapping::from_projection(&[Some(1), None], 3);
        assert!(!partial.is_total());
        assert_eq!(partial.source_opt(1), None);
    }

    #[test]
    fn test_repeated_column_mapping() {
        // Project($0, $0, $1) over two columns
        let mapping = FunctionMapping::from_projection(&[Some(0), Some(0), Some(1)], 2);
        assert!(mapping.is_total());
        assert!(!mapping.is_injective());
        assert!(mapping.to_injective().is_none());
        assert_eq!(mapping.targets_of(0).collect::<Vec<_>>(), vec![0, 1]);

        let inverse = mapping.inverse();
        assert_eq!(inverse.target_of(0), 0);
        assert_eq!(inverse.target_of(1), 2);
        for source in 0..2 {
            assert_eq!(mapping.source_of(inverse.target_of(source)), source);
        }
        for target in 0..3 {
            let source = mapping.source_of(target);
            assert_eq!(mapping.source_of(inverse.target_of(source)), source);
        }
    }

    #[test]
    fn test_compose_drops_unmapped() {
        let first = Mapping::target(&FieldSet::of([0, 2]), 3);
        let mut second = Mapping::partial(2, 1);
        second.set(1, 0);
        let composed = first.compose(&second);
        assert_eq!(composed.target_opt(0), None);
        assert_eq!(composed.target_of(2), 0);
    }

    #[test]
    fn test_offsets() {
        let mapping = Mapping::identity(2);
        let shifted = mapping.offset_source(3, 5).offset_target(1, 3);
        assert_eq!(shifted.target_of(3), 1);
        assert_eq!(shifted.target_of(4), 2);
    }

    #[test]
    #[should_panic(expected = "is not mapped")]
    fn test_unmapped_lookup_panics() {
        Mapping::partial(2, 2).target_of(1);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_panics() {
        Mapping::identity(2).target_opt(2);
    }
}
