//! # Trait Sets
//!
//! Besides its row type, every relational expression carries a [`TraitSet`]
//! describing physical characteristics of its output that rewrites have to
//! preserve or re-derive:
//!
//! - **Convention**: the calling convention the expression belongs to. Every node
//!   built by this crate is [`Convention::LOGICAL`]; a physical planner downstream
//!   assigns its own conventions.
//! - **Collation**: the order in which rows are produced. Only `Sort` establishes a
//!   collation; `Filter` passes its input's through and `Project` maps it through
//!   the columns it keeps.
//!
//! Collations are compared with prefix semantics: a required `ORDER BY a` is
//! satisfied by a provided `ORDER BY a, b`.

use crate::mapping::Mapping;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sort direction of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Placement of NULLs within one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NullDirection {
    First,
    Last,
}

/// One key of a collation: a column ordinal plus its direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldCollation {
    pub field: usize,
    pub direction: Direction,
    pub nulls: NullDirection,
}

impl FieldCollation {
    /// Ascending key with NULLs last.
    pub fn asc(field: usize) -> Self {
        Self {
            field,
            direction: Direction::Ascending,
            nulls: NullDirection::Last,
        }
    }

    /// Descending key with NULLs first.
    pub fn desc(field: usize) -> Self {
        Self {
            field,
            direction: Direction::Descending,
            nulls: NullDirection::First,
        }
    }

    pub fn with_field(self, field: usize) -> Self {
        Self { field, ..self }
    }
}

impl fmt::Display for FieldCollation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            Direction::Ascending => "ASC",
            Direction::Descending => "DESC",
        };
        let default_nulls = match self.direction {
            Direction::Ascending => NullDirection::Last,
            Direction::Descending => NullDirection::First,
        };
        if self.nulls == default_nulls {
            write!(f, "{dir}")
        } else {
            match self.nulls {
                NullDirection::First => write!(f, "{dir}-nulls-first"),
                NullDirection::Last => write!(f, "{dir}-nulls-last"),
            }
        }
    }
}

/// Ordered list of sort keys. The empty collation means "no particular order".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Collation {
    pub keys: Vec<FieldCollation>,
}

impl Collation {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn of(keys: Vec<FieldCollation>) -> Self {
        Self { keys }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Column ordinals of the keys, in key order.
    pub fn fields(&self) -> Vec<usize> {
        self.keys.iter().map(|k| k.field).collect()
    }

    /// Whether `self` (the provided order) satisfies `required`: `required` must be
    /// a prefix of `self`.
    pub fn satisfies(&self, required: &Collation) -> bool {
        required.keys.len() <= self.keys.len()
            && required.keys.iter().zip(&self.keys).all(|(r, p)| r == p)
    }

    /// The collation expressed in target ordinals, truncated at the first key whose
    /// column `mapping` does not carry.
    pub fn permute(&self, mapping: &Mapping) -> Collation {
        let mut keys = Vec::new();
        for key in &self.keys {
            if key.field >= mapping.source_count() {
                break;
            }
            match mapping.target_opt(key.field) {
                Some(target) => keys.push(key.with_field(target)),
                None => break,
            }
        }
        Collation { keys }
    }

    /// Moves every key by `offset`.
    pub fn shift(&self, offset: usize) -> Collation {
        Collation {
            keys: self
                .keys
                .iter()
                .map(|k| k.with_field(k.field + offset))
                .collect(),
        }
    }
}

/// Name of a calling convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Convention {
    pub name: &'static str,
}

impl Convention {
    pub const LOGICAL: Convention = Convention { name: "LOGICAL" };
}

/// Physical characteristics of a relational expression's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TraitSet {
    pub convention: Convention,
    pub collation: Collation,
}

impl TraitSet {
    /// Logical convention, no collation.
    pub fn logical() -> Self {
        Self {
            convention: Convention::LOGICAL,
            collation: Collation::empty(),
        }
    }

    pub fn with_collation(self, collation: Collation) -> Self {
        Self { collation, ..self }
    }

    /// Whether `self` satisfies `required`: same convention and a collation that
    /// has the required one as prefix.
    pub fn satisfies(&self, required: &TraitSet) -> bool {
        self.convention == required.convention && self.collation.satisfies(&required.collation)
    }
}

impl Default for TraitSet {
    fn default() -> Self {
        Self::logical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fieldset::FieldSet;

    #[test]
    fn test_prefix_satisfaction() {
        let provided = Collation::of(vec![FieldCollation::asc(0), FieldCollation::desc(1)]);
        let required = Collation::of(vec![FieldCollation::asc(0)]);
        assert!(provided.satisfies(&required));
        assert!(!required.satisfies(&provided));
        assert!(provided.satisfies(&Collation::empty()));
    }

    #[test]
    fn test_permute_truncates_at_unmapped_key() {
        let collation = Collation::of(vec![
            FieldCollation::asc(2),
            FieldCollation::asc(0),
            FieldCollation::asc(1),
        ]);
        let mapping = Mapping::target(&FieldSet::of([1, 2]), 3);
        assert_eq!(
            collation.permute(&mapping),
            Collation::of(vec![FieldCollation::asc(1)])
        );
    }

    #[test]
    fn test_display_non_default_nulls() {
        let key = FieldCollation {
            field: 0,
            direction: Direction::Ascending,
            nulls: NullDirection::First,
        };
        assert_eq!(key.to_string(), "ASC-nulls-first");
        assert_eq!(FieldCollation::desc(0).to_string(), "DESC");
    }
}
