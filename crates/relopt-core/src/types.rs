//! # Row and Column Types
//!
//! Every relational expression produces rows of a fixed [`RowType`]: an ordered list
//! of named, typed [`Field`]s. Rules must never change the row type of the
//! expression they replace, so most of the checks in the engine boil down to
//! comparing row types with [`RowType::same_types`], which ignores field names.
//!
//! Types are deliberately small. The engine only needs enough of SQL's type system
//! to derive result types of aggregates and set operations and to track
//! nullability when outer joins are rewritten.

use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL type family, without nullability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Boolean,
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer. Result type of `COUNT`.
    BigInt,
    Decimal {
        precision: u8,
        scale: u8,
    },
    Double,
    /// Variable-length string with an optional maximum length.
    Varchar(Option<u32>),
    Date,
    Timestamp,
    /// Type of an untyped `NULL` literal. Absorbed by any other type when types
    /// are unified.
    Null,
    /// Unknown or polymorphic type. Absorbs any other type when types are unified.
    Any,
}

impl TypeKind {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            TypeKind::Integer | TypeKind::BigInt | TypeKind::Decimal { .. } | TypeKind::Double
        )
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, TypeKind::Integer | TypeKind::BigInt)
    }

    /// Position in the numeric widening order, `None` for non-numeric kinds.
    fn numeric_rank(&self) -> Option<u8> {
        match self {
            TypeKind::Integer => Some(0),
            TypeKind::BigInt => Some(1),
            TypeKind::Decimal { .. } => Some(2),
            TypeKind::Double => Some(3),
            _ => None,
        }
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeKind::Boolean => write!(f, "BOOLEAN"),
            TypeKind::Integer => write!(f, "INTEGER"),
            TypeKind::BigInt => write!(f, "BIGINT"),
            TypeKind::Decimal { precision, scale } => write!(f, "DECIMAL({precision}, {scale})"),
            TypeKind::Double => write!(f, "DOUBLE"),
            TypeKind::Varchar(Some(len)) => write!(f, "VARCHAR({len})"),
            TypeKind::Varchar(None) => write!(f, "VARCHAR"),
            TypeKind::Date => write!(f, "DATE"),
            TypeKind::Timestamp => write!(f, "TIMESTAMP"),
            TypeKind::Null => write!(f, "NULL"),
            TypeKind::Any => write!(f, "ANY"),
        }
    }
}

/// A type together with its nullability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataType {
    pub kind: TypeKind,
    pub nullable: bool,
}

impl DataType {
    pub fn new(kind: TypeKind, nullable: bool) -> Self {
        Self { kind, nullable }
    }

    /// Non-nullable type of the given kind.
    pub fn not_null(kind: TypeKind) -> Self {
        Self::new(kind, false)
    }

    /// Nullable type of the given kind.
    pub fn nullable(kind: TypeKind) -> Self {
        Self::new(kind, true)
    }

    pub fn boolean() -> Self {
        Self::not_null(TypeKind::Boolean)
    }

    pub fn integer() -> Self {
        Self::not_null(TypeKind::Integer)
    }

    pub fn bigint() -> Self {
        Self::not_null(TypeKind::BigInt)
    }

    pub fn double() -> Self {
        Self::not_null(TypeKind::Double)
    }

    pub fn varchar(len: Option<u32>) -> Self {
        Self::not_null(TypeKind::Varchar(len))
    }

    /// Type of the untyped `NULL` literal.
    pub fn null() -> Self {
        Self::nullable(TypeKind::Null)
    }

    pub fn with_nullable(self, nullable: bool) -> Self {
        Self { nullable, ..self }
    }

    /// Whether `self` and `other` have the same kind, ignoring nullability.
    pub fn same_kind(&self, other: &DataType) -> bool {
        self.kind == other.kind
    }

    /// The narrowest type to which every type in `types` can be converted, or
    /// `None` if the types are incompatible or the list is empty.
    ///
    /// The result is nullable if any input is nullable. `NULL` yields to every
    /// other type, `ANY` absorbs every other type, numeric kinds widen along
    /// `INTEGER < BIGINT < DECIMAL < DOUBLE` and strings keep the longest length.
    pub fn least_restrictive(types: &[DataType]) -> Option<DataType> {
        let mut iter = types.iter();
        let mut acc = *iter.next()?;
        for t in iter {
            let nullable = acc.nullable || t.nullable;
            let kind = match (acc.kind, t.kind) {
                (a, b) if a == b => a,
                (TypeKind::Any, _) | (_, TypeKind::Any) => TypeKind::Any,
                (TypeKind::Null, b) => b,
                (a, TypeKind::Null) => a,
                (TypeKind::Varchar(a), TypeKind::Varchar(b)) => match (a, b) {
                    (Some(a), Some(b)) => TypeKind::Varchar(Some(a.max(b))),
                    _ => TypeKind::Varchar(None),
                },
                (
                    TypeKind::Decimal {
                        precision: p1,
                        scale: s1,
                    },
                    TypeKind::Decimal {
                        precision: p2,
                        scale: s2,
                    },
                ) => {
                    let scale = s1.max(s2);
                    let integer_digits = p1.saturating_sub(s1).max(p2.saturating_sub(s2));
                    TypeKind::Decimal {
                        precision: integer_digits.saturating_add(scale),
                        scale,
                    }
                }
                (a, b) => {
                    let ra = a.numeric_rank()?;
                    let rb = b.numeric_rank()?;
                    if ra >= rb {
                        a
                    } else {
                        b
                    }
                }
            };
            acc = DataType::new(kind, nullable);
        }
        Some(acc)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{} NOT NULL", self.kind)
        }
    }
}

/// A named column of a row type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered list of fields produced by a relational expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RowType {
    pub fields: Vec<Field>,
}

impl RowType {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Builds a row type from `(name, type)` pairs.
    pub fn of<S: Into<String>>(pairs: impl IntoIterator<Item = (S, DataType)>) -> Self {
        Self::new(
            pairs
                .into_iter()
                .map(|(name, data_type)| Field::new(name, data_type))
                .collect(),
        )
    }

    /// Number of fields.
    pub fn width(&self) -> usize {
        self.fields.len()
    }

    /// Field at `ordinal`.
    ///
    /// # Panics
    /// If `ordinal` is out of range.
    pub fn field(&self, ordinal: usize) -> &Field {
        &self.fields[ordinal]
    }

    pub fn field_type(&self, ordinal: usize) -> DataType {
        self.fields[ordinal].data_type
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn field_types(&self) -> Vec<DataType> {
        self.fields.iter().map(|f| f.data_type).collect()
    }

    /// Ordinal of the first field called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Fields of `self` followed by the fields of `other`.
    pub fn concat(&self, other: &RowType) -> RowType {
        let mut fields = self.fields.clone();
        fields.extend(other.fields.iter().cloned());
        RowType::new(fields)
    }

    /// Row type of a join: `self` followed by `other`, with duplicate names made
    /// unique by appending the smallest numeric suffix that is not taken.
    pub fn join(&self, other: &RowType) -> RowType {
        let mut row_type = self.concat(other);
        row_type.uniquify();
        row_type
    }

    fn uniquify(&mut self) {
        let mut seen = std::collections::HashSet::new();
        for i in 0..self.fields.len() {
            if seen.insert(self.fields[i].name.clone()) {
                continue;
            }
            let base = self.fields[i].name.clone();
            let mut suffix = 0;
            let unique = loop {
                let candidate = format!("{base}{suffix}");
                if !seen.contains(&candidate) && self.index_of(&candidate).is_none() {
                    break candidate;
                }
                suffix += 1;
            };
            seen.insert(unique.clone());
            self.fields[i].name = unique;
        }
    }

    /// Fields at the given ordinals, in order.
    pub fn project(&self, ordinals: &[usize]) -> RowType {
        RowType::new(ordinals.iter().map(|&i| self.fields[i].clone()).collect())
    }

    /// The same fields, all made nullable (or all made non-nullable).
    pub fn with_nullable(&self, nullable: bool) -> RowType {
        RowType::new(
            self.fields
                .iter()
                .map(|f| Field::new(f.name.clone(), f.data_type.with_nullable(nullable)))
                .collect(),
        )
    }

    /// The same types under new names.
    ///
    /// # Panics
    /// If `names` has a different length than the row type.
    pub fn rename(&self, names: &[String]) -> RowType {
        assert_eq!(names.len(), self.width(), "rename arity mismatch");
        RowType::new(
            self.fields
                .iter()
                .zip(names)
                .map(|(f, n)| Field::new(n.clone(), f.data_type))
                .collect(),
        )
    }

    /// Whether the field types match position by position. Names are ignored.
    pub fn same_types(&self, other: &RowType) -> bool {
        self.width() == other.width()
            && self
                .fields
                .iter()
                .zip(&other.fields)
                .all(|(a, b)| a.data_type == b.data_type)
    }

    /// Column-wise least restrictive type over several row types of equal width.
    /// Names come from the first row type.
    pub fn least_restrictive(row_types: &[&RowType]) -> Option<RowType> {
        let first = row_types.first()?;
        if row_types.iter().any(|r| r.width() != first.width()) {
            return None;
        }
        let mut fields = Vec::with_capacity(first.width());
        for (i, field) in first.fields.iter().enumerate() {
            let column: Vec<DataType> = row_types.iter().map(|r| r.field_type(i)).collect();
            fields.push(Field::new(
                field.name.clone(),
                DataType::least_restrictive(&column)?,
            ));
        }
        Some(RowType::new(fields))
    }
}

impl fmt::Display for RowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordType(")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", field.data_type, field.name)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_least_restrictive_numeric_widening() {
        let t = DataType::least_restrictive(&[
            DataType::integer(),
            DataType::nullable(TypeKind::BigInt),
        ])
        .unwrap();
        assert_eq!(t, DataType::nullable(TypeKind::BigInt));

        let t = DataType::least_restrictive(&[DataType::double(), DataType::integer()]).unwrap();
        assert_eq!(t, DataType::double());
    }

    #[test]
    fn test_least_restrictive_null_and_strings() {
        let t = DataType::least_restrictive(&[DataType::null(), DataType::varchar(Some(10))])
            .unwrap();
        assert_eq!(t, DataType::nullable(TypeKind::Varchar(Some(10))));

        let t = DataType::least_restrictive(&[
            DataType::varchar(Some(10)),
            DataType::varchar(Some(20)),
        ])
        .unwrap();
        assert_eq!(t.kind, TypeKind::Varchar(Some(20)));
    }

    #[test]
    fn test_least_restrictive_incompatible() {
        assert!(DataType::least_restrictive(&[DataType::boolean(), DataType::integer()]).is_none());
        assert!(DataType::least_restrictive(&[]).is_none());
    }

    #[test]
    fn test_join_uniquifies_names() {
        let emp = RowType::of([("empno", DataType::integer()), ("deptno", DataType::integer())]);
        let dept = RowType::of([("deptno", DataType::integer()), ("name", DataType::varchar(None))]);
        let joined = emp.join(&dept);
        assert_eq!(joined.field_names(), vec!["empno", "deptno", "deptno0", "name"]);
    }

    #[test]
    fn test_same_types_ignores_names() {
        let a = RowType::of([("a", DataType::integer())]);
        let b = RowType::of([("b", DataType::integer())]);
        let c = RowType::of([("a", DataType::nullable(TypeKind::Integer))]);
        assert!(a.same_types(&b));
        assert!(!a.same_types(&c));
    }

    #[test]
    fn test_display() {
        let row_type = RowType::of([
            ("empno", DataType::integer()),
            ("ename", DataType::nullable(TypeKind::Varchar(Some(20)))),
        ]);
        assert_eq!(
            row_type.to_string(),
            "RecordType(INTEGER NOT NULL empno, VARCHAR(20) ename)"
        );
    }
}
