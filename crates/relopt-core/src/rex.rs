//! # Scalar Expressions
//!
//! [`RexNode`] is the row-level expression tree that appears inside relational
//! operators: filter conditions, join conditions, projection lists and calc
//! programs. Column references are positional (`$0`, `$1`, …) and always resolve
//! against the row type of the operator's input (for a join, the concatenation of
//! both inputs). Rewrites that move expressions between operators therefore have to
//! renumber them; see [`crate::shuttle`] for the machinery.
//!
//! ## Operators
//!
//! [`Op`] is a closed set of SQL operators plus named functions. Each operator
//! declares a [`Strictness`] that describes how it propagates NULL. The null
//! analysis ([`RexNode::is_null_when`], [`RexNode::is_not_true_when`]) builds on
//! it to decide whether a predicate rejects rows whose columns are NULL, which is
//! how outer joins are strengthened.
//!
//! ## Conjunctions
//!
//! Conditions are handled as flat conjunctions almost everywhere. [`RexNode::and`]
//! and [`RexNode::conjunctions`] are inverse operations modulo simplification:
//! `TRUE` operands are dropped, a `FALSE` operand collapses the whole conjunction
//! and duplicates are removed.

use crate::fieldset::{FieldSet, FieldSetBuilder};
use crate::types::{DataType, RowType, TypeKind};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Constant value of a literal.
///
/// Floating-point values use `OrderedFloat` so literals can take part in the
/// `Eq`/`Hash` comparisons that plan digests rely on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiteralValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(OrderedFloat<f64>),
    String(String),
    /// Days since 1970-01-01.
    Date(i32),
    /// Milliseconds since 1970-01-01 00:00:00.
    Timestamp(i64),
}

impl LiteralValue {
    pub fn is_null(&self) -> bool {
        matches!(self, LiteralValue::Null)
    }
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Null => write!(f, "null"),
            LiteralValue::Bool(b) => write!(f, "{b}"),
            LiteralValue::Int(i) => write!(f, "{i}"),
            LiteralValue::Double(d) => write!(f, "{d:?}"),
            LiteralValue::String(s) => write!(f, "'{s}'"),
            LiteralValue::Date(d) => write!(f, "DATE {d}"),
            LiteralValue::Timestamp(t) => write!(f, "TIMESTAMP {t}"),
        }
    }
}

/// How an operator propagates NULL operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    /// Result is NULL if any operand is NULL (`=`, `+`, `CAST`, …).
    Any,
    /// Result is NULL only if every operand is NULL (`COALESCE`).
    All,
    /// Result is never NULL (`IS NULL`, `IS TRUE`, …).
    NotNull,
    /// Nothing can be concluded from the operands alone.
    AsIs,
}

/// Scalar operator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    And,
    Or,
    Not,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    IsNull,
    IsNotNull,
    IsTrue,
    IsFalse,
    Add,
    Sub,
    Mul,
    Div,
    /// Conversion to the call's type.
    Cast,
    /// `CASE WHEN c1 THEN v1 [WHEN c2 THEN v2 …] ELSE e END`, operands laid out as
    /// `[c1, v1, c2, v2, …, e]`.
    Case,
    Coalesce,
    /// Named function. Treated as opaque by the null analysis.
    Function(String),
}

impl Op {
    pub fn strictness(&self) -> Strictness {
        match self {
            Op::Not
            | Op::Eq
            | Op::NotEq
            | Op::Lt
            | Op::LtEq
            | Op::Gt
            | Op::GtEq
            | Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Cast => Strictness::Any,
            Op::Coalesce => Strictness::All,
            Op::IsNull | Op::IsNotNull | Op::IsTrue | Op::IsFalse => Strictness::NotNull,
            Op::And | Op::Or | Op::Case | Op::Function(_) => Strictness::AsIs,
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Op::Eq | Op::NotEq | Op::Lt | Op::LtEq | Op::Gt | Op::GtEq
        )
    }

    /// The comparison that holds when the operands are swapped (`<` becomes `>`).
    pub fn reverse(&self) -> Option<Op> {
        Some(match self {
            Op::Eq => Op::Eq,
            Op::NotEq => Op::NotEq,
            Op::Lt => Op::Gt,
            Op::LtEq => Op::GtEq,
            Op::Gt => Op::Lt,
            Op::GtEq => Op::LtEq,
            _ => return None,
        })
    }

    /// Result type of applying this operator to operands of the given types.
    ///
    /// `CAST` and named functions have no inferable type; callers give one
    /// explicitly through [`RexNode::call_typed`].
    fn infer_type(&self, operands: &[RexNode]) -> DataType {
        let any_nullable = operands.iter().any(|o| o.data_type().nullable);
        match self {
            Op::And | Op::Or | Op::Not => DataType::new(TypeKind::Boolean, any_nullable),
            op if op.is_comparison() => DataType::new(TypeKind::Boolean, any_nullable),
            Op::IsNull | Op::IsNotNull | Op::IsTrue | Op::IsFalse => DataType::boolean(),
            Op::Add | Op::Sub | Op::Mul | Op::Div => {
                let types: Vec<DataType> = operands.iter().map(|o| o.data_type()).collect();
                DataType::least_restrictive(&types)
                    .unwrap_or(DataType::nullable(TypeKind::Any))
                    .with_nullable(any_nullable)
            }
            Op::Case => {
                let mut types: Vec<DataType> = operands
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| i % 2 == 1 || *i == operands.len() - 1)
                    .map(|(_, o)| o.data_type())
                    .collect();
                if operands.len() % 2 == 0 {
                    // no ELSE branch: implicit ELSE NULL
                    types.push(DataType::null());
                }
                DataType::least_restrictive(&types).unwrap_or(DataType::nullable(TypeKind::Any))
            }
            Op::Coalesce => {
                let types: Vec<DataType> = operands.iter().map(|o| o.data_type()).collect();
                let all_nullable = operands.iter().all(|o| o.data_type().nullable);
                DataType::least_restrictive(&types)
                    .unwrap_or(DataType::nullable(TypeKind::Any))
                    .with_nullable(all_nullable)
            }
            _ => DataType::nullable(TypeKind::Any),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Op::And => "AND",
            Op::Or => "OR",
            Op::Not => "NOT",
            Op::Eq => "=",
            Op::NotEq => "<>",
            Op::Lt => "<",
            Op::LtEq => "<=",
            Op::Gt => ">",
            Op::GtEq => ">=",
            Op::IsNull => "IS NULL",
            Op::IsNotNull => "IS NOT NULL",
            Op::IsTrue => "IS TRUE",
            Op::IsFalse => "IS FALSE",
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Cast => "CAST",
            Op::Case => "CASE",
            Op::Coalesce => "COALESCE",
            Op::Function(name) => name,
        };
        write!(f, "{s}")
    }
}

/// Identifier of a correlation variable introduced by a `Correlate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(pub u32);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$cor{}", self.0)
    }
}

/// Row-level scalar expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RexNode {
    /// Reference to input column `index`.
    InputRef { index: usize, data_type: DataType },
    Literal {
        value: LiteralValue,
        data_type: DataType,
    },
    Call {
        op: Op,
        operands: Vec<RexNode>,
        data_type: DataType,
    },
    /// The current row of the left input of the `Correlate` that owns `id`.
    CorrelVariable { id: CorrelationId, row_type: RowType },
    /// Field `field` of a row-valued expression (normally a correlation variable).
    FieldAccess {
        expr: Box<RexNode>,
        field: usize,
        data_type: DataType,
    },
}

impl RexNode {
    // ----------------------------------------------------------------
    // Constructors
    // ----------------------------------------------------------------

    pub fn input_ref(index: usize, data_type: DataType) -> RexNode {
        RexNode::InputRef { index, data_type }
    }

    /// References to every field of `row_type`, starting at ordinal `offset`.
    pub fn input_refs(row_type: &RowType, offset: usize) -> Vec<RexNode> {
        row_type
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| RexNode::input_ref(offset + i, f.data_type))
            .collect()
    }

    pub fn literal(value: LiteralValue, data_type: DataType) -> RexNode {
        RexNode::Literal { value, data_type }
    }

    pub fn bool_literal(value: bool) -> RexNode {
        RexNode::literal(LiteralValue::Bool(value), DataType::boolean())
    }

    pub fn true_literal() -> RexNode {
        RexNode::bool_literal(true)
    }

    pub fn false_literal() -> RexNode {
        RexNode::bool_literal(false)
    }

    pub fn int_literal(value: i64) -> RexNode {
        RexNode::literal(LiteralValue::Int(value), DataType::integer())
    }

    pub fn string_literal(value: impl Into<String>) -> RexNode {
        let value = value.into();
        let len = value.chars().count() as u32;
        RexNode::literal(
            LiteralValue::String(value),
            DataType::not_null(TypeKind::Varchar(Some(len))),
        )
    }

    /// Typed NULL.
    pub fn null_literal(data_type: DataType) -> RexNode {
        RexNode::literal(LiteralValue::Null, data_type.with_nullable(true))
    }

    /// Call with an inferred result type.
    pub fn call(op: Op, operands: Vec<RexNode>) -> RexNode {
        let data_type = op.infer_type(&operands);
        RexNode::Call {
            op,
            operands,
            data_type,
        }
    }

    pub fn call_typed(op: Op, operands: Vec<RexNode>, data_type: DataType) -> RexNode {
        RexNode::Call {
            op,
            operands,
            data_type,
        }
    }

    /// `CAST(expr AS data_type)`, or `expr` itself if it already has that type.
    pub fn cast(expr: RexNode, data_type: DataType) -> RexNode {
        if expr.data_type() == data_type {
            return expr;
        }
        RexNode::call_typed(Op::Cast, vec![expr], data_type)
    }

    pub fn correl(id: CorrelationId, row_type: RowType) -> RexNode {
        RexNode::CorrelVariable { id, row_type }
    }

    /// Access to field `field` of a correlation variable.
    ///
    /// # Panics
    /// If `expr` is not row-valued or `field` is out of range.
    pub fn field_access(expr: RexNode, field: usize) -> RexNode {
        let data_type = match &expr {
            RexNode::CorrelVariable { row_type, .. } => row_type.field_type(field),
            other => panic!("field access on non-row expression {other}"),
        };
        RexNode::FieldAccess {
            expr: Box::new(expr),
            field,
            data_type,
        }
    }

    /// Simplifying conjunction: flattens nested ANDs, drops `TRUE`, removes
    /// duplicates and collapses to `FALSE` if any operand is `FALSE`. The empty
    /// conjunction is `TRUE`.
    pub fn and(operands: impl IntoIterator<Item = RexNode>) -> RexNode {
        let mut flat: Vec<RexNode> = Vec::new();
        for operand in operands {
            for conjunct in operand.into_conjunctions() {
                if conjunct.is_always_true() {
                    continue;
                }
                if conjunct.is_false_literal() {
                    return RexNode::false_literal();
                }
                if !flat.contains(&conjunct) {
                    flat.push(conjunct);
                }
            }
        }
        match flat.len() {
            0 => RexNode::true_literal(),
            1 => flat.pop().unwrap_or_else(RexNode::true_literal),
            _ => RexNode::call(Op::And, flat),
        }
    }

    /// Simplifying disjunction, dual of [`RexNode::and`].
    pub fn or(operands: impl IntoIterator<Item = RexNode>) -> RexNode {
        let mut flat: Vec<RexNode> = Vec::new();
        for operand in operands {
            for disjunct in operand.into_disjunctions() {
                if disjunct.is_false_literal() {
                    continue;
                }
                if disjunct.is_always_true() {
                    return RexNode::true_literal();
                }
                if !flat.contains(&disjunct) {
                    flat.push(disjunct);
                }
            }
        }
        match flat.len() {
            0 => RexNode::false_literal(),
            1 => flat.pop().unwrap_or_else(RexNode::false_literal),
            _ => RexNode::call(Op::Or, flat),
        }
    }

    /// Negation with `NOT NOT x = x` and constant folding of boolean literals.
    pub fn not(operand: RexNode) -> RexNode {
        match operand {
            RexNode::Literal {
                value: LiteralValue::Bool(b),
                ..
            } => RexNode::bool_literal(!b),
            RexNode::Call {
                op: Op::Not,
                mut operands,
                ..
            } if operands.len() == 1 => operands.remove(0),
            other => RexNode::call(Op::Not, vec![other]),
        }
    }

    // ----------------------------------------------------------------
    // Accessors
    // ----------------------------------------------------------------

    pub fn data_type(&self) -> DataType {
        match self {
            RexNode::InputRef { data_type, .. }
            | RexNode::Literal { data_type, .. }
            | RexNode::Call { data_type, .. }
            | RexNode::FieldAccess { data_type, .. } => *data_type,
            RexNode::CorrelVariable { .. } => DataType::not_null(TypeKind::Any),
        }
    }

    /// Ordinal of a plain column reference.
    pub fn as_input_ref(&self) -> Option<usize> {
        match self {
            RexNode::InputRef { index, .. } => Some(*index),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, RexNode::Literal { .. })
    }

    pub fn is_always_true(&self) -> bool {
        matches!(
            self,
            RexNode::Literal {
                value: LiteralValue::Bool(true),
                ..
            }
        )
    }

    fn is_false_literal(&self) -> bool {
        matches!(
            self,
            RexNode::Literal {
                value: LiteralValue::Bool(false),
                ..
            }
        )
    }

    /// Whether the expression, used as a condition, never accepts a row: the
    /// `FALSE` literal or a boolean `NULL` literal.
    pub fn is_always_false(&self) -> bool {
        match self {
            RexNode::Literal {
                value: LiteralValue::Bool(false),
                ..
            } => true,
            RexNode::Literal {
                value: LiteralValue::Null,
                data_type,
            } => matches!(data_type.kind, TypeKind::Boolean | TypeKind::Null),
            _ => false,
        }
    }

    /// Top-level conjuncts of this expression (`[self]` if it is not an AND).
    /// `TRUE` has no conjuncts.
    pub fn conjunctions(&self) -> Vec<RexNode> {
        self.clone().into_conjunctions()
    }

    fn into_conjunctions(self) -> Vec<RexNode> {
        match self {
            RexNode::Call {
                op: Op::And,
                operands,
                ..
            } => operands
                .into_iter()
                .flat_map(RexNode::into_conjunctions)
                .collect(),
            e if e.is_always_true() => Vec::new(),
            e => vec![e],
        }
    }

    /// Top-level disjuncts of this expression. `FALSE` has no disjuncts.
    pub fn disjunctions(&self) -> Vec<RexNode> {
        self.clone().into_disjunctions()
    }

    fn into_disjunctions(self) -> Vec<RexNode> {
        match self {
            RexNode::Call {
                op: Op::Or,
                operands,
                ..
            } => operands
                .into_iter()
                .flat_map(RexNode::into_disjunctions)
                .collect(),
            e if e.is_false_literal() => Vec::new(),
            e => vec![e],
        }
    }

    /// Ordinals of every input column the expression reads.
    pub fn referenced_fields(&self) -> FieldSet {
        let mut builder = FieldSet::builder();
        self.collect_fields(&mut builder);
        builder.build()
    }

    fn collect_fields(&self, out: &mut FieldSetBuilder) {
        match self {
            RexNode::InputRef { index, .. } => {
                out.set(*index);
            }
            RexNode::Call { operands, .. } => {
                for operand in operands {
                    operand.collect_fields(out);
                }
            }
            RexNode::FieldAccess { expr, .. } => expr.collect_fields(out),
            RexNode::Literal { .. } | RexNode::CorrelVariable { .. } => {}
        }
    }

    /// Whether the expression references the given correlation variable (any
    /// variable if `id` is `None`).
    pub fn references_correlation(&self, id: Option<CorrelationId>) -> bool {
        match self {
            RexNode::CorrelVariable { id: own, .. } => id.map_or(true, |id| id == *own),
            RexNode::FieldAccess { expr, .. } => expr.references_correlation(id),
            RexNode::Call { operands, .. } => {
                operands.iter().any(|o| o.references_correlation(id))
            }
            RexNode::InputRef { .. } | RexNode::Literal { .. } => false,
        }
    }

    /// Whether the expression is deterministic and free of calls whose
    /// semantics the engine does not know.
    pub fn is_deterministic(&self) -> bool {
        match self {
            RexNode::Call { op, operands, .. } => {
                !matches!(op, Op::Function(name) if is_volatile_function(name))
                    && operands.iter().all(RexNode::is_deterministic)
            }
            RexNode::FieldAccess { expr, .. } => expr.is_deterministic(),
            _ => true,
        }
    }

    // ----------------------------------------------------------------
    // Null analysis
    // ----------------------------------------------------------------

    /// Whether the expression is certainly NULL when every column in `nulls` is
    /// NULL.
    pub fn is_null_when(&self, nulls: &FieldSet) -> bool {
        match self {
            RexNode::InputRef { index, .. } => nulls.contains(*index),
            RexNode::Literal { value, .. } => value.is_null(),
            RexNode::Call { op, operands, .. } => match op {
                // AND(NULL, FALSE) is FALSE, so only an all-NULL conjunction is NULL
                Op::And | Op::Or => operands.iter().all(|o| o.is_null_when(nulls)),
                _ => match op.strictness() {
                    Strictness::Any => operands.iter().any(|o| o.is_null_when(nulls)),
                    Strictness::All => operands.iter().all(|o| o.is_null_when(nulls)),
                    Strictness::NotNull | Strictness::AsIs => false,
                },
            },
            RexNode::CorrelVariable { .. } | RexNode::FieldAccess { .. } => false,
        }
    }

    /// Whether the expression, evaluated as a condition, is certainly not `TRUE`
    /// (so the row is rejected) when every column in `nulls` is NULL.
    pub fn is_not_true_when(&self, nulls: &FieldSet) -> bool {
        match self {
            RexNode::Call { op, operands, .. } => match op {
                Op::And => operands.iter().any(|o| o.is_not_true_when(nulls)),
                Op::Or => operands.iter().all(|o| o.is_not_true_when(nulls)),
                Op::IsNotNull | Op::IsFalse | Op::Not => operands[0].is_null_when(nulls),
                Op::IsTrue => operands[0].is_not_true_when(nulls),
                Op::IsNull => false,
                _ => self.is_null_when(nulls),
            },
            e if e.is_always_false() => true,
            e => e.is_null_when(nulls),
        }
    }
}

fn is_volatile_function(name: &str) -> bool {
    matches!(
        name.to_ascii_uppercase().as_str(),
        "RAND" | "RANDOM" | "UUID" | "NOW" | "CURRENT_TIMESTAMP"
    )
}

/// Union of the fields referenced by every expression in `exprs`.
pub fn referenced_fields_all<'a>(exprs: impl IntoIterator<Item = &'a RexNode>) -> FieldSet {
    let mut builder = FieldSet::builder();
    for expr in exprs {
        expr.collect_fields(&mut builder);
    }
    builder.build()
}

impl fmt::Display for RexNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RexNode::InputRef { index, .. } => write!(f, "${index}"),
            RexNode::Literal {
                value: LiteralValue::Null,
                data_type,
            } => write!(f, "null:{}", data_type.kind),
            RexNode::Literal { value, .. } => write!(f, "{value}"),
            RexNode::Call {
                op: Op::Cast,
                operands,
                data_type,
            } => write!(f, "CAST({}):{}", operands[0], data_type),
            RexNode::Call { op, operands, .. } => {
                write!(f, "{op}(")?;
                for (i, operand) in operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{operand}")?;
                }
                write!(f, ")")
            }
            RexNode::CorrelVariable { id, .. } => write!(f, "{id}"),
            RexNode::FieldAccess { expr, field, .. } => match expr.as_ref() {
                RexNode::CorrelVariable { row_type, .. } if *field < row_type.width() => {
                    write!(f, "{expr}.{}", row_type.field(*field).name)
                }
                _ => write!(f, "{expr}.${field}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: usize) -> RexNode {
        RexNode::input_ref(i, DataType::nullable(TypeKind::Integer))
    }

    fn eq(a: RexNode, b: RexNode) -> RexNode {
        RexNode::call(Op::Eq, vec![a, b])
    }

    #[test]
    fn test_and_flattens_and_simplifies() {
        let a = eq(int(0), RexNode::int_literal(1));
        let b = eq(int(1), RexNode::int_literal(2));
        let nested = RexNode::and([a.clone(), RexNode::and([b.clone(), RexNode::true_literal()])]);
        assert_eq!(nested.conjunctions(), vec![a.clone(), b.clone()]);
        assert_eq!(RexNode::and([a.clone(), a.clone()]), a);
        assert!(RexNode::and(Vec::new()).is_always_true());
        assert!(RexNode::and([a, RexNode::false_literal()]).is_always_false());
    }

    #[test]
    fn test_or_simplifies() {
        let a = eq(int(0), RexNode::int_literal(1));
        assert!(RexNode::or([a.clone(), RexNode::true_literal()]).is_always_true());
        assert_eq!(RexNode::or([a.clone(), RexNode::false_literal()]), a);
    }

    #[test]
    fn test_not_folds() {
        let a = eq(int(0), RexNode::int_literal(1));
        assert_eq!(RexNode::not(RexNode::not(a.clone())), a);
        assert!(RexNode::not(RexNode::true_literal()).is_always_false());
    }

    #[test]
    fn test_referenced_fields() {
        let e = RexNode::and([
            eq(int(3), RexNode::int_literal(1)),
            eq(int(0), int(7)),
        ]);
        assert_eq!(e.referenced_fields(), FieldSet::of([0, 3, 7]));
        assert_eq!(
            referenced_fields_all(&[int(1), int(4)]),
            FieldSet::of([1, 4])
        );
    }

    #[test]
    fn test_null_rejection() {
        let nulls = FieldSet::of([1]);
        assert!(eq(int(1), RexNode::int_literal(5)).is_not_true_when(&nulls));
        assert!(!eq(int(0), RexNode::int_literal(5)).is_not_true_when(&nulls));
        let is_null = RexNode::call(Op::IsNull, vec![int(1)]);
        assert!(!is_null.is_not_true_when(&nulls));
        let is_not_null = RexNode::call(Op::IsNotNull, vec![int(1)]);
        assert!(is_not_null.is_not_true_when(&nulls));
        let or = RexNode::or([
            eq(int(1), RexNode::int_literal(5)),
            eq(int(0), RexNode::int_literal(5)),
        ]);
        assert!(!or.is_not_true_when(&nulls));
        let coalesce = RexNode::call(Op::Coalesce, vec![int(1), RexNode::int_literal(0)]);
        assert!(!eq(coalesce, RexNode::int_literal(0)).is_not_true_when(&nulls));
    }

    #[test]
    fn test_inferred_types() {
        let sum = RexNode::call(Op::Add, vec![RexNode::int_literal(1), RexNode::input_ref(0, DataType::bigint())]);
        assert_eq!(sum.data_type(), DataType::bigint());
        let cmp = eq(int(0), RexNode::int_literal(1));
        assert_eq!(cmp.data_type(), DataType::nullable(TypeKind::Boolean));
        assert_eq!(RexNode::call(Op::IsNull, vec![int(0)]).data_type(), DataType::boolean());
    }

    #[test]
    fn test_display() {
        let e = RexNode::and([
            eq(int(0), RexNode::int_literal(10)),
            RexNode::call(Op::IsNotNull, vec![int(2)]),
        ]);
        assert_eq!(e.to_string(), "AND(=($0, 10), IS NOT NULL($2))");
        let cast = RexNode::cast(int(1), DataType::bigint());
        assert_eq!(cast.to_string(), "CAST($1):BIGINT NOT NULL");
        let cor = RexNode::correl(
            CorrelationId(0),
            RowType::of([("deptno", DataType::integer())]),
        );
        assert_eq!(RexNode::field_access(cor, 0).to_string(), "$cor0.deptno");
    }
}
