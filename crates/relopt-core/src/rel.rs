//! # Relational Expressions
//!
//! A plan is a DAG of immutable [`RelNode`]s connected through shared [`RelRef`]
//! (`Arc<RelNode>`) handles. Every node consists of:
//!
//! - an operator payload ([`RelOp`]), one struct per operator kind;
//! - ordered inputs;
//! - a row type and a [`TraitSet`], both *derived* from payload and inputs when the
//!   node is created and never supplied by the caller (`Scan`, `Values` and
//!   `TableFunctionScan` declare their row type as part of their payload);
//! - a digest, the canonical one-line rendering of the node and its inputs. Two
//!   nodes with equal digests are interchangeable, and `PartialEq`/`Hash` follow the
//!   digest.
//!
//! ## Construction
//!
//! [`RelNode::create`] validates the payload against the inputs (arity, column
//! ordinals, set-operation compatibility) and returns a [`PlanError`] when they
//! disagree. [`RelNode::copy`] and [`RelNode::copy_with`] rebuild a node over new
//! inputs, sharing every input that did not change.
//!
//! ## Typed payload access
//!
//! Each payload struct implements [`RelPayload`], which lets callers ask for a
//! specific operator without matching on [`RelOp`]:
//!
//! ```ignore
//! if let Some(join) = rel.payload::<Join>() {
//!     if join.join_type == JoinType::Inner { /* ... */ }
//! }
//! ```

use crate::error::{PlanError, Result};
use crate::fieldset::FieldSet;
use crate::mapping::{FunctionMapping, Mapping};
use crate::properties::{Collation, TraitSet};
use crate::rex::{referenced_fields_all, CorrelationId, LiteralValue, RexNode};
use crate::types::{DataType, Field, RowType, TypeKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Shared handle to a relational expression.
pub type RelRef = Arc<RelNode>;

/// Operator discriminant, without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelKind {
    Scan,
    Values,
    Filter,
    Project,
    Join,
    Correlate,
    Aggregate,
    Sort,
    SetOp,
    Calc,
    TableFunctionScan,
    MultiJoin,
}

/// SQL join types.
///
/// Semi and anti joins only produce the columns of their left input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    /// Only matching rows from both sides.
    Inner,
    /// All rows from the left, matching rows from the right (or NULLs).
    Left,
    /// All rows from the right, matching rows from the left (or NULLs).
    Right,
    /// All rows from both sides, NULLs where there is no match.
    Full,
    /// Left rows that have at least one match on the right.
    Semi,
    /// Left rows that have no match on the right.
    Anti,
}

impl JoinType {
    /// Whether the left side may be padded with NULLs.
    pub fn generates_nulls_on_left(self) -> bool {
        matches!(self, JoinType::Right | JoinType::Full)
    }

    /// Whether the right side may be padded with NULLs.
    pub fn generates_nulls_on_right(self) -> bool {
        matches!(self, JoinType::Left | JoinType::Full)
    }

    pub fn is_outer(self) -> bool {
        matches!(self, JoinType::Left | JoinType::Right | JoinType::Full)
    }

    /// Whether the right input's columns appear in the output.
    pub fn projects_right(self) -> bool {
        !matches!(self, JoinType::Semi | JoinType::Anti)
    }

    /// The join type after the inputs are swapped, `None` for semi and anti joins.
    pub fn swap(self) -> Option<JoinType> {
        match self {
            JoinType::Inner => Some(JoinType::Inner),
            JoinType::Left => Some(JoinType::Right),
            JoinType::Right => Some(JoinType::Left),
            JoinType::Full => Some(JoinType::Full),
            JoinType::Semi | JoinType::Anti => None,
        }
    }

    /// The join type once NULL-padded left rows are known to be filtered out.
    pub fn cancel_nulls_on_left(self) -> JoinType {
        match self {
            JoinType::Right => JoinType::Inner,
            JoinType::Full => JoinType::Left,
            other => other,
        }
    }

    /// The join type once NULL-padded right rows are known to be filtered out.
    pub fn cancel_nulls_on_right(self) -> JoinType {
        match self {
            JoinType::Left => JoinType::Inner,
            JoinType::Full => JoinType::Right,
            other => other,
        }
    }

    pub fn lower_name(self) -> &'static str {
        match self {
            JoinType::Inner => "inner",
            JoinType::Left => "left",
            JoinType::Right => "right",
            JoinType::Full => "full",
            JoinType::Semi => "semi",
            JoinType::Anti => "anti",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetOpKind {
    Union,
    Intersect,
    Minus,
}

/// Aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggFunc {
    Count,
    Sum,
    /// `SUM` that returns 0 instead of NULL over an empty group.
    Sum0,
    Min,
    Max,
    Avg,
    AnyValue,
    SingleValue,
}

impl AggFunc {
    /// Whether partial results of this function can be combined by applying
    /// another aggregate over them.
    pub fn is_splittable(self) -> bool {
        matches!(
            self,
            AggFunc::Count | AggFunc::Sum | AggFunc::Sum0 | AggFunc::Min | AggFunc::Max
        )
    }

    /// Whether the function returns NULL over an empty group.
    pub fn is_null_on_empty(self) -> bool {
        !matches!(self, AggFunc::Count | AggFunc::Sum0)
    }

    /// Result type over an argument of type `arg` (`None` for `COUNT(*)`).
    /// `grand_total` is true when the aggregate may see an empty group.
    pub fn infer_type(self, arg: Option<DataType>, grand_total: bool) -> DataType {
        let arg_type = arg.unwrap_or(DataType::nullable(TypeKind::Any));
        let widened = |t: DataType| {
            if t.kind.is_integral() {
                DataType::new(TypeKind::BigInt, t.nullable)
            } else {
                t
            }
        };
        match self {
            AggFunc::Count => DataType::bigint(),
            AggFunc::Sum => widened(arg_type).with_nullable(true),
            AggFunc::Sum0 => widened(arg_type).with_nullable(false),
            AggFunc::Avg => arg_type.with_nullable(true),
            AggFunc::Min | AggFunc::Max | AggFunc::AnyValue | AggFunc::SingleValue => {
                arg_type.with_nullable(arg_type.nullable || grand_total)
            }
        }
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Sum0 => "$SUM0",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
            AggFunc::Avg => "AVG",
            AggFunc::AnyValue => "ANY_VALUE",
            AggFunc::SingleValue => "SINGLE_VALUE",
        };
        write!(f, "{s}")
    }
}

/// One aggregate function application inside an `Aggregate`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateCall {
    pub func: AggFunc,
    pub distinct: bool,
    pub approximate: bool,
    /// Argument ordinals in the aggregate's input.
    pub args: Vec<usize>,
    /// Ordinal of a boolean input column that filters the rows fed to the call.
    pub filter_arg: Option<usize>,
    /// Order of the rows fed to the call (`WITHIN GROUP`).
    pub collation: Collation,
    pub data_type: DataType,
    pub name: Option<String>,
}

impl AggregateCall {
    /// Creates a call with its result type inferred from `input`.
    ///
    /// # Panics
    /// If an argument or filter ordinal is out of range for `input`.
    pub fn create(
        func: AggFunc,
        distinct: bool,
        args: Vec<usize>,
        filter_arg: Option<usize>,
        name: Option<String>,
        input: &RowType,
        group_count: usize,
    ) -> AggregateCall {
        for &arg in args.iter().chain(filter_arg.iter()) {
            assert!(
                arg < input.width(),
                "aggregate argument ${arg} out of range for input with {} field(s)",
                input.width()
            );
        }
        let arg_type = args.first().map(|&a| input.field_type(a));
        let data_type = func.infer_type(arg_type, group_count == 0);
        AggregateCall {
            func,
            distinct,
            approximate: false,
            args,
            filter_arg,
            collation: Collation::empty(),
            data_type,
            name,
        }
    }

    pub fn with_name(self, name: Option<String>) -> Self {
        Self { name, ..self }
    }

    /// The same call over renumbered arguments and filter.
    ///
    /// # Panics
    /// If an argument is unmapped.
    pub fn remap(&self, mapping: &Mapping) -> AggregateCall {
        AggregateCall {
            args: mapping.apply_list(&self.args),
            filter_arg: self.filter_arg.map(|f| mapping.target_of(f)),
            collation: self.collation.permute(mapping),
            ..self.clone()
        }
    }

    /// Every input ordinal the call reads.
    pub fn referenced_fields(&self) -> FieldSet {
        let mut builder = FieldSet::builder();
        for &arg in &self.args {
            builder.set(arg);
        }
        if let Some(f) = self.filter_arg {
            builder.set(f);
        }
        for key in &self.collation.keys {
            builder.set(key.field);
        }
        builder.build()
    }
}

impl fmt::Display for AggregateCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.func)?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "${arg}")?;
        }
        write!(f, ")")?;
        if self.approximate {
            write!(f, " APPROXIMATE")?;
        }
        if !self.collation.is_empty() {
            write!(f, " WITHIN GROUP (")?;
            for (i, key) in self.collation.keys.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "${} {}", key.field, key)?;
            }
            write!(f, ")")?;
        }
        if let Some(filter) = self.filter_arg {
            write!(f, " FILTER ${filter}")?;
        }
        Ok(())
    }
}

// --------------------------------------------------------------------
// Operator payloads
// --------------------------------------------------------------------

/// Reads a base table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scan {
    /// Qualified table name, e.g. `["hr", "emps"]`.
    pub table: Vec<String>,
    pub row_type: RowType,
    /// Column sets declared unique by the catalog.
    pub unique_keys: Vec<FieldSet>,
}

/// Literal rows. No tuples means a typed empty relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Values {
    pub row_type: RowType,
    pub tuples: Vec<Vec<LiteralValue>>,
}

impl Values {
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filter {
    pub condition: RexNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Project {
    pub exprs: Vec<RexNode>,
    pub names: Vec<String>,
}

impl Project {
    /// Whether the projection returns its input unchanged (ignoring names).
    pub fn is_trivial(&self, input_width: usize) -> bool {
        self.exprs.len() == input_width
            && self
                .exprs
                .iter()
                .enumerate()
                .all(|(i, e)| e.as_input_ref() == Some(i))
    }

    /// Output-to-input mapping if every output is a plain column. A column may
    /// be projected more than once.
    pub fn mapping(&self, input_width: usize) -> Option<FunctionMapping> {
        let mapping = self.function_mapping(input_width);
        mapping.is_total().then_some(mapping)
    }

    /// Partial input-to-output mapping covering the outputs that are plain
    /// columns. A column projected twice maps to its first position.
    pub fn partial_mapping(&self, input_width: usize) -> Mapping {
        self.function_mapping(input_width).inverse()
    }

    fn function_mapping(&self, input_width: usize) -> FunctionMapping {
        let refs: Vec<Option<usize>> = self
            .exprs
            .iter()
            .map(|e| e.as_input_ref().filter(|&source| source < input_width))
            .collect();
        FunctionMapping::from_projection(&refs, input_width)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Join {
    pub join_type: JoinType,
    /// Condition over the concatenation of both inputs.
    pub condition: RexNode,
}

/// Nested-loop join where the right input is re-evaluated for every left row,
/// reading the left row through correlation variable `id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Correlate {
    pub id: CorrelationId,
    /// Left columns the right input reads through the correlation variable.
    pub required_columns: FieldSet,
    /// One of `Inner`, `Left`, `Semi`, `Anti`.
    pub join_type: JoinType,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Aggregate {
    /// Union of all grouping sets, in input ordinals.
    pub group_set: FieldSet,
    /// Grouping sets, each a subset of `group_set`. A simple `GROUP BY` has exactly
    /// one grouping set equal to `group_set`.
    pub group_sets: Vec<FieldSet>,
    pub agg_calls: Vec<AggregateCall>,
}

impl Aggregate {
    /// Plain `GROUP BY group_set`.
    pub fn simple(group_set: FieldSet, agg_calls: Vec<AggregateCall>) -> Self {
        Self {
            group_sets: vec![group_set.clone()],
            group_set,
            agg_calls,
        }
    }

    pub fn is_simple(&self) -> bool {
        self.group_sets.len() == 1 && self.group_sets[0] == self.group_set
    }

    pub fn group_count(&self) -> usize {
        self.group_set.len()
    }

    /// Whether some grouping set is empty, so the aggregate produces a row even
    /// over empty input.
    pub fn has_empty_group(&self) -> bool {
        self.group_sets.iter().any(FieldSet::is_empty)
    }

    /// Columns present in every grouping set.
    pub fn common_group_keys(&self) -> FieldSet {
        FieldSet::intersect_all(&self.group_sets)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sort {
    pub collation: Collation,
    pub offset: Option<u64>,
    pub fetch: Option<u64>,
}

impl Sort {
    pub fn has_limit(&self) -> bool {
        self.offset.is_some() || self.fetch.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SetOp {
    pub kind: SetOpKind,
    /// `UNION ALL` rather than `UNION` (and likewise for the other kinds).
    pub all: bool,
}

/// Fused filter and projection over one input. The condition and every
/// expression are evaluated against the input row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Calc {
    pub exprs: Vec<RexNode>,
    pub condition: Option<RexNode>,
    pub names: Vec<String>,
}

impl Calc {
    pub fn is_trivial(&self, input_width: usize) -> bool {
        self.condition.is_none()
            && self.exprs.len() == input_width
            && self
                .exprs
                .iter()
                .enumerate()
                .all(|(i, e)| e.as_input_ref() == Some(i))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableFunctionScan {
    pub call: RexNode,
    pub row_type: RowType,
}

/// Inner join of two or more inputs under a single condition. The condition reads
/// the concatenation of all inputs, like the condition of a binary join.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MultiJoin {
    pub condition: RexNode,
}

impl MultiJoin {
    /// Offset of the first field of every input in the joined row, followed by the
    /// total width.
    pub fn offsets(inputs: &[RelRef]) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(inputs.len() + 1);
        let mut offset = 0;
        offsets.push(offset);
        for input in inputs {
            offset += input.field_count();
            offsets.push(offset);
        }
        offsets
    }
}

/// Operator payload of a relational expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelOp {
    Scan(Scan),
    Values(Values),
    Filter(Filter),
    Project(Project),
    Join(Join),
    Correlate(Correlate),
    Aggregate(Aggregate),
    Sort(Sort),
    SetOp(SetOp),
    Calc(Calc),
    TableFunctionScan(TableFunctionScan),
    MultiJoin(MultiJoin),
}

impl RelOp {
    pub fn kind(&self) -> RelKind {
        match self {
            RelOp::Scan(_) => RelKind::Scan,
            RelOp::Values(_) => RelKind::Values,
            RelOp::Filter(_) => RelKind::Filter,
            RelOp::Project(_) => RelKind::Project,
            RelOp::Join(_) => RelKind::Join,
            RelOp::Correlate(_) => RelKind::Correlate,
            RelOp::Aggregate(_) => RelKind::Aggregate,
            RelOp::Sort(_) => RelKind::Sort,
            RelOp::SetOp(_) => RelKind::SetOp,
            RelOp::Calc(_) => RelKind::Calc,
            RelOp::TableFunctionScan(_) => RelKind::TableFunctionScan,
            RelOp::MultiJoin(_) => RelKind::MultiJoin,
        }
    }

    /// Scalar expressions held by the payload.
    pub fn expressions(&self) -> Vec<&RexNode> {
        match self {
            RelOp::Filter(filter) => vec![&filter.condition],
            RelOp::Project(project) => project.exprs.iter().collect(),
            RelOp::Join(join) => vec![&join.condition],
            RelOp::MultiJoin(multi_join) => vec![&multi_join.condition],
            RelOp::Calc(calc) => calc.exprs.iter().chain(calc.condition.iter()).collect(),
            RelOp::TableFunctionScan(scan) => vec![&scan.call],
            RelOp::Scan(_)
            | RelOp::Values(_)
            | RelOp::Correlate(_)
            | RelOp::Aggregate(_)
            | RelOp::Sort(_)
            | RelOp::SetOp(_) => Vec::new(),
        }
    }

    /// Display name of the operator.
    pub fn name(&self) -> &'static str {
        match self {
            RelOp::SetOp(s) => match s.kind {
                SetOpKind::Union => "Union",
                SetOpKind::Intersect => "Intersect",
                SetOpKind::Minus => "Minus",
            },
            RelOp::Scan(_) => "Scan",
            RelOp::Values(_) => "Values",
            RelOp::Filter(_) => "Filter",
            RelOp::Project(_) => "Project",
            RelOp::Join(_) => "Join",
            RelOp::Correlate(_) => "Correlate",
            RelOp::Aggregate(_) => "Aggregate",
            RelOp::Sort(_) => "Sort",
            RelOp::Calc(_) => "Calc",
            RelOp::TableFunctionScan(_) => "TableFunctionScan",
            RelOp::MultiJoin(_) => "MultiJoin",
        }
    }
}

/// Implemented by every payload struct; gives typed access to a node's payload.
pub trait RelPayload: Into<RelOp> + Send + Sync + 'static {
    const KIND: RelKind;

    fn from_op(op: &RelOp) -> Option<&Self>;
}

macro_rules! rel_payload {
    ($($ty:ident),* $(,)?) => {
        $(
            impl RelPayload for $ty {
                const KIND: RelKind = RelKind::$ty;

                fn from_op(op: &RelOp) -> Option<&Self> {
                    match op {
                        RelOp::$ty(payload) => Some(payload),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for RelOp {
                fn from(payload: $ty) -> Self {
                    RelOp::$ty(payload)
                }
            }
        )*
    };
}

rel_payload!(
    Scan,
    Values,
    Filter,
    Project,
    Join,
    Correlate,
    Aggregate,
    Sort,
    SetOp,
    Calc,
    TableFunctionScan,
    MultiJoin,
);

// --------------------------------------------------------------------
// RelNode
// --------------------------------------------------------------------

/// Immutable relational expression.
pub struct RelNode {
    op: RelOp,
    inputs: Vec<RelRef>,
    row_type: RowType,
    traits: TraitSet,
    digest: String,
}

impl RelNode {
    /// Validates `op` against `inputs` and derives the row type, traits and digest.
    pub fn create(op: impl Into<RelOp>, inputs: Vec<RelRef>) -> Result<RelRef> {
        let op = op.into();
        let row_type = derive_row_type(&op, &inputs)?;
        let traits = derive_traits(&op, &inputs);
        let digest = crate::explain::digest(&op, &inputs);
        Ok(Arc::new(RelNode {
            op,
            inputs,
            row_type,
            traits,
            digest,
        }))
    }

    pub fn scan(table: &[&str], row_type: RowType, unique_keys: Vec<FieldSet>) -> Result<RelRef> {
        RelNode::create(
            Scan {
                table: table.iter().map(|s| s.to_string()).collect(),
                row_type,
                unique_keys,
            },
            vec![],
        )
    }

    pub fn values(row_type: RowType, tuples: Vec<Vec<LiteralValue>>) -> Result<RelRef> {
        RelNode::create(Values { row_type, tuples }, vec![])
    }

    /// Typed empty relation.
    pub fn empty(row_type: RowType) -> Result<RelRef> {
        RelNode::values(row_type, vec![])
    }

    pub fn filter(input: RelRef, condition: RexNode) -> Result<RelRef> {
        RelNode::create(Filter { condition }, vec![input])
    }

    pub fn project(input: RelRef, exprs: Vec<RexNode>, names: Vec<String>) -> Result<RelRef> {
        RelNode::create(Project { exprs, names }, vec![input])
    }

    pub fn join(left: RelRef, right: RelRef, join_type: JoinType, condition: RexNode) -> Result<RelRef> {
        RelNode::create(
            Join {
                join_type,
                condition,
            },
            vec![left, right],
        )
    }

    pub fn multi_join(inputs: Vec<RelRef>, condition: RexNode) -> Result<RelRef> {
        RelNode::create(MultiJoin { condition }, inputs)
    }

    pub fn aggregate(input: RelRef, aggregate: Aggregate) -> Result<RelRef> {
        RelNode::create(aggregate, vec![input])
    }

    pub fn sort(input: RelRef, collation: Collation, offset: Option<u64>, fetch: Option<u64>) -> Result<RelRef> {
        RelNode::create(
            Sort {
                collation,
                offset,
                fetch,
            },
            vec![input],
        )
    }

    pub fn set_op(kind: SetOpKind, all: bool, inputs: Vec<RelRef>) -> Result<RelRef> {
        RelNode::create(SetOp { kind, all }, inputs)
    }

    pub fn op(&self) -> &RelOp {
        &self.op
    }

    pub fn kind(&self) -> RelKind {
        self.op.kind()
    }

    pub fn name(&self) -> &'static str {
        self.op.name()
    }

    /// Typed payload, `None` if the node is of another kind.
    pub fn payload<T: RelPayload>(&self) -> Option<&T> {
        T::from_op(&self.op)
    }

    pub fn inputs(&self) -> &[RelRef] {
        &self.inputs
    }

    /// Input `i`.
    ///
    /// # Panics
    /// If the node has no input `i`.
    pub fn input(&self, i: usize) -> &RelRef {
        &self.inputs[i]
    }

    pub fn row_type(&self) -> &RowType {
        &self.row_type
    }

    pub fn field_count(&self) -> usize {
        self.row_type.width()
    }

    pub fn traits(&self) -> &TraitSet {
        &self.traits
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Whether this is a `Values` without tuples.
    pub fn is_empty_values(&self) -> bool {
        self.payload::<Values>().is_some_and(Values::is_empty)
    }

    /// The same operator over new inputs; row type and traits are re-derived.
    pub fn copy(&self, inputs: Vec<RelRef>) -> Result<RelRef> {
        RelNode::create(self.op.clone(), inputs)
    }

    /// A node with a new payload over new inputs.
    pub fn copy_with(&self, inputs: Vec<RelRef>, op: impl Into<RelOp>) -> Result<RelRef> {
        RelNode::create(op, inputs)
    }
}

impl PartialEq for RelNode {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for RelNode {}

impl Hash for RelNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

impl fmt::Debug for RelNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.digest)
    }
}

impl fmt::Display for RelNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.explain())
    }
}

// --------------------------------------------------------------------
// Derivation
// --------------------------------------------------------------------

fn check_arity(operator: &'static str, inputs: &[RelRef], expected: usize) -> Result<()> {
    if inputs.len() != expected {
        return Err(PlanError::InputArity {
            operator,
            expected,
            actual: inputs.len(),
        });
    }
    Ok(())
}

fn check_fields(fields: &FieldSet, width: usize) -> Result<()> {
    match fields.last() {
        Some(ordinal) if ordinal >= width => Err(PlanError::FieldOutOfRange { ordinal, width }),
        _ => Ok(()),
    }
}

fn check_exprs<'a>(exprs: impl IntoIterator<Item = &'a RexNode>, width: usize) -> Result<()> {
    check_fields(&referenced_fields_all(exprs), width)
}

fn named_fields(exprs: &[RexNode], names: &[String]) -> Result<RowType> {
    if exprs.len() != names.len() {
        return Err(PlanError::invalid(
            "Project",
            format!("{} expression(s) but {} name(s)", exprs.len(), names.len()),
        ));
    }
    Ok(RowType::new(
        exprs
            .iter()
            .zip(names)
            .map(|(e, n)| Field::new(n.clone(), e.data_type()))
            .collect(),
    ))
}

fn derive_row_type(op: &RelOp, inputs: &[RelRef]) -> Result<RowType> {
    match op {
        RelOp::Scan(scan) => {
            check_arity("Scan", inputs, 0)?;
            for key in &scan.unique_keys {
                check_fields(key, scan.row_type.width())?;
            }
            Ok(scan.row_type.clone())
        }
        RelOp::Values(values) => {
            check_arity("Values", inputs, 0)?;
            if let Some(t) = values.tuples.iter().find(|t| t.len() != values.row_type.width()) {
                return Err(PlanError::invalid(
                    "Values",
                    format!(
                        "tuple of width {} for row type of width {}",
                        t.len(),
                        values.row_type.width()
                    ),
                ));
            }
            Ok(values.row_type.clone())
        }
        RelOp::Filter(filter) => {
            check_arity("Filter", inputs, 1)?;
            let input = inputs[0].row_type();
            check_exprs([&filter.condition], input.width())?;
            Ok(input.clone())
        }
        RelOp::Project(project) => {
            check_arity("Project", inputs, 1)?;
            check_exprs(&project.exprs, inputs[0].field_count())?;
            named_fields(&project.exprs, &project.names)
        }
        RelOp::Join(join) => {
            check_arity("Join", inputs, 2)?;
            let left = inputs[0].row_type();
            let right = inputs[1].row_type();
            check_exprs([&join.condition], left.width() + right.width())?;
            Ok(join_row_type(left, right, join.join_type))
        }
        RelOp::Correlate(correlate) => {
            check_arity("Correlate", inputs, 2)?;
            if !matches!(
                correlate.join_type,
                JoinType::Inner | JoinType::Left | JoinType::Semi | JoinType::Anti
            ) {
                return Err(PlanError::invalid(
                    "Correlate",
                    format!("unsupported join type {:?}", correlate.join_type),
                ));
            }
            let left = inputs[0].row_type();
            check_fields(&correlate.required_columns, left.width())?;
            Ok(join_row_type(left, inputs[1].row_type(), correlate.join_type))
        }
        RelOp::Aggregate(aggregate) => {
            check_arity("Aggregate", inputs, 1)?;
            aggregate_row_type(aggregate, inputs[0].row_type())
        }
        RelOp::Sort(sort) => {
            check_arity("Sort", inputs, 1)?;
            let input = inputs[0].row_type();
            for key in &sort.collation.keys {
                if key.field >= input.width() {
                    return Err(PlanError::FieldOutOfRange {
                        ordinal: key.field,
                        width: input.width(),
                    });
                }
            }
            Ok(input.clone())
        }
        RelOp::SetOp(set_op) => {
            if inputs.is_empty() {
                return Err(PlanError::InputArity {
                    operator: op.name(),
                    expected: 1,
                    actual: 0,
                });
            }
            let row_types: Vec<&RowType> = inputs.iter().map(|i| i.row_type()).collect();
            RowType::least_restrictive(&row_types).ok_or_else(|| {
                PlanError::invalid(
                    match set_op.kind {
                        SetOpKind::Union => "Union",
                        SetOpKind::Intersect => "Intersect",
                        SetOpKind::Minus => "Minus",
                    },
                    "inputs have incompatible row types",
                )
            })
        }
        RelOp::Calc(calc) => {
            check_arity("Calc", inputs, 1)?;
            let width = inputs[0].field_count();
            check_exprs(calc.exprs.iter().chain(calc.condition.iter()), width)?;
            named_fields(&calc.exprs, &calc.names)
        }
        RelOp::TableFunctionScan(scan) => Ok(scan.row_type.clone()),
        RelOp::MultiJoin(multi_join) => {
            if inputs.len() < 2 {
                return Err(PlanError::InputArity {
                    operator: "MultiJoin",
                    expected: 2,
                    actual: inputs.len(),
                });
            }
            let row_type = inputs[1..]
                .iter()
                .fold(inputs[0].row_type().clone(), |acc, input| acc.join(input.row_type()));
            check_exprs([&multi_join.condition], row_type.width())?;
            Ok(row_type)
        }
    }
}

/// Row type of a join of `left` and `right`: semi and anti joins keep only the left
/// columns, outer joins make the NULL-generating side nullable.
pub fn join_row_type(left: &RowType, right: &RowType, join_type: JoinType) -> RowType {
    if !join_type.projects_right() {
        return left.clone();
    }
    let widen = |row_type: &RowType, nullable: bool| {
        if nullable {
            row_type.with_nullable(true)
        } else {
            row_type.clone()
        }
    };
    let left = widen(left, join_type.generates_nulls_on_left());
    let right = widen(right, join_type.generates_nulls_on_right());
    left.join(&right)
}

fn aggregate_row_type(aggregate: &Aggregate, input: &RowType) -> Result<RowType> {
    check_fields(&aggregate.group_set, input.width())?;
    if aggregate.group_sets.is_empty() {
        return Err(PlanError::invalid("Aggregate", "no grouping sets"));
    }
    if let Some(set) = aggregate
        .group_sets
        .iter()
        .find(|s| !aggregate.group_set.contains_all(s))
    {
        return Err(PlanError::invalid(
            "Aggregate",
            format!("grouping set {set} is not a subset of {}", aggregate.group_set),
        ));
    }
    for call in &aggregate.agg_calls {
        check_fields(&call.referenced_fields(), input.width())?;
    }
    let common = aggregate.common_group_keys();
    let simple = aggregate.is_simple();
    let grand_total = aggregate.has_empty_group();
    let mut fields = Vec::with_capacity(aggregate.group_count() + aggregate.agg_calls.len());
    for key in aggregate.group_set.iter() {
        let field = input.field(key);
        let nullable = field.data_type.nullable || (!simple && !common.contains(key));
        fields.push(Field::new(
            field.name.clone(),
            field.data_type.with_nullable(nullable),
        ));
    }
    for (i, call) in aggregate.agg_calls.iter().enumerate() {
        let name = call
            .name
            .clone()
            .unwrap_or_else(|| format!("$f{}", aggregate.group_count() + i));
        let nullable = call.data_type.nullable || (grand_total && call.func.is_null_on_empty());
        fields.push(Field::new(name, call.data_type.with_nullable(nullable)));
    }
    let mut row_type = RowType::new(fields);
    let names = unique_names(&row_type);
    row_type = row_type.rename(&names);
    Ok(row_type)
}

fn unique_names(row_type: &RowType) -> Vec<String> {
    RowType::default().join(row_type).field_names()
}

fn derive_traits(op: &RelOp, inputs: &[RelRef]) -> TraitSet {
    let collation = match op {
        RelOp::Sort(sort) => sort.collation.clone(),
        RelOp::Filter(_) => inputs[0].traits().collation.clone(),
        RelOp::Project(project) => inputs[0]
            .traits()
            .collation
            .permute(&project.partial_mapping(inputs[0].field_count())),
        RelOp::Calc(calc) => {
            let mapping = Project {
                exprs: calc.exprs.clone(),
                names: calc.names.clone(),
            }
            .partial_mapping(inputs[0].field_count());
            inputs[0].traits().collation.permute(&mapping)
        }
        _ => Collation::empty(),
    };
    TraitSet::logical().with_collation(collation)
}
