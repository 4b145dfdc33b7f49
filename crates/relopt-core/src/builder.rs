//! # Relational Builder
//!
//! [`RelBuilder`] assembles relational expressions on a stack: leaf operations push
//! a node, unary operations replace the top of the stack, and binary or n-ary
//! operations pop their inputs and push the result. Rules obtain a builder from
//! their call and use it for every replacement they construct.
//!
//! ```ignore
//! let rel = builder
//!     .push(emps)
//!     .push(depts)
//!     .join(JoinType::Inner, condition)?
//!     .filter([predicate])?
//!     .project(exprs)?
//!     .build()?;
//! ```
//!
//! ## Simplifications
//!
//! The builder folds a few shapes on the fly. None of them changes the row type of
//! what is being built:
//!
//! - a projection that returns its input unchanged (same columns, compatible names)
//!   is skipped;
//! - a projection over a projection is merged into one;
//! - a filter over a filter is merged by conjunction; filters never merge into
//!   other operators;
//! - an always-true filter is skipped and an always-false filter becomes an empty
//!   `Values` of the same row type;
//! - an aggregate over a projection drops the projected columns it does not read.
//!
//! Misuse (empty stack, unknown field, malformed operator) is reported as a
//! [`PlanError`].

use crate::catalog::Catalog;
use crate::error::{PlanError, Result};
use crate::fieldset::FieldSet;
use crate::mapping::Mapping;
use crate::properties::{Collation, FieldCollation};
use crate::rel::{
    Aggregate, AggregateCall, Calc, Correlate, Filter, JoinType, Project, RelNode, RelRef,
    SetOpKind,
};
use crate::rex::{CorrelationId, LiteralValue, Op, RexNode};
use crate::shuttle::push_past_project_all;
use crate::types::{DataType, RowType, TypeKind};
use std::sync::Arc;

/// Grouping key of an aggregate: the group set and, for `GROUPING SETS`, the
/// individual grouping sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupKey {
    pub group_set: FieldSet,
    pub group_sets: Option<Vec<FieldSet>>,
}

impl GroupKey {
    pub fn of(fields: impl IntoIterator<Item = usize>) -> Self {
        Self {
            group_set: FieldSet::of(fields),
            group_sets: None,
        }
    }

    /// Grand total: no grouping columns.
    pub fn empty() -> Self {
        Self::of([])
    }

    pub fn with_sets(group_set: FieldSet, group_sets: Vec<FieldSet>) -> Self {
        Self {
            group_set,
            group_sets: Some(group_sets),
        }
    }
}

/// Stack-based constructor of relational expressions.
#[derive(Default)]
pub struct RelBuilder {
    stack: Vec<RelRef>,
    catalog: Option<Arc<dyn Catalog>>,
}

impl RelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(catalog: Arc<dyn Catalog>) -> Self {
        Self {
            stack: Vec::new(),
            catalog: Some(catalog),
        }
    }

    // ----------------------------------------------------------------
    // Stack
    // ----------------------------------------------------------------

    pub fn push(&mut self, rel: RelRef) -> &mut Self {
        self.stack.push(rel);
        self
    }

    /// Number of expressions on the stack.
    pub fn size(&self) -> usize {
        self.stack.len()
    }

    /// Top of the stack.
    pub fn peek(&self) -> Result<&RelRef> {
        self.peek_at(0)
    }

    /// The `n`-th expression from the top (`0` is the top).
    pub fn peek_at(&self, n: usize) -> Result<&RelRef> {
        self.stack
            .len()
            .checked_sub(n + 1)
            .map(|i| &self.stack[i])
            .ok_or(PlanError::EmptyStack {
                requested: n + 1,
                available: self.stack.len(),
            })
    }

    /// Pops the top of the stack.
    pub fn build(&mut self) -> Result<RelRef> {
        self.stack.pop().ok_or(PlanError::EmptyStack {
            requested: 1,
            available: 0,
        })
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<RelRef>> {
        if self.stack.len() < n {
            return Err(PlanError::EmptyStack {
                requested: n,
                available: self.stack.len(),
            });
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn replace_top(&mut self, rel: RelRef) -> &mut Self {
        self.stack.pop();
        self.stack.push(rel);
        self
    }

    // ----------------------------------------------------------------
    // Field references
    // ----------------------------------------------------------------

    /// Reference to field `ordinal` of the top of the stack.
    pub fn field(&self, ordinal: usize) -> Result<RexNode> {
        self.field_of(1, 0, ordinal)
    }

    /// Reference to the field called `name` of the top of the stack.
    pub fn field_named(&self, name: &str) -> Result<RexNode> {
        let top = self.peek()?;
        let ordinal = top
            .row_type()
            .index_of(name)
            .ok_or_else(|| PlanError::FieldNotFound(name.to_string()))?;
        Ok(RexNode::input_ref(ordinal, top.row_type().field_type(ordinal)))
    }

    /// Reference to field `ordinal` of input `input` among the top `input_count`
    /// expressions, as seen by an operator that joins them (inputs are numbered
    /// from the deepest one; the reference is offset by the widths of the inputs
    /// before it).
    pub fn field_of(&self, input_count: usize, input: usize, ordinal: usize) -> Result<RexNode> {
        if input >= input_count {
            return Err(PlanError::invalid(
                "RelBuilder",
                format!("input {input} of {input_count}"),
            ));
        }
        let mut offset = 0;
        for i in 0..input {
            offset += self.peek_at(input_count - 1 - i)?.field_count();
        }
        let rel = self.peek_at(input_count - 1 - input)?;
        let width = rel.field_count();
        if ordinal >= width {
            return Err(PlanError::FieldOutOfRange { ordinal, width });
        }
        Ok(RexNode::input_ref(
            offset + ordinal,
            rel.row_type().field_type(ordinal),
        ))
    }

    /// References to every field of the top of the stack.
    pub fn fields(&self) -> Result<Vec<RexNode>> {
        Ok(RexNode::input_refs(self.peek()?.row_type(), 0))
    }

    /// References to the given fields of the top of the stack.
    pub fn fields_of(&self, ordinals: &[usize]) -> Result<Vec<RexNode>> {
        ordinals.iter().map(|&i| self.field(i)).collect()
    }

    // ----------------------------------------------------------------
    // Expressions
    // ----------------------------------------------------------------

    pub fn and(&self, operands: impl IntoIterator<Item = RexNode>) -> RexNode {
        RexNode::and(operands)
    }

    pub fn or(&self, operands: impl IntoIterator<Item = RexNode>) -> RexNode {
        RexNode::or(operands)
    }

    pub fn not(&self, operand: RexNode) -> RexNode {
        RexNode::not(operand)
    }

    pub fn equals(&self, a: RexNode, b: RexNode) -> RexNode {
        RexNode::call(Op::Eq, vec![a, b])
    }

    pub fn is_null(&self, operand: RexNode) -> RexNode {
        RexNode::call(Op::IsNull, vec![operand])
    }

    pub fn is_not_null(&self, operand: RexNode) -> RexNode {
        RexNode::call(Op::IsNotNull, vec![operand])
    }

    pub fn call(&self, op: Op, operands: Vec<RexNode>) -> RexNode {
        RexNode::call(op, operands)
    }

    pub fn cast(&self, operand: RexNode, data_type: DataType) -> RexNode {
        RexNode::cast(operand, data_type)
    }

    /// Literal typed after its value.
    pub fn literal(&self, value: LiteralValue) -> RexNode {
        let data_type = match &value {
            LiteralValue::Null => DataType::null(),
            LiteralValue::Bool(_) => DataType::boolean(),
            LiteralValue::Int(_) => DataType::integer(),
            LiteralValue::Double(_) => DataType::double(),
            LiteralValue::String(s) => DataType::varchar(Some(s.chars().count() as u32)),
            LiteralValue::Date(_) => DataType::not_null(TypeKind::Date),
            LiteralValue::Timestamp(_) => DataType::not_null(TypeKind::Timestamp),
        };
        RexNode::literal(value, data_type)
    }

    // ----------------------------------------------------------------
    // Leaves
    // ----------------------------------------------------------------

    /// Scan of a catalog table.
    pub fn scan(&mut self, name: &[&str]) -> Result<&mut Self> {
        let table = self
            .catalog
            .as_ref()
            .and_then(|c| c.table(name))
            .ok_or_else(|| PlanError::TableNotFound(name.join(".")))?;
        let names: Vec<&str> = table.name.iter().map(String::as_str).collect();
        let scan = RelNode::scan(&names, table.row_type, table.unique_keys)?;
        Ok(self.push(scan))
    }

    pub fn values(&mut self, row_type: RowType, tuples: Vec<Vec<LiteralValue>>) -> Result<&mut Self> {
        let values = RelNode::values(row_type, tuples)?;
        Ok(self.push(values))
    }

    /// Replaces the top of the stack with an empty relation of the same row type.
    pub fn empty(&mut self) -> Result<&mut Self> {
        let row_type = self.peek()?.row_type().clone();
        let empty = RelNode::empty(row_type)?;
        Ok(self.replace_top(empty))
    }

    // ----------------------------------------------------------------
    // Unary operators
    // ----------------------------------------------------------------

    /// Filter on the conjunction of `conditions`.
    pub fn filter(&mut self, conditions: impl IntoIterator<Item = RexNode>) -> Result<&mut Self> {
        let condition = RexNode::and(conditions);
        if condition.is_always_true() {
            self.peek()?;
            return Ok(self);
        }
        if condition.is_always_false() {
            return self.empty();
        }
        let top = self.peek()?.clone();
        let filter = match top.payload::<Filter>() {
            Some(inner) => RelNode::filter(
                top.input(0).clone(),
                RexNode::and([inner.condition.clone(), condition]),
            )?,
            None => RelNode::filter(top, condition)?,
        };
        Ok(self.replace_top(filter))
    }

    /// Projection with derived names: a plain column keeps its input name, other
    /// expressions are called `$f<position>`.
    pub fn project(&mut self, exprs: Vec<RexNode>) -> Result<&mut Self> {
        let input = self.peek()?.row_type().clone();
        let mut names: Vec<String> = exprs
            .iter()
            .enumerate()
            .map(|(i, e)| match e.as_input_ref() {
                Some(ordinal) if ordinal < input.width() => input.field(ordinal).name.clone(),
                _ => format!("$f{i}"),
            })
            .collect();
        uniquify(&mut names);
        self.project_impl(exprs, names, false)
    }

    /// Projection with explicit names. Unless `force` is set, a projection that
    /// returns its input unchanged under the same names is skipped.
    pub fn project_named(&mut self, exprs: Vec<RexNode>, names: Vec<String>, force: bool) -> Result<&mut Self> {
        self.project_impl(exprs, names, force)
    }

    fn project_impl(&mut self, exprs: Vec<RexNode>, names: Vec<String>, force: bool) -> Result<&mut Self> {
        let top = self.peek()?.clone();
        if exprs.len() != names.len() {
            return Err(PlanError::invalid(
                "Project",
                format!("{} expression(s) but {} name(s)", exprs.len(), names.len()),
            ));
        }
        let project = Project { exprs, names };
        if !force && is_identity(&project, top.row_type()) {
            return Ok(self);
        }
        // A volatile inner expression would be evaluated once per reference.
        let mergeable = top
            .payload::<Project>()
            .filter(|inner| inner.exprs.iter().all(RexNode::is_deterministic));
        let (input, project) = match mergeable {
            Some(inner) => {
                let merged = Project {
                    exprs: push_past_project_all(&project.exprs, &inner.exprs),
                    names: project.names,
                };
                (top.input(0).clone(), merged)
            }
            None => (top, project),
        };
        let rel = if !force && is_identity(&project, input.row_type()) {
            input
        } else {
            RelNode::create(project, vec![input])?
        };
        Ok(self.replace_top(rel))
    }

    /// Renames the fields of the top of the stack.
    pub fn rename(&mut self, names: Vec<String>) -> Result<&mut Self> {
        let top = self.peek()?.clone();
        if names.len() != top.field_count() {
            return Err(PlanError::invalid(
                "Project",
                format!("{} name(s) for {} field(s)", names.len(), top.field_count()),
            ));
        }
        if top.row_type().field_names() == names {
            return Ok(self);
        }
        let rel = match top.payload::<Project>() {
            Some(inner) => RelNode::project(top.input(0).clone(), inner.exprs.clone(), names)?,
            None => RelNode::project(top.clone(), RexNode::input_refs(top.row_type(), 0), names)?,
        };
        Ok(self.replace_top(rel))
    }

    /// Casts the top of the stack to `row_type`, taking its field names as well if
    /// `rename` is set.
    pub fn convert(&mut self, row_type: &RowType, rename: bool) -> Result<&mut Self> {
        let top = self.peek()?.clone();
        if row_type.width() != top.field_count() {
            return Err(PlanError::invalid(
                "Project",
                format!(
                    "cannot convert {} field(s) to {}",
                    top.field_count(),
                    row_type.width()
                ),
            ));
        }
        let exprs: Vec<RexNode> = RexNode::input_refs(top.row_type(), 0)
            .into_iter()
            .zip(&row_type.fields)
            .map(|(e, f)| RexNode::cast(e, f.data_type))
            .collect();
        let names = if rename {
            row_type.field_names()
        } else {
            top.row_type().field_names()
        };
        self.project_impl(exprs, names, false)
    }

    /// Aggregate over the top of the stack.
    ///
    /// Over a `Project`, the projected columns that neither the group key nor any
    /// call reads are removed first.
    pub fn aggregate(&mut self, group_key: GroupKey, calls: Vec<AggregateCall>) -> Result<&mut Self> {
        let top = self.peek()?.clone();
        let group_sets = group_key
            .group_sets
            .unwrap_or_else(|| vec![group_key.group_set.clone()]);
        let mut aggregate = Aggregate {
            group_set: group_key.group_set,
            group_sets,
            agg_calls: calls,
        };
        let mut input = top.clone();
        if let Some(project) = top.payload::<Project>() {
            let mut used = aggregate.group_set.rebuild();
            for call in &aggregate.agg_calls {
                used.add_all(&call.referenced_fields());
            }
            let used = used.build();
            let width = project.exprs.len();
            if used.len() < width && used.last().is_some_and(|l| l < width) {
                let mapping = Mapping::target(&used, project.exprs.len());
                let pruned = Project {
                    exprs: used.iter().map(|i| project.exprs[i].clone()).collect(),
                    names: used.iter().map(|i| project.names[i].clone()).collect(),
                };
                input = RelNode::create(pruned, vec![top.input(0).clone()])?;
                aggregate = Aggregate {
                    group_set: mapping.apply_set(&aggregate.group_set),
                    group_sets: aggregate
                        .group_sets
                        .iter()
                        .map(|s| mapping.apply_set(s))
                        .collect(),
                    agg_calls: aggregate.agg_calls.iter().map(|c| c.remap(&mapping)).collect(),
                };
            }
        }
        let rel = RelNode::aggregate(input, aggregate)?;
        Ok(self.replace_top(rel))
    }

    /// Removes duplicate rows by grouping on every field.
    pub fn distinct(&mut self) -> Result<&mut Self> {
        let width = self.peek()?.field_count();
        self.aggregate(GroupKey::of(0..width), vec![])
    }

    /// Sort on the given keys. Sorting on nothing is skipped.
    pub fn sort(&mut self, keys: Vec<FieldCollation>) -> Result<&mut Self> {
        self.sort_limit(None, None, keys)
    }

    /// Sort with optional offset and fetch. A fetch of zero yields an empty
    /// relation.
    pub fn sort_limit(&mut self, offset: Option<u64>, fetch: Option<u64>, keys: Vec<FieldCollation>) -> Result<&mut Self> {
        let top = self.peek()?.clone();
        if fetch == Some(0) {
            return self.empty();
        }
        if keys.is_empty() && offset.is_none() && fetch.is_none() {
            return Ok(self);
        }
        let sort = RelNode::sort(top, Collation::of(keys), offset, fetch)?;
        Ok(self.replace_top(sort))
    }

    /// Fused filter and projection over the top of the stack.
    pub fn calc(&mut self, exprs: Vec<RexNode>, condition: Option<RexNode>, names: Vec<String>) -> Result<&mut Self> {
        let top = self.peek()?.clone();
        let condition = condition.filter(|c| !c.is_always_true());
        let calc = RelNode::create(
            Calc {
                exprs,
                condition,
                names,
            },
            vec![top],
        )?;
        Ok(self.replace_top(calc))
    }

    // ----------------------------------------------------------------
    // Binary and n-ary operators
    // ----------------------------------------------------------------

    /// Joins the two expressions on top of the stack (the deeper one is the left
    /// input).
    pub fn join(&mut self, join_type: JoinType, condition: RexNode) -> Result<&mut Self> {
        let mut inputs = self.pop_n(2)?;
        let right = inputs.pop().ok_or(PlanError::EmptyStack {
            requested: 2,
            available: 0,
        })?;
        let left = inputs.pop().ok_or(PlanError::EmptyStack {
            requested: 2,
            available: 1,
        })?;
        let join = RelNode::join(left, right, join_type, condition)?;
        Ok(self.push(join))
    }

    pub fn semi_join(&mut self, condition: RexNode) -> Result<&mut Self> {
        self.join(JoinType::Semi, condition)
    }

    pub fn anti_join(&mut self, condition: RexNode) -> Result<&mut Self> {
        self.join(JoinType::Anti, condition)
    }

    /// Correlates the two expressions on top of the stack; the right one reads the
    /// left row through `id`.
    pub fn correlate(&mut self, join_type: JoinType, id: CorrelationId, required_columns: FieldSet) -> Result<&mut Self> {
        let inputs = self.pop_n(2)?;
        let correlate = RelNode::create(
            Correlate {
                id,
                required_columns,
                join_type,
            },
            inputs,
        )?;
        Ok(self.push(correlate))
    }

    pub fn union(&mut self, all: bool, n: usize) -> Result<&mut Self> {
        self.set_op(SetOpKind::Union, all, n)
    }

    pub fn intersect(&mut self, all: bool, n: usize) -> Result<&mut Self> {
        self.set_op(SetOpKind::Intersect, all, n)
    }

    pub fn minus(&mut self, all: bool, n: usize) -> Result<&mut Self> {
        self.set_op(SetOpKind::Minus, all, n)
    }

    fn set_op(&mut self, kind: SetOpKind, all: bool, n: usize) -> Result<&mut Self> {
        let inputs = self.pop_n(n)?;
        let rel = RelNode::set_op(kind, all, inputs)?;
        Ok(self.push(rel))
    }
}

/// Whether `project` returns `input` unchanged under the same names.
fn is_identity(project: &Project, input: &RowType) -> bool {
    project.is_trivial(input.width())
        && project
            .names
            .iter()
            .zip(&input.fields)
            .all(|(n, f)| *n == f.name)
}

fn uniquify(names: &mut [String]) {
    let row_type = RowType::of(names.iter().map(|n| (n.clone(), DataType::null())));
    let unique = RowType::default().join(&row_type).field_names();
    names.clone_from_slice(&unique);
}
