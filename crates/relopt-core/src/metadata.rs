//! # Relational Metadata
//!
//! Rules ask questions about plans that cannot be answered from a single node:
//! "can this input produce rows at all?", "are these columns a key?", "which
//! predicates always hold on this output?". The [`RelMetadataQuery`] trait is the
//! seam through which those questions are answered. It is a trait object
//! (`&dyn RelMetadataQuery`) so a cost-based driver can answer from its own
//! statistics and catalog.
//!
//! [`DefaultRelMetadata`] answers from plan structure alone:
//!
//! - **Row-count bounds**: exact for `Values`, propagated through every operator,
//!   unknown (`None`) for table scans.
//! - **Uniqueness**: declared unique keys of scans, group keys of aggregates, and
//!   whatever survives projections, filters and joins.
//! - **Pulled-up predicates**: filter conditions and inner-join conditions,
//!   renumbered as they travel up through projections and aggregates.

use crate::fieldset::FieldSet;
use crate::mapping::Mapping;
use crate::rel::{JoinType, MultiJoin, Project, RelNode, RelOp, SetOpKind};
use crate::rex::{Op, RexNode};
use crate::shuttle::{permute_inputs, shift};

/// Metadata questions asked by rules.
pub trait RelMetadataQuery: Send + Sync {
    /// Upper bound on the number of rows, `None` if unbounded or unknown.
    fn max_row_count(&self, rel: &RelNode) -> Option<f64>;

    /// Lower bound on the number of rows, `None` if unknown.
    fn min_row_count(&self, rel: &RelNode) -> Option<f64>;

    /// Whether `columns` form a unique key of the output, `None` if unknown.
    fn are_columns_unique(&self, rel: &RelNode, columns: &FieldSet) -> Option<bool>;

    /// Conjuncts known to hold on every output row.
    fn pulled_up_predicates(&self, rel: &RelNode) -> Vec<RexNode>;

    /// Whether the expression certainly produces no rows.
    fn is_empty(&self, rel: &RelNode) -> bool {
        self.max_row_count(rel) == Some(0.0)
    }
}

/// Structural metadata provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRelMetadata;

impl DefaultRelMetadata {
    pub fn new() -> Self {
        Self
    }
}

impl RelMetadataQuery for DefaultRelMetadata {
    fn max_row_count(&self, rel: &RelNode) -> Option<f64> {
        let input = |i: usize| self.max_row_count(rel.input(i));
        match rel.op() {
            RelOp::Values(values) => Some(values.tuples.len() as f64),
            RelOp::Scan(_) | RelOp::TableFunctionScan(_) => None,
            RelOp::Filter(filter) => {
                if filter.condition.is_always_false() {
                    Some(0.0)
                } else {
                    input(0)
                }
            }
            RelOp::Calc(calc) => {
                if calc.condition.as_ref().is_some_and(RexNode::is_always_false) {
                    Some(0.0)
                } else {
                    input(0)
                }
            }
            RelOp::Project(_) => input(0),
            RelOp::Sort(sort) => {
                let offset = sort.offset.unwrap_or(0) as f64;
                let remaining = input(0).map(|m| (m - offset).max(0.0));
                match (sort.fetch, remaining) {
                    (Some(fetch), Some(m)) => Some(m.min(fetch as f64)),
                    (Some(fetch), None) => Some(fetch as f64),
                    (None, m) => m,
                }
            }
            RelOp::Aggregate(aggregate) => {
                let empty_sets = aggregate.group_sets.iter().filter(|s| s.is_empty()).count();
                let other_sets = aggregate.group_sets.len() - empty_sets;
                if other_sets == 0 {
                    return Some(empty_sets as f64);
                }
                input(0).map(|m| m * other_sets as f64 + empty_sets as f64)
            }
            RelOp::Join(join) => join_max_rows(join.join_type, input(0), input(1)),
            RelOp::MultiJoin(_) => (1..rel.inputs().len())
                .map(input)
                .fold(input(0), |acc, next| join_max_rows(JoinType::Inner, acc, next)),
            RelOp::Correlate(correlate) => join_max_rows(correlate.join_type, input(0), input(1)),
            RelOp::SetOp(set_op) => {
                let counts: Vec<Option<f64>> = (0..rel.inputs().len()).map(input).collect();
                match set_op.kind {
                    SetOpKind::Union => counts.into_iter().sum(),
                    SetOpKind::Intersect => counts
                        .into_iter()
                        .flatten()
                        .min_by(|a, b| a.total_cmp(b)),
                    SetOpKind::Minus => counts[0],
                }
            }
        }
    }

    fn min_row_count(&self, rel: &RelNode) -> Option<f64> {
        let input = |i: usize| self.min_row_count(rel.input(i));
        match rel.op() {
            RelOp::Values(values) => Some(values.tuples.len() as f64),
            RelOp::Scan(_) | RelOp::TableFunctionScan(_) => Some(0.0),
            RelOp::Filter(filter) if filter.condition.is_always_true() => input(0),
            RelOp::Filter(_) => Some(0.0),
            RelOp::Calc(calc) if calc.condition.is_some() => Some(0.0),
            RelOp::Calc(_) | RelOp::Project(_) => input(0),
            RelOp::Sort(sort) if sort.has_limit() => Some(0.0),
            RelOp::Sort(_) => input(0),
            RelOp::Aggregate(aggregate) => {
                if aggregate.has_empty_group() {
                    Some(1.0)
                } else {
                    input(0).map(|m| m.min(1.0))
                }
            }
            RelOp::Join(join) => join_min_rows(join.join_type, input(0), input(1)),
            RelOp::MultiJoin(_) => Some(0.0),
            RelOp::Correlate(correlate) => {
                join_min_rows(correlate.join_type, input(0), input(1))
            }
            RelOp::SetOp(set_op) => match (set_op.kind, set_op.all) {
                (SetOpKind::Union, true) => (0..rel.inputs().len()).map(input).sum(),
                (SetOpKind::Union, false) => {
                    let any = (0..rel.inputs().len()).any(|i| input(i).is_some_and(|m| m >= 1.0));
                    Some(if any { 1.0 } else { 0.0 })
                }
                _ => Some(0.0),
            },
        }
    }

    fn are_columns_unique(&self, rel: &RelNode, columns: &FieldSet) -> Option<bool> {
        if self.max_row_count(rel).is_some_and(|m| m <= 1.0) {
            return Some(true);
        }
        match rel.op() {
            RelOp::Scan(scan) => Some(scan.unique_keys.iter().any(|k| columns.contains_all(k))),
            RelOp::Values(values) => {
                let mut seen = std::collections::HashSet::new();
                Some(values.tuples.iter().all(|t| {
                    let key: Vec<_> = columns.iter().map(|c| t[c].clone()).collect();
                    seen.insert(key)
                }))
            }
            RelOp::Filter(_) | RelOp::Sort(_) => self.are_columns_unique(rel.input(0), columns),
            RelOp::Project(project) => project_unique(self, rel, project, columns),
            RelOp::Calc(calc) => {
                let project = Project {
                    exprs: calc.exprs.clone(),
                    names: calc.names.clone(),
                };
                project_unique(self, rel, &project, columns)
            }
            RelOp::Aggregate(aggregate) => {
                if aggregate.is_simple() {
                    let keys = FieldSet::range_to(aggregate.group_count());
                    Some(columns.contains_all(&keys))
                } else {
                    None
                }
            }
            RelOp::Join(join) => {
                let left = rel.input(0);
                if !join.join_type.projects_right() {
                    return self.are_columns_unique(left, columns);
                }
                let left_width = left.field_count();
                let left_cols = columns.intersect(&FieldSet::range_to(left_width));
                let right_cols = columns
                    .except(&FieldSet::range_to(left_width))
                    .shift(-(left_width as isize));
                let left_unique = self.are_columns_unique(left, &left_cols)?;
                let right_unique = self.are_columns_unique(rel.input(1), &right_cols)?;
                Some(left_unique && right_unique)
            }
            RelOp::MultiJoin(_) => {
                let offsets = MultiJoin::offsets(rel.inputs());
                let mut unique = true;
                for (i, input) in rel.inputs().iter().enumerate() {
                    let own = columns
                        .intersect(&FieldSet::range(offsets[i], offsets[i + 1]))
                        .shift(-(offsets[i] as isize));
                    unique &= self.are_columns_unique(input, &own)?;
                }
                Some(unique)
            }
            RelOp::SetOp(set_op) => {
                let covers_all = columns.contains_all(&FieldSet::range_to(rel.field_count()));
                if !set_op.all && covers_all {
                    Some(true)
                } else if set_op.kind == SetOpKind::Minus {
                    self.are_columns_unique(rel.input(0), columns)
                } else {
                    None
                }
            }
            RelOp::Correlate(_) | RelOp::TableFunctionScan(_) => None,
        }
    }

    fn pulled_up_predicates(&self, rel: &RelNode) -> Vec<RexNode> {
        match rel.op() {
            RelOp::Scan(_) | RelOp::Values(_) | RelOp::TableFunctionScan(_) => Vec::new(),
            RelOp::Filter(filter) => {
                let mut predicates = self.pulled_up_predicates(rel.input(0));
                for conjunct in filter.condition.conjunctions() {
                    if conjunct.is_deterministic() && !predicates.contains(&conjunct) {
                        predicates.push(conjunct);
                    }
                }
                predicates
            }
            RelOp::Sort(_) => self.pulled_up_predicates(rel.input(0)),
            RelOp::Project(project) => project_predicates(self, rel, project),
            RelOp::Calc(calc) => {
                let mut input_predicates = self.pulled_up_predicates(rel.input(0));
                if let Some(condition) = &calc.condition {
                    input_predicates.extend(condition.conjunctions());
                }
                let project = Project {
                    exprs: calc.exprs.clone(),
                    names: calc.names.clone(),
                };
                map_predicates(input_predicates, &project, rel.input(0).field_count())
            }
            RelOp::Aggregate(aggregate) => {
                let input = rel.input(0);
                let keys = aggregate.common_group_keys();
                let mapping = Mapping::target(&aggregate.group_set, input.field_count());
                self.pulled_up_predicates(input)
                    .into_iter()
                    .filter(|p| keys.contains_all(&p.referenced_fields()))
                    .map(|p| permute_inputs(&p, &mapping))
                    .collect()
            }
            RelOp::Join(join) => {
                let left = self.pulled_up_predicates(rel.input(0));
                let right: Vec<RexNode> = self
                    .pulled_up_predicates(rel.input(1))
                    .iter()
                    .map(|p| shift(p, rel.input(0).field_count() as isize))
                    .collect();
                match join.join_type {
                    JoinType::Inner => {
                        let mut all = left;
                        all.extend(right);
                        for conjunct in join.condition.conjunctions() {
                            if conjunct.is_deterministic() && !all.contains(&conjunct) {
                                all.push(conjunct);
                            }
                        }
                        all
                    }
                    JoinType::Left | JoinType::Semi | JoinType::Anti => left,
                    JoinType::Right => right,
                    JoinType::Full => Vec::new(),
                }
            }
            RelOp::MultiJoin(multi_join) => {
                let offsets = MultiJoin::offsets(rel.inputs());
                let mut all = Vec::new();
                for (i, input) in rel.inputs().iter().enumerate() {
                    for p in self.pulled_up_predicates(input) {
                        let p = shift(&p, offsets[i] as isize);
                        if !all.contains(&p) {
                            all.push(p);
                        }
                    }
                }
                for conjunct in multi_join.condition.conjunctions() {
                    if conjunct.is_deterministic() && !all.contains(&conjunct) {
                        all.push(conjunct);
                    }
                }
                all
            }
            RelOp::Correlate(_) => self.pulled_up_predicates(rel.input(0)),
            RelOp::SetOp(set_op) => {
                let mut inputs = rel.inputs().iter().map(|i| self.pulled_up_predicates(i));
                let first = inputs.next().unwrap_or_default();
                match set_op.kind {
                    SetOpKind::Union => inputs.fold(first, |acc, next| {
                        acc.into_iter().filter(|p| next.contains(p)).collect()
                    }),
                    SetOpKind::Intersect => inputs.fold(first, |mut acc, next| {
                        for p in next {
                            if !acc.contains(&p) {
                                acc.push(p);
                            }
                        }
                        acc
                    }),
                    SetOpKind::Minus => first,
                }
            }
        }
    }
}

fn join_max_rows(join_type: JoinType, left: Option<f64>, right: Option<f64>) -> Option<f64> {
    match join_type {
        JoinType::Semi | JoinType::Anti => left,
        JoinType::Inner => match (left, right) {
            (Some(l), _) if l == 0.0 => Some(0.0),
            (_, Some(r)) if r == 0.0 => Some(0.0),
            (Some(l), Some(r)) => Some(l * r),
            _ => None,
        },
        JoinType::Left => match left {
            Some(l) if l == 0.0 => Some(0.0),
            Some(l) => right.map(|r| l * r.max(1.0)),
            None => None,
        },
        JoinType::Right => match right {
            Some(r) if r == 0.0 => Some(0.0),
            Some(r) => left.map(|l| l.max(1.0) * r),
            None => None,
        },
        JoinType::Full => {
            let (l, r) = (left?, right?);
            Some(l * r + l + r)
        }
    }
}

fn join_min_rows(join_type: JoinType, left: Option<f64>, right: Option<f64>) -> Option<f64> {
    match join_type {
        JoinType::Inner | JoinType::Semi | JoinType::Anti => Some(0.0),
        JoinType::Left => left,
        JoinType::Right => right,
        JoinType::Full => Some(left?.max(right?)),
    }
}

fn project_unique(
    mq: &dyn RelMetadataQuery,
    rel: &RelNode,
    project: &Project,
    columns: &FieldSet,
) -> Option<bool> {
    let mut input_columns = FieldSet::builder();
    let mut all_refs = true;
    for column in columns.iter() {
        match project.exprs[column].as_input_ref() {
            Some(source) => {
                input_columns.set(source);
            }
            None => all_refs = false,
        }
    }
    let input_columns = input_columns.build();
    if input_columns.is_empty() {
        return None;
    }
    match mq.are_columns_unique(rel.input(0), &input_columns)? {
        true => Some(true),
        // computed columns may still make the row unique
        false if !all_refs => None,
        false => Some(false),
    }
}

fn project_predicates(mq: &dyn RelMetadataQuery, rel: &RelNode, project: &Project) -> Vec<RexNode> {
    let input_predicates = mq.pulled_up_predicates(rel.input(0));
    let mut predicates = map_predicates(input_predicates, project, rel.input(0).field_count());
    for (i, expr) in project.exprs.iter().enumerate() {
        if expr.is_literal() && !expr.data_type().nullable {
            let constant = RexNode::call(
                Op::Eq,
                vec![RexNode::input_ref(i, expr.data_type()), expr.clone()],
            );
            if !predicates.contains(&constant) {
                predicates.push(constant);
            }
        }
    }
    predicates
}

/// Keeps the predicates whose columns all survive `project`, renumbered to output
/// positions.
fn map_predicates(predicates: Vec<RexNode>, project: &Project, input_width: usize) -> Vec<RexNode> {
    let mapping = project.partial_mapping(input_width);
    predicates
        .into_iter()
        .filter(|p| p.referenced_fields().iter().all(|f| mapping.target_opt(f).is_some()))
        .map(|p| permute_inputs(&p, &mapping))
        .collect()
}
