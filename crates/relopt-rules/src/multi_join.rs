//! # Multi-Join Rules
//!
//! Join ordering in two phases. [`JoinToMultiJoinRule`] flattens a tree of inner
//! joins into a single `MultiJoin` over all of its factors, and
//! [`MultiJoinOptimizeBushyRule`] rebuilds a tree of binary joins from it, choosing
//! the order greedily.
//!
//! ```text
//! Join(Join(A, B, a = b), C, b = c)  ->  MultiJoin([A, B, C], a = b AND b = c)
//! ```
//!
//! Only inner joins with deterministic conditions are flattened. An outer join, or
//! a join whose condition must be evaluated exactly where it is, stays a factor of
//! the enclosing multi-join.
//!
//! The two rules undo each other's shape, so they live in separate rule sets and
//! are meant to run as separate planner phases.
//!
//! ## Bushy ordering
//!
//! Every factor starts as a vertex weighted by its row count. Each conjunct of the
//! condition is an edge between the vertices holding the factors it reads. The
//! rule repeatedly picks the edge between exactly two vertices whose weights are
//! closest, joins those vertices (the lighter one on the left) under every
//! conjunct they now cover, and weighs the result by the product of the two
//! weights and a guessed selectivity. When no edge joins exactly two vertices, the
//! last two vertices are joined under whatever conjuncts they cover, possibly
//! none. A projection on top restores the field order of the multi-join.

use relopt_core::error::Result;
use relopt_core::fieldset::FieldSet;
use relopt_core::mapping::Mapping;
use relopt_core::metadata::RelMetadataQuery;
use relopt_core::pattern::Operand;
use relopt_core::rel::{Join, JoinType, MultiJoin, RelKind, RelNode, RelOp, RelRef};
use relopt_core::rex::{Op, RexNode};
use relopt_core::rule::{Rule, RuleCall};
use relopt_core::shuttle::{permute_inputs, shift};
use tracing::{debug, trace};

/// Row count assumed for a factor whose size is unknown.
pub const DEFAULT_ROW_COUNT: f64 = 100.0;

// ---------------------------------------------------------------------------
// Flattening
// ---------------------------------------------------------------------------

/// Flattens a tree of inner joins into a `MultiJoin`.
pub struct JoinToMultiJoinRule;

fn is_flattenable(join: &Join) -> bool {
    join.join_type == JoinType::Inner && join.condition.is_deterministic()
}

/// Appends the factors of `rel` and its conjuncts, the latter against the
/// concatenated fields of all factors, where `rel` starts at `offset`.
fn flatten(rel: &RelRef, offset: usize, factors: &mut Vec<RelRef>, conjuncts: &mut Vec<RexNode>) {
    match rel.op() {
        RelOp::Join(join) if is_flattenable(join) => {
            let left_width = rel.input(0).field_count();
            flatten(rel.input(0), offset, factors, conjuncts);
            flatten(rel.input(1), offset + left_width, factors, conjuncts);
            conjuncts.extend(shift(&join.condition, offset as isize).conjunctions());
        }
        RelOp::MultiJoin(multi_join) => {
            factors.extend(rel.inputs().iter().cloned());
            conjuncts.extend(shift(&multi_join.condition, offset as isize).conjunctions());
        }
        _ => factors.push(rel.clone()),
    }
}

impl Rule for JoinToMultiJoinRule {
    fn name(&self) -> &str {
        "JoinToMultiJoin"
    }

    fn operand(&self) -> Operand {
        Operand::with::<Join>(is_flattenable)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let rel = call.rel(0).clone();
        let mut factors = Vec::new();
        let mut conjuncts = Vec::new();
        flatten(&rel, 0, &mut factors, &mut conjuncts);
        trace!("{}: {} factor(s)", call.rule_name(), factors.len());
        let multi_join = RelNode::multi_join(factors, RexNode::and(conjuncts))?;
        call.transform_to(multi_join)
    }
}

// ---------------------------------------------------------------------------
// Bushy ordering
// ---------------------------------------------------------------------------

/// Rebuilds a `MultiJoin` as a bushy tree of inner joins.
pub struct MultiJoinOptimizeBushyRule;

/// Guessed fraction of rows that pass `conjuncts`.
fn guess_selectivity(conjuncts: &[RexNode]) -> f64 {
    conjuncts
        .iter()
        .map(|conjunct| match conjunct {
            RexNode::Call { op: Op::Eq, .. } => 0.15,
            RexNode::Call {
                op: Op::NotEq | Op::Lt | Op::LtEq | Op::Gt | Op::GtEq,
                ..
            } => 0.5,
            RexNode::Call { op: Op::IsNotNull, .. } => 0.9,
            _ => 0.25,
        })
        .product()
}

enum Shape {
    Leaf(usize),
    Join {
        left: usize,
        right: usize,
        conjuncts: Vec<RexNode>,
    },
}

struct Vertex {
    /// Factors below this vertex.
    factors: FieldSet,
    weight: f64,
    shape: Shape,
}

struct Edge {
    conjunct: RexNode,
    /// Factors the conjunct reads.
    factors: FieldSet,
}

/// Greedy join ordering over the vertices and edges of one multi-join.
struct Graph {
    vertices: Vec<Vertex>,
    /// Vertices not yet joined into another.
    live: Vec<usize>,
    edges: Vec<Edge>,
}

impl Graph {
    fn new(inputs: &[RelRef], condition: &RexNode, md: &dyn RelMetadataQuery) -> Self {
        let offsets = MultiJoin::offsets(inputs);
        let vertices = inputs
            .iter()
            .enumerate()
            .map(|(i, input)| Vertex {
                factors: FieldSet::of([i]),
                weight: md.max_row_count(input).unwrap_or(DEFAULT_ROW_COUNT),
                shape: Shape::Leaf(i),
            })
            .collect();
        let edges = condition
            .conjunctions()
            .into_iter()
            .map(|conjunct| {
                let fields = conjunct.referenced_fields();
                let factors = (0..inputs.len())
                    .filter(|&i| fields.intersects(&FieldSet::range(offsets[i], offsets[i + 1])))
                    .collect();
                Edge { conjunct, factors }
            })
            .collect();
        Graph {
            vertices,
            live: (0..inputs.len()).collect(),
            edges,
        }
    }

    /// Live vertices holding the factors of `edge`.
    fn endpoints(&self, edge: &Edge) -> Vec<usize> {
        self.live
            .iter()
            .copied()
            .filter(|&v| self.vertices[v].factors.intersects(&edge.factors))
            .collect()
    }

    /// The pair of live vertices to join next, lighter one first.
    fn next_pair(&self) -> Option<(usize, usize)> {
        let closest = self
            .edges
            .iter()
            .filter_map(|edge| match self.endpoints(edge)[..] {
                [a, b] => Some((a, b)),
                _ => None,
            })
            .min_by(|x, y| self.weight_gap(*x).total_cmp(&self.weight_gap(*y)));
        let (a, b) = match closest {
            Some(pair) => pair,
            None => match self.live[..] {
                [.., a, b] => (a, b),
                _ => return None,
            },
        };
        if self.vertices[b].weight < self.vertices[a].weight {
            Some((b, a))
        } else {
            Some((a, b))
        }
    }

    fn weight_gap(&self, (a, b): (usize, usize)) -> f64 {
        (self.vertices[a].weight - self.vertices[b].weight).abs()
    }

    /// Joins `left` and `right` into a new vertex under every conjunct it covers.
    fn merge(&mut self, left: usize, right: usize) {
        let factors = self.vertices[left].factors.union(&self.vertices[right].factors);
        let (covered, rest): (Vec<Edge>, Vec<Edge>) = std::mem::take(&mut self.edges)
            .into_iter()
            .partition(|edge| factors.contains_all(&edge.factors));
        self.edges = rest;
        let conjuncts: Vec<RexNode> = covered.into_iter().map(|edge| edge.conjunct).collect();
        let weight = self.vertices[left].weight * self.vertices[right].weight * guess_selectivity(&conjuncts);
        let id = self.vertices.len();
        self.vertices.push(Vertex {
            factors,
            weight,
            shape: Shape::Join {
                left,
                right,
                conjuncts,
            },
        });
        self.live.retain(|&v| v != left && v != right);
        self.live.push(id);
    }
}

impl Rule for MultiJoinOptimizeBushyRule {
    fn name(&self) -> &str {
        "MultiJoinOptimizeBushy"
    }

    fn operand(&self) -> Operand {
        Operand::of(RelKind::MultiJoin)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let rel = call.rel(0).clone();
        let Some(multi_join) = rel.payload::<MultiJoin>() else {
            return Ok(());
        };
        let inputs = rel.inputs();
        let mut graph = Graph::new(inputs, &multi_join.condition, call.metadata());
        while let Some((left, right)) = graph.next_pair() {
            debug!(
                "{}: join {} with {}",
                call.rule_name(),
                graph.vertices[left].factors,
                graph.vertices[right].factors
            );
            graph.merge(left, right);
        }

        // Every vertex as a plan, with a mapping from the multi-join's fields to
        // the plan's fields.
        let offsets = MultiJoin::offsets(inputs);
        let total = rel.field_count();
        let mut plans: Vec<(RelRef, Mapping)> = Vec::with_capacity(graph.vertices.len());
        for vertex in &graph.vertices {
            let plan = match &vertex.shape {
                Shape::Leaf(factor) => {
                    let input = inputs[*factor].clone();
                    let mapping = Mapping::identity(input.field_count()).offset_source(offsets[*factor], total);
                    (input, mapping)
                }
                Shape::Join {
                    left,
                    right,
                    conjuncts,
                } => {
                    let (left, left_mapping) = &plans[*left];
                    let (right, right_mapping) = &plans[*right];
                    let left_width = left.field_count();
                    let mut mapping = Mapping::partial(total, left_width + right.field_count());
                    for (s, t) in left_mapping.iter() {
                        mapping.set(s, t);
                    }
                    for (s, t) in right_mapping.iter() {
                        mapping.set(s, left_width + t);
                    }
                    let condition = RexNode::and(conjuncts.iter().map(|c| permute_inputs(c, &mapping)));
                    let mut b = call.builder();
                    b.push(left.clone()).push(right.clone()).join(JoinType::Inner, condition)?;
                    (b.build()?, mapping)
                }
            };
            plans.push(plan);
        }
        let Some((joined, mapping)) = plans.pop() else {
            return Ok(());
        };

        let exprs = (0..total)
            .map(|i| RexNode::input_ref(mapping.target_of(i), rel.row_type().field_type(i)))
            .collect();
        let mut b = call.builder();
        b.push(joined).project_named(exprs, rel.row_type().field_names(), false)?;
        let result = b.build()?;
        call.transform_to(result)
    }
}
