//! Properties every rule of the default registry must hold.
//!
//! Each rule (base rules and every rule set) is offered every match in a corpus of
//! plans covering projections, filters, all join types, aggregates with grouping
//! sets, set operations, sorts and empty inputs. The replacements are offered to
//! the rules once more, so rules that only match the output of other rules (calcs,
//! correlates) are exercised too.
//!
//! ## What These Tests Verify
//! - Every replacement has the row type of the node it replaces
//! - No rule fails or panics on a well-formed plan
//! - Merge and removal rules reach a fixpoint after one application
//! - Shifting an expression and shifting it back is the identity
//! - Filters only cross an aggregate on columns common to all grouping sets
//! - Join associativity regroups a three-way join without changing its output
//! - Flattening a join tree and reordering it keeps the output

use relopt_core::builder::{GroupKey, RelBuilder};
use relopt_core::fieldset::FieldSet;
use relopt_core::metadata::DefaultRelMetadata;
use relopt_core::pattern::find_matches;
use relopt_core::properties::FieldCollation;
use relopt_core::rel::{
    AggFunc, Aggregate, AggregateCall, Filter, Join, JoinType, RelKind, RelNode, RelRef, SetOpKind,
};
use relopt_core::rex::{Op, RexNode};
use relopt_core::rule::{Rule, RuleCall};
use relopt_core::shuttle::shift;
use relopt_core::testing::{dept_scan, emp_scan, empty_like, eq, field, gt, int_scan, lit, EMP_WIDTH};
use relopt_rules::filter::{FilterAggregateTransposeRule, FilterMergeRule};
use relopt_rules::join_associativity::JoinAssociateRule;
use relopt_rules::project::{ProjectMergeRule, ProjectRemoveRule};
use relopt_rules::{
    default_rule_registry, AGGREGATE_PUSHDOWN, BUSHY_JOIN, CALC, JOIN_LOWERING, JOIN_REORDER, MULTI_JOIN, TRIM,
};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const ALL_SETS: [&str; 7] = [
    JOIN_REORDER,
    JOIN_LOWERING,
    CALC,
    TRIM,
    AGGREGATE_PUSHDOWN,
    MULTI_JOIN,
    BUSHY_JOIN,
];

/// Offers every match of `rule` in `root` to the rule and returns the
/// replacements together with the node each one replaces.
fn fire(rule: &dyn Rule, root: &RelRef) -> Vec<(RelRef, RelRef)> {
    let md = DefaultRelMetadata::new();
    let mut out = Vec::new();
    for rels in find_matches(root, &rule.operand()) {
        let mut call = RuleCall::new(rule.name(), rels, &md);
        if !rule.matches(&call) {
            continue;
        }
        if let Err(e) = rule.on_match(&mut call) {
            panic!("{} failed on {}: {e}", rule.name(), call.rel(0).digest());
        }
        for result in call.results() {
            out.push((call.rel(0).clone(), result.clone()));
        }
    }
    out
}

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn corpus() -> Vec<RelRef> {
    let emp = emp_scan();
    let dept = dept_scan();
    let mut plans = Vec::new();

    // projections and filters
    let project = RelNode::project(
        emp.clone(),
        vec![
            field(&emp, 7, 0),
            field(&emp, 5, 0),
            RexNode::call(Op::Add, vec![field(&emp, 5, 0), field(&emp, 6, 0)]),
        ],
        names(&["deptno", "sal", "total"]),
    )
    .unwrap();
    plans.push(RelNode::filter(project.clone(), gt(field(&project, 2, 0), lit(1000))).unwrap());
    plans.push(
        RelNode::project(
            project.clone(),
            vec![field(&project, 2, 0), field(&project, 0, 0)],
            names(&["total", "deptno"]),
        )
        .unwrap(),
    );
    plans.push(RelNode::project(emp.clone(), RexNode::input_refs(emp.row_type(), 0), emp.row_type().field_names()).unwrap());
    let low = RelNode::filter(emp.clone(), gt(field(&emp, 5, 0), lit(0))).unwrap();
    plans.push(RelNode::filter(low.clone(), eq(field(&low, 7, 0), lit(10))).unwrap());

    // every join type, with a filter above
    for join_type in [
        JoinType::Inner,
        JoinType::Left,
        JoinType::Right,
        JoinType::Full,
        JoinType::Semi,
        JoinType::Anti,
    ] {
        let cond = RexNode::and([
            eq(field(&emp, 7, 0), field(&dept, 0, EMP_WIDTH)),
            gt(field(&emp, 5, 0), lit(100)),
        ]);
        let join = RelNode::join(emp.clone(), dept.clone(), join_type, cond).unwrap();
        let mut above = vec![gt(field(&join, 6, 0), lit(5))];
        if join_type.projects_right() {
            above.push(RexNode::call(Op::IsNotNull, vec![field(&join, EMP_WIDTH + 1, 0)]));
        }
        plans.push(RelNode::filter(join.clone(), RexNode::and(above)).unwrap());
        plans.push(join);
    }

    // join over projections
    let dept_project = RelNode::project(
        dept.clone(),
        vec![field(&dept, 1, 0), field(&dept, 0, 0)],
        names(&["name", "deptno"]),
    )
    .unwrap();
    plans.push(
        RelNode::join(
            project.clone(),
            dept_project.clone(),
            JoinType::Inner,
            eq(field(&project, 0, 0), field(&dept_project, 1, 3)),
        )
        .unwrap(),
    );

    // three-way join
    let (a, b, c) = (int_scan("a", 2), int_scan("b", 2), int_scan("c", 2));
    plans.push(three_way_join(&a, &b, &c));

    // aggregates
    let avg = AggregateCall::create(AggFunc::Avg, false, vec![2], None, Some("avg_total".into()), project.row_type(), 1);
    let count = AggregateCall::create(AggFunc::Count, true, vec![1], None, Some("n".into()), project.row_type(), 1);
    let agg = RelNode::aggregate(project.clone(), Aggregate::simple(FieldSet::of([0]), vec![avg, count])).unwrap();
    plans.push(RelNode::filter(agg.clone(), eq(field(&agg, 0, 0), lit(10))).unwrap());
    plans.push(rollup_filter());
    let distinct = RelNode::aggregate(emp.clone(), Aggregate::simple(FieldSet::of([0, 7]), vec![])).unwrap();
    plans.push(distinct);

    // aggregate over an equi-join
    let join = RelNode::join(emp.clone(), dept.clone(), JoinType::Inner, eq(field(&emp, 7, 0), field(&dept, 0, EMP_WIDTH))).unwrap();
    let calls = [(AggFunc::Count, vec![]), (AggFunc::Sum, vec![5]), (AggFunc::Min, vec![5])]
        .into_iter()
        .map(|(func, args)| AggregateCall::create(func, false, args, None, None, join.row_type(), 1))
        .collect();
    plans.push(RelNode::aggregate(join, Aggregate::simple(FieldSet::of([EMP_WIDTH + 1]), calls)).unwrap());

    // set operations
    let (x, y, z) = (int_scan("x", 2), int_scan("y", 2), int_scan("z", 2));
    let inner_union = RelNode::set_op(SetOpKind::Union, true, vec![x.clone(), y.clone()]).unwrap();
    let outer_union = RelNode::set_op(SetOpKind::Union, false, vec![inner_union, z.clone()]).unwrap();
    plans.push(RelNode::filter(outer_union.clone(), gt(field(&outer_union, 0, 0), lit(1))).unwrap());
    plans.push(RelNode::set_op(SetOpKind::Union, true, vec![x.clone(), empty_like(&y)]).unwrap());
    plans.push(RelNode::set_op(SetOpKind::Minus, false, vec![x.clone(), empty_like(&y), z]).unwrap());

    // sorts
    let mut builder = RelBuilder::new();
    let sorted = builder
        .push(project.clone())
        .sort_limit(None, Some(10), vec![FieldCollation::desc(1)])
        .unwrap()
        .build()
        .unwrap();
    plans.push(sorted);

    // empty inputs
    let empty_dept = empty_like(&dept);
    plans.push(RelNode::join(emp.clone(), empty_dept.clone(), JoinType::Inner, eq(field(&emp, 7, 0), field(&dept, 0, EMP_WIDTH))).unwrap());
    plans.push(RelNode::join(emp.clone(), empty_dept, JoinType::Anti, eq(field(&emp, 7, 0), field(&dept, 0, EMP_WIDTH))).unwrap());
    plans.push(RelNode::filter(emp, RexNode::false_literal()).unwrap());

    plans
}

fn three_way_join(a: &RelRef, b: &RelRef, c: &RelRef) -> RelRef {
    let ab = RelNode::join(a.clone(), b.clone(), JoinType::Inner, eq(field(a, 0, 0), field(b, 0, 2))).unwrap();
    RelNode::join(ab, c.clone(), JoinType::Inner, eq(field(b, 1, 2), field(c, 0, 4))).unwrap()
}

/// `Filter(sal > 1000 AND deptno = 10, Aggregate(GROUPING SETS ((sal, deptno), (deptno))))`.
fn rollup_filter() -> RelRef {
    let emp = emp_scan();
    let count = AggregateCall::create(AggFunc::Count, false, vec![], None, Some("c".into()), emp.row_type(), 2);
    let mut builder = RelBuilder::new();
    let agg = builder
        .push(emp)
        .aggregate(
            GroupKey::with_sets(FieldSet::of([5, 7]), vec![FieldSet::of([5, 7]), FieldSet::of([7])]),
            vec![count],
        )
        .unwrap()
        .build()
        .unwrap();
    let cond = RexNode::and([gt(field(&agg, 0, 0), lit(1000)), eq(field(&agg, 1, 0), lit(10))]);
    RelNode::filter(agg, cond).unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_every_rule_preserves_row_type() {
    let registry = default_rule_registry();
    let rules = registry.active_rules(&ALL_SETS);
    let mut generation = corpus();
    let mut fired = 0;
    for _ in 0..2 {
        let mut next = Vec::new();
        for plan in &generation {
            for &rule in &rules {
                for (old, new) in fire(rule, plan) {
                    assert!(
                        new.row_type().same_types(old.row_type()),
                        "{} changed the row type of {}: {:?} -> {:?}",
                        rule.name(),
                        old.digest(),
                        old.row_type(),
                        new.row_type()
                    );
                    next.push(new);
                    fired += 1;
                }
            }
        }
        generation = next;
    }
    assert!(fired > 20, "only {fired} rule applications");
}

#[test]
fn test_merge_and_remove_reach_fixpoint() {
    let emp = emp_scan();

    let bottom = RelNode::project(emp.clone(), vec![field(&emp, 5, 0), field(&emp, 7, 0)], names(&["sal", "deptno"])).unwrap();
    let top = RelNode::project(bottom.clone(), vec![field(&bottom, 1, 0)], names(&["deptno"])).unwrap();
    let merged = fire(&ProjectMergeRule, &top);
    assert_eq!(merged.len(), 1);
    assert!(fire(&ProjectMergeRule, &merged[0].1).is_empty());

    let low = RelNode::filter(emp.clone(), gt(field(&emp, 5, 0), lit(0))).unwrap();
    let high = RelNode::filter(low, gt(field(&emp, 6, 0), lit(0))).unwrap();
    let merged = fire(&FilterMergeRule, &high);
    assert_eq!(merged.len(), 1);
    assert!(fire(&FilterMergeRule, &merged[0].1).is_empty());

    let identity = RelNode::project(emp.clone(), RexNode::input_refs(emp.row_type(), 0), emp.row_type().field_names()).unwrap();
    let removed = fire(&ProjectRemoveRule, &identity);
    assert_eq!(removed.len(), 1);
    assert!(Arc::ptr_eq(&removed[0].1, &emp));
    assert!(fire(&ProjectRemoveRule, &removed[0].1).is_empty());
}

#[test]
fn test_shift_round_trip() {
    for plan in corpus() {
        for expr in plan.op().expressions() {
            for offset in [1isize, 4, EMP_WIDTH as isize] {
                assert_eq!(shift(&shift(expr, offset), -offset), *expr);
            }
        }
    }
}

#[test]
fn test_filter_only_crosses_common_group_keys() {
    let plan = rollup_filter();
    let result = fire(&FilterAggregateTransposeRule, &plan);
    assert_eq!(result.len(), 1);
    let top = &result[0].1;

    // sal is rolled up in the second grouping set, so its conjunct stays above
    let above = top.payload::<Filter>().unwrap();
    assert_eq!(above.condition.referenced_fields(), FieldSet::of([0]));

    let agg = top.input(0);
    assert_eq!(agg.kind(), RelKind::Aggregate);
    let below = agg.input(0).payload::<Filter>().unwrap();
    assert_eq!(below.condition.referenced_fields(), FieldSet::of([7]));
}

#[test]
fn test_associate_three_way_join() {
    let (a, b, c) = (int_scan("a", 2), int_scan("b", 2), int_scan("c", 2));
    let plan = three_way_join(&a, &b, &c);
    let result = fire(&JoinAssociateRule::default(), &plan);
    assert_eq!(result.len(), 1);
    let rel = &result[0].1;
    assert_eq!(rel.row_type(), plan.row_type());
    assert_eq!(rel.kind(), RelKind::Join);
    assert!(Arc::ptr_eq(rel.input(0), &a));

    let bottom = rel.input(1);
    assert_eq!(bottom.payload::<Join>().unwrap().join_type, JoinType::Inner);
    assert_eq!(bottom.input(0).digest(), b.digest());
    assert_eq!(bottom.input(1).digest(), c.digest());
    // b.b1 = c.c0 now reads fields of the bottom join only
    assert_eq!(bottom.payload::<Join>().unwrap().condition.referenced_fields(), FieldSet::of([1, 2]));
}

#[test]
fn test_flatten_then_reorder_three_way_join() {
    let registry = default_rule_registry();
    let (a, b, c) = (int_scan("a", 2), int_scan("b", 2), int_scan("c", 2));
    let plan = three_way_join(&a, &b, &c);

    let flatten = registry.rule("JoinToMultiJoin").unwrap();
    let flattened = fire(flatten, &plan);
    let multi = &flattened[0].1;
    assert_eq!(multi.kind(), RelKind::MultiJoin);
    assert_eq!(multi.inputs().len(), 3);

    let bushy = registry.rule("MultiJoinOptimizeBushy").unwrap();
    let reordered = fire(bushy, multi);
    assert_eq!(reordered.len(), 1);
    let rel = &reordered[0].1;
    assert_eq!(rel.row_type(), multi.row_type());
    assert!(rel.row_type().same_types(plan.row_type()));
    assert!(!rel.explain().contains("MultiJoin"));
}
