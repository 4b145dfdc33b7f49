//! End-to-end test: building, inspecting and rewriting a query plan.
//!
//! Builds the plan of
//!
//! ```sql
//! SELECT d.name, COUNT(*) AS c
//! FROM hr.emps e JOIN hr.depts d ON e.deptno = d.deptno
//! WHERE e.sal > 1000 AND e.empno IS NOT NULL
//! GROUP BY d.name
//! ORDER BY c DESC
//! LIMIT 3
//! ```
//!
//! through a catalog-backed builder, checks the derived row types, metadata and
//! renderings, and runs the heuristic driver with a rule defined here.

use relopt_core::builder::{GroupKey, RelBuilder};
use relopt_core::error::Result;
use relopt_core::fieldset::FieldSet;
use relopt_core::metadata::{DefaultRelMetadata, RelMetadataQuery};
use relopt_core::pattern::Operand;
use relopt_core::planner::{HepPlanner, PlannerConfig};
use relopt_core::properties::FieldCollation;
use relopt_core::rel::{AggFunc, AggregateCall, Filter, JoinType, RelKind, RelRef};
use relopt_core::rex::{LiteralValue, Op, RexNode};
use relopt_core::rule::{Rule, RuleCall, RuleRegistry};
use relopt_core::testing::hr_catalog;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn build_query() -> Result<RelRef> {
    let mut b = RelBuilder::with_catalog(Arc::new(hr_catalog()));
    b.scan(&["hr", "emps"])?;
    let sal = b.call(Op::Gt, vec![b.field(5)?, b.literal(LiteralValue::Int(1000))]);
    let empno = b.call(Op::IsNotNull, vec![b.field(0)?]);
    b.filter([sal, empno])?;

    b.scan(&["hr", "depts"])?;
    let on = b.equals(b.field_of(2, 0, 7)?, b.field_of(2, 1, 0)?);
    b.join(JoinType::Inner, on)?;

    let count = AggregateCall::create(
        AggFunc::Count,
        false,
        vec![],
        None,
        Some("c".into()),
        b.peek()?.row_type(),
        1,
    );
    b.aggregate(GroupKey::of([10]), vec![count])?
        .sort_limit(None, Some(3), vec![FieldCollation::desc(1)])?;
    b.build()
}

/// Removes `IS NOT NULL` conjuncts on columns that cannot be null.
struct RedundantNotNullRule;

fn is_redundant(conjunct: &RexNode) -> bool {
    match conjunct {
        RexNode::Call {
            op: Op::IsNotNull,
            operands,
            ..
        } => matches!(&operands[..], [RexNode::InputRef { data_type, .. }] if !data_type.nullable),
        _ => false,
    }
}

impl Rule for RedundantNotNullRule {
    fn name(&self) -> &str {
        "RedundantNotNull"
    }

    fn operand(&self) -> Operand {
        Operand::with::<Filter>(|f| f.condition.conjunctions().iter().any(is_redundant))
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let rel = call.rel(0).clone();
        let Some(filter) = rel.payload::<Filter>() else {
            return Ok(());
        };
        let kept: Vec<RexNode> = filter
            .condition
            .conjunctions()
            .into_iter()
            .filter(|c| !is_redundant(c))
            .collect();
        let mut b = call.builder();
        b.push(rel.input(0).clone()).filter(kept)?;
        let result = b.build()?;
        call.transform_to(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_query_shape() {
    let plan = build_query().unwrap();
    assert_eq!(plan.kind(), RelKind::Sort);
    assert_eq!(plan.row_type().field_names(), vec!["name".to_string(), "c".to_string()]);

    let explain = plan.explain();
    let lines: Vec<&str> = explain.lines().collect();
    assert_eq!(lines.len(), 6);
    assert!(lines[0].starts_with("Sort("));
    assert!(lines[1].starts_with("  Aggregate("));
    assert!(lines[2].starts_with("    Join("));
    assert!(lines[3].starts_with("      Filter("));
    assert!(lines[4].starts_with("        Scan(table=[hr, emps])"));
    assert!(lines[5].starts_with("      Scan(table=[hr, depts])"));

    let json = plan.to_json();
    assert_eq!(json["rel"], "Sort");
    assert_eq!(json["inputs"][0]["inputs"][0]["rel"], "Join");
}

#[test]
fn test_query_metadata() {
    let plan = build_query().unwrap();
    let md = DefaultRelMetadata::new();
    assert_eq!(md.max_row_count(&plan), Some(3.0));
    assert_eq!(md.min_row_count(&plan), Some(0.0));
    assert!(!md.is_empty(&plan));

    // the group key of a simple aggregate is unique
    let aggregate = plan.input(0);
    assert_eq!(md.are_columns_unique(aggregate, &FieldSet::of([0])), Some(true));

    // the filter contributes its conjuncts
    let filter = aggregate.input(0).input(0);
    assert_eq!(md.pulled_up_predicates(filter).len(), 2);
}

#[test]
fn test_driver_rewrites_inner_filter() {
    let plan = build_query().unwrap();
    let mut registry = RuleRegistry::new();
    registry.add_rule(Box::new(RedundantNotNullRule));
    let mut planner = HepPlanner::new(Arc::new(registry), PlannerConfig::default());

    let result = planner.optimize(plan.clone()).unwrap();
    assert_eq!(planner.iterations(), 1);
    assert_eq!(result.row_type(), plan.row_type());

    let filter = result.input(0).input(0).input(0);
    let condition = &filter.payload::<Filter>().unwrap().condition;
    assert_eq!(condition.conjunctions().len(), 1);
    assert_eq!(condition.referenced_fields(), FieldSet::of([5]));

    // already at a fixpoint
    let mut planner = HepPlanner::new(planner.rule_registry.clone(), PlannerConfig::default());
    let again = planner.optimize(result.clone()).unwrap();
    assert_eq!(planner.iterations(), 0);
    assert_eq!(again.digest(), result.digest());
}
