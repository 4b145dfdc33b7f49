//! # Heuristic Rule Driver
//!
//! [`HepPlanner`] applies the rules of a [`RuleRegistry`] to a single plan until no
//! rule changes it any more (a fixpoint) or the iteration budget is spent. It is
//! not a cost-based search: every replacement a rule registers is taken
//! immediately, and the plan is rewritten in place.
//!
//! ## How It Works
//!
//! Each pass walks the rules in registry order. For a rule, the distinct nodes of
//! the current plan are visited in the configured [`MatchOrder`] and every match of
//! the rule's operand is offered to [`Rule::matches`] and then [`Rule::on_match`].
//! The first replacement registered for a node is spliced into the plan: the
//! ancestors of the replaced node are rebuilt over the new input, everything else
//! is shared. Matching then restarts from the new root.
//!
//! ## Termination
//!
//! The driver remembers which rule has already been offered which match (by rule
//! fingerprint and node digest). Since equal digests mean equal subtrees, offering
//! the same match twice cannot produce anything new, and this is what stops rule
//! pairs such as commutativity from cycling. Nodes a rule passes to
//! [`RuleCall::prune`] are not matched again by any rule. `max_iterations` bounds
//! the total number of rule invocations as a safety valve.
//!
//! ## Errors
//!
//! A replacement whose row type differs from the node it replaces, or a node that
//! cannot be rebuilt during the splice, aborts the run with a [`PlanError`].

use crate::catalog::Catalog;
use crate::error::{PlanError, Result};
use crate::metadata::{DefaultRelMetadata, RelMetadataQuery};
use crate::pattern::{collect_nodes, match_at};
use crate::rel::{RelNode, RelRef};
use crate::rule::{Rule, RuleCall, RuleRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Order in which nodes are offered to a rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOrder {
    /// Parents before children.
    #[default]
    TopDown,
    /// Children before parents.
    BottomUp,
}

/// Configuration knobs for the driver.
///
/// Every field has a default, so a JSON document only needs the fields it
/// overrides:
///
/// ```json
/// { "max_iterations": 500, "match_order": "bottom_up", "rule_sets": ["calc"] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Upper bound on the number of rule invocations.
    pub max_iterations: usize,
    pub match_order: MatchOrder,
    /// Re-check the row type of the whole plan after every splice.
    pub check_row_types: bool,
    /// Named rule sets activated on top of the registry's base rules.
    pub rule_sets: Vec<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            match_order: MatchOrder::TopDown,
            check_row_types: true,
            rule_sets: Vec::new(),
        }
    }
}

impl PlannerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Fixpoint rule driver over a single plan.
pub struct HepPlanner {
    /// Registry of rules to apply.
    pub rule_registry: Arc<RuleRegistry>,
    /// Metadata handed to every rule call.
    pub metadata: Arc<dyn RelMetadataQuery>,
    /// Catalog handed to the builders of rule calls.
    pub catalog: Option<Arc<dyn Catalog>>,
    pub config: PlannerConfig,
    iterations: usize,
    fired: HashSet<(u64, String, usize)>,
    pruned: HashSet<String>,
    equivalences: Vec<(RelRef, RelRef)>,
}

impl HepPlanner {
    pub fn new(rule_registry: Arc<RuleRegistry>, config: PlannerConfig) -> Self {
        Self {
            rule_registry,
            metadata: Arc::new(DefaultRelMetadata::new()),
            catalog: None,
            config,
            iterations: 0,
            fired: HashSet::new(),
            pruned: HashSet::new(),
            equivalences: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn RelMetadataQuery>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Rule invocations so far.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Pairs of equivalent nodes that rules reported next to their main
    /// replacement.
    pub fn equivalences(&self) -> &[(RelRef, RelRef)] {
        &self.equivalences
    }

    /// Rewrites `root` until no rule applies.
    pub fn optimize(&mut self, root: RelRef) -> Result<RelRef> {
        let registry = self.rule_registry.clone();
        let sets: Vec<&str> = self.config.rule_sets.iter().map(String::as_str).collect();
        let rules = registry.active_rules(&sets);
        debug!(
            "Starting rewrite: rules={}, nodes={}",
            rules.len(),
            collect_nodes(&root).len()
        );

        let mut root = root;
        loop {
            match self.apply_once(&rules, &root)? {
                Some(new_root) => root = new_root,
                None => break,
            }
            if self.iterations >= self.config.max_iterations {
                debug!("Hit iteration limit");
                break;
            }
        }

        debug!("Rewrite complete: iterations={}", self.iterations);
        Ok(root)
    }

    /// Finds the first rule match that produces a replacement and splices it in.
    fn apply_once(&mut self, rules: &[&dyn Rule], root: &RelRef) -> Result<Option<RelRef>> {
        for &rule in rules {
            let operand = rule.operand();
            let mut nodes = collect_nodes(root);
            if self.config.match_order == MatchOrder::BottomUp {
                nodes.reverse();
            }
            for node in &nodes {
                if self.pruned.contains(node.digest()) {
                    continue;
                }
                for (index, rels) in match_at(node, &operand).into_iter().enumerate() {
                    if self.iterations >= self.config.max_iterations {
                        return Ok(None);
                    }
                    let key = (rule.rule_hash(), node.digest().to_string(), index);
                    if !self.fired.insert(key) {
                        continue;
                    }
                    if let Some(replacement) = self.fire(rule, rels)? {
                        if replacement.digest() == node.digest() {
                            continue;
                        }
                        trace!("  Replaced {} with {}", node.name(), replacement.name());
                        let new_root = splice(root, node, &replacement)?;
                        if self.config.check_row_types
                            && !new_root.row_type().same_types(root.row_type())
                        {
                            return Err(PlanError::RowTypeMismatch {
                                rule: rule.name().to_string(),
                                expected: root.row_type().clone(),
                                actual: new_root.row_type().clone(),
                            });
                        }
                        return Ok(Some(new_root));
                    }
                }
            }
        }
        Ok(None)
    }

    fn fire(&mut self, rule: &dyn Rule, rels: Vec<RelRef>) -> Result<Option<RelRef>> {
        let mut call = RuleCall::new(rule.name(), rels, self.metadata.as_ref())
            .with_catalog(self.catalog.clone());
        if !rule.matches(&call) {
            return Ok(None);
        }
        self.iterations += 1;
        trace!("Applying rule '{}' to {}", rule.name(), call.rel(0).name());
        rule.on_match(&mut call)?;

        for rel in call.pruned() {
            self.pruned.insert(rel.digest().to_string());
        }
        self.equivalences.extend(call.equivalences().iter().cloned());
        Ok(call.results().first().cloned())
    }
}

/// Rebuilds `root` with `old` replaced by `new`. Nodes that do not contain `old`
/// are shared; shared subtrees are rebuilt once.
pub fn splice(root: &RelRef, old: &RelRef, new: &RelRef) -> Result<RelRef> {
    fn go(
        rel: &RelRef,
        old: &RelRef,
        new: &RelRef,
        done: &mut HashMap<*const RelNode, RelRef>,
    ) -> Result<RelRef> {
        if Arc::ptr_eq(rel, old) {
            return Ok(new.clone());
        }
        if let Some(rebuilt) = done.get(&Arc::as_ptr(rel)) {
            return Ok(rebuilt.clone());
        }
        let mut changed = false;
        let mut inputs = Vec::with_capacity(rel.inputs().len());
        for input in rel.inputs() {
            let rebuilt = go(input, old, new, done)?;
            changed |= !Arc::ptr_eq(&rebuilt, input);
            inputs.push(rebuilt);
        }
        let rebuilt = if changed { rel.copy(inputs)? } else { rel.clone() };
        done.insert(Arc::as_ptr(rel), rebuilt.clone());
        Ok(rebuilt)
    }
    go(root, old, new, &mut HashMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::pattern::Operand;
    use crate::rel::{Filter, RelKind};
    use crate::rule::RuleSet;
    use crate::testing::{emp_scan, field, gt, lit};

    /// Filter(Filter(x)) -> Filter(AND) through the builder.
    struct MergeFilters;

    impl Rule for MergeFilters {
        fn name(&self) -> &str {
            "MergeFilters"
        }

        fn operand(&self) -> Operand {
            Operand::of(RelKind::Filter).exact(vec![Operand::of(RelKind::Filter)])
        }

        fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
            let top = call.rel(0).payload::<Filter>().unwrap().condition.clone();
            let bottom = call.rel(1).clone();
            let mut b = call.builder();
            let rel = b.push(bottom).filter([top])?.build()?;
            call.transform_to(rel)
        }
    }

    /// Registers a replacement with a different row type.
    struct Narrow;

    impl Rule for Narrow {
        fn name(&self) -> &str {
            "Narrow"
        }

        fn operand(&self) -> Operand {
            Operand::of(RelKind::Filter)
        }

        fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
            let mut b = call.builder();
            let first = b.push(call.rel(0).clone()).field(0)?;
            let rel = b.project(vec![first])?.build()?;
            call.transform_to(rel)
        }
    }

    fn stacked_filters(n: i64) -> RelRef {
        let emp = emp_scan();
        let mut rel = emp.clone();
        for i in 0..n {
            rel = RelNode::filter(rel, gt(field(&emp, 0, 0), lit(i))).unwrap();
        }
        rel
    }

    fn registry(rule: Box<dyn Rule>) -> Arc<RuleRegistry> {
        let mut registry = RuleRegistry::new();
        registry.add_rule(rule);
        Arc::new(registry)
    }

    #[test]
    fn test_rewrites_to_fixpoint() {
        let mut planner = HepPlanner::new(registry(Box::new(MergeFilters)), PlannerConfig::default());
        let result = planner.optimize(stacked_filters(3)).unwrap();
        assert_eq!(result.kind(), RelKind::Filter);
        assert_eq!(result.input(0).kind(), RelKind::Scan);
        assert_eq!(
            result.payload::<Filter>().unwrap().condition.conjunctions().len(),
            3
        );
        assert_eq!(planner.iterations(), 2);
    }

    #[test]
    fn test_iteration_budget() {
        let config = PlannerConfig {
            max_iterations: 1,
            ..PlannerConfig::default()
        };
        let mut planner = HepPlanner::new(registry(Box::new(MergeFilters)), config);
        let result = planner.optimize(stacked_filters(4)).unwrap();
        assert_eq!(planner.iterations(), 1);
        assert_eq!(result.input(0).kind(), RelKind::Filter);
    }

    #[test]
    fn test_row_type_mismatch_propagates() {
        let mut planner = HepPlanner::new(registry(Box::new(Narrow)), PlannerConfig::default());
        let err = planner.optimize(stacked_filters(1)).unwrap_err();
        assert!(matches!(err, PlanError::RowTypeMismatch { ref rule, .. } if rule == "Narrow"));
    }

    #[test]
    fn test_rule_sets_are_opt_in() {
        let mut registry = RuleRegistry::new();
        registry.add_rule_set(RuleSet::new("merge", vec![Box::new(MergeFilters)]));
        let registry = Arc::new(registry);

        let plan = stacked_filters(2);
        let mut planner = HepPlanner::new(registry.clone(), PlannerConfig::default());
        assert_eq!(planner.optimize(plan.clone()).unwrap(), plan);

        let config = PlannerConfig::from_json(r#"{"rule_sets": ["merge"], "match_order": "bottom_up"}"#).unwrap();
        assert_eq!(config.max_iterations, PlannerConfig::default().max_iterations);
        let mut planner = HepPlanner::new(registry, config);
        assert_eq!(planner.optimize(plan).unwrap().input(0).kind(), RelKind::Scan);
    }

    #[test]
    fn test_bad_config_is_error() {
        assert!(matches!(
            PlannerConfig::from_json(r#"{"match_order": "sideways"}"#),
            Err(PlanError::Config(_))
        ));
    }

    #[test]
    fn test_splice_shares_untouched_subtrees() {
        let emp = emp_scan();
        let filter = RelNode::filter(emp.clone(), gt(field(&emp, 0, 0), lit(1))).unwrap();
        let union = RelNode::set_op(crate::rel::SetOpKind::Union, true, vec![filter.clone(), emp.clone()]).unwrap();
        let spliced = splice(&union, &filter, &emp).unwrap();
        assert!(Arc::ptr_eq(spliced.input(0), &emp));
        assert!(Arc::ptr_eq(spliced.input(1), &emp));
        assert!(Arc::ptr_eq(&splice(&union, &emp_scan(), &filter).unwrap(), &union));
    }
}
