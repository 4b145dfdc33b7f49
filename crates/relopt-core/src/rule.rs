//! # Rule System
//!
//! This module defines the rule trait, the call through which a rule reads its match
//! and registers replacements, and the registry the driver draws rules from.
//!
//! ## Rules
//!
//! A rule is a stateless value with a root [`Operand`] and an `on_match` transform.
//! The driver matches the operand against the plan and, for every match, builds a
//! [`RuleCall`] holding the matched nodes in operand pre-order. The rule may
//! register any number of replacements for `call.rel(0)` through
//! [`RuleCall::transform_to`]; registering nothing means the rule did not apply.
//!
//! A rule that cannot establish its preconditions returns `Ok(())`. Errors are
//! reserved for invariant violations (a replacement with a different row type, a
//! malformed node) and always reach the caller of the driver.
//!
//! ## Guards
//!
//! [`Rule::matches`] is consulted before `on_match` and lets a rule reject a match
//! cheaply. [`RuleCall::prune`] tells the driver that a node is dominated by its
//! replacement and should not be matched again.
//!
//! ## Rule Registry
//!
//! The [`RuleRegistry`] holds an ordered list of base rules plus named
//! [`RuleSet`]s that a caller can activate by name (e.g. a set of calc rules used
//! only when a plan is about to be lowered).

use crate::builder::RelBuilder;
use crate::catalog::Catalog;
use crate::error::{PlanError, Result};
use crate::metadata::RelMetadataQuery;
use crate::pattern::Operand;
use crate::rel::RelRef;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A pattern-matched rewrite.
pub trait Rule: Send + Sync {
    /// Unique name of this rule.
    fn name(&self) -> &str;

    /// Root operand of the pattern this rule matches.
    fn operand(&self) -> Operand;

    /// Additional guard evaluated on a structural match before `on_match`.
    fn matches(&self, _call: &RuleCall<'_>) -> bool {
        true
    }

    /// Registers zero or more replacements for `call.rel(0)`.
    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()>;

    /// Hash for fingerprinting (to avoid re-applying rules).
    fn rule_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.name().hash(&mut hasher);
        hasher.finish()
    }
}

/// One match of a rule, and the replacements the rule registers for it.
pub struct RuleCall<'a> {
    rule: &'a str,
    rels: Vec<RelRef>,
    metadata: &'a dyn RelMetadataQuery,
    catalog: Option<Arc<dyn Catalog>>,
    results: Vec<RelRef>,
    equivalences: Vec<(RelRef, RelRef)>,
    pruned: Vec<RelRef>,
}

impl<'a> RuleCall<'a> {
    pub fn new(rule: &'a str, rels: Vec<RelRef>, metadata: &'a dyn RelMetadataQuery) -> Self {
        Self {
            rule,
            rels,
            metadata,
            catalog: None,
            results: Vec::new(),
            equivalences: Vec::new(),
            pruned: Vec::new(),
        }
    }

    pub fn with_catalog(mut self, catalog: Option<Arc<dyn Catalog>>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn rule_name(&self) -> &str {
        self.rule
    }

    /// The node matched by the `i`-th operand in pre-order.
    ///
    /// # Panics
    /// If the pattern has fewer than `i + 1` operands.
    pub fn rel(&self, i: usize) -> &RelRef {
        assert!(
            i < self.rels.len(),
            "rule '{}' matched {} node(s), rel({i}) requested",
            self.rule,
            self.rels.len()
        );
        &self.rels[i]
    }

    pub fn rels(&self) -> &[RelRef] {
        &self.rels
    }

    /// A fresh builder for constructing replacements.
    pub fn builder(&self) -> RelBuilder {
        match &self.catalog {
            Some(catalog) => RelBuilder::with_catalog(catalog.clone()),
            None => RelBuilder::new(),
        }
    }

    pub fn metadata(&self) -> &dyn RelMetadataQuery {
        self.metadata
    }

    /// Registers `rel` as equivalent to `rel(0)`.
    ///
    /// The replacement must have the same field types as `rel(0)`; field names may
    /// differ.
    pub fn transform_to(&mut self, rel: RelRef) -> Result<()> {
        self.transform_to_with(rel, Vec::new())
    }

    /// Registers `rel` as equivalent to `rel(0)`, together with further pairs of
    /// equivalent nodes discovered on the way.
    pub fn transform_to_with(&mut self, rel: RelRef, equivalences: Vec<(RelRef, RelRef)>) -> Result<()> {
        check_row_type(self.rule, self.rel(0), &rel)?;
        for (original, replacement) in &equivalences {
            check_row_type(self.rule, original, replacement)?;
        }
        self.results.push(rel);
        self.equivalences.extend(equivalences);
        Ok(())
    }

    /// Marks `rel` as not worth matching again.
    pub fn prune(&mut self, rel: &RelRef) {
        self.pruned.push(rel.clone());
    }

    pub fn results(&self) -> &[RelRef] {
        &self.results
    }

    pub fn equivalences(&self) -> &[(RelRef, RelRef)] {
        &self.equivalences
    }

    pub fn pruned(&self) -> &[RelRef] {
        &self.pruned
    }
}

fn check_row_type(rule: &str, original: &RelRef, replacement: &RelRef) -> Result<()> {
    if original.row_type().same_types(replacement.row_type()) {
        return Ok(());
    }
    Err(PlanError::RowTypeMismatch {
        rule: rule.to_string(),
        expected: original.row_type().clone(),
        actual: replacement.row_type().clone(),
    })
}

/// A named set of rules.
pub struct RuleSet {
    pub name: String,
    pub rules: Vec<Box<dyn Rule>>,
}

impl RuleSet {
    pub fn new(name: impl Into<String>, rules: Vec<Box<dyn Rule>>) -> Self {
        Self {
            name: name.into(),
            rules,
        }
    }
}

/// Registry of rewrite rules.
pub struct RuleRegistry {
    pub base_rules: Vec<Box<dyn Rule>>,
    pub rule_sets: HashMap<String, RuleSet>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self {
            base_rules: Vec::new(),
            rule_sets: HashMap::new(),
        }
    }

    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.base_rules.push(rule);
    }

    pub fn add_rule_set(&mut self, rule_set: RuleSet) {
        self.rule_sets.insert(rule_set.name.clone(), rule_set);
    }

    /// Base rules followed by the rules of each named set, in the order given.
    /// Unknown set names are ignored.
    pub fn active_rules(&self, sets: &[&str]) -> Vec<&dyn Rule> {
        let mut rules: Vec<&dyn Rule> = self.base_rules.iter().map(|r| r.as_ref()).collect();
        for name in sets {
            if let Some(rs) = self.rule_sets.get(*name) {
                rules.extend(rs.rules.iter().map(|r| r.as_ref()));
            }
        }
        rules
    }

    /// Looks a rule up by name among the base rules and every set.
    pub fn rule(&self, name: &str) -> Option<&dyn Rule> {
        self.base_rules
            .iter()
            .chain(self.rule_sets.values().flat_map(|rs| rs.rules.iter()))
            .find(|r| r.name() == name)
            .map(|r| r.as_ref())
    }

    pub fn len(&self) -> usize {
        self.base_rules.len() + self.rule_sets.values().map(|rs| rs.rules.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DefaultRelMetadata;
    use crate::rel::{RelKind, RelNode};
    use crate::testing::{emp_scan, field};

    struct NoopRule;

    impl Rule for NoopRule {
        fn name(&self) -> &str {
            "Noop"
        }

        fn operand(&self) -> Operand {
            Operand::of(RelKind::Scan)
        }

        fn on_match(&self, _call: &mut RuleCall<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_transform_to_checks_types_not_names() {
        let emp = emp_scan();
        let md = DefaultRelMetadata::new();
        let mut call = RuleCall::new("Test", vec![emp.clone()], &md);

        let names = (0..emp.field_count()).map(|i| format!("c{i}")).collect();
        let renamed = RelNode::project(emp.clone(), crate::rex::RexNode::input_refs(emp.row_type(), 0), names).unwrap();
        call.transform_to(renamed).unwrap();

        let narrowed = RelNode::project(emp.clone(), vec![field(&emp, 0, 0)], vec!["empno".into()]).unwrap();
        let err = call.transform_to(narrowed).unwrap_err();
        assert!(matches!(err, PlanError::RowTypeMismatch { ref rule, .. } if rule == "Test"));
        assert_eq!(call.results().len(), 1);
    }

    #[test]
    #[should_panic(expected = "rel(1) requested")]
    fn test_rel_out_of_range_panics() {
        let md = DefaultRelMetadata::new();
        let call = RuleCall::new("Test", vec![emp_scan()], &md);
        call.rel(1);
    }

    #[test]
    fn test_registry_sets() {
        let mut registry = RuleRegistry::new();
        registry.add_rule(Box::new(NoopRule));
        registry.add_rule_set(RuleSet::new("extra", vec![Box::new(NoopRule)]));
        assert_eq!(registry.active_rules(&[]).len(), 1);
        assert_eq!(registry.active_rules(&["extra", "missing"]).len(), 2);
        assert_eq!(registry.len(), 2);
        assert!(registry.rule("Noop").is_some());
        assert_eq!(NoopRule.rule_hash(), NoopRule.rule_hash());
    }
}
