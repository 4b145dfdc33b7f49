//! # Operand Patterns
//!
//! Each rule declares the shape of plan fragment it rewrites as a tree of
//! [`Operand`]s. The driver matches that tree against the plan and hands every
//! match to the rule as an ordered list of nodes, one per operand, in operand
//! pre-order (`call.rel(0)` is the node matched by the root operand, `call.rel(1)`
//! the one matched by its first child operand, and so on).
//!
//! ## Operand language
//!
//! An operand has three parts:
//!
//! - a **kind matcher**: one [`RelKind`] ([`Operand::of`]), any of several
//!   ([`Operand::any_of`]) or any node at all ([`Operand::any_node`]);
//! - an optional **predicate** over the node. [`Operand::with`] takes a closure over
//!   the typed payload, so `Operand::with::<Join>(|j| j.join_type == JoinType::Inner)`
//!   matches inner joins only;
//! - a **child policy**:
//!
//! | policy | meaning |
//! |---|---|
//! | [`Operand::any`] (default) | children are not inspected |
//! | [`Operand::none`] | the node must be a leaf |
//! | [`Operand::exact`] | one operand per child, positionally; child count must match |
//! | [`Operand::some`] | the first k children match positionally, extra children are ignored |
//! | [`Operand::unordered`] | the single child operand matches any one child |
//!
//! ## Matching
//!
//! [`find_matches`] visits every distinct node of the plan once (shared subtrees
//! are deduplicated by identity) in pre-order and tests the root operand against
//! each. Enumeration is deterministic: nodes in pre-order, children in index order.
//! An `unordered` operand yields one match per satisfying child.

use crate::rel::{RelKind, RelNode, RelPayload, RelRef};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&RelNode) -> bool + Send + Sync>;

/// Matcher for operator kinds (without payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindMatcher {
    Kind(RelKind),
    AnyOf(Vec<RelKind>),
    AnyNode,
}

impl KindMatcher {
    fn matches(&self, kind: RelKind) -> bool {
        match self {
            KindMatcher::Kind(k) => *k == kind,
            KindMatcher::AnyOf(kinds) => kinds.contains(&kind),
            KindMatcher::AnyNode => true,
        }
    }
}

/// How an operand constrains the children of the node it matches.
#[derive(Debug, Clone)]
pub enum ChildPolicy {
    Any,
    Leaf,
    Exact(Vec<Operand>),
    Some(Vec<Operand>),
    Unordered(Box<Operand>),
}

/// Node of a rule's match pattern.
#[derive(Clone)]
pub struct Operand {
    matcher: KindMatcher,
    predicate: Option<Predicate>,
    children: ChildPolicy,
}

impl Operand {
    fn new(matcher: KindMatcher) -> Self {
        Self {
            matcher,
            predicate: None,
            children: ChildPolicy::Any,
        }
    }

    /// Matches nodes of one kind.
    pub fn of(kind: RelKind) -> Self {
        Self::new(KindMatcher::Kind(kind))
    }

    /// Matches nodes whose payload is `T` and satisfies `predicate`.
    pub fn with<T: RelPayload>(predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self::of(T::KIND).predicate(move |rel| rel.payload::<T>().is_some_and(&predicate))
    }

    pub fn any_of(kinds: &[RelKind]) -> Self {
        Self::new(KindMatcher::AnyOf(kinds.to_vec()))
    }

    pub fn any_node() -> Self {
        Self::new(KindMatcher::AnyNode)
    }

    /// Adds a predicate over the whole node. Predicates accumulate.
    pub fn predicate(mut self, f: impl Fn(&RelNode) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(previous) => Arc::new(move |rel: &RelNode| previous(rel) && f(rel)),
            None => Arc::new(f),
        });
        self
    }

    pub fn any(mut self) -> Self {
        self.children = ChildPolicy::Any;
        self
    }

    pub fn none(mut self) -> Self {
        self.children = ChildPolicy::Leaf;
        self
    }

    pub fn exact(mut self, children: Vec<Operand>) -> Self {
        self.children = ChildPolicy::Exact(children);
        self
    }

    pub fn some(mut self, children: Vec<Operand>) -> Self {
        self.children = ChildPolicy::Some(children);
        self
    }

    pub fn unordered(mut self, child: Operand) -> Self {
        self.children = ChildPolicy::Unordered(Box::new(child));
        self
    }

    pub fn kind_matcher(&self) -> &KindMatcher {
        &self.matcher
    }

    pub fn child_policy(&self) -> &ChildPolicy {
        &self.children
    }

    /// Whether `rel` satisfies this operand's kind matcher and predicate. Children
    /// are not inspected.
    pub fn matches_node(&self, rel: &RelNode) -> bool {
        self.matcher.matches(rel.kind()) && self.predicate.as_ref().map_or(true, |p| p(rel))
    }

    /// Number of operands in the tree rooted here, i.e. the length of every match.
    pub fn operand_count(&self) -> usize {
        1 + match &self.children {
            ChildPolicy::Any | ChildPolicy::Leaf => 0,
            ChildPolicy::Exact(children) | ChildPolicy::Some(children) => {
                children.iter().map(Operand::operand_count).sum()
            }
            ChildPolicy::Unordered(child) => child.operand_count(),
        }
    }
}

impl fmt::Debug for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operand")
            .field("matcher", &self.matcher)
            .field("predicate", &self.predicate.is_some())
            .field("children", &self.children)
            .finish()
    }
}

/// Every distinct node reachable from `root`, in pre-order, shared nodes once.
pub fn collect_nodes(root: &RelRef) -> Vec<RelRef> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut stack = vec![root.clone()];
    while let Some(rel) = stack.pop() {
        if !seen.insert(Arc::as_ptr(&rel)) {
            continue;
        }
        for input in rel.inputs().iter().rev() {
            stack.push(input.clone());
        }
        out.push(rel);
    }
    out
}

/// Every match of `operand` anywhere in the plan rooted at `root`.
pub fn find_matches(root: &RelRef, operand: &Operand) -> Vec<Vec<RelRef>> {
    collect_nodes(root)
        .iter()
        .flat_map(|rel| match_at(rel, operand))
        .collect()
}

/// Every match of `operand` rooted exactly at `rel`.
pub fn match_at(rel: &RelRef, operand: &Operand) -> Vec<Vec<RelRef>> {
    if !operand.matches_node(rel) {
        return Vec::new();
    }
    let base = vec![vec![rel.clone()]];
    match &operand.children {
        ChildPolicy::Any => base,
        ChildPolicy::Leaf => {
            if rel.inputs().is_empty() {
                base
            } else {
                Vec::new()
            }
        }
        ChildPolicy::Exact(children) => {
            if rel.inputs().len() != children.len() {
                return Vec::new();
            }
            match_positional(rel, children, base)
        }
        ChildPolicy::Some(children) => {
            if rel.inputs().len() < children.len() {
                return Vec::new();
            }
            match_positional(rel, children, base)
        }
        ChildPolicy::Unordered(child) => {
            let mut out = Vec::new();
            for input in rel.inputs() {
                for m in match_at(input, child) {
                    let mut combined = base[0].clone();
                    combined.extend(m);
                    out.push(combined);
                }
            }
            out
        }
    }
}

fn match_positional(
    rel: &RelRef,
    children: &[Operand],
    mut partial: Vec<Vec<RelRef>>,
) -> Vec<Vec<RelRef>> {
    for (input, child) in rel.inputs().iter().zip(children) {
        let child_matches = match_at(input, child);
        if child_matches.is_empty() {
            return Vec::new();
        }
        let mut next = Vec::with_capacity(partial.len() * child_matches.len());
        for prefix in &partial {
            for m in &child_matches {
                let mut combined = prefix.clone();
                combined.extend(m.iter().cloned());
                next.push(combined);
            }
        }
        partial = next;
    }
    partial
}
