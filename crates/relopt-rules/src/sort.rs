//! # Sort Rules
//!
//! - [`SortRemoveRule`] drops a sort without offset or fetch whose order is either
//!   empty or already guaranteed by its input.
//! - [`SortProjectTransposeRule`] moves a sort below a projection when every sort
//!   key is a plain column of the projection.

use relopt_core::error::Result;
use relopt_core::pattern::Operand;
use relopt_core::properties::FieldCollation;
use relopt_core::rel::{Project, RelKind, Sort};
use relopt_core::rule::{Rule, RuleCall};
use tracing::trace;

/// Removes a sort that has no limit and does not change the order of its input.
pub struct SortRemoveRule;

impl Rule for SortRemoveRule {
    fn name(&self) -> &str {
        "SortRemove"
    }

    fn operand(&self) -> Operand {
        Operand::of(RelKind::Sort).predicate(|rel| {
            rel.payload::<Sort>().is_some_and(|sort| {
                !sort.has_limit()
                    && (sort.collation.is_empty()
                        || rel.input(0).traits().collation.satisfies(&sort.collation))
            })
        })
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let input = call.rel(0).input(0).clone();
        call.transform_to(input)
    }
}

/// `Sort(Project(X))` -> `Project(Sort(X))`.
pub struct SortProjectTransposeRule;

impl Rule for SortProjectTransposeRule {
    fn name(&self) -> &str {
        "SortProjectTranspose"
    }

    fn operand(&self) -> Operand {
        Operand::of(RelKind::Sort).exact(vec![Operand::of(RelKind::Project)])
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let (sort_rel, project_rel) = (call.rel(0).clone(), call.rel(1).clone());
        let (Some(sort), Some(project)) = (sort_rel.payload::<Sort>(), project_rel.payload::<Project>()) else {
            return Ok(());
        };
        let mut keys: Vec<FieldCollation> = Vec::with_capacity(sort.collation.keys.len());
        for key in &sort.collation.keys {
            match project.exprs[key.field].as_input_ref() {
                Some(source) => keys.push(key.with_field(source)),
                None => {
                    trace!("SortProjectTranspose: sort key ${} is computed", key.field);
                    return Ok(());
                }
            }
        }

        let mut builder = call.builder();
        builder
            .push(project_rel.input(0).clone())
            .sort_limit(sort.offset, sort.fetch, keys)?
            .project_named(project.exprs.clone(), project.names.clone(), false)?;
        let rel = builder.build()?;
        call.transform_to(rel)
    }
}
