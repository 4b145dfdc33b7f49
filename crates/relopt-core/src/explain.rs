//! # Plan Rendering
//!
//! Text and JSON renderings of relational expressions. The text form is one node
//! per line, children indented by two spaces:
//!
//! ```text
//! Project(empno=[$0], ename=[$1])
//!   Filter(condition=[>($5, 1000)])
//!     Scan(table=[hr, emps])
//! ```
//!
//! Each line is the operator name followed by its attribute terms. The same terms,
//! with the digests of the inputs appended, form the node's digest.

use crate::rel::{RelNode, RelOp, RelRef};
use serde_json::{json, Value};
use std::fmt::Write;

/// Attribute terms of an operator, in display order.
pub fn terms(op: &RelOp) -> Vec<(String, String)> {
    let mut terms = Vec::new();
    match op {
        RelOp::Scan(scan) => {
            terms.push(("table".to_string(), scan.table.join(", ")));
        }
        RelOp::Values(values) => {
            terms.push(("type".to_string(), values.row_type.to_string()));
            let tuples: Vec<String> = values
                .tuples
                .iter()
                .map(|t| {
                    let items: Vec<String> = t.iter().map(|v| v.to_string()).collect();
                    format!("{{ {} }}", items.join(", "))
                })
                .collect();
            terms.push(("tuples".to_string(), tuples.join(", ")));
        }
        RelOp::Filter(filter) => {
            terms.push(("condition".to_string(), filter.condition.to_string()));
        }
        RelOp::Project(project) => {
            for (name, expr) in project.names.iter().zip(&project.exprs) {
                terms.push((name.clone(), expr.to_string()));
            }
        }
        RelOp::Join(join) => {
            terms.push(("condition".to_string(), join.condition.to_string()));
            terms.push(("joinType".to_string(), join.join_type.lower_name().to_string()));
        }
        RelOp::Correlate(correlate) => {
            terms.push(("correlation".to_string(), correlate.id.to_string()));
            terms.push((
                "joinType".to_string(),
                correlate.join_type.lower_name().to_string(),
            ));
            terms.push((
                "requiredColumns".to_string(),
                correlate.required_columns.to_string(),
            ));
        }
        RelOp::Aggregate(aggregate) => {
            terms.push(("group".to_string(), aggregate.group_set.to_string()));
            if !aggregate.is_simple() {
                let sets: Vec<String> = aggregate.group_sets.iter().map(|s| s.to_string()).collect();
                terms.push(("groups".to_string(), sets.join(", ")));
            }
            for (i, call) in aggregate.agg_calls.iter().enumerate() {
                let name = call
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("agg#{i}"));
                terms.push((name, call.to_string()));
            }
        }
        RelOp::Sort(sort) => {
            for (i, key) in sort.collation.keys.iter().enumerate() {
                terms.push((format!("sort{i}"), format!("${}", key.field)));
            }
            for (i, key) in sort.collation.keys.iter().enumerate() {
                terms.push((format!("dir{i}"), key.to_string()));
            }
            if let Some(offset) = sort.offset {
                terms.push(("offset".to_string(), offset.to_string()));
            }
            if let Some(fetch) = sort.fetch {
                terms.push(("fetch".to_string(), fetch.to_string()));
            }
        }
        RelOp::SetOp(set_op) => {
            terms.push(("all".to_string(), set_op.all.to_string()));
        }
        RelOp::Calc(calc) => {
            for (name, expr) in calc.names.iter().zip(&calc.exprs) {
                terms.push((name.clone(), expr.to_string()));
            }
            if let Some(condition) = &calc.condition {
                terms.push(("condition".to_string(), condition.to_string()));
            }
        }
        RelOp::MultiJoin(multi_join) => {
            terms.push(("condition".to_string(), multi_join.condition.to_string()));
        }
        RelOp::TableFunctionScan(scan) => {
            terms.push(("invocation".to_string(), scan.call.to_string()));
            terms.push(("rowType".to_string(), scan.row_type.to_string()));
        }
    }
    terms
}

fn header(op: &RelOp) -> String {
    let rendered: Vec<String> = terms(op)
        .into_iter()
        .map(|(k, v)| format!("{k}=[{v}]"))
        .collect();
    format!("{}({})", op.name(), rendered.join(", "))
}

/// Canonical single-line digest of `op` over `inputs`.
pub(crate) fn digest(op: &RelOp, inputs: &[RelRef]) -> String {
    let mut out = header(op);
    if !inputs.is_empty() {
        out.push('[');
        for (i, input) in inputs.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(input.digest());
        }
        out.push(']');
    }
    out
}

impl RelNode {
    /// Indented multi-line rendering of the tree rooted at this node, ending with
    /// a newline.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.explain_into(&mut out, 0);
        out
    }

    fn explain_into(&self, out: &mut String, depth: usize) {
        let _ = writeln!(out, "{:indent$}{}", "", header(self.op()), indent = depth * 2);
        for input in self.inputs() {
            input.explain_into(out, depth + 1);
        }
    }

    /// JSON document of the tree rooted at this node.
    pub fn to_json(&self) -> Value {
        let inputs: Vec<Value> = self.inputs().iter().map(|i| i.to_json()).collect();
        json!({
            "rel": self.name(),
            "op": self.op(),
            "rowType": self.row_type(),
            "inputs": inputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::rel::{JoinType, RelNode};
    use crate::rex::{Op, RexNode};
    use crate::testing::{dept_scan, emp_scan};

    #[test]
    fn test_explain_tree() {
        let emp = emp_scan();
        let dept = dept_scan();
        let cond = RexNode::call(
            Op::Eq,
            vec![
                RexNode::input_ref(7, emp.row_type().field_type(7)),
                RexNode::input_ref(9, dept.row_type().field_type(0)),
            ],
        );
        let join = RelNode::join(emp, dept, JoinType::Inner, cond).unwrap();
        assert_eq!(
            join.explain(),
            "Join(condition=[=($7, $9)], joinType=[inner])\n  Scan(table=[hr, emps])\n  Scan(table=[hr, depts])\n"
        );
    }

    #[test]
    fn test_to_json_shape() {
        let emp = emp_scan();
        let filter = RelNode::filter(
            emp,
            RexNode::call(Op::IsNotNull, vec![RexNode::input_ref(3, emp_scan().row_type().field_type(3))]),
        )
        .unwrap();
        let json = filter.to_json();
        assert_eq!(json["rel"], "Filter");
        assert_eq!(json["inputs"][0]["rel"], "Scan");
        assert_eq!(json["rowType"]["fields"][0]["name"], "empno");
    }
}
