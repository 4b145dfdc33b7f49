//! Shared fixtures for unit and integration tests.
//!
//! The schema mirrors the classic `emps`/`depts` pair:
//!
//! | table | columns |
//! |---|---|
//! | `hr.emps` | `empno`, `ename`, `job`, `mgr` (nullable), `hiredate`, `sal`, `comm`, `deptno`, `slacker` |
//! | `hr.depts` | `deptno`, `name` |
//!
//! `empno` is a declared unique key of `emps` and `deptno` one of `depts`.

use crate::catalog::{InMemoryCatalog, TableDef};
use crate::fieldset::FieldSet;
use crate::rel::{RelNode, RelRef};
use crate::rex::{Op, RexNode};
use crate::types::{DataType, RowType, TypeKind};

pub const EMP_WIDTH: usize = 9;
pub const DEPT_WIDTH: usize = 2;

pub fn emp_row_type() -> RowType {
    RowType::of([
        ("empno", DataType::integer()),
        ("ename", DataType::varchar(Some(20))),
        ("job", DataType::varchar(Some(10))),
        ("mgr", DataType::nullable(TypeKind::Integer)),
        ("hiredate", DataType::not_null(TypeKind::Timestamp)),
        ("sal", DataType::integer()),
        ("comm", DataType::integer()),
        ("deptno", DataType::integer()),
        ("slacker", DataType::boolean()),
    ])
}

pub fn dept_row_type() -> RowType {
    RowType::of([
        ("deptno", DataType::integer()),
        ("name", DataType::varchar(Some(10))),
    ])
}

pub fn emp_scan() -> RelRef {
    RelNode::scan(&["hr", "emps"], emp_row_type(), vec![FieldSet::of([0])])
        .expect("emps scan is valid")
}

pub fn dept_scan() -> RelRef {
    RelNode::scan(&["hr", "depts"], dept_row_type(), vec![FieldSet::of([0])])
        .expect("depts scan is valid")
}

/// Catalog holding `hr.emps` and `hr.depts`.
pub fn hr_catalog() -> InMemoryCatalog {
    InMemoryCatalog::new()
        .with_table(TableDef::new(&["hr", "emps"], emp_row_type()).with_unique_key(FieldSet::of([0])))
        .with_table(TableDef::new(&["hr", "depts"], dept_row_type()).with_unique_key(FieldSet::of([0])))
}

/// Scan of an arbitrary table with `width` non-null integer columns named `{name}0`, `{name}1`, …
pub fn int_scan(name: &str, width: usize) -> RelRef {
    let row_type = RowType::of((0..width).map(|i| (format!("{name}{i}"), DataType::integer())));
    RelNode::scan(&["t", name], row_type, vec![]).expect("scan is valid")
}

/// Empty `Values` with the row type of `rel`.
pub fn empty_like(rel: &RelRef) -> RelRef {
    RelNode::empty(rel.row_type().clone()).expect("empty values is valid")
}

/// Reference to column `i` of `rel`'s row type, at `offset + i`.
pub fn field(rel: &RelRef, i: usize, offset: usize) -> RexNode {
    RexNode::input_ref(offset + i, rel.row_type().field_type(i))
}

pub fn eq(a: RexNode, b: RexNode) -> RexNode {
    RexNode::call(Op::Eq, vec![a, b])
}

pub fn gt(a: RexNode, b: RexNode) -> RexNode {
    RexNode::call(Op::Gt, vec![a, b])
}

pub fn lit(i: i64) -> RexNode {
    RexNode::int_literal(i)
}
