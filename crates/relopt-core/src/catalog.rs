//! # Catalog Interface
//!
//! The builder resolves table names through a [`Catalog`]. The trait is minimal and
//! used as a trait object (`Arc<dyn Catalog>`) so that a front-end can plug in its
//! own schema source; rules never consult the catalog directly, they only see the
//! row type and unique keys copied into each `Scan`.
//!
//! [`InMemoryCatalog`] is a `HashMap`-backed implementation for tests and
//! embedding.

use crate::fieldset::FieldSet;
use crate::types::RowType;
use std::collections::HashMap;

/// Schema information for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    /// Qualified name, e.g. `["hr", "emps"]`.
    pub name: Vec<String>,
    pub row_type: RowType,
    /// Column sets declared unique.
    pub unique_keys: Vec<FieldSet>,
}

impl TableDef {
    pub fn new(name: &[&str], row_type: RowType) -> Self {
        Self {
            name: name.iter().map(|s| s.to_string()).collect(),
            row_type,
            unique_keys: Vec::new(),
        }
    }

    pub fn with_unique_key(mut self, key: FieldSet) -> Self {
        self.unique_keys.push(key);
        self
    }
}

/// Resolves qualified table names.
pub trait Catalog: Send + Sync {
    fn table(&self, name: &[&str]) -> Option<TableDef>;
}

/// Catalog backed by a map keyed by the dot-joined qualified name.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    tables: HashMap<String, TableDef>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: TableDef) {
        self.tables.insert(table.name.join("."), table);
    }

    pub fn with_table(mut self, table: TableDef) -> Self {
        self.add_table(table);
        self
    }
}

impl Catalog for InMemoryCatalog {
    fn table(&self, name: &[&str]) -> Option<TableDef> {
        self.tables.get(&name.join(".")).cloned()
    }
}
