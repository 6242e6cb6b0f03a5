// SPDX-License-Identifier: Apache-2.0

//! One run's binding environment: position -> runtime value, plus the
//! symbolic shadow bindings a traced run accumulates. Owned exclusively by
//! the worker executing the run and discarded (or summarized) at run end.

use std::collections::HashMap;

use testsynth_sym::expr::Expr;
use testsynth_tc::catalog::Catalog;
use testsynth_tc::test::VarRef;

use crate::value::Value;

/// Why a reference failed to resolve to a value. `Unbound` means the
/// position never produced a binding, which a validated test only hits
/// through an engine bug; the others are ordinary program-under-test
/// failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveError {
    Unbound { pos: usize },
    NullBase { pos: usize },
    MissingField { pos: usize },
    IndexOutOfBounds { pos: usize, index: usize, len: usize },
}

#[derive(Default)]
pub struct Scope {
    values: HashMap<usize, Value>,
    shadows: HashMap<usize, Expr>,
}

impl Scope {
    pub fn new() -> Scope {
        Scope::default()
    }

    pub fn bind(&mut self, pos: usize, value: Value) {
        self.values.insert(pos, value);
    }

    pub fn lookup(&self, pos: usize) -> Option<&Value> {
        self.values.get(&pos)
    }

    /// Attaches the symbolic expression shadowing the value at `pos`.
    pub fn bind_shadow(&mut self, pos: usize, expr: Expr) {
        self.shadows.insert(pos, expr);
    }

    pub fn shadow(&self, pos: usize) -> Option<&Expr> {
        self.shadows.get(&pos)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Resolves a reference to the value it denotes right now. Field and
    /// element reads go through the live object/array cells.
    pub fn resolve(&self, r: &VarRef) -> Result<Value, ResolveError> {
        match r {
            VarRef::Pos(p) => self
                .values
                .get(p)
                .cloned()
                .ok_or(ResolveError::Unbound { pos: *p }),
            VarRef::Field { base, field } => {
                let v = self
                    .values
                    .get(base)
                    .ok_or(ResolveError::Unbound { pos: *base })?;
                if v.is_null() {
                    return Err(ResolveError::NullBase { pos: *base });
                }
                let obj = v
                    .as_object()
                    .ok_or(ResolveError::MissingField { pos: *base })?;
                let st = obj.borrow();
                Ok(st
                    .fields
                    .get(field)
                    .cloned()
                    .unwrap_or(Value::Null))
            }
            VarRef::Elem { base, index } => {
                let v = self
                    .values
                    .get(base)
                    .ok_or(ResolveError::Unbound { pos: *base })?;
                if v.is_null() {
                    return Err(ResolveError::NullBase { pos: *base });
                }
                let arr = v
                    .as_array()
                    .ok_or(ResolveError::MissingField { pos: *base })?;
                let cells = arr.cells.borrow();
                cells
                    .get(*index)
                    .cloned()
                    .ok_or(ResolveError::IndexOutOfBounds {
                        pos: *base,
                        index: *index,
                        len: cells.len(),
                    })
            }
        }
    }

    /// Sendable end-of-run summary of the bindings.
    pub fn summarize(&self, catalog: &Catalog) -> ScopeSummary {
        let mut entries: Vec<ScopeEntry> = self
            .values
            .iter()
            .map(|(pos, v)| ScopeEntry {
                pos: *pos,
                ty: v
                    .type_of()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "null".to_string()),
                value: v.summarize(catalog),
            })
            .collect();
        entries.sort_by_key(|e| e.pos);
        ScopeSummary { entries }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeEntry {
    pub pos: usize,
    pub ty: String,
    pub value: String,
}

/// Flat, owned snapshot of a scope; safe to ship across threads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSummary {
    pub entries: Vec<ScopeEntry>,
}

impl ScopeSummary {
    pub fn get(&self, pos: usize) -> Option<&ScopeEntry> {
        self.entries.iter().find(|e| e.pos == pos)
    }
}
