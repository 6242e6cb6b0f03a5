// SPDX-License-Identifier: Apache-2.0

//! Relational constraints over expression trees, plus the per-branch records
//! a shadow-symbolic run collects.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::expr::{Expr, Scalar};
use crate::model::Model;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Relation {
    pub fn negate(self) -> Relation {
        match self {
            Relation::Eq => Relation::Ne,
            Relation::Ne => Relation::Eq,
            Relation::Lt => Relation::Ge,
            Relation::Le => Relation::Gt,
            Relation::Gt => Relation::Le,
            Relation::Ge => Relation::Lt,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Relation::Eq => "==",
            Relation::Ne => "!=",
            Relation::Lt => "<",
            Relation::Le => "<=",
            Relation::Gt => ">",
            Relation::Ge => ">=",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// A single relational fact over two expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub lhs: Expr,
    pub rel: Relation,
    pub rhs: Expr,
}

impl Constraint {
    pub fn new(lhs: Expr, rel: Relation, rhs: Expr) -> Constraint {
        Constraint { lhs, rel, rhs }
    }

    pub fn negate(&self) -> Constraint {
        Constraint {
            lhs: self.lhs.clone(),
            rel: self.rel.negate(),
            rhs: self.rhs.clone(),
        }
    }

    pub fn vars_into(&self, out: &mut BTreeSet<String>) {
        self.lhs.vars_into(out);
        self.rhs.vars_into(out);
    }

    pub fn vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.vars_into(&mut out);
        out
    }

    /// Variables with the values they had on the recording run.
    pub fn observed_vars_into(&self, out: &mut BTreeMap<String, Scalar>) {
        self.lhs.observed_vars_into(out);
        self.rhs.observed_vars_into(out);
    }

    pub fn holds(&self, model: &Model) -> bool {
        let l = self.lhs.eval(model);
        let r = self.rhs.eval(model);
        match compare(&l, &r) {
            Some(ord) => match self.rel {
                Relation::Eq => ord == Ordering::Equal,
                Relation::Ne => ord != Ordering::Equal,
                Relation::Lt => ord == Ordering::Less,
                Relation::Le => ord != Ordering::Greater,
                Relation::Gt => ord == Ordering::Greater,
                Relation::Ge => ord != Ordering::Less,
            },
            // Incomparable values satisfy only disequality.
            None => self.rel == Relation::Ne,
        }
    }

    /// Holds at the values observed when the constraint was recorded.
    pub fn holds_observed(&self) -> bool {
        self.holds(&Model::default())
    }

    /// Branch distance under `model`: zero iff the constraint holds, and
    /// otherwise a measure of how far the operands are from satisfying it.
    pub fn distance(&self, model: &Model) -> f64 {
        let l = self.lhs.eval(model);
        let r = self.rhs.eval(model);
        if let (Some(a), Some(b)) = (l.as_real(), r.as_real()) {
            return numeric_distance(self.rel, a, b);
        }
        if let (Scalar::Str(a), Scalar::Str(b)) = (&l, &r) {
            return match self.rel {
                Relation::Eq => string_distance(a, b),
                Relation::Ne => {
                    if a != b {
                        0.0
                    } else {
                        1.0
                    }
                }
                Relation::Lt => order_distance(a < b, a, b),
                Relation::Le => order_distance(a <= b, a, b),
                Relation::Gt => order_distance(a > b, a, b),
                Relation::Ge => order_distance(a >= b, a, b),
            };
        }
        // Mixed-kind operands: nothing to minimize over.
        if self.holds(model) {
            0.0
        } else {
            f64::INFINITY
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.rel, self.rhs)
    }
}

fn compare(a: &Scalar, b: &Scalar) -> Option<Ordering> {
    match (a, b) {
        (Scalar::Str(x), Scalar::Str(y)) => Some(x.cmp(y)),
        _ => {
            let x = a.as_real()?;
            let y = b.as_real()?;
            x.partial_cmp(&y)
        }
    }
}

fn numeric_distance(rel: Relation, a: f64, b: f64) -> f64 {
    match rel {
        Relation::Eq => (a - b).abs(),
        Relation::Ne => {
            if a != b {
                0.0
            } else {
                1.0
            }
        }
        Relation::Lt => {
            if a < b {
                0.0
            } else {
                a - b + 1.0
            }
        }
        Relation::Le => {
            if a <= b {
                0.0
            } else {
                a - b
            }
        }
        Relation::Gt => {
            if a > b {
                0.0
            } else {
                b - a + 1.0
            }
        }
        Relation::Ge => {
            if a >= b {
                0.0
            } else {
                b - a
            }
        }
    }
}

fn order_distance(satisfied: bool, a: &str, b: &str) -> f64 {
    if satisfied {
        0.0
    } else {
        1.0 + string_distance(a, b)
    }
}

// Character-level distance with a gradient a local search can descend: a
// length mismatch dominates, then per-position code point differences.
fn string_distance(a: &str, b: &str) -> f64 {
    if a == b {
        return 0.0;
    }
    let ac: Vec<char> = a.chars().collect();
    let bc: Vec<char> = b.chars().collect();
    let mut d = (ac.len() as f64 - bc.len() as f64).abs() * 64.0;
    for i in 0..ac.len().min(bc.len()) {
        d += (ac[i] as i64 - bc[i] as i64).abs() as f64;
    }
    d
}

/// One conditional observed during a run: the constraint version of the
/// outcome actually taken, plus the conjunction of every constraint taken
/// on the path before it.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchCondition {
    pub branch_id: u32,
    pub local: Constraint,
    pub path: Vec<Constraint>,
}

impl BranchCondition {
    pub fn new(branch_id: u32, local: Constraint, path: Vec<Constraint>) -> BranchCondition {
        BranchCondition {
            branch_id,
            local,
            path,
        }
    }

    /// Variables referenced by the local constraint or its path prefix.
    pub fn vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.local.vars_into(&mut out);
        for c in &self.path {
            c.vars_into(&mut out);
        }
        out
    }

    /// The query whose model drives execution down the other side of this
    /// branch: the unchanged path prefix conjoined with the negated local
    /// constraint.
    pub fn negated_query(&self) -> Vec<Constraint> {
        let mut query = self.path.clone();
        query.push(self.local.negate());
        query
    }
}

impl fmt::Display for BranchCondition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "b{}: {}", self.branch_id, self.local)?;
        if !self.path.is_empty() {
            write!(f, " [after {} prefix constraint(s)]", self.path.len())?;
        }
        Ok(())
    }
}
