// SPDX-License-Identifier: Apache-2.0

//! Expression trees recorded while a test runs in shadow-symbolic mode.
//!
//! Every node carries the concrete value observed on the underlying run, so a
//! tree can be re-evaluated without touching the program under test and
//! variables left unbound by a model fall back to their observed values.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::Model;

/// Concrete scalar carried on every expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Int(i64),
    Real(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Int,
    Real,
    Str,
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::Int(_) => ScalarKind::Int,
            Scalar::Real(_) => ScalarKind::Real,
            Scalar::Str(_) => ScalarKind::Str,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Scalar::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Real(r) => Some(*r),
            Scalar::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Scalar::Str(_))
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Real(r) => write!(f, "{:?}", r),
            Scalar::Str(s) => write!(f, "{:?}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    StrLen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Concat,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Concat => "++",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, PartialEq)]
enum ExprNode {
    Var { name: String, observed: Scalar },
    Const(Scalar),
    Unary { op: UnaryOp, arg: Expr, observed: Scalar },
    Binary { op: BinaryOp, lhs: Expr, rhs: Expr, observed: Scalar },
}

/// Immutable expression handle; clones share structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr(Arc<ExprNode>);

impl Expr {
    pub fn var(name: impl Into<String>, observed: Scalar) -> Expr {
        Expr(Arc::new(ExprNode::Var {
            name: name.into(),
            observed,
        }))
    }

    pub fn constant(value: Scalar) -> Expr {
        Expr(Arc::new(ExprNode::Const(value)))
    }

    pub fn int(value: i64) -> Expr {
        Expr::constant(Scalar::Int(value))
    }

    pub fn real(value: f64) -> Expr {
        Expr::constant(Scalar::Real(value))
    }

    pub fn str(value: impl Into<String>) -> Expr {
        Expr::constant(Scalar::Str(value.into()))
    }

    pub fn unary(op: UnaryOp, arg: Expr) -> Expr {
        let observed = apply_unary(op, arg.observed());
        Expr(Arc::new(ExprNode::Unary { op, arg, observed }))
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        let observed = apply_binary(op, lhs.observed(), rhs.observed());
        Expr(Arc::new(ExprNode::Binary {
            op,
            lhs,
            rhs,
            observed,
        }))
    }

    pub fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self)
    }

    pub fn str_len(self) -> Expr {
        Expr::unary(UnaryOp::StrLen, self)
    }

    pub fn add(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Add, self, rhs)
    }

    pub fn sub(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Sub, self, rhs)
    }

    pub fn mul(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Mul, self, rhs)
    }

    /// Value seen on the run that recorded this expression.
    pub fn observed(&self) -> &Scalar {
        match &*self.0 {
            ExprNode::Var { observed, .. } => observed,
            ExprNode::Const(value) => value,
            ExprNode::Unary { observed, .. } => observed,
            ExprNode::Binary { observed, .. } => observed,
        }
    }

    /// Re-evaluates under `model`; variables the model does not bind keep
    /// their observed values.
    pub fn eval(&self, model: &Model) -> Scalar {
        match &*self.0 {
            ExprNode::Var { name, observed } => match model.get(name) {
                Some(value) => value.clone(),
                None => observed.clone(),
            },
            ExprNode::Const(value) => value.clone(),
            ExprNode::Unary { op, arg, .. } => apply_unary(*op, &arg.eval(model)),
            ExprNode::Binary { op, lhs, rhs, .. } => {
                apply_binary(*op, &lhs.eval(model), &rhs.eval(model))
            }
        }
    }

    pub fn vars_into(&self, out: &mut BTreeSet<String>) {
        match &*self.0 {
            ExprNode::Var { name, .. } => {
                out.insert(name.clone());
            }
            ExprNode::Const(_) => {}
            ExprNode::Unary { arg, .. } => arg.vars_into(out),
            ExprNode::Binary { lhs, rhs, .. } => {
                lhs.vars_into(out);
                rhs.vars_into(out);
            }
        }
    }

    /// Collects every variable together with the value it had on the
    /// recording run; seeds a solver's starting model.
    pub fn observed_vars_into(&self, out: &mut BTreeMap<String, Scalar>) {
        match &*self.0 {
            ExprNode::Var { name, observed } => {
                out.entry(name.clone()).or_insert_with(|| observed.clone());
            }
            ExprNode::Const(_) => {}
            ExprNode::Unary { arg, .. } => arg.observed_vars_into(out),
            ExprNode::Binary { lhs, rhs, .. } => {
                lhs.observed_vars_into(out);
                rhs.observed_vars_into(out);
            }
        }
    }

    pub fn vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.vars_into(&mut out);
        out
    }

    pub fn var_name(&self) -> Option<&str> {
        match &*self.0 {
            ExprNode::Var { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn is_var(&self) -> bool {
        matches!(&*self.0, ExprNode::Var { .. })
    }

    pub fn is_const(&self) -> bool {
        matches!(&*self.0, ExprNode::Const(_))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &*self.0 {
            ExprNode::Var { name, .. } => write!(f, "{}", name),
            ExprNode::Const(value) => write!(f, "{}", value),
            ExprNode::Unary { op, arg, .. } => match op {
                UnaryOp::Neg => write!(f, "(-{})", arg),
                UnaryOp::StrLen => write!(f, "len({})", arg),
            },
            ExprNode::Binary { op, lhs, rhs, .. } => write!(f, "({} {} {})", lhs, op, rhs),
        }
    }
}

fn apply_unary(op: UnaryOp, arg: &Scalar) -> Scalar {
    match op {
        UnaryOp::Neg => match arg {
            Scalar::Int(i) => Scalar::Int(i.wrapping_neg()),
            Scalar::Real(r) => Scalar::Real(-r),
            Scalar::Str(_) => Scalar::Int(0),
        },
        UnaryOp::StrLen => match arg {
            Scalar::Str(s) => Scalar::Int(s.chars().count() as i64),
            _ => Scalar::Int(0),
        },
    }
}

// Arithmetic is total: integer overflow wraps and division by zero yields
// zero, so re-evaluation under an arbitrary candidate model cannot panic.
fn apply_binary(op: BinaryOp, lhs: &Scalar, rhs: &Scalar) -> Scalar {
    if op == BinaryOp::Concat {
        return Scalar::Str(format!("{}{}", display_raw(lhs), display_raw(rhs)));
    }
    match (lhs, rhs) {
        (Scalar::Int(a), Scalar::Int(b)) => {
            let v = match op {
                BinaryOp::Add => a.wrapping_add(*b),
                BinaryOp::Sub => a.wrapping_sub(*b),
                BinaryOp::Mul => a.wrapping_mul(*b),
                BinaryOp::Div => a.checked_div(*b).unwrap_or(0),
                BinaryOp::Rem => a.checked_rem(*b).unwrap_or(0),
                BinaryOp::Concat => unreachable!(),
            };
            Scalar::Int(v)
        }
        _ => {
            let a = lhs.as_real().unwrap_or(0.0);
            let b = rhs.as_real().unwrap_or(0.0);
            let v = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Rem => a % b,
                BinaryOp::Concat => unreachable!(),
            };
            Scalar::Real(v)
        }
    }
}

fn display_raw(value: &Scalar) -> String {
    match value {
        Scalar::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn observed_folds_through_tree() {
        let x = Expr::var("v0", Scalar::Int(7));
        let e = x.add(Expr::int(3)).mul(Expr::int(2));
        assert_eq!(*e.observed(), Scalar::Int(20));
    }

    #[test]
    fn eval_prefers_model_and_falls_back_to_observed() {
        let x = Expr::var("v0", Scalar::Int(7));
        let y = Expr::var("v1", Scalar::Int(1));
        let e = x.add(y);
        assert_eq!(e.eval(&Model::default()), Scalar::Int(8));

        let mut m = Model::default();
        m.bind("v0", Scalar::Int(100));
        assert_eq!(e.eval(&m), Scalar::Int(101));
    }

    #[test]
    fn mixed_arithmetic_widens_to_real() {
        let e = Expr::int(3).add(Expr::real(0.5));
        assert_eq!(*e.observed(), Scalar::Real(3.5));
    }

    #[test]
    fn division_by_zero_is_total() {
        let e = Expr::binary(BinaryOp::Div, Expr::int(9), Expr::int(0));
        assert_eq!(*e.observed(), Scalar::Int(0));
        let e = Expr::binary(BinaryOp::Rem, Expr::int(9), Expr::int(0));
        assert_eq!(*e.observed(), Scalar::Int(0));
    }

    #[test]
    fn str_len_counts_chars() {
        let s = Expr::var("v2", Scalar::Str("héllo".to_string()));
        assert_eq!(*s.str_len().observed(), Scalar::Int(5));
    }

    #[test]
    fn vars_are_collected_in_order() {
        let e = Expr::var("v3", Scalar::Int(0)).add(Expr::var("v1", Scalar::Int(0)));
        let vars: Vec<String> = e.vars().into_iter().collect();
        assert_eq!(vars, vec!["v1".to_string(), "v3".to_string()]);
    }

    #[test]
    fn display_is_infix() {
        let x = Expr::var("v0", Scalar::Int(7));
        let e = x.sub(Expr::int(2)).neg();
        assert_eq!(e.to_string(), "(-(v0 - 2))");
    }

    #[test]
    fn concat_coerces_operands() {
        let e = Expr::binary(
            BinaryOp::Concat,
            Expr::str("n="),
            Expr::var("v0", Scalar::Int(4)),
        );
        assert_eq!(*e.observed(), Scalar::Str("n=4".to_string()));
    }
}
