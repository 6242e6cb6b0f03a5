// SPDX-License-Identifier: Apache-2.0

//! Plain primitive values as they appear inside primitive statements.
//!
//! These are the mutable knobs of a test case: search perturbs them, DSE
//! overwrites them from solver models. Runtime object values live in the
//! execution crate, not here.

use std::fmt;

use crate::catalog::EnumId;
use crate::types::{FloatKind, IntKind, Type};

#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveValue {
    Bool(bool),
    Int(IntKind, i64),
    Float(FloatKind, f64),
    Char(char),
    Str(String),
    /// Variant ordinal within the enum's declaration order.
    Enum(EnumId, usize),
}

impl PrimitiveValue {
    pub fn ty(&self) -> Type {
        match self {
            PrimitiveValue::Bool(_) => Type::Bool,
            PrimitiveValue::Int(k, _) => Type::Int(*k),
            PrimitiveValue::Float(k, _) => Type::Float(*k),
            PrimitiveValue::Char(_) => Type::Char,
            PrimitiveValue::Str(_) => Type::Str,
            PrimitiveValue::Enum(id, _) => Type::Enum(*id),
        }
    }

    /// Integer view used by ordinal-style search moves: bools are 0/1, chars
    /// their code point, enums their ordinal.
    pub fn as_ordinal(&self) -> Option<i64> {
        match self {
            PrimitiveValue::Bool(b) => Some(*b as i64),
            PrimitiveValue::Int(_, v) => Some(*v),
            PrimitiveValue::Char(c) => Some(*c as i64),
            PrimitiveValue::Enum(_, ord) => Some(*ord as i64),
            _ => None,
        }
    }

    /// Default (zero-ish) value for a primitive type; `None` for non-primitive
    /// types.
    pub fn zero_of(ty: &Type) -> Option<PrimitiveValue> {
        match ty {
            Type::Bool => Some(PrimitiveValue::Bool(false)),
            Type::Int(k) => Some(PrimitiveValue::Int(*k, 0)),
            Type::Float(k) => Some(PrimitiveValue::Float(*k, 0.0)),
            Type::Char => Some(PrimitiveValue::Char('a')),
            Type::Str => Some(PrimitiveValue::Str(String::new())),
            Type::Enum(id) => Some(PrimitiveValue::Enum(*id, 0)),
            _ => None,
        }
    }
}

impl fmt::Display for PrimitiveValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PrimitiveValue::Bool(b) => write!(f, "{}", b),
            PrimitiveValue::Int(_, v) => write!(f, "{}", v),
            PrimitiveValue::Float(_, v) => write!(f, "{:?}", v),
            PrimitiveValue::Char(c) => write!(f, "{:?}", c),
            PrimitiveValue::Str(s) => write!(f, "{:?}", s),
            PrimitiveValue::Enum(id, ord) => write!(f, "enum@{}#{}", id.0, ord),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ty_round_trips_kind() {
        assert_eq!(
            PrimitiveValue::Int(IntKind::I16, 3).ty(),
            Type::Int(IntKind::I16)
        );
        assert_eq!(PrimitiveValue::Str("x".into()).ty(), Type::Str);
    }

    #[test]
    fn ordinal_view_covers_discrete_kinds() {
        assert_eq!(PrimitiveValue::Bool(true).as_ordinal(), Some(1));
        assert_eq!(PrimitiveValue::Char('A').as_ordinal(), Some(65));
        assert_eq!(PrimitiveValue::Enum(EnumId(0), 2).as_ordinal(), Some(2));
        assert_eq!(PrimitiveValue::Str("x".into()).as_ordinal(), None);
    }

    #[test]
    fn zero_of_is_defined_for_every_primitive() {
        for ty in [
            Type::Bool,
            Type::Int(IntKind::I64),
            Type::Float(FloatKind::F32),
            Type::Char,
            Type::Str,
            Type::Enum(EnumId(1)),
        ] {
            let v = PrimitiveValue::zero_of(&ty).unwrap();
            assert_eq!(v.ty(), ty);
        }
        assert!(PrimitiveValue::zero_of(&Type::Void).is_none());
    }

    #[test]
    fn display_quotes_text_kinds() {
        assert_eq!(PrimitiveValue::Char('c').to_string(), "'c'");
        assert_eq!(PrimitiveValue::Str("a\"b".into()).to_string(), "\"a\\\"b\"");
        assert_eq!(PrimitiveValue::Float(FloatKind::F64, 2.0).to_string(), "2.0");
    }
}
