// SPDX-License-Identifier: Apache-2.0

//! Declared types for test-case values.
//!
//! Class and enum types refer into a `Catalog` by id; everything else is
//! structural. `Void` exists only as the produced-value type of statements
//! whose result is never consumable (void calls, element assignments).

use std::fmt;

use crate::catalog::{ClassId, EnumId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntKind {
    I8,
    I16,
    I32,
    I64,
}

impl IntKind {
    pub fn min_value(self) -> i64 {
        match self {
            IntKind::I8 => i8::MIN as i64,
            IntKind::I16 => i16::MIN as i64,
            IntKind::I32 => i32::MIN as i64,
            IntKind::I64 => i64::MIN,
        }
    }

    pub fn max_value(self) -> i64 {
        match self {
            IntKind::I8 => i8::MAX as i64,
            IntKind::I16 => i16::MAX as i64,
            IntKind::I32 => i32::MAX as i64,
            IntKind::I64 => i64::MAX,
        }
    }

    /// Saturates `v` into this kind's representable range.
    pub fn clamp(self, v: i64) -> i64 {
        v.clamp(self.min_value(), self.max_value())
    }
}

impl fmt::Display for IntKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            IntKind::I8 => "i8",
            IntKind::I16 => "i16",
            IntKind::I32 => "i32",
            IntKind::I64 => "i64",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatKind {
    F32,
    F64,
}

impl FloatKind {
    /// Rounds `v` through this kind's representation.
    pub fn narrow(self, v: f64) -> f64 {
        match self {
            FloatKind::F32 => v as f32 as f64,
            FloatKind::F64 => v,
        }
    }
}

impl fmt::Display for FloatKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            FloatKind::F32 => "f32",
            FloatKind::F64 => "f64",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Bool,
    Int(IntKind),
    Float(FloatKind),
    Char,
    Str,
    Class(ClassId),
    Enum(EnumId),
    Array(Box<Type>),
}

impl Type {
    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int(_) | Type::Float(_))
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Type::Bool | Type::Int(_) | Type::Float(_) | Type::Char | Type::Str | Type::Enum(_)
        )
    }

    /// Types the null literal inhabits.
    pub fn is_nullable(&self) -> bool {
        matches!(self, Type::Class(_) | Type::Array(_) | Type::Str)
    }

    pub fn elem_type(&self) -> Option<&Type> {
        match self {
            Type::Array(elem) => Some(elem),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Bool => write!(f, "bool"),
            Type::Int(k) => write!(f, "{}", k),
            Type::Float(k) => write!(f, "{}", k),
            Type::Char => write!(f, "char"),
            Type::Str => write!(f, "string"),
            Type::Class(id) => write!(f, "class@{}", id.0),
            Type::Enum(id) => write!(f, "enum@{}", id.0),
            Type::Array(elem) => write!(f, "{}[]", elem),
        }
    }
}
