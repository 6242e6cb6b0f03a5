// SPDX-License-Identifier: Apache-2.0

//! Runtime values as they exist during one run.
//!
//! Objects and arrays are shared mutable cells; a value lives only on the
//! worker thread that owns the run's scope, so plain `Rc` interior
//! mutability is enough. These deliberately never cross threads; what the
//! caller gets back is summaries and traces.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use testsynth_sym::expr::Scalar;
use testsynth_tc::catalog::{Catalog, ClassId, EnumId, FieldId};
use testsynth_tc::types::{FloatKind, IntKind, Type};
use testsynth_tc::value::PrimitiveValue;

#[derive(Debug)]
pub struct ObjectState {
    pub class: ClassId,
    pub fields: HashMap<FieldId, Value>,
}

pub type ObjectHandle = Rc<RefCell<ObjectState>>;

#[derive(Debug, Clone)]
pub struct ArrayValue {
    pub elem_ty: Type,
    pub cells: Rc<RefCell<Vec<Value>>>,
}

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(IntKind, i64),
    Float(FloatKind, f64),
    Char(char),
    Str(String),
    Enum(EnumId, usize),
    Object(ObjectHandle),
    Array(ArrayValue),
}

impl Value {
    pub fn new_object(class: ClassId) -> Value {
        Value::Object(Rc::new(RefCell::new(ObjectState {
            class,
            fields: HashMap::new(),
        })))
    }

    pub fn from_primitive(v: &PrimitiveValue) -> Value {
        match v {
            PrimitiveValue::Bool(b) => Value::Bool(*b),
            PrimitiveValue::Int(k, i) => Value::Int(*k, *i),
            PrimitiveValue::Float(k, f) => Value::Float(*k, *f),
            PrimitiveValue::Char(c) => Value::Char(*c),
            PrimitiveValue::Str(s) => Value::Str(s.clone()),
            PrimitiveValue::Enum(id, ord) => Value::Enum(*id, *ord),
        }
    }

    /// The zero-ish value a fresh array cell or unset field holds.
    pub fn default_of(ty: &Type) -> Value {
        match PrimitiveValue::zero_of(ty) {
            Some(v) => Value::from_primitive(&v),
            None => Value::Null,
        }
    }

    pub fn type_of(&self) -> Option<Type> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(Type::Bool),
            Value::Int(k, _) => Some(Type::Int(*k)),
            Value::Float(k, _) => Some(Type::Float(*k)),
            Value::Char(_) => Some(Type::Char),
            Value::Str(_) => Some(Type::Str),
            Value::Enum(id, _) => Some(Type::Enum(*id)),
            Value::Object(o) => Some(Type::Class(o.borrow().class)),
            Value::Array(a) => Some(Type::Array(Box::new(a.elem_ty.clone()))),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Scalar view for instrumentation: discrete kinds ride the integer
    /// domain (bool 0/1, char code point, enum ordinal).
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Value::Bool(b) => Some(Scalar::Int(*b as i64)),
            Value::Int(_, i) => Some(Scalar::Int(*i)),
            Value::Float(_, f) => Some(Scalar::Real(*f)),
            Value::Char(c) => Some(Scalar::Int(*c as i64)),
            Value::Str(s) => Some(Scalar::Str(s.clone())),
            Value::Enum(_, ord) => Some(Scalar::Int(*ord as i64)),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectHandle> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayValue> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(_, i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(_, f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// One-line rendering for scope snapshots and logs.
    pub fn summarize(&self, catalog: &Catalog) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(_, i) => i.to_string(),
            Value::Float(_, f) => format!("{:?}", f),
            Value::Char(c) => format!("{:?}", c),
            Value::Str(s) => format!("{:?}", s),
            Value::Enum(id, ord) => {
                let def = catalog.enum_def(*id);
                format!("{}::{}", def.name, def.variants[*ord])
            }
            Value::Object(o) => {
                let st = o.borrow();
                format!(
                    "{}{{{} field(s)}}",
                    catalog.class(st.class).name,
                    st.fields.len()
                )
            }
            Value::Array(a) => format!("array[{}]", a.cells.borrow().len()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(_, i) => write!(f, "{}", i),
            Value::Float(_, v) => write!(f, "{:?}", v),
            Value::Char(c) => write!(f, "{:?}", c),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Enum(id, ord) => write!(f, "enum@{}#{}", id.0, ord),
            Value::Object(o) => write!(f, "object(class@{})", o.borrow().class.0),
            Value::Array(a) => write!(f, "array[{}]", a.cells.borrow().len()),
        }
    }
}

/// Whether `value` can be bound where `ty` is declared. Null inhabits
/// nullable types; object classes are checked covariantly.
pub fn value_fits(catalog: &Catalog, value: &Value, ty: &Type) -> bool {
    match value.type_of() {
        Some(vt) => catalog.is_assignable(&vt, ty),
        None => ty.is_nullable(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testsynth_tc::catalog::CatalogBuilder;

    #[test]
    fn object_cells_are_shared() {
        let v = Value::new_object(ClassId(0));
        let alias = v.clone();
        if let Value::Object(o) = &v {
            o.borrow_mut()
                .fields
                .insert(FieldId(0), Value::Int(IntKind::I64, 5));
        }
        let alias_obj = alias.as_object().unwrap().borrow();
        assert_eq!(alias_obj.fields.len(), 1);
    }

    #[test]
    fn scalar_view_is_integer_for_discrete_kinds() {
        assert_eq!(Value::Bool(true).as_scalar(), Some(Scalar::Int(1)));
        assert_eq!(Value::Char('A').as_scalar(), Some(Scalar::Int(65)));
        assert_eq!(Value::Enum(EnumId(0), 2).as_scalar(), Some(Scalar::Int(2)));
        assert!(Value::new_object(ClassId(0)).as_scalar().is_none());
    }

    #[test]
    fn null_fits_only_nullable_types() {
        let catalog = CatalogBuilder::new().build();
        assert!(value_fits(&catalog, &Value::Null, &Type::Str));
        assert!(!value_fits(&catalog, &Value::Null, &Type::Bool));
    }

    #[test]
    fn subclass_object_fits_superclass_slot() {
        let mut b = CatalogBuilder::new();
        let base = b.add_class("Base", None);
        let derived = b.add_class("Derived", Some(base));
        let catalog = b.build();
        let v = Value::new_object(derived);
        assert!(value_fits(&catalog, &v, &Type::Class(base)));
    }

    #[test]
    fn default_of_reference_types_is_null() {
        assert!(Value::default_of(&Type::Class(ClassId(0))).is_null());
        assert_eq!(
            Value::default_of(&Type::Int(IntKind::I32)).as_i64(),
            Some(0)
        );
    }
}
