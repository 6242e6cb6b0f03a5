// SPDX-License-Identifier: Apache-2.0

//! Structural validation of a test case against a catalog.
//!
//! The edit operations on `TestCase` keep tests well-formed by construction;
//! this checker exists for hand-built tests, for debug assertions in the
//! layers above, and as the authoritative statement of what "well-formed"
//! means.

use std::error::Error;
use std::fmt;

use crate::catalog::{Catalog, ClassId, EnumId, FieldId, MemberId};
use crate::test::{StatementKind, TestCase, VarRef};
use crate::types::Type;
use crate::value::PrimitiveValue;

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    ForwardRef {
        pos: usize,
        referenced: usize,
    },
    VoidRead {
        pos: usize,
        referenced: usize,
    },
    UnknownMember {
        pos: usize,
        member: MemberId,
    },
    WrongMemberKind {
        pos: usize,
        member: MemberId,
    },
    ArityMismatch {
        pos: usize,
        member: MemberId,
        expected: usize,
        found: usize,
    },
    ArgTypeMismatch {
        pos: usize,
        arg: usize,
        expected: Type,
        found: Type,
    },
    MissingReceiver {
        pos: usize,
        member: MemberId,
    },
    UnexpectedReceiver {
        pos: usize,
        member: MemberId,
    },
    ReceiverTypeMismatch {
        pos: usize,
        expected: Type,
        found: Type,
    },
    UnknownField {
        pos: usize,
        field: FieldId,
    },
    FieldNotOnClass {
        pos: usize,
        field: FieldId,
        class: ClassId,
    },
    NotAnObject {
        pos: usize,
        found: Type,
    },
    NotAnArray {
        pos: usize,
        found: Type,
    },
    IndexOutOfBounds {
        pos: usize,
        index: usize,
        len: usize,
    },
    ElemTypeMismatch {
        pos: usize,
        expected: Type,
        found: Type,
    },
    NotNullable {
        pos: usize,
        ty: Type,
    },
    UnknownEnum {
        pos: usize,
        enum_id: EnumId,
    },
    BadEnumOrdinal {
        pos: usize,
        ordinal: usize,
        variant_count: usize,
    },
    VoidArrayElem {
        pos: usize,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ValidationError::ForwardRef { pos, referenced } => write!(
                f,
                "statement {} reads position {} which is not defined before it",
                pos, referenced
            ),
            ValidationError::VoidRead { pos, referenced } => write!(
                f,
                "statement {} reads position {} which produces no value",
                pos, referenced
            ),
            ValidationError::UnknownMember { pos, member } => {
                write!(f, "statement {} names unknown member id {}", pos, member.0)
            }
            ValidationError::WrongMemberKind { pos, member } => write!(
                f,
                "statement {} uses member id {} with the wrong statement kind",
                pos, member.0
            ),
            ValidationError::ArityMismatch {
                pos,
                member,
                expected,
                found,
            } => write!(
                f,
                "statement {} passes {} argument(s) to member id {} which takes {}",
                pos, found, member.0, expected
            ),
            ValidationError::ArgTypeMismatch {
                pos,
                arg,
                expected,
                found,
            } => write!(
                f,
                "statement {} argument {} has type {} where {} is expected",
                pos, arg, found, expected
            ),
            ValidationError::MissingReceiver { pos, member } => write!(
                f,
                "statement {} calls instance member id {} without a receiver",
                pos, member.0
            ),
            ValidationError::UnexpectedReceiver { pos, member } => write!(
                f,
                "statement {} passes a receiver to non-instance member id {}",
                pos, member.0
            ),
            ValidationError::ReceiverTypeMismatch {
                pos,
                expected,
                found,
            } => write!(
                f,
                "statement {} receiver has type {} where {} is expected",
                pos, found, expected
            ),
            ValidationError::UnknownField { pos, field } => {
                write!(f, "statement {} names unknown field id {}", pos, field.0)
            }
            ValidationError::FieldNotOnClass { pos, field, class } => write!(
                f,
                "statement {} reads field id {} which class id {} does not have",
                pos, field.0, class.0
            ),
            ValidationError::NotAnObject { pos, found } => write!(
                f,
                "statement {} reads a field of non-class type {}",
                pos, found
            ),
            ValidationError::NotAnArray { pos, found } => {
                write!(f, "statement {} indexes non-array type {}", pos, found)
            }
            ValidationError::IndexOutOfBounds { pos, index, len } => write!(
                f,
                "statement {} indexes element {} of an array of length {}",
                pos, index, len
            ),
            ValidationError::ElemTypeMismatch {
                pos,
                expected,
                found,
            } => write!(
                f,
                "statement {} stores type {} into an array of {}",
                pos, found, expected
            ),
            ValidationError::NotNullable { pos, ty } => write!(
                f,
                "statement {} binds null at non-nullable type {}",
                pos, ty
            ),
            ValidationError::UnknownEnum { pos, enum_id } => {
                write!(f, "statement {} names unknown enum id {}", pos, enum_id.0)
            }
            ValidationError::BadEnumOrdinal {
                pos,
                ordinal,
                variant_count,
            } => write!(
                f,
                "statement {} uses enum ordinal {} but only {} variant(s) exist",
                pos, ordinal, variant_count
            ),
            ValidationError::VoidArrayElem { pos } => {
                write!(f, "statement {} creates an array of void", pos)
            }
        }
    }
}

impl Error for ValidationError {}

/// Checks use-before-def ordering and full type agreement with `catalog`.
pub fn validate_test(catalog: &Catalog, test: &TestCase) -> Result<(), ValidationError> {
    for (i, s) in test.statements().iter().enumerate() {
        for r in s.reads() {
            let base = r.defining_pos();
            if base >= i {
                return Err(ValidationError::ForwardRef {
                    pos: i,
                    referenced: base,
                });
            }
            if test.statement(base).ret_ty.is_void() {
                return Err(ValidationError::VoidRead {
                    pos: i,
                    referenced: base,
                });
            }
        }
        match &s.kind {
            StatementKind::Primitive(PrimitiveValue::Enum(id, ord)) => {
                let def = match catalog.get_enum(*id) {
                    Some(def) => def,
                    None => {
                        return Err(ValidationError::UnknownEnum {
                            pos: i,
                            enum_id: *id,
                        })
                    }
                };
                if *ord >= def.variants.len() {
                    return Err(ValidationError::BadEnumOrdinal {
                        pos: i,
                        ordinal: *ord,
                        variant_count: def.variants.len(),
                    });
                }
            }
            StatementKind::Primitive(_) => {}
            StatementKind::Null(ty) => {
                if !ty.is_nullable() {
                    return Err(ValidationError::NotNullable {
                        pos: i,
                        ty: ty.clone(),
                    });
                }
            }
            StatementKind::Construct { ctor, args } => {
                let info = match catalog.get_member(*ctor) {
                    Some(info) => info,
                    None => {
                        return Err(ValidationError::UnknownMember {
                            pos: i,
                            member: *ctor,
                        })
                    }
                };
                if !info.is_constructor() {
                    return Err(ValidationError::WrongMemberKind {
                        pos: i,
                        member: *ctor,
                    });
                }
                check_args(catalog, test, i, *ctor, &info.params, args)?;
            }
            StatementKind::Call {
                member,
                receiver,
                args,
            } => {
                let info = match catalog.get_member(*member) {
                    Some(info) => info,
                    None => {
                        return Err(ValidationError::UnknownMember {
                            pos: i,
                            member: *member,
                        })
                    }
                };
                if info.is_constructor() {
                    return Err(ValidationError::WrongMemberKind {
                        pos: i,
                        member: *member,
                    });
                }
                match (info.needs_receiver(), receiver) {
                    (true, None) => {
                        return Err(ValidationError::MissingReceiver {
                            pos: i,
                            member: *member,
                        })
                    }
                    (false, Some(_)) => {
                        return Err(ValidationError::UnexpectedReceiver {
                            pos: i,
                            member: *member,
                        })
                    }
                    (true, Some(r)) => {
                        let expected = Type::Class(info.owner().unwrap_or(ClassId(0)));
                        let found = ref_type(catalog, test, i, r)?;
                        if !catalog.is_assignable(&found, &expected) {
                            return Err(ValidationError::ReceiverTypeMismatch {
                                pos: i,
                                expected,
                                found,
                            });
                        }
                    }
                    (false, None) => {}
                }
                check_args(catalog, test, i, *member, &info.params, args)?;
            }
            StatementKind::FieldRead { object, field } => {
                check_field_access(catalog, test, i, object, *field)?;
            }
            StatementKind::NewArray { elem_ty, .. } => {
                if elem_ty.is_void() {
                    return Err(ValidationError::VoidArrayElem { pos: i });
                }
            }
            StatementKind::StoreIndex {
                array,
                index,
                value,
            } => {
                let arr_ty = ref_type(catalog, test, i, array)?;
                let elem = match arr_ty.elem_type() {
                    Some(elem) => elem.clone(),
                    None => {
                        return Err(ValidationError::NotAnArray {
                            pos: i,
                            found: arr_ty,
                        })
                    }
                };
                if let VarRef::Pos(p) = array {
                    if let StatementKind::NewArray { len, .. } = &test.statement(*p).kind {
                        if index >= len {
                            return Err(ValidationError::IndexOutOfBounds {
                                pos: i,
                                index: *index,
                                len: *len,
                            });
                        }
                    }
                }
                let found = ref_type(catalog, test, i, value)?;
                if !catalog.is_assignable(&found, &elem) {
                    return Err(ValidationError::ElemTypeMismatch {
                        pos: i,
                        expected: elem,
                        found,
                    });
                }
            }
        }
    }
    Ok(())
}

fn check_args(
    catalog: &Catalog,
    test: &TestCase,
    pos: usize,
    member: MemberId,
    params: &[Type],
    args: &[VarRef],
) -> Result<(), ValidationError> {
    if params.len() != args.len() {
        return Err(ValidationError::ArityMismatch {
            pos,
            member,
            expected: params.len(),
            found: args.len(),
        });
    }
    for (k, (param, arg)) in params.iter().zip(args.iter()).enumerate() {
        let found = ref_type(catalog, test, pos, arg)?;
        if !catalog.is_assignable(&found, param) {
            return Err(ValidationError::ArgTypeMismatch {
                pos,
                arg: k,
                expected: param.clone(),
                found,
            });
        }
    }
    Ok(())
}

fn check_field_access(
    catalog: &Catalog,
    test: &TestCase,
    pos: usize,
    object: &VarRef,
    field: FieldId,
) -> Result<Type, ValidationError> {
    if catalog.get_field(field).is_none() {
        return Err(ValidationError::UnknownField { pos, field });
    }
    let obj_ty = ref_type(catalog, test, pos, object)?;
    let class = match obj_ty {
        Type::Class(c) => c,
        other => {
            return Err(ValidationError::NotAnObject {
                pos,
                found: other,
            })
        }
    };
    if !catalog.class_has_field(class, field) {
        return Err(ValidationError::FieldNotOnClass { pos, field, class });
    }
    Ok(catalog.field(field).ty.clone())
}

/// Declared type of a reference as read by the statement at `pos`; checks
/// composite references along the way.
fn ref_type(
    catalog: &Catalog,
    test: &TestCase,
    pos: usize,
    r: &VarRef,
) -> Result<Type, ValidationError> {
    match r {
        VarRef::Pos(p) => Ok(test.statement(*p).ret_ty.clone()),
        VarRef::Field { base, field } => {
            check_field_access(catalog, test, pos, &VarRef::Pos(*base), *field)
        }
        VarRef::Elem { base, .. } => {
            let arr_ty = test.statement(*base).ret_ty.clone();
            match arr_ty.elem_type() {
                Some(elem) => Ok(elem.clone()),
                None => Err(ValidationError::NotAnArray {
                    pos,
                    found: arr_ty,
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogBuilder;
    use crate::test::Statement;
    use crate::types::IntKind;
    use test_case::test_case;

    struct Fixture {
        catalog: Catalog,
        ctor: MemberId,
        deposit: MemberId,
        balance: FieldId,
    }

    fn fixture() -> Fixture {
        let mut b = CatalogBuilder::new();
        let account = b.add_class("Account", None);
        let balance = b.add_field(account, "balance", Type::Int(IntKind::I64));
        let ctor = b.add_constructor(account, "Account::new", vec![Type::Int(IntKind::I64)]);
        let deposit = b.add_method(
            account,
            "deposit",
            vec![Type::Int(IntKind::I64)],
            Some(Type::Bool),
        );
        Fixture {
            catalog: b.build(),
            ctor,
            deposit,
            balance,
        }
    }

    fn int64(v: i64) -> Statement {
        Statement::primitive(PrimitiveValue::Int(IntKind::I64, v))
    }

    #[test]
    fn valid_test_passes() {
        let fx = fixture();
        let mut t = TestCase::new();
        t.push_statement(int64(10));
        t.push_statement(Statement::construct(
            &fx.catalog,
            fx.ctor,
            vec![VarRef::Pos(0)],
        ));
        t.push_statement(Statement::call(
            &fx.catalog,
            fx.deposit,
            Some(VarRef::Pos(1)),
            vec![VarRef::Pos(0)],
        ));
        t.push_statement(Statement::field_read(
            &fx.catalog,
            VarRef::Pos(1),
            fx.balance,
        ));
        assert_eq!(validate_test(&fx.catalog, &t), Ok(()));
    }

    #[test]
    fn arg_type_mismatch_is_reported() {
        let fx = fixture();
        let mut t = TestCase::new();
        t.push_statement(Statement::primitive(PrimitiveValue::Bool(true)));
        t.push_statement(Statement::construct(
            &fx.catalog,
            fx.ctor,
            vec![VarRef::Pos(0)],
        ));
        let err = validate_test(&fx.catalog, &t).unwrap_err();
        assert!(matches!(err, ValidationError::ArgTypeMismatch { pos: 1, arg: 0, .. }));
    }

    #[test]
    fn missing_receiver_is_reported() {
        let fx = fixture();
        let mut t = TestCase::new();
        t.push_statement(int64(10));
        t.push_statement(Statement::call(
            &fx.catalog,
            fx.deposit,
            None,
            vec![VarRef::Pos(0)],
        ));
        let err = validate_test(&fx.catalog, &t).unwrap_err();
        assert!(matches!(err, ValidationError::MissingReceiver { pos: 1, .. }));
    }

    #[test]
    fn constructor_used_as_call_is_reported() {
        let fx = fixture();
        let mut t = TestCase::new();
        t.push_statement(int64(10));
        t.push_statement(Statement::call(
            &fx.catalog,
            fx.ctor,
            None,
            vec![VarRef::Pos(0)],
        ));
        let err = validate_test(&fx.catalog, &t).unwrap_err();
        assert!(matches!(err, ValidationError::WrongMemberKind { pos: 1, .. }));
    }

    #[test_case(Type::Bool; "bool")]
    #[test_case(Type::Int(IntKind::I32); "int")]
    #[test_case(Type::Enum(EnumId(0)); "enum_type")]
    fn null_at_non_nullable_type_is_reported(ty: Type) {
        let fx = fixture();
        let mut t = TestCase::new();
        t.push_statement(Statement::null(ty));
        let err = validate_test(&fx.catalog, &t).unwrap_err();
        assert!(matches!(err, ValidationError::NotNullable { pos: 0, .. }));
    }

    #[test]
    fn store_index_bounds_are_checked_for_known_arrays() {
        let fx = fixture();
        let mut t = TestCase::new();
        t.push_statement(Statement::new_array(Type::Int(IntKind::I64), 2));
        t.push_statement(int64(5));
        t.push_statement(Statement::store_index(VarRef::Pos(0), 2, VarRef::Pos(1)));
        let err = validate_test(&fx.catalog, &t).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::IndexOutOfBounds { pos: 2, index: 2, len: 2 }
        ));
    }

    #[test]
    fn bad_enum_ordinal_is_reported() {
        let mut b = CatalogBuilder::new();
        let color = b.add_enum("Color", &["Red", "Green"]);
        let catalog = b.build();
        let mut t = TestCase::new();
        t.push_statement(Statement::primitive(PrimitiveValue::Enum(color, 5)));
        let err = validate_test(&catalog, &t).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::BadEnumOrdinal { pos: 0, ordinal: 5, variant_count: 2 }
        ));
    }

    #[test]
    fn void_results_cannot_be_read() {
        let fx = fixture();
        let mut t = TestCase::new();
        t.push_statement(Statement::new_array(Type::Int(IntKind::I64), 2));
        t.push_statement(int64(5));
        t.push_statement(Statement::store_index(VarRef::Pos(0), 0, VarRef::Pos(1)));
        // Hand-build a statement reading the void store result.
        t.push_statement(Statement {
            kind: StatementKind::Call {
                member: fx.deposit,
                receiver: Some(VarRef::Pos(2)),
                args: vec![VarRef::Pos(1)],
            },
            ret_ty: Type::Bool,
            distance: 0,
        });
        let err = validate_test(&fx.catalog, &t).unwrap_err();
        assert!(matches!(err, ValidationError::VoidRead { pos: 3, referenced: 2 }));
    }

    #[test]
    fn field_read_through_subclass_is_allowed() {
        let mut b = CatalogBuilder::new();
        let base = b.add_class("Base", None);
        let derived = b.add_class("Derived", Some(base));
        let f = b.add_field(base, "x", Type::Int(IntKind::I32));
        let ctor = b.add_constructor(derived, "Derived::new", vec![]);
        let catalog = b.build();
        let mut t = TestCase::new();
        t.push_statement(Statement::construct(&catalog, ctor, vec![]));
        t.push_statement(Statement::field_read(&catalog, VarRef::Pos(0), f));
        assert_eq!(validate_test(&catalog, &t), Ok(()));
    }
}
