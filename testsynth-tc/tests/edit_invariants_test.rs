// SPDX-License-Identifier: Apache-2.0

//! End-to-end invariants of test-case editing: graceful deletion either
//! rebinds every dependent or deletes them together, and every edit leaves
//! the test well-formed.

use testsynth_tc::catalog::{Catalog, CatalogBuilder, FieldId, MemberId};
use testsynth_tc::test::{Statement, TestCase, VarRef};
use testsynth_tc::types::{IntKind, Type};
use testsynth_tc::validate::validate_test;
use testsynth_tc::value::PrimitiveValue;

struct Put {
    catalog: Catalog,
    ctor: MemberId,
    x: FieldId,
    y: FieldId,
    shift: MemberId,
}

fn put() -> Put {
    let mut b = CatalogBuilder::new();
    let point = b.add_class("Point", None);
    let x = b.add_field(point, "x", Type::Int(IntKind::I32));
    let y = b.add_field(point, "y", Type::Int(IntKind::I32));
    let ctor = b.add_constructor(
        point,
        "Point::new",
        vec![Type::Int(IntKind::I32), Type::Int(IntKind::I32)],
    );
    let shift = b.add_method(point, "shift", vec![Type::Int(IntKind::I32)], None);
    Put {
        catalog: b.build(),
        ctor,
        x,
        y,
        shift,
    }
}

fn i32_stmt(v: i64) -> Statement {
    Statement::primitive(PrimitiveValue::Int(IntKind::I32, v))
}

/// v0 = 1; v1 = 2; v2 = Point::new(v0, v1); v3 = v2.x; v4 = v2.y;
/// v2.shift(v0);
fn base_test(put: &Put) -> TestCase {
    let mut t = TestCase::new();
    t.push_statement(i32_stmt(1));
    t.push_statement(i32_stmt(2));
    t.push_statement(Statement::construct(
        &put.catalog,
        put.ctor,
        vec![VarRef::Pos(0), VarRef::Pos(1)],
    ));
    t.push_statement(Statement::field_read(&put.catalog, VarRef::Pos(2), put.x));
    t.push_statement(Statement::field_read(&put.catalog, VarRef::Pos(2), put.y));
    t.push_statement(Statement::call(
        &put.catalog,
        put.shift,
        Some(VarRef::Pos(2)),
        vec![VarRef::Pos(0)],
    ));
    t
}

#[test]
fn deleting_shared_base_without_alternative_takes_all_dependents() {
    let put = put();
    let mut t = base_test(&put);
    assert_eq!(validate_test(&put.catalog, &t), Ok(()));

    let outcome = t.remove_statement_graceful(&put.catalog, 2);
    // The constructor and all three dependents go together.
    assert_eq!(outcome.rebound, 0);
    assert_eq!(outcome.removed.len(), 4);
    assert_eq!(t.len(), 2);
    assert_eq!(validate_test(&put.catalog, &t), Ok(()));
}

#[test]
fn deleting_shared_base_with_alternative_rebinds_all_dependents() {
    let put = put();
    let mut t = base_test(&put);
    // A second Point the dependents can be rewired onto.
    t.insert_statement(
        3,
        Statement::construct(
            &put.catalog,
            put.ctor,
            vec![VarRef::Pos(0), VarRef::Pos(0)],
        ),
    );
    assert_eq!(validate_test(&put.catalog, &t), Ok(()));

    let outcome = t.remove_statement_graceful(&put.catalog, 2);
    // Two field reads plus one receiver: three rewires, only the victim
    // removed. Never "exactly one dangling".
    assert_eq!(outcome.rebound, 3);
    assert_eq!(outcome.removed.len(), 1);
    assert_eq!(t.len(), 6);
    assert_eq!(validate_test(&put.catalog, &t), Ok(()));
}

#[test]
fn every_edit_preserves_well_formedness() {
    let put = put();
    let mut t = base_test(&put);

    t.insert_statement(2, i32_stmt(7));
    assert_eq!(validate_test(&put.catalog, &t), Ok(()));

    t.insert_statement(
        4,
        Statement::construct(
            &put.catalog,
            put.ctor,
            vec![VarRef::Pos(2), VarRef::Pos(0)],
        ),
    );
    assert_eq!(validate_test(&put.catalog, &t), Ok(()));

    // Point the first field read at the new object.
    let old = VarRef::Pos(3);
    let new = VarRef::Pos(4);
    t.replace_reference(&put.catalog, &old, &new).unwrap();
    assert_eq!(validate_test(&put.catalog, &t), Ok(()));

    t.remove_statement_hard(1);
    assert_eq!(validate_test(&put.catalog, &t), Ok(()));

    while t.len() > 0 {
        t.remove_statement_graceful(&put.catalog, t.len() - 1);
        assert_eq!(validate_test(&put.catalog, &t), Ok(()));
    }
}

#[test]
fn clone_round_trips_and_isolates_mutation() {
    let put = put();
    let mut t = base_test(&put);
    t.add_covered_goal(3);
    let mut c = t.clone();
    assert_eq!(t.to_string(), c.to_string());
    assert_eq!(c.covered_goals(), t.covered_goals());

    c.statement_mut(0)
        .set_primitive(PrimitiveValue::Int(IntKind::I32, 99));
    c.remove_statement_hard(1);
    assert_ne!(t.to_string(), c.to_string());
    assert_eq!(t.len(), 6);
    assert_eq!(validate_test(&put.catalog, &t), Ok(()));
    assert_eq!(validate_test(&put.catalog, &c), Ok(()));
}
