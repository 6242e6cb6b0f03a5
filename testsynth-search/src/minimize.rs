// SPDX-License-Identifier: Apache-2.0

//! Post-search minimization: gracefully remove statements one at a time,
//! keeping each removal only if the objective does not worsen. Removals run
//! highest position first so a kept removal never shifts positions the pass
//! has yet to visit.

use testsynth_exec::objective::FitnessObjective;
use testsynth_tc::catalog::Catalog;
use testsynth_tc::test::TestCase;

/// One minimization pass. Returns the number of statements removed.
pub fn minimize(
    catalog: &Catalog,
    test: &mut TestCase,
    objective: &mut dyn FitnessObjective,
) -> usize {
    objective.has_not_worsened(test);
    let before = test.len();
    let mut pos = test.len();
    while pos > 0 {
        pos -= 1;
        if pos >= test.len() {
            continue;
        }
        let snapshot = test.clone();
        let outcome = test.remove_statement_graceful(catalog, pos);
        if objective.has_not_worsened(test) {
            log::trace!(
                "minimization kept removal of statement {} ({} gone, {} rebound)",
                pos,
                outcome.removed.len(),
                outcome.rebound
            );
        } else {
            *test = snapshot;
        }
    }
    before - test.len()
}

/// Repeats `minimize` until a pass removes nothing.
pub fn minimize_to_fixpoint(
    catalog: &Catalog,
    test: &mut TestCase,
    objective: &mut dyn FitnessObjective,
) -> usize {
    let mut total = 0;
    loop {
        let removed = minimize(catalog, test, objective);
        if removed == 0 {
            return total;
        }
        total += removed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testsynth_exec::objective::MinimizingObjective;
    use testsynth_tc::catalog::CatalogBuilder;
    use testsynth_tc::test::{Statement, StatementKind, VarRef};
    use testsynth_tc::types::{IntKind, Type};
    use testsynth_tc::validate::validate_test;
    use testsynth_tc::value::PrimitiveValue;

    #[test]
    fn dead_statements_go_and_the_covering_chain_stays() {
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
        let catalog = b.build();

        let mut t = TestCase::new();
        t.push_statement(Statement::primitive(PrimitiveValue::Int(IntKind::I64, 7)));
        // Dead literal nothing reads.
        t.push_statement(Statement::primitive(PrimitiveValue::Int(IntKind::I64, 99)));
        t.push_statement(Statement::construct(&catalog, ctor, vec![VarRef::Pos(0)]));
        t.push_statement(Statement::call(
            &catalog,
            deposit,
            Some(VarRef::Pos(2)),
            vec![VarRef::Pos(0)],
        ));
        // Dead field read after the call.
        t.push_statement(Statement::field_read(&catalog, VarRef::Pos(2), balance));

        // Fitness cares only that some deposit call remains.
        let mut obj = MinimizingObjective::new(|t: &TestCase| {
            let has_call = t
                .statements()
                .iter()
                .any(|s| matches!(s.kind, StatementKind::Call { .. }));
            if has_call {
                0.0
            } else {
                1.0
            }
        });
        let removed = minimize_to_fixpoint(&catalog, &mut t, &mut obj);
        assert_eq!(removed, 2);
        assert_eq!(t.len(), 3);
        assert_eq!(validate_test(&catalog, &t), Ok(()));
        assert!(t
            .statements()
            .iter()
            .any(|s| matches!(s.kind, StatementKind::Call { .. })));
    }

    #[test]
    fn nothing_is_removed_when_every_statement_matters() {
        let catalog = CatalogBuilder::new().build();
        let mut t = TestCase::new();
        t.push_statement(Statement::primitive(PrimitiveValue::Int(IntKind::I64, 1)));
        t.push_statement(Statement::primitive(PrimitiveValue::Int(IntKind::I64, 2)));
        let before = t.clone();
        let mut obj = MinimizingObjective::new(|t: &TestCase| -(t.len() as f64));
        assert_eq!(minimize(&catalog, &mut t, &mut obj), 0);
        assert_eq!(t, before);
    }
}
