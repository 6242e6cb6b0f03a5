// SPDX-License-Identifier: Apache-2.0

//! End-to-end search over real harness runs: branch-distance guided local
//! search, a generational mutate-and-keep loop, and post-search
//! minimization, all against the sample account program.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

use testsynth_exec::harness::{RunSpec, TestExecutor};
use testsynth_exec::objective::{FitnessObjective, MinimizingObjective};
use testsynth_exec::test_utils::account_put;
use testsynth_search::insert::insert_random_call;
use testsynth_search::local::{search_test, LocalSearchConfig};
use testsynth_search::minimize::minimize_to_fixpoint;
use testsynth_search::mutate::{mutate_random_statement, MutationConfig};
use testsynth_search::pool::ConstantPool;
use testsynth_tc::test::{Statement, TestCase, VarRef};
use testsynth_tc::types::IntKind;
use testsynth_tc::validate::validate_test;
use testsynth_tc::value::PrimitiveValue;

fn int64(v: i64) -> Statement {
    Statement::primitive(PrimitiveValue::Int(IntKind::I64, v))
}

#[test]
fn branch_distance_guides_local_search_to_the_true_branch() {
    let put = account_put();
    let catalog = put.registry.catalog_arc();
    // deposit(0) takes branch 1 (`amount > 0`) on the false side.
    let mut t = TestCase::new();
    t.push_statement(int64(10));
    t.push_statement(Statement::construct(&catalog, put.ctor, vec![VarRef::Pos(0)]));
    t.push_statement(int64(0));
    t.push_statement(Statement::call(
        &catalog,
        put.deposit,
        Some(VarRef::Pos(1)),
        vec![VarRef::Pos(2)],
    ));

    let mut exec = TestExecutor::new(put.registry.clone());
    let spec = RunSpec::default();
    let mut obj = MinimizingObjective::new(move |t: &TestCase| {
        let result = exec.run(t, &spec).expect("engine stays healthy");
        result.trace.distance_true(1).unwrap_or(f64::INFINITY)
    });
    let cfg = LocalSearchConfig::default();
    assert!(search_test(&catalog, &mut t, &mut obj, &cfg));
    assert_eq!(obj.best(), 0.0);

    // The argument may have been climbed in place or rebound to another
    // literal; either way the value flowing into deposit is now positive.
    let call = t.len() - 1;
    let amount_pos = t.statement(call).reads()[1].defining_pos();
    let amount = t
        .statement(amount_pos)
        .as_primitive()
        .unwrap()
        .as_ordinal()
        .unwrap();
    assert!(amount > 0, "amount {} should be positive", amount);
}

#[test]
fn generational_loop_accumulates_branch_coverage() {
    let put = account_put();
    let catalog = put.registry.catalog_arc();
    let pool = ConstantPool::with_defaults();
    let mutation = MutationConfig::default();
    let mut rng = Pcg64Mcg::seed_from_u64(0x5eed);

    let mut exec = TestExecutor::new(put.registry.clone());
    let spec = RunSpec::default().with_keep_going(true);
    // More reached branches is better; failures do not disqualify a test.
    let mut obj = MinimizingObjective::new(move |t: &TestCase| {
        let result = exec.run(t, &spec).expect("engine stays healthy");
        -(result.trace.branch_ids().count() as f64)
    });

    let mut best = TestCase::new();
    obj.observe(&best);
    for _ in 0..30 {
        let mut candidate = best.clone();
        if candidate.is_empty() || rng.gen_bool(0.5) {
            insert_random_call(&catalog, &mut candidate, &pool, &mutation, &mut rng);
        } else {
            mutate_random_statement(&catalog, &mut candidate, &pool, &mutation, &mut rng);
        }
        assert_eq!(validate_test(&catalog, &candidate), Ok(()));
        if obj.has_improved(&candidate) {
            best = candidate;
        }
    }
    assert!(!best.is_empty());
    assert!(obj.best() <= -1.0, "no branch ever reached: {}", obj.best());
}

#[test]
fn minimization_drops_padding_without_losing_the_covered_branch() {
    let put = account_put();
    let catalog = put.registry.catalog_arc();
    let mut t = TestCase::new();
    t.push_statement(int64(50));
    t.push_statement(int64(123)); // dead
    t.push_statement(Statement::construct(&catalog, put.ctor, vec![VarRef::Pos(0)]));
    t.push_statement(int64(7));
    t.push_statement(Statement::call(
        &catalog,
        put.deposit,
        Some(VarRef::Pos(2)),
        vec![VarRef::Pos(3)],
    ));
    t.push_statement(Statement::field_read(&catalog, VarRef::Pos(2), put.balance)); // dead

    let mut exec = TestExecutor::new(put.registry.clone());
    let spec = RunSpec::default();
    let mut obj = MinimizingObjective::new(move |t: &TestCase| {
        let result = exec.run(t, &spec).expect("engine stays healthy");
        if result.trace.distance_true(1) == Some(0.0) {
            0.0
        } else {
            1.0
        }
    });
    let removed = minimize_to_fixpoint(&catalog, &mut t, &mut obj);
    assert!(removed >= 2, "only {} statements removed", removed);
    assert_eq!(validate_test(&catalog, &t), Ok(()));
    assert_eq!(obj.best(), 0.0);
}
