// SPDX-License-Identifier: Apache-2.0

//! Single-point crossover over statement sequences.
//!
//! The offspring is one parent's prefix followed by the other parent's
//! suffix. Suffix references into the kept suffix are shifted; references
//! into the donor's dropped prefix are repaired deterministically, rebinding
//! to the best compatible value already in the offspring (smallest distance,
//! ties to the closest position). A statement with an unrepairable reference
//! is dropped, and that drop propagates through the rest of the suffix.

use rand::Rng;

use testsynth_tc::catalog::Catalog;
use testsynth_tc::test::{StatementKind, TestCase, VarRef};
use testsynth_tc::types::Type;

/// Crosses two parents at independently chosen cut points, yielding both
/// offspring: `a`-prefix with `b`-suffix and the converse.
pub fn crossover(
    catalog: &Catalog,
    a: &TestCase,
    b: &TestCase,
    rng: &mut impl Rng,
) -> (TestCase, TestCase) {
    let cut_a = rng.gen_range(0..=a.len());
    let cut_b = rng.gen_range(0..=b.len());
    (
        splice(catalog, a, cut_a, b, cut_b),
        splice(catalog, b, cut_b, a, cut_a),
    )
}

/// `head[..cut_head]` followed by `tail[cut_tail..]`, repaired.
pub fn splice(
    catalog: &Catalog,
    head: &TestCase,
    cut_head: usize,
    tail: &TestCase,
    cut_tail: usize,
) -> TestCase {
    assert!(cut_head <= head.len() && cut_tail <= tail.len());
    let mut child = TestCase::new();
    for s in &head.statements()[..cut_head] {
        child.push_statement(s.clone());
    }

    // Donor position -> offspring position, for kept suffix statements.
    let mut remap: Vec<Option<usize>> = vec![None; tail.len()];
    'suffix: for (i, s) in tail.statements().iter().enumerate().skip(cut_tail) {
        let mut copy = s.clone();
        for r in copy.reads_mut() {
            let base = r.defining_pos();
            let target = if base >= cut_tail {
                // From inside the suffix: follows its producer, or dies with
                // a producer that was dropped.
                match remap[base] {
                    Some(p) => p,
                    None => continue 'suffix,
                }
            } else {
                match repair_target(catalog, tail, r, &child) {
                    Some(p) => p,
                    None => {
                        log::trace!(
                            "crossover drops donor statement {}: no repair for {}",
                            i,
                            r
                        );
                        continue 'suffix;
                    }
                }
            };
            rebase(r, target);
        }
        let pos = child.push_statement(copy);
        remap[i] = Some(pos);
    }

    for &g in head.covered_goals() {
        child.add_covered_goal(g);
    }
    for &g in tail.covered_goals() {
        child.add_covered_goal(g);
    }
    child
}

/// Best offspring position the dangling reference `r` can rebind to, given
/// the declared type it had in the donor. Element references additionally
/// require the replacement array to cover the index.
fn repair_target(
    catalog: &Catalog,
    donor: &TestCase,
    r: &VarRef,
    child: &TestCase,
) -> Option<usize> {
    let needed = match r {
        VarRef::Pos(p) => donor.statement(*p).ret_ty.clone(),
        VarRef::Field { field, .. } => Type::Class(catalog.get_field(*field)?.owner),
        VarRef::Elem { base, .. } => donor.statement(*base).ret_ty.clone(),
    };
    child
        .compatible_values_before(catalog, &needed, child.len())
        .into_iter()
        .filter(|&p| match r {
            VarRef::Elem { index, .. } => match &child.statement(p).kind {
                StatementKind::NewArray { len, .. } => *index < *len,
                _ => false,
            },
            _ => true,
        })
        .min_by_key(|&p| (child.statement(p).distance, usize::MAX - p))
}

fn rebase(r: &mut VarRef, new_base: usize) {
    match r {
        VarRef::Pos(p) => *p = new_base,
        VarRef::Field { base, .. } => *base = new_base,
        VarRef::Elem { base, .. } => *base = new_base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;
    use testsynth_tc::catalog::{CatalogBuilder, FieldId, MemberId};
    use testsynth_tc::test::Statement;
    use testsynth_tc::types::IntKind;
    use testsynth_tc::validate::validate_test;
    use testsynth_tc::value::PrimitiveValue;

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

    fn account_test(fx: &Fixture, amount: i64) -> TestCase {
        let mut t = TestCase::new();
        t.push_statement(int64(amount));
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
        t
    }

    #[test]
    fn suffix_references_are_repaired_onto_the_prefix() {
        let fx = fixture();
        let a = account_test(&fx, 10);
        let b = account_test(&fx, 99);
        // Keep a's first two statements, then b's call and field read; both
        // of b's dropped producers (the literal and the constructor) must be
        // repaired onto a's.
        let child = splice(&fx.catalog, &a, 2, &b, 2);
        assert_eq!(child.len(), 4);
        assert_eq!(validate_test(&fx.catalog, &child), Ok(()));
        assert_eq!(
            child.statement(2).reads(),
            vec![&VarRef::Pos(1), &VarRef::Pos(0)]
        );
        assert_eq!(child.statement(3).reads(), vec![&VarRef::Pos(1)]);
    }

    #[test]
    fn unrepairable_statements_drop_and_propagate() {
        let fx = fixture();
        let a = {
            let mut t = TestCase::new();
            t.push_statement(int64(1));
            t
        };
        let b = account_test(&fx, 5);
        // No Account in a's prefix: b's call and field read cannot repair
        // their receiver, so only a's literal remains.
        let child = splice(&fx.catalog, &a, 1, &b, 2);
        assert_eq!(validate_test(&fx.catalog, &child), Ok(()));
        assert_eq!(child.len(), 1);

        // Empty prefix and a suffix whose constructor cannot be repaired:
        // the drop propagates through every statement chained on it.
        let empty = TestCase::new();
        let child = splice(&fx.catalog, &empty, 0, &b, 1);
        assert_eq!(child.len(), 0);
    }

    #[test]
    fn kept_suffix_chains_follow_their_producers() {
        let fx = fixture();
        let a = TestCase::new();
        let b = account_test(&fx, 5);
        // Empty prefix, whole suffix: the offspring is b with positions
        // compacted from zero.
        let child = splice(&fx.catalog, &a, 0, &b, 0);
        assert_eq!(child.to_string(), b.to_string());
    }

    #[test]
    fn covered_goals_union_across_parents() {
        let fx = fixture();
        let mut a = account_test(&fx, 1);
        let mut b = account_test(&fx, 2);
        a.add_covered_goal(7);
        b.add_covered_goal(9);
        let child = splice(&fx.catalog, &a, 2, &b, 2);
        assert!(child.covered_goals().contains(&7));
        assert!(child.covered_goals().contains(&9));
    }

    #[test]
    fn random_cut_points_always_yield_well_formed_offspring() {
        let fx = fixture();
        let a = account_test(&fx, 3);
        let b = account_test(&fx, 4);
        for seed in 0..40 {
            let mut rng = Pcg64Mcg::seed_from_u64(seed);
            let (c1, c2) = crossover(&fx.catalog, &a, &b, &mut rng);
            assert_eq!(validate_test(&fx.catalog, &c1), Ok(()), "seed {}", seed);
            assert_eq!(validate_test(&fx.catalog, &c2), Ok(()), "seed {}", seed);
        }
    }
}
