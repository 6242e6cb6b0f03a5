// SPDX-License-Identifier: Apache-2.0

//! Structural mutations that grow or shrink a test: insert a call with
//! recursively constructed inputs, or gracefully delete a statement.
//!
//! Input construction prefers reusing in-scope values (biased toward
//! statements close to a search root) and otherwise builds producers inline,
//! bounded by `MutationConfig::max_insert_depth`. A failed construction is
//! rolled back statement by statement so the test is never left half-grown.

use rand::seq::SliceRandom;
use rand::Rng;

use testsynth_tc::catalog::{Catalog, MemberId};
use testsynth_tc::test::{GracefulRemoval, Statement, TestCase, VarRef};
use testsynth_tc::types::Type;
use testsynth_tc::value::PrimitiveValue;

use crate::mutate::{distance_weighted_pick, MutationConfig};
use crate::pool::ConstantPool;

/// Probability that an input is reused from scope when a compatible value
/// exists, rather than constructed fresh.
const REUSE_PROBABILITY: f64 = 0.7;

/// Inserts a call to a uniformly chosen catalog member at a random position,
/// constructing missing inputs. Returns the position of the inserted call,
/// or `None` when no member's signature could be satisfied.
pub fn insert_random_call(
    catalog: &Catalog,
    test: &mut TestCase,
    pool: &ConstantPool,
    cfg: &MutationConfig,
    rng: &mut impl Rng,
) -> Option<usize> {
    let mut members: Vec<MemberId> = catalog.member_ids().collect();
    members.shuffle(rng);
    let at = rng.gen_range(0..=test.len());
    for m in members {
        if let Some(pos) = insert_call(catalog, test, at, m, pool, cfg, rng) {
            return Some(pos);
        }
    }
    None
}

/// Inserts a call to `member` at `at`, constructing its receiver and
/// arguments as needed. Rolls the test back and returns `None` when an input
/// cannot be produced within the depth bound.
pub fn insert_call(
    catalog: &Catalog,
    test: &mut TestCase,
    at: usize,
    member: MemberId,
    pool: &ConstantPool,
    cfg: &MutationConfig,
    rng: &mut impl Rng,
) -> Option<usize> {
    let info = catalog.member(member).clone();
    let mut cursor = at;

    let receiver = if info.needs_receiver() {
        let owner = Type::Class(info.owner().expect("instance member has an owner"));
        match provide_input(
            catalog,
            test,
            &mut cursor,
            &owner,
            pool,
            cfg,
            cfg.max_insert_depth,
            1,
            rng,
        ) {
            Some(r) => Some(r),
            None => {
                rollback(test, at, cursor);
                return None;
            }
        }
    } else {
        None
    };

    let mut args = Vec::with_capacity(info.params.len());
    for p in &info.params {
        match provide_input(
            catalog,
            test,
            &mut cursor,
            p,
            pool,
            cfg,
            cfg.max_insert_depth,
            1,
            rng,
        ) {
            Some(r) => args.push(r),
            None => {
                rollback(test, at, cursor);
                return None;
            }
        }
    }

    let stmt = if info.is_constructor() {
        Statement::construct(catalog, member, args)
    } else {
        Statement::call(catalog, member, receiver, args)
    };
    test.insert_statement(cursor, stmt.with_distance(0));
    log::debug!(
        "inserted call to {} at position {}",
        catalog.member(member).name,
        cursor
    );
    Some(cursor)
}

/// Gracefully removes a uniformly chosen statement. `None` on an empty test.
pub fn delete_random_statement(
    catalog: &Catalog,
    test: &mut TestCase,
    rng: &mut impl Rng,
) -> Option<GracefulRemoval> {
    if test.is_empty() {
        return None;
    }
    let pos = rng.gen_range(0..test.len());
    let outcome = test.remove_statement_graceful(catalog, pos);
    log::debug!(
        "gracefully removed statement {}: {} gone, {} rebound",
        pos,
        outcome.removed.len(),
        outcome.rebound
    );
    Some(outcome)
}

/// Produces a reference to a value of `ty` usable at `*cursor`, preferring
/// reuse and otherwise constructing a producer via `create_value_of_type`.
#[allow(clippy::too_many_arguments)]
fn provide_input(
    catalog: &Catalog,
    test: &mut TestCase,
    cursor: &mut usize,
    ty: &Type,
    pool: &ConstantPool,
    cfg: &MutationConfig,
    depth: usize,
    distance: u32,
    rng: &mut impl Rng,
) -> Option<VarRef> {
    let candidates = test.compatible_values_before(catalog, ty, *cursor);
    if !candidates.is_empty() && rng.gen_bool(REUSE_PROBABILITY) {
        return distance_weighted_pick(test, &candidates, rng).map(VarRef::Pos);
    }
    match create_value_of_type(catalog, test, cursor, ty, pool, cfg, depth, distance, rng) {
        Some(r) => Some(r),
        // Construction failed; reuse is still better than nothing.
        None => distance_weighted_pick(test, &candidates, rng).map(VarRef::Pos),
    }
}

/// Builds a fresh producer statement for `ty` at `*cursor`, advancing the
/// cursor past everything inserted. Recursion is bounded by `depth`; a class
/// with no satisfiable constructor degrades to an explicit null.
#[allow(clippy::too_many_arguments)]
pub fn create_value_of_type(
    catalog: &Catalog,
    test: &mut TestCase,
    cursor: &mut usize,
    ty: &Type,
    pool: &ConstantPool,
    cfg: &MutationConfig,
    depth: usize,
    distance: u32,
    rng: &mut impl Rng,
) -> Option<VarRef> {
    if ty.is_void() {
        return None;
    }
    if ty.is_primitive() {
        let value = pool
            .sample(ty, rng)
            .or_else(|| PrimitiveValue::zero_of(ty))?;
        let pos = *cursor;
        test.insert_statement(pos, Statement::primitive(value).with_distance(distance));
        *cursor += 1;
        return Some(VarRef::Pos(pos));
    }
    match ty {
        Type::Array(elem) => {
            let len = rng.gen_range(0..=4.min(cfg.max_array_len));
            let pos = *cursor;
            test.insert_statement(
                pos,
                Statement::new_array((**elem).clone(), len).with_distance(distance),
            );
            *cursor += 1;
            Some(VarRef::Pos(pos))
        }
        Type::Class(class) => {
            if depth == 0 {
                return null_fallback(test, cursor, ty, distance);
            }
            let mut ctors = catalog.constructors_of(*class);
            ctors.shuffle(rng);
            for ctor in ctors {
                let start = *cursor;
                let params = catalog.member(ctor).params.clone();
                let mut args = Vec::with_capacity(params.len());
                let mut ok = true;
                for p in &params {
                    match provide_input(
                        catalog,
                        test,
                        cursor,
                        p,
                        pool,
                        cfg,
                        depth - 1,
                        distance + 1,
                        rng,
                    ) {
                        Some(r) => args.push(r),
                        None => {
                            ok = false;
                            break;
                        }
                    }
                }
                if !ok {
                    rollback(test, start, *cursor);
                    *cursor = start;
                    continue;
                }
                let pos = *cursor;
                test.insert_statement(
                    pos,
                    Statement::construct(catalog, ctor, args).with_distance(distance),
                );
                *cursor += 1;
                return Some(VarRef::Pos(pos));
            }
            null_fallback(test, cursor, ty, distance)
        }
        _ => None,
    }
}

fn null_fallback(
    test: &mut TestCase,
    cursor: &mut usize,
    ty: &Type,
    distance: u32,
) -> Option<VarRef> {
    if !ty.is_nullable() {
        return None;
    }
    let pos = *cursor;
    test.insert_statement(pos, Statement::null(ty.clone()).with_distance(distance));
    *cursor += 1;
    Some(VarRef::Pos(pos))
}

/// Removes everything inserted in `[from, to)`, highest position first so
/// each removal's dependent closure stays inside the block.
fn rollback(test: &mut TestCase, from: usize, to: usize) {
    let mut i = to;
    while i > from {
        i -= 1;
        if i < test.len() {
            test.remove_statement_hard(i);
        }
    }
}
