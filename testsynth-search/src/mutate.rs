// SPDX-License-Identifier: Apache-2.0

//! Change-mutations on single statements: perturb or resample a primitive,
//! rebind a call's receiver or parameter, swap a call for a compatible
//! alternative, resize an array. Insertion and deletion mutators live in
//! `insert`; all operators leave the test well-formed.

use rand::seq::SliceRandom;
use rand::Rng;

use testsynth_tc::catalog::{Catalog, MemberId};
use testsynth_tc::test::{Statement, StatementKind, TestCase, VarRef};
use testsynth_tc::types::Type;
use testsynth_tc::value::PrimitiveValue;

use crate::pool::ConstantPool;

#[derive(Debug, Clone)]
pub struct MutationConfig {
    /// Probability a primitive mutation resamples from the seed pool instead
    /// of perturbing the current value.
    pub pool_probability: f64,
    /// Bound on the random delta applied to integer-like primitives.
    pub max_int_delta: i64,
    /// Scale of the random delta applied to floats.
    pub float_sigma: f64,
    /// Share of call mutations that target the receiver rather than a
    /// parameter.
    pub receiver_bias: f64,
    /// Probability a call mutation tries to swap the member for a compatible
    /// alternative instead of rebinding an operand.
    pub replace_call_probability: f64,
    /// Probability a rebind picks explicit null over an in-scope value when
    /// the slot is nullable.
    pub null_probability: f64,
    pub max_array_len: usize,
    /// Recursion bound when insertion has to construct missing inputs.
    pub max_insert_depth: usize,
}

impl Default for MutationConfig {
    fn default() -> MutationConfig {
        MutationConfig {
            pool_probability: 0.3,
            max_int_delta: 20,
            float_sigma: 2.0,
            receiver_bias: 0.5,
            replace_call_probability: 0.25,
            null_probability: 0.1,
            max_array_len: 16,
            max_insert_depth: 3,
        }
    }
}

/// Mutates the statement at `pos` in place; false when the statement kind has
/// no applicable mutation (a null literal, a parameterless call with no
/// alternative).
pub fn mutate_statement(
    catalog: &Catalog,
    test: &mut TestCase,
    pos: usize,
    pool: &ConstantPool,
    cfg: &MutationConfig,
    rng: &mut impl Rng,
) -> bool {
    match &test.statement(pos).kind {
        StatementKind::Primitive(v) => {
            let v = v.clone();
            match mutate_primitive(catalog, &v, pool, cfg, rng) {
                Some(next) => test.statement_mut(pos).set_primitive(next),
                None => false,
            }
        }
        StatementKind::Null(_) => false,
        StatementKind::Construct { .. } | StatementKind::Call { .. } => {
            if rng.gen_bool(cfg.replace_call_probability)
                && replace_call(catalog, test, pos, rng)
            {
                return true;
            }
            mutate_call_operand(catalog, test, pos, cfg, rng)
        }
        StatementKind::FieldRead { .. } => rebind_slot(catalog, test, pos, 0, cfg, rng),
        StatementKind::NewArray { len, .. } => {
            let old = *len;
            let delta = rng.gen_range(1..=4);
            let new_len = if rng.gen_bool(0.5) {
                old.saturating_add(delta).min(cfg.max_array_len)
            } else {
                old.saturating_sub(delta)
            };
            resize_array(test, pos, new_len)
        }
        // The array operand stays put (rebinding it can invalidate the
        // index); only the stored value is rebindable.
        StatementKind::StoreIndex { .. } => rebind_slot(catalog, test, pos, 1, cfg, rng),
    }
}

/// Mutates a uniformly chosen statement; retries a few positions before
/// giving up on a test where nothing is mutable.
pub fn mutate_random_statement(
    catalog: &Catalog,
    test: &mut TestCase,
    pool: &ConstantPool,
    cfg: &MutationConfig,
    rng: &mut impl Rng,
) -> bool {
    if test.is_empty() {
        return false;
    }
    for _ in 0..4 {
        let pos = rng.gen_range(0..test.len());
        if mutate_statement(catalog, test, pos, pool, cfg, rng) {
            return true;
        }
    }
    false
}

/// One primitive mutation: pool resample or bounded random perturbation.
/// `None` when no different value can be produced.
pub fn mutate_primitive(
    catalog: &Catalog,
    value: &PrimitiveValue,
    pool: &ConstantPool,
    cfg: &MutationConfig,
    rng: &mut impl Rng,
) -> Option<PrimitiveValue> {
    if rng.gen_bool(cfg.pool_probability) {
        if let Some(sampled) = pool.sample(&value.ty(), rng) {
            if sampled != *value {
                return Some(sampled);
            }
        }
    }
    match value {
        PrimitiveValue::Bool(b) => Some(PrimitiveValue::Bool(!b)),
        PrimitiveValue::Int(k, v) => {
            let mut delta = rng.gen_range(-cfg.max_int_delta..=cfg.max_int_delta);
            if delta == 0 {
                delta = 1;
            }
            let next = k.clamp(v.saturating_add(delta));
            if next == *v {
                None
            } else {
                Some(PrimitiveValue::Int(*k, next))
            }
        }
        PrimitiveValue::Float(k, v) => {
            let delta = (rng.gen::<f64>() * 2.0 - 1.0) * cfg.float_sigma;
            let next = k.narrow(v + delta);
            if next == *v {
                None
            } else {
                Some(PrimitiveValue::Float(*k, next))
            }
        }
        PrimitiveValue::Char(c) => {
            let mut delta = rng.gen_range(-cfg.max_int_delta..=cfg.max_int_delta);
            if delta == 0 {
                delta = 1;
            }
            let code = (*c as i64).saturating_add(delta).clamp(1, 0xD7FF) as u32;
            char::from_u32(code)
                .filter(|next| next != c)
                .map(PrimitiveValue::Char)
        }
        PrimitiveValue::Str(s) => Some(PrimitiveValue::Str(mutate_string(s, rng))),
        PrimitiveValue::Enum(id, ord) => {
            let count = catalog.get_enum(*id).map(|e| e.variants.len()).unwrap_or(1);
            if count < 2 {
                return None;
            }
            let mut next = rng.gen_range(0..count);
            if next == *ord {
                next = (next + 1) % count;
            }
            Some(PrimitiveValue::Enum(*id, next))
        }
    }
}

fn mutate_string(s: &str, rng: &mut impl Rng) -> String {
    let mut chars: Vec<char> = s.chars().collect();
    let roll = rng.gen_range(0..3);
    if roll == 0 && !chars.is_empty() {
        chars.remove(rng.gen_range(0..chars.len()));
    } else if roll == 1 && !chars.is_empty() {
        let i = rng.gen_range(0..chars.len());
        chars[i] = random_char(rng);
    } else {
        let i = rng.gen_range(0..=chars.len());
        chars.insert(i, random_char(rng));
    }
    chars.into_iter().collect()
}

fn random_char(rng: &mut impl Rng) -> char {
    char::from_u32(rng.gen_range(0x20..0x7F)).unwrap_or('a')
}

/// Declared types of the statement's read slots, in `reads()` order.
pub fn slot_types(catalog: &Catalog, test: &TestCase, pos: usize) -> Vec<Type> {
    let s = test.statement(pos);
    match &s.kind {
        StatementKind::Primitive(_) | StatementKind::Null(_) | StatementKind::NewArray { .. } => {
            Vec::new()
        }
        StatementKind::Construct { ctor, .. } => catalog.member(*ctor).params.clone(),
        StatementKind::Call {
            member, receiver, ..
        } => {
            let info = catalog.member(*member);
            let mut out = Vec::new();
            if receiver.is_some() {
                let owner = info.owner().expect("instance member has an owner");
                out.push(Type::Class(owner));
            }
            out.extend(info.params.iter().cloned());
            out
        }
        StatementKind::FieldRead { field, .. } => {
            vec![Type::Class(catalog.field(*field).owner)]
        }
        StatementKind::StoreIndex { array, .. } => {
            let arr_ty = test.type_of(catalog, array).unwrap_or(Type::Void);
            let elem = arr_ty.elem_type().cloned().unwrap_or(Type::Void);
            vec![arr_ty, elem]
        }
    }
}

/// Picks among candidate producer positions, biased toward statements closer
/// to a search root (smaller distance).
pub fn distance_weighted_pick(
    test: &TestCase,
    candidates: &[usize],
    rng: &mut impl Rng,
) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }
    let weights: Vec<f64> = candidates
        .iter()
        .map(|&p| 1.0 / (1.0 + test.statement(p).distance as f64))
        .collect();
    let total: f64 = weights.iter().sum();
    let mut roll = rng.gen::<f64>() * total;
    for (i, w) in weights.iter().enumerate() {
        roll -= w;
        if roll <= 0.0 {
            return Some(candidates[i]);
        }
    }
    candidates.last().copied()
}

/// Rebinds read slot `slot` of the statement at `pos` to another compatible
/// in-scope value or (for nullable slots) an explicit null.
pub fn rebind_slot(
    catalog: &Catalog,
    test: &mut TestCase,
    pos: usize,
    slot: usize,
    cfg: &MutationConfig,
    rng: &mut impl Rng,
) -> bool {
    let types = slot_types(catalog, test, pos);
    let Some(ty) = types.get(slot).cloned() else {
        return false;
    };
    if ty.is_void() {
        return false;
    }
    let current = test.statement(pos).reads()[slot].clone();
    let mut candidates = test.compatible_values_before(catalog, &ty, pos);
    candidates.retain(|&p| VarRef::Pos(p) != current);

    let try_null = ty.is_nullable()
        && (candidates.is_empty() || rng.gen_bool(cfg.null_probability))
        && !matches!(current, VarRef::Pos(p) if matches!(test.statement(p).kind, StatementKind::Null(_)));
    if try_null {
        test.insert_statement(pos, Statement::null(ty));
        *test.statement_mut(pos + 1).reads_mut()[slot] = VarRef::Pos(pos);
        return true;
    }
    match distance_weighted_pick(test, &candidates, rng) {
        Some(p) => {
            log::trace!("rebinding slot {} of statement {} to v{}", slot, pos, p);
            *test.statement_mut(pos).reads_mut()[slot] = VarRef::Pos(p);
            true
        }
        None => false,
    }
}

/// Mutates one operand of a call-like statement, preferring the receiver
/// with probability `receiver_bias`.
fn mutate_call_operand(
    catalog: &Catalog,
    test: &mut TestCase,
    pos: usize,
    cfg: &MutationConfig,
    rng: &mut impl Rng,
) -> bool {
    let n_slots = test.statement(pos).reads().len();
    if n_slots == 0 {
        return false;
    }
    let has_receiver = matches!(
        &test.statement(pos).kind,
        StatementKind::Call { receiver: Some(_), .. }
    );
    let slot = if has_receiver && (n_slots == 1 || rng.gen_bool(cfg.receiver_bias)) {
        0
    } else {
        let first_param = usize::from(has_receiver);
        rng.gen_range(first_param..n_slots)
    };
    rebind_slot(catalog, test, pos, slot, cfg, rng)
}

/// Swaps the member of a call/construct statement for a compatible
/// alternative whose signature can be satisfied from values already in
/// scope. The return type must stay assignable wherever the old result is
/// used.
fn replace_call(
    catalog: &Catalog,
    test: &mut TestCase,
    pos: usize,
    rng: &mut impl Rng,
) -> bool {
    let (old_member, is_ctor) = match &test.statement(pos).kind {
        StatementKind::Construct { ctor, .. } => (*ctor, true),
        StatementKind::Call { member, .. } => (*member, false),
        _ => return false,
    };
    let old_ret = test.statement(pos).ret_ty.clone();
    let has_users = !test.users_of(pos).is_empty();

    let mut options: Vec<MemberId> = Vec::new();
    for m in catalog.member_ids() {
        if m == old_member {
            continue;
        }
        let info = catalog.member(m);
        if info.is_constructor() != is_ctor {
            continue;
        }
        let new_ret = info.ret.clone().unwrap_or(Type::Void);
        if has_users && new_ret != old_ret {
            continue;
        }
        if info.needs_receiver()
            && test
                .compatible_values_before(
                    catalog,
                    &Type::Class(info.owner().expect("instance member has an owner")),
                    pos,
                )
                .is_empty()
        {
            continue;
        }
        if info
            .params
            .iter()
            .any(|p| test.compatible_values_before(catalog, p, pos).is_empty())
        {
            continue;
        }
        options.push(m);
    }
    let Some(&chosen) = options.choose(rng) else {
        return false;
    };
    let info = catalog.member(chosen).clone();
    let receiver = if info.needs_receiver() {
        let owner = Type::Class(info.owner().expect("instance member has an owner"));
        let cands = test.compatible_values_before(catalog, &owner, pos);
        Some(VarRef::Pos(
            distance_weighted_pick(test, &cands, rng).expect("checked above"),
        ))
    } else {
        None
    };
    let mut args = Vec::with_capacity(info.params.len());
    for p in &info.params {
        let cands = test.compatible_values_before(catalog, p, pos);
        args.push(VarRef::Pos(
            distance_weighted_pick(test, &cands, rng).expect("checked above"),
        ));
    }
    let new_ret = info.ret.clone().unwrap_or(Type::Void);
    let stmt = test.statement_mut(pos);
    stmt.kind = if is_ctor {
        StatementKind::Construct { ctor: chosen, args }
    } else {
        StatementKind::Call {
            member: chosen,
            receiver,
            args,
        }
    };
    stmt.ret_ty = new_ret;
    log::trace!("replaced member of statement {} with m{}", pos, chosen.0);
    true
}

/// Resizes the array literal at `pos`, first removing statements that touch
/// cells a shrink would truncate. False when `pos` is not an array creation
/// or the length already matches.
pub fn resize_array(test: &mut TestCase, pos: usize, new_len: usize) -> bool {
    let old_len = match &test.statement(pos).kind {
        StatementKind::NewArray { len, .. } => *len,
        _ => return false,
    };
    if new_len == old_len {
        return false;
    }
    if new_len < old_len {
        let mut i = test.len();
        while i > pos + 1 {
            i -= 1;
            if i >= test.len() {
                continue;
            }
            if reads_truncated_cell(test.statement(i), pos, new_len) {
                test.remove_statement_hard(i);
            }
        }
    }
    if let StatementKind::NewArray { len, .. } = &mut test.statement_mut(pos).kind {
        *len = new_len;
    }
    true
}

fn reads_truncated_cell(stmt: &Statement, array_pos: usize, new_len: usize) -> bool {
    if let StatementKind::StoreIndex { array, index, .. } = &stmt.kind {
        if *array == VarRef::Pos(array_pos) && *index >= new_len {
            return true;
        }
    }
    stmt.reads()
        .iter()
        .any(|r| matches!(r, VarRef::Elem { base, index } if *base == array_pos && *index >= new_len))
}
