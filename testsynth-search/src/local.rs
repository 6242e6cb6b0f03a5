// SPDX-License-Identifier: Apache-2.0

//! Statement-level local search under a `FitnessObjective`.
//!
//! Every strategy is trial based: apply a candidate edit, ask the objective
//! whether the test strictly improved, and undo the edit otherwise, so a
//! search pass can only ever leave the test at least as fit as it found it.
//! Integer-like primitives use exponential hill climbing (probe one step in
//! each direction, then double the step while it keeps improving), floats add
//! a fractional refinement phase, strings shrink then climb per character,
//! arrays climb on their length, and reference slots try null and every
//! compatible alternative.

use testsynth_exec::objective::FitnessObjective;
use testsynth_tc::catalog::Catalog;
use testsynth_tc::test::{Statement, StatementKind, TestCase, VarRef};
use testsynth_tc::types::{FloatKind, IntKind, Type};
use testsynth_tc::value::PrimitiveValue;

use crate::mutate::{resize_array, slot_types};

#[derive(Debug, Clone)]
pub struct LocalSearchConfig {
    /// Objective evaluations a single statement's search may spend.
    pub max_trials_per_statement: usize,
    /// Halvings of the fractional step in the float refinement phase.
    pub float_refinements: u32,
    /// Longest string the grow strategy will produce.
    pub max_string_len: usize,
}

impl Default for LocalSearchConfig {
    fn default() -> LocalSearchConfig {
        LocalSearchConfig {
            max_trials_per_statement: 512,
            float_refinements: 16,
            max_string_len: 32,
        }
    }
}

struct Trials {
    left: usize,
}

impl Trials {
    fn spend(&mut self) -> bool {
        if self.left == 0 {
            return false;
        }
        self.left -= 1;
        true
    }
}

/// One local-search pass over every statement, back to front. Returns
/// whether any statement improved the objective. The objective's baseline is
/// seeded from the test's current fitness, so a pass never keeps a
/// regression.
pub fn search_test(
    catalog: &Catalog,
    test: &mut TestCase,
    objective: &mut dyn FitnessObjective,
    cfg: &LocalSearchConfig,
) -> bool {
    objective.has_not_worsened(test);
    let mut improved = false;
    let mut pos = test.len();
    while pos > 0 {
        pos -= 1;
        if pos >= test.len() {
            continue;
        }
        improved |= search_statement_seeded(catalog, test, pos, objective, cfg);
    }
    improved
}

/// Local search on the single statement at `pos`.
pub fn search_statement(
    catalog: &Catalog,
    test: &mut TestCase,
    pos: usize,
    objective: &mut dyn FitnessObjective,
    cfg: &LocalSearchConfig,
) -> bool {
    objective.has_not_worsened(test);
    search_statement_seeded(catalog, test, pos, objective, cfg)
}

fn search_statement_seeded(
    catalog: &Catalog,
    test: &mut TestCase,
    pos: usize,
    objective: &mut dyn FitnessObjective,
    cfg: &LocalSearchConfig,
) -> bool {
    let mut trials = Trials {
        left: cfg.max_trials_per_statement,
    };
    match test.statement(pos).kind.clone() {
        StatementKind::Primitive(PrimitiveValue::Bool(b)) => try_primitive(
            test,
            pos,
            PrimitiveValue::Bool(!b),
            objective,
            &mut trials,
        ),
        StatementKind::Primitive(PrimitiveValue::Int(k, v)) => climb_ordinal(
            test,
            pos,
            v,
            &|o| Some(PrimitiveValue::Int(k, k.clamp(o))),
            objective,
            &mut trials,
        ),
        StatementKind::Primitive(PrimitiveValue::Char(c)) => climb_ordinal(
            test,
            pos,
            c as i64,
            &|o| {
                u32::try_from(o)
                    .ok()
                    .filter(|&u| (1..=0xD7FF).contains(&u))
                    .and_then(char::from_u32)
                    .map(PrimitiveValue::Char)
            },
            objective,
            &mut trials,
        ),
        StatementKind::Primitive(PrimitiveValue::Enum(id, ord)) => {
            let count = catalog.get_enum(id).map(|e| e.variants.len()).unwrap_or(1) as i64;
            climb_ordinal(
                test,
                pos,
                ord as i64,
                &|o| {
                    (0..count)
                        .contains(&o)
                        .then(|| PrimitiveValue::Enum(id, o as usize))
                },
                objective,
                &mut trials,
            )
        }
        StatementKind::Primitive(PrimitiveValue::Float(k, v)) => {
            search_float(test, pos, k, v, objective, cfg, &mut trials)
        }
        StatementKind::Primitive(PrimitiveValue::Str(s)) => {
            search_string(test, pos, s, objective, cfg, &mut trials)
        }
        StatementKind::Null(_) => false,
        StatementKind::NewArray { len, .. } => {
            search_array_len(test, pos, len, objective, &mut trials)
        }
        StatementKind::Construct { .. }
        | StatementKind::Call { .. }
        | StatementKind::FieldRead { .. }
        | StatementKind::StoreIndex { .. } => {
            search_references(catalog, test, pos, objective, &mut trials)
        }
    }
}

/// Overwrites the primitive at `pos` and keeps the change only on strict
/// improvement.
fn try_primitive(
    test: &mut TestCase,
    pos: usize,
    value: PrimitiveValue,
    objective: &mut dyn FitnessObjective,
    trials: &mut Trials,
) -> bool {
    let Some(old) = test.statement(pos).as_primitive().cloned() else {
        return false;
    };
    if value == old || !trials.spend() {
        return false;
    }
    test.statement_mut(pos).set_primitive(value);
    if objective.has_improved(test) {
        true
    } else {
        test.statement_mut(pos).set_primitive(old);
        false
    }
}

/// Structural trial: apply an arbitrary edit, keep it only on strict
/// improvement. The whole test is snapshotted because the edit may insert or
/// remove statements.
fn try_edit(
    test: &mut TestCase,
    objective: &mut dyn FitnessObjective,
    trials: &mut Trials,
    apply: impl FnOnce(&mut TestCase) -> bool,
) -> bool {
    if !trials.spend() {
        return false;
    }
    let snapshot = test.clone();
    if !apply(test) {
        *test = snapshot;
        return false;
    }
    if objective.has_improved(test) {
        true
    } else {
        *test = snapshot;
        false
    }
}

/// Exponential hill climbing on an integer-valued ordinal. `make` maps an
/// ordinal to the candidate primitive, or `None` outside the valid range.
fn climb_ordinal(
    test: &mut TestCase,
    pos: usize,
    start: i64,
    make: &dyn Fn(i64) -> Option<PrimitiveValue>,
    objective: &mut dyn FitnessObjective,
    trials: &mut Trials,
) -> bool {
    let mut current = start;
    let mut improved_any = false;
    loop {
        let mut direction = 0i64;
        for d in [1i64, -1] {
            let Some(candidate) = make(current + d) else {
                continue;
            };
            if try_primitive(test, pos, candidate, objective, trials) {
                direction = d;
                break;
            }
        }
        if direction == 0 {
            return improved_any;
        }
        improved_any = true;
        current += direction;
        let mut step = 2i64;
        loop {
            let next = current.saturating_add(direction.saturating_mul(step));
            let Some(candidate) = make(next) else {
                break;
            };
            if !try_primitive(test, pos, candidate, objective, trials) {
                break;
            }
            current = next;
            step = step.saturating_mul(2);
        }
        if trials.left == 0 {
            return improved_any;
        }
    }
}

/// Two-phase float search: exponential climbing on whole-number steps, then
/// a fractional refinement with a halving step.
fn search_float(
    test: &mut TestCase,
    pos: usize,
    kind: FloatKind,
    start: f64,
    objective: &mut dyn FitnessObjective,
    cfg: &LocalSearchConfig,
    trials: &mut Trials,
) -> bool {
    let mut improved_any = false;
    let mut current = start;

    // Phase 1: whole-number climbing.
    loop {
        let mut direction = 0.0f64;
        for d in [1.0f64, -1.0] {
            if try_primitive(
                test,
                pos,
                PrimitiveValue::Float(kind, kind.narrow(current + d)),
                objective,
                trials,
            ) {
                direction = d;
                break;
            }
        }
        if direction == 0.0 {
            break;
        }
        improved_any = true;
        current += direction;
        let mut step = 2.0f64;
        while step.is_finite()
            && try_primitive(
                test,
                pos,
                PrimitiveValue::Float(kind, kind.narrow(current + direction * step)),
                objective,
                trials,
            )
        {
            current += direction * step;
            step *= 2.0;
        }
        if trials.left == 0 {
            return improved_any;
        }
    }

    // Phase 2: fractional refinement.
    let mut delta = 0.5f64;
    for _ in 0..cfg.float_refinements {
        let mut moved = false;
        for d in [delta, -delta] {
            while try_primitive(
                test,
                pos,
                PrimitiveValue::Float(kind, kind.narrow(current + d)),
                objective,
                trials,
            ) {
                current += d;
                improved_any = true;
                moved = true;
            }
        }
        if !moved {
            delta /= 2.0;
        }
        if trials.left == 0 {
            break;
        }
    }
    improved_any
}

/// String search: drop characters back to front, climb each remaining
/// character's code point, then try growing by one climbed character.
fn search_string(
    test: &mut TestCase,
    pos: usize,
    start: String,
    objective: &mut dyn FitnessObjective,
    cfg: &LocalSearchConfig,
    trials: &mut Trials,
) -> bool {
    let mut improved_any = false;
    let mut chars: Vec<char> = start.chars().collect();

    let mut i = chars.len();
    while i > 0 {
        i -= 1;
        let mut shorter = chars.clone();
        shorter.remove(i);
        if try_primitive(
            test,
            pos,
            PrimitiveValue::Str(shorter.iter().collect()),
            objective,
            trials,
        ) {
            chars.remove(i);
            improved_any = true;
        }
    }

    for i in 0..chars.len() {
        improved_any |= climb_string_char(test, pos, &mut chars, i, objective, trials);
        if trials.left == 0 {
            return improved_any;
        }
    }

    while chars.len() < cfg.max_string_len {
        let mut longer = chars.clone();
        longer.push('a');
        if !try_primitive(
            test,
            pos,
            PrimitiveValue::Str(longer.iter().collect()),
            objective,
            trials,
        ) {
            // Growth that does not pay for itself immediately may still pay
            // after the new character is climbed.
            test.statement_mut(pos)
                .set_primitive(PrimitiveValue::Str(longer.iter().collect()));
            let appended = longer.len() - 1;
            if climb_string_char(test, pos, &mut longer, appended, objective, trials) {
                chars = longer;
                improved_any = true;
                continue;
            }
            test.statement_mut(pos)
                .set_primitive(PrimitiveValue::Str(chars.iter().collect()));
            break;
        }
        chars = longer;
        improved_any = true;
    }
    improved_any
}

fn climb_string_char(
    test: &mut TestCase,
    pos: usize,
    chars: &mut [char],
    i: usize,
    objective: &mut dyn FitnessObjective,
    trials: &mut Trials,
) -> bool {
    let owned: Vec<char> = chars.to_vec();
    let start = owned[i] as i64;
    let make = move |o: i64| {
        u32::try_from(o)
            .ok()
            .filter(|&u| (1..=0xD7FF).contains(&u))
            .and_then(char::from_u32)
            .map(|c| {
                let mut s = owned.clone();
                s[i] = c;
                PrimitiveValue::Str(s.iter().collect())
            })
    };
    let improved = climb_ordinal(test, pos, start, &make, objective, trials);
    if improved {
        // Read the kept character back out of the statement.
        if let Some(PrimitiveValue::Str(s)) = test.statement(pos).as_primitive() {
            if let Some(c) = s.chars().nth(i) {
                chars[i] = c;
            }
        }
    }
    improved
}

/// Exponential climbing on an array literal's length. Shrinks go through
/// `resize_array` so stores into truncated cells are removed with the cells.
fn search_array_len(
    test: &mut TestCase,
    pos: usize,
    start: usize,
    objective: &mut dyn FitnessObjective,
    trials: &mut Trials,
) -> bool {
    let mut current = start as i64;
    let mut improved_any = false;
    loop {
        let mut direction = 0i64;
        for d in [1i64, -1] {
            let next = current + d;
            if next < 0 {
                continue;
            }
            if try_edit(test, objective, trials, |t| {
                resize_array(t, pos, next as usize)
            }) {
                direction = d;
                break;
            }
        }
        if direction == 0 {
            return improved_any;
        }
        improved_any = true;
        current += direction;
        let mut step = 2i64;
        loop {
            let next = current + direction * step;
            if next < 0 {
                break;
            }
            if !try_edit(test, objective, trials, |t| {
                resize_array(t, pos, next as usize)
            }) {
                break;
            }
            current = next;
            step *= 2;
        }
        if trials.left == 0 {
            return improved_any;
        }
    }
}

/// Tries every read slot of the statement at `pos`: first the null literal
/// (for nullable slots), then each compatible in-scope alternative.
fn search_references(
    catalog: &Catalog,
    test: &mut TestCase,
    pos: usize,
    objective: &mut dyn FitnessObjective,
    trials: &mut Trials,
) -> bool {
    let types = slot_types(catalog, test, pos);
    let mut improved_any = false;
    // The statement may move when a null trial inserts before it; track it.
    let mut here = pos;
    for (slot, ty) in types.iter().enumerate() {
        if ty.is_void() {
            continue;
        }
        // Rebinding the array operand of a store can break the index bound.
        if slot == 0
            && matches!(test.statement(here).kind, StatementKind::StoreIndex { .. })
        {
            continue;
        }
        if ty.is_nullable() {
            let kept = try_edit(test, objective, trials, |t| {
                t.insert_statement(here, Statement::null(ty.clone()));
                *t.statement_mut(here + 1).reads_mut()[slot] = VarRef::Pos(here);
                true
            });
            if kept {
                improved_any = true;
                here += 1;
            }
        }
        let current = test.statement(here).reads()[slot].clone();
        let candidates: Vec<usize> = test
            .compatible_values_before(catalog, ty, here)
            .into_iter()
            .filter(|&p| VarRef::Pos(p) != current)
            .collect();
        for p in candidates {
            let kept = try_edit(test, objective, trials, |t| {
                *t.statement_mut(here).reads_mut()[slot] = VarRef::Pos(p);
                true
            });
            improved_any |= kept;
            if trials.left == 0 {
                return improved_any;
            }
        }
    }
    improved_any
}

#[cfg(test)]
mod tests {
    use super::*;
    use testsynth_exec::objective::MinimizingObjective;
    use testsynth_tc::catalog::CatalogBuilder;
    use testsynth_tc::value::PrimitiveValue;

    fn int64(v: i64) -> Statement {
        Statement::primitive(PrimitiveValue::Int(IntKind::I64, v))
    }

    fn first_int(t: &TestCase) -> i64 {
        t.statement(0).as_primitive().unwrap().as_ordinal().unwrap()
    }

    #[test]
    fn integer_climb_reaches_a_distant_target_exactly() {
        let catalog = CatalogBuilder::new().build();
        let mut t = TestCase::new();
        t.push_statement(int64(0));
        let mut obj = MinimizingObjective::new(|t: &TestCase| (first_int(t) - 4711).abs() as f64);
        let cfg = LocalSearchConfig::default();
        assert!(search_statement(&catalog, &mut t, 0, &mut obj, &cfg));
        assert_eq!(first_int(&t), 4711);
    }

    #[test]
    fn climb_respects_the_kind_range() {
        let catalog = CatalogBuilder::new().build();
        let mut t = TestCase::new();
        t.push_statement(Statement::primitive(PrimitiveValue::Int(IntKind::I8, 0)));
        // Unbounded pull upward saturates at the i8 maximum.
        let mut obj = MinimizingObjective::new(|t: &TestCase| -(first_int(t) as f64));
        let cfg = LocalSearchConfig::default();
        assert!(search_statement(&catalog, &mut t, 0, &mut obj, &cfg));
        assert_eq!(first_int(&t), i8::MAX as i64);
    }

    #[test]
    fn bool_search_is_a_guarded_flip() {
        let catalog = CatalogBuilder::new().build();
        let mut t = TestCase::new();
        t.push_statement(Statement::primitive(PrimitiveValue::Bool(false)));
        let mut obj = MinimizingObjective::new(|t: &TestCase| {
            match t.statement(0).as_primitive() {
                Some(PrimitiveValue::Bool(true)) => 0.0,
                _ => 1.0,
            }
        });
        let cfg = LocalSearchConfig::default();
        assert!(search_statement(&catalog, &mut t, 0, &mut obj, &cfg));
        assert_eq!(
            t.statement(0).as_primitive(),
            Some(&PrimitiveValue::Bool(true))
        );
    }

    #[test]
    fn float_refinement_recovers_the_fractional_part() {
        let catalog = CatalogBuilder::new().build();
        let mut t = TestCase::new();
        t.push_statement(Statement::primitive(PrimitiveValue::Float(
            FloatKind::F64,
            0.0,
        )));
        let target = 7.25f64;
        let mut obj = MinimizingObjective::new(move |t: &TestCase| {
            match t.statement(0).as_primitive() {
                Some(PrimitiveValue::Float(_, v)) => (v - target).abs(),
                _ => f64::INFINITY,
            }
        });
        let cfg = LocalSearchConfig::default();
        assert!(search_statement(&catalog, &mut t, 0, &mut obj, &cfg));
        match t.statement(0).as_primitive() {
            Some(PrimitiveValue::Float(_, v)) => assert!((v - target).abs() < 1e-6, "got {}", v),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn string_search_shrinks_grows_and_climbs_to_the_target() {
        let catalog = CatalogBuilder::new().build();
        let mut t = TestCase::new();
        t.push_statement(Statement::primitive(PrimitiveValue::Str("xz".into())));
        let target = "hi";
        let mut obj = MinimizingObjective::new(move |t: &TestCase| {
            let s = match t.statement(0).as_primitive() {
                Some(PrimitiveValue::Str(s)) => s.clone(),
                _ => return f64::INFINITY,
            };
            let len_gap = (s.chars().count() as i64 - target.len() as i64).abs() as f64;
            let char_gap: f64 = s
                .chars()
                .zip(target.chars())
                .map(|(a, b)| (a as i64 - b as i64).abs() as f64)
                .sum();
            len_gap * 10_000.0 + char_gap
        });
        let cfg = LocalSearchConfig::default();
        assert!(search_statement(&catalog, &mut t, 0, &mut obj, &cfg));
        assert_eq!(
            t.statement(0).as_primitive(),
            Some(&PrimitiveValue::Str("hi".into()))
        );
    }

    #[test]
    fn array_length_climbs_to_the_preferred_size() {
        let catalog = CatalogBuilder::new().build();
        let mut t = TestCase::new();
        t.push_statement(Statement::new_array(Type::Int(IntKind::I64), 1));
        let mut obj = MinimizingObjective::new(|t: &TestCase| {
            match &t.statement(0).kind {
                StatementKind::NewArray { len, .. } => (*len as i64 - 5).abs() as f64,
                _ => f64::INFINITY,
            }
        });
        let cfg = LocalSearchConfig::default();
        assert!(search_statement(&catalog, &mut t, 0, &mut obj, &cfg));
        match &t.statement(0).kind {
            StatementKind::NewArray { len, .. } => assert_eq!(*len, 5),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn reference_search_finds_the_preferred_receiver() {
        let mut b = CatalogBuilder::new();
        let account = b.add_class("Account", None);
        let ctor = b.add_constructor(account, "Account::new", vec![Type::Int(IntKind::I64)]);
        let ping = b.add_method(account, "ping", vec![], Some(Type::Bool));
        let catalog = b.build();
        let mut t = TestCase::new();
        t.push_statement(int64(1));
        t.push_statement(Statement::construct(&catalog, ctor, vec![VarRef::Pos(0)]));
        t.push_statement(Statement::construct(&catalog, ctor, vec![VarRef::Pos(0)]));
        t.push_statement(Statement::call(
            &catalog,
            ping,
            Some(VarRef::Pos(1)),
            vec![],
        ));
        let mut obj = MinimizingObjective::new(|t: &TestCase| {
            match t.statement(t.len() - 1).reads().first() {
                Some(VarRef::Pos(2)) => 0.0,
                _ => 1.0,
            }
        });
        let cfg = LocalSearchConfig::default();
        assert!(search_statement(&catalog, &mut t, 3, &mut obj, &cfg));
        assert_eq!(
            t.statement(3).reads().first().cloned(),
            Some(&VarRef::Pos(2))
        );
    }

    #[test]
    fn unimprovable_statements_are_left_untouched() {
        let catalog = CatalogBuilder::new().build();
        let mut t = TestCase::new();
        t.push_statement(int64(13));
        let before = t.clone();
        // Constant fitness: nothing can strictly improve.
        let mut obj = MinimizingObjective::new(|_: &TestCase| 1.0);
        let cfg = LocalSearchConfig::default();
        assert!(!search_test(&catalog, &mut t, &mut obj, &cfg));
        assert_eq!(t, before);
    }
}
