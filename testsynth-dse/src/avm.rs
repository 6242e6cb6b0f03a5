// SPDX-License-Identifier: Apache-2.0

//! The bundled model finder: alternating-variable search over the query's
//! branch-distance sum.
//!
//! Variables start at the values observed on the recording run and are
//! improved one at a time; integers and reals use exponential pattern moves,
//! strings a shrink/climb/grow cycle. A sweep that improves nothing triggers
//! a random restart, and the verdict is `Unknown` once restarts are
//! exhausted. Unsatisfiability is never claimed.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

use testsynth_sym::constraint::Constraint;
use testsynth_sym::expr::Scalar;
use testsynth_sym::model::Model;

use crate::solver::{ConstraintSolver, SolverVerdict};

const MAX_STRING_LEN: usize = 64;

pub struct AvmSolver {
    rng: Pcg64Mcg,
    max_restarts: usize,
    float_refinements: u32,
}

impl AvmSolver {
    pub fn new(seed: u64) -> AvmSolver {
        AvmSolver {
            rng: Pcg64Mcg::seed_from_u64(seed),
            max_restarts: 4,
            float_refinements: 16,
        }
    }

    pub fn with_max_restarts(mut self, max_restarts: usize) -> AvmSolver {
        self.max_restarts = max_restarts;
        self
    }
}

fn objective(query: &[Constraint], model: &Model) -> f64 {
    query.iter().map(|c| c.distance(model)).sum()
}

enum ClimbEnd {
    Solved,
    Stuck,
    OutOfTime,
}

impl ConstraintSolver for AvmSolver {
    fn solve(&mut self, query: &[Constraint], budget: Duration) -> SolverVerdict {
        let deadline = Instant::now() + budget;
        let mut observed = BTreeMap::new();
        for c in query {
            c.observed_vars_into(&mut observed);
        }
        if observed.is_empty() {
            // Constant query: it either already holds or nothing can help.
            return if objective(query, &Model::default()) == 0.0 {
                SolverVerdict::Sat(Model::default())
            } else {
                SolverVerdict::Unknown
            };
        }

        let mut model = Model::new();
        for (name, value) in &observed {
            model.bind(name.clone(), value.clone());
        }
        for restart in 0..=self.max_restarts {
            if restart > 0 {
                log::trace!("avm restart {} of {}", restart, self.max_restarts);
                model = self.random_model(&observed);
            }
            match self.climb(query, &mut model, deadline) {
                ClimbEnd::Solved => {
                    log::debug!("avm found a model after {} restart(s)", restart);
                    return SolverVerdict::Sat(model);
                }
                ClimbEnd::Stuck => continue,
                ClimbEnd::OutOfTime => return SolverVerdict::Timeout,
            }
        }
        SolverVerdict::Unknown
    }
}

impl AvmSolver {
    fn random_model(&mut self, observed: &BTreeMap<String, Scalar>) -> Model {
        let mut model = Model::new();
        for (name, value) in observed {
            let fresh = match value {
                Scalar::Int(_) => Scalar::Int(self.rng.gen_range(-1000..=1000)),
                Scalar::Real(_) => Scalar::Real(self.rng.gen_range(-1000.0..1000.0)),
                Scalar::Str(_) => {
                    let len = self.rng.gen_range(0..8);
                    Scalar::Str(
                        (0..len)
                            .map(|_| char::from(self.rng.gen_range(b' '..b'~')))
                            .collect(),
                    )
                }
            };
            model.bind(name.clone(), fresh);
        }
        model
    }

    /// Sweeps the variables until the objective reaches zero or a full sweep
    /// improves nothing.
    fn climb(&mut self, query: &[Constraint], model: &mut Model, deadline: Instant) -> ClimbEnd {
        let names: Vec<String> = model.iter().map(|(n, _)| n.clone()).collect();
        loop {
            let mut best = objective(query, model);
            if best == 0.0 {
                return ClimbEnd::Solved;
            }
            let mut any = false;
            for name in &names {
                if Instant::now() >= deadline {
                    return ClimbEnd::OutOfTime;
                }
                let improved = match model.get(name).cloned() {
                    Some(Scalar::Int(v)) => self.climb_int(query, model, name, v, &mut best),
                    Some(Scalar::Real(v)) => self.climb_real(query, model, name, v, &mut best),
                    Some(Scalar::Str(s)) => self.climb_str(query, model, name, s, &mut best),
                    None => false,
                };
                any |= improved;
                if best == 0.0 {
                    return ClimbEnd::Solved;
                }
            }
            if !any {
                return ClimbEnd::Stuck;
            }
        }
    }

    /// Binds `candidate` and keeps it only when the objective strictly
    /// drops.
    fn try_bind(
        &mut self,
        query: &[Constraint],
        model: &mut Model,
        name: &str,
        candidate: Scalar,
        best: &mut f64,
    ) -> bool {
        let old = model.get(name).cloned();
        model.bind(name, candidate);
        let score = objective(query, model);
        if score < *best {
            *best = score;
            true
        } else {
            match old {
                Some(v) => model.bind(name, v),
                None => {
                    model.remove(name);
                }
            }
            false
        }
    }

    fn climb_int(
        &mut self,
        query: &[Constraint],
        model: &mut Model,
        name: &str,
        start: i64,
        best: &mut f64,
    ) -> bool {
        let mut current = start;
        let mut improved_any = false;
        loop {
            let mut direction = 0i64;
            for d in [1i64, -1] {
                if self.try_bind(query, model, name, Scalar::Int(current + d), best) {
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
                if !self.try_bind(query, model, name, Scalar::Int(next), best) {
                    break;
                }
                current = next;
                step = step.saturating_mul(2);
            }
        }
    }

    fn climb_real(
        &mut self,
        query: &[Constraint],
        model: &mut Model,
        name: &str,
        start: f64,
        best: &mut f64,
    ) -> bool {
        let mut current = start;
        let mut improved_any = false;
        loop {
            let mut direction = 0.0f64;
            for d in [1.0f64, -1.0] {
                if self.try_bind(query, model, name, Scalar::Real(current + d), best) {
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
                && self.try_bind(
                    query,
                    model,
                    name,
                    Scalar::Real(current + direction * step),
                    best,
                )
            {
                current += direction * step;
                step *= 2.0;
            }
        }
        let mut delta = 0.5f64;
        for _ in 0..self.float_refinements {
            let mut moved = false;
            for d in [delta, -delta] {
                while self.try_bind(query, model, name, Scalar::Real(current + d), best) {
                    current += d;
                    improved_any = true;
                    moved = true;
                }
            }
            if !moved {
                delta /= 2.0;
            }
        }
        improved_any
    }

    fn climb_str(
        &mut self,
        query: &[Constraint],
        model: &mut Model,
        name: &str,
        start: String,
        best: &mut f64,
    ) -> bool {
        let mut chars: Vec<char> = start.chars().collect();
        let mut improved_any = false;

        let mut i = chars.len();
        while i > 0 {
            i -= 1;
            let mut shorter = chars.clone();
            shorter.remove(i);
            if self.try_bind(
                query,
                model,
                name,
                Scalar::Str(shorter.iter().collect()),
                best,
            ) {
                chars = shorter;
                improved_any = true;
            }
        }

        for i in 0..chars.len() {
            improved_any |= self.climb_str_char(query, model, name, &mut chars, i, best);
        }

        while chars.len() < MAX_STRING_LEN {
            let mut longer = chars.clone();
            longer.push('a');
            let appended = longer.len() - 1;
            let grew = self.try_bind(
                query,
                model,
                name,
                Scalar::Str(longer.iter().collect()),
                best,
            ) || {
                // Force the growth so the fresh character can climb, and
                // revert if the climb goes nowhere.
                model.bind(name, Scalar::Str(longer.iter().collect()));
                let climbed =
                    self.climb_str_char(query, model, name, &mut longer, appended, best);
                if !climbed {
                    model.bind(name, Scalar::Str(chars.iter().collect()));
                }
                climbed
            };
            if !grew {
                break;
            }
            chars = longer;
            improved_any = true;
        }
        improved_any
    }

    fn climb_str_char(
        &mut self,
        query: &[Constraint],
        model: &mut Model,
        name: &str,
        chars: &mut [char],
        i: usize,
        best: &mut f64,
    ) -> bool {
        let mut current = chars[i] as i64;
        let mut improved_any = false;
        let make = |chars: &[char], i: usize, code: i64| -> Option<Scalar> {
            let c = u32::try_from(code)
                .ok()
                .filter(|&u| (1..=0xD7FF).contains(&u))
                .and_then(char::from_u32)?;
            let mut s = chars.to_vec();
            s[i] = c;
            Some(Scalar::Str(s.iter().collect()))
        };
        loop {
            let mut direction = 0i64;
            for d in [1i64, -1] {
                let Some(candidate) = make(chars, i, current + d) else {
                    continue;
                };
                if self.try_bind(query, model, name, candidate, best) {
                    direction = d;
                    break;
                }
            }
            if direction == 0 {
                if improved_any {
                    if let Ok(c) = u32::try_from(current).map(char::from_u32) {
                        if let Some(c) = c {
                            chars[i] = c;
                        }
                    }
                }
                return improved_any;
            }
            improved_any = true;
            current += direction;
            let mut step = 2i64;
            loop {
                let next = current + direction * step;
                let Some(candidate) = make(chars, i, next) else {
                    break;
                };
                if !self.try_bind(query, model, name, candidate, best) {
                    break;
                }
                current = next;
                step *= 2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testsynth_sym::constraint::Relation;
    use testsynth_sym::expr::Expr;

    fn v(name: &str, observed: i64) -> Expr {
        Expr::var(name, Scalar::Int(observed))
    }

    fn solve(query: &[Constraint]) -> SolverVerdict {
        AvmSolver::new(7).solve(query, Duration::from_millis(500))
    }

    fn holds_under(query: &[Constraint], model: &Model) -> bool {
        query.iter().all(|c| c.holds(model))
    }

    #[test]
    fn single_inequality_is_climbed_over() {
        let q = vec![Constraint::new(v("v0", 0), Relation::Gt, Expr::int(10))];
        match solve(&q) {
            SolverVerdict::Sat(m) => {
                assert!(holds_under(&q, &m));
                assert!(m.get("v0").and_then(Scalar::as_int).unwrap() > 10);
            }
            other => panic!("expected sat, got {:?}", other),
        }
    }

    #[test]
    fn conjunction_couples_two_variables() {
        let q = vec![
            Constraint::new(v("v0", 5), Relation::Gt, Expr::int(0)),
            Constraint::new(v("v1", 23), Relation::Gt, Expr::int(0)),
            Constraint::new(v("v0", 5), Relation::Eq, v("v1", 23)),
        ];
        match solve(&q) {
            SolverVerdict::Sat(m) => assert!(holds_under(&q, &m)),
            other => panic!("expected sat, got {:?}", other),
        }
    }

    #[test]
    fn string_equality_is_reached_character_by_character() {
        let q = vec![Constraint::new(
            Expr::var("v0", Scalar::Str("hat".to_string())),
            Relation::Eq,
            Expr::str("cat"),
        )];
        match solve(&q) {
            SolverVerdict::Sat(m) => {
                assert_eq!(m.get("v0").and_then(|s| s.as_str().map(String::from)), Some("cat".to_string()));
            }
            other => panic!("expected sat, got {:?}", other),
        }
    }

    #[test]
    fn string_length_constraint_grows_the_string() {
        let q = vec![Constraint::new(
            Expr::var("v0", Scalar::Str(String::new())).str_len(),
            Relation::Ge,
            Expr::int(3),
        )];
        match solve(&q) {
            SolverVerdict::Sat(m) => assert!(holds_under(&q, &m)),
            other => panic!("expected sat, got {:?}", other),
        }
    }

    #[test]
    fn contradiction_ends_in_unknown_not_unsat() {
        let q = vec![
            Constraint::new(v("v0", 1), Relation::Gt, Expr::int(0)),
            Constraint::new(v("v0", 1), Relation::Lt, Expr::int(0)),
        ];
        assert_eq!(solve(&q), SolverVerdict::Unknown);
    }

    #[test]
    fn zero_budget_times_out() {
        let q = vec![Constraint::new(v("v0", 0), Relation::Eq, Expr::int(123456))];
        let verdict = AvmSolver::new(0).solve(&q, Duration::ZERO);
        assert_eq!(verdict, SolverVerdict::Timeout);
    }

    #[test]
    fn already_satisfied_query_returns_the_observed_model() {
        let q = vec![Constraint::new(v("v0", 12), Relation::Gt, Expr::int(10))];
        match AvmSolver::new(0).solve(&q, Duration::ZERO) {
            SolverVerdict::Sat(m) => {
                assert_eq!(m.get("v0").and_then(Scalar::as_int), Some(12));
            }
            other => panic!("expected sat, got {:?}", other),
        }
    }

    #[test]
    fn constant_queries_need_no_variables() {
        let q = vec![Constraint::new(Expr::int(1), Relation::Lt, Expr::int(2))];
        assert_eq!(solve(&q), SolverVerdict::Sat(Model::default()));
        let q = vec![Constraint::new(Expr::int(2), Relation::Lt, Expr::int(1))];
        assert_eq!(solve(&q), SolverVerdict::Unknown);
    }
}
