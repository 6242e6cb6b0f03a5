// SPDX-License-Identifier: Apache-2.0

//! The solver seam. A query is a conjunction of constraints; a solver either
//! finds a model, gives up, or runs out of budget. There is no unsat verdict:
//! the bundled search-based solver cannot prove absence of a model, so
//! "unknown" covers both genuinely unsatisfiable queries and search failure.

use std::collections::HashMap;
use std::time::Duration;

use testsynth_sym::constraint::Constraint;
use testsynth_sym::model::Model;

#[derive(Debug, Clone, PartialEq)]
pub enum SolverVerdict {
    /// A model under which every constraint in the query holds.
    Sat(Model),
    /// No model found within the search's own limits.
    Unknown,
    /// The time budget expired first.
    Timeout,
}

impl SolverVerdict {
    pub fn model(&self) -> Option<&Model> {
        match self {
            SolverVerdict::Sat(m) => Some(m),
            _ => None,
        }
    }
}

pub trait ConstraintSolver {
    fn solve(&mut self, query: &[Constraint], budget: Duration) -> SolverVerdict;
}

/// Memoizes an inner solver keyed on the query's structure and the observed
/// values its variables carry. Timeouts are not cached: a bigger budget on a
/// later call may still succeed.
pub struct CachingSolver<S> {
    inner: S,
    cache: HashMap<[u8; 32], SolverVerdict>,
    hits: u64,
    misses: u64,
}

impl<S: ConstraintSolver> CachingSolver<S> {
    pub fn new(inner: S) -> CachingSolver<S> {
        CachingSolver {
            inner,
            cache: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn key(query: &[Constraint]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        for c in query {
            hasher.update(c.to_string().as_bytes());
            hasher.update(b";");
            let mut observed = std::collections::BTreeMap::new();
            c.observed_vars_into(&mut observed);
            for (name, value) in &observed {
                hasher.update(name.as_bytes());
                hasher.update(b"=");
                hasher.update(value.to_string().as_bytes());
                hasher.update(b",");
            }
            hasher.update(b"\n");
        }
        *hasher.finalize().as_bytes()
    }
}

impl<S: ConstraintSolver> ConstraintSolver for CachingSolver<S> {
    fn solve(&mut self, query: &[Constraint], budget: Duration) -> SolverVerdict {
        let key = Self::key(query);
        if let Some(cached) = self.cache.get(&key) {
            self.hits += 1;
            log::trace!("solver cache hit for {}-constraint query", query.len());
            return cached.clone();
        }
        self.misses += 1;
        let verdict = self.inner.solve(query, budget);
        if verdict != SolverVerdict::Timeout {
            self.cache.insert(key, verdict.clone());
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testsynth_sym::constraint::Relation;
    use testsynth_sym::expr::{Expr, Scalar};

    /// Counts invocations and answers with a canned verdict.
    struct Scripted {
        verdict: SolverVerdict,
        calls: u64,
    }

    impl ConstraintSolver for Scripted {
        fn solve(&mut self, _query: &[Constraint], _budget: Duration) -> SolverVerdict {
            self.calls += 1;
            self.verdict.clone()
        }
    }

    fn query(observed: i64) -> Vec<Constraint> {
        vec![Constraint::new(
            Expr::var("v0", Scalar::Int(observed)),
            Relation::Gt,
            Expr::int(10),
        )]
    }

    #[test]
    fn identical_queries_hit_the_cache() {
        let mut s = CachingSolver::new(Scripted {
            verdict: SolverVerdict::Unknown,
            calls: 0,
        });
        let q = query(3);
        assert_eq!(s.solve(&q, Duration::from_millis(5)), SolverVerdict::Unknown);
        assert_eq!(s.solve(&q, Duration::from_millis(5)), SolverVerdict::Unknown);
        assert_eq!(s.hits(), 1);
        assert_eq!(s.misses(), 1);
        assert_eq!(s.inner().calls, 1);
    }

    #[test]
    fn observed_values_are_part_of_the_key() {
        let mut s = CachingSolver::new(Scripted {
            verdict: SolverVerdict::Unknown,
            calls: 0,
        });
        s.solve(&query(3), Duration::from_millis(5));
        s.solve(&query(4), Duration::from_millis(5));
        assert_eq!(s.misses(), 2);
        assert_eq!(s.hits(), 0);
    }

    #[test]
    fn timeouts_are_not_cached() {
        let mut s = CachingSolver::new(Scripted {
            verdict: SolverVerdict::Timeout,
            calls: 0,
        });
        let q = query(3);
        s.solve(&q, Duration::from_millis(1));
        s.solve(&q, Duration::from_millis(1));
        assert_eq!(s.inner().calls, 2);
    }
}
