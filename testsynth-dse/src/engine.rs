// SPDX-License-Identifier: Apache-2.0

//! The concolic loop around one test case: rerun it in shadow-symbolic mode,
//! pick branch conditions worth flipping, negate them, slice the query, ask
//! the solver for a model, and patch the model's values back into the test's
//! primitive statements. A patched test is kept when the objective improves
//! and parked in the side pool otherwise, so solved-but-not-better variants
//! are not thrown away.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::time::Duration;

use testsynth_exec::harness::{EngineError, RunSpec, TestExecutor};
use testsynth_exec::context::TraceMode;
use testsynth_exec::objective::FitnessObjective;
use testsynth_sym::constraint::BranchCondition;
use testsynth_sym::expr::Scalar;
use testsynth_sym::model::Model;
use testsynth_tc::catalog::Catalog;
use testsynth_tc::test::TestCase;
use testsynth_tc::value::PrimitiveValue;

use crate::cone::cone_of_influence;
use crate::solver::{ConstraintSolver, SolverVerdict};

#[derive(Debug, Clone)]
pub struct DseConfig {
    /// Harness spec for the symbolic rerun.
    pub run_spec: RunSpec,
    /// Budget per solver query.
    pub solver_budget: Duration,
    /// Branch conditions attempted per invocation.
    pub max_attempts: usize,
}

impl Default for DseConfig {
    fn default() -> DseConfig {
        DseConfig {
            run_spec: RunSpec::default().with_mode(TraceMode::Symbolic),
            solver_budget: Duration::from_millis(100),
            max_attempts: 16,
        }
    }
}

/// Solved-but-not-improving variants, deduplicated, oldest evicted first.
pub struct SidePool {
    tests: VecDeque<TestCase>,
    seen: HashSet<[u8; 32]>,
    capacity: usize,
}

impl SidePool {
    pub fn new(capacity: usize) -> SidePool {
        SidePool {
            tests: VecDeque::new(),
            seen: HashSet::new(),
            capacity,
        }
    }

    pub fn push(&mut self, test: TestCase) -> bool {
        let key = *blake3::hash(test.to_string().as_bytes()).as_bytes();
        if !self.seen.insert(key) {
            return false;
        }
        if self.tests.len() == self.capacity {
            self.tests.pop_front();
        }
        self.tests.push_back(test);
        true
    }

    pub fn pop(&mut self) -> Option<TestCase> {
        self.tests.pop_front()
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

/// What one `dse_local_search` invocation did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DseOutcome {
    /// Branch conditions whose negation was attempted.
    pub attempts: usize,
    /// Attempts for which the solver produced a model.
    pub solved: usize,
    /// Whether the test was replaced by an improving patch.
    pub improved: bool,
}

/// One concolic pass over `test`. `targets` restricts the attempted branch
/// conditions to those constraining at least one of the named symbolic
/// variables; `None` attempts all of them, most recent first.
pub fn dse_local_search(
    executor: &mut TestExecutor,
    test: &mut TestCase,
    objective: &mut dyn FitnessObjective,
    targets: Option<&BTreeSet<String>>,
    solver: &mut dyn ConstraintSolver,
    side_pool: &mut SidePool,
    cfg: &DseConfig,
) -> Result<DseOutcome, EngineError> {
    objective.has_not_worsened(test);
    let catalog = executor.registry().catalog_arc();
    let result = executor.run(test, &cfg.run_spec)?;
    let mut outcome = DseOutcome::default();

    // Deepest conditions first: those are the ones plain mutation is least
    // likely to flip.
    for condition in result.trace.conditions.iter().rev() {
        if outcome.attempts == cfg.max_attempts {
            break;
        }
        if !is_relevant(condition, targets) {
            continue;
        }
        outcome.attempts += 1;
        let query = cone_of_influence(&condition.negated_query());
        match solver.solve(&query, cfg.solver_budget) {
            SolverVerdict::Sat(model) => {
                outcome.solved += 1;
                let candidate = apply_model(&catalog, test, &model);
                if candidate == *test {
                    continue;
                }
                if objective.has_improved(&candidate) {
                    log::debug!(
                        "flipping branch {} improved the objective",
                        condition.branch_id
                    );
                    *test = candidate;
                    outcome.improved = true;
                    // The recorded trace no longer matches the test.
                    break;
                }
                side_pool.push(candidate);
            }
            SolverVerdict::Unknown => {
                log::trace!("no model for branch {}", condition.branch_id);
            }
            SolverVerdict::Timeout => {
                log::trace!("solver timed out on branch {}", condition.branch_id);
            }
        }
    }
    Ok(outcome)
}

fn is_relevant(condition: &BranchCondition, targets: Option<&BTreeSet<String>>) -> bool {
    match targets {
        None => true,
        Some(set) => condition.vars().iter().any(|v| set.contains(v)),
    }
}

/// Writes the model's values back into the primitive statements the
/// variables name, narrowing each scalar to the statement's declared type.
/// Bindings that name nothing patchable are skipped.
pub fn apply_model(catalog: &Catalog, test: &TestCase, model: &Model) -> TestCase {
    let mut patched = test.clone();
    for (name, value) in model.iter() {
        let Some(pos) = parse_var(name).filter(|&p| p < patched.len()) else {
            log::trace!("model binds {} which is not a statement", name);
            continue;
        };
        let Some(old) = patched.statement(pos).as_primitive().cloned() else {
            log::trace!("model binds {} which is not a primitive", name);
            continue;
        };
        match narrow(catalog, &old, value) {
            Some(next) => {
                patched.statement_mut(pos).set_primitive(next);
            }
            None => log::trace!("cannot narrow {} into {}", value, old.ty()),
        }
    }
    patched
}

fn parse_var(name: &str) -> Option<usize> {
    name.strip_prefix('v')?.parse().ok()
}

/// Coerces a solver scalar into the primitive type already at the patch
/// site. Integers saturate into the declared kind; ordinal types ride the
/// integer path.
fn narrow(catalog: &Catalog, old: &PrimitiveValue, value: &Scalar) -> Option<PrimitiveValue> {
    let as_int = match value {
        Scalar::Int(i) => Some(*i),
        Scalar::Real(r) if r.is_finite() => Some(r.round() as i64),
        _ => None,
    };
    match old {
        PrimitiveValue::Bool(_) => Some(PrimitiveValue::Bool(as_int? != 0)),
        PrimitiveValue::Int(k, _) => Some(PrimitiveValue::Int(*k, k.clamp(as_int?))),
        PrimitiveValue::Float(k, _) => Some(PrimitiveValue::Float(*k, k.narrow(value.as_real()?))),
        PrimitiveValue::Char(_) => {
            let code = as_int?.clamp(1, 0xD7FF) as u32;
            char::from_u32(code).map(PrimitiveValue::Char)
        }
        PrimitiveValue::Str(_) => value.as_str().map(|s| PrimitiveValue::Str(s.to_string())),
        PrimitiveValue::Enum(id, _) => {
            let count = catalog.get_enum(*id)?.variants.len() as i64;
            let ord = as_int?.clamp(0, count - 1) as usize;
            Some(PrimitiveValue::Enum(*id, ord))
        }
    }
}
