// SPDX-License-Identifier: Apache-2.0

//! The instrumentation context handed to program-under-test behaviors.
//!
//! Behaviors report their conditionals through `branch`, which is where
//! branch distances and (in symbolic mode) path constraints come from. The
//! context also carries the cooperative cancellation flag and tracks threads
//! the behavior spawns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use testsynth_sym::constraint::{BranchCondition, Constraint, Relation};
use testsynth_sym::expr::Expr;
use testsynth_sym::model::Model;

use crate::result::ExecutionTrace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMode {
    /// Record branch distances only.
    Concrete,
    /// Additionally record a `BranchCondition` per conditional.
    Symbolic,
}

pub struct PutCtx<'a> {
    cancel: Arc<AtomicBool>,
    mode: TraceMode,
    trace: &'a mut ExecutionTrace,
    path: Vec<Constraint>,
    call_args: Vec<Option<Expr>>,
    result_shadow: Option<Expr>,
    threads: Vec<JoinHandle<()>>,
}

impl<'a> PutCtx<'a> {
    pub fn new(cancel: Arc<AtomicBool>, mode: TraceMode, trace: &'a mut ExecutionTrace) -> PutCtx<'a> {
        PutCtx {
            cancel,
            mode,
            trace,
            path: Vec::new(),
            call_args: Vec::new(),
            result_shadow: None,
            threads: Vec::new(),
        }
    }

    pub fn mode(&self) -> TraceMode {
        self.mode
    }

    /// Cooperative cancellation: long-running behaviors poll this and bail
    /// out with `PutRaise::Cancelled`.
    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Expression view of the current call's argument `i`. Scalar arguments
    /// arrive tagged with their originating symbolic variable when the
    /// defining statement was a primitive; everything else shows up as a
    /// constant. Panics outside a behavior invocation or for non-scalar
    /// arguments, which the harness records as a program-under-test panic.
    pub fn arg(&self, i: usize) -> Expr {
        match self.call_args.get(i) {
            Some(Some(e)) => e.clone(),
            Some(None) => panic!("argument {} has no scalar view", i),
            None => panic!("argument index {} out of range", i),
        }
    }

    /// Reports one conditional and returns its outcome at the observed
    /// values. Both sides' distances are min-merged into the trace; in
    /// symbolic mode the taken side is appended to the path and recorded as
    /// a `BranchCondition`.
    pub fn branch(&mut self, id: u32, lhs: &Expr, rel: Relation, rhs: &Expr) -> bool {
        let cond = Constraint::new(lhs.clone(), rel, rhs.clone());
        let empty = Model::default();
        let dist_true = cond.distance(&empty);
        let dist_false = cond.negate().distance(&empty);
        self.trace.record_branch(id, dist_true, dist_false);
        let taken = cond.holds(&empty);
        if self.mode == TraceMode::Symbolic {
            let local = if taken { cond } else { cond.negate() };
            self.trace
                .conditions
                .push(BranchCondition::new(id, local.clone(), self.path.clone()));
            self.path.push(local);
        }
        taken
    }

    /// Declares the symbolic expression shadowing this call's return value.
    pub fn set_result_shadow(&mut self, expr: Expr) {
        self.result_shadow = Some(expr);
    }

    /// Runs `f` on a tracked thread. The closure receives the cancellation
    /// flag; the harness joins tracked threads against the remaining budget
    /// after the last statement.
    pub fn spawn<F>(&mut self, f: F)
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let flag = self.cancel.clone();
        self.threads.push(thread::spawn(move || f(flag)));
    }

    pub(crate) fn begin_call(&mut self, args: Vec<Option<Expr>>) {
        self.call_args = args;
        self.result_shadow = None;
    }

    pub(crate) fn take_result_shadow(&mut self) -> Option<Expr> {
        self.result_shadow.take()
    }

    pub(crate) fn take_threads(&mut self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut self.threads)
    }

    pub(crate) fn trace_mut(&mut self) -> &mut ExecutionTrace {
        self.trace
    }

    pub(crate) fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testsynth_sym::expr::Scalar;

    #[test]
    fn branch_records_both_sides_and_returns_outcome() {
        let mut trace = ExecutionTrace::default();
        let mut ctx = PutCtx::new(
            Arc::new(AtomicBool::new(false)),
            TraceMode::Concrete,
            &mut trace,
        );
        let x = Expr::var("v0", Scalar::Int(7));
        let taken = ctx.branch(0, &x, Relation::Lt, &Expr::int(10));
        assert!(taken);
        assert_eq!(trace.distance_true(0), Some(0.0));
        // 7 < 10 holds; falsifying it needs 7 >= 10, distance 3.
        assert_eq!(trace.distance_false(0), Some(3.0));
        assert!(trace.conditions.is_empty());
    }

    #[test]
    fn symbolic_mode_accumulates_path_prefixes() {
        let mut trace = ExecutionTrace::default();
        let mut ctx = PutCtx::new(
            Arc::new(AtomicBool::new(false)),
            TraceMode::Symbolic,
            &mut trace,
        );
        let x = Expr::var("v0", Scalar::Int(7));
        ctx.branch(0, &x, Relation::Lt, &Expr::int(10));
        ctx.branch(1, &x, Relation::Gt, &Expr::int(20));
        assert_eq!(trace.conditions.len(), 2);
        assert!(trace.conditions[0].path.is_empty());
        assert_eq!(trace.conditions[1].path.len(), 1);
        // The second condition records the taken (negated) side: 7 > 20 is
        // false, so the local constraint is <=.
        assert_eq!(trace.conditions[1].local.rel, Relation::Le);
    }

    #[test]
    fn spawned_threads_receive_the_cancel_flag() {
        let mut trace = ExecutionTrace::default();
        let cancel = Arc::new(AtomicBool::new(false));
        let mut ctx = PutCtx::new(cancel.clone(), TraceMode::Concrete, &mut trace);
        ctx.spawn(|flag| {
            while !flag.load(Ordering::Relaxed) {
                thread::yield_now();
            }
        });
        cancel.store(true, Ordering::Relaxed);
        for h in ctx.take_threads() {
            h.join().unwrap();
        }
    }
}
