// SPDX-License-Identifier: Apache-2.0

//! Before/after-statement hooks that travel with a run.
//!
//! Observers are moved into the run request, invoked on the worker thread,
//! and handed back inside the `ExecutionResult`. If the worker has to be
//! retired the observers are forfeited with it.

use testsynth_tc::test::TestCase;

use crate::result::PutFailure;
use crate::scope::Scope;

pub trait ExecutionObserver: Send {
    fn before_statement(&mut self, pos: usize, test: &TestCase);

    /// Called after the statement at `pos` ran (or failed). The scope is the
    /// worker-local live environment; anything kept must be copied out.
    fn after_statement(
        &mut self,
        pos: usize,
        test: &TestCase,
        scope: &Scope,
        failure: Option<&PutFailure>,
    );
}

/// Counts statement starts/ends; handy default observer for smoke tests and
/// the driver's verbose mode.
#[derive(Debug, Default)]
pub struct StatementCounter {
    pub started: usize,
    pub finished: usize,
    pub failed: usize,
}

impl ExecutionObserver for StatementCounter {
    fn before_statement(&mut self, _pos: usize, _test: &TestCase) {
        self.started += 1;
    }

    fn after_statement(
        &mut self,
        _pos: usize,
        _test: &TestCase,
        _scope: &Scope,
        failure: Option<&PutFailure>,
    ) {
        self.finished += 1;
        if failure.is_some() {
            self.failed += 1;
        }
    }
}
