// SPDX-License-Identifier: Apache-2.0

//! What a run produces: per-statement failures, the instrumentation trace,
//! timing, and optional extras (scope summary, returned observers).

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use testsynth_sym::constraint::BranchCondition;

use crate::observer::ExecutionObserver;
use crate::scope::ScopeSummary;

/// Classification of a failure observed while executing one statement.
/// `Raised` is the program under test deliberately signalling; the others
/// are implicit runtime conditions. `Timeout` only ever appears as the
/// synthetic tail entry the harness appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Raised,
    NullDereference,
    IndexOutOfBounds,
    Arithmetic,
    Panic,
    Timeout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PutFailure {
    pub kind: FailureKind,
    pub message: String,
    /// True when the program under test raised deliberately, false for
    /// implicit runtime conditions.
    pub explicit: bool,
}

impl PutFailure {
    pub fn raised(message: impl Into<String>) -> PutFailure {
        PutFailure {
            kind: FailureKind::Raised,
            message: message.into(),
            explicit: true,
        }
    }

    pub fn implicit(kind: FailureKind, message: impl Into<String>) -> PutFailure {
        PutFailure {
            kind,
            message: message.into(),
            explicit: false,
        }
    }

    pub fn timeout(budget: Duration) -> PutFailure {
        PutFailure {
            kind: FailureKind::Timeout,
            message: format!("exceeded time budget of {:?}", budget),
            explicit: false,
        }
    }
}

impl fmt::Display for PutFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Instrumentation output of one run: per-branch minimum distances, the
/// symbolic branch conditions (symbolic mode only), and whether the run was
/// cancelled mid-flight.
#[derive(Debug, Clone, Default)]
pub struct ExecutionTrace {
    distances: BTreeMap<u32, (f64, f64)>,
    pub conditions: Vec<BranchCondition>,
    pub cancelled: bool,
}

impl ExecutionTrace {
    /// Min-merges a branch observation: distances shrink, never grow.
    pub fn record_branch(&mut self, id: u32, dist_true: f64, dist_false: f64) {
        let entry = self
            .distances
            .entry(id)
            .or_insert((f64::INFINITY, f64::INFINITY));
        entry.0 = entry.0.min(dist_true);
        entry.1 = entry.1.min(dist_false);
    }

    pub fn reached(&self, id: u32) -> bool {
        self.distances.contains_key(&id)
    }

    /// Distance to making branch `id` evaluate true; `None` if never
    /// reached.
    pub fn distance_true(&self, id: u32) -> Option<f64> {
        self.distances.get(&id).map(|d| d.0)
    }

    pub fn distance_false(&self, id: u32) -> Option<f64> {
        self.distances.get(&id).map(|d| d.1)
    }

    pub fn branch_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.distances.keys().copied()
    }
}

/// The harness's answer for one run. Always produced, whatever the program
/// under test did; engine-internal errors travel separately.
pub struct ExecutionResult {
    /// Failure per statement position; position == test length is the
    /// synthetic timeout slot.
    pub exceptions: BTreeMap<usize, PutFailure>,
    /// Statements attempted (the failing statement, if any, included).
    pub executed: usize,
    pub trace: ExecutionTrace,
    pub wall: Duration,
    pub scope_summary: Option<ScopeSummary>,
    /// Observers that travelled with the run; empty if the worker was
    /// retired before it could hand them back.
    pub observers: Vec<Box<dyn ExecutionObserver>>,
    /// Threads the program under test spawned that outlived the join window.
    pub abandoned_threads: usize,
}

impl ExecutionResult {
    pub fn has_failures(&self) -> bool {
        !self.exceptions.is_empty()
    }

    pub fn first_failure(&self) -> Option<(usize, &PutFailure)> {
        self.exceptions.iter().next().map(|(p, f)| (*p, f))
    }

    pub fn timed_out(&self) -> bool {
        self.exceptions
            .values()
            .any(|f| f.kind == FailureKind::Timeout)
    }

    /// Failures the program under test itself produced (synthetic timeout
    /// excluded).
    pub fn put_failure_count(&self) -> usize {
        self.exceptions
            .values()
            .filter(|f| f.kind != FailureKind::Timeout)
            .count()
    }
}

impl fmt::Debug for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ExecutionResult")
            .field("exceptions", &self.exceptions)
            .field("executed", &self.executed)
            .field("cancelled", &self.trace.cancelled)
            .field("wall", &self.wall)
            .field("observers", &self.observers.len())
            .field("abandoned_threads", &self.abandoned_threads)
            .finish()
    }
}
