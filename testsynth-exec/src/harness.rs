// SPDX-License-Identifier: Apache-2.0

//! The time-boxed execution harness.
//!
//! Every run is handed to a dedicated worker thread while the caller blocks
//! on a bounded wait, so `run` returns within `budget + grace` no matter what
//! the program under test does. Cancellation is two-layered: a cooperative
//! flag polled by instrumentation, then worker retirement if the flag is
//! ignored. The retirement path is an explicit state machine; see `RunPhase`.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::{sync_channel, RecvTimeoutError, Sender, SyncSender};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use testsynth_tc::catalog::MemberId;
use testsynth_tc::test::TestCase;

use crate::context::TraceMode;
use crate::interp::{run_test, RunOpts};
use crate::observer::ExecutionObserver;
use crate::registry::PutRegistry;
use crate::result::{ExecutionResult, ExecutionTrace, PutFailure};

/// Engine-internal failures. These are never recorded as test outcomes; they
/// propagate out of the harness and abort the search loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    Internal(String),
    /// The catalog names a member the registry has no behavior for.
    MissingBehavior { member: MemberId },
    /// The worker thread died without replying; its replacement is already
    /// in place but the in-flight run is lost.
    WorkerLost,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EngineError::Internal(msg) => write!(f, "internal engine error: {}", msg),
            EngineError::MissingBehavior { member } => {
                write!(f, "no behavior registered for member id {}", member.0)
            }
            EngineError::WorkerLost => write!(f, "execution worker died mid-run"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Per-run configuration.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub budget: Duration,
    /// Extra wait after the cooperative cancellation flag is set before the
    /// worker is retired.
    pub grace: Duration,
    pub mode: TraceMode,
    /// Continue past a failing statement instead of stopping at the first.
    pub keep_going: bool,
    /// Attach an end-of-run summary of the scope to the result.
    pub snapshot_scope: bool,
}

impl Default for RunSpec {
    fn default() -> RunSpec {
        RunSpec {
            budget: Duration::from_millis(250),
            grace: Duration::from_millis(50),
            mode: TraceMode::Concrete,
            keep_going: false,
            snapshot_scope: false,
        }
    }
}

impl RunSpec {
    pub fn with_budget(mut self, budget: Duration) -> RunSpec {
        self.budget = budget;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> RunSpec {
        self.grace = grace;
        self
    }

    pub fn with_mode(mut self, mode: TraceMode) -> RunSpec {
        self.mode = mode;
        self
    }

    pub fn with_keep_going(mut self, keep_going: bool) -> RunSpec {
        self.keep_going = keep_going;
        self
    }

    pub fn with_snapshot_scope(mut self, snapshot_scope: bool) -> RunSpec {
        self.snapshot_scope = snapshot_scope;
        self
    }
}

/// Lifecycle of one `run` call. Transitions:
/// `Running -> Completed`, `Running -> TimedOut -> Interrupting -> Joined`,
/// and `Interrupting -> Retired` when the grace period also expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Running,
    Completed,
    TimedOut,
    Interrupting,
    Joined,
    Retired,
}

impl RunPhase {
    fn advance(&mut self, next: RunPhase) {
        let ok = matches!(
            (*self, next),
            (RunPhase::Running, RunPhase::Completed)
                | (RunPhase::Running, RunPhase::TimedOut)
                | (RunPhase::TimedOut, RunPhase::Interrupting)
                | (RunPhase::Interrupting, RunPhase::Joined)
                | (RunPhase::Interrupting, RunPhase::Retired)
        );
        debug_assert!(ok, "illegal run phase transition {:?} -> {:?}", self, next);
        log::trace!("run phase {:?} -> {:?}", self, next);
        *self = next;
    }
}

/// Counters the harness accumulates across runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecStats {
    pub runs: u64,
    pub timeouts: u64,
    /// Timeouts the worker acknowledged within the grace period.
    pub cooperative_stops: u64,
    pub worker_replacements: u64,
    pub put_failures: u64,
    pub total_wall: Duration,
}

impl fmt::Display for ExecStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "runs={} timeouts={} cooperative={} replaced={} put_failures={} wall={:?}",
            self.runs,
            self.timeouts,
            self.cooperative_stops,
            self.worker_replacements,
            self.put_failures,
            self.total_wall
        )
    }
}

struct RunRequest {
    test: TestCase,
    opts: RunOpts,
    cancel: Arc<AtomicBool>,
    observers: Vec<Box<dyn ExecutionObserver>>,
    reply: SyncSender<Result<ExecutionResult, EngineError>>,
}

struct Worker {
    tx: Sender<RunRequest>,
    generation: u64,
}

impl Worker {
    fn spawn(registry: Arc<PutRegistry>, generation: u64) -> Worker {
        let (tx, rx) = mpsc::channel::<RunRequest>();
        let builder = thread::Builder::new().name(format!("testsynth-exec-{}", generation));
        builder
            .spawn(move || {
                for req in rx.iter() {
                    let res =
                        run_test(&registry, &req.test, &req.opts, req.cancel, req.observers);
                    // A retired caller has dropped its receiver; nothing to do.
                    let _ = req.reply.send(res);
                }
            })
            .expect("spawning an execution worker cannot fail");
        Worker { tx, generation }
    }
}

/// Runs test cases against one registry, one at a time, each on a worker
/// thread the executor owns. A wedged worker is abandoned and replaced; the
/// executor itself is always usable for the next run.
pub struct TestExecutor {
    registry: Arc<PutRegistry>,
    worker: Worker,
    stats: ExecStats,
}

impl TestExecutor {
    pub fn new(registry: Arc<PutRegistry>) -> TestExecutor {
        let worker = Worker::spawn(registry.clone(), 0);
        TestExecutor {
            registry,
            worker,
            stats: ExecStats::default(),
        }
    }

    pub fn registry(&self) -> &Arc<PutRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &ExecStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = ExecStats::default();
    }

    /// Generation of the current worker; bumps on every replacement.
    pub fn worker_generation(&self) -> u64 {
        self.worker.generation
    }

    pub fn run(
        &mut self,
        test: &TestCase,
        spec: &RunSpec,
    ) -> Result<ExecutionResult, EngineError> {
        self.run_with_observers(test, spec, Vec::new())
    }

    /// Runs `test` under `spec`. Program-under-test failures land in the
    /// result; engine errors propagate. Always returns within
    /// `budget + grace` (plus scheduling noise).
    pub fn run_with_observers(
        &mut self,
        test: &TestCase,
        spec: &RunSpec,
        observers: Vec<Box<dyn ExecutionObserver>>,
    ) -> Result<ExecutionResult, EngineError> {
        let started = Instant::now();
        let deadline = started + spec.budget + spec.grace;
        let cancel = Arc::new(AtomicBool::new(false));
        let (reply_tx, reply_rx) = sync_channel(1);
        let req = RunRequest {
            test: test.clone(),
            opts: RunOpts {
                mode: spec.mode,
                keep_going: spec.keep_going,
                snapshot_scope: spec.snapshot_scope,
                deadline,
            },
            cancel: cancel.clone(),
            observers,
            reply: reply_tx,
        };
        self.stats.runs += 1;
        let mut phase = RunPhase::Running;
        if self.worker.tx.send(req).is_err() {
            self.replace_worker();
            return Err(EngineError::WorkerLost);
        }

        let outcome = match reply_rx.recv_timeout(spec.budget) {
            Ok(res) => {
                phase.advance(RunPhase::Completed);
                res
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.replace_worker();
                return Err(EngineError::WorkerLost);
            }
            Err(RecvTimeoutError::Timeout) => {
                phase.advance(RunPhase::TimedOut);
                phase.advance(RunPhase::Interrupting);
                cancel.store(true, std::sync::atomic::Ordering::Relaxed);
                self.stats.timeouts += 1;
                match reply_rx.recv_timeout(spec.grace) {
                    Ok(res) => {
                        phase.advance(RunPhase::Joined);
                        self.stats.cooperative_stops += 1;
                        res.map(|mut r| {
                            r.exceptions
                                .insert(test.len(), PutFailure::timeout(spec.budget));
                            r.trace.cancelled = true;
                            r
                        })
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        self.replace_worker();
                        return Err(EngineError::WorkerLost);
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        phase.advance(RunPhase::Retired);
                        log::warn!(
                            "worker generation {} ignored cancellation; retiring it",
                            self.worker.generation
                        );
                        self.replace_worker();
                        Ok(self.synthetic_timeout_result(test, spec, started))
                    }
                }
            }
        };

        match outcome {
            Ok(result) => {
                self.stats.total_wall += result.wall;
                self.stats.put_failures += result.put_failure_count() as u64;
                log::debug!(
                    "run finished in {:?} phase {:?}: {} statement(s), {} failure(s)",
                    result.wall,
                    phase,
                    result.executed,
                    result.exceptions.len()
                );
                Ok(result)
            }
            Err(e) => Err(e),
        }
    }

    /// Result produced on the caller's behalf when the worker had to be
    /// retired: only the synthetic timeout at position == test length, with
    /// the scope and any observers forfeited along with the worker.
    fn synthetic_timeout_result(
        &self,
        test: &TestCase,
        spec: &RunSpec,
        started: Instant,
    ) -> ExecutionResult {
        let mut trace = ExecutionTrace::default();
        trace.cancelled = true;
        let mut exceptions = std::collections::BTreeMap::new();
        exceptions.insert(test.len(), PutFailure::timeout(spec.budget));
        ExecutionResult {
            exceptions,
            executed: test.len(),
            trace,
            wall: started.elapsed(),
            scope_summary: None,
            observers: Vec::new(),
            abandoned_threads: 0,
        }
    }

    fn replace_worker(&mut self) {
        // The wedged thread keeps its clone of the registry and its request
        // receiver is dropped here, so once it wakes up it finds the channel
        // closed and exits on its own. Until then it is simply abandoned.
        let generation = self.worker.generation + 1;
        self.stats.worker_replacements += 1;
        self.worker = Worker::spawn(self.registry.clone(), generation);
        log::info!("spawned replacement worker generation {}", generation);
    }
}

impl fmt::Debug for TestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TestExecutor")
            .field("registry", &self.registry)
            .field("worker_generation", &self.worker.generation)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_phase_transitions_are_enumerated() {
        let mut p = RunPhase::Running;
        p.advance(RunPhase::TimedOut);
        p.advance(RunPhase::Interrupting);
        p.advance(RunPhase::Retired);
        assert_eq!(p, RunPhase::Retired);
    }

    #[test]
    #[should_panic(expected = "illegal run phase transition")]
    #[cfg(debug_assertions)]
    fn run_phase_rejects_skipped_states() {
        let mut p = RunPhase::Running;
        p.advance(RunPhase::Joined);
    }
}
