// SPDX-License-Identifier: Apache-2.0

//! Worker-side interpreter: executes a test case's statements in order
//! against a fresh scope, invoking registry behaviors and classifying their
//! failures. The harness owns timing and worker management; this module is
//! what actually runs on the worker thread.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use testsynth_sym::expr::Expr;
use testsynth_tc::test::{StatementKind, TestCase, VarRef};

use crate::context::{PutCtx, TraceMode};
use crate::harness::EngineError;
use crate::observer::ExecutionObserver;
use crate::registry::{CallView, PutRaise, PutRegistry};
use crate::result::{ExecutionResult, ExecutionTrace, FailureKind, PutFailure};
use crate::scope::{ResolveError, Scope};
use crate::value::Value;

#[derive(Debug, Clone, Copy)]
pub struct RunOpts {
    pub mode: TraceMode,
    /// Continue past a failing statement instead of stopping at the first.
    pub keep_going: bool,
    pub snapshot_scope: bool,
    /// Absolute point after which leftover program-under-test threads are
    /// abandoned rather than joined.
    pub deadline: Instant,
}

enum StmtOutcome {
    Ok,
    Failed(PutFailure),
    Cancelled,
}

/// Executes `test` to completion (or cancellation) on the calling thread.
/// This is the worker entry point; callers wanting time-boxing go through
/// `TestExecutor::run`.
pub fn run_test(
    registry: &PutRegistry,
    test: &TestCase,
    opts: &RunOpts,
    cancel: Arc<AtomicBool>,
    mut observers: Vec<Box<dyn ExecutionObserver>>,
) -> Result<ExecutionResult, EngineError> {
    let start = Instant::now();
    let mut scope = Scope::new();
    let mut trace = ExecutionTrace::default();
    let mut exceptions: BTreeMap<usize, PutFailure> = BTreeMap::new();
    // Positions whose value never materialized because the defining
    // statement failed (or was itself skipped). Such statements are skipped,
    // not recorded as failures of their own.
    let mut unavailable: std::collections::BTreeSet<usize> = std::collections::BTreeSet::new();
    let mut executed = 0usize;
    let mut ctx = PutCtx::new(cancel.clone(), opts.mode, &mut trace);

    for pos in 0..test.len() {
        if cancel.load(Ordering::Relaxed) {
            ctx_mark_cancelled(&mut ctx);
            break;
        }
        if test
            .statement(pos)
            .reads()
            .iter()
            .any(|r| unavailable.contains(&r.defining_pos()))
        {
            unavailable.insert(pos);
            continue;
        }
        for o in observers.iter_mut() {
            o.before_statement(pos, test);
        }
        match exec_stmt(registry, &mut ctx, &mut scope, test, pos)? {
            StmtOutcome::Ok => {
                executed += 1;
                for o in observers.iter_mut() {
                    o.after_statement(pos, test, &scope, None);
                }
            }
            StmtOutcome::Failed(failure) => {
                executed += 1;
                for o in observers.iter_mut() {
                    o.after_statement(pos, test, &scope, Some(&failure));
                }
                log::debug!("statement {} failed: {}", pos, failure);
                exceptions.insert(pos, failure);
                unavailable.insert(pos);
                if !opts.keep_going {
                    break;
                }
            }
            StmtOutcome::Cancelled => {
                ctx_mark_cancelled(&mut ctx);
                break;
            }
        }
    }

    let threads = ctx.take_threads();
    let cancel_for_threads = ctx.cancel_flag();
    drop(ctx);
    let abandoned_threads = join_put_threads(threads, &cancel_for_threads, opts.deadline);

    let scope_summary = if opts.snapshot_scope {
        Some(scope.summarize(registry.catalog()))
    } else {
        None
    };

    Ok(ExecutionResult {
        exceptions,
        executed,
        trace,
        wall: start.elapsed(),
        scope_summary,
        observers,
        abandoned_threads,
    })
}

fn ctx_mark_cancelled(ctx: &mut PutCtx) {
    // Cancellation is observable in the trace so the harness can tell a
    // cooperative stop from a normal finish.
    ctx.trace_mut().cancelled = true;
}

/// Best-effort join of program-under-test threads: flag them to stop, then
/// poll until the deadline. Whatever is still running is abandoned to its
/// fate and counted.
fn join_put_threads(
    threads: Vec<thread::JoinHandle<()>>,
    cancel: &Arc<AtomicBool>,
    deadline: Instant,
) -> usize {
    if threads.is_empty() {
        return 0;
    }
    cancel.store(true, Ordering::Relaxed);
    let mut pending = threads;
    loop {
        let mut still_running = Vec::new();
        for h in pending {
            if h.is_finished() {
                let _ = h.join();
            } else {
                still_running.push(h);
            }
        }
        pending = still_running;
        if pending.is_empty() || Instant::now() >= deadline {
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    if !pending.is_empty() {
        log::warn!("abandoning {} program-under-test thread(s)", pending.len());
    }
    pending.len()
}

fn exec_stmt(
    registry: &PutRegistry,
    ctx: &mut PutCtx,
    scope: &mut Scope,
    test: &TestCase,
    pos: usize,
) -> Result<StmtOutcome, EngineError> {
    let s = test.statement(pos);
    match &s.kind {
        StatementKind::Primitive(v) => {
            let value = Value::from_primitive(v);
            if let Some(scalar) = value.as_scalar() {
                scope.bind_shadow(pos, Expr::var(format!("v{}", pos), scalar));
            }
            scope.bind(pos, value);
            Ok(StmtOutcome::Ok)
        }
        StatementKind::Null(_) => {
            scope.bind(pos, Value::Null);
            Ok(StmtOutcome::Ok)
        }
        StatementKind::Construct { ctor, args } => {
            invoke(registry, ctx, scope, pos, *ctor, None, args, &s.ret_ty)
        }
        StatementKind::Call {
            member,
            receiver,
            args,
        } => {
            let recv = match receiver {
                Some(r) => match scope.resolve(r) {
                    Ok(v) if v.is_null() => {
                        return Ok(StmtOutcome::Failed(PutFailure::implicit(
                            FailureKind::NullDereference,
                            format!("call receiver {} is null", r),
                        )))
                    }
                    Ok(v) => Some(v),
                    Err(e) => return resolve_outcome(e),
                },
                None => None,
            };
            invoke(
                registry,
                ctx,
                scope,
                pos,
                *member,
                recv,
                args,
                &s.ret_ty,
            )
        }
        StatementKind::FieldRead { object, field } => {
            let obj = match scope.resolve(object) {
                Ok(v) => v,
                Err(e) => return resolve_outcome(e),
            };
            if obj.is_null() {
                return Ok(StmtOutcome::Failed(PutFailure::implicit(
                    FailureKind::NullDereference,
                    format!("field read through null {}", object),
                )));
            }
            let handle = obj.as_object().ok_or_else(|| {
                EngineError::Internal(format!("field read on non-object at v{}", pos))
            })?;
            let value = handle
                .borrow()
                .fields
                .get(field)
                .cloned()
                .unwrap_or(Value::Null);
            scope.bind(pos, value);
            Ok(StmtOutcome::Ok)
        }
        StatementKind::NewArray { elem_ty, len } => {
            let cells = vec![Value::default_of(elem_ty); *len];
            scope.bind(
                pos,
                Value::Array(crate::value::ArrayValue {
                    elem_ty: elem_ty.clone(),
                    cells: std::rc::Rc::new(std::cell::RefCell::new(cells)),
                }),
            );
            Ok(StmtOutcome::Ok)
        }
        StatementKind::StoreIndex {
            array,
            index,
            value,
        } => {
            let arr = match scope.resolve(array) {
                Ok(v) => v,
                Err(e) => return resolve_outcome(e),
            };
            if arr.is_null() {
                return Ok(StmtOutcome::Failed(PutFailure::implicit(
                    FailureKind::NullDereference,
                    format!("element store through null {}", array),
                )));
            }
            let arr = arr.as_array().ok_or_else(|| {
                EngineError::Internal(format!("element store on non-array at v{}", pos))
            })?;
            let v = match scope.resolve(value) {
                Ok(v) => v,
                Err(e) => return resolve_outcome(e),
            };
            let mut cells = arr.cells.borrow_mut();
            if *index >= cells.len() {
                return Ok(StmtOutcome::Failed(PutFailure::implicit(
                    FailureKind::IndexOutOfBounds,
                    format!(
                        "store index {} out of bounds for length {}",
                        index,
                        cells.len()
                    ),
                )));
            }
            cells[*index] = v;
            Ok(StmtOutcome::Ok)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn invoke(
    registry: &PutRegistry,
    ctx: &mut PutCtx,
    scope: &mut Scope,
    pos: usize,
    member: testsynth_tc::catalog::MemberId,
    receiver: Option<Value>,
    args: &[VarRef],
    ret_ty: &testsynth_tc::types::Type,
) -> Result<StmtOutcome, EngineError> {
    let mut arg_values = Vec::with_capacity(args.len());
    let mut arg_shadows = Vec::with_capacity(args.len());
    for r in args {
        let v = match scope.resolve(r) {
            Ok(v) => v,
            Err(e) => return resolve_outcome(e),
        };
        arg_shadows.push(shadow_for(scope, r, &v));
        arg_values.push(v);
    }
    let behavior = registry
        .behavior(member)
        .ok_or(EngineError::MissingBehavior { member })?;
    ctx.begin_call(arg_shadows);
    let view = CallView {
        member,
        receiver: receiver.as_ref(),
        args: &arg_values,
    };
    let outcome = catch_unwind(AssertUnwindSafe(|| behavior(ctx, &view)));
    match outcome {
        Err(payload) => Ok(StmtOutcome::Failed(PutFailure::implicit(
            FailureKind::Panic,
            panic_message(payload),
        ))),
        Ok(Err(PutRaise::Cancelled)) => Ok(StmtOutcome::Cancelled),
        Ok(Err(raise)) => Ok(StmtOutcome::Failed(failure_from_raise(raise))),
        Ok(Ok(value)) => {
            if !ret_ty.is_void() {
                if let Some(shadow) = ctx.take_result_shadow() {
                    scope.bind_shadow(pos, shadow);
                }
                scope.bind(pos, value);
            }
            Ok(StmtOutcome::Ok)
        }
    }
}

/// Expression view of an argument: primitives carry their symbolic variable,
/// any other scalar becomes a constant, objects have no scalar view.
fn shadow_for(scope: &Scope, r: &VarRef, v: &Value) -> Option<Expr> {
    if let VarRef::Pos(p) = r {
        if let Some(e) = scope.shadow(*p) {
            return Some(e.clone());
        }
    }
    v.as_scalar().map(Expr::constant)
}

fn resolve_outcome(e: ResolveError) -> Result<StmtOutcome, EngineError> {
    match e {
        ResolveError::Unbound { pos } => Err(EngineError::Internal(format!(
            "reference to v{} has no binding in a validated test",
            pos
        ))),
        ResolveError::MissingField { pos } => Err(EngineError::Internal(format!(
            "reference through v{} resolved to an incompatible value",
            pos
        ))),
        ResolveError::NullBase { pos } => Ok(StmtOutcome::Failed(PutFailure::implicit(
            FailureKind::NullDereference,
            format!("null value at v{}", pos),
        ))),
        ResolveError::IndexOutOfBounds { pos, index, len } => {
            Ok(StmtOutcome::Failed(PutFailure::implicit(
                FailureKind::IndexOutOfBounds,
                format!("index {} out of bounds for v{} of length {}", index, pos, len),
            )))
        }
    }
}

fn failure_from_raise(raise: PutRaise) -> PutFailure {
    match raise {
        PutRaise::Explicit(msg) => PutFailure::raised(msg),
        PutRaise::NullDeref(msg) => PutFailure::implicit(FailureKind::NullDereference, msg),
        PutRaise::IndexOutOfBounds(msg) => {
            PutFailure::implicit(FailureKind::IndexOutOfBounds, msg)
        }
        PutRaise::Arithmetic(msg) => PutFailure::implicit(FailureKind::Arithmetic, msg),
        PutRaise::Cancelled => PutFailure::implicit(FailureKind::Timeout, "cancelled".to_string()),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
