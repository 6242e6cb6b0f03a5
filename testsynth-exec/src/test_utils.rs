// SPDX-License-Identifier: Apache-2.0

//! Sample programs under test, as registries, for integration tests, the
//! search crates' tests, and the driver demo. Each builder returns the
//! registry together with the ids tests need to assemble statements.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use testsynth_sym::constraint::Relation;
use testsynth_sym::expr::Expr;
use testsynth_tc::catalog::{ClassId, FieldId, MemberId};
use testsynth_tc::types::{IntKind, Type};

use crate::registry::{PutRaise, PutRegistry, RegistryBuilder};
use crate::value::Value;

pub struct AccountPut {
    pub registry: Arc<PutRegistry>,
    pub class: ClassId,
    pub ctor: MemberId,
    pub deposit: MemberId,
    pub withdraw: MemberId,
    pub balance: FieldId,
}

/// A small stateful class: `Account::new(initial)`, `deposit(amount)`,
/// `withdraw(amount)` over an i64 `balance` field.
///
/// Branch ids: 0 `initial >= 0` (ctor), 1 `amount > 0` (deposit),
/// 2 `amount <= balance` (withdraw).
pub fn account_put() -> AccountPut {
    let mut b = RegistryBuilder::new();
    let class = b.add_class("Account", None);
    let balance = b.add_field(class, "balance", Type::Int(IntKind::I64));
    let ctor = b.add_constructor(
        class,
        "Account::new",
        vec![Type::Int(IntKind::I64)],
        move |ctx, view| {
            let initial = view.arg(0).as_i64().unwrap_or(0);
            let arg = ctx.arg(0);
            if !ctx.branch(0, &arg, Relation::Ge, &Expr::int(0)) {
                return Err(PutRaise::explicit("negative initial balance"));
            }
            let obj = Value::new_object(class);
            if let Value::Object(o) = &obj {
                o.borrow_mut()
                    .fields
                    .insert(balance, Value::Int(IntKind::I64, initial));
            }
            Ok(obj)
        },
    );
    let deposit = b.add_method(
        class,
        "deposit",
        vec![Type::Int(IntKind::I64)],
        Some(Type::Bool),
        move |ctx, view| {
            let amount = view.arg(0).as_i64().unwrap_or(0);
            let arg = ctx.arg(0);
            if !ctx.branch(1, &arg, Relation::Gt, &Expr::int(0)) {
                return Ok(Value::Bool(false));
            }
            let obj = view.receiver().as_object().cloned();
            let obj = obj.ok_or_else(|| PutRaise::NullDeref("deposit on null".into()))?;
            let mut st = obj.borrow_mut();
            let old = st
                .fields
                .get(&balance)
                .and_then(Value::as_i64)
                .unwrap_or(0);
            st.fields
                .insert(balance, Value::Int(IntKind::I64, old.saturating_add(amount)));
            Ok(Value::Bool(true))
        },
    );
    let withdraw = b.add_method(
        class,
        "withdraw",
        vec![Type::Int(IntKind::I64)],
        Some(Type::Bool),
        move |ctx, view| {
            let amount = view.arg(0).as_i64().unwrap_or(0);
            let obj = view.receiver().as_object().cloned();
            let obj = obj.ok_or_else(|| PutRaise::NullDeref("withdraw on null".into()))?;
            let current = obj
                .borrow()
                .fields
                .get(&balance)
                .and_then(Value::as_i64)
                .unwrap_or(0);
            let arg = ctx.arg(0);
            if !ctx.branch(2, &arg, Relation::Le, &Expr::int(current)) {
                return Err(PutRaise::explicit("insufficient funds"));
            }
            let mut st = obj.borrow_mut();
            st.fields
                .insert(balance, Value::Int(IntKind::I64, current - amount));
            Ok(Value::Bool(true))
        },
    );
    AccountPut {
        registry: b.build(),
        class,
        ctor,
        deposit,
        withdraw,
        balance,
    }
}

pub struct TrianglePut {
    pub registry: Arc<PutRegistry>,
    pub classify: MemberId,
}

/// Triangle-classification category returned by [`triangle_put`]'s
/// `classify`.
pub const TRIANGLE_INVALID: i64 = 0;
pub const TRIANGLE_SCALENE: i64 = 1;
pub const TRIANGLE_ISOSCELES: i64 = 2;
pub const TRIANGLE_EQUILATERAL: i64 = 3;

/// The classic classifier: `classify(a, b, c) -> i64` with branch ids 0..=6.
/// Reaching the equilateral outcome takes three equal positive sides, which
/// makes it a worthwhile concolic target.
pub fn triangle_put() -> TrianglePut {
    let mut b = RegistryBuilder::new();
    let classify = b.add_function(
        "classify",
        vec![
            Type::Int(IntKind::I64),
            Type::Int(IntKind::I64),
            Type::Int(IntKind::I64),
        ],
        Some(Type::Int(IntKind::I64)),
        |ctx, _view| {
            let a = ctx.arg(0);
            let b = ctx.arg(1);
            let c = ctx.arg(2);
            let zero = Expr::int(0);
            if ctx.branch(0, &a, Relation::Le, &zero)
                || ctx.branch(1, &b, Relation::Le, &zero)
                || ctx.branch(2, &c, Relation::Le, &zero)
            {
                return Ok(Value::Int(IntKind::I64, TRIANGLE_INVALID));
            }
            let category = if ctx.branch(3, &a, Relation::Eq, &b) {
                if ctx.branch(4, &b, Relation::Eq, &c) {
                    TRIANGLE_EQUILATERAL
                } else {
                    TRIANGLE_ISOSCELES
                }
            } else if ctx.branch(5, &b, Relation::Eq, &c) {
                TRIANGLE_ISOSCELES
            } else if ctx.branch(6, &a, Relation::Eq, &c) {
                TRIANGLE_ISOSCELES
            } else {
                TRIANGLE_SCALENE
            };
            Ok(Value::Int(IntKind::I64, category))
        },
    );
    TrianglePut {
        registry: b.build(),
        classify,
    }
}

pub struct HazardPut {
    pub registry: Arc<PutRegistry>,
    /// Loops until the cooperative cancellation flag is set.
    pub spin: MemberId,
    /// Loops forever ignoring the flag; forces worker retirement.
    pub hard_hang: MemberId,
    /// Panics with a string payload.
    pub boom: MemberId,
    /// Raises deliberately.
    pub refuse: MemberId,
    /// Spawns `n` tracked threads that stop on the flag.
    pub spawn_workers: MemberId,
}

/// Misbehaving functions exercising every path through the harness: hangs,
/// panics, deliberate raises, and program-spawned threads.
pub fn hazard_put() -> HazardPut {
    let mut b = RegistryBuilder::new();
    let spin = b.add_function("spin", vec![], None, |ctx, _view| loop {
        if ctx.cancelled() {
            return Err(PutRaise::Cancelled);
        }
        thread::yield_now();
    });
    let hard_hang = b.add_function("hard_hang", vec![], None, |_ctx, _view| loop {
        thread::sleep(Duration::from_millis(5));
    });
    let boom = b.add_function("boom", vec![], None, |_ctx, _view| {
        panic!("boom");
    });
    let refuse = b.add_function("refuse", vec![], None, |_ctx, _view| {
        Err(PutRaise::explicit("refused on principle"))
    });
    let spawn_workers = b.add_function(
        "spawn_workers",
        vec![Type::Int(IntKind::I64)],
        None,
        |ctx, view| {
            let n = view.arg(0).as_i64().unwrap_or(0).clamp(0, 8);
            for _ in 0..n {
                ctx.spawn(|flag| {
                    while !flag.load(std::sync::atomic::Ordering::Relaxed) {
                        thread::yield_now();
                    }
                });
            }
            Ok(Value::Null)
        },
    );
    HazardPut {
        registry: b.build(),
        spin,
        hard_hang,
        boom,
        refuse,
        spawn_workers,
    }
}
