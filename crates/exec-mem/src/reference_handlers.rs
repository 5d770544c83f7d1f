//! A reference three-handler callback table, kept here so downstream
//! integration tests (and anyone bringing up a new encoder against this
//! crate) have a known-good, minimal [`RuntimeContext::handlers`] table to
//! validate their calling convention against before wiring in real host
//! callbacks.
//!
//! `handler0` takes no arguments and returns `11`; `handler1` takes one
//! argument and returns `22`, logging the argument it was given; `handler2`
//! takes two arguments and returns their sum. None of the three do anything
//! useful beyond being distinguishable and arity-diverse.

use crate::runtime_context::RuntimeContext;

pub unsafe extern "C" fn handler0() -> i64 {
    log::debug!("reference handler0 called");
    11
}

pub unsafe extern "C" fn handler1(x: i64) -> i64 {
    log::debug!("reference handler1 called with {}", x);
    22
}

pub unsafe extern "C" fn handler2(x: i64, y: i64) -> i64 {
    log::debug!("reference handler2 called with {}, {}", x, y);
    x + y
}

/// Builds a [`RuntimeContext`] with all three reference handlers installed
/// at their conventional slots (0, 1, 2).
pub fn install(ctx: &mut RuntimeContext) {
    ctx.set_handler(0, handler0 as *const ());
    ctx.set_handler(1, handler1 as *const ());
    ctx.set_handler(2, handler2 as *const ());
}
