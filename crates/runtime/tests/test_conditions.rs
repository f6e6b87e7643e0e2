//! Trap dispatch: handler selection by condition type, handler return
//! through the trampolines, and raises from primitives.

mod common;

use common::{run_fragment, symbol_mci, Asm};
use skiff_core::Word;
use skiff_runtime::{Machine, Op};

/// With a trap for `^rt-divide-by-zero-error` that returns 0, `(/ 1 0)`
/// evaluates to 0 and the stack balances (the run harness asserts it).
#[test]
fn test_divide_by_zero_handled() {
    let mut m = Machine::new();
    let dbz_mci = symbol_mci(&mut m, "^rt-divide-by-zero-error");
    let div_mci = symbol_mci(&mut m, "/");

    // handler: (lambda (c) 0)
    let mut handler = Asm::new();
    handler.op(Op::Arity2P);
    handler.op(Op::ExtendFrame);
    handler.fixnum(0);
    handler.op(Op::Return);

    let mut a = Asm::new();
    a.closure(&handler, 0, 0);
    a.op(Op::PushTrap).reference(dbz_mci);
    // (/ 1 0), non-tail so the handler's return lands back here
    a.op(Op::GlobalSymRef).reference(div_mci);
    a.op(Op::PushValue);
    a.fixnum(1);
    a.op(Op::PushValue);
    a.fixnum(0);
    a.op(Op::PushValue);
    a.call_tail(2, false);
    a.op(Op::PopTrap);

    assert_eq!(run_fragment(&mut m, a), Word::fixnum(0));
}

/// Nested traps of types (A inside B): raising an instance of A invokes
/// A's handler; raising an instance of B walks past A and invokes only
/// B's.
#[test]
fn test_nested_trap_dispatch() {
    let mut m = Machine::new();
    // A = ^rt-divide-by-zero-error, B = ^error (A isa B)
    let a_mci = symbol_mci(&mut m, "^rt-divide-by-zero-error");
    let b_mci = symbol_mci(&mut m, "^error");
    let div_mci = symbol_mci(&mut m, "/");
    let raise_mci = symbol_mci(&mut m, "raise");

    // a B-instance that is not an A: a plain ^error
    let ty = m.conditions.error;
    let c = m.make_condition(ty, "plain error", "", &[]);
    let c_gvi = m.extend_values();
    m.values_set(c_gvi, c);

    let build = |m: &mut Machine, raise_b: bool| {
        let mut h_b = Asm::new();
        h_b.op(Op::Arity2P);
        h_b.op(Op::ExtendFrame);
        h_b.fixnum(2); // B's marker
        h_b.op(Op::Return);

        let mut h_a = Asm::new();
        h_a.op(Op::Arity2P);
        h_a.op(Op::ExtendFrame);
        h_a.fixnum(1); // A's marker
        h_a.op(Op::Return);

        let mut a = Asm::new();
        a.closure(&h_b, 0, 0);
        a.op(Op::PushTrap).reference(b_mci); // outer
        a.closure(&h_a, 0, 0);
        a.op(Op::PushTrap).reference(a_mci); // inner
        if raise_b {
            a.op(Op::GlobalSymRef).reference(raise_mci);
            a.op(Op::PushValue);
            a.op(Op::Predefined).varuint(c_gvi as u64);
            a.op(Op::PushValue);
            a.call_tail(1, false);
        } else {
            a.op(Op::GlobalSymRef).reference(div_mci);
            a.op(Op::PushValue);
            a.fixnum(1);
            a.op(Op::PushValue);
            a.fixnum(0);
            a.op(Op::PushValue);
            a.call_tail(2, false);
        }
        a.op(Op::PopTrap);
        a.op(Op::PopTrap);
        a
    };

    let a = build(&mut m, false);
    assert_eq!(run_fragment(&mut m, a), Word::fixnum(1), "A handled by A");

    let a = build(&mut m, true);
    assert_eq!(run_fragment(&mut m, a), Word::fixnum(2), "B skips A's trap");
}

/// The handler runs under its parent's protection: a raise from inside
/// the matched handler reaches the next trap out, not itself.
#[test]
fn test_handler_runs_under_parent_protection() {
    let mut m = Machine::new();
    let err_mci = symbol_mci(&mut m, "^error");
    let div_mci = symbol_mci(&mut m, "/");

    // outer handler returns 20
    let mut outer = Asm::new();
    outer.op(Op::Arity2P);
    outer.op(Op::ExtendFrame);
    outer.fixnum(20);
    outer.op(Op::Return);

    // inner handler re-divides by zero: must hit the OUTER handler, not
    // loop on itself
    let mut inner = Asm::new();
    inner.op(Op::Arity2P);
    inner.op(Op::ExtendFrame);
    inner.op(Op::PreserveState);
    inner.op(Op::GlobalSymRef).reference(div_mci);
    inner.op(Op::PushValue);
    inner.fixnum(1);
    inner.op(Op::PushValue);
    inner.fixnum(0);
    inner.op(Op::PushValue);
    inner.call_tail(2, false);
    inner.op(Op::RestoreState);
    inner.op(Op::Return);

    let mut a = Asm::new();
    a.closure(&outer, 0, 0);
    a.op(Op::PushTrap).reference(err_mci);
    a.closure(&inner, 0, 0);
    a.op(Op::PushTrap).reference(err_mci);
    a.op(Op::GlobalSymRef).reference(div_mci);
    a.op(Op::PushValue);
    a.fixnum(1);
    a.op(Op::PushValue);
    a.fixnum(0);
    a.op(Op::PushValue);
    a.call_tail(2, false);
    a.op(Op::PopTrap);
    a.op(Op::PopTrap);

    assert_eq!(run_fragment(&mut m, a), Word::fixnum(20));
}

/// Raising through `raise` with a condition built by the struct
/// primitives.
#[test]
fn test_raise_user_condition() {
    let mut m = Machine::new();
    let err_mci = symbol_mci(&mut m, "^error");
    let raise_mci = symbol_mci(&mut m, "raise");

    let ty = m.conditions.error;
    let c = m.make_condition(ty, "user raised", "", &[]);
    let c_gvi = m.extend_values();
    m.values_set(c_gvi, c);

    let mut handler = Asm::new();
    handler.op(Op::Arity2P);
    handler.op(Op::ExtendFrame);
    // return the condition itself so the test can inspect it
    handler.op(Op::ShallowArgumentRef0);
    handler.op(Op::Return);

    let mut a = Asm::new();
    a.closure(&handler, 0, 0);
    a.op(Op::PushTrap).reference(err_mci);
    a.op(Op::GlobalSymRef).reference(raise_mci);
    a.op(Op::PushValue);
    a.op(Op::Predefined).varuint(c_gvi as u64);
    a.op(Op::PushValue);
    a.call_tail(1, false);
    a.op(Op::PopTrap);

    let v = run_fragment(&mut m, a);
    assert_eq!(v, c, "the handler received the raised condition");
}

/// Closing an already-closed handle raises `^i/o-closed-handle-error`.
#[test]
fn test_double_close_raises() {
    let mut m = Machine::new();
    let closed_mci = symbol_mci(&mut m, "^i/o-closed-handle-error");
    let close_mci = symbol_mci(&mut m, "close-handle");

    let hw = skiff_runtime::handle::open_output_string(&mut m);
    let h_gvi = m.extend_values();
    m.values_set(h_gvi, hw);

    let mut handler = Asm::new();
    handler.op(Op::Arity2P);
    handler.op(Op::ExtendFrame);
    handler.fixnum(1);
    handler.op(Op::Return);

    let mut a = Asm::new();
    a.closure(&handler, 0, 0);
    a.op(Op::PushTrap).reference(closed_mci);
    // first close is fine
    a.op(Op::GlobalSymRef).reference(close_mci);
    a.op(Op::PushValue);
    a.op(Op::Predefined).varuint(h_gvi as u64);
    a.op(Op::PushValue);
    a.call_tail(1, false);
    // second close raises
    a.op(Op::GlobalSymRef).reference(close_mci);
    a.op(Op::PushValue);
    a.op(Op::Predefined).varuint(h_gvi as u64);
    a.op(Op::PushValue);
    a.call_tail(1, false);
    a.op(Op::PopTrap);

    assert_eq!(run_fragment(&mut m, a), Word::fixnum(1));
}

/// NON-CONT-ERR raises an unrecoverable condition; with nothing between
/// it and the birth handlers the run aborts via the krun continuation.
#[test]
fn test_non_cont_err_aborts() {
    let mut m = Machine::new();

    let mut a = Asm::new();
    // an ABORT entry for the base handlers to land on
    let abort_at = {
        a.op(Op::Abort);
        let at = a.code.len();
        a.varuint(0);
        at
    };
    let span_start = a.code.len();
    a.op(Op::NonContErr);
    let span_end = a.code.len();
    a.fixnum(5);
    a.code
        .write_fixuint(1, abort_at, (span_end - span_start) as u64);

    assert_eq!(run_fragment(&mut m, a), Word::fixnum(5));
}
