//! Continuation capture, re-entry and the krun abort machinery.

mod common;

use common::{run_fragment, symbol_mci, Asm};
use skiff_core::{Object, Word};
use skiff_runtime::{Machine, Op};

/// `(call/cc (lambda (k) k))` in tail position hands the continuation
/// back as the run's value; invoking it later re-enters the finished
/// run — twice, with different values, independently.
#[test]
fn test_call_cc_re_entry() {
    let mut m = Machine::new();
    let ccc_mci = symbol_mci(&mut m, "%%call/cc");

    // receiver: (lambda (k) k)
    let mut receiver = Asm::new();
    receiver.op(Op::Arity2P);
    receiver.op(Op::ExtendFrame);
    receiver.op(Op::ShallowArgumentRef0);
    receiver.op(Op::Return);

    let mut a = Asm::new();
    a.op(Op::GlobalSymRef).reference(ccc_mci);
    a.op(Op::PushValue);
    a.closure(&receiver, 0, 0);
    a.op(Op::PushValue);
    a.call_tail(1, true);

    let k = run_fragment(&mut m, a);
    assert!(
        matches!(m.heap.get(k), Object::Continuation(_)),
        "the run's value is the captured continuation"
    );

    // stash k in a value slot so bytecode can reach it
    let k_gvi = m.extend_values();
    m.values_set(k_gvi, k);

    // invoke k with 42: the resumption completes the original run's
    // continuation and delivers 42
    let mut a = Asm::new();
    a.op(Op::Predefined).varuint(k_gvi as u64);
    a.op(Op::PushValue);
    a.fixnum(42);
    a.op(Op::PushValue);
    a.call_tail(1, true);
    assert_eq!(run_fragment(&mut m, a), Word::fixnum(42));

    // and again with a different value: an independent resumption
    let mut a = Asm::new();
    a.op(Op::Predefined).varuint(k_gvi as u64);
    a.op(Op::PushValue);
    a.fixnum(43);
    a.op(Op::PushValue);
    a.call_tail(1, true);
    assert_eq!(run_fragment(&mut m, a), Word::fixnum(43));
}

/// `(+ 1 (call/cc (lambda (k) (k 41))))`: the receiver invokes the
/// continuation immediately and the addition still happens.
#[test]
fn test_call_cc_escape() {
    let mut m = Machine::new();
    let ccc_mci = symbol_mci(&mut m, "%%call/cc");

    // receiver: (lambda (k) (k 41)) — tail-invokes the continuation
    let mut receiver = Asm::new();
    receiver.op(Op::Arity2P);
    receiver.op(Op::ExtendFrame);
    receiver.op(Op::ShallowArgumentRef0);
    receiver.op(Op::PushValue);
    receiver.fixnum(41);
    receiver.op(Op::PushValue);
    receiver.call_tail(1, true);

    let mut a = Asm::new();
    // evaluate the call/cc sub-expression (non-tail), then add 1
    a.op(Op::PreserveState);
    a.op(Op::GlobalSymRef).reference(ccc_mci);
    a.op(Op::PushValue);
    a.closure(&receiver, 0, 0);
    a.op(Op::PushValue);
    a.call_tail(1, false);
    a.op(Op::RestoreState);
    a.op(Op::PushValue);
    a.fixnum(1);
    a.op(Op::PopReg1);
    // reg1 = call/cc value (41), val = 1
    a.op(Op::PrimCall2Add);

    assert_eq!(run_fragment(&mut m, a), Word::fixnum(42));
}

#[test]
fn test_make_and_restore_continuation_primitives() {
    let mut m = Machine::new();
    let make_mci = symbol_mci(&mut m, "%%make-continuation");

    // capture via the primitive; first pass returns the continuation,
    // resumption returns whatever was passed
    let mut a = Asm::new();
    a.op(Op::GlobalSymRef).reference(make_mci);
    a.op(Op::PushValue);
    a.call_tail(0, true);

    let k = run_fragment(&mut m, a);
    assert!(matches!(m.heap.get(k), Object::Continuation(_)));

    let restore_mci = symbol_mci(&mut m, "%%restore-continuation");
    let k_gvi = m.extend_values();
    m.values_set(k_gvi, k);

    let mut a = Asm::new();
    a.op(Op::GlobalSymRef).reference(restore_mci);
    a.op(Op::PushValue);
    a.op(Op::Predefined).varuint(k_gvi as u64);
    a.op(Op::PushValue);
    a.fixnum(7);
    a.op(Op::PushValue);
    a.call_tail(2, true);
    assert_eq!(run_fragment(&mut m, a), Word::fixnum(7));
}

/// ABORT stores an offset-adjusted continuation on the krun stack and
/// the base handlers use it to get back to toplevel on unhandled
/// conditions.
#[test]
fn test_abort_and_unhandled_condition_returns_to_toplevel() {
    let mut m = Machine::new();
    let raise_mci = symbol_mci(&mut m, "raise");

    // a condition value to raise
    let ty = m.conditions.error;
    let c = m.make_condition(ty, "deliberate", "", &[]);
    let c_gvi = m.extend_values();
    m.values_set(c_gvi, c);

    let mut a = Asm::new();
    // ABORT to just past the raising call: operand is the distance from
    // the instruction after ABORT's operand to the recovery point
    let abort_at = {
        a.op(Op::Abort);
        // distance patched below; varuints are variable-width so emit
        // the final value directly: the protected span is fixed
        let span: u64 = 0;
        let at = a.code.len();
        a.varuint(span);
        at
    };
    let protected_start = a.code.len();
    // raise an ^error nothing traps (the birth handlers catch it and
    // jump to krun slot 0 — installed by the ABORT above)
    a.op(Op::GlobalSymRef).reference(raise_mci);
    a.op(Op::PushValue);
    a.op(Op::Predefined).varuint(c_gvi as u64);
    a.op(Op::PushValue);
    a.call_tail(1, false);
    let protected_end = a.code.len();
    // recovery point: the aborted run resumes here
    a.fixnum(99);

    // single-byte varuint expected for this short span
    let span = (protected_end - protected_start) as u64;
    assert!(span <= 240, "span must encode in the reserved varuint byte");
    a.code.write_fixuint(1, abort_at, span);

    let v = run_fragment(&mut m, a);
    assert_eq!(v, Word::fixnum(99), "the default handler aborts to toplevel");
}
