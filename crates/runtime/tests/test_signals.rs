//! Signal delivery: flags set asynchronously, dispatched between
//! instructions through the trap machinery, resuming at the exact
//! instruction boundary with all state intact.

mod common;

use common::{run_fragment, symbol_mci, toplevel_mci, Asm};
use serial_test::serial;
use skiff_core::Word;
use skiff_runtime::{signal, Machine, Op};

const TEST_SIGNUM: usize = 10; // SIGUSR1

/// A pending signal invokes the trap handler for its condition between
/// instructions, and the interrupted computation's registers survive.
#[test]
#[serial]
fn test_signal_dispatch_between_instructions() {
    let mut m = Machine::new();
    let sig_mci = symbol_mci(&mut m, "^rt-signal-condition");
    let seen_mci = symbol_mci(&mut m, "seen");
    let kci = toplevel_mci(&mut m);

    let handler_name = m.intern("test-signal-handler");
    m.install_signal(TEST_SIGNUM, handler_name);

    // first run: define seen := 0 and build the handler closure
    // (lambda (c) (set! seen 1))
    let mut handler = Asm::new();
    handler.op(Op::Arity2P);
    handler.op(Op::ExtendFrame);
    handler.fixnum(1);
    handler.op(Op::GlobalSymSet).reference(seen_mci);
    handler.op(Op::Return);

    let mut a = Asm::new();
    a.fixnum(0);
    a.op(Op::GlobalSymDef).reference(seen_mci).varuint(kci);
    a.op(Op::GlobalSymSet).reference(seen_mci);
    a.closure(&handler, 0, 0);
    let clos = run_fragment(&mut m, a);

    // arm the trap around the second run
    m.push_trap(clos, Word::fixnum(sig_mci as i64));

    // the flag arrives "asynchronously" before the loop starts
    signal::set_pending(TEST_SIGNUM);

    // the interrupted computation: reg1 and val must survive dispatch
    let mut a = Asm::new();
    a.fixnum(21);
    a.op(Op::PushValue);
    a.fixnum(21);
    a.op(Op::PopReg1);
    a.op(Op::PrimCall2Add);
    for _ in 0..8 {
        a.op(Op::Nop);
    }
    let v = run_fragment(&mut m, a);
    assert_eq!(v, Word::fixnum(42), "interrupted computation unharmed");

    m.pop_trap();

    let seen_sym = m.intern("seen");
    let rec = skiff_core::module::find_symbol(&m.heap, m.base_module, seen_sym).unwrap();
    assert_eq!(m.values_ref(rec.gvi), Word::fixnum(1), "handler ran");

    signal::default_signal(TEST_SIGNUM);
}

/// The OS handler only sets the flag; delivery via `raise(2)` lands in
/// the atomic table, nothing more.
#[test]
#[serial]
#[cfg(unix)]
fn test_os_handler_sets_flag_only() {
    signal::trap_signal(TEST_SIGNUM);
    assert!(!signal::take_pending(TEST_SIGNUM));

    unsafe {
        libc::raise(TEST_SIGNUM as libc::c_int);
    }

    assert!(signal::take_pending(TEST_SIGNUM), "flag set by the handler");
    assert!(!signal::take_pending(TEST_SIGNUM), "and consumed exactly once");
    signal::default_signal(TEST_SIGNUM);
}

/// Signals with no registered condition still drain their flag.
#[test]
#[serial]
fn test_unregistered_signal_flag_drains() {
    let mut m = Machine::new();
    signal::set_pending(TEST_SIGNUM + 1);

    let mut a = Asm::new();
    a.fixnum(7);
    a.op(Op::Nop);
    let v = run_fragment(&mut m, a);
    assert_eq!(v, Word::fixnum(7));
    assert!(!signal::take_pending(TEST_SIGNUM + 1), "flag consumed");
}
