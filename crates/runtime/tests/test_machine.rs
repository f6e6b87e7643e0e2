//! Whole-machine behaviours: garbage collection under a live program,
//! handle finalization, host-side calls, and the exit artifacts.

mod common;

use common::{run_fragment, symbol_mci, Asm};
use skiff_core::{Object, Word};
use skiff_runtime::{Machine, Op, Unwind};

#[test]
fn test_collect_preserves_machine_state() {
    let mut m = Machine::new();
    let mci = symbol_mci(&mut m, "kept");
    let kci = common::toplevel_mci(&mut m);

    // bind a list, collect, and read it back through the VM
    let mut a = Asm::new();
    a.op(Op::GlobalSymRef).reference(symbol_mci(&mut m, "list"));
    a.op(Op::PushValue);
    a.fixnum(1);
    a.op(Op::PushValue);
    a.fixnum(2);
    a.op(Op::PushValue);
    a.call_tail(2, false);
    a.op(Op::GlobalSymDef).reference(mci).varuint(kci);
    a.op(Op::GlobalSymSet).reference(mci);
    run_fragment(&mut m, a);

    let live_before = m.heap.len();
    m.collect_garbage();
    assert!(m.heap.len() <= live_before);

    let mut a = Asm::new();
    a.op(Op::GlobalSymRef).reference(mci);
    let v = run_fragment(&mut m, a);
    assert_eq!(
        skiff_core::pair::list_to_vec(&m.heap, v).unwrap(),
        vec![Word::fixnum(1), Word::fixnum(2)]
    );
}

#[test]
fn test_collect_finalizes_dropped_file_handle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("finalized.txt");

    let mut m = Machine::new();
    let hw = skiff_runtime::handle::open_file_handle(&mut m, path.to_str().unwrap(), "w")
        .expect("open for write");
    skiff_runtime::handle::puts(&mut m, hw, "flushed by the finalizer").unwrap();

    // the handle is reachable from nothing: the collector must close it
    let stats = m.heap.collect(Vec::<Word>::new());
    assert!(stats.finalized >= 1, "unreachable handle finalized");

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content, "flushed by the finalizer");
}

#[test]
fn test_file_handle_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.txt");

    let mut m = Machine::new();
    let hw = skiff_runtime::handle::open_file_handle(&mut m, path.to_str().unwrap(), "w").unwrap();
    skiff_runtime::handle::puts(&mut m, hw, "ab").unwrap();
    skiff_runtime::handle::close(&mut m, hw).unwrap();

    let rh = skiff_runtime::handle::open_file_handle(&mut m, path.to_str().unwrap(), "r").unwrap();
    assert_eq!(skiff_runtime::handle::getb(&mut m, rh).unwrap(), Some(b'a'));
    assert_eq!(skiff_runtime::handle::getb(&mut m, rh).unwrap(), Some(b'b'));
    assert_eq!(skiff_runtime::handle::getb(&mut m, rh).unwrap(), None);
    assert!(skiff_runtime::handle::at_eof(&m, rh));
}

#[test]
fn test_string_output_handle_via_vm() {
    // display into a string handle through primitives
    let mut m = Machine::new();
    let oos_mci = symbol_mci(&mut m, "open-output-string");
    let puts_mci = symbol_mci(&mut m, "handle-puts");
    let gos_mci = symbol_mci(&mut m, "get-output-string");
    let h_mci = symbol_mci(&mut m, "the-handle");
    let kci = common::toplevel_mci(&mut m);

    let msg = skiff_core::strings::alloc(&mut m.heap, "hello");
    let msg_ci = m.extend_constants(msg) as u64;

    let mut a = Asm::new();
    // the-handle := (open-output-string)
    a.op(Op::GlobalSymRef).reference(oos_mci);
    a.op(Op::PushValue);
    a.call_tail(0, false);
    a.op(Op::GlobalSymDef).reference(h_mci).varuint(kci);
    a.op(Op::GlobalSymSet).reference(h_mci);
    // (handle-puts the-handle "hello")
    a.op(Op::GlobalSymRef).reference(puts_mci);
    a.op(Op::PushValue);
    a.op(Op::GlobalSymRef).reference(h_mci);
    a.op(Op::PushValue);
    a.op(Op::ConstantSymRef).varuint(msg_ci);
    a.op(Op::PushValue);
    a.call_tail(2, false);
    // (get-output-string the-handle)
    a.op(Op::GlobalSymRef).reference(gos_mci);
    a.op(Op::PushValue);
    a.op(Op::GlobalSymRef).reference(h_mci);
    a.op(Op::PushValue);
    a.call_tail(1, true);

    let v = run_fragment(&mut m, a);
    assert_eq!(skiff_core::strings::text(&m.heap, v), Some("hello"));
}

#[test]
fn test_host_call_runs_closure() {
    // Machine::call preserves and restores all interpreter state
    let mut m = Machine::new();

    let mut body = Asm::new();
    body.op(Op::Arity2P);
    body.op(Op::ExtendFrame);
    body.op(Op::ShallowArgumentRef0);
    body.op(Op::PushValue);
    body.fixnum(1);
    body.op(Op::PopReg1);
    body.op(Op::PrimCall2Add);
    body.op(Op::Return);

    let mut a = Asm::new();
    a.closure(&body, 0, 0);
    let clos = run_fragment(&mut m, a);

    m.thread.val = Word::fixnum(17); // must survive the call
    let r = m.call(clos, &[Word::fixnum(41)]).unwrap();
    assert_eq!(r, Word::fixnum(42));
    assert_eq!(m.thread.val, Word::fixnum(17), "all-state restored");
}

#[test]
fn test_exit_unwinds_all_runs() {
    let mut m = Machine::new();
    let exit_mci = symbol_mci(&mut m, "exit");

    let mut a = Asm::new();
    a.op(Op::GlobalSymRef).reference(exit_mci);
    a.op(Op::PushValue);
    a.fixnum(3);
    a.op(Op::PushValue);
    a.call_tail(1, false);
    let pc0 = a.load(&mut m);
    m.thread.pc = pc0;

    match m.run("exit test") {
        Err(Unwind::Exit(3)) => {}
        other => panic!("expected Exit(3), got {other:?}"),
    }
}

#[test]
fn test_exit_artifacts_written() {
    let dir = tempfile::tempdir().unwrap();
    let mut m = Machine::new();
    let mut a = Asm::new();
    a.fixnum(1);
    run_fragment(&mut m, a);

    m.dump_exit_artifacts(dir.path()).unwrap();
    for name in ["vm-dasm", "vm-constants", "vm-values"] {
        let text = std::fs::read_to_string(dir.path().join(name)).unwrap();
        assert!(!text.is_empty(), "{name} has content");
    }
    let dasm = std::fs::read_to_string(dir.path().join("vm-dasm")).unwrap();
    assert!(dasm.contains("FINISH"));
}

#[test]
fn test_heap_growth_then_collect() {
    // burn through garbage in a loop; the machine stays consistent
    let mut m = Machine::new();
    let list_mci = symbol_mci(&mut m, "list");

    for _ in 0..50 {
        let mut a = Asm::new();
        a.op(Op::GlobalSymRef).reference(list_mci);
        a.op(Op::PushValue);
        a.fixnum(1);
        a.op(Op::PushValue);
        a.call_tail(1, true);
        run_fragment(&mut m, a);
        m.collect_garbage();
    }
    // the machine's own structures survive every collection
    assert!(matches!(
        m.heap.get(m.base_module),
        Object::Module(_)
    ));
}
