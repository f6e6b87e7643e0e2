//! Dispatch-loop basics: literals, jumps, globals, dynamic-extent
//! bindings, and the stack/marker discipline.

mod common;

use common::{run_fragment, symbol_mci, toplevel_mci, Asm};
use skiff_core::{module, Word};
use skiff_runtime::{Machine, Op};

#[test]
fn test_fixnum_literal() {
    let mut m = Machine::new();
    let mut a = Asm::new();
    a.fixnum(42);
    assert_eq!(run_fragment(&mut m, a), Word::fixnum(42));
}

#[test]
fn test_neg_fixnum_and_small_constants() {
    let mut m = Machine::new();
    let mut a = Asm::new();
    a.op(Op::NegFixnum).varuint(7);
    assert_eq!(run_fragment(&mut m, a), Word::fixnum(-7));

    let mut a = Asm::new();
    a.op(Op::Constant3);
    assert_eq!(run_fragment(&mut m, a), Word::fixnum(3));
}

#[test]
fn test_character_literal() {
    let mut m = Machine::new();
    let mut a = Asm::new();
    a.op(Op::Character).varuint('x' as u64);
    assert_eq!(run_fragment(&mut m, a), Word::character('x'));
}

#[test]
fn test_predefined_booleans() {
    let mut m = Machine::new();
    let mut a = Asm::new();
    a.op(Op::Predefined0);
    assert_eq!(run_fragment(&mut m, a), Word::TRUE);

    let mut a = Asm::new();
    a.op(Op::Predefined1);
    assert_eq!(run_fragment(&mut m, a), Word::FALSE);

    let mut a = Asm::new();
    a.op(Op::Predefined2);
    assert_eq!(run_fragment(&mut m, a), Word::NIL);
}

#[test]
fn test_short_jump_false_takes_else() {
    // #f ? 1 : 2
    let mut m = Machine::new();
    let mut a = Asm::new();
    a.op(Op::Predefined1); // val = #f
    let jf = a.short_jump(Op::ShortJumpFalse);
    a.fixnum(1);
    let jend = a.short_jump(Op::ShortGoto);
    a.patch_to_here(jf);
    a.fixnum(2);
    a.patch_to_here(jend);
    assert_eq!(run_fragment(&mut m, a), Word::fixnum(2));
}

#[test]
fn test_jump_true_on_non_false() {
    // nil counts as true: everything except #f is
    let mut m = Machine::new();
    let mut a = Asm::new();
    a.op(Op::Predefined2); // val = nil
    let jt = a.short_jump(Op::ShortJumpTrue);
    a.fixnum(1);
    let jend = a.short_jump(Op::ShortGoto);
    a.patch_to_here(jt);
    a.fixnum(2);
    a.patch_to_here(jend);
    assert_eq!(run_fragment(&mut m, a), Word::fixnum(2));
}

#[test]
fn test_primcall2_add_fast_path() {
    let mut m = Machine::new();
    let mut a = Asm::new();
    // push 2, load 3 into val, pop the 2 into reg1
    a.fixnum(2);
    a.op(Op::PushValue);
    a.fixnum(3);
    a.op(Op::PopReg1);
    a.op(Op::PrimCall2Add);
    assert_eq!(run_fragment(&mut m, a), Word::fixnum(5));
}

#[test]
fn test_global_def_set_ref() {
    let mut m = Machine::new();
    let mci = symbol_mci(&mut m, "answer");
    let kci = toplevel_mci(&mut m);

    let mut a = Asm::new();
    a.fixnum(42);
    a.op(Op::GlobalSymDef).reference(mci).varuint(kci);
    a.op(Op::GlobalSymSet).reference(mci);
    a.fixnum(0); // clobber val
    a.op(Op::GlobalSymRef).reference(mci);
    assert_eq!(run_fragment(&mut m, a), Word::fixnum(42));
}

#[test]
fn test_global_ref_memoizes_vvi() {
    // the symbol-lookup path runs once; the second ref hits the cache
    let mut m = Machine::new();
    let mci = symbol_mci(&mut m, "+");

    let mut a = Asm::new();
    a.op(Op::GlobalSymRef).reference(mci);
    run_fragment(&mut m, a);

    let base = m.base_module;
    let cached = module::with(&m.heap, base).get_vvi(mci);
    assert!(cached.is_some_and(|gvi| gvi != 0), "vvi must be cached");

    // and the cached slot resolves to the same value
    let mut a = Asm::new();
    a.op(Op::GlobalSymRef).reference(mci);
    let v = run_fragment(&mut m, a);
    assert_eq!(Some(v), m.primitive_value("+"));
}

#[test]
fn test_unbound_symbol_evaluates_to_itself() {
    // shell-style dispatch: unknown names denote external programs
    let mut m = Machine::new();
    let mci = symbol_mci(&mut m, "ls");

    let mut a = Asm::new();
    a.op(Op::GlobalSymRef).reference(mci);
    let v = run_fragment(&mut m, a);
    assert_eq!(m.heap.symbol_text(v), Some("ls"));
}

#[test]
fn test_push_pop_registers() {
    let mut m = Machine::new();
    let mut a = Asm::new();
    a.fixnum(1);
    a.op(Op::PushValue);
    a.fixnum(2);
    a.op(Op::PushValue);
    a.op(Op::PopReg1); // reg1 = 2
    a.op(Op::PopReg2); // reg2 = 1
    a.fixnum(9);
    run_fragment(&mut m, a);
    assert_eq!(m.thread.reg1, Word::fixnum(2));
    assert_eq!(m.thread.reg2, Word::fixnum(1));
}

#[test]
fn test_dynamic_binding_shadows_and_unwinds() {
    let mut m = Machine::new();
    let mci = symbol_mci(&mut m, "*depth*");

    // global value 1
    let kci = toplevel_mci(&mut m);
    let mut a = Asm::new();
    a.fixnum(1);
    a.op(Op::GlobalSymDef).reference(mci).varuint(kci);
    a.op(Op::GlobalSymSet).reference(mci);
    // push a dynamic binding of 2 and read it back
    a.fixnum(2);
    a.op(Op::PushDynamic).reference(mci);
    a.op(Op::DynamicSymRef).reference(mci);
    a.op(Op::PushValue);
    // pop the binding; the global shows through again
    a.op(Op::PopDynamic);
    a.op(Op::DynamicSymRef).reference(mci);
    a.op(Op::PopReg1);
    run_fragment(&mut m, a);
    assert_eq!(m.thread.reg1, Word::fixnum(2), "inside the dynamic extent");
    assert_eq!(m.thread.val, Word::fixnum(1), "outside it");
}

#[test]
fn test_environ_ref_defaults_to_unset() {
    let mut m = Machine::new();
    let mci = symbol_mci(&mut m, "NOSUCHVAR");

    let mut a = Asm::new();
    a.op(Op::EnvironSymRef).reference(mci);
    assert_eq!(run_fragment(&mut m, a), Word::UNSET);
}

#[test]
fn test_environ_binding() {
    let mut m = Machine::new();
    let mci = symbol_mci(&mut m, "HOME");

    let mut a = Asm::new();
    a.fixnum(7); // stands in for a string value
    a.op(Op::PushEnviron).reference(mci);
    a.op(Op::EnvironSymRef).reference(mci);
    a.op(Op::PushValue);
    a.op(Op::PopEnviron);
    a.op(Op::PopValue);
    assert_eq!(run_fragment(&mut m, a), Word::fixnum(7));
}

#[test]
#[should_panic(expected = "unexpected stack marker")]
fn test_tampered_marker_panics() {
    // the marker discipline is fatal by design
    let mut m = Machine::new();
    let mut a = Asm::new();
    a.op(Op::PreserveState);
    // overwrite the marker with something else
    a.fixnum(0);
    a.op(Op::PushValue);
    a.op(Op::RestoreState);
    let _ = run_fragment(&mut m, a);
}

#[test]
#[should_panic(expected = "unknown opcode")]
fn test_unknown_opcode_is_fatal() {
    let mut m = Machine::new();
    let mut a = Asm::new();
    a.byte(0xfe);
    let _ = run_fragment(&mut m, a);
}

#[test]
fn test_computed_variable_define_ref_set() {
    // SECONDS is predefined as a computed variable; define our own too
    let mut m = Machine::new();
    let getter = m.primitive_value("SECONDS/get").unwrap();
    let mci = symbol_mci(&mut m, "NOW");

    // build the accessor pair in val then COMPUTED-SYM-DEFINE
    let gvi = {
        let pair = skiff_core::pair::cons(&mut m.heap, getter, Word::NIL);
        let slot = m.extend_values();
        m.values_set(slot, pair);
        slot
    };
    // wire the binding by hand the way the instruction would
    let sym = m.intern("NOW");
    let base = m.base_module;
    module::set_symbol(
        &mut m.heap,
        base,
        sym,
        skiff_core::BindingRecord {
            scope: Word::COMPUTED,
            mci,
            gvi,
            module: base,
            desc: "test".to_string(),
        },
    );
    module::with_mut(&mut m.heap, base).set_vvi(mci, gvi);

    let mut a = Asm::new();
    a.op(Op::ComputedSymRef).reference(mci);
    let v = run_fragment(&mut m, a);
    assert!(v.as_fixnum().is_some(), "SECONDS-backed getter yields a fixnum");
}

#[test]
fn test_computed_variable_without_setter_raises() {
    // a computed variable whose accessor pair has no setter raises on
    // set; observe via a trap whose handler returns a marker value
    let mut m = Machine::new();
    let mci = symbol_mci(&mut m, "RO");
    let err_mci = symbol_mci(&mut m, "^rt-computed-variable-no-accessor-error");
    let getter = m.primitive_value("SECONDS/get").unwrap();

    // getter only; nothing infers a default setter
    let accessors = skiff_core::pair::cons(&mut m.heap, getter, Word::NIL);
    let gvi = m.extend_values();
    m.values_set(gvi, accessors);
    let sym = m.intern("RO");
    let base = m.base_module;
    module::set_symbol(
        &mut m.heap,
        base,
        sym,
        skiff_core::BindingRecord {
            scope: Word::COMPUTED,
            mci,
            gvi,
            module: base,
            desc: "test".to_string(),
        },
    );
    module::with_mut(&mut m.heap, base).set_vvi(mci, gvi);

    // handler closure: (lambda (c) 99)
    let mut body = Asm::new();
    body.op(Op::Arity2P);
    body.op(Op::ExtendFrame);
    body.fixnum(99);
    body.op(Op::Return);

    let mut a = Asm::new();
    a.closure(&body, 0, 0);
    a.op(Op::PushTrap).reference(err_mci);
    a.fixnum(5);
    a.op(Op::ComputedSymSet).reference(mci);
    a.op(Op::PopTrap);
    assert_eq!(run_fragment(&mut m, a), Word::fixnum(99));
}
