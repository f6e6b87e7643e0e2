//! Numeric semantics through the dispatch loop: bignum precision,
//! exactness contamination, fixnum promotion.

mod common;

use common::{run_fragment, symbol_mci, Asm};
use skiff_core::bignum;
use skiff_core::{Object, Word};
use skiff_runtime::{Machine, Op};

fn bignum_constant(m: &mut Machine, text: &str) -> u64 {
    let n = bignum::from_str(text).expect("test constant must parse");
    let w = m.alloc_bignum(n);
    m.extend_constants(w) as u64
}

/// `(* 12345678901234567890 10)` stays exact: 123456789012345678900.
#[test]
fn test_bignum_multiply_precision() {
    let mut m = Machine::new();
    let big_ci = bignum_constant(&mut m, "12345678901234567890");

    let mut a = Asm::new();
    a.op(Op::ConstantSymRef).varuint(big_ci);
    a.op(Op::PushValue);
    a.fixnum(10);
    a.op(Op::PopReg1);
    a.op(Op::PrimCall2Multiply);

    let v = run_fragment(&mut m, a);
    match m.heap.get(v) {
        Object::Bignum(b) => {
            assert!(b.is_integer(), "exact integer");
            assert!(!b.is_inexact());
            assert_eq!(b.to_text(), "123456789012345678900");
        }
        other => panic!("expected bignum, got {}", other.type_name()),
    }
}

/// `(+ 1 2.0)` with an inexact 2.0 yields 3.0 with the inexact flag set.
#[test]
fn test_inexact_contamination() {
    let mut m = Machine::new();
    let two = bignum::real_to_inexact(&bignum::real_from_str("2.0").unwrap());
    let two_w = m.alloc_bignum(two);
    let two_ci = m.extend_constants(two_w) as u64;

    let mut a = Asm::new();
    a.fixnum(1);
    a.op(Op::PushValue);
    a.op(Op::ConstantSymRef).varuint(two_ci);
    a.op(Op::PopReg1);
    a.op(Op::PrimCall2Add);

    let v = run_fragment(&mut m, a);
    match m.heap.get(v) {
        Object::Bignum(b) => {
            assert!(b.is_real());
            assert!(b.is_inexact(), "inexactness contaminates the sum");
            assert!(bignum::real_eq(b, &bignum::real_from_str("3.0").unwrap()));
        }
        other => panic!("expected bignum, got {}", other.type_name()),
    }
}

/// The general varargs `+` primitive agrees with the fast path.
#[test]
fn test_varargs_addition() {
    let mut m = Machine::new();
    let plus_mci = symbol_mci(&mut m, "+");

    let mut a = Asm::new();
    a.op(Op::GlobalSymRef).reference(plus_mci);
    a.op(Op::PushValue);
    for n in [1u64, 2, 3, 4] {
        a.fixnum(n);
        a.op(Op::PushValue);
    }
    a.call_tail(4, true);

    assert_eq!(run_fragment(&mut m, a), Word::fixnum(10));
}

/// A constant bignum is deep-copied into val, so mutating arithmetic
/// can never corrupt the constants table.
#[test]
fn test_constant_bignum_copied() {
    let mut m = Machine::new();
    let big_ci = bignum_constant(&mut m, "99999999999999999999");

    let mut a = Asm::new();
    a.op(Op::ConstantSymRef).varuint(big_ci);
    let v1 = run_fragment(&mut m, a);

    let mut a = Asm::new();
    a.op(Op::ConstantSymRef).varuint(big_ci);
    let v2 = run_fragment(&mut m, a);

    assert_ne!(v1, v2, "each reference reifies a fresh copy");
    assert!(skiff_core::equal::equal(&m.heap, v1, v2));
}

/// Comparison chain through the general primitive.
#[test]
fn test_comparison_chain() {
    let mut m = Machine::new();
    let lt_mci = symbol_mci(&mut m, "<");

    let mut a = Asm::new();
    a.op(Op::GlobalSymRef).reference(lt_mci);
    a.op(Op::PushValue);
    for n in [1u64, 2, 3] {
        a.fixnum(n);
        a.op(Op::PushValue);
    }
    a.call_tail(3, true);
    assert_eq!(run_fragment(&mut m, a), Word::TRUE);

    let mut a = Asm::new();
    a.op(Op::GlobalSymRef).reference(lt_mci);
    a.op(Op::PushValue);
    for n in [1u64, 3, 2] {
        a.fixnum(n);
        a.op(Op::PushValue);
    }
    a.call_tail(3, true);
    assert_eq!(run_fragment(&mut m, a), Word::FALSE);
}

/// string->number round trip across the fixnum/bignum boundary.
#[test]
fn test_string_to_number() {
    let mut m = Machine::new();
    let stn_mci = symbol_mci(&mut m, "string->number");
    let small = skiff_core::strings::alloc(&mut m.heap, "42");
    let small_ci = m.extend_constants(small) as u64;

    let mut a = Asm::new();
    a.op(Op::GlobalSymRef).reference(stn_mci);
    a.op(Op::PushValue);
    a.op(Op::ConstantSymRef).varuint(small_ci);
    a.op(Op::PushValue);
    a.call_tail(1, true);
    assert_eq!(run_fragment(&mut m, a), Word::fixnum(42));
}
