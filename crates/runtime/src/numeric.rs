//! Numeric dispatch
//!
//! Fixnum fast paths with silent promotion to bignum on overflow, and
//! mixed fixnum/bignum arithmetic.  The specialized PRIMCALL opcodes
//! route here directly; the general `+`/`-`/... primitives fold their
//! argument lists through the same two-operand functions, so the fast
//! paths cannot drift from the slow ones.

use skiff_core::bignum::{self, Bignum};
use skiff_core::heap::Object;
use skiff_core::word::{FIXNUM_MAX, FIXNUM_MIN};
use skiff_core::Word;

use crate::unwind::VmResult;
use crate::vm::Machine;

pub fn is_number(m: &Machine, w: Word) -> bool {
    w.is_fixnum() || matches!(m.heap.try_get(w), Some(Object::Bignum(_)))
}

fn to_bignum(m: &mut Machine, w: Word) -> VmResult<Bignum> {
    if let Some(n) = w.as_fixnum() {
        return Ok(Bignum::from_i64(n));
    }
    match m.heap.try_get(w) {
        Some(Object::Bignum(b)) => Ok(b.clone()),
        _ => Err(m.error_param_type("number", w)),
    }
}

/// Box a bignum result, collapsing exact integers back into the fixnum
/// range where they fit.
fn boxed(m: &mut Machine, n: Bignum) -> Word {
    if n.is_integer()
        && let Some(v) = n.to_fixnum()
    {
        return Word::fixnum(v);
    }
    m.alloc_bignum(n)
}

fn bignum_op(
    m: &mut Machine,
    a: Word,
    b: Word,
    f: fn(&Bignum, &Bignum) -> bignum::Result<Bignum>,
) -> VmResult<Word> {
    let ba = to_bignum(m, a)?;
    let bb = to_bignum(m, b)?;
    match f(&ba, &bb) {
        Ok(r) => Ok(boxed(m, r)),
        Err(e) => Err(m.error_bignum(e, a)),
    }
}

pub fn add2(m: &mut Machine, a: Word, b: Word) -> VmResult<Word> {
    if let (Some(fa), Some(fb)) = (a.as_fixnum(), b.as_fixnum()) {
        // overflow silently promotes
        if let Some(r) = fa.checked_add(fb)
            && (FIXNUM_MIN..=FIXNUM_MAX).contains(&r)
        {
            return Ok(Word::fixnum(r));
        }
    }
    bignum_op(m, a, b, bignum::real_add)
}

pub fn sub2(m: &mut Machine, a: Word, b: Word) -> VmResult<Word> {
    if let (Some(fa), Some(fb)) = (a.as_fixnum(), b.as_fixnum()) {
        if let Some(r) = fa.checked_sub(fb)
            && (FIXNUM_MIN..=FIXNUM_MAX).contains(&r)
        {
            return Ok(Word::fixnum(r));
        }
    }
    bignum_op(m, a, b, bignum::real_subtract)
}

pub fn mul2(m: &mut Machine, a: Word, b: Word) -> VmResult<Word> {
    if let (Some(fa), Some(fb)) = (a.as_fixnum(), b.as_fixnum()) {
        if let Some(r) = fa.checked_mul(fb)
            && (FIXNUM_MIN..=FIXNUM_MAX).contains(&r)
        {
            return Ok(Word::fixnum(r));
        }
    }
    bignum_op(m, a, b, bignum::real_multiply)
}

fn is_zero(m: &Machine, w: Word) -> bool {
    if let Some(n) = w.as_fixnum() {
        return n == 0;
    }
    matches!(m.heap.try_get(w), Some(Object::Bignum(b)) if b.is_zero())
}

/// Division is real division; dividing by an exact zero raises.
pub fn div2(m: &mut Machine, a: Word, b: Word) -> VmResult<Word> {
    if is_zero(m, b) {
        let nums = skiff_core::pair::cons(&mut m.heap, a, b);
        return Err(m.error_divide_by_zero("/", nums));
    }
    bignum_op(m, a, b, bignum::real_divide)
}

pub fn remainder2(m: &mut Machine, a: Word, b: Word) -> VmResult<Word> {
    if let (Some(fa), Some(fb)) = (a.as_fixnum(), b.as_fixnum()) {
        if fb == 0 {
            let nums = skiff_core::pair::cons(&mut m.heap, a, b);
            return Err(m.error_divide_by_zero("remainder", nums));
        }
        return Ok(Word::fixnum(fa % fb));
    }
    integer_divide(m, a, b).map(|(_, r)| r)
}

pub fn quotient2(m: &mut Machine, a: Word, b: Word) -> VmResult<Word> {
    if let (Some(fa), Some(fb)) = (a.as_fixnum(), b.as_fixnum()) {
        if fb == 0 {
            let nums = skiff_core::pair::cons(&mut m.heap, a, b);
            return Err(m.error_divide_by_zero("quotient", nums));
        }
        // FIXNUM_MIN / -1 leaves the fixnum range
        if let Some(r) = fa.checked_div(fb)
            && (FIXNUM_MIN..=FIXNUM_MAX).contains(&r)
        {
            return Ok(Word::fixnum(r));
        }
    }
    integer_divide(m, a, b).map(|(q, _)| q)
}

fn integer_divide(m: &mut Machine, a: Word, b: Word) -> VmResult<(Word, Word)> {
    let ba = to_bignum(m, a)?;
    let bb = to_bignum(m, b)?;
    if !ba.is_integer() || !bb.is_integer() {
        let w = if ba.is_integer() { b } else { a };
        return Err(m.error_param_type("integer", w));
    }
    match bignum::divide(&ba, &bb) {
        Ok((q, r)) => Ok((boxed(m, q), boxed(m, r))),
        Err(e) => Err(m.error_bignum(e, a)),
    }
}

pub fn num_eq(m: &mut Machine, a: Word, b: Word) -> VmResult<bool> {
    if let (Some(fa), Some(fb)) = (a.as_fixnum(), b.as_fixnum()) {
        return Ok(fa == fb);
    }
    let ba = to_bignum(m, a)?;
    let bb = to_bignum(m, b)?;
    Ok(bignum::real_eq(&ba, &bb))
}

pub fn num_lt(m: &mut Machine, a: Word, b: Word) -> VmResult<bool> {
    if let (Some(fa), Some(fb)) = (a.as_fixnum(), b.as_fixnum()) {
        return Ok(fa < fb);
    }
    let ba = to_bignum(m, a)?;
    let bb = to_bignum(m, b)?;
    Ok(bignum::real_lt(&ba, &bb))
}
