//! Arbitrary-precision decimal arithmetic
//!
//! A bignum is a significand array of base-10 "digit segments" — each
//! `i64` holds [`DPW`] decimal digits — plus a signed exponent and flags.
//! Integers carry their sign on the most significant segment; reals carry
//! it in a flag and keep every segment non-negative.
//!
//! Exact integers grow without bound.  Reals are normalized to at most
//! [`SIG_MAX_DIGITS`] significant digits; dropping a non-zero digit sets
//! the inexact flag.  Exponent over/underflow is an error the runtime
//! raises as `^rt-bignum-conversion-error`.
//!
//! All operations here are pure: they take references and build new
//! values.  Sign handling routes through the absolute-value operation and
//! negates afterwards, so the segment arithmetic only ever sees
//! non-negative operands.

use std::fmt;

use bitflags::bitflags;

use crate::word::{FIXNUM_MAX, FIXNUM_MIN};

/// Decimal digits per segment.  10^DPW and a carry must fit an `i64`.
pub const DPW: usize = 18;
/// 10^DPW.
pub const SEG_LIMIT: i64 = 1_000_000_000_000_000_000;
/// Significant digits kept by real normalization.
pub const SIG_MAX_DIGITS: usize = 18;
/// Whole segments kept by the cheap whole-segment truncation when
/// converting an integer to a real; `normalize` then trims digit by
/// digit down to [`SIG_MAX_DIGITS`].
pub const SIG_SEGMENTS: usize = 2;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BignumFlags: u8 {
        const INTEGER  = 1 << 0;
        const REAL     = 1 << 1;
        const NEGATIVE = 1 << 2;
        const INEXACT  = 1 << 3;
        const NAN      = 1 << 4;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BignumError {
    ExponentOverflow,
    ExponentUnderflow,
    DivideByZero,
    Parse(String),
}

impl fmt::Display for BignumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BignumError::ExponentOverflow => write!(f, "exponent overflow"),
            BignumError::ExponentUnderflow => write!(f, "exponent underflow"),
            BignumError::DivideByZero => write!(f, "divide by zero"),
            BignumError::Parse(s) => write!(f, "bad number: {s}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, BignumError>;

#[derive(Debug, Clone, PartialEq)]
pub struct Bignum {
    pub flags: BignumFlags,
    pub exp: i32,
    /// least significant segment first
    pub sig: Vec<i64>,
}

fn strip_leading_zeroes(sig: &mut Vec<i64>) {
    while sig.len() > 1 && *sig.last().unwrap() == 0 {
        sig.pop();
    }
}

impl Bignum {
    pub fn integer(mut sig: Vec<i64>) -> Bignum {
        if sig.is_empty() {
            sig.push(0);
        }
        strip_leading_zeroes(&mut sig);
        Bignum {
            flags: BignumFlags::INTEGER,
            exp: 0,
            sig,
        }
    }

    pub fn real(flags: BignumFlags, exp: i32, sig: Vec<i64>) -> Bignum {
        let mut flags = flags;
        flags.remove(BignumFlags::INTEGER);
        flags.insert(BignumFlags::REAL);
        Bignum { flags, exp, sig }
    }

    pub fn nan() -> Bignum {
        Bignum {
            flags: BignumFlags::REAL | BignumFlags::NAN,
            exp: 0,
            sig: vec![0],
        }
    }

    pub fn from_i64(v: i64) -> Bignum {
        let neg = v < 0;
        let mut m = (v as i128).unsigned_abs();
        let mut sig = Vec::with_capacity(2);
        loop {
            sig.push((m % SEG_LIMIT as u128) as i64);
            m /= SEG_LIMIT as u128;
            if m == 0 {
                break;
            }
        }
        if neg {
            let top = sig.last_mut().unwrap();
            *top = -*top;
        }
        Bignum::integer(sig)
    }

    pub fn is_integer(&self) -> bool {
        self.flags.contains(BignumFlags::INTEGER)
    }

    pub fn is_real(&self) -> bool {
        self.flags.contains(BignumFlags::REAL)
    }

    pub fn is_inexact(&self) -> bool {
        self.flags.contains(BignumFlags::INEXACT)
    }

    pub fn is_nan(&self) -> bool {
        self.flags.contains(BignumFlags::NAN)
    }

    pub fn is_negative(&self) -> bool {
        if self.is_integer() {
            *self.sig.last().unwrap() < 0
        } else {
            self.flags.contains(BignumFlags::NEGATIVE)
        }
    }

    pub fn is_zero(&self) -> bool {
        self.sig.len() == 1 && self.sig[0] == 0
    }

    /// |self| for integers.
    pub fn abs(&self) -> Bignum {
        let mut r = self.clone();
        let top = r.sig.last_mut().unwrap();
        *top = top.abs();
        r
    }

    pub fn negate(&self) -> Bignum {
        if self.is_integer() {
            let mut r = self.clone();
            let top = r.sig.last_mut().unwrap();
            *top = -*top;
            r
        } else {
            let mut r = self.clone();
            r.flags.toggle(BignumFlags::NEGATIVE);
            r
        }
    }

    /// Digits in the significand (ignoring the exponent).
    pub fn count_digits(&self) -> usize {
        let top = self.sig.last().unwrap().unsigned_abs();
        let top_digits = if top == 0 {
            1
        } else {
            (top.ilog10() + 1) as usize
        };
        (self.sig.len() - 1) * DPW + top_digits
    }

    /// Reinterpret the significand as an exact integer (used on reals,
    /// whose segments are non-negative).
    fn copy_to_integer(&self) -> Bignum {
        Bignum::integer(self.sig.clone())
    }

    /// Value as `i64` for small integers.
    pub fn to_i64(&self) -> Option<i64> {
        if !self.is_integer() {
            return None;
        }
        // the sign lives on the top segment; the magnitude combines the
        // absolute segments
        let mut v: i128 = 0;
        for &seg in self.sig.iter().rev() {
            v = v.checked_mul(SEG_LIMIT as i128)?;
            v = v.checked_add((seg as i128).abs())?;
        }
        if self.is_negative() {
            v = -v;
        }
        i64::try_from(v).ok()
    }

    /// `bignum→fixnum`: an exact integer within the fixnum range, else
    /// `None` (the VM hands back the not-a-fixnum sentinel).
    pub fn to_fixnum(&self) -> Option<i64> {
        if !self.is_integer() || self.sig.len() * DPW > 2 * DPW + 1 {
            return None;
        }
        let v = self.to_i64()?;
        (FIXNUM_MIN..=FIXNUM_MAX).contains(&v).then_some(v)
    }
}

// ---------------------------------------------------------------------
// integer arithmetic

pub fn add(a: &Bignum, b: &Bignum) -> Bignum {
    if a.is_negative() {
        if b.is_negative() {
            // -a + -b => -(|a| + |b|)
            return add(&a.abs(), &b.abs()).negate();
        }
        // -a + b => b - |a|
        return subtract(b, &a.abs());
    } else if b.is_negative() {
        // a + -b => a - |b|
        return subtract(a, &b.abs());
    }

    let al = a.sig.len();
    let bl = b.sig.len();
    let mut r = Vec::with_capacity(al.max(bl) + 1);
    let mut carry = 0i64;
    let mut i = 0;
    while i < al || i < bl || carry != 0 {
        let ia = if i < al { a.sig[i] } else { 0 };
        let ib = if i < bl { b.sig[i] } else { 0 };
        let mut ir = ia + ib + carry;
        carry = 0;
        if ir >= SEG_LIMIT {
            ir -= SEG_LIMIT;
            carry = 1;
        }
        r.push(ir);
        i += 1;
    }
    Bignum::integer(r)
}

pub fn subtract(a: &Bignum, b: &Bignum) -> Bignum {
    if a.is_negative() {
        if b.is_negative() {
            // -a - -b => |b| - |a|
            return subtract(&b.abs(), &a.abs());
        }
        // -a - b => -(|a| + b)
        return add(&a.abs(), b).negate();
    } else if b.is_negative() {
        // a - -b => a + |b|
        return add(a, &b.abs());
    }

    // a < b => -(b - a)
    if lt(a, b) {
        return subtract(b, a).negate();
    }

    let al = a.sig.len();
    let bl = b.sig.len();
    let mut r = Vec::with_capacity(al.max(bl));
    let mut borrow = 0i64;
    let mut i = 0;
    while i < al || i < bl || borrow != 0 {
        let ia = if i < al { a.sig[i] } else { 0 };
        let ib = if i < bl { b.sig[i] } else { 0 };
        let mut ir = ia - ib - borrow;
        borrow = 0;
        if ir < 0 {
            ir += SEG_LIMIT;
            borrow = 1;
        }
        r.push(ir);
        i += 1;
    }
    Bignum::integer(r)
}

/// integer a < b
pub fn lt(a: &Bignum, b: &Bignum) -> bool {
    let na = a.is_negative();
    let nb = b.is_negative();
    if na && !nb {
        return true;
    }
    if !na && nb {
        return false;
    }

    let al = a.sig.len();
    let bl = b.sig.len();
    if al < bl {
        return !na;
    }
    if al > bl {
        return na;
    }

    let aa = a.abs();
    let ab = b.abs();
    for i in (0..al).rev() {
        if aa.sig[i] < ab.sig[i] {
            return !na;
        }
        if aa.sig[i] > ab.sig[i] {
            return na;
        }
    }
    false
}

/// integer a == b (segment-wise, sign included)
pub fn eq(a: &Bignum, b: &Bignum) -> bool {
    a.sig == b.sig
}

/// Multiply the significand by 10, feeding `fill` in at the bottom.
pub fn shift_left(a: &Bignum, fill: i64) -> Bignum {
    let al = a.sig.len();
    let mut r = Vec::with_capacity(al + 1);
    let mut carry = fill;
    for (i, &seg) in a.sig.iter().enumerate() {
        debug_assert!(i == al - 1 || seg >= 0, "non-last segment < 0");
        let v = if seg >= SEG_LIMIT / 10 {
            let c = seg / (SEG_LIMIT / 10);
            let v = seg % (SEG_LIMIT / 10) * 10 + carry;
            carry = c;
            v
        } else {
            let v = seg * 10 + carry;
            carry = 0;
            v
        };
        r.push(v);
    }
    if carry != 0 {
        r.push(carry);
    }
    Bignum::integer(r)
}

/// Divide the significand by 10: `(quotient, remainder-digit)`.
pub fn shift_right(a: &Bignum) -> (Bignum, i64) {
    let al = a.sig.len().max(1);
    let mut r = vec![0i64; al];
    let mut carry = 0i64;
    for i in (0..al).rev() {
        let seg = a.sig.get(i).copied().unwrap_or(0);
        let c = seg % 10;
        r[i] = seg / 10 + carry * (SEG_LIMIT / 10);
        carry = c;
    }
    if r.len() > 1 && *r.last().unwrap() == 0 {
        r.pop();
    }
    (Bignum::integer(r), carry)
}

pub fn multiply(a: &Bignum, b: &Bignum) -> Bignum {
    let neg = a.is_negative() != b.is_negative();
    let mut aa = a.abs();
    let mut ab = b.abs();

    // 1234 * 11 => 4*11 + 3*110 + 2*1100 + 1*11000
    let mut r = Bignum::from_i64(0);
    while !aa.is_zero() {
        let (q, digit) = shift_right(&aa);
        aa = q;
        for _ in 0..digit {
            r = add(&r, &ab);
        }
        ab = shift_left(&ab, 0);
    }

    if neg { r.negate() } else { r }
}

/// Scale the divisor up by powers of 10 until it would exceed the
/// dividend: `(scaled-divisor, factor)`.
fn equalize(a: &Bignum, b: &Bignum) -> (Bignum, Bignum) {
    let mut rp = b.clone();
    let mut fp = Bignum::from_i64(1);
    let mut rn = rp.clone();
    let mut fn_ = fp.clone();
    while lt(&rn, a) {
        rp = rn.clone();
        fp = fn_.clone();
        rn = shift_left(&rn, 0);
        fn_ = shift_left(&fn_, 0);
    }
    (rp, fp)
}

/// Long division: `(a/b, a%b)`.
pub fn divide(a: &Bignum, b: &Bignum) -> Result<(Bignum, Bignum)> {
    if b.is_zero() {
        return Err(BignumError::DivideByZero);
    }

    let na = a.is_negative();
    let neg = na != b.is_negative();
    let aa = a.abs();
    let ab = b.abs();

    let mut r_div = Bignum::from_i64(0);
    let mut r_mod = aa.clone();

    if lt(&aa, &ab) && na {
        return Ok((r_div, a.clone()));
    }

    let (mut sd, mut sf) = equalize(&aa, &ab);

    while !sf.is_zero() {
        let mut c = Bignum::from_i64(0);
        let mut c0 = c.clone();
        let mut i = 0i64;
        while !lt(&r_mod, &c) {
            c0 = c.clone();
            c = add(&c, &sd);
            i += 1;
        }
        r_div = shift_left(&r_div, i - 1);
        r_mod = subtract(&r_mod, &c0);
        sf = shift_right(&sf).0;
        sd = shift_right(&sd).0;
    }

    if neg {
        r_div = r_div.negate();
    }
    if na {
        r_mod = r_mod.negate();
    }
    Ok((r_div, r_mod))
}

// ---------------------------------------------------------------------
// reals

/// Convert an integer to real form, truncating to [`SIG_SEGMENTS`] whole
/// segments (a cheap precision cut; `normalize` does the fine-grained
/// one).
pub fn to_real(a: &Bignum) -> Result<Bignum> {
    let neg = a.is_negative();
    let mut sig = a.sig.clone();
    let top = sig.last_mut().unwrap();
    *top = top.abs();

    let mut exp: i32 = 0;
    let mut flags = BignumFlags::empty();
    if sig.len() > SIG_SEGMENTS {
        let nshift = sig.len() - SIG_SEGMENTS;
        for _ in 0..nshift {
            if sig[0] != 0 {
                flags |= BignumFlags::INEXACT;
            }
            sig.remove(0);
        }
        exp = i32::try_from(nshift * DPW).map_err(|_| BignumError::ExponentOverflow)?;
    }
    if neg {
        flags |= BignumFlags::NEGATIVE;
    }
    normalize(&Bignum::real(flags, exp, sig))
}

/// Strip trailing zeroes (raising the exponent), cap the significand at
/// [`SIG_MAX_DIGITS`] digits (setting inexact if anything non-zero is
/// dropped), and detect exponent overflow.
pub fn normalize(bn: &Bignum) -> Result<Bignum> {
    let mut exp = bn.exp;
    let mut s = bn.copy_to_integer();
    let mut digits = s.count_digits();
    let mut inexact = bn.flags.contains(BignumFlags::INEXACT);

    while digits > SIG_MAX_DIGITS {
        let (q, dropped) = shift_right(&s);
        if dropped != 0 {
            inexact = true;
        }
        s = q;
        digits -= 1;
        exp = exp.checked_add(1).ok_or(BignumError::ExponentOverflow)?;
    }

    while !s.is_zero() {
        let (q, dropped) = shift_right(&s);
        if dropped != 0 {
            break;
        }
        s = q;
        exp = exp.checked_add(1).ok_or(BignumError::ExponentOverflow)?;
    }

    if s.is_zero() {
        exp = 0;
    }

    let mut flags = bn.flags;
    if inexact {
        flags |= BignumFlags::INEXACT;
    }
    Ok(Bignum::real(flags, exp, s.sig))
}

/// Multiply the significand out so the exponent drops to `desired_exp`.
/// `None` when the digit budget `max_size` has no room.
pub fn scale_significand(bn: &Bignum, desired_exp: i32, max_size: usize) -> Result<Option<Bignum>> {
    let digits = bn.count_digits();
    let gap = bn.exp as i64 - desired_exp as i64;
    if ((max_size - digits.min(max_size)) as i64) < gap {
        return Ok(None);
    }

    let mut s = bn.copy_to_integer();
    let mut exp = bn.exp;
    while exp > desired_exp {
        s = shift_left(&s, 0);
        exp = exp.checked_sub(1).ok_or(BignumError::ExponentUnderflow)?;
    }
    Ok(Some(Bignum::real(bn.flags, exp, s.sig)))
}

pub fn real_to_integer(bn: &Bignum) -> Result<Option<Bignum>> {
    if bn.exp < 0 {
        return Ok(None);
    }
    let Some(scaled) = scale_significand(bn, 0, SIG_MAX_DIGITS)? else {
        return Ok(None);
    };
    let mut i = scaled.copy_to_integer();
    if bn.flags.contains(BignumFlags::NEGATIVE) {
        i = i.negate();
    }
    Ok(Some(i))
}

pub fn real_to_inexact(bn: &Bignum) -> Bignum {
    Bignum::real(bn.flags | BignumFlags::INEXACT, bn.exp, bn.sig.clone())
}

pub fn real_to_exact(bn: &Bignum) -> Bignum {
    let mut flags = bn.flags;
    flags.remove(BignumFlags::INEXACT);
    Bignum::real(flags, bn.exp, bn.sig.clone())
}

fn promote(a: &Bignum) -> Result<Bignum> {
    if a.is_integer() { to_real(a) } else { Ok(a.clone()) }
}

pub fn real_add(a: &Bignum, b: &Bignum) -> Result<Bignum> {
    if a.is_integer() && b.is_integer() {
        return Ok(add(a, b));
    }

    let mut ra = promote(a)?;
    let mut rb = promote(b)?;

    let inexact = ra.is_inexact() || rb.is_inexact();

    if ra.exp < rb.exp {
        match scale_significand(&rb, ra.exp, SIG_MAX_DIGITS * 2)? {
            Some(s) => rb = s,
            None => return Ok(pick_larger_inexact(a, b)),
        }
    } else if ra.exp > rb.exp {
        match scale_significand(&ra, rb.exp, SIG_MAX_DIGITS * 2)? {
            Some(s) => ra = s,
            None => return Ok(pick_larger_inexact(a, b)),
        }
    }

    let exp = ra.exp;
    let mut ra_i = ra.copy_to_integer();
    if ra.flags.contains(BignumFlags::NEGATIVE) {
        ra_i = ra_i.negate();
    }
    let mut rb_i = rb.copy_to_integer();
    if rb.flags.contains(BignumFlags::NEGATIVE) {
        rb_i = rb_i.negate();
    }

    let r_i = add(&ra_i, &rb_i);
    let mut flags = if inexact {
        BignumFlags::INEXACT
    } else {
        BignumFlags::empty()
    };
    if r_i.is_negative() {
        flags |= BignumFlags::NEGATIVE;
    }
    normalize(&Bignum::real(flags, exp, r_i.abs().sig))
}

/// Operands too far apart to align within the precision budget: the
/// answer is the larger one, made inexact.
fn pick_larger_inexact(a: &Bignum, b: &Bignum) -> Bignum {
    if real_lt(a, b) {
        real_to_inexact(b)
    } else {
        real_to_inexact(a)
    }
}

pub fn real_subtract(a: &Bignum, b: &Bignum) -> Result<Bignum> {
    let nb = if b.is_integer() {
        b.negate()
    } else {
        let mut r = b.clone();
        r.flags.toggle(BignumFlags::NEGATIVE);
        r
    };
    real_add(a, &nb)
}

pub fn real_multiply(a: &Bignum, b: &Bignum) -> Result<Bignum> {
    if a.is_integer() && b.is_integer() {
        return Ok(multiply(a, b));
    }

    let ra = promote(a)?;
    if ra.is_zero() {
        return Ok(ra);
    }
    let rb = promote(b)?;
    if rb.is_zero() {
        return Ok(rb);
    }

    let inexact = ra.is_inexact() || rb.is_inexact();
    let neg = ra.flags.contains(BignumFlags::NEGATIVE) != rb.flags.contains(BignumFlags::NEGATIVE);

    let exp = match ra.exp.checked_add(rb.exp) {
        Some(e) => e,
        None => {
            return Err(if rb.exp < 0 {
                BignumError::ExponentUnderflow
            } else {
                BignumError::ExponentOverflow
            });
        }
    };

    let r_i = multiply(&ra.copy_to_integer(), &rb.copy_to_integer());

    let mut flags = BignumFlags::empty();
    if inexact {
        flags |= BignumFlags::INEXACT;
    }
    if neg {
        flags |= BignumFlags::NEGATIVE;
    }
    normalize(&Bignum::real(flags, exp, r_i.sig))
}

pub fn real_divide(a: &Bignum, b: &Bignum) -> Result<Bignum> {
    let ra = promote(a)?;
    if ra.is_zero() {
        return Ok(Bignum::real(BignumFlags::empty(), 0, vec![0]));
    }
    let rb = promote(b)?;
    if rb.is_zero() {
        return Ok(Bignum::nan());
    }

    let mut inexact = ra.is_inexact() || rb.is_inexact();
    let neg = ra.flags.contains(BignumFlags::NEGATIVE) != rb.flags.contains(BignumFlags::NEGATIVE);

    let mut expa = ra.exp;
    let expb = rb.exp;

    let mut ra_i = ra.copy_to_integer();
    let rb_i = rb.copy_to_integer();

    // bump the numerator by 10^n so the integer quotient carries
    // SIG_MAX_DIGITS significant digits
    let mut nd = ra.count_digits();
    let dd = SIG_MAX_DIGITS + rb.count_digits();
    while nd < dd {
        ra_i = shift_left(&ra_i, 0);
        nd += 1;
        expa = expa
            .checked_sub(1)
            .ok_or(BignumError::ExponentUnderflow)?;
    }

    let exp = match expa.checked_sub(expb) {
        Some(e) => e,
        None => {
            return Err(if expb > 0 {
                BignumError::ExponentUnderflow
            } else {
                BignumError::ExponentOverflow
            });
        }
    };

    let (r_i, rem) = divide(&ra_i, &rb_i)?;
    if !rem.is_zero() {
        inexact = true;
    }

    let mut flags = BignumFlags::empty();
    if inexact {
        flags |= BignumFlags::INEXACT;
    }
    if neg {
        flags |= BignumFlags::NEGATIVE;
    }
    normalize(&Bignum::real(flags, exp, r_i.sig))
}

fn real_is_zero(a: &Bignum) -> bool {
    a.sig.len() == 1 && a.sig[0] == 0
}

/// Mixed-type numeric equality; integers are promoted to reals when mixed.
pub fn real_eq(a: &Bignum, b: &Bignum) -> bool {
    if a.is_integer() && b.is_integer() {
        return eq(a, b);
    }
    let (Ok(ra), Ok(rb)) = (promote(a), promote(b)) else {
        return false;
    };
    if ra.is_inexact() != rb.is_inexact() {
        return false;
    }
    if ra.exp != rb.exp {
        return false;
    }
    if real_is_zero(&ra) && real_is_zero(&rb) {
        return true;
    }
    if ra.flags.contains(BignumFlags::NEGATIVE) != rb.flags.contains(BignumFlags::NEGATIVE) {
        return false;
    }
    ra.sig == rb.sig
}

/// Mixed-type `a < b`.
pub fn real_lt(a: &Bignum, b: &Bignum) -> bool {
    if a.is_integer() && b.is_integer() {
        return lt(a, b);
    }
    let (Ok(ra), Ok(rb)) = (promote(a), promote(b)) else {
        return false;
    };

    let na = ra.flags.contains(BignumFlags::NEGATIVE);
    let nb = rb.flags.contains(BignumFlags::NEGATIVE);
    if na && !nb {
        return true;
    }
    if nb && !na {
        return false;
    }
    if !na && real_is_zero(&rb) {
        return false;
    }
    if !nb && real_is_zero(&ra) {
        return true;
    }

    // where the decimal point lies
    let dpa = ra.count_digits() as i64 + ra.exp as i64;
    let dpb = rb.count_digits() as i64 + rb.exp as i64;
    if dpa < dpb {
        return !na;
    }
    if dpa > dpb {
        return na;
    }

    // same magnitude class: align and compare significands
    let (sa, sb) = if ra.exp < rb.exp {
        match scale_significand(&rb, ra.exp, SIG_MAX_DIGITS * 2) {
            Ok(Some(s)) => (ra.copy_to_integer(), s.copy_to_integer()),
            _ => return false,
        }
    } else if ra.exp > rb.exp {
        match scale_significand(&ra, rb.exp, SIG_MAX_DIGITS * 2) {
            Ok(Some(s)) => (s.copy_to_integer(), rb.copy_to_integer()),
            _ => return false,
        }
    } else {
        (ra.copy_to_integer(), rb.copy_to_integer())
    };

    if na { lt(&sb, &sa) } else { lt(&sa, &sb) }
}

impl Bignum {
    /// `equal?`'s view: numeric equality including exactness.
    pub fn numerically_equal(&self, other: &Bignum) -> bool {
        real_eq(self, other)
    }
}

// ---------------------------------------------------------------------
// text

const EXP_CHARS: [char; 2] = ['e', 'E'];

impl Bignum {
    pub fn to_text(&self) -> String {
        if self.is_nan() {
            return "#<NaN>".to_string();
        }
        if self.is_integer() {
            return self.integer_text();
        }
        self.real_text()
    }

    fn integer_text(&self) -> String {
        let mut s = String::new();
        for (i, &seg) in self.sig.iter().enumerate().rev() {
            if i == self.sig.len() - 1 {
                s.push_str(&seg.to_string());
            } else {
                s.push_str(&format!("{:0width$}", seg, width = DPW));
            }
        }
        s
    }

    /// Scheme-style: `[-]d.ddd…e[+-]N` where N places the decimal point
    /// after the first digit.
    fn real_text(&self) -> String {
        let mut s = String::new();
        if self.flags.contains(BignumFlags::NEGATIVE) {
            s.push('-');
        }
        let digits = self.abs_digits();
        s.push(digits[0]);
        s.push('.');
        if digits.len() > 1 {
            s.extend(&digits[1..]);
        } else {
            s.push('0');
        }
        let eexp = self.exp as i64 + digits.len() as i64 - 1;
        s.push('e');
        if eexp >= 0 {
            s.push('+');
        }
        s.push_str(&eexp.to_string());
        s
    }

    fn abs_digits(&self) -> Vec<char> {
        let mut s = String::new();
        for (i, &seg) in self.sig.iter().enumerate().rev() {
            let seg = seg.abs();
            if i == self.sig.len() - 1 {
                s.push_str(&seg.to_string());
            } else {
                s.push_str(&format!("{:0width$}", seg, width = DPW));
            }
        }
        s.chars().collect()
    }
}

impl fmt::Display for Bignum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_text())
    }
}

/// Parse an integer (no `.`, no exponent).  `#` digits read as 5 and make
/// the result inexact unless `req_exact`.
pub fn integer_from_str(nums: &str, req_exact: bool) -> Result<Bignum> {
    let is_exact = !nums.contains('#');
    let buf: String = nums
        .chars()
        .map(|c| if c == '#' { '5' } else { c })
        .collect();

    let mut s = buf.as_str();
    let mut sign = 1i64;
    if let Some(rest) = s.strip_prefix('-') {
        sign = -1;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }

    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BignumError::Parse(nums.to_string()));
    }

    let mut sig = Vec::new();
    let mut nl = s.len();
    while nl > 0 {
        let eos = nl.min(DPW);
        let chunk = &s[nl - eos..nl];
        let mut v: i64 = chunk
            .parse()
            .map_err(|_| BignumError::Parse(nums.to_string()))?;
        nl -= eos;
        if nl == 0 && (req_exact || is_exact) {
            v *= sign;
        }
        sig.push(v);
    }
    strip_leading_zeroes(&mut sig);

    if req_exact || is_exact {
        Ok(Bignum::integer(sig))
    } else {
        let mut flags = BignumFlags::INEXACT;
        if sign < 0 {
            flags |= BignumFlags::NEGATIVE;
        }
        normalize(&Bignum::real(flags, 0, sig))
    }
}

/// Parse a real: sign, digits with optional `.` and `#`, optional
/// exponent character and signed exponent.
pub fn real_from_str(nums: &str) -> Result<Bignum> {
    let mut sig = Bignum::from_i64(0);
    let mut exp: i32 = 0;
    let mut neg = false;
    let mut exact = true;
    let mut found_period = false;
    let mut found_digit = false;

    let mut chars = nums.chars().peekable();
    match chars.peek() {
        Some('+') => {
            chars.next();
        }
        Some('-') => {
            neg = true;
            chars.next();
        }
        _ => {}
    }

    while let Some(&c) = chars.peek() {
        if c == '.' {
            found_period = true;
            chars.next();
            continue;
        }
        if c != '#' && !c.is_ascii_digit() {
            break;
        }
        chars.next();
        found_digit = true;
        if found_period {
            exp = exp.checked_sub(1).ok_or(BignumError::ExponentUnderflow)?;
        }
        sig = shift_left(&sig, 0);
        let digit = if c == '#' {
            exact = false;
            5
        } else {
            c as i64 - '0' as i64
        };
        sig = add(&sig, &Bignum::from_i64(digit));
    }

    if !found_digit {
        return Err(BignumError::Parse(nums.to_string()));
    }

    match chars.next() {
        None => {}
        Some(c) if EXP_CHARS.contains(&c) => {
            let rest: String = chars.collect();
            let n = integer_from_str(&rest, true)?;
            let exp_v = n.to_i64().ok_or(BignumError::Parse(nums.to_string()))?;
            let widened = exp as i64 + exp_v;
            exp = i32::try_from(widened).map_err(|_| {
                if exp_v < 0 {
                    BignumError::ExponentUnderflow
                } else {
                    BignumError::ExponentOverflow
                }
            })?;
        }
        Some(_) => return Err(BignumError::Parse(nums.to_string())),
    }

    let mut flags = BignumFlags::empty();
    if neg {
        flags |= BignumFlags::NEGATIVE;
    }
    if !exact {
        flags |= BignumFlags::INEXACT;
    }
    normalize(&Bignum::real(flags, exp, sig.sig))
}

/// Parse either form, dispatching on `.`/exponent characters.
pub fn from_str(nums: &str) -> Result<Bignum> {
    let looks_real = nums
        .char_indices()
        .any(|(i, c)| c == '.' || (i > 0 && EXP_CHARS.contains(&c)));
    if looks_real {
        real_from_str(nums)
    } else {
        integer_from_str(nums, false)
    }
}
