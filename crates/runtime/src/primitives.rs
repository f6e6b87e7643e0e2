//! The primitive table
//!
//! Primitives are named Rust functions the bytecode reaches either
//! through the general invocation path (a `Primitive` value in `func`)
//! or directly via the PRIMCALL opcodes.  Each one is registered in the
//! `*primitives*` module with `predef` scope; PREDEFINED indexes their
//! value slots.

use skiff_core::heap::Object;
use skiff_core::{
    array, hash, module, pair, printer, strings, struct_types, Heap, PrimId, Primitive, Whence,
    Word,
};

use crate::numeric;
use crate::unwind::{Unwind, VmResult};
use crate::vm::Machine;

pub type PrimFn = fn(&mut Machine, &[Word], Word) -> VmResult<Word>;

pub struct PrimDef {
    pub name: &'static str,
    pub arity: u8,
    pub varargs: bool,
    pub f: PrimFn,
}

impl Machine {
    /// Register a primitive: allocate its value, give it a slot and bind
    /// it `predef` in the `*primitives*` module.
    pub fn add_primitive(&mut self, def: PrimDef) -> Word {
        let prim_id = PrimId(self.prim_table.len() as u16);
        let name_sym = self.intern(def.name);
        let pw = self.heap.alloc(Object::Primitive(Primitive {
            name: def.name.into(),
            arity: def.arity,
            varargs: def.varargs,
            prim: prim_id,
            called: 0,
        }));
        self.prim_table.push(def);
        let pm = self.primitives_module;
        self.define_value(pm, name_sym, pw, Word::PREDEF);
        pw
    }

    /// The value of a registered primitive, by name.
    pub fn primitive_value(&self, name: &str) -> Option<Word> {
        let sym = self.symbols.lookup(name)?;
        let rec = module::find_symbol(&self.heap, self.primitives_module, sym)?;
        Some(self.values_ref(rec.gvi))
    }

    /// The value slot of a registered primitive (what PREDEFINED takes).
    pub fn primitive_gvi(&self, name: &str) -> Option<usize> {
        let sym = self.symbols.lookup(name)?;
        let rec = module::find_symbol(&self.heap, self.primitives_module, sym)?;
        Some(rec.gvi)
    }

    /// Bind a computed variable: the slot holds the accessor pair.
    pub fn add_computed_symbol(&mut self, name: &str, getter: Word, setter: Word) {
        let sym = self.intern(name);
        let accessors = pair::cons(&mut self.heap, getter, setter);
        let base = self.base_module;
        self.define_value(base, sym, accessors, Word::COMPUTED);
    }
}

// ---------------------------------------------------------------------
// shared accessors (the PRIMCALL fast paths use these too)

pub fn head_of(m: &mut Machine, w: Word) -> VmResult<Word> {
    if w == Word::NIL {
        return Ok(Word::NIL);
    }
    pair::head(&m.heap, w).ok_or_else(|| m.error_param_type("pair", w))
}

pub fn tail_of(m: &mut Machine, w: Word) -> VmResult<Word> {
    if w == Word::NIL {
        return Ok(Word::NIL);
    }
    pair::tail(&m.heap, w).ok_or_else(|| m.error_param_type("pair", w))
}

fn text_of(m: &mut Machine, w: Word) -> VmResult<String> {
    match strings::text(&m.heap, w) {
        Some(s) => Ok(s.to_string()),
        None => Err(m.error_param_type("string", w)),
    }
}

fn fixnum_of(m: &mut Machine, w: Word) -> VmResult<i64> {
    w.as_fixnum().ok_or_else(|| m.error_param_type("fixnum", w))
}

fn rest_vec(heap: &Heap, rest: Word) -> Vec<Word> {
    pair::list_to_vec(heap, rest).unwrap_or_default()
}

// ---------------------------------------------------------------------
// arithmetic

fn prim_add(m: &mut Machine, _args: &[Word], rest: Word) -> VmResult<Word> {
    let mut acc = Word::fixnum(0);
    for w in rest_vec(&m.heap, rest) {
        acc = numeric::add2(m, acc, w)?;
    }
    Ok(acc)
}

fn prim_subtract(m: &mut Machine, args: &[Word], rest: Word) -> VmResult<Word> {
    let others = rest_vec(&m.heap, rest);
    if others.is_empty() {
        return numeric::sub2(m, Word::fixnum(0), args[0]);
    }
    let mut acc = args[0];
    for w in others {
        acc = numeric::sub2(m, acc, w)?;
    }
    Ok(acc)
}

fn prim_multiply(m: &mut Machine, _args: &[Word], rest: Word) -> VmResult<Word> {
    let mut acc = Word::fixnum(1);
    for w in rest_vec(&m.heap, rest) {
        acc = numeric::mul2(m, acc, w)?;
    }
    Ok(acc)
}

fn prim_divide(m: &mut Machine, args: &[Word], rest: Word) -> VmResult<Word> {
    let others = rest_vec(&m.heap, rest);
    if others.is_empty() {
        return numeric::div2(m, Word::fixnum(1), args[0]);
    }
    let mut acc = args[0];
    for w in others {
        acc = numeric::div2(m, acc, w)?;
    }
    Ok(acc)
}

fn prim_remainder(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    numeric::remainder2(m, args[0], args[1])
}

fn prim_quotient(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    numeric::quotient2(m, args[0], args[1])
}

fn chain_compare(
    m: &mut Machine,
    args: &[Word],
    rest: Word,
    f: fn(&mut Machine, Word, Word) -> VmResult<bool>,
) -> VmResult<Word> {
    let mut prev = args[0];
    let mut items = vec![args[1]];
    items.extend(rest_vec(&m.heap, rest));
    for w in items {
        if !f(m, prev, w)? {
            return Ok(Word::FALSE);
        }
        prev = w;
    }
    Ok(Word::TRUE)
}

fn prim_num_eq(m: &mut Machine, args: &[Word], rest: Word) -> VmResult<Word> {
    chain_compare(m, args, rest, numeric::num_eq)
}

fn prim_num_lt(m: &mut Machine, args: &[Word], rest: Word) -> VmResult<Word> {
    chain_compare(m, args, rest, numeric::num_lt)
}

fn prim_num_le(m: &mut Machine, args: &[Word], rest: Word) -> VmResult<Word> {
    chain_compare(m, args, rest, |m, a, b| Ok(!numeric::num_lt(m, b, a)?))
}

fn prim_num_gt(m: &mut Machine, args: &[Word], rest: Word) -> VmResult<Word> {
    chain_compare(m, args, rest, |m, a, b| numeric::num_lt(m, b, a))
}

fn prim_num_ge(m: &mut Machine, args: &[Word], rest: Word) -> VmResult<Word> {
    chain_compare(m, args, rest, |m, a, b| Ok(!numeric::num_lt(m, a, b)?))
}

fn prim_number_p(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(Word::boolean(numeric::is_number(m, args[0])))
}

fn prim_fixnum_p(_m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(Word::boolean(args[0].is_fixnum()))
}

fn prim_bignum_p(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(Word::boolean(matches!(
        m.heap.try_get(args[0]),
        Some(Object::Bignum(_))
    )))
}

fn prim_string_to_number(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let text = text_of(m, args[0])?;
    match skiff_core::bignum::from_str(&text) {
        Ok(n) => {
            if n.is_integer()
                && let Some(v) = n.to_fixnum()
            {
                Ok(Word::fixnum(v))
            } else {
                Ok(m.alloc_bignum(n))
            }
        }
        Err(e) => Err(m.error_bignum(e, args[0])),
    }
}

fn prim_bignum_to_fixnum(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    match m.heap.try_get(args[0]) {
        Some(Object::Bignum(b)) => Ok(b
            .to_fixnum()
            .map(Word::fixnum)
            .unwrap_or(Word::NOT_A_FIXNUM)),
        _ => Err(m.error_param_type("bignum", args[0])),
    }
}

// ---------------------------------------------------------------------
// pairs and lists

fn prim_pair(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(pair::cons(&mut m.heap, args[0], args[1]))
}

fn prim_head(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    head_of(m, args[0])
}

fn prim_tail(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    tail_of(m, args[0])
}

fn prim_set_head(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    if !pair::set_head(&mut m.heap, args[0], args[1]) {
        return Err(m.error_param_type("pair", args[0]));
    }
    Ok(Word::UNSPEC)
}

fn prim_set_tail(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    if !pair::set_tail(&mut m.heap, args[0], args[1]) {
        return Err(m.error_param_type("pair", args[0]));
    }
    Ok(Word::UNSPEC)
}

fn prim_pair_p(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(Word::boolean(m.heap.is_pair(args[0])))
}

fn prim_null_p(_m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(Word::boolean(args[0] == Word::NIL))
}

fn prim_list(_m: &mut Machine, _args: &[Word], rest: Word) -> VmResult<Word> {
    Ok(rest)
}

fn prim_length(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    match pair::list_length(&m.heap, args[0]) {
        Some(n) => Ok(Word::fixnum(n as i64)),
        None => Err(m.error_param_type("proper list", args[0])),
    }
}

fn prim_append(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    pair::append2(&mut m.heap, args[0], args[1])
        .ok_or_else(|| m.error_param_type("proper list", args[0]))
}

fn prim_reverse(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let mut items = pair::list_to_vec(&m.heap, args[0])
        .ok_or_else(|| m.error_param_type("proper list", args[0]))?;
    items.reverse();
    Ok(pair::list(&mut m.heap, &items))
}

// ---------------------------------------------------------------------
// equality

fn prim_eq_p(_m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(Word::boolean(args[0] == args[1]))
}

fn prim_eqv_p(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    if args[0] == args[1] {
        return Ok(Word::TRUE);
    }
    if numeric::is_number(m, args[0]) && numeric::is_number(m, args[1]) {
        return Ok(Word::boolean(numeric::num_eq(m, args[0], args[1])?));
    }
    Ok(Word::FALSE)
}

fn prim_equal_p(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(Word::boolean(skiff_core::equal::equal(
        &m.heap, args[0], args[1],
    )))
}

fn prim_not(_m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(Word::boolean(args[0] == Word::FALSE))
}

// ---------------------------------------------------------------------
// symbols and strings

fn prim_symbol_p(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(Word::boolean(m.heap.is_symbol(args[0])))
}

fn prim_string_to_symbol(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let text = text_of(m, args[0])?;
    Ok(m.intern(&text))
}

fn prim_symbol_to_string(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    match m.heap.symbol_text(args[0]) {
        Some(s) => {
            let s = s.to_string();
            Ok(strings::alloc(&mut m.heap, s))
        }
        None => Err(m.error_param_type("symbol", args[0])),
    }
}

fn prim_gensym(m: &mut Machine, _args: &[Word], rest: Word) -> VmResult<Word> {
    let prefix = match rest_vec(&m.heap, rest).first() {
        Some(&w) => text_of(m, w)?,
        None => "g".to_string(),
    };
    Ok(m.symbols.gensym(&mut m.heap, &prefix))
}

fn prim_string_p(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(Word::boolean(strings::is_string(&m.heap, args[0])))
}

fn prim_string_length(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    match strings::byte_len(&m.heap, args[0]) {
        Some(n) => Ok(Word::fixnum(n as i64)),
        None => Err(m.error_param_type("string", args[0])),
    }
}

fn prim_substring(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let offset = fixnum_of(m, args[1])? as usize;
    let end = fixnum_of(m, args[2])? as usize;
    let len = end.saturating_sub(offset);
    strings::substring(&mut m.heap, args[0], offset, len)
        .ok_or_else(|| m.error_param_type("string range", args[0]))
}

fn prim_string_append(m: &mut Machine, _args: &[Word], rest: Word) -> VmResult<Word> {
    let mut out = String::new();
    for w in rest_vec(&m.heap, rest) {
        out.push_str(&text_of(m, w)?);
    }
    Ok(strings::alloc(&mut m.heap, out))
}

// ---------------------------------------------------------------------
// arrays and hashes

fn prim_make_array(m: &mut Machine, args: &[Word], rest: Word) -> VmResult<Word> {
    let size = fixnum_of(m, args[0])? as usize;
    let default = rest_vec(&m.heap, rest).first().copied().unwrap_or(Word::NIL);
    Ok(m.heap
        .alloc(Object::Array(array::Array::new(size, default))))
}

fn with_array<T>(
    m: &mut Machine,
    w: Word,
    f: impl FnOnce(&mut array::Array) -> T,
) -> VmResult<T> {
    if !matches!(m.heap.try_get(w), Some(Object::Array(_))) {
        return Err(m.error_param_type("array", w));
    }
    match m.heap.get_mut(w) {
        Object::Array(a) => Ok(f(a)),
        _ => unreachable!(),
    }
}

fn prim_array_ref(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let ix = fixnum_of(m, args[1])? as usize;
    with_array(m, args[0], |a| a.get(ix))
}

fn prim_array_set(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let ix = fixnum_of(m, args[1])? as usize;
    let v = args[2];
    with_array(m, args[0], |a| a.set(ix, v))?;
    Ok(Word::UNSPEC)
}

fn prim_array_push(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let v = args[1];
    with_array(m, args[0], |a| a.push(v))?;
    Ok(Word::UNSPEC)
}

fn prim_array_pop(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    with_array(m, args[0], |a| a.pop().unwrap_or(Word::NIL))
}

fn prim_array_length(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    with_array(m, args[0], |a| Word::fixnum(a.len() as i64))
}

fn prim_make_hash(m: &mut Machine, _args: &[Word], rest: Word) -> VmResult<Word> {
    let kind = match rest_vec(&m.heap, rest).first() {
        None => hash::EqKind::Equal,
        Some(&w) => match m.heap.symbol_text(w) {
            Some("eq?") => hash::EqKind::Eq,
            Some("equal?") => hash::EqKind::Equal,
            Some("string=?") => hash::EqKind::Strings,
            _ => return Err(m.error_param_type("equality predicate name", w)),
        },
    };
    Ok(hash::alloc(&mut m.heap, kind))
}

fn prim_hash_ref(m: &mut Machine, args: &[Word], rest: Word) -> VmResult<Word> {
    match hash::get(&m.heap, args[0], args[1]) {
        Some(v) => Ok(v),
        None => match rest_vec(&m.heap, rest).first() {
            Some(&d) => Ok(d),
            None => Err(m.error_param_type("present hash key", args[1])),
        },
    }
}

fn prim_hash_set(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    if !matches!(m.heap.try_get(args[0]), Some(Object::Hash(_))) {
        return Err(m.error_param_type("hash", args[0]));
    }
    hash::set(&mut m.heap, args[0], args[1], args[2]);
    Ok(Word::UNSPEC)
}

fn prim_hash_delete(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    if !matches!(m.heap.try_get(args[0]), Some(Object::Hash(_))) {
        return Err(m.error_param_type("hash", args[0]));
    }
    hash::delete(&mut m.heap, args[0], args[1]);
    Ok(Word::UNSPEC)
}

fn prim_hash_exists_p(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(Word::boolean(hash::get(&m.heap, args[0], args[1]).is_some()))
}

fn prim_hash_keys(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let keys = match m.heap.try_get(args[0]) {
        Some(Object::Hash(h)) => h.keys(),
        _ => return Err(m.error_param_type("hash", args[0])),
    };
    Ok(pair::list(&mut m.heap, &keys))
}

// ---------------------------------------------------------------------
// struct types and conditions

fn prim_make_struct_type(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let fields = pair::list_to_vec(&m.heap, args[2])
        .ok_or_else(|| m.error_param_type("field list", args[2]))?;
    Ok(struct_types::alloc_type(&mut m.heap, args[0], args[1], fields))
}

fn prim_make_struct_instance(m: &mut Machine, args: &[Word], rest: Word) -> VmResult<Word> {
    let fields = rest_vec(&m.heap, rest);
    Ok(struct_types::alloc_instance(&mut m.heap, args[0], fields))
}

fn prim_struct_instance_p(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(Word::boolean(struct_types::is_instance(&m.heap, args[0])))
}

fn prim_struct_instance_ref(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let ix = fixnum_of(m, args[1])? as usize;
    struct_types::instance_ref(&m.heap, args[0], ix)
        .ok_or_else(|| m.error_param_type("struct instance field", args[0]))
}

fn prim_struct_instance_isa_p(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(Word::boolean(struct_types::instance_isa(
        &m.heap, args[0], args[1],
    )))
}

fn prim_condition_p(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let base = m.conditions.condition;
    Ok(Word::boolean(struct_types::instance_isa(
        &m.heap, args[0], base,
    )))
}

fn prim_condition_isa_p(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(Word::boolean(struct_types::instance_isa(
        &m.heap, args[0], args[1],
    )))
}

fn prim_condition_message(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    struct_types::instance_ref(&m.heap, args[0], 0)
        .ok_or_else(|| m.error_param_type("condition", args[0]))
}

// ---------------------------------------------------------------------
// output

fn prim_display(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let text = printer::display_string(&m.heap, args[0]);
    let oh = m.thread.output_handle;
    crate::handle::puts(m, oh, &text)?;
    Ok(Word::UNSPEC)
}

fn prim_write(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let text = printer::write_string(&m.heap, args[0]);
    let oh = m.thread.output_handle;
    crate::handle::puts(m, oh, &text)?;
    Ok(Word::UNSPEC)
}

fn prim_newline(m: &mut Machine, _args: &[Word], _rest: Word) -> VmResult<Word> {
    let oh = m.thread.output_handle;
    crate::handle::puts(m, oh, "\n")?;
    Ok(Word::UNSPEC)
}

fn prim_display_string(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let text = printer::display_string(&m.heap, args[0]);
    Ok(strings::alloc(&mut m.heap, text))
}

// ---------------------------------------------------------------------
// handles

fn prim_current_input_handle(m: &mut Machine, _args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(m.thread.input_handle)
}

fn prim_current_output_handle(m: &mut Machine, _args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(m.thread.output_handle)
}

fn prim_current_error_handle(m: &mut Machine, _args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(m.thread.error_handle)
}

fn prim_open_input_file(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let path = text_of(m, args[0])?;
    crate::handle::open_file_handle(m, &path, "r")
}

fn prim_open_output_file(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let path = text_of(m, args[0])?;
    crate::handle::open_file_handle(m, &path, "w")
}

fn prim_close_handle(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    crate::handle::close(m, args[0])?;
    Ok(Word::UNSPEC)
}

fn prim_handle_ready_p(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let r = crate::handle::readyp(m, args[0])?;
    Ok(Word::boolean(r))
}

fn prim_eof_handle_p(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(Word::boolean(crate::handle::at_eof(m, args[0])))
}

fn prim_read_byte(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    match crate::handle::getb(m, args[0])? {
        Some(b) => Ok(Word::fixnum(b as i64)),
        None => Ok(Word::EOF),
    }
}

fn prim_write_byte(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let b = fixnum_of(m, args[1])?;
    crate::handle::putb(m, args[0], b as u8)?;
    Ok(Word::UNSPEC)
}

fn prim_handle_puts(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let text = text_of(m, args[1])?;
    let n = crate::handle::puts(m, args[0], &text)?;
    Ok(Word::fixnum(n as i64))
}

fn prim_flush_handle(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    crate::handle::flush(m, args[0])?;
    Ok(Word::UNSPEC)
}

fn prim_seek_handle(m: &mut Machine, args: &[Word], rest: Word) -> VmResult<Word> {
    let pos = fixnum_of(m, args[1])?;
    let whence = match rest_vec(&m.heap, rest).first() {
        None => Whence::Set,
        Some(&w) => match m.heap.symbol_text(w) {
            Some("set") => Whence::Set,
            Some("cur") => Whence::Cur,
            Some("end") => Whence::End,
            _ => return Err(m.error_param_type("seek whence", w)),
        },
    };
    let r = crate::handle::seek(m, args[0], pos, whence)?;
    Ok(Word::fixnum(r as i64))
}

fn prim_open_input_string(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let text = text_of(m, args[0])?;
    Ok(crate::handle::open_input_string(m, &text))
}

fn prim_open_output_string(m: &mut Machine, _args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(crate::handle::open_output_string(m))
}

fn prim_get_output_string(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    crate::handle::get_output_string(m, args[0])
}

// ---------------------------------------------------------------------
// modules

fn prim_set_current_module(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    if !module::is_module(&m.heap, args[0]) {
        return Err(m.error_param_type("module", args[0]));
    }
    m.thread.module = args[0];
    m.thread.env = args[0];
    Ok(Word::UNSPEC)
}

fn prim_current_module(m: &mut Machine, _args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(m.thread.module)
}

fn prim_find_or_create_module(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    if !m.heap.is_symbol(args[0]) {
        return Err(m.error_param_type("symbol", args[0]));
    }
    Ok(m.find_or_create_module(args[0]))
}

fn prim_module_name(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    if !module::is_module(&m.heap, args[0]) {
        return Err(m.error_param_type("module", args[0]));
    }
    Ok(module::with(&m.heap, args[0]).name)
}

// ---------------------------------------------------------------------
// control

fn prim_raise(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let base = m.conditions.condition;
    if !struct_types::instance_isa(&m.heap, args[0], base) {
        return Err(m.error_param_type("condition", args[0]));
    }
    Err(m.raise_error(args[0]))
}

fn prim_apply(m: &mut Machine, args: &[Word], rest: Word) -> VmResult<Word> {
    m.apply(args[0], rest)?;
    Ok(m.thread.val)
}

fn prim_make_continuation(m: &mut Machine, _args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(m.capture_continuation())
}

fn prim_restore_continuation(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    if !matches!(m.heap.try_get(args[0]), Some(Object::Continuation(_))) {
        return Err(m.error_param_type("continuation", args[0]));
    }
    Err(m.restore_continuation(args[0], args[1]))
}

fn prim_call_cc(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    if !m.is_procedure(args[0]) {
        return Err(m.error_param_type("procedure", args[0]));
    }
    Err(m.call_cc(args[0]))
}

fn prim_vm_continuations(m: &mut Machine, _args: &[Word], _rest: Word) -> VmResult<Word> {
    let entries: Vec<(Word, String)> = m
        .krun
        .iter()
        .map(|(k, d)| (*k, d.clone()))
        .collect();
    let mut items = Vec::with_capacity(entries.len());
    for (k, d) in entries {
        let dw = strings::alloc(&mut m.heap, d);
        items.push(pair::cons(&mut m.heap, k, dw));
    }
    Ok(pair::list(&mut m.heap, &items))
}

fn prim_vm_apply_continuation(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let n = fixnum_of(m, args[0])?;
    if n < 0 || n as usize >= m.krun.len() {
        return Err(m.error_param_type("krun index", args[0]));
    }
    Err(m.apply_krun(n as usize, args[1]))
}

fn prim_exit(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let status = match args[0].as_fixnum() {
        Some(n) => n as i32,
        None => return Err(m.error_param_type("fixnum", args[0])),
    };
    // flush what can be flushed before the unwind
    let oh = m.thread.output_handle;
    let _ = crate::handle::flush(m, oh);
    let eh = m.thread.error_handle;
    let _ = crate::handle::flush(m, eh);
    Err(Unwind::Exit(status))
}

fn prim_vm_trace(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    m.tracing = fixnum_of(m, args[0])?;
    Ok(Word::UNSPEC)
}

fn prim_vm_frame_tree(m: &mut Machine, _args: &[Word], _rest: Word) -> VmResult<Word> {
    let mut fw = m.thread.frame;
    let mut depth = 0;
    let mut out = String::new();
    while fw != Word::NIL {
        let (args, names) = match m.heap.get(fw) {
            Object::Frame(f) => (f.args.clone(), f.names),
            other => panic!("frame tree: not a frame: {}", other.type_name()),
        };
        let name_list = names
            .as_fixnum()
            .and_then(|aci| m.constants.get(aci as usize).copied())
            .and_then(|w| pair::list_to_vec(&m.heap, w));
        for (i, &a) in args.iter().enumerate().take(args.len().saturating_sub(1)) {
            let name = name_list
                .as_ref()
                .and_then(|ns| ns.get(i))
                .map(|&n| printer::display_string(&m.heap, n))
                .unwrap_or_else(|| "?".to_string());
            out.push_str(&format!(
                "  {depth} {i}: {name:>15} = {}\n",
                printer::display_string(&m.heap, a)
            ));
        }
        depth += 1;
        fw = match m.heap.get(fw) {
            Object::Frame(f) => f.next,
            _ => Word::NIL,
        };
    }
    let oh = m.thread.output_handle;
    crate::handle::puts(m, oh, &out)?;
    Ok(Word::UNSPEC)
}

fn prim_seconds_get(m: &mut Machine, _args: &[Word], _rest: Word) -> VmResult<Word> {
    Ok(Word::fixnum(m.elapsed_seconds()))
}

fn prim_install_signal_handler(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let signum = fixnum_of(m, args[0])?;
    if signum < 0 || signum as usize >= crate::signal::MAX_SIGNAL {
        return Err(m.error_param_type("signal number", args[0]));
    }
    m.install_signal(signum as usize, args[1]);
    Ok(Word::UNSPEC)
}

// ---------------------------------------------------------------------
// registration

pub fn install_primitives(m: &mut Machine) {
    let defs: &[PrimDef] = &[
        PrimDef { name: "+", arity: 0, varargs: true, f: prim_add },
        PrimDef { name: "-", arity: 1, varargs: true, f: prim_subtract },
        PrimDef { name: "*", arity: 0, varargs: true, f: prim_multiply },
        PrimDef { name: "/", arity: 1, varargs: true, f: prim_divide },
        PrimDef { name: "remainder", arity: 2, varargs: false, f: prim_remainder },
        PrimDef { name: "quotient", arity: 2, varargs: false, f: prim_quotient },
        PrimDef { name: "=", arity: 2, varargs: true, f: prim_num_eq },
        PrimDef { name: "<", arity: 2, varargs: true, f: prim_num_lt },
        PrimDef { name: "<=", arity: 2, varargs: true, f: prim_num_le },
        PrimDef { name: ">", arity: 2, varargs: true, f: prim_num_gt },
        PrimDef { name: ">=", arity: 2, varargs: true, f: prim_num_ge },
        PrimDef { name: "number?", arity: 1, varargs: false, f: prim_number_p },
        PrimDef { name: "fixnum?", arity: 1, varargs: false, f: prim_fixnum_p },
        PrimDef { name: "bignum?", arity: 1, varargs: false, f: prim_bignum_p },
        PrimDef { name: "string->number", arity: 1, varargs: false, f: prim_string_to_number },
        PrimDef { name: "bignum->fixnum", arity: 1, varargs: false, f: prim_bignum_to_fixnum },

        PrimDef { name: "pair", arity: 2, varargs: false, f: prim_pair },
        PrimDef { name: "ph", arity: 1, varargs: false, f: prim_head },
        PrimDef { name: "pt", arity: 1, varargs: false, f: prim_tail },
        PrimDef { name: "set-ph!", arity: 2, varargs: false, f: prim_set_head },
        PrimDef { name: "set-pt!", arity: 2, varargs: false, f: prim_set_tail },
        PrimDef { name: "pair?", arity: 1, varargs: false, f: prim_pair_p },
        PrimDef { name: "null?", arity: 1, varargs: false, f: prim_null_p },
        PrimDef { name: "list", arity: 0, varargs: true, f: prim_list },
        PrimDef { name: "length", arity: 1, varargs: false, f: prim_length },
        PrimDef { name: "append", arity: 2, varargs: false, f: prim_append },
        PrimDef { name: "reverse", arity: 1, varargs: false, f: prim_reverse },

        PrimDef { name: "eq?", arity: 2, varargs: false, f: prim_eq_p },
        PrimDef { name: "eqv?", arity: 2, varargs: false, f: prim_eqv_p },
        PrimDef { name: "equal?", arity: 2, varargs: false, f: prim_equal_p },
        PrimDef { name: "not", arity: 1, varargs: false, f: prim_not },

        PrimDef { name: "symbol?", arity: 1, varargs: false, f: prim_symbol_p },
        PrimDef { name: "string->symbol", arity: 1, varargs: false, f: prim_string_to_symbol },
        PrimDef { name: "symbol->string", arity: 1, varargs: false, f: prim_symbol_to_string },
        PrimDef { name: "gensym", arity: 0, varargs: true, f: prim_gensym },
        PrimDef { name: "string?", arity: 1, varargs: false, f: prim_string_p },
        PrimDef { name: "string-length", arity: 1, varargs: false, f: prim_string_length },
        PrimDef { name: "substring", arity: 3, varargs: false, f: prim_substring },
        PrimDef { name: "string-append", arity: 0, varargs: true, f: prim_string_append },

        PrimDef { name: "make-array", arity: 1, varargs: true, f: prim_make_array },
        PrimDef { name: "array-ref", arity: 2, varargs: false, f: prim_array_ref },
        PrimDef { name: "array-set!", arity: 3, varargs: false, f: prim_array_set },
        PrimDef { name: "array-push!", arity: 2, varargs: false, f: prim_array_push },
        PrimDef { name: "array-pop!", arity: 1, varargs: false, f: prim_array_pop },
        PrimDef { name: "array-length", arity: 1, varargs: false, f: prim_array_length },

        PrimDef { name: "make-hash", arity: 0, varargs: true, f: prim_make_hash },
        PrimDef { name: "hash-ref", arity: 2, varargs: true, f: prim_hash_ref },
        PrimDef { name: "hash-set!", arity: 3, varargs: false, f: prim_hash_set },
        PrimDef { name: "hash-delete!", arity: 2, varargs: false, f: prim_hash_delete },
        PrimDef { name: "hash-exists?", arity: 2, varargs: false, f: prim_hash_exists_p },
        PrimDef { name: "hash-keys", arity: 1, varargs: false, f: prim_hash_keys },

        PrimDef { name: "make-struct-type", arity: 3, varargs: false, f: prim_make_struct_type },
        PrimDef { name: "make-struct-instance", arity: 1, varargs: true, f: prim_make_struct_instance },
        PrimDef { name: "struct-instance?", arity: 1, varargs: false, f: prim_struct_instance_p },
        PrimDef { name: "struct-instance-ref", arity: 2, varargs: false, f: prim_struct_instance_ref },
        PrimDef { name: "struct-instance-isa?", arity: 2, varargs: false, f: prim_struct_instance_isa_p },
        PrimDef { name: "condition?", arity: 1, varargs: false, f: prim_condition_p },
        PrimDef { name: "condition-isa?", arity: 2, varargs: false, f: prim_condition_isa_p },
        PrimDef { name: "condition-message", arity: 1, varargs: false, f: prim_condition_message },

        PrimDef { name: "display", arity: 1, varargs: false, f: prim_display },
        PrimDef { name: "write", arity: 1, varargs: false, f: prim_write },
        PrimDef { name: "newline", arity: 0, varargs: false, f: prim_newline },
        PrimDef { name: "display-string", arity: 1, varargs: false, f: prim_display_string },

        PrimDef { name: "current-input-handle", arity: 0, varargs: false, f: prim_current_input_handle },
        PrimDef { name: "current-output-handle", arity: 0, varargs: false, f: prim_current_output_handle },
        PrimDef { name: "current-error-handle", arity: 0, varargs: false, f: prim_current_error_handle },
        PrimDef { name: "open-input-file", arity: 1, varargs: false, f: prim_open_input_file },
        PrimDef { name: "open-output-file", arity: 1, varargs: false, f: prim_open_output_file },
        PrimDef { name: "close-handle", arity: 1, varargs: false, f: prim_close_handle },
        PrimDef { name: "handle-ready?", arity: 1, varargs: false, f: prim_handle_ready_p },
        PrimDef { name: "eof-handle?", arity: 1, varargs: false, f: prim_eof_handle_p },
        PrimDef { name: "read-byte", arity: 1, varargs: false, f: prim_read_byte },
        PrimDef { name: "write-byte", arity: 2, varargs: false, f: prim_write_byte },
        PrimDef { name: "handle-puts", arity: 2, varargs: false, f: prim_handle_puts },
        PrimDef { name: "flush-handle", arity: 1, varargs: false, f: prim_flush_handle },
        PrimDef { name: "seek-handle", arity: 2, varargs: true, f: prim_seek_handle },
        PrimDef { name: "open-input-string", arity: 1, varargs: false, f: prim_open_input_string },
        PrimDef { name: "open-output-string", arity: 0, varargs: false, f: prim_open_output_string },
        PrimDef { name: "get-output-string", arity: 1, varargs: false, f: prim_get_output_string },

        PrimDef { name: "%set-current-module!", arity: 1, varargs: false, f: prim_set_current_module },
        PrimDef { name: "current-module", arity: 0, varargs: false, f: prim_current_module },
        PrimDef { name: "%find-or-create-module", arity: 1, varargs: false, f: prim_find_or_create_module },
        PrimDef { name: "module-name", arity: 1, varargs: false, f: prim_module_name },

        PrimDef { name: "raise", arity: 1, varargs: false, f: prim_raise },
        PrimDef { name: "apply", arity: 1, varargs: true, f: prim_apply },
        PrimDef { name: "%%make-continuation", arity: 0, varargs: false, f: prim_make_continuation },
        PrimDef { name: "%%restore-continuation", arity: 2, varargs: false, f: prim_restore_continuation },
        PrimDef { name: "%%call/cc", arity: 1, varargs: false, f: prim_call_cc },
        PrimDef { name: "%%vm-continuations", arity: 0, varargs: false, f: prim_vm_continuations },
        PrimDef { name: "%%vm-apply-continuation", arity: 2, varargs: false, f: prim_vm_apply_continuation },
        PrimDef { name: "exit", arity: 1, varargs: false, f: prim_exit },
        PrimDef { name: "%%vm-trace", arity: 1, varargs: false, f: prim_vm_trace },
        PrimDef { name: "%vm-frame-tree", arity: 0, varargs: true, f: prim_vm_frame_tree },
        PrimDef { name: "SECONDS/get", arity: 0, varargs: false, f: prim_seconds_get },
        PrimDef { name: "%%install-signal-handler", arity: 2, varargs: false, f: prim_install_signal_handler },
    ];

    for def in defs {
        m.add_primitive(PrimDef {
            name: def.name,
            arity: def.arity,
            varargs: def.varargs,
            f: def.f,
        });
    }

    // SECONDS reads the VM clock through the computed-variable machinery
    let seconds_get = m
        .primitive_value("SECONDS/get")
        .expect("SECONDS/get just registered");
    m.add_computed_symbol("SECONDS", seconds_get, Word::NIL);
}
