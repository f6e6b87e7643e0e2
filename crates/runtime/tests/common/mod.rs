//! Shared scaffolding for the VM scenario tests
//!
//! The tests stand in for the external compiler: they append bytecode
//! through the same interface it would use.  `Asm` wraps a code buffer
//! with the handful of emit patterns the scenarios need — calls, closure
//! bodies, short-jump backpatching.

// each test binary uses its own subset of these helpers
#![allow(dead_code)]

use skiff_core::Word;
use skiff_runtime::bytecode::CodeBuffer;
use skiff_runtime::{Machine, Op};

pub struct Asm {
    pub code: CodeBuffer,
}

impl Asm {
    pub fn new() -> Asm {
        Asm {
            code: CodeBuffer::new(),
        }
    }

    pub fn op(&mut self, op: Op) -> &mut Self {
        self.code.push_op(op);
        self
    }

    pub fn varuint(&mut self, v: u64) -> &mut Self {
        self.code.push_varuint(v);
        self
    }

    pub fn reference(&mut self, mci: u64) -> &mut Self {
        self.code.push_ref(mci);
        self
    }

    pub fn byte(&mut self, b: u8) -> &mut Self {
        self.code.push(b);
        self
    }

    pub fn fixnum(&mut self, v: u64) -> &mut Self {
        self.op(Op::Fixnum).varuint(v)
    }

    /// Emit a short jump with a placeholder offset; patch it later.
    pub fn short_jump(&mut self, op: Op) -> usize {
        self.code.push_op(op);
        let at = self.code.len();
        self.code.push(0);
        at
    }

    /// Resolve a short jump to the current position.
    pub fn patch_to_here(&mut self, at: usize) {
        let offset = self.code.len() - (at + 1);
        assert!(offset <= u8::MAX as usize, "short jump too far");
        self.code.write_fixuint(1, at, offset as u64);
    }

    /// CREATE-CLOSURE over an already-assembled body, jumping across it.
    /// `sigci`/`docci` index the signature and docstring constants.
    pub fn closure(&mut self, body: &Asm, sigci: u64, docci: u64) -> &mut Self {
        let body_len = body.code.len();
        assert!(body_len <= u8::MAX as usize, "closure body too long for a short goto");
        self.op(Op::CreateClosure);
        // the body starts right after the SHORT-GOTO that skips it
        self.varuint(2);
        self.varuint(body_len as u64);
        self.varuint(sigci);
        self.varuint(docci);
        self.op(Op::ShortGoto).byte(body_len as u8);
        self.code.extend_from_slice(body.code.as_bytes());
        self
    }

    /// The frame-building tail of a call: the callee and `nargs` argument
    /// values must already be on the stack, callee deepest.
    pub fn call_tail(&mut self, nargs: usize, tail: bool) -> &mut Self {
        self.op(Op::AllocateFrame).varuint(nargs as u64 + 1).varuint(0);
        for slot in (0..nargs).rev() {
            self.op(Op::PopFrame).varuint(slot as u64);
        }
        self.op(Op::PopFunction);
        self.op(if tail { Op::FunctionGoto } else { Op::FunctionInvoke })
    }

    /// Append onto the machine's code stream; returns the entry PC.
    pub fn load(self, m: &mut Machine) -> usize {
        let pc0 = m.code.len();
        m.code.extend_from_slice(self.code.as_bytes());
        pc0
    }
}

/// Append and run a code fragment, asserting the stack balances.
pub fn run_fragment(m: &mut Machine, asm: Asm) -> Word {
    let pc0 = asm.load(m);
    m.thread.pc = pc0;
    let depth0 = m.thread.stack.len();
    let r = m.run("test fragment").expect("fragment must run to FINISH");
    assert_eq!(
        m.thread.stack.len(),
        depth0,
        "stack must balance across a run"
    );
    r
}

/// Intern `sym` and give it a constant slot; identity vci mapping makes
/// the returned gci usable as an mci.
pub fn symbol_mci(m: &mut Machine, sym: &str) -> u64 {
    let w = m.intern(sym);
    m.constants_lookup_or_extend(w) as u64
}

/// A constant slot holding the `toplevel` scope marker (GLOBAL-SYM-DEF's
/// mkci operand).
pub fn toplevel_mci(m: &mut Machine) -> u64 {
    m.constants_lookup_or_extend(Word::TOPLEVEL) as u64
}
