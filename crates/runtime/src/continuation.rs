//! First-class continuations
//!
//! Capture copies the whole value stack (after a state preserve) and
//! freezes the current PC on top of the copy behind a marker.  Restoring
//! never aliases: the thread gets a fresh copy of the stored stack, so a
//! continuation is restartable any number of times.
//!
//! The owning `run` loop's nesting level stands in for the original's
//! jump-buffer pointer: restoring unwinds the host stack to that level.

use skiff_core::heap::{Continuation, Object};
use skiff_core::{printer, Word};

use crate::unwind::{JumpCode, Unwind};
use crate::vm::Machine;

impl Machine {
    /// Reify the rest of the computation.
    pub fn capture_continuation(&mut self) -> Word {
        self.thread.preserve_state();
        let mut stack = self.thread.stack.clone();
        stack.push(Word::fixnum(self.thread.pc as i64));
        stack.push(Word::MARK_PRESERVE_CONTINUATION);
        // the live stack keeps running: undo the preserve
        self.thread.restore_state();

        let level = self.run_depth.saturating_sub(1);
        self.heap
            .alloc(Object::Continuation(Continuation { stack, level }))
    }

    /// Swap the thread onto a fresh copy of `k`'s stack and unpack the
    /// frozen PC and state.
    pub fn restore_continuation_data(&mut self, k: Word, val: Word) {
        let stack = match self.heap.get(k) {
            Object::Continuation(kc) => kc.stack.clone(),
            other => panic!("restore-continuation: not a continuation: {}", other.type_name()),
        };
        self.thread.stack = stack;
        self.thread
            .pop_marker(Word::MARK_PRESERVE_CONTINUATION, "restore-continuation");
        let pc = self.thread.pop_fixnum("restore-continuation/pc");
        if pc < 0 || pc as usize > self.code.len() {
            panic!("restore-continuation: impossible PC {pc}");
        }
        self.thread.pc = pc as usize;
        self.thread.restore_state();
        self.thread.val = val;
    }

    /// Restore `k` and produce the unwind that takes the host stack back
    /// to its run loop.
    pub fn restore_continuation(&mut self, k: Word, val: Word) -> Unwind {
        let level = match self.heap.get(k) {
            Object::Continuation(kc) => kc.level,
            other => panic!("restore-continuation: not a continuation: {}", other.type_name()),
        };
        self.restore_continuation_data(k, val);
        // a continuation may outlive its original run nest; never target
        // deeper than the innermost live loop
        let innermost = self.run_depth.saturating_sub(1);
        Unwind::Jump {
            level: level.min(innermost),
            code: JumpCode::Continuation,
        }
    }

    /// `%%vm-apply-continuation n v`: pop the krun stack down to entry
    /// `n` and jump back to it.
    pub fn apply_krun(&mut self, n: usize, val: Word) -> Unwind {
        if n >= self.krun.len() {
            panic!("apply-continuation: krun {n} out of range ({})", self.krun.len());
        }
        let mut krun = None;
        while self.krun.len() > n {
            krun = self.krun.pop();
        }
        let (k, desc) = krun.expect("apply-continuation: empty krun");
        tracing::debug!(n, desc = %desc, "restoring krun");
        self.restore_continuation(k, val)
    }

    /// call/cc: capture, then hand the continuation to `proc`.
    pub fn call_cc(&mut self, proc: Word) -> Unwind {
        let k = self.capture_continuation();
        tracing::debug!(k = %printer::display_string(&self.heap, k), "call/cc");

        let fw = skiff_core::frame::alloc(&mut self.heap, 2);
        skiff_core::frame::set(&mut self.heap, fw, 0, k);
        self.thread.val = fw;

        if let Err(u) = self.invoke(proc, crate::vm::REGULAR_CALL) {
            return u;
        }
        Unwind::Jump {
            level: self.run_depth.saturating_sub(1),
            code: JumpCode::CallCc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_leaves_stack_unchanged() {
        let mut m = Machine::new();
        let before = m.thread.stack.clone();
        let _k = m.capture_continuation();
        assert_eq!(m.thread.stack, before);
    }

    #[test]
    fn test_restore_is_repeatable() {
        let mut m = Machine::new();
        let k = m.capture_continuation();
        let stored = match m.heap.get(k) {
            Object::Continuation(kc) => kc.stack.clone(),
            _ => unreachable!(),
        };

        m.restore_continuation_data(k, Word::fixnum(1));
        assert_eq!(m.thread.val, Word::fixnum(1));

        // the stored copy is untouched and restores again independently
        match m.heap.get(k) {
            Object::Continuation(kc) => assert_eq!(kc.stack, stored),
            _ => unreachable!(),
        }
        m.restore_continuation_data(k, Word::fixnum(2));
        assert_eq!(m.thread.val, Word::fixnum(2));
    }
}
