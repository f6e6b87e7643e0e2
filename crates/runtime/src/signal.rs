//! Signal handling
//!
//! The OS-level handler does exactly one async-signal-safe thing: set an
//! atomic per-signum flag.  The dispatch loop polls the flags between
//! instructions and raises the signal's registered condition through the
//! normal trap machinery, with the interrupt-handler-return prologue
//! restoring *all* state so the interrupted instruction boundary is
//! unharmed.
//!
//! The VM never suspends mid-instruction.

use std::sync::atomic::{AtomicBool, Ordering};

use skiff_core::Word;

use crate::unwind::{JumpCode, VmResult};
use crate::vm::Machine;

/// Covers all standard Unix signals.
pub const MAX_SIGNAL: usize = 32;

static SIGNAL_FLAGS: [AtomicBool; MAX_SIGNAL] = {
    #[allow(clippy::declare_interior_mutable_const)]
    const FLAG: AtomicBool = AtomicBool::new(false);
    [FLAG; MAX_SIGNAL]
};

/// Async-signal-safe: only the atomic store.
#[cfg(unix)]
extern "C" fn flag_signal_handler(sig: libc::c_int) {
    let sig = sig as usize;
    if sig < MAX_SIGNAL {
        SIGNAL_FLAGS[sig].store(true, Ordering::SeqCst);
    }
}

/// Install the flag-setting handler for `signum`.
#[cfg(unix)]
pub fn trap_signal(signum: usize) {
    assert!(signum < MAX_SIGNAL, "invalid signal number {signum}");
    unsafe {
        libc::signal(signum as libc::c_int, flag_signal_handler as libc::sighandler_t);
    }
}

#[cfg(not(unix))]
pub fn trap_signal(_signum: usize) {}

/// Restore the default disposition for `signum`.
#[cfg(unix)]
pub fn default_signal(signum: usize) {
    assert!(signum < MAX_SIGNAL, "invalid signal number {signum}");
    unsafe {
        libc::signal(signum as libc::c_int, libc::SIG_DFL);
    }
}

#[cfg(not(unix))]
pub fn default_signal(_signum: usize) {}

/// Atomically take the pending flag for `signum`.
pub fn take_pending(signum: usize) -> bool {
    SIGNAL_FLAGS[signum].swap(false, Ordering::SeqCst)
}

/// Set a flag by hand — what the OS handler would have done.  Tests and
/// self-signalling use this.
pub fn set_pending(signum: usize) {
    SIGNAL_FLAGS[signum].store(true, Ordering::SeqCst);
}

impl Machine {
    /// Register interest in `signum`: install the OS handler and the
    /// condition to raise when it fires.
    pub fn install_signal(&mut self, signum: usize, handler_name: Word) {
        assert!(signum < MAX_SIGNAL, "invalid signal number {signum}");
        let ty = self.conditions.rt_signal_condition;
        let cond = self.make_condition(
            ty,
            &format!("signal {signum}"),
            "",
            &[Word::fixnum(signum as i64)],
        );
        self.signal_conditions[signum] = cond;
        self.signal_handler_names[signum] = handler_name;
        trap_signal(signum);
    }

    /// Between-instruction signal dispatch: raise the registered
    /// condition for every pending signal, out-of-band.
    pub fn poll_signals(&mut self) -> VmResult<()> {
        for signum in 0..MAX_SIGNAL {
            if !take_pending(signum) {
                continue;
            }
            let cond = self.signal_conditions[signum];
            if cond == Word::NIL {
                tracing::warn!(signum, "pending signal has no condition");
                continue;
            }
            tracing::debug!(signum, "dispatching signal");
            return Err(self.raise_condition(true, cond, true, JumpCode::Event));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_pending_clears() {
        set_pending(15);
        assert!(take_pending(15));
        assert!(!take_pending(15));
    }
}
