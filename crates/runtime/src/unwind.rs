//! Non-local control transfer
//!
//! The original unwound the host C stack with `siglongjmp`, tagging each
//! jump with an integer code.  Here the jump is a value: deep host-side
//! call chains (primitives invoking the VM invoking primitives…) return
//! `Err(Unwind::Jump { .. })` and every nested `run` loop re-raises it
//! until the loop at the target nesting level catches it and resumes
//! stepping.  `Exit` propagates through every loop to the process edge.

/// Why the stack is being unwound.  The discriminants are the original
/// jump codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JumpCode {
    /// a condition handler has been set up to run
    Condition = 1,
    /// a continuation has been restored
    Continuation = 2,
    /// call/cc has invoked its receiver
    CallCc = 3,
    /// a signal handler has been set up to run
    Event = 4,
}

#[derive(Debug)]
pub enum Unwind {
    /// Unwind the host stack to the `run` loop at `level`; the thread
    /// state has already been set up for it to continue stepping.
    Jump { level: usize, code: JumpCode },
    /// Terminate the VM with this process status.
    Exit(i32),
}

pub type VmResult<T> = Result<T, Unwind>;
