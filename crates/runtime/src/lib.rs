//! Skiff runtime: the bytecode virtual machine
//!
//! Key design principles:
//! - one append-only bytecode stream, one cooperative thread, one
//!   dispatch loop at a time (nested runs form a LIFO nest)
//! - non-local control (raise, continuations, exit) unwinds host frames
//!   with typed [`Unwind`] values instead of `longjmp`
//! - signals only ever set flags; dispatch happens between instructions
//!
//! [`Unwind`]: unwind::Unwind

pub mod bytecode;
pub mod condition;
pub mod continuation;
pub mod dasm;
pub mod handle;
pub mod image;
pub mod numeric;
pub mod opcodes;
pub mod primitives;
pub mod signal;
pub mod thread;
pub mod unwind;
pub mod vm;

pub use bytecode::{CodeBuffer, Prologue};
pub use image::{ImageConstant, ModuleImage};
pub use opcodes::Op;
pub use primitives::PrimDef;
pub use thread::Thread;
pub use unwind::{JumpCode, Unwind, VmResult};
pub use vm::Machine;
