//! Skiff core: the value model under the bytecode VM
//!
//! Key design principles:
//! - Word: one machine word, tagged in the low bits; heap references are
//!   arena indices, never raw pointers
//! - Heap: an arena of typed objects; the GC is mark-sweep over explicit
//!   roots with a finalizer pass for handles
//! - everything the VM indexes (constants, values, module tables) lives
//!   above this crate; this crate only knows values

pub mod array;
pub mod bignum;
pub mod equal;
pub mod frame;
pub mod handle;
pub mod hash;
pub mod heap;
pub mod module;
pub mod pair;
pub mod printer;
pub mod strings;
pub mod struct_types;
pub mod symbols;
pub mod word;

pub use handle::{Handle, HandleError, HandleFlags, HandleStream, Whence};
pub use heap::{Closure, Continuation, Heap, Object, PrimId, Primitive};
pub use module::{BindingRecord, Module};
pub use symbols::SymbolTable;
pub use word::{Decoded, FIXNUM_MAX, FIXNUM_MIN, HeapIx, Singleton, Word};
