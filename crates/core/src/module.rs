//! Modules and binding tables
//!
//! A module owns four maps: `exports` (symbols), `imports` (modules, in
//! search order), `symbols` (symbol → binding record) and the two
//! per-module index maps:
//!
//! - `vci`: module-local constant index → global constant index
//! - `vvi`: module-local constant index → global value index
//!
//! The compiler emits module-local indices because modules are compiled
//! independently; the VM resolves them lazily and caches the answer here.
//! Bootstrap code never passes through image loading, so an mci with no
//! `vci` mapping *is* its gci — `get_or_set_vci` records that identity on
//! first touch.

use std::collections::HashMap;

use crate::heap::{Heap, Object};
use crate::word::Word;

/// What a symbol means in a module: the 5-tuple
/// `(scope-marker, mci, gvi, defining-module, description)`.
#[derive(Debug, Clone)]
pub struct BindingRecord {
    /// one of the scope marker constants: `toplevel`, `predef`, `environ`,
    /// `computed`
    pub scope: Word,
    pub mci: u64,
    /// 0 means "not yet allocated" (slot 0 of the values table is the
    /// reserved sentinel)
    pub gvi: usize,
    pub module: Word,
    pub desc: String,
}

#[derive(Debug)]
pub struct Module {
    /// symbol
    pub name: Word,
    /// exported symbols
    pub exports: Vec<Word>,
    /// imported modules, first import searched first
    pub imports: Vec<Word>,
    pub symbols: HashMap<Word, BindingRecord>,
    vci: HashMap<u64, u64>,
    vvi: HashMap<u64, usize>,
}

impl Module {
    pub fn new(name: Word) -> Module {
        Module {
            name,
            exports: Vec::new(),
            imports: Vec::new(),
            symbols: HashMap::new(),
            vci: HashMap::new(),
            vvi: HashMap::new(),
        }
    }

    pub fn get_vci(&self, mci: u64) -> Option<u64> {
        self.vci.get(&mci).copied()
    }

    pub fn set_vci(&mut self, mci: u64, gci: u64) {
        self.vci.insert(mci, gci);
    }

    pub fn get_vvi(&self, mci: u64) -> Option<usize> {
        self.vvi.get(&mci).copied()
    }

    pub fn set_vvi(&mut self, mci: u64, gvi: usize) {
        self.vvi.insert(mci, gvi);
    }

    pub(crate) fn trace(&self, out: &mut Vec<Word>) {
        out.push(self.name);
        out.extend_from_slice(&self.exports);
        out.extend_from_slice(&self.imports);
        for (sym, rec) in &self.symbols {
            out.push(*sym);
            out.push(rec.scope);
            out.push(rec.module);
        }
    }
}

pub fn alloc(heap: &mut Heap, name: Word) -> Word {
    heap.alloc(Object::Module(Module::new(name)))
}

pub fn with<'h>(heap: &'h Heap, w: Word) -> &'h Module {
    match heap.get(w) {
        Object::Module(m) => m,
        other => panic!("module: not a module: {}", other.type_name()),
    }
}

pub fn with_mut<'h>(heap: &'h mut Heap, w: Word) -> &'h mut Module {
    match heap.get_mut(w) {
        Object::Module(m) => m,
        other => panic!("module: not a module: {}", other.type_name()),
    }
}

pub fn is_module(heap: &Heap, w: Word) -> bool {
    matches!(heap.try_get(w), Some(Object::Module(_)))
}

/// `mci → gci` through the module's `vci`, defaulting to the identity
/// mapping (and recording it) when the module has no entry.
pub fn get_or_set_vci(heap: &mut Heap, mw: Word, mci: u64) -> u64 {
    let m = with_mut(heap, mw);
    match m.get_vci(mci) {
        Some(gci) => gci,
        None => {
            m.set_vci(mci, mci);
            mci
        }
    }
}

/// Search the module's own symbol table only.
pub fn find_symbol(heap: &Heap, mw: Word, sym: Word) -> Option<BindingRecord> {
    with(heap, mw).symbols.get(&sym).cloned()
}

/// The lookup contract: search the module's own table, then (optionally)
/// its imports in order — first hit wins.  There is no implicit fallback
/// to the base module; that is one of the imports.
pub fn find_symbol_recurse(
    heap: &Heap,
    mw: Word,
    sym: Word,
    include_self: bool,
) -> Option<BindingRecord> {
    if include_self {
        if let Some(rec) = find_symbol(heap, mw, sym) {
            return Some(rec);
        }
    }
    for &imp in &with(heap, mw).imports {
        if let Some(rec) = find_symbol(heap, imp, sym) {
            return Some(rec);
        }
    }
    None
}

pub fn set_symbol(heap: &mut Heap, mw: Word, sym: Word, rec: BindingRecord) {
    with_mut(heap, mw).symbols.insert(sym, rec);
}

pub fn add_import(heap: &mut Heap, mw: Word, import: Word) {
    let m = with_mut(heap, mw);
    if !m.imports.contains(&import) {
        m.imports.push(import);
    }
}

pub fn add_export(heap: &mut Heap, mw: Word, sym: Word) {
    let m = with_mut(heap, mw);
    if !m.exports.contains(&sym) {
        m.exports.push(sym);
    }
}
