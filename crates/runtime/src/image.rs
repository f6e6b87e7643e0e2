//! Persisted module images
//!
//! A compiled module on disk is `(name, exports, imports,
//! constants-array, vci hash, bytecode)`.  Constants are serialized in a
//! representation-independent form; loading merges them into the global
//! constants table and backfills the module's `vci` map with the
//! assigned global indices.  Value indices are never persisted — the VM
//! assigns them lazily on first reference.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use skiff_core::bignum::{Bignum, BignumFlags};
use skiff_core::heap::Object;
use skiff_core::word::Decoded;
use skiff_core::{module, pair, strings, Singleton, Word};

use crate::vm::Machine;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ImageConstant {
    Nil,
    True,
    False,
    Unspec,
    Undef,
    Eof,
    Fixnum(i64),
    Character(char),
    String(String),
    Symbol(String),
    Keyword(String),
    Pair(Box<ImageConstant>, Box<ImageConstant>),
    Array(Vec<ImageConstant>),
    Bignum {
        integer: bool,
        negative: bool,
        inexact: bool,
        exp: i32,
        sig: Vec<i64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleImage {
    pub name: String,
    pub exports: Vec<String>,
    pub imports: Vec<String>,
    /// indexed by mci
    pub constants: Vec<ImageConstant>,
    /// extra mci aliases → position in `constants`
    pub vci: HashMap<u64, u64>,
    pub code: Vec<u8>,
}

#[derive(Debug)]
pub enum ImageError {
    Decode(String),
}

impl std::fmt::Display for ImageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageError::Decode(e) => write!(f, "bad module image: {e}"),
        }
    }
}

impl ModuleImage {
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("module image serialization cannot fail")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<ModuleImage, ImageError> {
        bincode::deserialize(bytes).map_err(|e| ImageError::Decode(e.to_string()))
    }
}

fn constant_to_word(m: &mut Machine, c: &ImageConstant) -> Word {
    match c {
        ImageConstant::Nil => Word::NIL,
        ImageConstant::True => Word::TRUE,
        ImageConstant::False => Word::FALSE,
        ImageConstant::Unspec => Word::UNSPEC,
        ImageConstant::Undef => Word::UNDEF,
        ImageConstant::Eof => Word::EOF,
        ImageConstant::Fixnum(n) => Word::fixnum(*n),
        ImageConstant::Character(c) => Word::character(*c),
        ImageConstant::String(s) => strings::alloc(&mut m.heap, s.clone()),
        ImageConstant::Symbol(s) => m.intern(s),
        ImageConstant::Keyword(s) => m.symbols.intern_keyword(&mut m.heap, s),
        ImageConstant::Pair(h, t) => {
            let hw = constant_to_word(m, h);
            let tw = constant_to_word(m, t);
            pair::cons(&mut m.heap, hw, tw)
        }
        ImageConstant::Array(items) => {
            let words: Vec<Word> = items.iter().map(|i| constant_to_word(m, i)).collect();
            m.heap.alloc(Object::Array(skiff_core::array::Array::from_vec(
                words,
                Word::NIL,
            )))
        }
        ImageConstant::Bignum {
            integer,
            negative,
            inexact,
            exp,
            sig,
        } => {
            let mut flags = BignumFlags::empty();
            if *integer {
                flags |= BignumFlags::INTEGER;
            } else {
                flags |= BignumFlags::REAL;
            }
            if *negative {
                flags |= BignumFlags::NEGATIVE;
            }
            if *inexact {
                flags |= BignumFlags::INEXACT;
            }
            m.alloc_bignum(Bignum {
                flags,
                exp: *exp,
                sig: sig.clone(),
            })
        }
    }
}

/// The inverse, for image writers.  `None` for values that cannot live
/// in a constant table (procedures, handles, ...).
pub fn word_to_constant(m: &Machine, w: Word) -> Option<ImageConstant> {
    match w.decode() {
        Decoded::Fixnum(n) => Some(ImageConstant::Fixnum(n)),
        Decoded::Character(c) => Some(ImageConstant::Character(c)),
        Decoded::Singleton(Singleton::Nil) => Some(ImageConstant::Nil),
        Decoded::Singleton(Singleton::True) => Some(ImageConstant::True),
        Decoded::Singleton(Singleton::False) => Some(ImageConstant::False),
        Decoded::Singleton(Singleton::Unspec) => Some(ImageConstant::Unspec),
        Decoded::Singleton(Singleton::Undef) => Some(ImageConstant::Undef),
        Decoded::Singleton(Singleton::Eof) => Some(ImageConstant::Eof),
        Decoded::Singleton(_) => None,
        Decoded::Ref(_) => match m.heap.get(w) {
            Object::String(_) | Object::Substring { .. } => Some(ImageConstant::String(
                strings::text(&m.heap, w)?.to_string(),
            )),
            Object::Symbol(s) => Some(ImageConstant::Symbol(s.to_string())),
            Object::Keyword(s) => Some(ImageConstant::Keyword(s.to_string())),
            Object::Pair { head, tail } => Some(ImageConstant::Pair(
                Box::new(word_to_constant(m, *head)?),
                Box::new(word_to_constant(m, *tail)?),
            )),
            Object::Array(a) => Some(ImageConstant::Array(
                a.elements()
                    .iter()
                    .map(|&e| word_to_constant(m, e))
                    .collect::<Option<Vec<_>>>()?,
            )),
            Object::Bignum(b) => Some(ImageConstant::Bignum {
                integer: b.is_integer(),
                negative: b.flags.contains(BignumFlags::NEGATIVE),
                inexact: b.is_inexact(),
                exp: b.exp,
                sig: b.sig.clone(),
            }),
            _ => None,
        },
        _ => None,
    }
}

impl Machine {
    /// Bring a compiled module into the VM: create/find the module,
    /// merge its constants (backfilling `vci`), wire imports and
    /// exports, and append its bytecode.  Returns the module and the PC
    /// of its first instruction.
    pub fn load_image(&mut self, img: &ModuleImage) -> (Word, usize) {
        let name = self.intern(&img.name);
        let mw = self.find_or_create_module(name);

        for imp in &img.imports {
            let imp_name = self.intern(imp);
            let imp_mod = self.find_or_create_module(imp_name);
            module::add_import(&mut self.heap, mw, imp_mod);
        }
        for exp in &img.exports {
            let sym = self.intern(exp);
            module::add_export(&mut self.heap, mw, sym);
        }

        // merge the constants: image position is the module-local index
        let mut assigned: Vec<u64> = Vec::with_capacity(img.constants.len());
        for (i, c) in img.constants.iter().enumerate() {
            let w = constant_to_word(self, c);
            let gci = self.constants_lookup_or_extend(w) as u64;
            module::with_mut(&mut self.heap, mw).set_vci(i as u64, gci);
            assigned.push(gci);
        }
        // alias mcis recorded by the compiler
        for (&mci, &idx) in &img.vci {
            if let Some(&gci) = assigned.get(idx as usize) {
                module::with_mut(&mut self.heap, mw).set_vci(mci, gci);
            }
        }

        let pc0 = self.code.len();
        self.code.extend_from_slice(&img.code);

        tracing::debug!(
            module = %img.name,
            constants = img.constants.len(),
            code = img.code.len(),
            pc0,
            "loaded module image"
        );
        (mw, pc0)
    }

    /// Load an image and run its toplevel code in the module's scope.
    pub fn run_image(&mut self, img: &ModuleImage) -> crate::unwind::VmResult<Word> {
        let (mw, pc0) = self.load_image(img);
        let env0 = self.thread.env;
        let mod0 = self.thread.module;
        self.thread.env = mw;
        self.thread.module = mw;
        self.thread.pc = pc0;
        let r = self.run(&format!("load {}", img.name));
        self.thread.env = env0;
        self.thread.module = mod0;
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_round_trip_bytes() {
        let img = ModuleImage {
            name: "demo".to_string(),
            exports: vec!["f".to_string()],
            imports: vec!["Skiff".to_string()],
            constants: vec![
                ImageConstant::Symbol("f".to_string()),
                ImageConstant::Fixnum(42),
                ImageConstant::Pair(
                    Box::new(ImageConstant::Symbol("quote".to_string())),
                    Box::new(ImageConstant::Nil),
                ),
            ],
            vci: HashMap::new(),
            code: vec![1, 2, 3],
        };
        let bytes = img.to_bytes();
        let back = ModuleImage::from_bytes(&bytes).unwrap();
        assert_eq!(back.name, "demo");
        assert_eq!(back.constants.len(), 3);
        assert_eq!(back.code, vec![1, 2, 3]);
    }

    #[test]
    fn test_load_merges_constants() {
        let mut m = Machine::new();
        let img = ModuleImage {
            name: "demo".to_string(),
            exports: vec![],
            imports: vec![],
            constants: vec![
                ImageConstant::Symbol("x".to_string()),
                ImageConstant::String("hello".to_string()),
            ],
            vci: HashMap::new(),
            code: vec![],
        };
        let (mw, _pc0) = m.load_image(&img);
        let gci0 = module::with(&m.heap, mw).get_vci(0).unwrap();
        let sym = m.constants_ref(gci0 as usize);
        assert_eq!(m.heap.symbol_text(sym), Some("x"));
    }

    #[test]
    fn test_load_dedups_constants() {
        let mut m = Machine::new();
        let mk = |name: &str| ModuleImage {
            name: name.to_string(),
            exports: vec![],
            imports: vec![],
            constants: vec![ImageConstant::Symbol("shared".to_string())],
            vci: HashMap::new(),
            code: vec![],
        };
        let (m1, _) = m.load_image(&mk("a"));
        let (m2, _) = m.load_image(&mk("b"));
        let g1 = module::with(&m.heap, m1).get_vci(0).unwrap();
        let g2 = module::with(&m.heap, m2).get_vci(0).unwrap();
        assert_eq!(g1, g2, "interned symbol merges to one gci");
    }

    #[test]
    fn test_word_constant_round_trip() {
        let mut m = Machine::new();
        let sym = m.intern("quote");
        let x = m.intern("x");
        let form = pair::list(&mut m.heap, &[sym, x]);
        let img = word_to_constant(&m, form).unwrap();
        let back = constant_to_word(&mut m, &img);
        assert!(skiff_core::equal::equal(&m.heap, form, back));
    }
}
