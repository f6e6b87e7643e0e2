//! Module images: the persisted constants format, loading/merging, and
//! running image toplevels in module scope.

mod common;

use std::collections::HashMap;

use common::Asm;
use skiff_core::{module, Object, Word};
use skiff_runtime::{ImageConstant, Machine, ModuleImage, Op};

/// An image whose toplevel multiplies a bignum constant by ten.
#[test]
fn test_run_image_computes() {
    let mut code = Asm::new();
    code.op(Op::ConstantSymRef).varuint(0);
    code.op(Op::PushValue);
    code.fixnum(10);
    code.op(Op::PopReg1);
    code.op(Op::PrimCall2Multiply);

    let img = ModuleImage {
        name: "arith-demo".to_string(),
        exports: vec![],
        imports: vec!["Skiff".to_string()],
        constants: vec![ImageConstant::Bignum {
            integer: true,
            negative: false,
            inexact: false,
            exp: 0,
            // 12345678901234567890 in two DPW=18 segments
            sig: vec![345_678_901_234_567_890, 12],
        }],
        vci: HashMap::new(),
        code: code.code.as_bytes().to_vec(),
    };

    let mut m = Machine::new();
    let v = m.run_image(&img).expect("image runs to completion");
    match m.heap.get(v) {
        Object::Bignum(b) => assert_eq!(b.to_text(), "123456789012345678900"),
        other => panic!("expected bignum, got {}", other.type_name()),
    }
}

/// Definitions made by an image land in the image's module, resolvable
/// afterwards through the binding tables.
#[test]
fn test_image_defines_in_own_module() {
    let mut code = Asm::new();
    code.fixnum(42);
    code.op(Op::GlobalSymDef).reference(0).varuint(1);
    code.op(Op::GlobalSymSet).reference(0);

    let img = ModuleImage {
        name: "defs-demo".to_string(),
        exports: vec!["answer".to_string()],
        imports: vec!["Skiff".to_string()],
        constants: vec![
            ImageConstant::Symbol("answer".to_string()),
            ImageConstant::Symbol("toplevel".to_string()),
        ],
        vci: HashMap::new(),
        code: code.code.as_bytes().to_vec(),
    };

    let mut m = Machine::new();
    m.run_image(&img).expect("image runs to completion");

    let name = m.intern("defs-demo");
    let mw = m.find_or_create_module(name);
    let sym = m.intern("answer");
    let rec = module::find_symbol(&m.heap, mw, sym).expect("binding exists");
    assert_eq!(m.values_ref(rec.gvi), Word::fixnum(42));
}

/// The serialized form survives a disk round trip and still runs.
#[test]
fn test_image_disk_round_trip() {
    let mut code = Asm::new();
    code.fixnum(7);

    let img = ModuleImage {
        name: "disk-demo".to_string(),
        exports: vec![],
        imports: vec![],
        constants: vec![],
        vci: HashMap::new(),
        code: code.code.as_bytes().to_vec(),
    };

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("disk-demo.skb");
    std::fs::write(&path, img.to_bytes()).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let back = ModuleImage::from_bytes(&bytes).unwrap();
    let mut m = Machine::new();
    assert_eq!(m.run_image(&back).unwrap(), Word::fixnum(7));
}

/// Corrupt image bytes are rejected, not misread.
#[test]
fn test_corrupt_image_rejected() {
    assert!(ModuleImage::from_bytes(&[0xff, 0x01, 0x02]).is_err());
}

/// Two images sharing a symbol merge it to one gci; the module-local
/// indices stay independent.
#[test]
fn test_cross_image_constant_merge() {
    let mk = |name: &str| ModuleImage {
        name: name.to_string(),
        exports: vec![],
        imports: vec![],
        constants: vec![
            ImageConstant::String(format!("only-{name}")),
            ImageConstant::Symbol("shared".to_string()),
        ],
        vci: HashMap::new(),
        code: vec![],
    };

    let mut m = Machine::new();
    let (m1, _) = m.load_image(&mk("one"));
    let (m2, _) = m.load_image(&mk("two"));

    let s1 = module::with(&m.heap, m1).get_vci(1).unwrap();
    let s2 = module::with(&m.heap, m2).get_vci(1).unwrap();
    assert_eq!(s1, s2, "interned symbol merges");

    let u1 = module::with(&m.heap, m1).get_vci(0).unwrap();
    let u2 = module::with(&m.heap, m2).get_vci(0).unwrap();
    assert_ne!(u1, u2, "distinct strings stay distinct");
}
