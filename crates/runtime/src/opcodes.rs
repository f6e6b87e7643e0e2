//! The opcode table
//!
//! Opcodes are bytes in `[1, 255]`.  The numbering is versioned: a stream
//! byte that does not decode to a known opcode is a fatal error and the
//! dispatcher reports it with the surrounding bytes for diagnostics.

use num_enum::TryFromPrimitive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum Op {
    ShallowArgumentRef0 = 1,
    ShallowArgumentRef1 = 2,
    ShallowArgumentRef2 = 3,
    ShallowArgumentRef3 = 4,
    ShallowArgumentRef = 5,
    DeepArgumentRef = 6,
    ShallowArgumentSet0 = 7,
    ShallowArgumentSet1 = 8,
    ShallowArgumentSet2 = 9,
    ShallowArgumentSet3 = 10,
    ShallowArgumentSet = 11,
    DeepArgumentSet = 12,

    GlobalSymRef = 13,
    CheckedGlobalSymRef = 14,
    GlobalFunctionSymRef = 15,
    CheckedGlobalFunctionSymRef = 16,
    ConstantSymRef = 17,
    ComputedSymRef = 18,
    GlobalSymDef = 19,
    GlobalSymSet = 20,
    ComputedSymSet = 21,
    ComputedSymDefine = 22,

    Predefined0 = 23,
    Predefined1 = 24,
    Predefined2 = 25,
    Predefined = 26,

    LongGoto = 27,
    LongJumpFalse = 28,
    LongJumpTrue = 29,
    ShortGoto = 30,
    ShortJumpFalse = 31,
    ShortJumpTrue = 32,

    PushValue = 33,
    PopValue = 34,
    PopReg1 = 35,
    PopReg2 = 36,
    PopExpr = 37,
    PopFunction = 38,

    PreserveState = 39,
    RestoreState = 40,
    RestoreAllState = 41,

    CreateClosure = 42,
    FunctionInvoke = 43,
    FunctionGoto = 44,
    Return = 45,
    Finish = 46,
    Abort = 47,

    AllocateFrame1 = 48,
    AllocateFrame2 = 49,
    AllocateFrame3 = 50,
    AllocateFrame4 = 51,
    AllocateFrame5 = 52,
    AllocateFrame = 53,
    AllocateDottedFrame = 54,
    PopFrame0 = 55,
    PopFrame1 = 56,
    PopFrame2 = 57,
    PopFrame3 = 58,
    PopFrame = 59,
    ExtendFrame = 60,
    UnlinkFrame = 61,
    PackFrame = 62,
    PopConsFrame = 63,

    Arity1P = 64,
    Arity2P = 65,
    Arity3P = 66,
    Arity4P = 67,
    ArityEqP = 68,
    ArityGeP = 69,

    Constant0 = 70,
    Constant1 = 71,
    Constant2 = 72,
    Constant3 = 73,
    Constant4 = 74,
    Fixnum = 75,
    NegFixnum = 76,
    Character = 77,
    Constant = 78,
    Unicode = 79,

    Nop = 80,

    PrimCall0 = 81,
    PrimCall1 = 82,
    PrimCall2 = 83,
    PrimCall1Head = 84,
    PrimCall1Tail = 85,
    PrimCall1PairP = 86,
    PrimCall1SymbolP = 87,
    PrimCall1Display = 88,
    PrimCall1PrimitiveP = 89,
    PrimCall1NullP = 90,
    PrimCall1ContinuationP = 91,
    PrimCall1EofP = 92,
    PrimCall1SetCurMod = 93,
    PrimCall2Pair = 94,
    PrimCall2EqP = 95,
    PrimCall2SetHead = 96,
    PrimCall2SetTail = 97,
    PrimCall2Add = 98,
    PrimCall2Subtract = 99,
    PrimCall2Eq = 100,
    PrimCall2Lt = 101,
    PrimCall2Gt = 102,
    PrimCall2Multiply = 103,
    PrimCall2Le = 104,
    PrimCall2Ge = 105,
    PrimCall2Remainder = 106,

    Expander = 107,
    InfixOperator = 108,
    PostfixOperator = 109,

    PushDynamic = 110,
    PopDynamic = 111,
    DynamicSymRef = 112,
    DynamicFunctionSymRef = 113,
    PushEnviron = 114,
    PopEnviron = 115,
    EnvironSymRef = 116,

    NonContErr = 117,
    PushTrap = 118,
    PopTrap = 119,
    RestoreTrap = 120,
}

impl Op {
    /// Mnemonic, as the disassembler prints it.
    pub fn name(self) -> &'static str {
        match self {
            Op::ShallowArgumentRef0 => "SHALLOW-ARGUMENT-REF0",
            Op::ShallowArgumentRef1 => "SHALLOW-ARGUMENT-REF1",
            Op::ShallowArgumentRef2 => "SHALLOW-ARGUMENT-REF2",
            Op::ShallowArgumentRef3 => "SHALLOW-ARGUMENT-REF3",
            Op::ShallowArgumentRef => "SHALLOW-ARGUMENT-REF",
            Op::DeepArgumentRef => "DEEP-ARGUMENT-REF",
            Op::ShallowArgumentSet0 => "SHALLOW-ARGUMENT-SET0",
            Op::ShallowArgumentSet1 => "SHALLOW-ARGUMENT-SET1",
            Op::ShallowArgumentSet2 => "SHALLOW-ARGUMENT-SET2",
            Op::ShallowArgumentSet3 => "SHALLOW-ARGUMENT-SET3",
            Op::ShallowArgumentSet => "SHALLOW-ARGUMENT-SET",
            Op::DeepArgumentSet => "DEEP-ARGUMENT-SET",
            Op::GlobalSymRef => "GLOBAL-SYM-REF",
            Op::CheckedGlobalSymRef => "CHECKED-GLOBAL-SYM-REF",
            Op::GlobalFunctionSymRef => "GLOBAL-FUNCTION-SYM-REF",
            Op::CheckedGlobalFunctionSymRef => "CHECKED-GLOBAL-FUNCTION-SYM-REF",
            Op::ConstantSymRef => "CONSTANT-SYM-REF",
            Op::ComputedSymRef => "COMPUTED-SYM-REF",
            Op::GlobalSymDef => "GLOBAL-SYM-DEF",
            Op::GlobalSymSet => "GLOBAL-SYM-SET",
            Op::ComputedSymSet => "COMPUTED-SYM-SET",
            Op::ComputedSymDefine => "COMPUTED-SYM-DEFINE",
            Op::Predefined0 => "PREDEFINED0",
            Op::Predefined1 => "PREDEFINED1",
            Op::Predefined2 => "PREDEFINED2",
            Op::Predefined => "PREDEFINED",
            Op::LongGoto => "LONG-GOTO",
            Op::LongJumpFalse => "LONG-JUMP-FALSE",
            Op::LongJumpTrue => "LONG-JUMP-TRUE",
            Op::ShortGoto => "SHORT-GOTO",
            Op::ShortJumpFalse => "SHORT-JUMP-FALSE",
            Op::ShortJumpTrue => "SHORT-JUMP-TRUE",
            Op::PushValue => "PUSH-VALUE",
            Op::PopValue => "POP-VALUE",
            Op::PopReg1 => "POP-REG1",
            Op::PopReg2 => "POP-REG2",
            Op::PopExpr => "POP-EXPR",
            Op::PopFunction => "POP-FUNCTION",
            Op::PreserveState => "PRESERVE-STATE",
            Op::RestoreState => "RESTORE-STATE",
            Op::RestoreAllState => "RESTORE-ALL-STATE",
            Op::CreateClosure => "CREATE-CLOSURE",
            Op::FunctionInvoke => "FUNCTION-INVOKE",
            Op::FunctionGoto => "FUNCTION-GOTO",
            Op::Return => "RETURN",
            Op::Finish => "FINISH",
            Op::Abort => "ABORT",
            Op::AllocateFrame1 => "ALLOCATE-FRAME1",
            Op::AllocateFrame2 => "ALLOCATE-FRAME2",
            Op::AllocateFrame3 => "ALLOCATE-FRAME3",
            Op::AllocateFrame4 => "ALLOCATE-FRAME4",
            Op::AllocateFrame5 => "ALLOCATE-FRAME5",
            Op::AllocateFrame => "ALLOCATE-FRAME",
            Op::AllocateDottedFrame => "ALLOCATE-DOTTED-FRAME",
            Op::PopFrame0 => "POP-FRAME0",
            Op::PopFrame1 => "POP-FRAME1",
            Op::PopFrame2 => "POP-FRAME2",
            Op::PopFrame3 => "POP-FRAME3",
            Op::PopFrame => "POP-FRAME",
            Op::ExtendFrame => "EXTEND-FRAME",
            Op::UnlinkFrame => "UNLINK-FRAME",
            Op::PackFrame => "PACK-FRAME",
            Op::PopConsFrame => "POP-CONS-FRAME",
            Op::Arity1P => "ARITY=1?",
            Op::Arity2P => "ARITY=2?",
            Op::Arity3P => "ARITY=3?",
            Op::Arity4P => "ARITY=4?",
            Op::ArityEqP => "ARITY=?",
            Op::ArityGeP => "ARITY>=?",
            Op::Constant0 => "CONSTANT 0",
            Op::Constant1 => "CONSTANT 1",
            Op::Constant2 => "CONSTANT 2",
            Op::Constant3 => "CONSTANT 3",
            Op::Constant4 => "CONSTANT 4",
            Op::Fixnum => "FIXNUM",
            Op::NegFixnum => "NEG-FIXNUM",
            Op::Character => "CHARACTER",
            Op::Constant => "CONSTANT",
            Op::Unicode => "UNICODE",
            Op::Nop => "NOP",
            Op::PrimCall0 => "PRIMITIVE/0",
            Op::PrimCall1 => "PRIMITIVE/1",
            Op::PrimCall2 => "PRIMITIVE/2",
            Op::PrimCall1Head => "PRIMITIVE/1 head",
            Op::PrimCall1Tail => "PRIMITIVE/1 tail",
            Op::PrimCall1PairP => "PRIMITIVE/1 pair?",
            Op::PrimCall1SymbolP => "PRIMITIVE/1 symbol?",
            Op::PrimCall1Display => "PRIMITIVE/1 display",
            Op::PrimCall1PrimitiveP => "PRIMITIVE/1 primitive?",
            Op::PrimCall1NullP => "PRIMITIVE/1 null?",
            Op::PrimCall1ContinuationP => "PRIMITIVE/1 continuation?",
            Op::PrimCall1EofP => "PRIMITIVE/1 eof?",
            Op::PrimCall1SetCurMod => "PRIMITIVE/1 %set-current-module!",
            Op::PrimCall2Pair => "PRIMITIVE/2 pair",
            Op::PrimCall2EqP => "PRIMITIVE/2 eq?",
            Op::PrimCall2SetHead => "PRIMITIVE/2 set-head!",
            Op::PrimCall2SetTail => "PRIMITIVE/2 set-tail!",
            Op::PrimCall2Add => "PRIMITIVE/2 +",
            Op::PrimCall2Subtract => "PRIMITIVE/2 -",
            Op::PrimCall2Eq => "PRIMITIVE/2 =",
            Op::PrimCall2Lt => "PRIMITIVE/2 <",
            Op::PrimCall2Gt => "PRIMITIVE/2 >",
            Op::PrimCall2Multiply => "PRIMITIVE/2 *",
            Op::PrimCall2Le => "PRIMITIVE/2 <=",
            Op::PrimCall2Ge => "PRIMITIVE/2 >=",
            Op::PrimCall2Remainder => "PRIMITIVE/2 remainder",
            Op::Expander => "EXPANDER",
            Op::InfixOperator => "INFIX-OPERATOR",
            Op::PostfixOperator => "POSTFIX-OPERATOR",
            Op::PushDynamic => "PUSH-DYNAMIC",
            Op::PopDynamic => "POP-DYNAMIC",
            Op::DynamicSymRef => "DYNAMIC-SYM-REF",
            Op::DynamicFunctionSymRef => "DYNAMIC-FUNCTION-SYM-REF",
            Op::PushEnviron => "PUSH-ENVIRON",
            Op::PopEnviron => "POP-ENVIRON",
            Op::EnvironSymRef => "ENVIRON-SYM-REF",
            Op::NonContErr => "NON-CONT-ERR",
            Op::PushTrap => "PUSH-TRAP",
            Op::PopTrap => "POP-TRAP",
            Op::RestoreTrap => "RESTORE-TRAP",
        }
    }
}
