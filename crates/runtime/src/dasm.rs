//! Disassembler and exit artifacts
//!
//! Renders any span of the bytecode stream back into mnemonics, and
//! writes the `vm-dasm` / `vm-constants` / `vm-values` debug files on
//! request (normally at VM exit).

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use skiff_core::printer;

use crate::opcodes::Op;
use crate::vm::Machine;

/// Operand shapes, as the dispatch loop fetches them.
enum Operands {
    None,
    Byte,
    Varuint,
    Varuint2,
    Varuint4,
    Ref,
    RefVaruint,
}

fn operands(op: Op) -> Operands {
    use Op::*;
    match op {
        ShallowArgumentRef | ShallowArgumentSet | PopExpr | PopFrame | PackFrame
        | PopConsFrame | ArityEqP | ArityGeP | Fixnum | NegFixnum | Character | Constant
        | Unicode | ConstantSymRef | Predefined | LongGoto | LongJumpFalse | LongJumpTrue
        | Abort | AllocateFrame2 | AllocateFrame3 | AllocateFrame4 | AllocateFrame5
        | PrimCall0 | PrimCall1 | PrimCall2 => Operands::Varuint,
        DeepArgumentRef | DeepArgumentSet | AllocateFrame | AllocateDottedFrame => {
            Operands::Varuint2
        }
        CreateClosure => Operands::Varuint4,
        ShortGoto | ShortJumpFalse | ShortJumpTrue => Operands::Byte,
        GlobalSymRef | CheckedGlobalSymRef | GlobalFunctionSymRef | CheckedGlobalFunctionSymRef
        | ComputedSymRef | GlobalSymSet | ComputedSymSet | ComputedSymDefine | Expander
        | PushDynamic | DynamicSymRef | DynamicFunctionSymRef | PushEnviron | EnvironSymRef
        | PushTrap => Operands::Ref,
        GlobalSymDef | InfixOperator | PostfixOperator => Operands::RefVaruint,
        _ => Operands::None,
    }
}

/// Disassemble `[pc0, pce)`; `pce == 0` means the whole stream.
pub fn disassemble(m: &Machine, pc0: usize, pce: usize) -> String {
    let pce = if pce == 0 { m.code.len() } else { pce };
    let mut out = String::new();
    let mut pc = pc0;
    while pc < pce {
        let at = pc;
        let byte = m.code.fetch8(&mut pc);
        let Ok(op) = Op::try_from(byte) else {
            let _ = writeln!(out, "{at:6}  ?? {byte:#04x}  {}", m.code.context(at));
            break;
        };
        let _ = write!(out, "{at:6}  {}", op.name());
        match operands(op) {
            Operands::None => {}
            Operands::Byte => {
                let v = m.code.fetch8(&mut pc);
                let _ = write!(out, " {v}");
            }
            Operands::Varuint => {
                let v = m.code.fetch_varuint(&mut pc);
                let _ = write!(out, " {v}");
            }
            Operands::Varuint2 => {
                let a = m.code.fetch_varuint(&mut pc);
                let b = m.code.fetch_varuint(&mut pc);
                let _ = write!(out, " {a} {b}");
            }
            Operands::Varuint4 => {
                let a = m.code.fetch_varuint(&mut pc);
                let b = m.code.fetch_varuint(&mut pc);
                let c = m.code.fetch_varuint(&mut pc);
                let d = m.code.fetch_varuint(&mut pc);
                let _ = write!(out, " +{a} len {b} sig {c} doc {d}");
            }
            Operands::Ref => {
                let v = m.code.fetch_ref(&mut pc);
                let _ = write!(out, " {v}");
            }
            Operands::RefVaruint => {
                let a = m.code.fetch_ref(&mut pc);
                let b = m.code.fetch_varuint(&mut pc);
                let _ = write!(out, " {a} {b}");
            }
        }
        out.push('\n');
    }
    out
}

impl Machine {
    /// Write the `vm-dasm`, `vm-constants` and `vm-values` artifacts
    /// into `dir`.
    pub fn dump_exit_artifacts(&self, dir: &Path) -> io::Result<()> {
        fs::write(dir.join("vm-dasm"), disassemble(self, 0, 0))?;

        let mut cs = String::new();
        let _ = writeln!(cs, "constants: {}", self.constants.len());
        for (i, &c) in self.constants.iter().enumerate() {
            let _ = writeln!(cs, "{i:6}: {}", printer::write_string(&self.heap, c));
        }
        fs::write(dir.join("vm-constants"), cs)?;

        let mut vs = String::new();
        let _ = writeln!(vs, "values: {}", self.values.len());
        for (i, &v) in self.values.iter().enumerate() {
            let _ = writeln!(vs, "{i:6}: {}", printer::write_string(&self.heap, v));
        }
        fs::write(dir.join("vm-values"), vs)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disassemble_prologue() {
        let m = Machine::new();
        let text = disassemble(&m, 0, m.prologue.len);
        assert!(text.contains("FINISH"));
        assert!(text.contains("NON-CONT-ERR"));
        assert!(text.contains("RESTORE-TRAP"));
        assert!(text.contains("RESTORE-ALL-STATE"));
    }

    #[test]
    fn test_disassemble_operands() {
        let mut m = Machine::new();
        let pc0 = m.code.len();
        m.code.push_op(Op::Fixnum);
        m.code.push_varuint(300);
        m.code.push_op(Op::GlobalSymRef);
        m.code.push_ref(7);
        let text = disassemble(&m, pc0, m.code.len());
        assert!(text.contains("FIXNUM 300"), "got: {text}");
        assert!(text.contains("GLOBAL-SYM-REF 7"), "got: {text}");
    }
}
