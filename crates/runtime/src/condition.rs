//! The condition system
//!
//! Condition types are struct types with a parent chain rooted at
//! `^condition`; raising builds a struct instance and walks the trap
//! chain from `trap_sp` for a handler whose registered type the
//! condition `isa?`.
//!
//! The matched handler runs under its parent's protection (the chain top
//! moves past it for the duration) and, for closures, returns through
//! one of the prologue trampolines: the condition-handler return for a
//! continuable raise, NON-CONT-ERR for a non-continuable one, the
//! interrupt-handler return for signal dispatch.

use skiff_core::heap::Object;
use skiff_core::{module, printer, strings, struct_types, Word};

use crate::primitives::PrimDef;
use crate::unwind::{JumpCode, Unwind, VmResult};
use crate::vm::{Machine, REGULAR_CALL, TAIL_CALL};

/// The built-in condition types, plus the birth-trap handlers.
#[derive(Debug)]
pub struct ConditionSet {
    pub condition: Word,
    pub error: Word,

    pub rt_bignum_error: Word,
    pub rt_bignum_conversion_error: Word,
    pub rt_divide_by_zero_error: Word,

    pub rt_variable_unbound_error: Word,
    pub rt_dynamic_variable_unbound_error: Word,
    pub rt_environ_variable_unbound_error: Word,
    pub rt_computed_variable_error: Word,
    pub rt_computed_variable_no_accessor_error: Word,

    pub rt_function_error: Word,
    pub rt_function_arity_error: Word,

    pub rt_signal_condition: Word,

    pub io_error: Word,
    pub io_handle_error: Word,
    pub io_closed_handle_error: Word,
    pub io_filename_error: Word,
    pub io_malformed_filename_error: Word,
    pub io_file_protection_error: Word,
    pub io_file_already_exists_error: Word,
    pub io_no_such_file_error: Word,

    pub system_error: Word,

    /// fixnum: the gci of the `^condition` symbol, as stored in trap
    /// frames
    pub condition_type_mci: Word,

    pub reset_handler: Word,
    pub restart_handler: Word,
    pub default_handler: Word,
}

impl ConditionSet {
    pub fn empty() -> ConditionSet {
        ConditionSet {
            condition: Word::UNDEF,
            error: Word::UNDEF,
            rt_bignum_error: Word::UNDEF,
            rt_bignum_conversion_error: Word::UNDEF,
            rt_divide_by_zero_error: Word::UNDEF,
            rt_variable_unbound_error: Word::UNDEF,
            rt_dynamic_variable_unbound_error: Word::UNDEF,
            rt_environ_variable_unbound_error: Word::UNDEF,
            rt_computed_variable_error: Word::UNDEF,
            rt_computed_variable_no_accessor_error: Word::UNDEF,
            rt_function_error: Word::UNDEF,
            rt_function_arity_error: Word::UNDEF,
            rt_signal_condition: Word::UNDEF,
            io_error: Word::UNDEF,
            io_handle_error: Word::UNDEF,
            io_closed_handle_error: Word::UNDEF,
            io_filename_error: Word::UNDEF,
            io_malformed_filename_error: Word::UNDEF,
            io_file_protection_error: Word::UNDEF,
            io_file_already_exists_error: Word::UNDEF,
            io_no_such_file_error: Word::UNDEF,
            system_error: Word::UNDEF,
            condition_type_mci: Word::fixnum(0),
            reset_handler: Word::UNDEF,
            restart_handler: Word::UNDEF,
            default_handler: Word::UNDEF,
        }
    }

    pub fn roots(&self) -> Vec<Word> {
        vec![
            self.condition,
            self.error,
            self.rt_bignum_error,
            self.rt_bignum_conversion_error,
            self.rt_divide_by_zero_error,
            self.rt_variable_unbound_error,
            self.rt_dynamic_variable_unbound_error,
            self.rt_environ_variable_unbound_error,
            self.rt_computed_variable_error,
            self.rt_computed_variable_no_accessor_error,
            self.rt_function_error,
            self.rt_function_arity_error,
            self.rt_signal_condition,
            self.io_error,
            self.io_handle_error,
            self.io_closed_handle_error,
            self.io_filename_error,
            self.io_malformed_filename_error,
            self.io_file_protection_error,
            self.io_file_already_exists_error,
            self.io_no_such_file_error,
            self.system_error,
            self.reset_handler,
            self.restart_handler,
            self.default_handler,
        ]
    }
}

fn define_condition_type(m: &mut Machine, name: &str, parent: Word, fields: &[&str]) -> Word {
    let name_sym = m.intern(name);
    let mut field_syms: Vec<Word> = Vec::with_capacity(fields.len());
    if let Some(Object::StructType(p)) = m.heap.try_get(parent) {
        field_syms.extend_from_slice(&p.fields.clone());
    }
    for f in fields {
        let s = m.intern(f);
        field_syms.push(s);
    }
    let ty = struct_types::alloc_type(&mut m.heap, name_sym, parent, field_syms);
    let base = m.base_module;
    m.define_value(base, name_sym, ty, Word::TOPLEVEL);
    ty
}

pub fn install_conditions(m: &mut Machine) {
    let condition = define_condition_type(m, "^condition", Word::NIL, &[]);
    let error = define_condition_type(m, "^error", condition, &["message", "location", "detail"]);

    let rt_bignum_error = define_condition_type(m, "^rt-bignum-error", error, &["number"]);
    let rt_bignum_conversion_error =
        define_condition_type(m, "^rt-bignum-conversion-error", rt_bignum_error, &[]);
    let rt_divide_by_zero_error =
        define_condition_type(m, "^rt-divide-by-zero-error", rt_bignum_error, &[]);

    let rt_variable_unbound_error =
        define_condition_type(m, "^rt-variable-unbound-error", error, &["name"]);
    let rt_dynamic_variable_unbound_error = define_condition_type(
        m,
        "^rt-dynamic-variable-unbound-error",
        rt_variable_unbound_error,
        &[],
    );
    let rt_environ_variable_unbound_error = define_condition_type(
        m,
        "^rt-environ-variable-unbound-error",
        rt_variable_unbound_error,
        &[],
    );
    let rt_computed_variable_error =
        define_condition_type(m, "^rt-computed-variable-error", error, &["name"]);
    let rt_computed_variable_no_accessor_error = define_condition_type(
        m,
        "^rt-computed-variable-no-accessor-error",
        rt_computed_variable_error,
        &[],
    );

    let rt_function_error = define_condition_type(m, "^rt-function-error", error, &[]);
    let rt_function_arity_error =
        define_condition_type(m, "^rt-function-arity-error", rt_function_error, &[]);

    let rt_signal_condition =
        define_condition_type(m, "^rt-signal-condition", condition, &["signum"]);

    let io_error = define_condition_type(m, "^i/o-error", error, &[]);
    let io_handle_error = define_condition_type(m, "^i/o-handle-error", io_error, &["handle"]);
    let io_closed_handle_error =
        define_condition_type(m, "^i/o-closed-handle-error", io_handle_error, &[]);
    let io_filename_error =
        define_condition_type(m, "^i/o-filename-error", io_error, &["filename"]);
    let io_malformed_filename_error =
        define_condition_type(m, "^i/o-malformed-filename-error", io_filename_error, &[]);
    let io_file_protection_error =
        define_condition_type(m, "^i/o-file-protection-error", io_filename_error, &[]);
    let io_file_already_exists_error =
        define_condition_type(m, "^i/o-file-already-exists-error", io_filename_error, &[]);
    let io_no_such_file_error =
        define_condition_type(m, "^i/o-no-such-file-error", io_filename_error, &[]);

    let system_error = define_condition_type(m, "^system-error", error, &["errno"]);

    let condition_sym = m.intern("^condition");
    let gci = m.constants_lookup_or_extend(condition_sym);
    let condition_type_mci = Word::fixnum(gci as i64);

    let reset_handler = m.add_primitive(PrimDef {
        name: "reset-condition-handler",
        arity: 1,
        varargs: false,
        f: prim_reset_condition_handler,
    });
    let restart_handler = m.add_primitive(PrimDef {
        name: "restart-condition-handler",
        arity: 1,
        varargs: false,
        f: prim_restart_condition_handler,
    });
    let default_handler = m.add_primitive(PrimDef {
        name: "default-condition-handler",
        arity: 1,
        varargs: false,
        f: prim_default_condition_handler,
    });

    m.conditions = ConditionSet {
        condition,
        error,
        rt_bignum_error,
        rt_bignum_conversion_error,
        rt_divide_by_zero_error,
        rt_variable_unbound_error,
        rt_dynamic_variable_unbound_error,
        rt_environ_variable_unbound_error,
        rt_computed_variable_error,
        rt_computed_variable_no_accessor_error,
        rt_function_error,
        rt_function_arity_error,
        rt_signal_condition,
        io_error,
        io_handle_error,
        io_closed_handle_error,
        io_filename_error,
        io_malformed_filename_error,
        io_file_protection_error,
        io_file_already_exists_error,
        io_no_such_file_error,
        system_error,
        condition_type_mci,
        reset_handler,
        restart_handler,
        default_handler,
    };
}

// ---------------------------------------------------------------------
// the birth-trap handlers

fn describe_condition(m: &mut Machine, c: Word) -> String {
    let loc = m.source_location();
    format!("{} at {}", printer::display_string(&m.heap, c), loc)
}

fn prim_default_condition_handler(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let msg = describe_condition(m, args[0]);
    let eh = m.thread.error_handle;
    crate::handle::puts_best_effort(m, eh, &format!("default-condition-handler: {msg}\n"));
    if m.krun.is_empty() {
        tracing::error!("default-condition-handler: no krun to abort to");
        return Err(Unwind::Exit(1));
    }
    Err(m.apply_krun(0, Word::UNSPEC))
}

fn prim_restart_condition_handler(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let msg = describe_condition(m, args[0]);
    let eh = m.thread.error_handle;
    crate::handle::puts_best_effort(m, eh, &format!("restart-condition-handler: {msg}\n"));
    if m.krun.is_empty() {
        return Err(Unwind::Exit(1));
    }
    Err(m.apply_krun(0, Word::UNSPEC))
}

fn prim_reset_condition_handler(m: &mut Machine, args: &[Word], _rest: Word) -> VmResult<Word> {
    let msg = describe_condition(m, args[0]);
    let eh = m.thread.error_handle;
    crate::handle::puts_best_effort(m, eh, &format!("reset-condition-handler: {msg}\n"));
    Err(Unwind::Exit(1))
}

// ---------------------------------------------------------------------
// raising

impl Machine {
    /// Build a condition instance: `message`/`location`/`detail` plus any
    /// type-specific fields.
    pub fn make_condition(&mut self, ty: Word, msg: &str, detail: &str, extra: &[Word]) -> Word {
        let msg_w = strings::alloc(&mut self.heap, msg);
        let loc = self.source_location();
        let loc_w = strings::alloc(&mut self.heap, loc);
        let detail_w = if detail.is_empty() {
            Word::NIL
        } else {
            strings::alloc(&mut self.heap, detail)
        };
        let mut fields = vec![msg_w, loc_w, detail_w];
        fields.extend_from_slice(extra);
        struct_types::alloc_instance(&mut self.heap, ty, fields)
    }

    /// Walk the trap chain and set the matched handler running.
    ///
    /// Always produces the [`Unwind`] that takes the host stack back to
    /// the innermost run loop; callers `return Err(..)` it.
    pub fn raise_condition(
        &mut self,
        continuable: bool,
        condition: Word,
        ihr: bool,
        code: JumpCode,
    ) -> Unwind {
        let mut trap_sp = self.thread.trap_sp;
        let ss = self.thread.stack.len() as i64;
        if trap_sp >= ss {
            panic!("raise: trap SP {trap_sp} >= stack size {ss}");
        }
        if trap_sp < 2 {
            panic!("raise: trap SP {trap_sp} < 2");
        }

        let handler;
        loop {
            let h = self.thread.stack[trap_sp as usize];
            let ct_mci = self.thread.stack[trap_sp as usize - 1]
                .as_fixnum()
                .expect("trap frame: condition type mci not a fixnum");
            let next = self.thread.stack[trap_sp as usize - 2]
                .as_fixnum()
                .expect("trap frame: next SP not a fixnum");

            let env = self.current_env();
            let gci = module::get_or_set_vci(&mut self.heap, env, ct_mci as u64);
            let ct_sym = self.constants_ref(gci as usize);
            let trap_ct = self
                .symbol_value_recurse(env, ct_sym)
                .unwrap_or_else(|| panic!("raise: trap condition type is undef"));

            if struct_types::instance_isa(&self.heap, condition, trap_ct) {
                handler = h;
                break;
            }
            if next == trap_sp {
                panic!(
                    "raise: no more trap handlers for {}",
                    printer::display_string(&self.heap, condition)
                );
            }
            trap_sp = next;
        }

        let isa_closure = matches!(self.heap.try_get(handler), Some(Object::Closure(_)));

        if ihr || isa_closure {
            self.thread.push(Word::fixnum(self.thread.pc as i64));
            self.thread.push(Word::MARK_RETURN);
        }

        let tailp = if ihr { REGULAR_CALL } else { TAIL_CALL };
        if ihr {
            self.thread.preserve_all_state();
            self.thread.pc = self.prologue.ihr_pc;
        }
        if isa_closure && !ihr {
            self.thread.preserve_state();
            // for RESTORE-TRAP on the way back out
            self.thread.push(Word::fixnum(self.thread.trap_sp));
        }

        let fw = skiff_core::frame::alloc(&mut self.heap, 2);
        skiff_core::frame::set(&mut self.heap, fw, 0, condition);
        self.thread.val = fw;

        // run the handler under its parent's protection
        let next = self.thread.stack[trap_sp as usize - 2]
            .as_fixnum()
            .expect("trap frame: next SP not a fixnum");
        self.thread.trap_sp = next;

        if isa_closure && !ihr {
            let ret = if continuable {
                self.prologue.chr_pc
            } else {
                self.prologue.nce_pc
            };
            self.thread.push(Word::fixnum(ret as i64));
            self.thread.push(Word::MARK_RETURN);
        }

        if let Err(u) = self.invoke(handler, tailp) {
            return u;
        }

        Unwind::Jump {
            level: self.run_depth.saturating_sub(1),
            code,
        }
    }

    pub fn raise_error(&mut self, condition: Word) -> Unwind {
        self.raise_condition(true, condition, false, JumpCode::Condition)
    }

    // -- the raisers the VM and primitives use

    pub fn error_unbound(&mut self, sym: Word, msg: &str) -> Unwind {
        let ty = self.conditions.rt_variable_unbound_error;
        let text = format!(
            "no such binding: {}",
            printer::display_string(&self.heap, sym)
        );
        let c = self.make_condition(ty, &text, msg, &[sym]);
        self.raise_error(c)
    }

    pub fn error_dynamic_unbound(&mut self, mci: u64, gvi: usize) -> Unwind {
        let ty = self.conditions.rt_dynamic_variable_unbound_error;
        let sym = self.sym_for_mci(mci);
        let text = format!("no such dynamic binding: mci {mci} -> gvi {gvi}");
        let c = self.make_condition(ty, &text, "", &[sym]);
        self.raise_error(c)
    }

    pub fn error_environ_unbound(&mut self, mci: u64, gvi: usize) -> Unwind {
        let ty = self.conditions.rt_environ_variable_unbound_error;
        let sym = self.sym_for_mci(mci);
        let text = format!("no such environ binding: mci {mci} -> gvi {gvi}");
        let c = self.make_condition(ty, &text, "", &[sym]);
        self.raise_error(c)
    }

    pub fn error_computed(&mut self, msg: &str, mci: u64, gvi: usize) -> Unwind {
        let ty = self.conditions.rt_computed_variable_error;
        let sym = self.sym_for_mci(mci);
        let text = format!("{msg}: mci {mci} -> gvi {gvi}");
        let c = self.make_condition(ty, &text, "", &[sym]);
        self.raise_error(c)
    }

    pub fn error_computed_no_accessor(&mut self, which: &str, mci: u64, gvi: usize) -> Unwind {
        let ty = self.conditions.rt_computed_variable_no_accessor_error;
        let sym = self.sym_for_mci(mci);
        let text = format!("no {which} accessor: mci {mci} -> gvi {gvi}");
        let c = self.make_condition(ty, &text, "", &[sym]);
        self.raise_error(c)
    }

    pub fn error_function_invoke(&mut self, msg: &str, func: Word) -> Unwind {
        let ty = self.conditions.rt_function_error;
        let text = format!("{msg}: '{}'", printer::display_string(&self.heap, func));
        let c = self.make_condition(ty, &text, "", &[]);
        self.raise_error(c)
    }

    pub fn error_arity(
        &mut self,
        op: crate::opcodes::Op,
        given: usize,
        arity: usize,
        varargs: bool,
    ) -> Unwind {
        let ty = self.conditions.rt_function_arity_error;
        let sigil = if varargs { "+" } else { "" };
        // frame counts carry the trailing varargs slot
        let text = format!(
            "incorrect arity: {} args for an arity-{}{sigil} function",
            given.saturating_sub(1),
            arity.saturating_sub(1),
        );
        let c = self.make_condition(ty, &text, op.name(), &[]);
        self.raise_error(c)
    }

    pub fn error_arity_prim(
        &mut self,
        name: &str,
        given: usize,
        arity: usize,
        varargs: bool,
    ) -> Unwind {
        let ty = self.conditions.rt_function_arity_error;
        let sigil = if varargs { "+" } else { "" };
        let text =
            format!("incorrect arity: {given} args for an arity-{arity}{sigil} primitive {name}");
        let c = self.make_condition(ty, &text, "", &[]);
        self.raise_error(c)
    }

    pub fn error_param_type(&mut self, expected: &str, got: Word) -> Unwind {
        let ty = self.conditions.error;
        let text = format!(
            "bad parameter type: expected {expected}, got {}",
            printer::write_string(&self.heap, got)
        );
        let c = self.make_condition(ty, &text, "", &[]);
        self.raise_error(c)
    }

    pub fn error_divide_by_zero(&mut self, detail: &str, nums: Word) -> Unwind {
        let ty = self.conditions.rt_divide_by_zero_error;
        let c = self.make_condition(ty, "divide by zero", detail, &[nums]);
        self.raise_error(c)
    }

    /// Map a bignum failure onto its condition type.
    pub fn error_bignum(&mut self, e: skiff_core::bignum::BignumError, number: Word) -> Unwind {
        use skiff_core::bignum::BignumError;
        match e {
            BignumError::DivideByZero => self.error_divide_by_zero("bignum divide by zero", number),
            BignumError::ExponentOverflow => {
                let ty = self.conditions.rt_bignum_conversion_error;
                let c = self.make_condition(ty, "exponent overflow", "", &[number]);
                self.raise_error(c)
            }
            BignumError::ExponentUnderflow => {
                let ty = self.conditions.rt_bignum_conversion_error;
                let c = self.make_condition(ty, "exponent underflow", "", &[number]);
                self.raise_error(c)
            }
            BignumError::Parse(s) => {
                let ty = self.conditions.rt_bignum_error;
                let c = self.make_condition(ty, &format!("bad number: {s}"), "", &[number]);
                self.raise_error(c)
            }
        }
    }

    /// A non-continuable raise whose handler returned: unrecoverable.
    pub fn error_non_continuable(&mut self, msg: &str) -> Unwind {
        let ty = self.conditions.error;
        let c = self.make_condition(ty, msg, "", &[]);
        self.raise_condition(false, c, false, JumpCode::Condition)
    }
}
