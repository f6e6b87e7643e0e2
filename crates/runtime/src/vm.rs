//! The virtual machine
//!
//! [`Machine`] bundles the heap, the global tables (constants, values,
//! modules, primitives, krun), the bytecode stream and the one thread of
//! execution.  [`Machine::run`] drives the dispatch loop: fetch one byte,
//! decode, mutate thread state, check for pending signals, repeat until
//! FINISH.
//!
//! Nested runs happen (a primitive invoking a closure re-enters the
//! loop) and form a LIFO nest; non-local transfers unwind host frames
//! with [`Unwind`] values targeted at a nesting level (see `unwind`).

use std::collections::HashMap;

use skiff_core::heap::{Closure, Object};
use skiff_core::word::Decoded;
use skiff_core::{
    BindingRecord, Heap, SymbolTable, Word, frame, module, pair, printer, strings,
};

use crate::bytecode::{CodeBuffer, Prologue};
use crate::condition::ConditionSet;
use crate::opcodes::Op;
use crate::primitives::PrimDef;
use crate::thread::Thread;
use crate::unwind::{Unwind, VmResult};

pub const REGULAR_CALL: bool = false;
pub const TAIL_CALL: bool = true;

/// Collect the heap once this many allocations have accumulated.
const GC_ALLOC_THRESHOLD: usize = 16 * 1024;
/// Check the collector every this-many instructions.
const GC_CHECK_MASK: u64 = 0xff;

pub struct Machine {
    pub heap: Heap,
    pub symbols: SymbolTable,
    pub code: CodeBuffer,
    pub prologue: Prologue,

    /// gci → constant value; pure append-only
    pub constants: Vec<Word>,
    /// gvi → value; slot 0 is the reserved sentinel
    pub values: Vec<Word>,
    /// top-level run continuations: (continuation, description)
    pub krun: Vec<(Word, String)>,

    /// module name symbol → module
    pub modules: HashMap<Word, Word>,
    pub base_module: Word,
    pub primitives_module: Word,

    pub thread: Thread,
    pub prim_table: Vec<PrimDef>,
    pub conditions: ConditionSet,

    /// reader-time registrations (the expander machinery itself is a
    /// separate component; the VM only records them)
    pub expanders: HashMap<Word, Word>,
    pub operators: HashMap<Word, (Word, u64, bool)>,

    /// signum → condition to raise / handler name symbol
    pub signal_conditions: Vec<Word>,
    pub signal_handler_names: Vec<Word>,

    pub run_depth: usize,
    run_loops: u64,
    /// function-call trace depth; 0 disables tracing output
    pub tracing: i64,
    started: std::time::Instant,
}

impl Machine {
    pub fn new() -> Machine {
        let mut heap = Heap::new();
        let mut symbols = SymbolTable::new();
        let mut code = CodeBuffer::new();
        let prologue = code.write_prologue();

        let base_name = symbols.intern(&mut heap, "Skiff");
        let base_module = module::alloc(&mut heap, base_name);
        let prim_name = symbols.intern(&mut heap, "*primitives*");
        let primitives_module = module::alloc(&mut heap, prim_name);
        module::add_import(&mut heap, base_module, primitives_module);

        let mut modules = HashMap::new();
        modules.insert(base_name, base_module);
        modules.insert(prim_name, primitives_module);

        let mut thread = Thread::new();
        thread.env = base_module;
        thread.module = base_module;
        thread.pc = prologue.len;

        let mut m = Machine {
            heap,
            symbols,
            code,
            prologue,
            constants: Vec::new(),
            values: vec![Word::UNDEF],
            krun: Vec::new(),
            modules,
            base_module,
            primitives_module,
            thread,
            prim_table: Vec::new(),
            conditions: ConditionSet::empty(),
            expanders: HashMap::new(),
            operators: HashMap::new(),
            signal_conditions: vec![Word::NIL; crate::signal::MAX_SIGNAL],
            signal_handler_names: vec![Word::NIL; crate::signal::MAX_SIGNAL],
            run_depth: 0,
            run_loops: 0,
            tracing: 0,
            started: std::time::Instant::now(),
        };

        crate::handle::install_std_handles(&mut m);
        crate::condition::install_conditions(&mut m);
        crate::primitives::install_primitives(&mut m);
        m.thread_init();
        m
    }

    /// Elapsed wall-clock seconds since VM start (the SECONDS variable).
    pub fn elapsed_seconds(&self) -> i64 {
        self.started.elapsed().as_secs() as i64
    }

    // -----------------------------------------------------------------
    // global tables

    pub fn constants_ref(&self, gci: usize) -> Word {
        *self
            .constants
            .get(gci)
            .unwrap_or_else(|| panic!("constants: no gci {gci}"))
    }

    pub fn extend_constants(&mut self, v: Word) -> usize {
        self.constants.push(v);
        self.constants.len() - 1
    }

    pub fn constants_lookup_or_extend(&mut self, v: Word) -> usize {
        if let Some(gci) = self.constants.iter().position(|&c| {
            c == v || skiff_core::equal::equal(&self.heap, c, v)
        }) {
            return gci;
        }
        self.extend_constants(v)
    }

    pub fn values_ref(&self, gvi: usize) -> Word {
        if gvi == 0 {
            tracing::warn!("values-ref: gvi == 0");
            return Word::UNSPEC;
        }
        *self
            .values
            .get(gvi)
            .unwrap_or_else(|| panic!("values: no gvi {gvi}"))
    }

    pub fn values_set(&mut self, gvi: usize, v: Word) {
        if gvi >= self.values.len() {
            self.values.resize(gvi + 1, Word::UNDEF);
        }
        self.values[gvi] = v;
    }

    pub fn extend_values(&mut self) -> usize {
        self.values.push(Word::UNDEF);
        self.values.len() - 1
    }

    /// The module in effect for symbol resolution.
    pub fn current_env(&self) -> Word {
        if module::is_module(&self.heap, self.thread.env) {
            self.thread.env
        } else {
            self.base_module
        }
    }

    pub fn intern(&mut self, text: &str) -> Word {
        self.symbols.intern(&mut self.heap, text)
    }

    pub fn find_or_create_module(&mut self, name: Word) -> Word {
        if let Some(&m) = self.modules.get(&name) {
            return m;
        }
        let m = module::alloc(&mut self.heap, name);
        // import search is one level deep: every module sees the base
        // module and the primitives directly
        module::add_import(&mut self.heap, m, self.base_module);
        module::add_import(&mut self.heap, m, self.primitives_module);
        self.modules.insert(name, m);
        m
    }

    /// Bind `sym` in `mw` to a fresh value slot holding `value`.
    pub fn define_value(&mut self, mw: Word, sym: Word, value: Word, scope: Word) -> usize {
        let gvi = self.extend_values();
        self.values[gvi] = value;
        let mci = self.constants_lookup_or_extend(sym) as u64;
        module::set_symbol(
            &mut self.heap,
            mw,
            sym,
            BindingRecord {
                scope,
                mci,
                gvi,
                module: mw,
                desc: "define-value".to_string(),
            },
        );
        gvi
    }

    /// Look a symbol's value up through a module and its imports.
    pub fn symbol_value_recurse(&self, mw: Word, sym: Word) -> Option<Word> {
        let rec = module::find_symbol_recurse(&self.heap, mw, sym, true)?;
        (rec.gvi != 0).then(|| self.values_ref(rec.gvi))
    }

    // -----------------------------------------------------------------
    // instruction fetch

    fn fetch8(&mut self) -> u8 {
        self.code.fetch8(&mut self.thread.pc)
    }

    fn fetch_varuint(&mut self) -> u64 {
        self.code.fetch_varuint(&mut self.thread.pc)
    }

    fn fetch_ref(&mut self) -> u64 {
        self.code.fetch_ref(&mut self.thread.pc)
    }

    /// mci → the symbol at its global constant index.
    pub fn sym_for_mci(&mut self, mci: u64) -> Word {
        let env = self.current_env();
        let gci = module::get_or_set_vci(&mut self.heap, env, mci);
        let sym = self.constants_ref(gci as usize);
        if !self.heap.is_symbol(sym) {
            panic!(
                "mci {mci} -> gci {gci} is not a symbol: {}",
                printer::write_string(&self.heap, sym)
            );
        }
        sym
    }

    // -----------------------------------------------------------------
    // lazy value resolution

    /// Module-local constant index → global value index, memoized in the
    /// module's `vvi` map.
    ///
    /// On first touch: map mci → gci, look the symbol up in the current
    /// environment then its imports; an unbound symbol is forged to have
    /// itself as value (shell command dispatch relies on unknown symbols
    /// naming external programs).
    pub fn get_or_create_vvi(&mut self, mci: u64) -> usize {
        let ce = self.current_env();

        if let Some(gvi) = module::with(&self.heap, ce).get_vvi(mci)
            && gvi != 0
        {
            return gvi;
        }

        let gci = module::get_or_set_vci(&mut self.heap, ce, mci);
        let sym = self.constants_ref(gci as usize);

        if let Some(rec) = module::find_symbol(&self.heap, ce, sym) {
            let gvi = rec.gvi;
            if gvi != 0 {
                module::with_mut(&mut self.heap, ce).set_vvi(mci, gvi);
                return gvi;
            }
            // fall through: a binding with no slot yet behaves as unbound
        }

        if let Some(rec) = module::find_symbol_recurse(&self.heap, ce, sym, false) {
            let gvi = rec.gvi;
            if gvi != 0 {
                // copy the imported binding and memoize
                module::set_symbol(&mut self.heap, ce, sym, rec);
                module::with_mut(&mut self.heap, ce).set_vvi(mci, gvi);
                return gvi;
            }
        }

        // not found anywhere: forge this symbol to have itself as value
        let gvi = self.extend_values();
        self.values[gvi] = sym;
        module::set_symbol(
            &mut self.heap,
            ce,
            sym,
            BindingRecord {
                scope: Word::TOPLEVEL,
                mci,
                gvi,
                module: ce,
                desc: "get-or-create-vvi".to_string(),
            },
        );
        module::with_mut(&mut self.heap, ce).set_vvi(mci, gvi);
        tracing::debug!(
            sym = %printer::display_string(&self.heap, sym),
            gvi,
            "forged self-valued binding"
        );
        gvi
    }

    fn global_sym_ref(&mut self, mci: u64, checked: bool) -> VmResult<Word> {
        let sym = self.sym_for_mci(mci);
        let gvi = self.get_or_create_vvi(mci);
        if gvi == 0 {
            if checked {
                panic!("CHECKED-GLOBAL-SYM-REF: gvi==0 for mci {mci}");
            }
            return Ok(sym);
        }
        let val = self.values_ref(gvi);
        if val == Word::UNDEF {
            // the symbol names nothing yet: evaluate to itself
            Ok(sym)
        } else if val == Word::UNSPEC {
            Err(self.error_unbound(sym, "unspecified toplevel"))
        } else {
            Ok(val)
        }
    }

    // -----------------------------------------------------------------
    // dynamic / environ chains

    fn push_dynamic(&mut self, gvi: usize, val: Word) {
        let thr = &mut self.thread;
        thr.push(Word::fixnum(thr.dynamic_sp));
        thr.push(val);
        thr.dynamic_sp = thr.stack.len() as i64;
        thr.push(Word::fixnum(gvi as i64));
        thr.push(Word::MARK_DYNAMIC);
    }

    fn pop_dynamic(&mut self) {
        let thr = &mut self.thread;
        thr.pop_marker(Word::MARK_DYNAMIC, "pop-dynamic");
        thr.pop(); // gvi
        thr.pop(); // value
        thr.dynamic_sp = thr.pop_fixnum("pop-dynamic");
    }

    /// Walk the dynamic chain for `gvi`; fall back to the global value.
    pub fn dynamic_ref(&mut self, mci: u64, gvi: usize, default: Option<Word>) -> VmResult<Word> {
        let mut sp = self.thread.dynamic_sp;
        let v = loop {
            if sp >= 0 {
                let sv = self.thread.stack[sp as usize]
                    .as_fixnum()
                    .expect("dynamic chain: gvi slot not a fixnum");
                if sv as usize == gvi {
                    break self.thread.stack[sp as usize - 1];
                }
                sp = self.thread.stack[sp as usize - 2]
                    .as_fixnum()
                    .expect("dynamic chain: next slot not a fixnum");
            } else {
                break self.values_ref(gvi);
            }
        };
        if v == Word::UNDEF {
            match default {
                Some(d) => Ok(d),
                None => Err(self.error_dynamic_unbound(mci, gvi)),
            }
        } else {
            Ok(v)
        }
    }

    pub fn dynamic_set(&mut self, gvi: usize, v: Word) {
        let mut sp = self.thread.dynamic_sp;
        loop {
            if sp >= 0 {
                let sv = self.thread.stack[sp as usize]
                    .as_fixnum()
                    .expect("dynamic chain: gvi slot not a fixnum");
                if sv as usize == gvi {
                    self.thread.stack[sp as usize - 1] = v;
                    return;
                }
                sp = self.thread.stack[sp as usize - 2]
                    .as_fixnum()
                    .expect("dynamic chain: next slot not a fixnum");
            } else {
                self.values_set(gvi, v);
                return;
            }
        }
    }

    fn push_environ(&mut self, gvi: usize, val: Word) {
        let thr = &mut self.thread;
        thr.push(Word::fixnum(thr.environ_sp));
        thr.push(val);
        thr.environ_sp = thr.stack.len() as i64;
        thr.push(Word::fixnum(gvi as i64));
        thr.push(Word::MARK_ENVIRON);
    }

    fn pop_environ(&mut self) {
        let thr = &mut self.thread;
        thr.pop_marker(Word::MARK_ENVIRON, "pop-environ");
        thr.pop();
        thr.pop();
        thr.environ_sp = thr.pop_fixnum("pop-environ");
    }

    /// Environ variables behave like dynamics but default to `unset`.
    pub fn environ_ref(&mut self, mci: u64, gvi: usize) -> VmResult<Word> {
        let mut sp = self.thread.environ_sp;
        let v = loop {
            if sp >= 0 {
                let sv = self.thread.stack[sp as usize]
                    .as_fixnum()
                    .expect("environ chain: gvi slot not a fixnum");
                if sv as usize == gvi {
                    break self.thread.stack[sp as usize - 1];
                }
                sp = self.thread.stack[sp as usize - 2]
                    .as_fixnum()
                    .expect("environ chain: next slot not a fixnum");
            } else {
                break self.values_ref(gvi);
            }
        };
        if v == Word::UNDEF {
            let _ = mci;
            Ok(Word::UNSET)
        } else {
            Ok(v)
        }
    }

    // -----------------------------------------------------------------
    // computed variables

    pub fn computed_ref(&mut self, mci: u64, gvi: usize) -> VmResult<Word> {
        let gns = self.values_ref(gvi);
        match self.heap.try_get(gns) {
            Some(Object::Pair { head, .. }) => {
                let get = *head;
                if self.is_procedure(get) {
                    self.call(get, &[])
                } else {
                    Err(self.error_computed_no_accessor("get", mci, gvi))
                }
            }
            _ => Err(self.error_computed("no get/set accessors", mci, gvi)),
        }
    }

    pub fn computed_set(&mut self, mci: u64, gvi: usize, v: Word) -> VmResult<Word> {
        let gns = self.values_ref(gvi);
        match self.heap.try_get(gns) {
            Some(Object::Pair { tail, .. }) => {
                let set = *tail;
                if self.is_procedure(set) {
                    self.call(set, &[v])
                } else {
                    Err(self.error_computed_no_accessor("set", mci, gvi))
                }
            }
            _ => Err(self.error_computed("no accessors", mci, gvi)),
        }
    }

    pub fn computed_define(&mut self, gvi: usize, v: Word) {
        // the accessor pair goes into the same slot a regular define
        // would use; nothing validates the getter here — a ref through a
        // pair with no get accessor raises at ref time
        self.values_set(gvi, v);
    }

    pub fn is_procedure(&self, w: Word) -> bool {
        matches!(
            self.heap.try_get(w),
            Some(Object::Closure(_) | Object::Primitive(_))
        )
    }

    // -----------------------------------------------------------------
    // traps

    pub fn push_trap(&mut self, handler: Word, type_mci: Word) {
        if !self.is_procedure(handler) {
            panic!(
                "push-trap: handler is not a procedure: {}",
                printer::write_string(&self.heap, handler)
            );
        }
        let thr = &mut self.thread;
        thr.push(Word::fixnum(thr.trap_sp));
        thr.push(type_mci);
        thr.trap_sp = thr.stack.len() as i64;
        thr.push(handler);
        thr.push(Word::MARK_PUSH_TRAP);
    }

    pub fn pop_trap(&mut self) {
        let thr = &mut self.thread;
        thr.pop_marker(Word::MARK_PUSH_TRAP, "pop-trap");
        thr.pop(); // handler
        thr.pop(); // type mci
        thr.trap_sp = thr.pop_fixnum("pop-trap");
    }

    fn restore_trap(&mut self) {
        let tsp = self.thread.pop_fixnum("restore-trap");
        self.thread.trap_sp = tsp;
    }

    /// Install the birth traps: a fallback reset handler plus the restart
    /// and default `^condition` handlers.
    fn thread_init(&mut self) {
        let sp = self.thread.stack.len() as i64;
        let tsp = self.thread.trap_sp;
        assert!(tsp <= sp);

        let type_mci = self.conditions.condition_type_mci;
        if tsp == 0 {
            // the base of the chain points at itself
            let reset = self.conditions.reset_handler;
            let thr = &mut self.thread;
            thr.push(Word::fixnum(sp + 2));
            thr.push(type_mci);
            thr.push(reset);
            thr.push(Word::MARK_PUSH_TRAP);
            thr.trap_sp = sp + 2;
        }

        let restart = self.conditions.restart_handler;
        self.push_trap(restart, type_mci);
        let default = self.conditions.default_handler;
        self.push_trap(default, type_mci);
    }

    // -----------------------------------------------------------------
    // invocation

    /// Call `func` with the arguments in `val` (a frame).  Tail calls
    /// reuse the current return point; regular calls push one.
    pub fn invoke(&mut self, func: Word, tailp: bool) -> VmResult<()> {
        if !func.is_ref() {
            return Err(self.error_function_invoke("cannot invoke constant type", func));
        }

        enum Kind {
            Closure(Closure),
            Primitive,
            Continuation,
            Symbol,
            Other,
        }
        let kind = match self.heap.get(func) {
            Object::Closure(c) => Kind::Closure(c.clone()),
            Object::Primitive(_) => Kind::Primitive,
            Object::Continuation(_) => Kind::Continuation,
            Object::Symbol(_) => Kind::Symbol,
            _ => Kind::Other,
        };

        match kind {
            Kind::Closure(c) => {
                if !tailp {
                    self.thread.push(Word::fixnum(self.thread.pc as i64));
                    self.thread.push(Word::MARK_RETURN);
                }
                self.thread.frame = c.frame;
                self.thread.env = c.env;
                self.thread.pc = c.code_pc;
                if let Object::Closure(c) = self.heap.get_mut(func) {
                    c.called += 1;
                }
                if self.tracing > 0 && !tailp {
                    self.tracing += 1;
                }
                Ok(())
            }
            Kind::Primitive => self.invoke_primitive(func, tailp),
            Kind::Continuation => {
                let val = self.thread.val;
                let n = frame::nargs(&self.heap, val);
                let last = frame::get(&self.heap, val, n - 1);
                if last != Word::NIL {
                    return Err(self.error_function_invoke("continuation: varargs?", func));
                }
                if n - 1 != 1 {
                    return Err(self.error_function_invoke("unary continuation", func));
                }
                let arg = frame::get(&self.heap, val, 0);
                Err(self.restore_continuation(func, arg))
            }
            Kind::Symbol => {
                // in the full shell this is external command dispatch; the
                // execution core stops at the boundary
                Err(self.error_function_invoke("external command not found", func))
            }
            Kind::Other => Err(self.error_function_invoke("cannot invoke", func)),
        }
    }

    fn invoke_primitive(&mut self, func: Word, tailp: bool) -> VmResult<()> {
        let pc0 = self.thread.pc;
        let frame_w = self.thread.val;

        let n = frame::nargs(&self.heap, frame_w);
        let last = frame::get(&self.heap, frame_w, n - 1);
        if last != Word::NIL {
            return Err(self.error_function_invoke("primitive: varargs?", func));
        }

        let (prim_id, arity, varargs, name) = match self.heap.get(func) {
            Object::Primitive(p) => (p.prim, p.arity as usize, p.varargs, p.name.to_string()),
            _ => unreachable!(),
        };
        if let Object::Primitive(p) = self.heap.get_mut(func) {
            p.called += 1;
        }

        let all: Vec<Word> = (0..n - 1).map(|i| frame::get(&self.heap, frame_w, i)).collect();
        if all.len() < arity || (!varargs && all.len() > arity) {
            return Err(self.error_arity_prim(&name, all.len(), arity, varargs));
        }
        let rest = pair::list(&mut self.heap, &all[arity..]);
        let args: Vec<Word> = all[..arity].to_vec();

        let f = self.prim_table[prim_id.0 as usize].f;
        let r = f(self, &args, rest)?;
        self.thread.val = r;

        // a primitive that prepared a closure (apply) changed the PC; in
        // non-tail position its eventual RETURN must come back here
        if !tailp && self.thread.pc != pc0 {
            self.thread.push(Word::fixnum(pc0 as i64));
            self.thread.push(Word::MARK_RETURN);
        }
        Ok(())
    }

    /// Run `func` with `args` to completion and hand back its value,
    /// preserving all interpreter state around the nested run.
    pub fn call(&mut self, func: Word, args: &[Word]) -> VmResult<Word> {
        self.thread.push(Word::fixnum(self.thread.pc as i64));
        self.thread.push(Word::MARK_RETURN);
        self.thread.preserve_all_state();

        let fw = frame::alloc(&mut self.heap, args.len() + 1);
        for (i, &a) in args.iter().enumerate() {
            frame::set(&mut self.heap, fw, i, a);
        }
        self.thread.val = fw;

        let nested = !matches!(self.heap.try_get(func), Some(Object::Primitive(_)));
        self.invoke(func, TAIL_CALL)?;
        if nested {
            let desc = format!("call: {}", printer::display_string(&self.heap, func));
            self.run(&desc)?;
        }

        let r = self.thread.val;
        self.thread.restore_all_state();
        self.thread.pop_marker(Word::MARK_RETURN, "call");
        let pc = self.thread.pop_fixnum("call/pc");
        self.thread.pc = pc as usize;
        Ok(r)
    }

    /// `(apply fn a b (c d))` — the trailing list is flattened.
    pub fn apply(&mut self, func: Word, args: Word) -> VmResult<()> {
        let mut flat = pair::list_to_vec(&self.heap, args)
            .unwrap_or_else(|| panic!("apply: improper argument list"));
        if let Some(&lastw) = flat.last()
            && (lastw == Word::NIL || self.heap.is_pair(lastw))
        {
            flat.pop();
            let tailargs = pair::list_to_vec(&self.heap, lastw)
                .unwrap_or_else(|| panic!("apply: improper trailing list"));
            flat.extend(tailargs);
        }
        let fw = frame::alloc(&mut self.heap, flat.len() + 1);
        for (i, &a) in flat.iter().enumerate() {
            frame::set(&mut self.heap, fw, i, a);
        }
        self.thread.val = fw;
        self.invoke(func, TAIL_CALL)
    }

    // -----------------------------------------------------------------
    // the run loop

    /// Ready the PC for code that may not change it (a primitive run via
    /// [`Machine::call`]): point it at a fresh NOP/RETURN tail.
    pub fn default_pc(&mut self) {
        self.thread.pc = self.code.len();
    }

    pub fn run(&mut self, desc: &str) -> VmResult<Word> {
        let level = self.run_depth;
        self.run_depth += 1;
        let r = self.run_at(level, desc);
        self.run_depth = level;
        r
    }

    fn run_at(&mut self, level: usize, desc: &str) -> VmResult<Word> {
        let krun0 = self.krun.len();
        let ss0 = self.thread.stack.len();

        // make sure this segment returns to FINISH
        self.thread
            .push(Word::fixnum(self.prologue.finish_pc as i64));
        self.thread.push(Word::MARK_RETURN);
        self.code.push_op(Op::Nop);
        self.code.push_op(Op::Return);

        tracing::debug!(level, desc, pc = self.thread.pc, "run");

        loop {
            loop {
                match self.step() {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(Unwind::Jump { level: l, code }) if l >= level => {
                        tracing::debug!(?code, from = l, at = level, "caught jump");
                        continue;
                    }
                    Err(e) => return Err(e),
                }

                if let Err(e) = self.poll_signals() {
                    match e {
                        Unwind::Jump { level: l, code } if l >= level => {
                            tracing::debug!(?code, "caught signal jump");
                            continue;
                        }
                        e => return Err(e),
                    }
                }

                self.run_loops += 1;
                if self.run_loops & GC_CHECK_MASK == 0
                    && self.heap.allocs_since_gc() > GC_ALLOC_THRESHOLD
                {
                    self.collect_garbage();
                }
            }

            // we should be one beyond FINISH with the stack balanced
            let mut bail = false;
            if self.thread.pc != self.prologue.finish_pc + 1 {
                tracing::warn!(
                    pc = self.thread.pc,
                    expected = self.prologue.finish_pc + 1,
                    "run: thread failed to run FINISH"
                );
                bail = true;
            }
            if self.thread.stack.len() != ss0 {
                tracing::warn!(
                    entry = ss0,
                    exit = self.thread.stack.len(),
                    "run: thread failed to consume stack"
                );
                bail = true;
            }

            // ABORT added krun entries it cannot repair
            let mut krun_last = None;
            while self.krun.len() > krun0 {
                krun_last = self.krun.pop();
            }

            if !bail {
                return Ok(self.thread.val);
            }
            match krun_last {
                Some((k, kdesc)) => {
                    tracing::warn!(desc = %kdesc, "run/bail: restoring krun");
                    self.restore_continuation_data(k, Word::UNSPEC);
                    // the restored state belongs to this run: keep stepping
                }
                None => {
                    tracing::error!("run/bail: nothing to restore");
                    return Err(Unwind::Exit(1));
                }
            }
        }
    }

    pub fn collect_garbage(&mut self) {
        let mut roots: Vec<Word> = Vec::with_capacity(
            self.constants.len() + self.values.len() + self.thread.stack.len() + 64,
        );
        roots.extend_from_slice(&self.constants);
        roots.extend_from_slice(&self.values);
        roots.extend(self.krun.iter().map(|(k, _)| *k));
        roots.extend(self.symbols.roots());
        roots.extend(self.modules.values().copied());
        roots.extend(self.modules.keys().copied());
        roots.extend_from_slice(&self.thread.stack);
        let thr = &self.thread;
        roots.extend_from_slice(&[
            thr.val,
            thr.frame,
            thr.env,
            thr.module,
            thr.func,
            thr.reg1,
            thr.reg2,
            thr.expr,
            thr.input_handle,
            thr.output_handle,
            thr.error_handle,
        ]);
        roots.extend(self.conditions.roots());
        roots.extend(self.expanders.iter().flat_map(|(&k, &v)| [k, v]));
        roots.extend(self.operators.iter().flat_map(|(&k, &(v, _, _))| [k, v]));
        roots.extend_from_slice(&self.signal_conditions);
        roots.extend_from_slice(&self.signal_handler_names);
        self.heap.collect(roots);
    }

    // -----------------------------------------------------------------
    // one instruction

    /// Decode and execute one instruction.  `Ok(true)` to continue,
    /// `Ok(false)` on FINISH.
    pub fn step(&mut self) -> VmResult<bool> {
        let pc0 = self.thread.pc;
        let byte = self.fetch8();
        let op = Op::try_from(byte).unwrap_or_else(|_| {
            panic!(
                "unknown opcode {byte} at PC {pc0}: {}",
                self.code.context(pc0)
            )
        });

        tracing::trace!(pc = pc0, op = op.name(), "step");

        match op {
            Op::ShallowArgumentRef0 => {
                self.thread.val = frame::get(&self.heap, self.thread.frame, 0);
            }
            Op::ShallowArgumentRef1 => {
                self.thread.val = frame::get(&self.heap, self.thread.frame, 1);
            }
            Op::ShallowArgumentRef2 => {
                self.thread.val = frame::get(&self.heap, self.thread.frame, 2);
            }
            Op::ShallowArgumentRef3 => {
                self.thread.val = frame::get(&self.heap, self.thread.frame, 3);
            }
            Op::ShallowArgumentRef => {
                let j = self.fetch_varuint() as usize;
                self.thread.val = frame::get(&self.heap, self.thread.frame, j);
            }
            Op::DeepArgumentRef => {
                let i = self.fetch_varuint() as usize;
                let j = self.fetch_varuint() as usize;
                self.thread.val = frame::fetch(&self.heap, self.thread.frame, i, j);
            }
            Op::ShallowArgumentSet0 => {
                frame::set(&mut self.heap, self.thread.frame, 0, self.thread.val);
            }
            Op::ShallowArgumentSet1 => {
                frame::set(&mut self.heap, self.thread.frame, 1, self.thread.val);
            }
            Op::ShallowArgumentSet2 => {
                frame::set(&mut self.heap, self.thread.frame, 2, self.thread.val);
            }
            Op::ShallowArgumentSet3 => {
                frame::set(&mut self.heap, self.thread.frame, 3, self.thread.val);
            }
            Op::ShallowArgumentSet => {
                let j = self.fetch_varuint() as usize;
                frame::set(&mut self.heap, self.thread.frame, j, self.thread.val);
            }
            Op::DeepArgumentSet => {
                let i = self.fetch_varuint() as usize;
                let j = self.fetch_varuint() as usize;
                frame::update(&mut self.heap, self.thread.frame, i, j, self.thread.val);
            }

            Op::GlobalSymRef | Op::GlobalFunctionSymRef => {
                let mci = self.fetch_ref();
                self.thread.val = self.global_sym_ref(mci, false)?;
            }
            Op::CheckedGlobalSymRef | Op::CheckedGlobalFunctionSymRef => {
                let mci = self.fetch_ref();
                self.thread.val = self.global_sym_ref(mci, true)?;
            }
            Op::ConstantSymRef => {
                let mci = self.fetch_varuint();
                let env = self.current_env();
                let gci = module::get_or_set_vci(&mut self.heap, env, mci);
                let c = self.constants_ref(gci as usize);
                self.thread.val = self.copy_constant(c);
            }
            Op::ComputedSymRef => {
                let mci = self.fetch_ref();
                let gvi = self.get_or_create_vvi(mci);
                if gvi == 0 {
                    panic!("COMPUTED-SYM-REF: no gvi for mci {mci}");
                }
                self.thread.val = self.computed_ref(mci, gvi)?;
            }
            Op::GlobalSymDef => {
                let mci = self.fetch_ref();
                let mkci = self.fetch_varuint();
                let ce = self.current_env();
                let sym = self.sym_for_mci(mci);
                let kgci = module::get_or_set_vci(&mut self.heap, ce, mkci);
                let kind = self.constants_ref(kgci as usize);

                let existing = module::find_symbol(&self.heap, ce, sym);
                let needs_slot = match &existing {
                    None => true,
                    Some(rec) => rec.gvi == 0,
                };
                if needs_slot {
                    let gvi = self.extend_values();
                    module::with_mut(&mut self.heap, ce).set_vvi(mci, gvi);
                    module::set_symbol(
                        &mut self.heap,
                        ce,
                        sym,
                        BindingRecord {
                            scope: kind,
                            mci,
                            gvi,
                            module: ce,
                            desc: "GLOBAL-SYM-DEF".to_string(),
                        },
                    );
                }
            }
            Op::GlobalSymSet => {
                let mci = self.fetch_ref();
                let sym = self.sym_for_mci(mci);
                let gvi = self.get_or_create_vvi(mci);
                if gvi == 0 {
                    return Err(self.error_unbound(sym, "GLOBAL-SYM-SET"));
                }
                let val = self.thread.val;
                self.values_set(gvi, val);
                if val.is_ref()
                    && let Object::Closure(c) = self.heap.get_mut(val)
                {
                    // queryable closure metadata
                    c.name = sym;
                }
            }
            Op::ComputedSymSet => {
                let mci = self.fetch_ref();
                let gvi = self.get_or_create_vvi(mci);
                if gvi == 0 {
                    panic!("COMPUTED-SYM-SET: no gvi for mci {mci}");
                }
                let val = self.thread.val;
                // setting a computed variable runs arbitrary code whose
                // result becomes val
                self.thread.val = self.computed_set(mci, gvi, val)?;
            }
            Op::ComputedSymDefine => {
                let mci = self.fetch_ref();
                let ce = self.current_env();
                let sym = self.sym_for_mci(mci);
                let gvi = self.extend_values();
                module::with_mut(&mut self.heap, ce).set_vvi(mci, gvi);
                match module::find_symbol(&self.heap, ce, sym) {
                    None => {
                        module::set_symbol(
                            &mut self.heap,
                            ce,
                            sym,
                            BindingRecord {
                                scope: Word::TOPLEVEL,
                                mci,
                                gvi,
                                module: ce,
                                desc: "COMPUTED-SYM-DEFINE".to_string(),
                            },
                        );
                    }
                    Some(mut rec) => {
                        rec.gvi = gvi;
                        module::set_symbol(&mut self.heap, ce, sym, rec);
                    }
                }
                let val = self.thread.val;
                self.computed_define(gvi, val);
            }

            Op::Predefined0 => self.thread.val = Word::TRUE,
            Op::Predefined1 => self.thread.val = Word::FALSE,
            Op::Predefined2 => self.thread.val = Word::NIL,
            Op::Predefined => {
                let vi = self.fetch_varuint() as usize;
                self.thread.val = self.values_ref(vi);
            }

            Op::LongGoto => {
                let i = self.fetch_varuint() as usize;
                self.thread.pc += i;
            }
            Op::LongJumpFalse => {
                let i = self.fetch_varuint() as usize;
                if self.thread.val == Word::FALSE {
                    self.thread.pc += i;
                }
            }
            Op::LongJumpTrue => {
                let i = self.fetch_varuint() as usize;
                if self.thread.val != Word::FALSE {
                    self.thread.pc += i;
                }
            }
            Op::ShortGoto => {
                let i = self.fetch8() as usize;
                self.thread.pc += i;
            }
            Op::ShortJumpFalse => {
                let i = self.fetch8() as usize;
                if self.thread.val == Word::FALSE {
                    self.thread.pc += i;
                }
            }
            Op::ShortJumpTrue => {
                let i = self.fetch8() as usize;
                if self.thread.val != Word::FALSE {
                    self.thread.pc += i;
                }
            }

            Op::PushValue => {
                let v = self.thread.val;
                self.thread.push(v);
            }
            Op::PopValue => self.thread.val = self.thread.pop(),
            Op::PopReg1 => self.thread.reg1 = self.thread.pop(),
            Op::PopReg2 => self.thread.reg2 = self.thread.pop(),
            Op::PopExpr => {
                let mci = self.fetch_varuint();
                self.thread.expr = Word::fixnum(mci as i64);
            }
            Op::PopFunction => self.thread.func = self.thread.pop(),

            Op::PreserveState => self.thread.preserve_state(),
            Op::RestoreState => self.thread.restore_state(),
            Op::RestoreAllState => self.thread.restore_all_state(),

            Op::CreateClosure => {
                let offset = self.fetch_varuint() as usize;
                let code_len = self.fetch_varuint() as usize;
                let ssci = self.fetch_varuint();
                let dsci = self.fetch_varuint();

                let env = self.current_env();
                let sgci = module::get_or_set_vci(&mut self.heap, env, ssci);
                let sigstr = self.constants_ref(sgci as usize);
                let dgci = module::get_or_set_vci(&mut self.heap, env, dsci);
                let docstr = self.constants_ref(dgci as usize);

                let c = Closure {
                    code_pc: self.thread.pc + offset,
                    code_len,
                    frame: self.thread.frame,
                    env: self.thread.env,
                    name: Word::NIL,
                    sigstr,
                    docstr,
                    called: 0,
                };
                self.thread.val = self.heap.alloc(Object::Closure(c));
            }
            Op::FunctionInvoke => {
                let func = self.thread.func;
                if self.tracing > 0 {
                    self.function_trace(op, func);
                }
                self.invoke(func, REGULAR_CALL)?;
            }
            Op::FunctionGoto => {
                let func = self.thread.func;
                if self.tracing > 0 {
                    self.function_trace(op, func);
                }
                self.invoke(func, TAIL_CALL)?;
            }
            Op::Return => {
                self.thread.pop_marker(Word::MARK_RETURN, "RETURN");
                let pc = self.thread.pop_fixnum("RETURN");
                if pc < 0 || pc as usize > self.code.len() {
                    panic!("RETURN: impossible PC {pc} on stack top");
                }
                self.thread.pc = pc as usize;
                if self.tracing > 1 {
                    self.tracing -= 1;
                }
            }
            Op::Finish => {
                return Ok(false);
            }
            Op::Abort => {
                let offset = self.fetch_varuint();
                // the continuation as captured would re-enter the errant
                // code; shift its resume PC past the protected span
                let k = self.capture_continuation();
                if let Object::Continuation(kc) = self.heap.get_mut(k) {
                    let al = kc.stack.len();
                    let pc = kc.stack[al - 2]
                        .as_fixnum()
                        .expect("ABORT: continuation PC not a fixnum");
                    kc.stack[al - 2] = Word::fixnum(pc + offset as i64);
                }
                let pc = self.thread.pc;
                let desc = format!("ABORT to toplevel (PC {})", pc as u64 + offset);
                let at = 1.min(self.krun.len());
                self.krun.insert(at, (k, desc));
            }

            Op::AllocateFrame1 => {
                self.thread.val = frame::alloc(&mut self.heap, 1);
            }
            Op::AllocateFrame2 => self.allocate_frame(2)?,
            Op::AllocateFrame3 => self.allocate_frame(3)?,
            Op::AllocateFrame4 => self.allocate_frame(4)?,
            Op::AllocateFrame5 => self.allocate_frame(5)?,
            Op::AllocateFrame => {
                let n = self.fetch_varuint() as usize;
                self.allocate_frame(n)?;
            }
            Op::AllocateDottedFrame => {
                let arity = self.fetch_varuint() as usize;
                self.allocate_frame(arity)?;
                let fw = self.thread.val;
                frame::set(&mut self.heap, fw, arity - 1, Word::NIL);
            }
            Op::PopFrame0 => self.pop_into_frame(0),
            Op::PopFrame1 => self.pop_into_frame(1),
            Op::PopFrame2 => self.pop_into_frame(2),
            Op::PopFrame3 => self.pop_into_frame(3),
            Op::PopFrame => {
                let k = self.fetch_varuint() as usize;
                self.pop_into_frame(k);
            }
            Op::ExtendFrame => {
                let fw = self.thread.val;
                let parent = self.thread.frame;
                match self.heap.get_mut(fw) {
                    Object::Frame(f) => f.next = parent,
                    other => panic!("EXTEND-FRAME: val is a {}", other.type_name()),
                }
                self.thread.frame = fw;
            }
            Op::UnlinkFrame => {
                let fw = self.thread.frame;
                self.thread.frame = match self.heap.get(fw) {
                    Object::Frame(f) => f.next,
                    other => panic!("UNLINK-FRAME: frame is a {}", other.type_name()),
                };
            }
            Op::PackFrame => {
                let arity = self.fetch_varuint() as usize;
                let fw = self.thread.val;
                frame::listify(&mut self.heap, fw, arity);
            }
            Op::PopConsFrame => {
                let arity = self.fetch_varuint() as usize;
                let v = self.thread.pop();
                let fw = self.thread.frame;
                let slot = frame::get(&self.heap, fw, arity);
                let consed = pair::cons(&mut self.heap, v, slot);
                frame::set(&mut self.heap, fw, arity, consed);
            }

            Op::Arity1P => self.check_arity_eq(op, 1)?,
            Op::Arity2P => self.check_arity_eq(op, 2)?,
            Op::Arity3P => self.check_arity_eq(op, 3)?,
            Op::Arity4P => self.check_arity_eq(op, 4)?,
            Op::ArityEqP => {
                let n = self.fetch_varuint() as usize;
                self.check_arity_eq(op, n)?;
            }
            Op::ArityGeP => {
                let n = self.fetch_varuint() as usize;
                let nargs = frame::nargs(&self.heap, self.thread.val);
                if nargs < n {
                    return Err(self.error_arity(op, nargs, n, true));
                }
            }

            Op::Constant0 => self.thread.val = Word::fixnum(0),
            Op::Constant1 => self.thread.val = Word::fixnum(1),
            Op::Constant2 => self.thread.val = Word::fixnum(2),
            Op::Constant3 => self.thread.val = Word::fixnum(3),
            Op::Constant4 => self.thread.val = Word::fixnum(4),
            Op::Fixnum => {
                let v = self.fetch_varuint();
                self.thread.val = Word::fixnum(v as i64);
            }
            Op::NegFixnum => {
                let v = self.fetch_varuint();
                self.thread.val = Word::fixnum(-(v as i64));
            }
            Op::Character | Op::Unicode => {
                let v = self.fetch_varuint() as u32;
                let c = char::from_u32(v)
                    .unwrap_or_else(|| panic!("CHARACTER: invalid scalar {v}"));
                self.thread.val = Word::character(c);
            }
            Op::Constant => {
                let v = self.fetch_varuint();
                let s = skiff_core::Singleton::from_index(v)
                    .unwrap_or_else(|| panic!("CONSTANT: unknown constant index {v}"));
                self.thread.val = Word::singleton(s);
            }
            Op::Nop => {}

            Op::PrimCall0 => {
                let vi = self.fetch_varuint() as usize;
                self.thread.val = self.prim_call(vi, &[])?;
            }
            Op::PrimCall1 => {
                let vi = self.fetch_varuint() as usize;
                let a = self.thread.val;
                self.thread.val = self.prim_call(vi, &[a])?;
            }
            Op::PrimCall2 => {
                let vi = self.fetch_varuint() as usize;
                let a = self.thread.reg1;
                let b = self.thread.val;
                self.thread.val = self.prim_call(vi, &[a, b])?;
            }

            // the specialized fast paths: identical semantics to the
            // general primitive invocation, minus the table walk
            Op::PrimCall1Head => {
                let a = self.thread.val;
                self.thread.val = crate::primitives::head_of(self, a)?;
            }
            Op::PrimCall1Tail => {
                let a = self.thread.val;
                self.thread.val = crate::primitives::tail_of(self, a)?;
            }
            Op::PrimCall1PairP => {
                self.thread.val = Word::boolean(self.heap.is_pair(self.thread.val));
            }
            Op::PrimCall1SymbolP => {
                self.thread.val = Word::boolean(self.heap.is_symbol(self.thread.val));
            }
            Op::PrimCall1Display => {
                let a = self.thread.val;
                let text = printer::display_string(&self.heap, a);
                let oh = self.thread.output_handle;
                crate::handle::puts(self, oh, &text)?;
                self.thread.val = Word::UNSPEC;
            }
            Op::PrimCall1PrimitiveP => {
                let is = matches!(self.heap.try_get(self.thread.val), Some(Object::Primitive(_)));
                self.thread.val = Word::boolean(is);
            }
            Op::PrimCall1NullP => {
                self.thread.val = Word::boolean(self.thread.val == Word::NIL);
            }
            Op::PrimCall1ContinuationP => {
                let is = matches!(
                    self.heap.try_get(self.thread.val),
                    Some(Object::Continuation(_))
                );
                self.thread.val = Word::boolean(is);
            }
            Op::PrimCall1EofP => {
                self.thread.val = Word::boolean(self.thread.val == Word::EOF);
            }
            Op::PrimCall1SetCurMod => {
                let m = self.thread.val;
                if !module::is_module(&self.heap, m) {
                    return Err(self.error_param_type("module", m));
                }
                self.thread.module = m;
                self.thread.env = m;
                self.thread.val = Word::UNSPEC;
            }
            Op::PrimCall2Pair => {
                let h = self.thread.reg1;
                let t = self.thread.val;
                self.thread.val = pair::cons(&mut self.heap, h, t);
            }
            Op::PrimCall2EqP => {
                self.thread.val = Word::boolean(self.thread.reg1 == self.thread.val);
            }
            Op::PrimCall2SetHead => {
                let p = self.thread.reg1;
                let v = self.thread.val;
                if !pair::set_head(&mut self.heap, p, v) {
                    return Err(self.error_param_type("pair", p));
                }
                self.thread.val = Word::UNSPEC;
            }
            Op::PrimCall2SetTail => {
                let p = self.thread.reg1;
                let v = self.thread.val;
                if !pair::set_tail(&mut self.heap, p, v) {
                    return Err(self.error_param_type("pair", p));
                }
                self.thread.val = Word::UNSPEC;
            }
            Op::PrimCall2Add => {
                let (a, b) = (self.thread.reg1, self.thread.val);
                self.thread.val = crate::numeric::add2(self, a, b)?;
            }
            Op::PrimCall2Subtract => {
                let (a, b) = (self.thread.reg1, self.thread.val);
                self.thread.val = crate::numeric::sub2(self, a, b)?;
            }
            Op::PrimCall2Multiply => {
                let (a, b) = (self.thread.reg1, self.thread.val);
                self.thread.val = crate::numeric::mul2(self, a, b)?;
            }
            Op::PrimCall2Eq => {
                let (a, b) = (self.thread.reg1, self.thread.val);
                let r = crate::numeric::num_eq(self, a, b)?;
                self.thread.val = Word::boolean(r);
            }
            Op::PrimCall2Lt => {
                let (a, b) = (self.thread.reg1, self.thread.val);
                let r = crate::numeric::num_lt(self, a, b)?;
                self.thread.val = Word::boolean(r);
            }
            Op::PrimCall2Gt => {
                let (a, b) = (self.thread.reg1, self.thread.val);
                let r = crate::numeric::num_lt(self, b, a)?;
                self.thread.val = Word::boolean(r);
            }
            Op::PrimCall2Le => {
                let (a, b) = (self.thread.reg1, self.thread.val);
                let r = crate::numeric::num_lt(self, b, a)?;
                self.thread.val = Word::boolean(!r);
            }
            Op::PrimCall2Ge => {
                let (a, b) = (self.thread.reg1, self.thread.val);
                let r = crate::numeric::num_lt(self, a, b)?;
                self.thread.val = Word::boolean(!r);
            }
            Op::PrimCall2Remainder => {
                let (a, b) = (self.thread.reg1, self.thread.val);
                self.thread.val = crate::numeric::remainder2(self, a, b)?;
            }

            Op::Expander => {
                let mci = self.fetch_ref();
                let sym = self.sym_for_mci(mci);
                let val = self.thread.val;
                let gvi = self.get_or_create_vvi(mci);
                if gvi != 0 {
                    self.values_set(gvi, val);
                }
                self.expanders.insert(sym, val);
            }
            Op::InfixOperator => {
                let mci = self.fetch_ref();
                let pri = self.fetch_varuint();
                let sym = self.sym_for_mci(mci);
                let val = self.thread.val;
                self.operators.insert(sym, (val, pri, false));
            }
            Op::PostfixOperator => {
                let mci = self.fetch_ref();
                let pri = self.fetch_varuint();
                let sym = self.sym_for_mci(mci);
                let val = self.thread.val;
                self.operators.insert(sym, (val, pri, true));
            }

            Op::PushDynamic => {
                let mci = self.fetch_ref();
                let gvi = self.get_or_create_vvi(mci);
                let val = self.thread.val;
                self.push_dynamic(gvi, val);
            }
            Op::PopDynamic => self.pop_dynamic(),
            Op::DynamicSymRef | Op::DynamicFunctionSymRef => {
                let mci = self.fetch_ref();
                let gvi = self.get_or_create_vvi(mci);
                self.thread.val = self.dynamic_ref(mci, gvi, None)?;
            }
            Op::PushEnviron => {
                let mci = self.fetch_ref();
                let gvi = self.get_or_create_vvi(mci);
                let val = self.thread.val;
                self.push_environ(gvi, val);
            }
            Op::PopEnviron => self.pop_environ(),
            Op::EnvironSymRef => {
                let mci = self.fetch_ref();
                let gvi = self.get_or_create_vvi(mci);
                self.thread.val = self.environ_ref(mci, gvi)?;
            }

            Op::NonContErr => {
                let msg = "non-continuable condition handler returned";
                return Err(self.error_non_continuable(msg));
            }
            Op::PushTrap => {
                let mci = self.fetch_ref();
                let handler = self.thread.val;
                self.push_trap(handler, Word::fixnum(mci as i64));
            }
            Op::PopTrap => self.pop_trap(),
            Op::RestoreTrap => self.restore_trap(),
        }

        Ok(true)
    }

    fn allocate_frame(&mut self, n: usize) -> VmResult<()> {
        let aci = self.fetch_varuint();
        let fw = frame::alloc(&mut self.heap, n);
        match self.heap.get_mut(fw) {
            Object::Frame(f) => f.names = Word::fixnum(aci as i64),
            _ => unreachable!(),
        }
        self.thread.val = fw;
        Ok(())
    }

    fn pop_into_frame(&mut self, k: usize) {
        let v = self.thread.pop();
        let fw = self.thread.val;
        frame::set(&mut self.heap, fw, k, v);
    }

    fn check_arity_eq(&mut self, op: Op, n: usize) -> VmResult<()> {
        let nargs = frame::nargs(&self.heap, self.thread.val);
        if nargs != n {
            return Err(self.error_arity(op, nargs, n, false));
        }
        Ok(())
    }

    /// PRIMCALL dispatch: the value at `vi` must be a primitive.
    fn prim_call(&mut self, vi: usize, args: &[Word]) -> VmResult<Word> {
        let pw = self.values_ref(vi);
        let (prim_id, name, arity, varargs) = match self.heap.try_get(pw) {
            Some(Object::Primitive(p)) => {
                (p.prim, p.name.to_string(), p.arity as usize, p.varargs)
            }
            _ => {
                return Err(self.error_function_invoke("PRIMITIVE: not a primitive", pw));
            }
        };
        if args.len() < arity || (!varargs && args.len() > arity) {
            return Err(self.error_arity_prim(&name, args.len(), arity, varargs));
        }
        let rest = pair::list(&mut self.heap, &args[arity..]);
        let f = self.prim_table[prim_id.0 as usize].f;
        f(self, &args[..arity], rest)
    }

    /// Deep-copy a heap constant into val; immediates copy by value.
    fn copy_constant(&mut self, c: Word) -> Word {
        match c.decode() {
            Decoded::Ref(_) => self.deep_copy(c),
            _ => c,
        }
    }

    fn deep_copy(&mut self, w: Word) -> Word {
        if !w.is_ref() {
            return w;
        }
        enum Plan {
            Leaf,
            Pair(Word, Word),
            Array(Vec<Word>, Word),
            String(String),
            Bignum(skiff_core::bignum::Bignum),
        }
        let plan = match self.heap.get(w) {
            Object::Pair { head, tail } => Plan::Pair(*head, *tail),
            Object::Array(a) => Plan::Array(a.elements().to_vec(), a.default),
            Object::String(_) | Object::Substring { .. } => {
                Plan::String(strings::text(&self.heap, w).unwrap_or("").to_string())
            }
            Object::Bignum(n) => Plan::Bignum(n.clone()),
            // symbols are interned, everything else copies by reference
            _ => Plan::Leaf,
        };
        match plan {
            Plan::Leaf => w,
            Plan::Pair(h, t) => {
                let h2 = self.deep_copy(h);
                let t2 = self.deep_copy(t);
                pair::cons(&mut self.heap, h2, t2)
            }
            Plan::Array(elements, default) => {
                let copied: Vec<Word> = elements.iter().map(|&e| self.deep_copy(e)).collect();
                self.heap
                    .alloc(Object::Array(skiff_core::array::Array::from_vec(
                        copied, default,
                    )))
            }
            Plan::String(s) => strings::alloc(&mut self.heap, s),
            Plan::Bignum(n) => self.heap.alloc(Object::Bignum(n)),
        }
    }

    pub fn alloc_bignum(&mut self, n: skiff_core::bignum::Bignum) -> Word {
        self.heap.alloc(Object::Bignum(n))
    }

    /// The source position of the expression being evaluated, as well as
    /// it can be reconstructed from the expr register.
    pub fn source_location(&mut self) -> String {
        let expr = self.thread.expr;
        match expr.as_fixnum() {
            Some(mci) => {
                let env = self.current_env();
                let gci = module::get_or_set_vci(&mut self.heap, env, mci as u64);
                match self.constants.get(gci as usize) {
                    Some(&src) => printer::display_string(&self.heap, src),
                    None => format!("<expr mci {mci}>"),
                }
            }
            None => printer::display_string(&self.heap, expr),
        }
    }

    fn function_trace(&mut self, op: Op, func: Word) {
        let args = frame::params_as_list(&mut self.heap, self.thread.val);
        tracing::debug!(
            pc = self.thread.pc,
            op = op.name(),
            func = %printer::display_string(&self.heap, func),
            args = %printer::display_string(&self.heap, args),
            "invoke"
        );
    }
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new()
    }
}
