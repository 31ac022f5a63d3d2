// LuaVM - the interpreter state.
//
// Owns the value stack, the call-frame stack, the globals and registry
// tables, the open-upvalue map and the whole GC heap (pool + collector +
// interner). One LuaVM is single-threaded; independent VMs share nothing.

use smol_str::SmolStr;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::compiler::{CompileOptions, Compiler, Lexer, Parser};
use crate::gc::{
    FunctionId, GcId, GcParams, ObjectPool, StringId, StringInterner, TableId, UpvalueId,
    UpvalueState, UserdataId, GC,
};
use crate::lua_value::{number_to_string, LuaUserdata, LuaValue, Proto};
use crate::lua_vm::frame::CallFrame;
use crate::lua_vm::{LuaError, LuaResult};

/// Host function: reads its arguments from stack slots 1..N of its frame,
/// pushes its results, and returns how many it pushed.
pub type CFunction = fn(&mut LuaVM) -> LuaResult<usize>;

/// Interned metamethod keys, resolved once at VM construction and rooted
/// for the lifetime of the state.
pub struct MetaKeys {
    pub index: StringId,
    pub newindex: StringId,
    pub add: StringId,
    pub sub: StringId,
    pub mul: StringId,
    pub div: StringId,
    pub modulo: StringId,
    pub pow: StringId,
    pub unm: StringId,
    pub len: StringId,
    pub concat: StringId,
    pub eq: StringId,
    pub lt: StringId,
    pub le: StringId,
    pub call: StringId,
    pub tostring: StringId,
    pub metatable: StringId,
}

impl MetaKeys {
    fn new(interner: &mut StringInterner, pool: &mut ObjectPool, white: u8) -> Self {
        let mut k = |name: &str| interner.intern(name.as_bytes(), pool, white);
        MetaKeys {
            index: k("__index"),
            newindex: k("__newindex"),
            add: k("__add"),
            sub: k("__sub"),
            mul: k("__mul"),
            div: k("__div"),
            modulo: k("__mod"),
            pow: k("__pow"),
            unm: k("__unm"),
            len: k("__len"),
            concat: k("__concat"),
            eq: k("__eq"),
            lt: k("__lt"),
            le: k("__le"),
            call: k("__call"),
            tostring: k("__tostring"),
            metatable: k("__metatable"),
        }
    }

    fn ids(&self) -> [StringId; 17] {
        [
            self.index,
            self.newindex,
            self.add,
            self.sub,
            self.mul,
            self.div,
            self.modulo,
            self.pow,
            self.unm,
            self.len,
            self.concat,
            self.eq,
            self.lt,
            self.le,
            self.call,
            self.tostring,
            self.metatable,
        ]
    }
}

/// Hard limit on nested host-boundary re-entries (pcall, metamethod
/// calls, iterator calls). Analogous to LUAI_MAXCCALLS.
pub(crate) const MAX_NESTED_CALLS: usize = 200;
/// Hard limit on value-stack growth.
pub(crate) const MAX_STACK: usize = 1 << 20;

pub struct LuaVM {
    pub(crate) stack: Vec<LuaValue>,
    pub(crate) frames: Vec<CallFrame>,
    /// Open upvalues keyed by the absolute stack slot they watch; the
    /// ordered map makes "close everything >= level" a range drain.
    pub(crate) open_upvalues: BTreeMap<usize, UpvalueId>,
    pub(crate) pool: ObjectPool,
    pub(crate) gc: GC,
    pub(crate) interner: StringInterner,
    globals: TableId,
    registry: TableId,
    pub(crate) meta_keys: MetaKeys,
    /// The value raised by the most recent runtime error.
    pub(crate) error_value: LuaValue,
    /// Depth of nested dispatch-loop entries from the host boundary.
    pub(crate) nested_calls: usize,
    /// How many results the most recent completed call produced.
    pub(crate) returned_values: usize,
    pub options: CompileOptions,
}

impl LuaVM {
    pub fn new() -> Self {
        Self::with_options(CompileOptions::default(), GcParams::default())
    }

    pub fn with_options(options: CompileOptions, gc_params: GcParams) -> Self {
        let mut pool = ObjectPool::new();
        let gc = GC::new(gc_params);
        let mut interner = StringInterner::new();
        let globals = pool.alloc_table(0, 32, gc.current_white);
        let registry = pool.alloc_table(0, 8, gc.current_white);
        let meta_keys = MetaKeys::new(&mut interner, &mut pool, gc.current_white);
        LuaVM {
            stack: Vec::with_capacity(64),
            frames: Vec::with_capacity(8),
            open_upvalues: BTreeMap::new(),
            pool,
            gc,
            interner,
            globals,
            registry,
            meta_keys,
            error_value: LuaValue::Nil,
            nested_calls: 0,
            returned_values: 0,
            options,
        }
    }

    // ============ Compilation ============

    /// Compile a source string into a prototype, using this VM's string
    /// pool for the constants.
    pub fn compile(&mut self, source: &str) -> LuaResult<Rc<Proto>> {
        self.compile_named(source, "chunk")
    }

    pub fn compile_named(&mut self, source: &str, chunk_name: &str) -> LuaResult<Rc<Proto>> {
        let name = SmolStr::new(chunk_name);
        let lexer = Lexer::new(source.as_bytes(), name.clone());
        let mut parser = Parser::new(lexer);
        let block = parser.parse()?;
        let LuaVM {
            pool,
            gc,
            interner,
            options,
            ..
        } = self;
        let compiler = Compiler::new(name, options.clone(), interner, pool, gc.current_white);
        let proto = compiler.compile_chunk(&block)?;
        Ok(Rc::new(proto))
    }

    // ============ Execution ============

    /// Run a compiled chunk as a vararg closure over the globals table;
    /// returns its first result (or nil).
    pub fn execute(&mut self, proto: Rc<Proto>) -> LuaResult<LuaValue> {
        let env = self.globals;
        let fid = self
            .pool
            .alloc_closure(proto, Vec::new(), env, self.gc.current_white);
        let results = self.call(LuaValue::Function(fid), &[])?;
        Ok(results.first().copied().unwrap_or(LuaValue::Nil))
    }

    /// Compile and run in one step.
    pub fn execute_string(&mut self, source: &str) -> LuaResult<LuaValue> {
        let proto = self.compile(source)?;
        self.execute(proto)
    }

    /// Call any callable value from the host with `args`, collecting all
    /// results. Errors propagate as `Err`.
    pub fn call(&mut self, func: LuaValue, args: &[LuaValue]) -> LuaResult<Vec<LuaValue>> {
        let func_idx = self.stack.len();
        self.stack.push(func);
        self.stack.extend_from_slice(args);
        let nres = self.call_value(func_idx, args.len(), crate::lua_vm::frame::MULTRET)?;
        let results = self.stack[func_idx..func_idx + nres].to_vec();
        self.stack.truncate(func_idx);
        Ok(results)
    }

    /// Protected call: a runtime error is caught and returned as
    /// `Ok(Err(error_value))`; phase errors and overflows still `Err`.
    pub fn pcall(
        &mut self,
        func: LuaValue,
        args: &[LuaValue],
    ) -> LuaResult<Result<Vec<LuaValue>, LuaValue>> {
        match self.call(func, args) {
            Ok(results) => Ok(Ok(results)),
            Err(LuaError::Runtime) => Ok(Err(self.take_error_value())),
            Err(LuaError::StackOverflow) => {
                let v = self.new_string_value("stack overflow");
                Ok(Err(v))
            }
            Err(other) => Err(other),
        }
    }

    // ============ Globals / registry ============

    #[inline]
    pub fn globals(&self) -> TableId {
        self.globals
    }

    #[inline]
    pub fn registry(&self) -> TableId {
        self.registry
    }

    pub fn set_global(&mut self, name: &str, value: LuaValue) {
        let key = LuaValue::Str(self.intern(name.as_bytes()));
        let globals = self.globals;
        self.raw_table_set(globals, key, value);
    }

    pub fn get_global(&mut self, name: &str) -> LuaValue {
        let key = LuaValue::Str(self.intern(name.as_bytes()));
        self.pool.table(self.globals).get(&key)
    }

    /// Register a host function under a global name.
    pub fn register_function(&mut self, name: &str, func: CFunction) {
        let env = self.globals;
        let fid = self
            .pool
            .alloc_host_function(func, Vec::new(), env, self.gc.current_white);
        self.set_global(name, LuaValue::Function(fid));
    }

    // ============ Heap construction ============

    #[inline]
    pub fn intern(&mut self, bytes: &[u8]) -> StringId {
        self.interner
            .intern(bytes, &mut self.pool, self.gc.current_white)
    }

    #[inline]
    pub fn new_string_value(&mut self, s: &str) -> LuaValue {
        LuaValue::Str(self.intern(s.as_bytes()))
    }

    pub fn new_table(&mut self, asize: usize, hsize: usize) -> TableId {
        self.pool.alloc_table(asize, hsize, self.gc.current_white)
    }

    pub fn new_userdata(&mut self, data: Box<dyn std::any::Any>) -> UserdataId {
        self.pool
            .alloc_userdata(LuaUserdata::new(data), self.gc.current_white)
    }

    pub(crate) fn new_closure(
        &mut self,
        proto: Rc<Proto>,
        upvalues: Vec<UpvalueId>,
        env: TableId,
    ) -> FunctionId {
        self.pool
            .alloc_closure(proto, upvalues, env, self.gc.current_white)
    }

    // ============ Barrier-carrying setters ============
    // Every mutator write into a collectable object funnels through one
    // of these, which is where the tri-color invariant is maintained.

    pub fn raw_table_set(&mut self, tid: TableId, key: LuaValue, value: LuaValue) {
        self.gc
            .barrier_forward(GcId::Table(tid), &key, &mut self.pool);
        self.gc
            .barrier_forward(GcId::Table(tid), &value, &mut self.pool);
        self.pool.table_mut(tid).set(key, value);
    }

    pub fn raw_table_set_int(&mut self, tid: TableId, idx: usize, value: LuaValue) {
        self.gc
            .barrier_forward(GcId::Table(tid), &value, &mut self.pool);
        self.pool.table_mut(tid).set_int(idx, value);
    }

    pub fn set_table_metatable(&mut self, tid: TableId, meta: Option<TableId>) {
        if let Some(m) = meta {
            self.gc
                .barrier_forward(GcId::Table(tid), &LuaValue::Table(m), &mut self.pool);
        }
        self.pool.table_mut(tid).set_metatable(meta);
    }

    pub fn set_userdata_metatable(&mut self, uid: UserdataId, meta: Option<TableId>) {
        if let Some(m) = meta {
            self.gc
                .barrier_forward(GcId::Userdata(uid), &LuaValue::Table(m), &mut self.pool);
        }
        self.pool.userdata_mut(uid).meta = meta;
    }

    /// Write through an upvalue cell (open -> stack slot, closed -> cell).
    pub(crate) fn set_upvalue_value(&mut self, uid: UpvalueId, value: LuaValue) {
        match self.pool.upvalue(uid).state {
            UpvalueState::Open { stack_index } => {
                self.stack[stack_index] = value;
            }
            UpvalueState::Closed(_) => {
                self.gc
                    .barrier_forward(GcId::Upvalue(uid), &value, &mut self.pool);
                self.pool.upvalue_mut(uid).state = UpvalueState::Closed(value);
            }
        }
    }

    #[inline]
    pub(crate) fn upvalue_value(&self, uid: UpvalueId) -> LuaValue {
        match self.pool.upvalue(uid).state {
            UpvalueState::Open { stack_index } => self.stack[stack_index],
            UpvalueState::Closed(v) => v,
        }
    }

    // ============ Open upvalue protocol ============

    /// Find the open upvalue watching `slot`, or create one (keeping the
    /// per-state map ordered by slot).
    pub(crate) fn find_or_create_upvalue(&mut self, slot: usize) -> UpvalueId {
        if let Some(&id) = self.open_upvalues.get(&slot) {
            return id;
        }
        let id = self.pool.alloc_upvalue(
            UpvalueState::Open { stack_index: slot },
            self.gc.current_white,
        );
        self.open_upvalues.insert(slot, id);
        id
    }

    /// Close every open upvalue watching slot >= level: copy the live
    /// stack value into the cell and drop it from the open map. Safe to
    /// call redundantly.
    pub(crate) fn close_upvalues(&mut self, level: usize) {
        let to_close = self.open_upvalues.split_off(&level);
        for (slot, uid) in to_close {
            let value = self.stack.get(slot).copied().unwrap_or(LuaValue::Nil);
            self.gc
                .barrier_forward(GcId::Upvalue(uid), &value, &mut self.pool);
            self.pool.upvalue_mut(uid).state = UpvalueState::Closed(value);
        }
    }

    // ============ Metatables ============

    pub fn get_metatable(&self, v: &LuaValue) -> Option<TableId> {
        match v {
            LuaValue::Table(t) => self.pool.table(*t).metatable(),
            LuaValue::Userdata(u) => self.pool.userdata_ref(*u).meta,
            _ => None,
        }
    }

    /// Look up a metamethod for a value; nil when absent.
    pub(crate) fn get_metamethod(&self, v: &LuaValue, event: StringId) -> LuaValue {
        match self.get_metatable(v) {
            Some(mt) => self.pool.table(mt).get(&LuaValue::Str(event)),
            None => LuaValue::Nil,
        }
    }

    // ============ Errors ============

    /// Raise a runtime error whose message is prefixed with the current
    /// chunk/line, reference style.
    pub(crate) fn rt_error(&mut self, message: impl AsRef<str>) -> LuaError {
        let prefixed = match self.current_location() {
            Some((chunk, line)) => format!("{}:{}: {}", chunk, line, message.as_ref()),
            None => message.as_ref().to_string(),
        };
        self.error_value = self.new_string_value(&prefixed);
        LuaError::Runtime
    }

    /// Raise an arbitrary Lua value as an error (the `error` builtin).
    pub(crate) fn throw_value(&mut self, value: LuaValue) -> LuaError {
        self.error_value = value;
        LuaError::Runtime
    }

    pub fn take_error_value(&mut self) -> LuaValue {
        std::mem::replace(&mut self.error_value, LuaValue::Nil)
    }

    /// Render the pending error value for host consumption.
    pub fn error_message(&self) -> String {
        self.display_value(&self.error_value)
    }

    fn current_location(&self) -> Option<(SmolStr, u32)> {
        let frame = self.frames.iter().rev().find(|f| f.is_lua())?;
        let proto = frame.proto.as_ref()?;
        let pc = frame.pc.saturating_sub(1);
        Some((proto.source.clone(), proto.line_at(pc)))
    }

    // ============ Display ============

    /// Raw textual rendering (no `__tostring`; baselib layers that on).
    pub fn display_value(&self, v: &LuaValue) -> String {
        match v {
            LuaValue::Nil => "nil".to_string(),
            LuaValue::Boolean(b) => b.to_string(),
            LuaValue::Number(n) => number_to_string(*n),
            LuaValue::Str(id) => self.pool.string(*id).to_display(),
            LuaValue::Table(id) => format!("table: 0x{:08x}", id.0),
            LuaValue::Function(id) => format!("function: 0x{:08x}", id.0),
            LuaValue::Userdata(id) => format!("userdata: 0x{:08x}", id.0),
        }
    }

    /// Borrow the bytes of an interned string.
    #[inline]
    pub fn string_bytes(&self, id: StringId) -> &[u8] {
        self.pool.string(id).as_bytes()
    }

    // ============ Host-function argument window ============

    /// Number of arguments passed to the currently running host function.
    pub fn host_arg_count(&self) -> usize {
        match self.frames.last() {
            Some(f) if !f.is_lua() => f.top - f.base,
            _ => 0,
        }
    }

    /// 1-based argument access; nil beyond the end.
    pub fn host_arg(&self, i: usize) -> LuaValue {
        match self.frames.last() {
            Some(f) if !f.is_lua() && i >= 1 && f.base + i - 1 < f.top => self.stack[f.base + i - 1],
            _ => LuaValue::Nil,
        }
    }

    /// Push one host result.
    pub fn push_value(&mut self, v: LuaValue) {
        self.stack.push(v);
    }

    // ============ GC driving ============

    /// Run a bounded amount of collection work when the heap has outgrown
    /// the threshold. Called from allocation-heavy opcode handlers.
    pub(crate) fn check_gc(&mut self) {
        if !self.gc.should_step(&self.pool) {
            return;
        }
        let roots = self.collect_roots();
        let LuaVM {
            gc, pool, interner, ..
        } = self;
        gc.step(&roots, pool, interner);
    }

    /// Stop-the-world full collection.
    pub fn collect_garbage(&mut self) {
        let roots = self.collect_roots();
        let LuaVM {
            gc, pool, interner, ..
        } = self;
        gc.collect_full(&roots, pool, interner);
    }

    pub fn gc_stats(&self) -> &crate::gc::GcStats {
        &self.gc.stats
    }

    pub fn heap_bytes(&self) -> usize {
        self.pool.total_bytes
    }

    pub fn live_objects(&self) -> usize {
        self.pool.live_objects()
    }

    fn collect_roots(&self) -> Vec<GcId> {
        let mut roots = Vec::with_capacity(self.stack.len() + 16);
        roots.push(GcId::Table(self.globals));
        roots.push(GcId::Table(self.registry));
        for v in &self.stack {
            if let Some(id) = GcId::of(v) {
                roots.push(id);
            }
        }
        for f in &self.frames {
            if let Some(id) = GcId::of(&f.func) {
                roots.push(id);
            }
        }
        for &uid in self.open_upvalues.values() {
            roots.push(GcId::Upvalue(uid));
        }
        if let Some(id) = GcId::of(&self.error_value) {
            roots.push(id);
        }
        for sid in self.meta_keys.ids() {
            roots.push(GcId::Str(sid));
        }
        roots
    }

    // ============ Stack helpers for the dispatch loop ============

    /// Grow the value stack (with nils) so `len` slots exist.
    pub(crate) fn ensure_stack(&mut self, len: usize) -> LuaResult<()> {
        if len > MAX_STACK {
            return Err(LuaError::StackOverflow);
        }
        if self.stack.len() < len {
            self.stack.resize(len, LuaValue::Nil);
        }
        Ok(())
    }

    /// Type of a value as shown in error messages.
    pub(crate) fn type_name_of(&self, v: &LuaValue) -> &'static str {
        v.type_name()
    }
}

impl Default for LuaVM {
    fn default() -> Self {
        Self::new()
    }
}
