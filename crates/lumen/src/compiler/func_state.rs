// Per-function compile state: the prototype being built, the register
// allocator, the scope (block) stack, active locals, the constant-pool
// dedup map and the upvalue descriptors.

use ahash::RandomState;
use smol_str::SmolStr;
use std::collections::HashMap;

use crate::gc::StringId;
use crate::lua_value::{LocalVarInfo, Proto};
use crate::lua_vm::{LuaError, LuaResult};

use super::expdesc::NO_JUMP;

/// Register ceiling per function.
pub const MAX_REGISTERS: u32 = 255;
/// Active local limit per function.
pub const MAX_LOCALS: usize = 200;
/// Upvalue limit per function.
pub const MAX_UPVALUES: usize = 255;
/// Constant-pool ceiling (18-bit Bx).
pub const MAX_CONSTANTS: usize = (1 << 18) - 1;

/// Key for constant-pool deduplication. Numbers dedupe by bit pattern,
/// strings by interned handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstKey {
    Nil,
    True,
    False,
    Num(u64),
    Str(StringId),
}

/// One lexical block. `nactvar` is the active-local count at entry;
/// leaving truncates back to it. Loops are breakable; `upval` records
/// that some local inside was captured, forcing a CLOSE on exit.
pub struct BlockCnt {
    pub breaklist: i32,
    pub nactvar: u8,
    pub upval: bool,
    pub is_breakable: bool,
}

pub struct ActiveLocal {
    pub name: SmolStr,
    /// Index into proto.local_vars for debug-range bookkeeping.
    pub info_index: usize,
}

pub struct UpvalDesc {
    pub name: SmolStr,
    /// True when captured from an enclosing register, false when routed
    /// through an enclosing upvalue.
    pub in_stack: bool,
    pub index: u8,
}

pub struct FuncState {
    pub proto: Proto,
    pub consts: HashMap<ConstKey, u32, RandomState>,
    pub blocks: Vec<BlockCnt>,
    pub actvar: Vec<ActiveLocal>,
    pub upvalues: Vec<UpvalDesc>,
    /// First free register; everything below is a live local or pending
    /// temporary.
    pub freereg: u32,
    /// Line attributed to the next emitted instruction.
    pub cur_line: u32,
    /// Pending list of jumps targeting the next instruction.
    pub jpc: i32,
    /// Highest pc that is a jump target (guards peephole merging).
    pub last_target: i32,
    /// Locals declared but not yet in scope (between declaration and the
    /// end of their initializing expression list).
    pending_locals: usize,
    pub chunk: SmolStr,
}

impl FuncState {
    pub fn new(chunk: SmolStr, source: SmolStr, is_vararg: bool) -> Self {
        let mut proto = Proto::new(source);
        proto.is_vararg = is_vararg;
        FuncState {
            proto,
            consts: HashMap::with_hasher(RandomState::new()),
            blocks: Vec::new(),
            actvar: Vec::new(),
            upvalues: Vec::new(),
            freereg: 0,
            cur_line: 0,
            jpc: NO_JUMP,
            last_target: -1,
            pending_locals: 0,
            chunk,
        }
    }

    #[inline]
    pub fn nactvar(&self) -> u32 {
        self.actvar.len() as u32
    }

    #[inline]
    pub fn pc(&self) -> usize {
        self.proto.code.len()
    }

    pub fn compile_error(&self, message: impl Into<String>) -> LuaError {
        LuaError::Compile {
            chunk: self.chunk.clone(),
            line: self.cur_line,
            message: message.into(),
        }
    }

    // ============ Locals ============

    /// Declare a local occupying the next register. The variable is not
    /// active (visible) until `activate_locals`.
    pub fn new_local(&mut self, name: SmolStr) -> LuaResult<()> {
        if self.actvar.len() + self.pending_locals >= MAX_LOCALS {
            return Err(self.compile_error("too many local variables"));
        }
        self.proto.local_vars.push(LocalVarInfo {
            name,
            start_pc: 0,
            end_pc: 0,
        });
        self.pending_locals += 1;
        Ok(())
    }

    /// Bring the `n` oldest pending locals into scope at the current pc.
    pub fn activate_locals(&mut self, n: usize) {
        let pc = self.pc() as u32;
        let total = self.proto.local_vars.len();
        let first = total - self.pending_locals;
        for i in first..first + n {
            self.proto.local_vars[i].start_pc = pc;
            self.actvar.push(ActiveLocal {
                name: self.proto.local_vars[i].name.clone(),
                info_index: i,
            });
        }
        self.pending_locals -= n;
    }

    /// Deactivate locals down to `to_level`, recording their end pc.
    pub fn remove_locals(&mut self, to_level: u32) {
        let pc = self.pc() as u32;
        while self.nactvar() > to_level {
            if let Some(local) = self.actvar.pop() {
                self.proto.local_vars[local.info_index].end_pc = pc;
            }
        }
    }

    /// Register of an active local by search from the innermost scope.
    pub fn search_local(&self, name: &str) -> Option<u32> {
        self.actvar
            .iter()
            .rposition(|l| l.name == name)
            .map(|i| i as u32)
    }

    // ============ Registers ============

    pub fn reserve_regs(&mut self, n: u32) -> LuaResult<()> {
        if self.freereg + n > MAX_REGISTERS {
            return Err(self.compile_error("function or expression too complex"));
        }
        self.freereg += n;
        if self.freereg > self.proto.max_stack_size as u32 {
            self.proto.max_stack_size = self.freereg as u8;
        }
        Ok(())
    }

    /// Release one temporary (LIFO). Locals are never released here.
    pub fn free_reg(&mut self, reg: u32) {
        if reg >= self.nactvar() && reg < self.freereg {
            self.freereg -= 1;
            debug_assert_eq!(reg, self.freereg, "temporaries must free in LIFO order");
        }
    }

    /// Guarantee `n` registers of headroom above freereg without
    /// allocating them (scratch space for TFORLOOP's iterator call).
    pub fn check_stack(&mut self, n: u32) -> LuaResult<()> {
        let need = self.freereg + n;
        if need > MAX_REGISTERS {
            return Err(self.compile_error("function or expression too complex"));
        }
        if need > self.proto.max_stack_size as u32 {
            self.proto.max_stack_size = need as u8;
        }
        Ok(())
    }

    // ============ Constants ============

    pub fn add_constant(&mut self, key: ConstKey, value: crate::lua_value::LuaValue) -> LuaResult<u32> {
        if let Some(&idx) = self.consts.get(&key) {
            return Ok(idx);
        }
        if self.proto.constants.len() >= MAX_CONSTANTS {
            return Err(self.compile_error("constant table overflow"));
        }
        let idx = self.proto.constants.len() as u32;
        self.proto.constants.push(value);
        self.consts.insert(key, idx);
        Ok(idx)
    }

    pub fn number_k(&mut self, n: f64) -> LuaResult<u32> {
        self.add_constant(ConstKey::Num(n.to_bits()), crate::lua_value::LuaValue::Number(n))
    }

    pub fn bool_k(&mut self, b: bool) -> LuaResult<u32> {
        let key = if b { ConstKey::True } else { ConstKey::False };
        self.add_constant(key, crate::lua_value::LuaValue::Boolean(b))
    }

    pub fn nil_k(&mut self) -> LuaResult<u32> {
        self.add_constant(ConstKey::Nil, crate::lua_value::LuaValue::Nil)
    }

    pub fn string_k(&mut self, id: StringId) -> LuaResult<u32> {
        self.add_constant(ConstKey::Str(id), crate::lua_value::LuaValue::Str(id))
    }

    // ============ Upvalues ============

    /// Find or add an upvalue descriptor; dedupes on (in_stack, index).
    pub fn index_upvalue(&mut self, name: &SmolStr, in_stack: bool, index: u32) -> LuaResult<u32> {
        for (i, u) in self.upvalues.iter().enumerate() {
            if u.in_stack == in_stack && u.index as u32 == index {
                return Ok(i as u32);
            }
        }
        if self.upvalues.len() >= MAX_UPVALUES {
            return Err(self.compile_error("too many upvalues"));
        }
        self.upvalues.push(UpvalDesc {
            name: name.clone(),
            in_stack,
            index: index as u8,
        });
        Ok((self.upvalues.len() - 1) as u32)
    }

    /// Mark the innermost block containing the local at `level` as having
    /// a captured variable, so scope exit emits CLOSE.
    pub fn mark_upval_block(&mut self, level: u32) {
        for bl in self.blocks.iter_mut().rev() {
            if (bl.nactvar as u32) <= level {
                bl.upval = true;
                return;
            }
        }
    }
}

impl FuncState {
    pub fn has_block_upval(&self) -> bool {
        self.blocks.last().map(|b| b.upval).unwrap_or(false)
    }
}
