// Value-level data structures: the tagged value, the hybrid table, the
// function prototype, and userdata.

mod table;
mod value;

pub use table::{LuaTable, TableKey};
pub use value::{number_to_string, str_to_number, LuaValue};

use smol_str::SmolStr;
use std::any::Any;
use std::rc::Rc;

use crate::gc::TableId;
use crate::lua_vm::{Instruction, OpMode};

/// How a closure sources one upvalue when it is built: either from a
/// register of the enclosing function (`in_stack`) or from one of the
/// enclosing function's own upvalues.
#[derive(Debug, Clone)]
pub struct UpvalueDesc {
    pub name: SmolStr,
    pub in_stack: bool,
    pub index: u8,
}

/// Debug scope of one named local inside a prototype.
#[derive(Debug, Clone)]
pub struct LocalVarInfo {
    pub name: SmolStr,
    pub start_pc: u32,
    pub end_pc: u32,
}

/// Compile-time, immutable description of one function body: bytecode,
/// constant pool, nested prototypes, upvalue descriptors and debug info.
/// Prototypes form a tree and never reference the mutable heap, so they
/// are shared by plain reference counting rather than the GC arena.
pub struct Proto {
    pub code: Vec<u32>,
    pub constants: Vec<LuaValue>,
    pub protos: Vec<Rc<Proto>>,
    pub upvalue_descs: Vec<UpvalueDesc>,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    pub source: SmolStr,
    pub line_defined: u32,
    pub last_line_defined: u32,
    pub line_info: Vec<u32>,
    pub local_vars: Vec<LocalVarInfo>,
}

impl Proto {
    pub fn new(source: SmolStr) -> Self {
        Proto {
            code: Vec::new(),
            constants: Vec::new(),
            protos: Vec::new(),
            upvalue_descs: Vec::new(),
            num_params: 0,
            is_vararg: false,
            max_stack_size: 2,
            source,
            line_defined: 0,
            last_line_defined: 0,
            line_info: Vec::new(),
            local_vars: Vec::new(),
        }
    }

    /// Source line for the instruction at `pc`, for error messages.
    pub fn line_at(&self, pc: usize) -> u32 {
        self.line_info.get(pc).copied().unwrap_or(0)
    }

    /// Human-readable listing of the bytecode, one instruction per line.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out, 0);
        out
    }

    fn disassemble_into(&self, out: &mut String, depth: usize) {
        use std::fmt::Write;
        let indent = "  ".repeat(depth);
        let _ = writeln!(
            out,
            "{}function <{}:{}> ({} instructions, {} constants, {} upvalues)",
            indent,
            self.source,
            self.line_defined,
            self.code.len(),
            self.constants.len(),
            self.upvalue_descs.len()
        );
        for (pc, &i) in self.code.iter().enumerate() {
            let op = Instruction::get_opcode(i);
            let line = self.line_at(pc);
            let args = match op.mode() {
                OpMode::IABC => format!(
                    "{} {} {}",
                    Instruction::get_a(i),
                    Instruction::get_b(i),
                    Instruction::get_c(i)
                ),
                OpMode::IABx => format!("{} {}", Instruction::get_a(i), Instruction::get_bx(i)),
                OpMode::IAsBx => {
                    format!("{} {}", Instruction::get_a(i), Instruction::get_sbx(i))
                }
            };
            let _ = writeln!(out, "{}  [{:>3}] {:<10} {} ; line {}", indent, pc, op.name(), args, line);
        }
        for p in &self.protos {
            p.disassemble_into(out, depth + 1);
        }
    }

    /// Walk the constant pools of this prototype tree, calling `f` on
    /// every constant. Used by the GC to keep interned constants alive
    /// while a closure over this proto is reachable.
    pub fn for_each_constant(&self, f: &mut impl FnMut(&LuaValue)) {
        for k in &self.constants {
            f(k);
        }
        for p in &self.protos {
            p.for_each_constant(f);
        }
    }
}

/// Opaque host-owned payload with an optional metatable.
pub struct LuaUserdata {
    pub data: Box<dyn Any>,
    pub meta: Option<TableId>,
}

impl LuaUserdata {
    pub fn new(data: Box<dyn Any>) -> Self {
        LuaUserdata { data, meta: None }
    }
}
