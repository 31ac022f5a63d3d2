// Lumen - a Lua 5.1 virtual machine and bytecode compiler in Rust.
//
// Pipeline: source text -> lexer -> parser (AST) -> compiler (register
// bytecode, binary-compatible with the 5.1 reference layout) -> VM, with
// a tri-color incremental garbage collector underneath.

#[cfg(test)]
mod test;

pub mod compiler;
pub mod gc;
pub mod lua_value;
pub mod lua_vm;

pub use compiler::{CompileOptions, Compiler};
pub use gc::{GcParams, GcStats, ObjectPool, StringId, TableId};
pub use lua_value::{LuaTable, LuaValue, Proto};
pub use lua_vm::{CFunction, Instruction, LuaError, LuaResult, LuaVM, OpCode};

/// Compile and run a chunk in a fresh VM with the base library open;
/// returns the chunk's first return value.
pub fn execute(source: &str) -> LuaResult<LuaValue> {
    let mut vm = LuaVM::new();
    vm.open_libs();
    vm.execute_string(source)
}

/// Compile and run a chunk against an existing VM.
pub fn execute_with_vm(vm: &mut LuaVM, source: &str) -> LuaResult<LuaValue> {
    vm.execute_string(source)
}
