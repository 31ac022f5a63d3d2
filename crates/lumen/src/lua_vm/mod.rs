// The virtual machine: instruction codec, call frames, the interpreter
// state, the dispatch loop, and the base host functions.

mod baselib;
mod error;
mod execute;
mod frame;
mod opcode;
mod state;

pub use error::{LuaError, LuaResult};
pub use frame::{CallFrame, MULTRET};
pub use opcode::{Instruction, OpCode, OpMode};
pub use state::{CFunction, LuaVM, MetaKeys};
