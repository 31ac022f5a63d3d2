// Compiler - AST to Proto.
//
// A stack of FuncStates mirrors the lexical nesting of function bodies;
// name resolution climbs it, turning captured enclosing locals into
// upvalue descriptors level by level. Code emission lives on FuncState
// (code.rs); statement and expression walking live in stmt.rs/expr.rs.

mod ast;
mod code;
mod expdesc;
mod expr;
mod func_state;
mod lexer;
mod parser;
mod stmt;
mod token;

pub use ast::{BinOp, Block, Expression, Statement, UnOp};
pub use lexer::Lexer;
pub use parser::Parser;
pub use token::{Token, TokenKind};

use smol_str::SmolStr;
use std::rc::Rc;

use crate::gc::{ObjectPool, StringId, StringInterner};
use crate::lua_value::{Proto, UpvalueDesc};
use crate::lua_vm::{LuaResult, OpCode};

use expdesc::{ExpDesc, ExpKind, NO_JUMP};
use func_state::{BlockCnt, FuncState};

/// Compiler tuning. Folding is on by default like the reference
/// compiler; turning it off must never change observable behavior.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub constant_folding: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            constant_folding: true,
        }
    }
}

pub struct Compiler<'a> {
    chunk: SmolStr,
    options: CompileOptions,
    interner: &'a mut StringInterner,
    pool: &'a mut ObjectPool,
    white: u8,
    states: Vec<FuncState>,
}

impl<'a> Compiler<'a> {
    pub fn new(
        chunk: SmolStr,
        options: CompileOptions,
        interner: &'a mut StringInterner,
        pool: &'a mut ObjectPool,
        white: u8,
    ) -> Self {
        Compiler {
            chunk,
            options,
            interner,
            pool,
            white,
            states: Vec::new(),
        }
    }

    /// Compile a whole chunk as a vararg top-level function.
    pub fn compile_chunk(mut self, block: &Block) -> LuaResult<Proto> {
        self.states
            .push(FuncState::new(self.chunk.clone(), self.chunk.clone(), true));
        self.compile_statements(block)?;
        self.close_function()
    }

    // ============ FuncState plumbing ============

    #[inline]
    pub(crate) fn fs(&mut self) -> &mut FuncState {
        self.states.last_mut().expect("no open function")
    }

    pub(crate) fn intern(&mut self, bytes: &[u8]) -> StringId {
        self.interner.intern(bytes, self.pool, self.white)
    }

    /// Constant-pool index for a string literal or identifier.
    pub(crate) fn string_constant(&mut self, bytes: &[u8]) -> LuaResult<u32> {
        let id = self.intern(bytes);
        self.fs().string_k(id)
    }

    /// Open a nested function; parameters become its first locals.
    pub(crate) fn open_function(&mut self, body: &ast::FuncBody) -> LuaResult<()> {
        let mut fs = FuncState::new(self.chunk.clone(), self.chunk.clone(), body.is_vararg);
        fs.proto.line_defined = body.line;
        fs.proto.last_line_defined = body.end_line;
        fs.proto.num_params = body.params.len() as u8;
        fs.cur_line = body.line;
        self.states.push(fs);
        for p in &body.params {
            self.fs().new_local(p.clone())?;
        }
        let n = body.params.len();
        self.fs().activate_locals(n);
        self.fs().reserve_regs(n as u32)?;
        Ok(())
    }

    /// Seal the current function: final implicit return, debug cleanup,
    /// and conversion of the FuncState into a Proto.
    pub(crate) fn close_function(&mut self) -> LuaResult<Proto> {
        let fs = self.fs();
        fs.emit_return(0, 0);
        fs.remove_locals(0);
        let fs = self.states.pop().expect("no open function");
        let mut proto = fs.proto;
        proto.upvalue_descs = fs
            .upvalues
            .iter()
            .map(|u| UpvalueDesc {
                name: u.name.clone(),
                in_stack: u.in_stack,
                index: u.index,
            })
            .collect();
        Ok(proto)
    }

    /// Compile a function body in a fresh FuncState and emit the CLOSURE
    /// (plus its upvalue pseudo-instructions) in the enclosing one.
    pub(crate) fn function_body(&mut self, body: &ast::FuncBody) -> LuaResult<ExpDesc> {
        self.open_function(body)?;
        self.compile_statements(&body.block)?;
        let proto = self.close_function()?;
        let ups: Vec<(bool, u8)> = proto
            .upvalue_descs
            .iter()
            .map(|u| (u.in_stack, u.index))
            .collect();
        let fs = self.fs();
        let idx = fs.proto.protos.len() as u32;
        if idx > crate::lua_vm::Instruction::MAX_BX {
            return Err(fs.compile_error("too many nested functions"));
        }
        fs.proto.protos.push(Rc::new(proto));
        let pc = fs.code_abx(OpCode::Closure, 0, idx);
        for (in_stack, index) in ups {
            let op = if in_stack {
                OpCode::Move
            } else {
                OpCode::GetUpval
            };
            fs.code_abc(op, 0, index as u32, 0);
        }
        Ok(ExpDesc::new(ExpKind::VReloc, pc as i32))
    }

    // ============ Blocks and scopes ============

    pub(crate) fn enter_block(&mut self, is_breakable: bool) {
        let nactvar = self.fs().nactvar() as u8;
        self.fs().blocks.push(BlockCnt {
            breaklist: NO_JUMP,
            nactvar,
            upval: false,
            is_breakable,
        });
    }

    pub(crate) fn leave_block(&mut self) -> LuaResult<()> {
        let fs = self.fs();
        let bl = fs.blocks.pop().expect("unbalanced block");
        fs.remove_locals(bl.nactvar as u32);
        if bl.upval {
            fs.code_abc(OpCode::Close, bl.nactvar as u32, 0, 0);
        }
        fs.freereg = fs.nactvar();
        fs.patch_to_here(bl.breaklist)
    }

    /// Statement list without its own scope (function bodies; blocks
    /// that manage scope themselves wrap this).
    pub(crate) fn compile_statements(&mut self, block: &Block) -> LuaResult<()> {
        for stmt in &block.stmts {
            self.fs().cur_line = stmt.line();
            self.compile_statement(stmt)?;
            let fs = self.fs();
            fs.freereg = fs.nactvar();
        }
        Ok(())
    }

    /// Statement list in its own lexical scope.
    pub(crate) fn compile_scoped_block(&mut self, block: &Block) -> LuaResult<()> {
        self.enter_block(false);
        self.compile_statements(block)?;
        self.leave_block()
    }

    // ============ Variable resolution ============

    /// Resolve a name: local, upvalue chain, or global access.
    pub(crate) fn single_var(&mut self, name: &SmolStr) -> LuaResult<ExpDesc> {
        let top = self.states.len() - 1;
        match self.resolve_var(top, name)? {
            Some(e) => Ok(e),
            None => {
                let k = self.string_constant(name.as_bytes())?;
                Ok(ExpDesc::new(ExpKind::VGlobal, k as i32))
            }
        }
    }

    /// Look `name` up at `level`; recursing outward adds an upvalue
    /// descriptor at every level between the definition and the use, and
    /// marks the defining block so it closes the captured register.
    fn resolve_var(&mut self, level: usize, name: &SmolStr) -> LuaResult<Option<ExpDesc>> {
        if let Some(reg) = self.states[level].search_local(name) {
            return Ok(Some(ExpDesc::new(ExpKind::VLocal, reg as i32)));
        }
        if level == 0 {
            return Ok(None);
        }
        let outer = match self.resolve_var(level - 1, name)? {
            Some(e) => e,
            None => return Ok(None),
        };
        let (in_stack, index) = match outer.kind {
            ExpKind::VLocal => {
                self.states[level - 1].mark_upval_block(outer.info as u32);
                (true, outer.info as u32)
            }
            ExpKind::VUpval => (false, outer.info as u32),
            _ => unreachable!("resolve_var returns locals or upvalues"),
        };
        let idx = self.states[level].index_upvalue(name, in_stack, index)?;
        Ok(Some(ExpDesc::new(ExpKind::VUpval, idx as i32)))
    }
}
