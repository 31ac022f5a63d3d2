// The dispatch loop: fetch, decode, execute.
//
// Registers of the running frame are the absolute stack slots
// base..base+max_stack_size. The loop runs frames pushed above
// `entry_depth` to completion; OP_CALL pushes Lua frames without Rust
// recursion, while host functions and metamethods re-enter through
// `call_value`, which nests another loop.

mod arith;
mod call;
mod compare;
mod concat;
mod loops;
mod table_ops;

use crate::gc::LuaFunction;
use crate::lua_value::LuaValue;
use crate::lua_vm::opcode::{Instruction, OpCode};
use crate::lua_vm::state::LuaVM;
use crate::lua_vm::{LuaError, LuaResult};

/// Upper bound on metatable indirection chains (loop in gettable).
pub(crate) const MAX_TAG_LOOP: usize = 100;

impl LuaVM {
    /// Execute until the frame stack drains back to `entry_depth`.
    /// On error, unwinds the frames this invocation owns (closing their
    /// upvalues) before propagating.
    pub(crate) fn run(&mut self, entry_depth: usize) -> LuaResult<()> {
        debug_assert!(self.frames.len() > entry_depth);
        loop {
            match self.step_instruction(entry_depth) {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => {
                    while self.frames.len() > entry_depth {
                        if let Some(f) = self.frames.pop() {
                            self.close_upvalues(f.base);
                        }
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Execute one instruction of the top frame. Returns Ok(true) when
    /// the frame stack has drained to `entry_depth`.
    fn step_instruction(&mut self, entry_depth: usize) -> LuaResult<bool> {
        let (i, base) = {
            let frame = self.frames.last_mut().expect("no running frame");
            let proto = frame.proto.as_ref().expect("host frame in dispatch loop");
            debug_assert!(frame.pc < proto.code.len(), "pc ran off the bytecode");
            let i = proto.code[frame.pc];
            frame.pc += 1;
            (i, frame.base)
        };
        let a = Instruction::get_a(i) as usize;

        match Instruction::get_opcode(i) {
            OpCode::Move => {
                let b = Instruction::get_b(i) as usize;
                self.stack[base + a] = self.stack[base + b];
            }
            OpCode::LoadK => {
                let bx = Instruction::get_bx(i) as usize;
                self.stack[base + a] = self.constant(bx);
            }
            OpCode::LoadBool => {
                let b = Instruction::get_b(i);
                let c = Instruction::get_c(i);
                self.stack[base + a] = LuaValue::Boolean(b != 0);
                if c != 0 {
                    self.cur_frame_mut().pc += 1;
                }
            }
            OpCode::LoadNil => {
                let b = Instruction::get_b(i) as usize;
                for r in a..=b {
                    self.stack[base + r] = LuaValue::Nil;
                }
            }
            OpCode::GetUpval => {
                let b = Instruction::get_b(i) as usize;
                let uid = self.cur_lua_upvalue(b)?;
                self.stack[base + a] = self.upvalue_value(uid);
            }
            OpCode::SetUpval => {
                let b = Instruction::get_b(i) as usize;
                let uid = self.cur_lua_upvalue(b)?;
                let v = self.stack[base + a];
                self.set_upvalue_value(uid, v);
            }
            OpCode::GetGlobal => {
                let bx = Instruction::get_bx(i) as usize;
                let key = self.constant(bx);
                let env = self.cur_env();
                let v = self.index_value(LuaValue::Table(env), key)?;
                self.stack[base + a] = v;
            }
            OpCode::SetGlobal => {
                let bx = Instruction::get_bx(i) as usize;
                let key = self.constant(bx);
                let env = self.cur_env();
                let v = self.stack[base + a];
                self.set_index_value(LuaValue::Table(env), key, v)?;
            }
            OpCode::GetTable => {
                let b = Instruction::get_b(i) as usize;
                let c = Instruction::get_c(i);
                let t = self.stack[base + b];
                let key = self.rk(base, c);
                self.stack[base + a] = self.index_value(t, key)?;
            }
            OpCode::SetTable => {
                let b = Instruction::get_b(i);
                let c = Instruction::get_c(i);
                let t = self.stack[base + a];
                let key = self.rk(base, b);
                let v = self.rk(base, c);
                self.set_index_value(t, key, v)?;
            }
            OpCode::NewTable => {
                let b = Instruction::get_b(i);
                let c = Instruction::get_c(i);
                let tid = self.new_table(
                    Instruction::fb2int(b) as usize,
                    Instruction::fb2int(c) as usize,
                );
                self.stack[base + a] = LuaValue::Table(tid);
                self.check_gc();
            }
            OpCode::Self_ => {
                let b = Instruction::get_b(i) as usize;
                let c = Instruction::get_c(i);
                let obj = self.stack[base + b];
                let key = self.rk(base, c);
                self.stack[base + a + 1] = obj;
                self.stack[base + a] = self.index_value(obj, key)?;
            }
            op @ (OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Pow) => {
                let b = Instruction::get_b(i);
                let c = Instruction::get_c(i);
                let lhs = self.rk(base, b);
                let rhs = self.rk(base, c);
                self.stack[base + a] = self.arith(op, lhs, rhs)?;
            }
            OpCode::Unm => {
                let b = Instruction::get_b(i) as usize;
                let v = self.stack[base + b];
                self.stack[base + a] = self.arith_unm(v)?;
            }
            OpCode::Not => {
                let b = Instruction::get_b(i) as usize;
                let v = self.stack[base + b];
                self.stack[base + a] = LuaValue::Boolean(v.is_falsy());
            }
            OpCode::Len => {
                let b = Instruction::get_b(i) as usize;
                let v = self.stack[base + b];
                self.stack[base + a] = self.length_of(v)?;
            }
            OpCode::Concat => {
                let b = Instruction::get_b(i) as usize;
                let c = Instruction::get_c(i) as usize;
                let v = self.concat_range(base + b, base + c)?;
                self.stack[base + a] = v;
                self.check_gc();
            }
            OpCode::Jmp => {
                self.do_jump(Instruction::get_sbx(i));
            }
            op @ (OpCode::Eq | OpCode::Lt | OpCode::Le) => {
                let b = Instruction::get_b(i);
                let c = Instruction::get_c(i);
                let lhs = self.rk(base, b);
                let rhs = self.rk(base, c);
                let res = match op {
                    OpCode::Eq => self.values_equal(&lhs, &rhs)?,
                    OpCode::Lt => self.less_than(&lhs, &rhs)?,
                    _ => self.less_equal(&lhs, &rhs)?,
                };
                if res != (a != 0) {
                    self.cur_frame_mut().pc += 1;
                }
            }
            OpCode::Test => {
                let c = Instruction::get_c(i);
                let truthy = self.stack[base + a].is_truthy();
                if truthy != (c != 0) {
                    self.cur_frame_mut().pc += 1;
                }
            }
            OpCode::TestSet => {
                let b = Instruction::get_b(i) as usize;
                let c = Instruction::get_c(i);
                let v = self.stack[base + b];
                if v.is_truthy() == (c != 0) {
                    self.stack[base + a] = v;
                } else {
                    self.cur_frame_mut().pc += 1;
                }
            }
            OpCode::Call => {
                let b = Instruction::get_b(i) as usize;
                let c = Instruction::get_c(i) as usize;
                self.op_call(base + a, b, c)?;
            }
            OpCode::TailCall => {
                let b = Instruction::get_b(i) as usize;
                if self.op_tailcall(base + a, b)? && self.frames.len() <= entry_depth {
                    return Ok(true);
                }
            }
            OpCode::Return => {
                let b = Instruction::get_b(i) as usize;
                self.op_return(base + a, b)?;
                if self.frames.len() <= entry_depth {
                    return Ok(true);
                }
            }
            OpCode::ForLoop => {
                self.op_forloop(base + a, Instruction::get_sbx(i))?;
            }
            OpCode::ForPrep => {
                self.op_forprep(base + a, Instruction::get_sbx(i))?;
            }
            OpCode::TForLoop => {
                let c = Instruction::get_c(i) as usize;
                self.op_tforloop(base + a, c)?;
            }
            OpCode::SetList => {
                let b = Instruction::get_b(i) as usize;
                let c = Instruction::get_c(i) as usize;
                self.op_setlist(base + a, b, c)?;
            }
            OpCode::Close => {
                self.close_upvalues(base + a);
            }
            OpCode::Closure => {
                let bx = Instruction::get_bx(i) as usize;
                self.op_closure(base + a, bx)?;
                self.check_gc();
            }
            OpCode::Vararg => {
                let b = Instruction::get_b(i) as usize;
                self.op_vararg(base + a, b)?;
            }
        }
        Ok(false)
    }

    // ============ Frame helpers ============

    #[inline(always)]
    pub(crate) fn cur_frame_mut(&mut self) -> &mut crate::lua_vm::frame::CallFrame {
        self.frames.last_mut().expect("no running frame")
    }

    #[inline(always)]
    pub(crate) fn cur_frame(&self) -> &crate::lua_vm::frame::CallFrame {
        self.frames.last().expect("no running frame")
    }

    #[inline]
    fn do_jump(&mut self, offset: i32) {
        let frame = self.cur_frame_mut();
        frame.pc = (frame.pc as i64 + offset as i64) as usize;
    }

    /// Constant `idx` of the running prototype.
    #[inline]
    pub(crate) fn constant(&self, idx: usize) -> LuaValue {
        let frame = self.cur_frame();
        let proto = frame.proto.as_ref().expect("host frame in dispatch loop");
        proto.constants[idx]
    }

    /// Decode an RK operand: register, or constant when the high bit set.
    #[inline]
    pub(crate) fn rk(&self, base: usize, field: u32) -> LuaValue {
        if Instruction::is_k(field) {
            self.constant(Instruction::index_k(field) as usize)
        } else {
            self.stack[base + field as usize]
        }
    }

    /// Environment table of the running closure.
    pub(crate) fn cur_env(&self) -> crate::gc::TableId {
        let frame = self.cur_frame();
        match frame.func.as_function_id() {
            Some(fid) => self.pool.function(fid).env(),
            None => self.globals(),
        }
    }

    /// Upvalue `idx` of the running Lua closure.
    fn cur_lua_upvalue(&mut self, idx: usize) -> LuaResult<crate::gc::UpvalueId> {
        let frame = self.cur_frame();
        let fid = match frame.func.as_function_id() {
            Some(fid) => fid,
            None => return Err(self.rt_error("no closure for upvalue access")),
        };
        match self.pool.function(fid) {
            LuaFunction::Lua { upvalues, .. } => match upvalues.get(idx) {
                Some(&uid) => Ok(uid),
                None => Err(self.rt_error("upvalue index out of range")),
            },
            LuaFunction::Host { .. } => Err(self.rt_error("no closure for upvalue access")),
        }
    }

    /// Stack-overflow guard shared by the re-entrant call paths.
    pub(crate) fn enter_nested(&mut self) -> LuaResult<()> {
        self.nested_calls += 1;
        if self.nested_calls > crate::lua_vm::state::MAX_NESTED_CALLS {
            self.nested_calls -= 1;
            return Err(LuaError::StackOverflow);
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn leave_nested(&mut self) {
        self.nested_calls -= 1;
    }
}
