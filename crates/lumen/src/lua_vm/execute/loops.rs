// Numeric and generic for loops.
//
// Numeric for keeps (index, limit, step) in three hidden registers with
// the visible variable in the fourth; FORPREP pre-subtracts the step so
// the first FORLOOP add lands on the start value. The direction of the
// bound test follows the sign of the step; a zero step raises.

use crate::lua_value::LuaValue;
use crate::lua_vm::state::LuaVM;
use crate::lua_vm::LuaResult;

impl LuaVM {
    pub(crate) fn op_forprep(&mut self, ra: usize, sbx: i32) -> LuaResult<()> {
        let init = match self.to_number(&self.stack[ra]) {
            Some(n) => n,
            None => return Err(self.rt_error("'for' initial value must be a number")),
        };
        let limit = match self.to_number(&self.stack[ra + 1]) {
            Some(n) => n,
            None => return Err(self.rt_error("'for' limit must be a number")),
        };
        let step = match self.to_number(&self.stack[ra + 2]) {
            Some(n) => n,
            None => return Err(self.rt_error("'for' step must be a number")),
        };
        if step == 0.0 {
            return Err(self.rt_error("'for' step is zero"));
        }
        self.stack[ra] = LuaValue::Number(init - step);
        self.stack[ra + 1] = LuaValue::Number(limit);
        self.stack[ra + 2] = LuaValue::Number(step);
        let frame = self.cur_frame_mut();
        frame.pc = (frame.pc as i64 + sbx as i64) as usize;
        Ok(())
    }

    pub(crate) fn op_forloop(&mut self, ra: usize, sbx: i32) -> LuaResult<()> {
        let step = match self.stack[ra + 2] {
            LuaValue::Number(n) => n,
            _ => return Err(self.rt_error("'for' step must be a number")),
        };
        let idx = match self.stack[ra] {
            LuaValue::Number(n) => n + step,
            _ => return Err(self.rt_error("'for' initial value must be a number")),
        };
        let limit = match self.stack[ra + 1] {
            LuaValue::Number(n) => n,
            _ => return Err(self.rt_error("'for' limit must be a number")),
        };
        let continues = if step > 0.0 { idx <= limit } else { idx >= limit };
        if continues {
            self.stack[ra] = LuaValue::Number(idx);
            self.stack[ra + 3] = LuaValue::Number(idx);
            let frame = self.cur_frame_mut();
            frame.pc = (frame.pc as i64 + sbx as i64) as usize;
        }
        Ok(())
    }

    /// OP_TFORLOOP: call the iterator R(A) with (state, control) and put
    /// up to C results at R(A+3)... If the first result is non-nil it
    /// becomes the new control variable and the following JMP runs;
    /// otherwise the JMP is skipped and the loop ends.
    pub(crate) fn op_tforloop(&mut self, ra: usize, c: usize) -> LuaResult<()> {
        let cb = ra + 3;
        self.ensure_stack(cb + 3)?;
        self.stack[cb] = self.stack[ra];
        self.stack[cb + 1] = self.stack[ra + 1];
        self.stack[cb + 2] = self.stack[ra + 2];
        self.stack.truncate(cb + 3);
        self.call_value(cb, 2, c as i32)?;
        // The call may have shrunk the window below us; rebuild it.
        let need = {
            let frame = self.cur_frame();
            let proto = frame.proto.as_ref().expect("host frame in dispatch loop");
            frame.base + proto.max_stack_size as usize
        };
        if self.stack.len() < need {
            self.stack.resize(need, LuaValue::Nil);
        }

        let first = self.stack[cb];
        if !first.is_nil() {
            self.stack[cb - 1] = first;
            let offset = {
                let frame = self.cur_frame();
                let proto = frame.proto.as_ref().expect("host frame in dispatch loop");
                crate::lua_vm::opcode::Instruction::get_sbx(proto.code[frame.pc])
            };
            let frame = self.cur_frame_mut();
            frame.pc = (frame.pc as i64 + 1 + offset as i64) as usize;
        } else {
            self.cur_frame_mut().pc += 1;
        }
        Ok(())
    }
}
