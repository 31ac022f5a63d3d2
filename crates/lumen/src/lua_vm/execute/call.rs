// Call, return and closure machinery.
//
// Lua-to-Lua calls stay inside one dispatch loop (a frame push); host
// functions and metamethods nest through `call_value`, which runs its own
// loop until its frame returns. Tail calls reuse the caller's frame slot
// and close the caller's upvalues first.

use std::rc::Rc;

use crate::gc::LuaFunction;
use crate::lua_value::{LuaValue, Proto};
use crate::lua_vm::frame::{CallFrame, MULTRET};
use crate::lua_vm::opcode::{Instruction, OpCode};
use crate::lua_vm::state::LuaVM;
use crate::lua_vm::LuaResult;

pub(crate) enum PreCall {
    /// A Lua frame was pushed; the dispatch loop continues into it.
    Lua,
    /// A host function ran to completion; results are already placed.
    Host(usize),
}

impl LuaVM {
    /// OP_CALL: R(A)..R(A+C-2) := R(A)(R(A+1)..R(A+B-1)).
    pub(crate) fn op_call(&mut self, func_idx: usize, b: usize, c: usize) -> LuaResult<()> {
        let nargs = if b == 0 {
            self.cur_frame().top - func_idx - 1
        } else {
            b - 1
        };
        let nresults = if c == 0 { MULTRET } else { (c - 1) as i32 };
        self.precall(func_idx, nargs, nresults)?;
        Ok(())
    }

    /// OP_TAILCALL: return R(A)(R(A+1)..R(A+B-1)) reusing this frame.
    /// Returns true when the call completed synchronously (host callee),
    /// which ends the current function like a RETURN would.
    pub(crate) fn op_tailcall(&mut self, func_idx: usize, b: usize) -> LuaResult<bool> {
        let (base, return_base, wanted, top) = {
            let f = self.cur_frame();
            (f.base, f.return_base, f.expected_results, f.top)
        };
        let nargs = if b == 0 { top - func_idx - 1 } else { b - 1 };

        self.close_upvalues(base);

        // Slide callable + args down over the finished frame.
        for i in 0..=nargs {
            self.stack[return_base + i] = self.stack[func_idx + i];
        }
        self.stack.truncate(return_base + nargs + 1);
        self.frames.pop();

        match self.precall(return_base, nargs, wanted)? {
            PreCall::Lua => {
                self.cur_frame_mut().set_tail();
                Ok(false)
            }
            PreCall::Host(_) => {
                // The whole tail-called function already returned; restore
                // the caller's register window like op_return does.
                self.restore_caller_window();
                Ok(true)
            }
        }
    }

    /// OP_RETURN: return R(A)..R(A+B-2); close upvalues, copy results to
    /// the caller's destination, pop the frame.
    pub(crate) fn op_return(&mut self, first: usize, b: usize) -> LuaResult<()> {
        let (base, return_base, wanted, top) = {
            let f = self.cur_frame();
            (f.base, f.return_base, f.expected_results, f.top)
        };
        let nres = if b == 0 { top - first } else { b - 1 };

        self.close_upvalues(base);

        for i in 0..nres {
            self.stack[return_base + i] = self.stack[first + i];
        }
        self.frames.pop();
        self.finish_results(return_base, nres, wanted)?;
        self.restore_caller_window();
        Ok(())
    }

    /// Pad/trim `nres` values sitting at `dst` to what the caller asked
    /// for, record the outcome for `call_value`, and keep `top` honest
    /// for a following open-argument consumer.
    fn finish_results(&mut self, dst: usize, nres: usize, wanted: i32) -> LuaResult<()> {
        let placed = if wanted == MULTRET {
            self.stack.truncate(dst + nres);
            if let Some(caller) = self.frames.last_mut() {
                caller.top = dst + nres;
            }
            nres
        } else {
            let w = wanted as usize;
            self.ensure_stack(dst + w)?;
            for i in nres..w {
                self.stack[dst + i] = LuaValue::Nil;
            }
            self.stack.truncate(dst + w);
            w
        };
        self.returned_values = placed;
        Ok(())
    }

    /// Re-extend the stack to cover the caller's register window after a
    /// return truncated it.
    fn restore_caller_window(&mut self) {
        if let Some(caller) = self.frames.last() {
            if let Some(proto) = &caller.proto {
                let need = caller.base + proto.max_stack_size as usize;
                if self.stack.len() < need {
                    self.stack.resize(need, LuaValue::Nil);
                }
            }
        }
    }

    /// Shared call entry. The callable sits at `func_idx` with `nargs`
    /// arguments above it. Lua callees get a frame; host callees run to
    /// completion here, leaving their results at `func_idx`.
    pub(crate) fn precall(
        &mut self,
        func_idx: usize,
        nargs: usize,
        nresults: i32,
    ) -> LuaResult<PreCall> {
        let callee = self.stack[func_idx];
        let fid = match callee.as_function_id() {
            Some(fid) => fid,
            None => {
                // Not a function: defer to its __call metamethod, which
                // receives the original value as first argument. One
                // level only, like the reference runtime.
                let mm = self.get_metamethod(&callee, self.meta_keys.call);
                if mm.as_function_id().is_none() {
                    let t = self.type_name_of(&callee);
                    return Err(self.rt_error(format!("attempt to call a {} value", t)));
                }
                self.stack.insert(func_idx, mm);
                return self.precall(func_idx, nargs + 1, nresults);
            }
        };

        enum Callee {
            Lua(Rc<Proto>),
            Host(crate::lua_vm::CFunction),
        }
        let kind = match self.pool.function(fid) {
            LuaFunction::Lua { proto, .. } => Callee::Lua(proto.clone()),
            LuaFunction::Host { func, .. } => Callee::Host(*func),
        };

        match kind {
            Callee::Lua(proto) => {
                let np = proto.num_params as usize;
                let arg_start = func_idx + 1;
                let max_stack = proto.max_stack_size as usize;

                let base = if proto.is_vararg {
                    // Fixed parameters move above the varargs; the frame
                    // base starts past everything the caller pushed.
                    let base = arg_start + nargs;
                    self.ensure_stack(base + max_stack)?;
                    for i in 0..np {
                        let v = if i < nargs {
                            std::mem::replace(&mut self.stack[arg_start + i], LuaValue::Nil)
                        } else {
                            LuaValue::Nil
                        };
                        self.stack[base + i] = v;
                    }
                    base
                } else {
                    self.ensure_stack(arg_start + max_stack)?;
                    arg_start
                };

                // Registers past the provided parameters start out nil:
                // missing parameters, dead extra arguments, and scratch.
                let provided = if proto.is_vararg { np } else { nargs.min(np) };
                for slot in base + provided.min(max_stack)..base + max_stack {
                    self.stack[slot] = LuaValue::Nil;
                }

                let mut frame = CallFrame::new_lua(callee, proto.clone(), base, func_idx, nresults);
                if proto.is_vararg {
                    frame.set_vararg(arg_start + np, nargs.saturating_sub(np));
                }
                if self.frames.len() >= crate::lua_vm::state::MAX_STACK {
                    return Err(crate::lua_vm::LuaError::StackOverflow);
                }
                self.frames.push(frame);
                Ok(PreCall::Lua)
            }
            Callee::Host(func) => {
                let base = func_idx + 1;
                let top = base + nargs;
                self.stack.truncate(top);
                self.frames.push(CallFrame::new_host(callee, base, top));
                let result = func(self);
                self.frames.pop();
                match result {
                    Ok(n) => {
                        let src = self.stack.len().saturating_sub(n);
                        for i in 0..n {
                            self.stack[func_idx + i] = self.stack[src + i];
                        }
                        self.finish_results(func_idx, n, nresults)?;
                        self.restore_caller_window();
                        Ok(PreCall::Host(self.returned_values))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Host-boundary call: run a callable that already sits at `func_idx`
    /// with its arguments, to completion, leaving its results there.
    /// Returns how many results were placed.
    pub(crate) fn call_value(
        &mut self,
        func_idx: usize,
        nargs: usize,
        nresults: i32,
    ) -> LuaResult<usize> {
        self.enter_nested()?;
        let entry_depth = self.frames.len();
        let result = match self.precall(func_idx, nargs, nresults) {
            Ok(PreCall::Host(n)) => Ok(n),
            Ok(PreCall::Lua) => self.run(entry_depth).map(|_| self.returned_values),
            Err(e) => {
                // precall may have left a pushed-but-unstarted frame on
                // errors below it; trim back to the entry depth.
                while self.frames.len() > entry_depth {
                    self.frames.pop();
                }
                Err(e)
            }
        };
        self.leave_nested();
        result
    }

    /// Call a metamethod with plain arguments, returning its first result.
    pub(crate) fn call_metamethod(
        &mut self,
        mm: LuaValue,
        args: &[LuaValue],
    ) -> LuaResult<LuaValue> {
        let func_idx = self.stack.len();
        self.stack.push(mm);
        self.stack.extend_from_slice(args);
        self.call_value(func_idx, args.len(), 1)?;
        let result = self.stack[func_idx];
        self.stack.truncate(func_idx);
        self.restore_caller_window();
        Ok(result)
    }

    /// OP_CLOSURE: instantiate Proto(Bx), consuming one pseudo-instruction
    /// per upvalue descriptor (MOVE binds a caller register, GETUPVAL
    /// re-shares one of the caller's upvalues).
    pub(crate) fn op_closure(&mut self, dst: usize, bx: usize) -> LuaResult<()> {
        let (child, pseudo, base, env, parent_fid) = {
            let frame = self.cur_frame();
            let proto = frame.proto.as_ref().expect("host frame in dispatch loop");
            let child = proto.protos[bx].clone();
            let nups = child.upvalue_descs.len();
            let pseudo: Vec<u32> = proto.code[frame.pc..frame.pc + nups].to_vec();
            (
                child,
                pseudo,
                frame.base,
                self.cur_env(),
                frame.func.as_function_id(),
            )
        };
        self.cur_frame_mut().pc += pseudo.len();

        let mut upvalues = Vec::with_capacity(pseudo.len());
        for word in pseudo {
            let b = Instruction::get_b(word) as usize;
            match Instruction::get_opcode(word) {
                OpCode::Move => {
                    upvalues.push(self.find_or_create_upvalue(base + b));
                }
                OpCode::GetUpval => {
                    let parent = parent_fid
                        .ok_or_else(|| self.rt_error("closure outside of a closure"))?;
                    match self.pool.function(parent) {
                        LuaFunction::Lua { upvalues: ups, .. } => match ups.get(b) {
                            Some(&uid) => upvalues.push(uid),
                            None => return Err(self.rt_error("bad upvalue binding")),
                        },
                        LuaFunction::Host { .. } => {
                            return Err(self.rt_error("bad upvalue binding"))
                        }
                    }
                }
                _ => return Err(self.rt_error("malformed closure binding")),
            }
        }

        let fid = self.new_closure(child, upvalues, env);
        self.stack[dst] = LuaValue::Function(fid);
        Ok(())
    }

    /// OP_VARARG: copy the frame's extra arguments into registers.
    pub(crate) fn op_vararg(&mut self, dst: usize, b: usize) -> LuaResult<()> {
        let (vbase, vcount) = {
            let f = self.cur_frame();
            (f.vararg_base, f.vararg_count)
        };
        if b == 0 {
            // Keep all varargs on top; the next instruction consumes them.
            self.ensure_stack(dst + vcount)?;
            for i in 0..vcount {
                self.stack[dst + i] = self.stack[vbase + i];
            }
            self.stack.truncate(dst + vcount);
            self.cur_frame_mut().top = dst + vcount;
        } else {
            let wanted = b - 1;
            self.ensure_stack(dst + wanted)?;
            for i in 0..wanted {
                self.stack[dst + i] = if i < vcount {
                    self.stack[vbase + i]
                } else {
                    LuaValue::Nil
                };
            }
        }
        Ok(())
    }

    /// OP_SETLIST: batch-store R(A+1)..R(A+B) into the table at R(A),
    /// starting at array index (C-1)*FPF+1. C == 0 takes the real block
    /// index from the next code word.
    pub(crate) fn op_setlist(&mut self, table_idx: usize, b: usize, c: usize) -> LuaResult<()> {
        let c = if c == 0 {
            let frame = self.cur_frame_mut();
            let proto = frame.proto.as_ref().expect("host frame in dispatch loop");
            let real_c = proto.code[frame.pc] as usize;
            frame.pc += 1;
            real_c
        } else {
            c
        };
        let n = if b == 0 {
            self.cur_frame().top - table_idx - 1
        } else {
            b
        };
        let tid = match self.stack[table_idx].as_table_id() {
            Some(tid) => tid,
            None => return Err(self.rt_error("cannot set list items on a non-table")),
        };
        let offset = (c - 1) * Instruction::FIELDS_PER_FLUSH as usize;
        for i in 1..=n {
            let v = self.stack[table_idx + i];
            self.raw_table_set_int(tid, offset + i, v);
        }
        // The open values have been consumed; restore the frame window.
        if b == 0 {
            let need = {
                let frame = self.cur_frame();
                let proto = frame.proto.as_ref().expect("host frame in dispatch loop");
                frame.base + proto.max_stack_size as usize
            };
            if self.stack.len() < need {
                self.stack.resize(need, LuaValue::Nil);
            }
            self.cur_frame_mut().top = need;
        }
        Ok(())
    }
}
