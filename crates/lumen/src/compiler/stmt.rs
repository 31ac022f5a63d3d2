// Statement compilation. Control-flow shapes (condition false-lists,
// break lists, the loop layouts with their hidden control registers)
// follow the reference code generator exactly.

use smol_str::SmolStr;

use super::ast::{Block, Expression, FuncName, Statement};
use super::expdesc::{ExpDesc, ExpKind, NO_JUMP};
use super::Compiler;
use crate::lua_vm::{Instruction, LuaResult, OpCode};

impl<'a> Compiler<'a> {
    pub(crate) fn compile_statement(&mut self, stmt: &Statement) -> LuaResult<()> {
        match stmt {
            Statement::Local { names, exprs, .. } => self.local_statement(names, exprs),
            Statement::Assign { targets, exprs, .. } => self.assign_statement(targets, exprs),
            Statement::Call { expr, .. } => self.call_statement(expr),
            Statement::If {
                arms, else_block, ..
            } => self.if_statement(arms, else_block.as_ref()),
            Statement::While { cond, body, .. } => self.while_statement(cond, body),
            Statement::Repeat { body, cond, .. } => self.repeat_statement(body, cond),
            Statement::NumericFor {
                var,
                start,
                end,
                step,
                body,
                line,
            } => self.numeric_for(var, start, end, step.as_ref(), body, *line),
            Statement::GenericFor {
                names,
                exprs,
                body,
                line,
            } => self.generic_for(names, exprs, body, *line),
            Statement::Do { body, .. } => self.compile_scoped_block(body),
            Statement::Function { name, body, line } => {
                self.function_statement(name, body, *line)
            }
            Statement::LocalFunction { name, body, .. } => {
                self.local_function_statement(name, body)
            }
            Statement::Return { exprs, .. } => self.return_statement(exprs),
            Statement::Break { .. } => self.break_statement(),
        }
    }

    // ============ Declarations and assignment ============

    fn local_statement(&mut self, names: &[SmolStr], exprs: &[Expression]) -> LuaResult<()> {
        for name in names {
            self.fs().new_local(name.clone())?;
        }
        let (nexps, mut e) = self.compile_expr_list(exprs)?;
        self.adjust_assign(names.len(), nexps, &mut e)?;
        self.fs().activate_locals(names.len());
        Ok(())
    }

    /// Evaluate an expression list, materializing all but the last value
    /// into consecutive registers. Returns the count and the open last
    /// expression (VVoid for an empty list).
    fn compile_expr_list(&mut self, exprs: &[Expression]) -> LuaResult<(usize, ExpDesc)> {
        if exprs.is_empty() {
            return Ok((0, ExpDesc::void()));
        }
        for e in &exprs[..exprs.len() - 1] {
            let mut d = self.compile_expr(e)?;
            self.fs().exp_to_next_reg(&mut d)?;
        }
        let last = self.compile_expr(&exprs[exprs.len() - 1])?;
        Ok((exprs.len(), last))
    }

    /// Balance `nexps` produced values against `nvars` targets: an open
    /// last expression provides the difference, otherwise pad with nil
    /// (all targets must be materialized before any store happens).
    fn adjust_assign(&mut self, nvars: usize, nexps: usize, e: &mut ExpDesc) -> LuaResult<()> {
        let fs = self.fs();
        let extra = nvars as i32 - nexps as i32;
        if e.is_multret() {
            // The open expression also replaces its own slot.
            let extra = (extra + 1).max(0);
            fs.set_returns(e, extra)?;
            if extra > 1 {
                fs.reserve_regs((extra - 1) as u32)?;
            }
        } else {
            if e.kind != ExpKind::VVoid {
                fs.exp_to_next_reg(e)?;
            }
            if extra > 0 {
                let reg = fs.freereg;
                fs.reserve_regs(extra as u32)?;
                fs.emit_nil(reg, extra as u32);
            }
        }
        Ok(())
    }

    /// An l-value as an assignable ExpDesc.
    fn compile_lvalue(&mut self, target: &Expression) -> LuaResult<ExpDesc> {
        match target {
            Expression::Name(name, _) => self.single_var(name),
            Expression::Index { obj, key, line } => {
                self.fs().cur_line = *line;
                let mut t = self.compile_expr(obj)?;
                self.fs().exp_to_any_reg(&mut t)?;
                let mut k = self.compile_expr(key)?;
                self.fs().indexed(&mut t, &mut k)?;
                Ok(t)
            }
            _ => Err(self.fs().compile_error("cannot assign to this expression")),
        }
    }

    /// A later target that is a local may alias the table or key register
    /// of an earlier indexed target; copy the register so the earlier
    /// store still sees the original value.
    fn check_assign_conflict(&mut self, prev: &mut [ExpDesc], new: &ExpDesc) -> LuaResult<()> {
        if new.kind != ExpKind::VLocal {
            return Ok(());
        }
        let reg = new.info;
        let extra = self.fs().freereg as i32;
        let mut conflict = false;
        for d in prev.iter_mut() {
            if d.kind == ExpKind::VIndexed {
                if d.info == reg {
                    conflict = true;
                    d.info = extra;
                }
                if d.aux == reg {
                    conflict = true;
                    d.aux = extra;
                }
            }
        }
        if conflict {
            let fs = self.fs();
            fs.code_abc(OpCode::Move, fs.freereg, reg as u32, 0);
            fs.reserve_regs(1)?;
        }
        Ok(())
    }

    fn assign_statement(
        &mut self,
        targets: &[Expression],
        exprs: &[Expression],
    ) -> LuaResult<()> {
        let mut descs: Vec<ExpDesc> = Vec::with_capacity(targets.len());
        for target in targets {
            let d = self.compile_lvalue(target)?;
            self.check_assign_conflict(&mut descs, &d)?;
            descs.push(d);
        }
        let nvars = targets.len();
        let (nexps, mut e) = self.compile_expr_list(exprs)?;

        if nexps == nvars {
            // The last value flows straight into the last target; the
            // rest come off the register stack right to left.
            self.fs().set_one_result(&mut e);
            let last = descs.pop().expect("at least one target");
            self.fs().store_var(&last, &mut e)?;
        } else {
            self.adjust_assign(nvars, nexps, &mut e)?;
            if nexps > nvars {
                self.fs().freereg -= (nexps - nvars) as u32;
            }
        }
        for d in descs.iter().rev() {
            let fs = self.fs();
            let mut src = ExpDesc::new(ExpKind::VNonReloc, fs.freereg as i32 - 1);
            fs.store_var(d, &mut src)?;
        }
        Ok(())
    }

    fn call_statement(&mut self, expr: &Expression) -> LuaResult<()> {
        let e = self.compile_expr(expr)?;
        // A call statement discards its results.
        if e.kind == ExpKind::VCall {
            let fs = self.fs();
            Instruction::set_c(&mut fs.proto.code[e.info as usize], 1);
        }
        Ok(())
    }

    // ============ Conditionals and loops ============

    /// Compile a condition, returning its false-jump list (the jumps to
    /// take when the condition fails).
    fn condition_false_list(&mut self, cond: &Expression) -> LuaResult<i32> {
        let mut e = self.compile_expr(cond)?;
        if e.kind == ExpKind::VNil {
            e.kind = ExpKind::VFalse;
        }
        self.fs().go_if_true(&mut e)?;
        Ok(e.f)
    }

    fn if_statement(
        &mut self,
        arms: &[(Expression, Block)],
        else_block: Option<&Block>,
    ) -> LuaResult<()> {
        let mut escape = NO_JUMP;
        let (first_cond, first_body) = &arms[0];
        let mut flist = self.condition_false_list(first_cond)?;
        self.compile_scoped_block(first_body)?;
        for (cond, body) in &arms[1..] {
            let j = self.fs().jump()?;
            self.fs().concat_jumps(&mut escape, j)?;
            self.fs().patch_to_here(flist)?;
            flist = self.condition_false_list(cond)?;
            self.compile_scoped_block(body)?;
        }
        if let Some(body) = else_block {
            let j = self.fs().jump()?;
            self.fs().concat_jumps(&mut escape, j)?;
            self.fs().patch_to_here(flist)?;
            self.compile_scoped_block(body)?;
        } else {
            self.fs().concat_jumps(&mut escape, flist)?;
        }
        self.fs().patch_to_here(escape)
    }

    fn while_statement(&mut self, cond: &Expression, body: &Block) -> LuaResult<()> {
        let start = self.fs().get_label();
        let condexit = self.condition_false_list(cond)?;
        self.enter_block(true);
        self.compile_scoped_block(body)?;
        let j = self.fs().jump()?;
        self.fs().patch_list(j, start)?;
        self.leave_block()?;
        self.fs().patch_to_here(condexit)
    }

    fn repeat_statement(&mut self, body: &Block, cond: &Expression) -> LuaResult<()> {
        let start = self.fs().get_label();
        self.enter_block(true); // loop
        self.enter_block(false); // scope: body locals stay visible in cond
        self.compile_statements(body)?;
        let condexit = self.condition_false_list(cond)?;
        let scope_has_upval = self.fs().has_block_upval();
        if !scope_has_upval {
            self.leave_block()?; // scope
            self.fs().patch_list(condexit, start)?;
        } else {
            // Captured locals must close before the back edge.
            self.break_statement()?; // condition true: exit the loop
            self.fs().patch_to_here(condexit)?;
            self.leave_block()?; // scope (emits CLOSE)
            let back = self.fs().jump()?;
            self.fs().patch_list(back, start)?;
        }
        self.leave_block() // loop: lands break jumps here
    }

    fn numeric_for(
        &mut self,
        var: &SmolStr,
        start: &Expression,
        end: &Expression,
        step: Option<&Expression>,
        body: &Block,
        line: u32,
    ) -> LuaResult<()> {
        self.enter_block(true);
        let base = self.fs().freereg;
        self.fs().new_local(SmolStr::new("(for index)"))?;
        self.fs().new_local(SmolStr::new("(for limit)"))?;
        self.fs().new_local(SmolStr::new("(for step)"))?;
        self.fs().new_local(var.clone())?;

        let mut e = self.compile_expr(start)?;
        self.fs().exp_to_next_reg(&mut e)?;
        let mut e = self.compile_expr(end)?;
        self.fs().exp_to_next_reg(&mut e)?;
        match step {
            Some(step) => {
                let mut e = self.compile_expr(step)?;
                self.fs().exp_to_next_reg(&mut e)?;
            }
            None => {
                let fs = self.fs();
                let k = fs.number_k(1.0)?;
                let reg = fs.freereg;
                fs.code_abx(OpCode::LoadK, reg, k);
                fs.reserve_regs(1)?;
            }
        }

        self.for_body(base, 1, body, true, line)
    }

    fn generic_for(
        &mut self,
        names: &[SmolStr],
        exprs: &[Expression],
        body: &Block,
        line: u32,
    ) -> LuaResult<()> {
        self.enter_block(true);
        let base = self.fs().freereg;
        self.fs().new_local(SmolStr::new("(for generator)"))?;
        self.fs().new_local(SmolStr::new("(for state)"))?;
        self.fs().new_local(SmolStr::new("(for control)"))?;
        for name in names {
            self.fs().new_local(name.clone())?;
        }
        let (nexps, mut e) = self.compile_expr_list(exprs)?;
        self.adjust_assign(3, nexps, &mut e)?;
        self.fs().check_stack(3)?; // scratch for the iterator call
        self.for_body(base, names.len() as u32, body, false, line)
    }

    /// Shared loop tail: hidden control variables are active, the
    /// prep/loop instruction pair brackets the body.
    fn for_body(
        &mut self,
        base: u32,
        nvars: u32,
        body: &Block,
        is_numeric: bool,
        line: u32,
    ) -> LuaResult<()> {
        self.fs().activate_locals(3);
        let prep = if is_numeric {
            self.fs().code_asbx(OpCode::ForPrep, base, NO_JUMP) as i32
        } else {
            self.fs().jump()?
        };
        self.enter_block(false);
        self.fs().activate_locals(nvars as usize);
        self.fs().reserve_regs(nvars)?;
        self.compile_statements(body)?;
        self.leave_block()?;
        self.fs().patch_to_here(prep)?;
        let endfor = if is_numeric {
            self.fs().code_asbx(OpCode::ForLoop, base, NO_JUMP) as i32
        } else {
            let fs = self.fs();
            fs.code_abc(OpCode::TForLoop, base, 0, nvars);
            fs.fix_line(line);
            fs.jump()?
        };
        self.fs().fix_line(line);
        self.fs().patch_list(endfor, prep + 1)?;
        self.leave_block()
    }

    fn break_statement(&mut self) -> LuaResult<()> {
        let fs = self.fs();
        let mut upval = false;
        let mut target = None;
        for (i, bl) in fs.blocks.iter().enumerate().rev() {
            if bl.is_breakable {
                target = Some(i);
                break;
            }
            upval |= bl.upval;
        }
        let target = match target {
            Some(i) => i,
            None => return Err(fs.compile_error("no loop to break")),
        };
        let close_level = fs.blocks[target].nactvar;
        if upval {
            fs.code_abc(OpCode::Close, close_level as u32, 0, 0);
        }
        let j = fs.jump()?;
        let mut list = fs.blocks[target].breaklist;
        fs.concat_jumps(&mut list, j)?;
        fs.blocks[target].breaklist = list;
        Ok(())
    }

    // ============ Functions ============

    fn function_statement(
        &mut self,
        name: &FuncName,
        body: &super::ast::FuncBody,
        line: u32,
    ) -> LuaResult<()> {
        let mut v = self.single_var(&name.base)?;
        for field in &name.path {
            self.fs().exp_to_any_reg(&mut v)?;
            let k = self.string_constant(field.as_bytes())?;
            let mut key = ExpDesc::new(ExpKind::VK, k as i32);
            self.fs().indexed(&mut v, &mut key)?;
        }
        if let Some(method) = &name.method {
            self.fs().exp_to_any_reg(&mut v)?;
            let k = self.string_constant(method.as_bytes())?;
            let mut key = ExpDesc::new(ExpKind::VK, k as i32);
            self.fs().indexed(&mut v, &mut key)?;
        }
        let mut b = self.function_body(body)?;
        self.fs().store_var(&v, &mut b)?;
        self.fs().fix_line(line);
        Ok(())
    }

    fn local_function_statement(
        &mut self,
        name: &SmolStr,
        body: &super::ast::FuncBody,
    ) -> LuaResult<()> {
        // The local is active before the body so the function can
        // recurse through it.
        self.fs().new_local(name.clone())?;
        let reg = self.fs().freereg;
        let v = ExpDesc::new(ExpKind::VLocal, reg as i32);
        self.fs().reserve_regs(1)?;
        self.fs().activate_locals(1);
        let mut b = self.function_body(body)?;
        self.fs().store_var(&v, &mut b)?;
        Ok(())
    }

    fn return_statement(&mut self, exprs: &[Expression]) -> LuaResult<()> {
        let (first, nret): (u32, i32);
        if exprs.is_empty() {
            first = 0;
            nret = 0;
        } else {
            let (n, mut e) = self.compile_expr_list(exprs)?;
            if e.is_multret() {
                self.fs().set_returns(&e, -1)?;
                if e.kind == ExpKind::VCall && n == 1 {
                    // Lone open call: turn it into a true tail call.
                    let fs = self.fs();
                    let pc = e.info as usize;
                    Instruction::set_opcode(&mut fs.proto.code[pc], OpCode::TailCall);
                    debug_assert_eq!(
                        Instruction::get_a(fs.proto.code[pc]),
                        fs.nactvar()
                    );
                }
                first = self.fs().nactvar();
                nret = -1;
            } else if n == 1 {
                first = self.fs().exp_to_any_reg(&mut e)?;
                nret = 1;
            } else {
                self.fs().exp_to_next_reg(&mut e)?;
                let fs = self.fs();
                first = fs.nactvar();
                nret = n as i32;
                debug_assert_eq!(nret as u32, fs.freereg - first);
            }
        }
        self.fs().emit_return(first, nret);
        Ok(())
    }
}
