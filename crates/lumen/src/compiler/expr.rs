// Expression compilation: AST expression -> ExpDesc, emitting code as
// needed. Binary operators run the infix/posfix protocol so short-
// circuit jumps thread correctly and numeric literals stay foldable.

use super::ast::{BinOp, Expression, TableField, UnOp};
use super::expdesc::{ExpDesc, ExpKind, NO_JUMP};
use super::Compiler;
use crate::lua_vm::{Instruction, LuaResult, OpCode};

impl<'a> Compiler<'a> {
    pub(crate) fn compile_expr(&mut self, expr: &Expression) -> LuaResult<ExpDesc> {
        match expr {
            Expression::Nil(_) => Ok(ExpDesc::nil()),
            Expression::True(_) => Ok(ExpDesc::new(ExpKind::VTrue, 0)),
            Expression::False(_) => Ok(ExpDesc::new(ExpKind::VFalse, 0)),
            Expression::Number(n, _) => Ok(ExpDesc::number(*n)),
            Expression::Str(bytes, _) => {
                let k = self.string_constant(bytes)?;
                Ok(ExpDesc::new(ExpKind::VK, k as i32))
            }
            Expression::Vararg(_) => {
                let fs = self.fs();
                if !fs.proto.is_vararg {
                    return Err(
                        fs.compile_error("cannot use '...' outside a vararg function")
                    );
                }
                let pc = fs.code_abc(OpCode::Vararg, 0, 1, 0);
                Ok(ExpDesc::new(ExpKind::VVararg, pc as i32))
            }
            Expression::Name(name, _) => self.single_var(name),
            Expression::Paren(inner) => {
                let mut e = self.compile_expr(inner)?;
                // Parentheses truncate multiple results to one.
                self.fs().discharge_vars(&mut e);
                Ok(e)
            }
            Expression::Index { obj, key, line } => {
                self.fs().cur_line = *line;
                let mut t = self.compile_expr(obj)?;
                self.fs().exp_to_any_reg(&mut t)?;
                let mut k = self.compile_expr(key)?;
                self.fs().indexed(&mut t, &mut k)?;
                Ok(t)
            }
            Expression::Call { func, args, line } => {
                let mut f = self.compile_expr(func)?;
                self.fs().exp_to_next_reg(&mut f)?;
                self.compile_call(f, args, *line)
            }
            Expression::MethodCall {
                obj,
                name,
                args,
                line,
            } => {
                let mut f = self.compile_expr(obj)?;
                let k = self.string_constant(name.as_bytes())?;
                let mut key = ExpDesc::new(ExpKind::VK, k as i32);
                self.fs().emit_self(&mut f, &mut key)?;
                self.compile_call(f, args, *line)
            }
            Expression::Function(body) => self.function_body(body),
            Expression::Table { fields, line } => self.table_constructor(fields, *line),
            Expression::BinOp { op, lhs, rhs, line } => self.binary_op(*op, lhs, rhs, *line),
            Expression::UnOp { op, operand, line } => self.unary_op(*op, operand, *line),
        }
    }

    /// Shared tail of call and method-call compilation: the callable (and
    /// a receiver, for methods) is already fixed at `f`'s register.
    fn compile_call(
        &mut self,
        f: ExpDesc,
        args: &[Expression],
        line: u32,
    ) -> LuaResult<ExpDesc> {
        let base = f.info as u32;
        let nparams: i32;
        if args.is_empty() {
            nparams = 0;
        } else {
            for arg in &args[..args.len() - 1] {
                let mut e = self.compile_expr(arg)?;
                self.fs().exp_to_next_reg(&mut e)?;
            }
            let mut last = self.compile_expr(&args[args.len() - 1])?;
            if last.is_multret() {
                self.fs().set_returns(&last, -1)?;
                nparams = -1;
            } else {
                self.fs().exp_to_next_reg(&mut last)?;
                nparams = (self.fs().freereg - (base + 1)) as i32;
            }
        }
        let fs = self.fs();
        let pc = fs.code_abc(OpCode::Call, base, (nparams + 1) as u32, 2);
        fs.fix_line(line);
        // The call consumes callable and arguments, producing one result
        // slot unless adjusted later.
        fs.freereg = base + 1;
        Ok(ExpDesc::new(ExpKind::VCall, pc as i32))
    }

    fn unary_op(&mut self, op: UnOp, operand: &Expression, line: u32) -> LuaResult<ExpDesc> {
        let mut e = self.compile_expr(operand)?;
        let fold = self.options.constant_folding;
        let fs = self.fs();
        fs.cur_line = line;
        match op {
            UnOp::Neg => {
                if !e.is_numeral() {
                    fs.exp_to_any_reg(&mut e)?;
                }
                let mut zero = ExpDesc::number(0.0);
                fs.code_arith(OpCode::Unm, &mut e, &mut zero, fold)?;
            }
            UnOp::Not => fs.code_not(&mut e)?,
            UnOp::Len => {
                fs.exp_to_any_reg(&mut e)?;
                let mut zero = ExpDesc::number(0.0);
                fs.code_arith(OpCode::Len, &mut e, &mut zero, false)?;
            }
        }
        Ok(e)
    }

    fn binary_op(
        &mut self,
        op: BinOp,
        lhs: &Expression,
        rhs: &Expression,
        line: u32,
    ) -> LuaResult<ExpDesc> {
        let fold = self.options.constant_folding;
        match op {
            BinOp::And => {
                let mut e1 = self.compile_expr(lhs)?;
                self.fs().go_if_true(&mut e1)?;
                let mut e2 = self.compile_expr(rhs)?;
                let fs = self.fs();
                debug_assert_eq!(e1.t, NO_JUMP);
                fs.discharge_vars(&mut e2);
                let mut f = e2.f;
                fs.concat_jumps(&mut f, e1.f)?;
                e2.f = f;
                Ok(e2)
            }
            BinOp::Or => {
                let mut e1 = self.compile_expr(lhs)?;
                self.fs().go_if_false(&mut e1)?;
                let mut e2 = self.compile_expr(rhs)?;
                let fs = self.fs();
                debug_assert_eq!(e1.f, NO_JUMP);
                fs.discharge_vars(&mut e2);
                let mut t = e2.t;
                fs.concat_jumps(&mut t, e1.t)?;
                e2.t = t;
                Ok(e2)
            }
            BinOp::Concat => {
                let mut e1 = self.compile_expr(lhs)?;
                self.fs().exp_to_next_reg(&mut e1)?;
                let mut e2 = self.compile_expr(rhs)?;
                let fs = self.fs();
                fs.cur_line = line;
                fs.exp_to_val(&mut e2)?;
                // A right operand that is itself a CONCAT extends into a
                // single spanning instruction.
                if e2.kind == ExpKind::VReloc {
                    let i = fs.proto.code[e2.info as usize];
                    if Instruction::get_opcode(i) == OpCode::Concat {
                        debug_assert_eq!(e1.info as u32, Instruction::get_b(i) - 1);
                        fs.free_exp(&e1);
                        Instruction::set_b(
                            &mut fs.proto.code[e2.info as usize],
                            e1.info as u32,
                        );
                        return Ok(ExpDesc::new(ExpKind::VReloc, e2.info));
                    }
                }
                fs.exp_to_next_reg(&mut e2)?;
                fs.code_arith(OpCode::Concat, &mut e1, &mut e2, false)?;
                Ok(e1)
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow => {
                let mut e1 = self.compile_expr(lhs)?;
                if !e1.is_numeral() {
                    self.fs().exp_to_rk(&mut e1)?;
                }
                let mut e2 = self.compile_expr(rhs)?;
                let opcode = match op {
                    BinOp::Add => OpCode::Add,
                    BinOp::Sub => OpCode::Sub,
                    BinOp::Mul => OpCode::Mul,
                    BinOp::Div => OpCode::Div,
                    BinOp::Mod => OpCode::Mod,
                    _ => OpCode::Pow,
                };
                let fs = self.fs();
                fs.cur_line = line;
                fs.code_arith(opcode, &mut e1, &mut e2, fold)?;
                Ok(e1)
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let mut e1 = self.compile_expr(lhs)?;
                self.fs().exp_to_rk(&mut e1)?;
                let mut e2 = self.compile_expr(rhs)?;
                let (opcode, cond) = match op {
                    BinOp::Eq => (OpCode::Eq, true),
                    BinOp::Ne => (OpCode::Eq, false),
                    BinOp::Lt => (OpCode::Lt, true),
                    BinOp::Le => (OpCode::Le, true),
                    BinOp::Gt => (OpCode::Lt, false),
                    _ => (OpCode::Le, false),
                };
                let fs = self.fs();
                fs.cur_line = line;
                fs.code_comp(opcode, cond, &mut e1, &mut e2)?;
                Ok(e1)
            }
        }
    }

    /// `{ ... }`: NEWTABLE, batched SETLIST flushes for array items,
    /// SETTABLE for record fields; size hints back-patched at the end.
    fn table_constructor(&mut self, fields: &[TableField], line: u32) -> LuaResult<ExpDesc> {
        let fs = self.fs();
        fs.cur_line = line;
        let pc = fs.code_abc(OpCode::NewTable, 0, 0, 0);
        let mut t = ExpDesc::new(ExpKind::VReloc, pc as i32);
        fs.exp_to_next_reg(&mut t)?;
        let treg = t.info as u32;

        let mut na: u32 = 0;
        let mut nh: u32 = 0;
        let mut tostore: u32 = 0;
        let mut pending: Option<ExpDesc> = None;

        for field in fields {
            // Flush the previous array item first.
            if let Some(mut v) = pending.take() {
                self.fs().exp_to_next_reg(&mut v)?;
                if tostore == Instruction::FIELDS_PER_FLUSH {
                    self.fs().emit_setlist(treg, na, tostore as i32)?;
                    tostore = 0;
                }
            }
            match field {
                TableField::Item(e) => {
                    let v = self.compile_expr(e)?;
                    na += 1;
                    tostore += 1;
                    pending = Some(v);
                }
                TableField::Named(name, value) => {
                    let reg = self.fs().freereg;
                    let k = self.string_constant(name.as_bytes())?;
                    let mut key = ExpDesc::new(ExpKind::VK, k as i32);
                    let rkk = self.fs().exp_to_rk(&mut key)?;
                    let mut v = self.compile_expr(value)?;
                    let rkv = self.fs().exp_to_rk(&mut v)?;
                    let fs = self.fs();
                    fs.code_abc(OpCode::SetTable, treg, rkk, rkv);
                    fs.freereg = reg;
                    nh += 1;
                }
                TableField::Keyed(key, value) => {
                    let reg = self.fs().freereg;
                    let mut k = self.compile_expr(key)?;
                    let rkk = self.fs().exp_to_rk(&mut k)?;
                    let mut v = self.compile_expr(value)?;
                    let rkv = self.fs().exp_to_rk(&mut v)?;
                    let fs = self.fs();
                    fs.code_abc(OpCode::SetTable, treg, rkk, rkv);
                    fs.freereg = reg;
                    nh += 1;
                }
            }
        }

        // Last array item: an open call/vararg spreads into the table.
        if let Some(mut v) = pending.take() {
            if v.is_multret() {
                self.fs().set_returns(&v, -1)?;
                self.fs().emit_setlist(treg, na, -1)?;
                na -= 1; // the open part is not counted in the size hint
            } else {
                self.fs().exp_to_next_reg(&mut v)?;
                self.fs().emit_setlist(treg, na, tostore as i32)?;
            }
        } else if tostore > 0 {
            self.fs().emit_setlist(treg, na, tostore as i32)?;
        }

        let fs = self.fs();
        Instruction::set_b(&mut fs.proto.code[pc], Instruction::int2fb(na));
        Instruction::set_c(&mut fs.proto.code[pc], Instruction::int2fb(nh));
        Ok(ExpDesc::new(ExpKind::VNonReloc, treg as i32))
    }
}
