// Code generation over FuncState: instruction emission, the NO_JUMP
// chain machinery (jump lists threaded through sBx fields and patched to
// final targets), expression discharge into registers, RK selection, and
// arithmetic emission with optional constant folding.

use crate::lua_vm::{Instruction, LuaResult, OpCode};

use super::expdesc::{ExpDesc, ExpKind, NO_JUMP};
use super::func_state::FuncState;

impl FuncState {
    // ============ Raw emission ============

    fn emit(&mut self, word: u32) -> usize {
        self.discharge_jpc();
        let pc = self.pc();
        self.proto.code.push(word);
        self.proto.line_info.push(self.cur_line);
        pc
    }

    pub fn code_abc(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> usize {
        self.emit(Instruction::create_abc(op, a, b, c))
    }

    pub fn code_abx(&mut self, op: OpCode, a: u32, bx: u32) -> usize {
        self.emit(Instruction::create_abx(op, a, bx))
    }

    pub fn code_asbx(&mut self, op: OpCode, a: u32, sbx: i32) -> usize {
        self.emit(Instruction::create_asbx(op, a, sbx))
    }

    /// Raw word in the instruction stream (SETLIST's overflow argument).
    pub fn code_raw(&mut self, word: u32) -> usize {
        self.emit(word)
    }

    /// Re-attribute the last emitted instruction to `line`.
    pub fn fix_line(&mut self, line: u32) {
        if let Some(l) = self.proto.line_info.last_mut() {
            *l = line;
        }
    }

    /// RETURN first..first+nret-1 (nret < 0 returns to top).
    pub fn emit_return(&mut self, first: u32, nret: i32) {
        let b = (nret + 1) as u32;
        self.code_abc(OpCode::Return, first, b, 0);
    }

    /// Load nils into `from..from+n-1`, merging with a previous LOADNIL
    /// when possible. At pc 0 registers above the locals are already nil.
    pub fn emit_nil(&mut self, from: u32, n: u32) {
        if self.jpc == NO_JUMP && self.pc() as i32 > self.last_target {
            if self.pc() == 0 {
                if from >= self.nactvar() {
                    return;
                }
            } else {
                let prev = self.proto.code[self.pc() - 1];
                if Instruction::get_opcode(prev) == OpCode::LoadNil {
                    let pfrom = Instruction::get_a(prev);
                    let pto = Instruction::get_b(prev);
                    if pfrom <= from && from <= pto + 1 {
                        if from + n - 1 > pto {
                            let last = self.pc() - 1;
                            Instruction::set_b(&mut self.proto.code[last], from + n - 1);
                        }
                        return;
                    }
                }
            }
        }
        self.code_abc(OpCode::LoadNil, from, from + n - 1, 0);
    }

    // ============ Jump lists ============

    /// Emit an unconditional forward jump, inheriting any jumps that were
    /// pending to "here".
    pub fn jump(&mut self) -> LuaResult<i32> {
        let saved_jpc = self.jpc;
        self.jpc = NO_JUMP;
        let mut j = self.code_asbx(OpCode::Jmp, 0, NO_JUMP) as i32;
        self.concat_jumps(&mut j, saved_jpc)?;
        Ok(j)
    }

    /// Current pc as a jump target.
    pub fn get_label(&mut self) -> i32 {
        let pc = self.pc() as i32;
        self.last_target = pc;
        pc
    }

    fn get_jump(&self, pc: i32) -> i32 {
        let offset = Instruction::get_sbx(self.proto.code[pc as usize]);
        if offset == NO_JUMP {
            NO_JUMP
        } else {
            pc + 1 + offset
        }
    }

    fn fix_jump(&mut self, pc: i32, dest: i32) -> LuaResult<()> {
        let offset = dest - (pc + 1);
        if offset.abs() > Instruction::MAX_SBX {
            return Err(self.compile_error("control structure too long"));
        }
        Instruction::set_sbx(&mut self.proto.code[pc as usize], offset);
        Ok(())
    }

    /// The instruction controlling the jump at `pc`: the preceding
    /// test/compare when there is one, else the jump itself.
    fn jump_control_pc(&self, pc: i32) -> usize {
        if pc >= 1 {
            let prev = self.proto.code[pc as usize - 1];
            if Instruction::get_opcode(prev).is_test() {
                return pc as usize - 1;
            }
        }
        pc as usize
    }

    /// Does some jump on the list need a materialized boolean value?
    fn need_value(&self, mut list: i32) -> bool {
        while list != NO_JUMP {
            let i = self.proto.code[self.jump_control_pc(list)];
            if Instruction::get_opcode(i) != OpCode::TestSet {
                return true;
            }
            list = self.get_jump(list);
        }
        false
    }

    /// Turn the TESTSET controlling `node` into a plain TEST (or retarget
    /// its destination register). Returns false for non-TESTSET controls.
    fn patch_test_reg(&mut self, node: i32, reg: u32) -> bool {
        let ctrl = self.jump_control_pc(node);
        let i = self.proto.code[ctrl];
        if Instruction::get_opcode(i) != OpCode::TestSet {
            return false;
        }
        let b = Instruction::get_b(i);
        if reg != Instruction::NO_REG && reg != b {
            Instruction::set_a(&mut self.proto.code[ctrl], reg);
        } else {
            self.proto.code[ctrl] =
                Instruction::create_abc(OpCode::Test, b, 0, Instruction::get_c(i));
        }
        true
    }

    fn patch_list_aux(
        &mut self,
        mut list: i32,
        vtarget: i32,
        reg: u32,
        dtarget: i32,
    ) -> LuaResult<()> {
        while list != NO_JUMP {
            let next = self.get_jump(list);
            if self.patch_test_reg(list, reg) {
                self.fix_jump(list, vtarget)?;
            } else {
                self.fix_jump(list, dtarget)?;
            }
            list = next;
        }
        Ok(())
    }

    fn discharge_jpc(&mut self) {
        let list = self.jpc;
        self.jpc = NO_JUMP;
        let here = self.pc() as i32;
        // Emission cannot be re-entered here, so failures are impossible:
        // jpc jumps always target forward to the next instruction.
        let _ = self.patch_list_aux(list, here, Instruction::NO_REG, here);
    }

    /// Patch every jump on `list` to land at `target`.
    pub fn patch_list(&mut self, list: i32, target: i32) -> LuaResult<()> {
        if target == self.pc() as i32 {
            self.patch_to_here(list)
        } else {
            self.patch_list_aux(list, target, Instruction::NO_REG, target)
        }
    }

    /// Queue `list` to be patched at the next emitted instruction.
    pub fn patch_to_here(&mut self, list: i32) -> LuaResult<()> {
        self.get_label();
        let mut jpc = self.jpc;
        self.concat_jumps(&mut jpc, list)?;
        self.jpc = jpc;
        Ok(())
    }

    /// Append list `l2` onto `*l1`.
    pub fn concat_jumps(&mut self, l1: &mut i32, l2: i32) -> LuaResult<()> {
        if l2 == NO_JUMP {
            return Ok(());
        }
        if *l1 == NO_JUMP {
            *l1 = l2;
            return Ok(());
        }
        let mut list = *l1;
        loop {
            let next = self.get_jump(list);
            if next == NO_JUMP {
                break;
            }
            list = next;
        }
        self.fix_jump(list, l2)
    }

    // ============ Expression discharge ============

    /// Resolve variable accesses into computable instructions.
    pub fn discharge_vars(&mut self, e: &mut ExpDesc) {
        match e.kind {
            ExpKind::VLocal => {
                e.kind = ExpKind::VNonReloc;
            }
            ExpKind::VUpval => {
                e.info = self.code_abc(OpCode::GetUpval, 0, e.info as u32, 0) as i32;
                e.kind = ExpKind::VReloc;
            }
            ExpKind::VGlobal => {
                e.info = self.code_abx(OpCode::GetGlobal, 0, e.info as u32) as i32;
                e.kind = ExpKind::VReloc;
            }
            ExpKind::VIndexed => {
                self.free_reg_if_temp(e.aux as u32);
                self.free_reg(e.info as u32);
                e.info =
                    self.code_abc(OpCode::GetTable, 0, e.info as u32, e.aux as u32) as i32;
                e.kind = ExpKind::VReloc;
            }
            ExpKind::VCall => {
                self.set_one_result(e);
            }
            ExpKind::VVararg => {
                self.set_one_result(e);
            }
            _ => {}
        }
    }

    /// RK fields with the constant bit never name a register to free.
    fn free_reg_if_temp(&mut self, field: u32) {
        if !Instruction::is_k(field) {
            self.free_reg(field);
        }
    }

    fn discharge_to_reg(&mut self, e: &mut ExpDesc, reg: u32) -> LuaResult<()> {
        self.discharge_vars(e);
        match e.kind {
            ExpKind::VNil => self.emit_nil(reg, 1),
            ExpKind::VFalse => {
                self.code_abc(OpCode::LoadBool, reg, 0, 0);
            }
            ExpKind::VTrue => {
                self.code_abc(OpCode::LoadBool, reg, 1, 0);
            }
            ExpKind::VK => {
                self.code_abx(OpCode::LoadK, reg, e.info as u32);
            }
            ExpKind::VKNum => {
                let k = self.number_k(e.nval)?;
                self.code_abx(OpCode::LoadK, reg, k);
            }
            ExpKind::VReloc => {
                let pc = e.info as usize;
                Instruction::set_a(&mut self.proto.code[pc], reg);
            }
            ExpKind::VNonReloc => {
                if e.info as u32 != reg {
                    self.code_abc(OpCode::Move, reg, e.info as u32, 0);
                }
            }
            ExpKind::VVoid | ExpKind::VJmp => return Ok(()),
            _ => unreachable!("cannot discharge {:?}", e.kind),
        }
        e.info = reg as i32;
        e.kind = ExpKind::VNonReloc;
        Ok(())
    }

    fn discharge_to_any_reg(&mut self, e: &mut ExpDesc) -> LuaResult<()> {
        if e.kind != ExpKind::VNonReloc {
            self.reserve_regs(1)?;
            let reg = self.freereg - 1;
            self.discharge_to_reg(e, reg)?;
        }
        Ok(())
    }

    fn code_label(&mut self, reg: u32, b: u32, jump: u32) -> i32 {
        self.get_label();
        self.code_abc(OpCode::LoadBool, reg, b, jump) as i32
    }

    /// Materialize the expression (and any pending true/false jump lists)
    /// into exactly `reg`.
    pub fn exp_to_reg(&mut self, e: &mut ExpDesc, reg: u32) -> LuaResult<()> {
        self.discharge_to_reg(e, reg)?;
        if e.kind == ExpKind::VJmp {
            let mut t = e.t;
            self.concat_jumps(&mut t, e.info)?;
            e.t = t;
        }
        if e.has_jumps() {
            let mut p_f = NO_JUMP;
            let mut p_t = NO_JUMP;
            if self.need_value(e.t) || self.need_value(e.f) {
                let fj = if e.kind == ExpKind::VJmp {
                    NO_JUMP
                } else {
                    self.jump()?
                };
                p_f = self.code_label(reg, 0, 1);
                p_t = self.code_label(reg, 1, 0);
                self.patch_to_here(fj)?;
            }
            let final_pc = self.get_label();
            self.patch_list_aux(e.f, final_pc, reg, p_f)?;
            self.patch_list_aux(e.t, final_pc, reg, p_t)?;
        }
        e.t = NO_JUMP;
        e.f = NO_JUMP;
        e.info = reg as i32;
        e.kind = ExpKind::VNonReloc;
        Ok(())
    }

    /// Materialize into the next free register.
    pub fn exp_to_next_reg(&mut self, e: &mut ExpDesc) -> LuaResult<u32> {
        self.discharge_vars(e);
        self.free_exp(e);
        self.reserve_regs(1)?;
        let reg = self.freereg - 1;
        self.exp_to_reg(e, reg)?;
        Ok(reg)
    }

    /// Materialize into some register, reusing the current one if safe.
    pub fn exp_to_any_reg(&mut self, e: &mut ExpDesc) -> LuaResult<u32> {
        self.discharge_vars(e);
        if e.kind == ExpKind::VNonReloc {
            if !e.has_jumps() {
                return Ok(e.info as u32);
            }
            if e.info as u32 >= self.nactvar() {
                let reg = e.info as u32;
                self.exp_to_reg(e, reg)?;
                return Ok(reg);
            }
        }
        self.exp_to_next_reg(e)
    }

    /// Ensure the expression is a value (not a pending variable access),
    /// possibly keeping it as a constant.
    pub fn exp_to_val(&mut self, e: &mut ExpDesc) -> LuaResult<()> {
        if e.has_jumps() {
            self.exp_to_any_reg(e)?;
        } else {
            self.discharge_vars(e);
        }
        Ok(())
    }

    /// Encode the expression as a 9-bit RK operand, preferring the
    /// constant form when it fits.
    pub fn exp_to_rk(&mut self, e: &mut ExpDesc) -> LuaResult<u32> {
        self.exp_to_val(e)?;
        match e.kind {
            ExpKind::VKNum | ExpKind::VTrue | ExpKind::VFalse | ExpKind::VNil => {
                if self.proto.constants.len() <= Instruction::MAX_INDEX_RK as usize {
                    let idx = match e.kind {
                        ExpKind::VNil => self.nil_k()?,
                        ExpKind::VKNum => self.number_k(e.nval)?,
                        ExpKind::VTrue => self.bool_k(true)?,
                        _ => self.bool_k(false)?,
                    };
                    e.info = idx as i32;
                    e.kind = ExpKind::VK;
                    return Ok(Instruction::rk_as_k(idx));
                }
            }
            ExpKind::VK => {
                if (e.info as u32) <= Instruction::MAX_INDEX_RK {
                    return Ok(Instruction::rk_as_k(e.info as u32));
                }
            }
            _ => {}
        }
        Ok(self.exp_to_any_reg(e)?)
    }

    /// Release the register held by a spent expression.
    pub fn free_exp(&mut self, e: &ExpDesc) {
        if e.kind == ExpKind::VNonReloc {
            self.free_reg(e.info as u32);
        }
    }

    // ============ Multiple results ============

    /// Adjust an open call/vararg to produce `nresults` values
    /// (-1 = all).
    pub fn set_returns(&mut self, e: &ExpDesc, nresults: i32) -> LuaResult<()> {
        if e.kind == ExpKind::VCall {
            let pc = e.info as usize;
            Instruction::set_c(&mut self.proto.code[pc], (nresults + 1) as u32);
        } else if e.kind == ExpKind::VVararg {
            let pc = e.info as usize;
            Instruction::set_b(&mut self.proto.code[pc], (nresults + 1) as u32);
            Instruction::set_a(&mut self.proto.code[pc], self.freereg);
            self.reserve_regs(1)?;
        }
        Ok(())
    }

    /// Fix an open call/vararg to exactly one result.
    pub fn set_one_result(&mut self, e: &mut ExpDesc) {
        if e.kind == ExpKind::VCall {
            let pc = e.info as usize;
            Instruction::set_c(&mut self.proto.code[pc], 2);
            e.kind = ExpKind::VNonReloc;
            e.info = Instruction::get_a(self.proto.code[pc]) as i32;
        } else if e.kind == ExpKind::VVararg {
            let pc = e.info as usize;
            Instruction::set_b(&mut self.proto.code[pc], 2);
            e.kind = ExpKind::VReloc;
        }
    }

    // ============ Boolean control flow ============

    fn invert_jump(&mut self, e: &ExpDesc) {
        let ctrl = self.jump_control_pc(e.info);
        let i = self.proto.code[ctrl];
        debug_assert!(
            Instruction::get_opcode(i).is_test()
                && Instruction::get_opcode(i) != OpCode::TestSet
                && Instruction::get_opcode(i) != OpCode::Test
        );
        let a = Instruction::get_a(i);
        Instruction::set_a(&mut self.proto.code[ctrl], if a == 0 { 1 } else { 0 });
    }

    fn cond_jump(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> LuaResult<i32> {
        self.code_abc(op, a, b, c);
        self.jump()
    }

    fn jump_on_cond(&mut self, e: &mut ExpDesc, cond: bool) -> LuaResult<i32> {
        if e.kind == ExpKind::VReloc {
            let i = self.proto.code[e.info as usize];
            if Instruction::get_opcode(i) == OpCode::Not {
                // Remove the NOT and invert the test.
                self.proto.code.pop();
                self.proto.line_info.pop();
                return self.cond_jump(
                    OpCode::Test,
                    Instruction::get_b(i),
                    0,
                    if cond { 0 } else { 1 },
                );
            }
        }
        self.discharge_to_any_reg(e)?;
        self.free_exp(e);
        self.cond_jump(
            OpCode::TestSet,
            Instruction::NO_REG,
            e.info as u32,
            if cond { 1 } else { 0 },
        )
    }

    /// Emit the "fall through when true" shape for `and` and conditions.
    pub fn go_if_true(&mut self, e: &mut ExpDesc) -> LuaResult<()> {
        self.discharge_vars(e);
        let pc = match e.kind {
            ExpKind::VK | ExpKind::VKNum | ExpKind::VTrue => NO_JUMP,
            ExpKind::VJmp => {
                self.invert_jump(e);
                e.info
            }
            _ => self.jump_on_cond(e, false)?,
        };
        let mut f = e.f;
        self.concat_jumps(&mut f, pc)?;
        e.f = f;
        self.patch_to_here(e.t)?;
        e.t = NO_JUMP;
        Ok(())
    }

    /// Emit the "fall through when false" shape for `or`.
    pub fn go_if_false(&mut self, e: &mut ExpDesc) -> LuaResult<()> {
        self.discharge_vars(e);
        let pc = match e.kind {
            ExpKind::VNil | ExpKind::VFalse => NO_JUMP,
            ExpKind::VJmp => e.info,
            _ => self.jump_on_cond(e, true)?,
        };
        let mut t = e.t;
        self.concat_jumps(&mut t, pc)?;
        e.t = t;
        self.patch_to_here(e.f)?;
        e.f = NO_JUMP;
        Ok(())
    }

    /// `not e`, folding constants and swapping the jump lists.
    pub fn code_not(&mut self, e: &mut ExpDesc) -> LuaResult<()> {
        self.discharge_vars(e);
        match e.kind {
            ExpKind::VNil | ExpKind::VFalse => {
                e.kind = ExpKind::VTrue;
            }
            ExpKind::VK | ExpKind::VKNum | ExpKind::VTrue => {
                e.kind = ExpKind::VFalse;
            }
            ExpKind::VJmp => {
                self.invert_jump(e);
            }
            ExpKind::VReloc | ExpKind::VNonReloc => {
                self.discharge_to_any_reg(e)?;
                self.free_exp(e);
                e.info = self.code_abc(OpCode::Not, 0, e.info as u32, 0) as i32;
                e.kind = ExpKind::VReloc;
            }
            _ => unreachable!("cannot negate {:?}", e.kind),
        }
        std::mem::swap(&mut e.t, &mut e.f);
        self.remove_values(e.f);
        self.remove_values(e.t);
        Ok(())
    }

    /// Values produced on this list are never observed after a `not`;
    /// demote TESTSETs to TESTs.
    fn remove_values(&mut self, mut list: i32) {
        while list != NO_JUMP {
            self.patch_test_reg(list, Instruction::NO_REG);
            list = self.get_jump(list);
        }
    }

    // ============ Indexing and stores ============

    /// `t[k]`: t must already be in a register; k becomes an RK operand.
    pub fn indexed(&mut self, t: &mut ExpDesc, k: &mut ExpDesc) -> LuaResult<()> {
        t.aux = self.exp_to_rk(k)? as i32;
        t.kind = ExpKind::VIndexed;
        Ok(())
    }

    /// Store `e` into the variable described by `var`.
    pub fn store_var(&mut self, var: &ExpDesc, e: &mut ExpDesc) -> LuaResult<()> {
        match var.kind {
            ExpKind::VLocal => {
                self.free_exp(e);
                self.exp_to_reg(e, var.info as u32)?;
                return Ok(());
            }
            ExpKind::VUpval => {
                let reg = self.exp_to_any_reg(e)?;
                self.code_abc(OpCode::SetUpval, reg, var.info as u32, 0);
            }
            ExpKind::VGlobal => {
                let reg = self.exp_to_any_reg(e)?;
                self.code_abx(OpCode::SetGlobal, reg, var.info as u32);
            }
            ExpKind::VIndexed => {
                let rk = self.exp_to_rk(e)?;
                self.code_abc(OpCode::SetTable, var.info as u32, var.aux as u32, rk);
            }
            _ => unreachable!("not an assignable expression: {:?}", var.kind),
        }
        self.free_exp(e);
        Ok(())
    }

    /// `e:key` method-call prep: SELF puts the method and receiver in two
    /// fresh consecutive registers.
    pub fn emit_self(&mut self, e: &mut ExpDesc, key: &mut ExpDesc) -> LuaResult<()> {
        self.exp_to_any_reg(e)?;
        self.free_exp(e);
        let func = self.freereg;
        self.reserve_regs(2)?;
        let rk = self.exp_to_rk(key)?;
        self.code_abc(OpCode::Self_, func, e.info as u32, rk);
        self.free_exp(key);
        e.info = func as i32;
        e.kind = ExpKind::VNonReloc;
        Ok(())
    }

    // ============ Arithmetic and comparison ============

    fn const_fold(op: OpCode, e1: &ExpDesc, e2: &ExpDesc) -> Option<f64> {
        if !e1.is_numeral() || !e2.is_numeral() {
            return None;
        }
        let a = e1.nval;
        let b = e2.nval;
        let r = match op {
            OpCode::Add => a + b,
            OpCode::Sub => a - b,
            OpCode::Mul => a * b,
            OpCode::Div => {
                if b == 0.0 {
                    return None; // keep the division (inf/nan) at runtime
                }
                a / b
            }
            OpCode::Mod => {
                if b == 0.0 {
                    return None;
                }
                a - (a / b).floor() * b
            }
            OpCode::Pow => a.powf(b),
            OpCode::Unm => -a,
            _ => return None,
        };
        if r.is_nan() {
            return None;
        }
        Some(r)
    }

    pub fn code_arith(
        &mut self,
        op: OpCode,
        e1: &mut ExpDesc,
        e2: &mut ExpDesc,
        fold: bool,
    ) -> LuaResult<()> {
        if fold {
            if let Some(r) = Self::const_fold(op, e1, e2) {
                e1.kind = ExpKind::VKNum;
                e1.nval = r;
                return Ok(());
            }
        }
        let o2 = if op != OpCode::Unm && op != OpCode::Len {
            self.exp_to_rk(e2)?
        } else {
            0
        };
        let o1 = self.exp_to_rk(e1)?;
        if o1 > o2 {
            self.free_exp_operand(o1);
            self.free_exp_operand(o2);
        } else {
            self.free_exp_operand(o2);
            self.free_exp_operand(o1);
        }
        e1.info = self.code_abc(op, 0, o1, o2) as i32;
        e1.kind = ExpKind::VReloc;
        Ok(())
    }

    fn free_exp_operand(&mut self, rk: u32) {
        if !Instruction::is_k(rk) {
            self.free_reg(rk);
        }
    }

    /// Comparison: emits the compare instruction plus its paired JMP,
    /// leaving a VJmp expression. GT/GE swap operands to reuse LT/LE.
    pub fn code_comp(
        &mut self,
        op: OpCode,
        cond: bool,
        e1: &mut ExpDesc,
        e2: &mut ExpDesc,
    ) -> LuaResult<()> {
        let mut o1 = self.exp_to_rk(e1)?;
        let mut o2 = self.exp_to_rk(e2)?;
        self.free_exp_operand(o2);
        self.free_exp_operand(o1);
        let mut cond = cond;
        if !cond && op != OpCode::Eq {
            std::mem::swap(&mut o1, &mut o2);
            cond = true;
        }
        e1.info = self.cond_jump(op, cond as u32, o1, o2)?;
        e1.kind = ExpKind::VJmp;
        Ok(())
    }

    // ============ Lists (table constructors) ============

    /// SETLIST for `nelems` accumulated items, `tostore` of which sit on
    /// the stack now (-1 = up to top).
    pub fn emit_setlist(&mut self, base: u32, nelems: u32, tostore: i32) -> LuaResult<()> {
        let c = (nelems - 1) / Instruction::FIELDS_PER_FLUSH + 1;
        let b = if tostore == -1 { 0 } else { tostore as u32 };
        if c <= Instruction::MAX_C {
            self.code_abc(OpCode::SetList, base, b, c);
        } else {
            self.code_abc(OpCode::SetList, base, b, 0);
            self.code_raw(c);
        }
        self.freereg = base + 1;
        Ok(())
    }
}
