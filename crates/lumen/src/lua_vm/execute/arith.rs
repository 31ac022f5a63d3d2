// Arithmetic, unary minus and length, with the coercion and metamethod
// fallbacks of the reference runtime: numeric strings count as numbers;
// otherwise the first operand's metamethod is consulted, then the
// second's; no handler is a type error.

use crate::gc::StringId;
use crate::lua_value::{str_to_number, LuaValue};
use crate::lua_vm::opcode::OpCode;
use crate::lua_vm::state::LuaVM;
use crate::lua_vm::LuaResult;

impl LuaVM {
    /// Number, or number-coercible string.
    pub(crate) fn to_number(&self, v: &LuaValue) -> Option<f64> {
        match v {
            LuaValue::Number(n) => Some(*n),
            LuaValue::Str(id) => str_to_number(self.pool.string(*id).as_bytes()),
            _ => None,
        }
    }

    pub(crate) fn arith(&mut self, op: OpCode, lhs: LuaValue, rhs: LuaValue) -> LuaResult<LuaValue> {
        if let (Some(a), Some(b)) = (self.to_number(&lhs), self.to_number(&rhs)) {
            return Ok(LuaValue::Number(Self::raw_arith(op, a, b)));
        }
        let event = self.arith_event(op);
        self.arith_metamethod(event, lhs, rhs)
    }

    /// The numeric core; lives apart so the compiler's constant folder
    /// computes exactly what the runtime computes.
    pub(crate) fn raw_arith(op: OpCode, a: f64, b: f64) -> f64 {
        match op {
            OpCode::Add => a + b,
            OpCode::Sub => a - b,
            OpCode::Mul => a * b,
            OpCode::Div => a / b,
            // Lua's mod: a - floor(a/b)*b, so the sign follows b.
            OpCode::Mod => a - (a / b).floor() * b,
            OpCode::Pow => a.powf(b),
            _ => unreachable!("not an arithmetic opcode"),
        }
    }

    fn arith_event(&self, op: OpCode) -> StringId {
        match op {
            OpCode::Add => self.meta_keys.add,
            OpCode::Sub => self.meta_keys.sub,
            OpCode::Mul => self.meta_keys.mul,
            OpCode::Div => self.meta_keys.div,
            OpCode::Mod => self.meta_keys.modulo,
            OpCode::Pow => self.meta_keys.pow,
            _ => unreachable!("not an arithmetic opcode"),
        }
    }

    pub(crate) fn arith_unm(&mut self, v: LuaValue) -> LuaResult<LuaValue> {
        if let Some(n) = self.to_number(&v) {
            return Ok(LuaValue::Number(-n));
        }
        let unm = self.meta_keys.unm;
        // The reference runtime calls __unm with the operand doubled.
        self.arith_metamethod(unm, v, v)
    }

    fn arith_metamethod(
        &mut self,
        event: StringId,
        lhs: LuaValue,
        rhs: LuaValue,
    ) -> LuaResult<LuaValue> {
        let mut mm = self.get_metamethod(&lhs, event);
        if mm.is_nil() {
            mm = self.get_metamethod(&rhs, event);
        }
        if mm.is_nil() {
            // Blame the operand that is not a number.
            let culprit = if self.to_number(&lhs).is_none() { &lhs } else { &rhs };
            let t = self.type_name_of(culprit);
            return Err(self.rt_error(format!("attempt to perform arithmetic on a {} value", t)));
        }
        self.call_metamethod(mm, &[lhs, rhs])
    }

    /// OP_LEN: string byte-length, table border, or __len for userdata.
    pub(crate) fn length_of(&mut self, v: LuaValue) -> LuaResult<LuaValue> {
        match v {
            LuaValue::Str(id) => Ok(LuaValue::Number(self.pool.string(id).as_bytes().len() as f64)),
            LuaValue::Table(tid) => Ok(LuaValue::Number(self.pool.table(tid).length() as f64)),
            other => {
                let mm = self.get_metamethod(&other, self.meta_keys.len);
                if mm.is_nil() {
                    let t = self.type_name_of(&other);
                    return Err(self.rt_error(format!("attempt to get length of a {} value", t)));
                }
                self.call_metamethod(mm, &[other])
            }
        }
    }
}
