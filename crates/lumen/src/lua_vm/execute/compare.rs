// EQ / LT / LE semantics.
//
// Equality: different types are never equal (both number variants are one
// type); heap values short-circuit on identity before __eq is considered,
// and __eq only fires when both operands are the same kind (table or
// userdata) and resolve the *same* handler.

use crate::lua_value::LuaValue;
use crate::lua_vm::state::LuaVM;
use crate::lua_vm::LuaResult;

impl LuaVM {
    pub(crate) fn values_equal(&mut self, lhs: &LuaValue, rhs: &LuaValue) -> LuaResult<bool> {
        if lhs.raw_equal(rhs) {
            return Ok(true);
        }
        // Identity failed; only same-kind tables/userdata may still be
        // equal through __eq.
        let same_kind = matches!(
            (lhs, rhs),
            (LuaValue::Table(_), LuaValue::Table(_))
                | (LuaValue::Userdata(_), LuaValue::Userdata(_))
        );
        if !same_kind {
            return Ok(false);
        }
        let eq = self.meta_keys.eq;
        let mm1 = self.get_metamethod(lhs, eq);
        if mm1.is_nil() {
            return Ok(false);
        }
        let mm2 = self.get_metamethod(rhs, eq);
        if !mm1.raw_equal(&mm2) {
            return Ok(false);
        }
        let r = self.call_metamethod(mm1, &[*lhs, *rhs])?;
        Ok(r.is_truthy())
    }

    pub(crate) fn less_than(&mut self, lhs: &LuaValue, rhs: &LuaValue) -> LuaResult<bool> {
        match (lhs, rhs) {
            (LuaValue::Number(a), LuaValue::Number(b)) => Ok(a < b),
            (LuaValue::Str(a), LuaValue::Str(b)) => {
                Ok(self.pool.string(*a).as_bytes() < self.pool.string(*b).as_bytes())
            }
            _ => {
                let lt = self.meta_keys.lt;
                let mut mm = self.get_metamethod(lhs, lt);
                if mm.is_nil() {
                    mm = self.get_metamethod(rhs, lt);
                }
                if mm.is_nil() {
                    return Err(self.order_error(lhs, rhs));
                }
                let r = self.call_metamethod(mm, &[*lhs, *rhs])?;
                Ok(r.is_truthy())
            }
        }
    }

    pub(crate) fn less_equal(&mut self, lhs: &LuaValue, rhs: &LuaValue) -> LuaResult<bool> {
        match (lhs, rhs) {
            (LuaValue::Number(a), LuaValue::Number(b)) => Ok(a <= b),
            (LuaValue::Str(a), LuaValue::Str(b)) => {
                Ok(self.pool.string(*a).as_bytes() <= self.pool.string(*b).as_bytes())
            }
            _ => {
                let le = self.meta_keys.le;
                let mut mm = self.get_metamethod(lhs, le);
                if mm.is_nil() {
                    mm = self.get_metamethod(rhs, le);
                }
                if !mm.is_nil() {
                    let r = self.call_metamethod(mm, &[*lhs, *rhs])?;
                    return Ok(r.is_truthy());
                }
                // No __le: fall back to not (rhs < lhs).
                let lt = self.meta_keys.lt;
                let mut mm = self.get_metamethod(rhs, lt);
                if mm.is_nil() {
                    mm = self.get_metamethod(lhs, lt);
                }
                if mm.is_nil() {
                    return Err(self.order_error(lhs, rhs));
                }
                let r = self.call_metamethod(mm, &[*rhs, *lhs])?;
                Ok(r.is_falsy())
            }
        }
    }

    fn order_error(&mut self, lhs: &LuaValue, rhs: &LuaValue) -> crate::lua_vm::LuaError {
        let t1 = self.type_name_of(lhs);
        let t2 = self.type_name_of(rhs);
        if t1 == t2 {
            self.rt_error(format!("attempt to compare two {} values", t1))
        } else {
            self.rt_error(format!("attempt to compare {} with {}", t1, t2))
        }
    }
}
