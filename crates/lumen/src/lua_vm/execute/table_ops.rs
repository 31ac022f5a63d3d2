// Indexed reads and writes with the __index / __newindex chains.
//
// A chain entry that is a table recurses into it; a function is called;
// chains longer than MAX_TAG_LOOP raise.

use super::MAX_TAG_LOOP;
use crate::lua_value::LuaValue;
use crate::lua_vm::state::LuaVM;
use crate::lua_vm::LuaResult;

impl LuaVM {
    /// `t[key]` with metamethods.
    pub(crate) fn index_value(&mut self, t: LuaValue, key: LuaValue) -> LuaResult<LuaValue> {
        let mut t = t;
        for _ in 0..MAX_TAG_LOOP {
            match t {
                LuaValue::Table(tid) => {
                    let v = self.pool.table(tid).get(&key);
                    if !v.is_nil() {
                        return Ok(v);
                    }
                    let mm = self.get_metamethod(&t, self.meta_keys.index);
                    if mm.is_nil() {
                        return Ok(LuaValue::Nil);
                    }
                    if mm.is_function() {
                        return self.call_metamethod(mm, &[t, key]);
                    }
                    t = mm;
                }
                other => {
                    let mm = self.get_metamethod(&other, self.meta_keys.index);
                    if mm.is_nil() {
                        let tn = self.type_name_of(&other);
                        return Err(self.rt_error(format!("attempt to index a {} value", tn)));
                    }
                    if mm.is_function() {
                        return self.call_metamethod(mm, &[other, key]);
                    }
                    t = mm;
                }
            }
        }
        Err(self.rt_error("loop in gettable"))
    }

    /// `t[key] = value` with metamethods.
    pub(crate) fn set_index_value(
        &mut self,
        t: LuaValue,
        key: LuaValue,
        value: LuaValue,
    ) -> LuaResult<()> {
        let mut t = t;
        for _ in 0..MAX_TAG_LOOP {
            match t {
                LuaValue::Table(tid) => {
                    let existing = self.pool.table(tid).get(&key);
                    if !existing.is_nil() {
                        self.raw_table_set(tid, key, value);
                        return Ok(());
                    }
                    let mm = self.get_metamethod(&t, self.meta_keys.newindex);
                    if mm.is_nil() {
                        self.check_table_key(&key)?;
                        self.raw_table_set(tid, key, value);
                        return Ok(());
                    }
                    if mm.is_function() {
                        self.call_metamethod(mm, &[t, key, value])?;
                        return Ok(());
                    }
                    t = mm;
                }
                other => {
                    let mm = self.get_metamethod(&other, self.meta_keys.newindex);
                    if mm.is_nil() {
                        let tn = self.type_name_of(&other);
                        return Err(self.rt_error(format!("attempt to index a {} value", tn)));
                    }
                    if mm.is_function() {
                        self.call_metamethod(mm, &[other, key, value])?;
                        return Ok(());
                    }
                    t = mm;
                }
            }
        }
        Err(self.rt_error("loop in settable"))
    }

    /// New keys must be neither nil nor NaN.
    pub(crate) fn check_table_key(&mut self, key: &LuaValue) -> LuaResult<()> {
        match key {
            LuaValue::Nil => Err(self.rt_error("table index is nil")),
            LuaValue::Number(n) if n.is_nan() => Err(self.rt_error("table index is NaN")),
            _ => Ok(()),
        }
    }
}
