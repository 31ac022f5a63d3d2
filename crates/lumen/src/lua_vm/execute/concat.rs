// OP_CONCAT: fold R(B)..R(C) right-to-left. Runs of strings and numbers
// are joined in one buffer; anything else goes through __concat. The
// accumulator always lives in the rightmost live stack slot so a GC step
// inside a metamethod still sees it as a root.

use crate::lua_value::{number_to_string, LuaValue};
use crate::lua_vm::state::LuaVM;
use crate::lua_vm::LuaResult;

impl LuaVM {
    /// Can this value take part in raw concatenation?
    fn concatable(v: &LuaValue) -> bool {
        matches!(v, LuaValue::Str(_) | LuaValue::Number(_))
    }

    fn push_bytes(&self, v: &LuaValue, out: &mut Vec<u8>) {
        match v {
            LuaValue::Str(id) => out.extend_from_slice(self.pool.string(*id).as_bytes()),
            LuaValue::Number(n) => out.extend_from_slice(number_to_string(*n).as_bytes()),
            _ => {}
        }
    }

    /// Concatenate the absolute stack range [first, last] into one value.
    /// The partial result is parked at the current fold position, which
    /// keeps it reachable while metamethods run.
    pub(crate) fn concat_range(&mut self, first: usize, last: usize) -> LuaResult<LuaValue> {
        let mut i = last;
        while i > first {
            let left = self.stack[i - 1];
            let right = self.stack[i];
            if Self::concatable(&left) && Self::concatable(&right) {
                // Extend the raw run as far left as it goes, then join
                // the whole batch at once.
                let mut run_start = i - 1;
                while run_start > first && Self::concatable(&self.stack[run_start - 1]) {
                    run_start -= 1;
                }
                let mut bytes = Vec::new();
                for j in run_start..=i {
                    self.push_bytes(&self.stack[j], &mut bytes);
                }
                let joined = LuaValue::Str(self.intern(&bytes));
                i = run_start;
                self.stack[i] = joined;
            } else {
                let concat = self.meta_keys.concat;
                let mut mm = self.get_metamethod(&left, concat);
                if mm.is_nil() {
                    mm = self.get_metamethod(&right, concat);
                }
                if mm.is_nil() {
                    let culprit = if Self::concatable(&left) { &right } else { &left };
                    let t = self.type_name_of(culprit);
                    return Err(self.rt_error(format!("attempt to concatenate a {} value", t)));
                }
                let result = self.call_metamethod(mm, &[left, right])?;
                i -= 1;
                self.stack[i] = result;
            }
        }
        Ok(self.stack[first])
    }
}
