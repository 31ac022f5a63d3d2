// Call frames. One per active call, Lua or host.
//
// A Lua frame owns a cheap clone of the prototype (so the dispatch loop
// can fetch instructions without going through the function arena) plus
// the register window geometry: registers of this frame are the absolute
// stack slots base .. base+max_stack_size.

use std::rc::Rc;

use crate::lua_value::{LuaValue, Proto};

// Call status flags.
pub const FRAME_LUA: u8 = 1 << 0;
pub const FRAME_TAIL: u8 = 1 << 1;

/// "All results" marker for `expected_results`.
pub const MULTRET: i32 = -1;

pub struct CallFrame {
    /// The function value being executed (kept for GC rooting and env).
    pub func: LuaValue,
    /// Prototype of a Lua frame; host frames have no code to fetch.
    pub proto: Option<Rc<Proto>>,
    pub pc: usize,
    /// First register of this frame (absolute stack index).
    pub base: usize,
    /// Absolute stack index the callable occupied; results land here.
    pub return_base: usize,
    /// How many results the caller asked for (MULTRET = all).
    pub expected_results: i32,
    /// One past the last live stack slot when an open (multret)
    /// instruction has just produced values.
    pub top: usize,
    /// Absolute index of the first extra argument, for VARARG.
    pub vararg_base: usize,
    pub vararg_count: usize,
    pub status: u8,
}

impl CallFrame {
    pub fn new_lua(
        func: LuaValue,
        proto: Rc<Proto>,
        base: usize,
        return_base: usize,
        expected_results: i32,
    ) -> Self {
        let top = base + proto.max_stack_size as usize;
        CallFrame {
            func,
            proto: Some(proto),
            pc: 0,
            base,
            return_base,
            expected_results,
            top,
            vararg_base: 0,
            vararg_count: 0,
            status: FRAME_LUA,
        }
    }

    pub fn new_host(func: LuaValue, base: usize, top: usize) -> Self {
        CallFrame {
            func,
            proto: None,
            pc: 0,
            base,
            return_base: base,
            expected_results: 0,
            top,
            vararg_base: 0,
            vararg_count: 0,
            status: 0,
        }
    }

    #[inline(always)]
    pub fn is_lua(&self) -> bool {
        self.status & FRAME_LUA != 0
    }

    #[inline(always)]
    pub fn is_tail(&self) -> bool {
        self.status & FRAME_TAIL != 0
    }

    #[inline(always)]
    pub fn set_tail(&mut self) {
        self.status |= FRAME_TAIL;
    }

    #[inline(always)]
    pub fn set_vararg(&mut self, base: usize, count: usize) {
        self.vararg_base = base;
        self.vararg_count = count;
    }
}

impl std::fmt::Debug for CallFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallFrame")
            .field("base", &self.base)
            .field("pc", &self.pc)
            .field("top", &self.top)
            .field("is_lua", &self.is_lua())
            .finish()
    }
}
