/// Metatable dispatch: __index chains, __newindex, arithmetic handlers,
/// comparison handlers, __call, __concat, __tostring.
use crate::lua_vm::LuaVM;

fn vm() -> LuaVM {
    let mut vm = LuaVM::new();
    vm.open_libs();
    vm
}

#[test]
fn test_index_table_chain() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local base = {greet = "hello"}
        local mid = setmetatable({extra = 1}, {__index = base})
        local leaf = setmetatable({}, {__index = mid})
        assert(leaf.greet == "hello")     -- two hops up the chain
        assert(leaf.extra == 1)
        assert(leaf.absent == nil)
    "#,
    )
    .expect("run");
}

#[test]
fn test_index_function() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local t = setmetatable({}, {
            __index = function(tbl, key) return "computed:" .. key end,
        })
        assert(t.foo == "computed:foo")
        t.real = 1
        assert(t.real == 1)               -- present keys bypass the handler
    "#,
    )
    .expect("run");
}

#[test]
fn test_newindex() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local log = {}
        local t = setmetatable({}, {
            __newindex = function(tbl, k, v) rawset(log, k, v) end,
        })
        t.a = 1
        assert(rawget(t, "a") == nil)     -- write diverted
        assert(log.a == 1)
        rawset(t, "b", 2)
        t.b = 3                            -- present key writes directly
        assert(rawget(t, "b") == 3)
    "#,
    )
    .expect("run");
}

#[test]
fn test_newindex_table_forward() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local store = {}
        local t = setmetatable({}, {__newindex = store})
        t.x = 5
        assert(store.x == 5)
        assert(rawget(t, "x") == nil)
    "#,
    )
    .expect("run");
}

#[test]
fn test_arith_metamethods() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local mt = {
            __add = function(a, b) return {v = a.v + b.v} end,
            __sub = function(a, b) return {v = a.v - b.v} end,
            __mul = function(a, b) return {v = a.v * b.v} end,
            __unm = function(a) return {v = -a.v} end,
        }
        local function box(n) return setmetatable({v = n}, mt) end
        assert((box(3) + box(4)).v == 7)
        assert((box(9) - box(4)).v == 5)
        assert((box(3) * box(5)).v == 15)
        assert((-box(6)).v == -6)
        -- second operand's handler applies when the first has none
        local r = 0 + setmetatable({v = 1}, {__add = function(a, b) return 100 end})
        assert(r == 100)
    "#,
    )
    .expect("run");
}

#[test]
fn test_eq_metamethod() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local mt = {__eq = function(a, b) return a.id == b.id end}
        local a = setmetatable({id = 1}, mt)
        local b = setmetatable({id = 1}, mt)
        local c = setmetatable({id = 2}, mt)
        assert(a == b)
        assert(a ~= c)
        assert(a == a)                    -- identity short-circuits
        -- different metamethods: no call, not equal
        local other = setmetatable({id = 1}, {__eq = function() return true end})
        assert(not (a == other))
        -- never called for different types
        assert(not (a == 1))
    "#,
    )
    .expect("run");
}

#[test]
fn test_lt_le_metamethods() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local mt = {
            __lt = function(a, b) return a.v < b.v end,
        }
        local function w(n) return setmetatable({v = n}, mt) end
        assert(w(1) < w(2))
        assert(not (w(2) < w(1)))
        -- without __le, a <= b falls back to not (b < a)
        assert(w(1) <= w(1))
        assert(w(1) <= w(2))
        assert(not (w(3) <= w(2)))
    "#,
    )
    .expect("run");
}

#[test]
fn test_call_metamethod() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local callable = setmetatable({}, {
            __call = function(self, a, b) return a + b end,
        })
        assert(callable(2, 3) == 5)
    "#,
    )
    .expect("run");
}

#[test]
fn test_concat_metamethod() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local mt = {__concat = function(a, b)
            local av = type(a) == "table" and a.s or a
            local bv = type(b) == "table" and b.s or b
            return av .. "|" .. bv
        end}
        local t = setmetatable({s = "T"}, mt)
        assert(t .. "x" == "T|x")
        assert("x" .. t == "x|T")
    "#,
    )
    .expect("run");
}

#[test]
fn test_tostring_metamethod() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local t = setmetatable({}, {__tostring = function() return "pretty" end})
        assert(tostring(t) == "pretty")
        assert(tostring(42) == "42")
        assert(tostring(nil) == "nil")
        assert(tostring(true) == "true")
    "#,
    )
    .expect("run");
}

#[test]
fn test_protected_metatable() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local t = setmetatable({}, {__metatable = "locked"})
        assert(getmetatable(t) == "locked")
        local ok, err = pcall(setmetatable, t, {})
        assert(not ok)
    "#,
    )
    .expect("run");
}

#[test]
fn test_metamethod_errors_propagate() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local t = setmetatable({}, {__index = function() error("boom") end})
        local ok, err = pcall(function() return t.anything end)
        assert(not ok)
        assert(err ~= nil)
    "#,
    )
    .expect("run");
}
