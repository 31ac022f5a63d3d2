/// Tables: constructors, length, iteration, raw access.
use crate::lua_vm::LuaVM;

fn vm() -> LuaVM {
    let mut vm = LuaVM::new();
    vm.open_libs();
    vm
}

#[test]
fn test_mixed_keys() {
    let mut vm = vm();
    let v = vm
        .execute_string(
            r#"
            local t = {}
            t[1] = "a"
            t["x"] = "b"
            t[2] = "c"
            return t[1] .. t[2] .. t.x
        "#,
        )
        .expect("run");
    let id = v.as_string_id().expect("string");
    assert_eq!(vm.string_bytes(id), b"acb");
}

#[test]
fn test_constructor_forms() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local t = {1, 2, x = "ex", [10] = "ten", 3; 4}
        assert(t[1] == 1 and t[2] == 2 and t[3] == 3 and t[4] == 4)
        assert(t.x == "ex")
        assert(t[10] == "ten")
    "#,
    )
    .expect("run");
}

#[test]
fn test_large_constructor_setlist_batches() {
    // More than one SETLIST flush (FPF = 50).
    let mut vm = vm();
    let mut src = String::from("local t = {");
    for i in 1..=120 {
        src.push_str(&format!("{},", i));
    }
    src.push_str("} assert(#t == 120) assert(t[120] == 120) assert(t[51] == 51) return t[99]");
    let v = vm.execute_string(&src).expect("run");
    assert_eq!(v.as_number(), Some(99.0));
}

#[test]
fn test_constructor_spreads_last_call() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local function three() return 7, 8, 9 end
        local t = {0, three()}
        assert(#t == 4 and t[4] == 9)
        local u = {three(), 0}
        assert(#u == 2 and u[1] == 7)
    "#,
    )
    .expect("run");
}

#[test]
fn test_length_borders() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        assert(#{} == 0)
        assert(#{1, 2, 3} == 3)
        local t = {1, 2, 3}
        t[4] = 4
        assert(#t == 4)
        t[4] = nil
        assert(#t == 3)
        -- with a hole, any border is legal
        local h = {1, 2, nil, 4}
        local n = #h
        assert(n == 2 or n == 4)
    "#,
    )
    .expect("run");
}

#[test]
fn test_nil_assignment_behavior() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local t = {a = 1, b = 2}
        t.a = nil
        assert(t.a == nil and t.b == 2)
        local found = false
        for k in pairs(t) do
            assert(k ~= "a")
            found = k == "b" or found
        end
        assert(found)
    "#,
    )
    .expect("run");
}

#[test]
fn test_next_iteration_complete() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local t = {10, 20, 30, alpha = 1, beta = 2}
        local keys = 0
        local sum = 0
        for k, v in next, t do
            keys = keys + 1
            sum = sum + v
        end
        assert(keys == 5)
        assert(sum == 63)
    "#,
    )
    .expect("run");
}

#[test]
fn test_rawget_rawset() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local t = setmetatable({}, {
            __index = function() return "shadow" end,
            __newindex = function() error("blocked") end,
        })
        rawset(t, "k", "direct")
        assert(rawget(t, "k") == "direct")
        assert(t.k == "direct")           -- present key skips __index
        assert(t.missing == "shadow")
        assert(rawget(t, "missing") == nil)
    "#,
    )
    .expect("run");
}

#[test]
fn test_table_identity() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local a = {}
        local b = {}
        local c = a
        assert(a == c)
        assert(a ~= b)
        local nested = {inner = a}
        assert(nested.inner == c)
    "#,
    )
    .expect("run");
}

#[test]
fn test_tables_as_keys() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local k1, k2 = {}, {}
        local t = {}
        t[k1] = "one"
        t[k2] = "two"
        t[true] = "bool"
        t[0.5] = "half"
        assert(t[k1] == "one" and t[k2] == "two")
        assert(t[true] == "bool" and t[0.5] == "half")
    "#,
    )
    .expect("run");
}

#[test]
fn test_unpack() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local a, b, c = unpack({1, 2, 3})
        assert(a == 1 and b == 2 and c == 3)
        local x, y = unpack({10, 20, 30}, 2)
        assert(x == 20 and y == 30)
    "#,
    )
    .expect("run");
}

#[test]
fn test_set_then_get_identity() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local t = {}
        local v = {"payload"}
        t[3.25] = v
        assert(t[3.25] == v)
        t.name = v
        assert(t.name == v)
    "#,
    )
    .expect("run");
}
