/// Closures and upvalues: capture, sharing, and the open/close protocol.
use crate::lua_vm::LuaVM;

fn vm() -> LuaVM {
    let mut vm = LuaVM::new();
    vm.open_libs();
    vm
}

#[test]
fn test_counter_closure() {
    let mut vm = vm();
    let v = vm
        .execute_string(
            r#"
            local function mk()
                local x = 0
                return function() x = x + 1; return x end
            end
            local c = mk()
            c(); c()
            return c()
        "#,
        )
        .expect("run");
    assert_eq!(v.as_number(), Some(3.0));
}

#[test]
fn test_shared_upvalue() {
    let mut vm = vm();
    let v = vm
        .execute_string(
            r#"
            local function mk()
                local x = 10
                local function get() return x end
                local function set(v) x = v end
                return get, set
            end
            local g, s = mk()
            s(42)
            return g()
        "#,
        )
        .expect("run");
    assert_eq!(v.as_number(), Some(42.0));
}

#[test]
fn test_independent_instances() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local function counter()
            local n = 0
            return function() n = n + 1; return n end
        end
        local a, b = counter(), counter()
        a(); a()
        assert(a() == 3)
        assert(b() == 1)                  -- separate activation, separate cell
    "#,
    )
    .expect("run");
}

#[test]
fn test_loop_variable_capture() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local fns = {}
        for i = 1, 5 do
            fns[i] = function() return i end
        end
        assert(fns[1]() == 1)
        assert(fns[3]() == 3)
        assert(fns[5]() == 5)             -- each iteration closes its own cell
    "#,
    )
    .expect("run");
}

#[test]
fn test_nested_capture_through_levels() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local function outer(x)
            return function(y)
                return function(z)
                    return x + y + z
                end
            end
        end
        assert(outer(1)(2)(3) == 6)
        local f = outer(10)
        assert(f(20)(30) == 60)
    "#,
    )
    .expect("run");
}

#[test]
fn test_upvalue_mutation_before_and_after_close() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local get
        do
            local v = "open"
            get = function() return v end
            assert(get() == "open")       -- reads through the stack slot
            v = "changed"
            assert(get() == "changed")
        end
        -- scope exited: the upvalue is closed but still shared
        assert(get() == "changed")
    "#,
    )
    .expect("run");
}

#[test]
fn test_sibling_closures_same_cell_after_close() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local inc, read
        do
            local n = 0
            inc = function() n = n + 1 end
            read = function() return n end
        end
        inc(); inc(); inc()
        assert(read() == 3)               -- both closed onto the same cell
    "#,
    )
    .expect("run");
}

#[test]
fn test_recursive_local_function() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local function fact(n)
            if n <= 1 then return 1 end
            return n * fact(n - 1)        -- sees itself through the local
        end
        assert(fact(6) == 720)
    "#,
    )
    .expect("run");
}

#[test]
fn test_upvalue_across_vararg_function() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local acc = 0
        local function add(...)
            for _, v in ipairs({...}) do acc = acc + v end
        end
        add(1, 2)
        add(3)
        assert(acc == 6)
    "#,
    )
    .expect("run");
}
