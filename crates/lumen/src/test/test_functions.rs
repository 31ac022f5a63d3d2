/// Calls, returns, varargs, recursion and tail calls.
use crate::lua_vm::LuaVM;

fn vm() -> LuaVM {
    let mut vm = LuaVM::new();
    vm.open_libs();
    vm
}

#[test]
fn test_fib() {
    let mut vm = vm();
    let v = vm
        .execute_string(
            r#"
            local function fib(n)
                if n < 2 then return n else return fib(n-1) + fib(n-2) end
            end
            return fib(10)
        "#,
        )
        .expect("run");
    assert_eq!(v.as_number(), Some(55.0));
}

#[test]
fn test_multiple_returns() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local function three() return 1, 2, 3 end
        local a, b, c = three()
        assert(a == 1 and b == 2 and c == 3)
        local x, y = three()
        assert(x == 1 and y == 2)
        local p, q, r, s = three()
        assert(r == 3 and s == nil)
        -- only the last call in a list spreads
        local m, n, o = three(), 10
        assert(m == 1 and n == 10 and o == nil)
    "#,
    )
    .expect("run");
}

#[test]
fn test_call_results_in_expressions() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local function two() return 3, 4 end
        assert(two() + 1 == 4)            -- adjusted to one value
        local t = {two()}
        assert(#t == 2 and t[2] == 4)
        local u = {two(), two()}
        assert(#u == 3)                   -- first call truncated to one
    "#,
    )
    .expect("run");
}

#[test]
fn test_varargs() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local function count(...) return select('#', ...) end
        assert(count() == 0)
        assert(count(1, nil, 3) == 3)

        assert(select(2, "a", "b", "c") == "b")
        assert(select(-1, "a", "b") == "b")   -- negative: from the end
        assert(select(-2, "a", "b") == "a")
        assert(select('#', select(-1, "a", "b")) == 1)

        local function sum(...)
            local total = 0
            for _, v in ipairs({...}) do total = total + v end
            return total
        end
        assert(sum(1, 2, 3, 4) == 10)

        local function first(...) local a = ... return a end
        assert(first(7, 8) == 7)

        local function pass(...) return ... end
        local a, b, c = pass(5, 6, 7)
        assert(a == 5 and b == 6 and c == 7)
    "#,
    )
    .expect("run");
}

#[test]
fn test_vararg_mixed_with_params() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local function f(head, ...)
            return head, select('#', ...)
        end
        local h, n = f("x", 1, 2, 3)
        assert(h == "x" and n == 3)
        local h2, n2 = f("only")
        assert(h2 == "only" and n2 == 0)
    "#,
    )
    .expect("run");
}

#[test]
fn test_tail_call_depth() {
    // A tail-recursive countdown must not grow the frame stack.
    let mut vm = vm();
    let v = vm
        .execute_string(
            r#"
            local function loop(n)
                if n == 0 then return "done" end
                return loop(n - 1)
            end
            return loop(100000)
        "#,
        )
        .expect("tail recursion must not overflow");
    let id = v.as_string_id().expect("string");
    assert_eq!(vm.string_bytes(id), b"done");
}

#[test]
fn test_method_calls() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local account = {balance = 100}
        function account:deposit(n) self.balance = self.balance + n end
        function account:get() return self.balance end
        account:deposit(50)
        assert(account:get() == 150)
    "#,
    )
    .expect("run");
}

#[test]
fn test_function_paths() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        lib = {}
        lib.inner = {}
        function lib.inner.make(n) return n + 1 end
        assert(lib.inner.make(41) == 42)
    "#,
    )
    .expect("run");
}

#[test]
fn test_default_nil_params() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local function f(a, b) return a, b end
        local x, y = f(1)
        assert(x == 1 and y == nil)
        -- extra arguments are dropped
        local p, q = f(1, 2, 3)
        assert(p == 1 and q == 2)
    "#,
    )
    .expect("run");
}

#[test]
fn test_functions_are_values() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local function add(a, b) return a + b end
        local ops = {plus = add}
        assert(ops.plus(2, 3) == 5)
        local alias = add
        assert(alias == add)              -- identity equality
        assert(alias(1, 1) == 2)
    "#,
    )
    .expect("run");
}
