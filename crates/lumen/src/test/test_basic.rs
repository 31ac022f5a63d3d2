/// Basic end-to-end execution: literals, arithmetic, simple chunks.
use crate::lua_vm::LuaVM;
use crate::lua_value::LuaValue;

fn run_number(src: &str) -> f64 {
    let mut vm = LuaVM::new();
    vm.open_libs();
    let v = vm.execute_string(src).expect("execution failed");
    v.as_number().expect("expected a number result")
}

#[test]
fn test_arith_precedence() {
    assert_eq!(run_number("return 1 + 2 * 3"), 7.0);
    assert_eq!(run_number("return (1 + 2) * 3"), 9.0);
    assert_eq!(run_number("return 2 ^ 3 ^ 2"), 512.0); // right assoc
    assert_eq!(run_number("return 10 - 2 - 3"), 5.0); // left assoc
    assert_eq!(run_number("return -2 ^ 2"), -4.0); // unary binds looser than ^
}

#[test]
fn test_literals() {
    let mut vm = LuaVM::new();
    assert!(vm.execute_string("return nil").expect("run").is_nil());
    assert_eq!(
        vm.execute_string("return true").expect("run").as_boolean(),
        Some(true)
    );
    assert_eq!(
        vm.execute_string("return 0.5").expect("run").as_number(),
        Some(0.5)
    );
    let s = vm.execute_string("return 'hello'").expect("run");
    let id = s.as_string_id().expect("string result");
    assert_eq!(vm.string_bytes(id), b"hello");
}

#[test]
fn test_table_literal_sum() {
    assert_eq!(
        run_number("local t = {10, 20, 30}; return t[1] + t[2] + t[3]"),
        60.0
    );
}

#[test]
fn test_simple_function() {
    assert_eq!(
        run_number("local function f(x) return x * x end; return f(5)"),
        25.0
    );
}

#[test]
fn test_globals() {
    assert_eq!(run_number("x = 42; return x"), 42.0);
    let mut vm = LuaVM::new();
    vm.execute_string("answer = 41 + 1").expect("run");
    assert_eq!(vm.get_global("answer").as_number(), Some(42.0));
}

#[test]
fn test_host_set_global() {
    let mut vm = LuaVM::new();
    vm.set_global("seed", LuaValue::Number(10.0));
    let v = vm.execute_string("return seed * 2").expect("run");
    assert_eq!(v.as_number(), Some(20.0));
}

#[test]
fn test_paren_truncates_results() {
    let mut vm = LuaVM::new();
    vm.open_libs();
    vm.execute_string(
        r#"
        local function two() return 1, 2 end
        local a, b = (two())
        assert(a == 1 and b == nil)
        local c, d = two()
        assert(c == 1 and d == 2)
    "#,
    )
    .expect("run");
}

#[test]
fn test_multiple_chunks_share_state() {
    let mut vm = LuaVM::new();
    vm.execute_string("counter = 0").expect("run");
    vm.execute_string("counter = counter + 1").expect("run");
    vm.execute_string("counter = counter + 1").expect("run");
    assert_eq!(vm.get_global("counter").as_number(), Some(2.0));
}

#[test]
fn test_execute_helper() {
    let v = crate::execute("return 6 * 7").expect("run");
    assert_eq!(v.as_number(), Some(42.0));
}

#[test]
fn test_local_scoping() {
    let mut vm = LuaVM::new();
    vm.open_libs();
    vm.execute_string(
        r#"
        local x = 1
        do
            local x = 2
            assert(x == 2)
        end
        assert(x == 1)
    "#,
    )
    .expect("run");
}
