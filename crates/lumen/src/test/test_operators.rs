/// Operator semantics: coercions, comparisons, logic, length, concat,
/// and the IEEE-754 boundary behavior.
use crate::lua_vm::LuaVM;

fn vm() -> LuaVM {
    let mut vm = LuaVM::new();
    vm.open_libs();
    vm
}

#[test]
fn test_division_boundaries() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        assert(1 / 0 > 1e308)            -- inf
        assert(-1 / 0 < -1e308)          -- -inf
        local nan = 0 / 0
        assert(nan ~= nan)               -- NaN is not equal to itself
    "#,
    )
    .expect("run");
}

#[test]
fn test_modulo_follows_divisor_sign() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        assert(5 % 3 == 2)
        assert(-5 % 3 == 1)
        assert(5 % -3 == -1)
        assert(7.5 % 2 == 1.5)
    "#,
    )
    .expect("run");
}

#[test]
fn test_string_number_coercion() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        assert("10" + 5 == 15)
        assert("3" * "4" == 12)
        assert(10 .. "" == "10")
        assert(1 .. 2 == "12")
        assert((1 / 3) .. "" == "0.33333333333333")  -- 14 significant digits
        assert(tostring(1 / 3) == "0.33333333333333")
    "#,
    )
    .expect("run");
}

#[test]
fn test_comparisons() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        assert(1 < 2)
        assert(2 <= 2)
        assert(3 > 2)
        assert(3 >= 3)
        assert("a" < "b")
        assert("abc" < "abd")
        assert("ab" < "abc")
        assert(not (1 == "1"))           -- no coercion in equality
        assert(1 ~= "1")
    "#,
    )
    .expect("run");
}

#[test]
fn test_truthiness_in_conditions() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local function truthy(v) if v then return true else return false end end
        assert(truthy(0))
        assert(truthy(""))
        assert(not truthy(nil))
        assert(not truthy(false))
    "#,
    )
    .expect("run");
}

#[test]
fn test_and_or_values() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        assert((nil and 1) == nil)
        assert((false or 5) == 5)
        assert((1 and 2) == 2)
        assert((nil or false) == false)
        local t = {}
        assert((t or {}) == t)           -- short circuit keeps identity
        -- short circuit must not evaluate the right side
        local hits = 0
        local function bump() hits = hits + 1; return true end
        local _ = false and bump()
        local _ = true or bump()
        assert(hits == 0)
    "#,
    )
    .expect("run");
}

#[test]
fn test_not_and_length() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        assert(not nil == true)
        assert(not 0 == false)
        assert(#"hello" == 5)
        assert(#"" == 0)
        assert(#{1, 2, 3} == 3)
    "#,
    )
    .expect("run");
}

#[test]
fn test_concat() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        assert("a" .. "b" .. "c" == "abc")
        assert("x" .. 1 == "x1")
        assert(2 .. ".5" == "2.5")
        local parts = ""
        for i = 1, 4 do parts = parts .. i end
        assert(parts == "1234")
    "#,
    )
    .expect("run");
}

#[test]
fn test_unary_minus() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local x = 5
        assert(-x == -5)
        assert(-(-x) == 5)
        assert(-"3" == -3)
    "#,
    )
    .expect("run");
}

#[test]
fn test_comparison_drives_jumps() {
    // Comparisons as bare values (materialized through LOADBOOL).
    let mut vm = vm();
    vm.execute_string(
        r#"
        local t = 1 < 2
        local f = 2 < 1
        assert(t == true and f == false)
        local v = (3 > 2) and "yes" or "no"
        assert(v == "yes")
    "#,
    )
    .expect("run");
}
