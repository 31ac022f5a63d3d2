/// Control flow: conditionals, the three loop forms, break.
use crate::lua_vm::{LuaError, LuaVM};

fn vm() -> LuaVM {
    let mut vm = LuaVM::new();
    vm.open_libs();
    vm
}

#[test]
fn test_if_elseif_else() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local function grade(n)
            if n >= 90 then return "A"
            elseif n >= 80 then return "B"
            elseif n >= 70 then return "C"
            else return "F" end
        end
        assert(grade(95) == "A")
        assert(grade(85) == "B")
        assert(grade(75) == "C")
        assert(grade(10) == "F")
    "#,
    )
    .expect("run");
}

#[test]
fn test_while_loop() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local sum, i = 0, 1
        while i <= 10 do
            sum = sum + i
            i = i + 1
        end
        assert(sum == 55)
        -- a loop whose condition is false at entry never runs
        local ran = false
        while false do ran = true end
        assert(not ran)
    "#,
    )
    .expect("run");
}

#[test]
fn test_repeat_until_sees_body_locals() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local i = 0
        repeat
            i = i + 1
            local done = i >= 3
        until done
        assert(i == 3)
    "#,
    )
    .expect("run");
}

#[test]
fn test_numeric_for() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local sum = 0
        for i = 1, 5 do sum = sum + i end
        assert(sum == 15)

        local down = {}
        for i = 3, 1, -1 do down[#down + 1] = i end
        assert(down[1] == 3 and down[3] == 1)

        local frac = 0
        for i = 1, 2, 0.5 do frac = frac + 1 end
        assert(frac == 3)

        -- the loop variable is local to the loop
        local count = 0
        for i = 1, 0 do count = count + 1 end
        assert(count == 0)
    "#,
    )
    .expect("run");
}

#[test]
fn test_numeric_for_zero_step_raises() {
    let mut vm = vm();
    let err = vm
        .execute_string("for i = 1, 10, 0 do end")
        .expect_err("zero step must raise");
    assert_eq!(err, LuaError::Runtime);
    assert!(vm.error_message().contains("'for' step is zero"));
}

#[test]
fn test_generic_for_pairs() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local t = {a = 1, b = 2, c = 3}
        local sum, count = 0, 0
        for k, v in pairs(t) do
            sum = sum + v
            count = count + 1
        end
        assert(sum == 6 and count == 3)
    "#,
    )
    .expect("run");
}

#[test]
fn test_generic_for_ipairs() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local t = {10, 20, 30, nil, 50}
        local sum = 0
        for i, v in ipairs(t) do sum = sum + v end
        assert(sum == 60)                 -- stops at the hole
    "#,
    )
    .expect("run");
}

#[test]
fn test_generic_for_custom_iterator() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local function range(n)
            local i = 0
            return function()
                i = i + 1
                if i <= n then return i end
            end
        end
        local sum = 0
        for v in range(4) do sum = sum + v end
        assert(sum == 10)
    "#,
    )
    .expect("run");
}

#[test]
fn test_break() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local n = 0
        for i = 1, 100 do
            if i > 5 then break end
            n = n + 1
        end
        assert(n == 5)

        local outer = 0
        for i = 1, 3 do
            for j = 1, 3 do
                if j == 2 then break end
                outer = outer + 1
            end
        end
        assert(outer == 3)                -- inner break leaves outer alive

        local w = 0
        while true do
            w = w + 1
            if w == 4 then break end
        end
        assert(w == 4)
    "#,
    )
    .expect("run");
}

#[test]
fn test_break_outside_loop_is_compile_error() {
    let mut vm = vm();
    let err = vm.execute_string("break").expect_err("must fail");
    match err {
        LuaError::Compile { message, .. } => assert!(message.contains("no loop")),
        other => panic!("expected compile error, got {:?}", other),
    }
}

#[test]
fn test_nested_loops_mixed() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local total = 0
        for i = 1, 3 do
            local j = i
            repeat
                total = total + 1
                j = j - 1
            until j == 0
        end
        assert(total == 6)
    "#,
    )
    .expect("run");
}
