/// Error raising, protected calls, unwinding, and phase-error reporting.
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaError, LuaVM};

fn vm() -> LuaVM {
    let mut vm = LuaVM::new();
    vm.open_libs();
    vm
}

#[test]
fn test_pcall_success_and_failure() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local ok, a, b = pcall(function() return 1, 2 end)
        assert(ok and a == 1 and b == 2)

        local ok2, err = pcall(function() error("bad") end)
        assert(not ok2)
        assert(type(err) == "string")
    "#,
    )
    .expect("run");
}

#[test]
fn test_error_with_non_string_value() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local ok, err = pcall(function() error({code = 42}) end)
        assert(not ok)
        assert(type(err) == "table")      -- raised value unchanged
        assert(err.code == 42)
    "#,
    )
    .expect("run");
}

#[test]
fn test_string_errors_carry_position() {
    let mut vm = vm();
    let err = vm
        .execute_string("local x = 1\nerror('exploded')")
        .expect_err("must raise");
    assert_eq!(err, LuaError::Runtime);
    let msg = vm.error_message();
    assert!(msg.contains("exploded"), "message was: {}", msg);
    assert!(msg.contains(":2:"), "missing line prefix: {}", msg);
}

#[test]
fn test_runtime_type_errors() {
    let mut vm = vm();
    let err = vm.execute_string("return nil + 1").expect_err("must raise");
    assert_eq!(err, LuaError::Runtime);
    assert!(vm.error_message().contains("arithmetic"));

    let mut vm = LuaVM::new();
    let err = vm.execute_string("local x; x()").expect_err("must raise");
    assert_eq!(err, LuaError::Runtime);
    assert!(vm.error_message().contains("attempt to call"));

    let mut vm = LuaVM::new();
    let err = vm.execute_string("local t; return t.k").expect_err("must raise");
    assert_eq!(err, LuaError::Runtime);
    assert!(vm.error_message().contains("attempt to index"));
}

#[test]
fn test_nested_pcall() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local outer_ok, outer = pcall(function()
            local inner_ok, inner = pcall(function() error("inner") end)
            assert(not inner_ok)
            return "outer survived"
        end)
        assert(outer_ok and outer == "outer survived")
    "#,
    )
    .expect("run");
}

#[test]
fn test_unwinding_closes_upvalues() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local probe
        local ok = pcall(function()
            local secret = "before"
            probe = function() return secret end
            secret = "after"
            error("unwind now")
        end)
        assert(not ok)
        assert(probe() == "after")        -- cell closed during unwind
    "#,
    )
    .expect("run");
}

#[test]
fn test_lex_error_kind() {
    let mut vm = LuaVM::new();
    let err = vm.execute_string("return \"unfinished").expect_err("must fail");
    match err {
        LuaError::Lex { message, line, .. } => {
            assert!(message.contains("unterminated"));
            assert_eq!(line, 1);
        }
        other => panic!("expected lex error, got {:?}", other),
    }
}

#[test]
fn test_parse_error_kind() {
    let mut vm = LuaVM::new();
    let err = vm.execute_string("local = 5").expect_err("must fail");
    assert!(matches!(err, LuaError::Parse { .. }));
    // The Display form carries chunk:line:.
    assert!(format!("{}", err).starts_with("chunk:1:"));
}

#[test]
fn test_compile_error_kind() {
    let mut vm = LuaVM::new();
    let err = vm
        .execute_string("return function() return ... end")
        .map(|_| ())
        .expect_err("'...' outside vararg function must fail");
    match err {
        LuaError::Compile { message, .. } => {
            assert!(message.contains("outside a vararg function"))
        }
        other => panic!("expected compile error, got {:?}", other),
    }
}

#[test]
fn test_host_pcall_api() {
    let mut vm = vm();
    let f = vm.execute_string("return function() error('x') end").expect("run");
    let result = vm.pcall(f, &[]).expect("pcall must not fail at the host level");
    assert!(result.is_err());

    let ok_fn = vm
        .execute_string("return function(a, b) return a * b end")
        .expect("run");
    let result = vm
        .pcall(ok_fn, &[LuaValue::Number(6.0), LuaValue::Number(7.0)])
        .expect("pcall");
    let values = result.expect("call succeeded");
    assert_eq!(values[0].as_number(), Some(42.0));
}

#[test]
fn test_error_in_for_iterator() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local ok = pcall(function()
            for x in function() error("iter") end do end
        end)
        assert(not ok)
    "#,
    )
    .expect("run");
}

#[test]
fn test_state_survives_error() {
    let mut vm = vm();
    let _ = vm.execute_string("sticky = 7 error('bang')");
    // The VM remains usable after an unprotected error.
    let v = vm.execute_string("return sticky").expect("run");
    assert_eq!(v.as_number(), Some(7.0));
}
