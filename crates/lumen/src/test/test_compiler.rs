/// Compiler output checks: structural invariants of generated
/// prototypes, folding invariance, and specific instruction shapes.
use std::rc::Rc;

use crate::compiler::CompileOptions;
use crate::gc::GcParams;
use crate::lua_value::Proto;
use crate::lua_vm::{Instruction, LuaVM, OpCode, OpMode};

fn compile(src: &str) -> (LuaVM, Rc<Proto>) {
    let mut vm = LuaVM::new();
    let proto = vm.compile(src).expect("compile failed");
    (vm, proto)
}

/// Walk a prototype tree checking the §-style universal invariants:
/// register writes fit max_stack_size, constant and proto indices are in
/// range, jumps land inside the code.
fn check_proto(proto: &Proto) {
    let code_len = proto.code.len() as i64;
    assert!(code_len > 0, "empty prototype");
    assert_eq!(proto.code.len(), proto.line_info.len());
    let mut skip_pseudo = 0usize;
    for (pc, &i) in proto.code.iter().enumerate() {
        if skip_pseudo > 0 {
            // Upvalue-binding pseudo instructions after CLOSURE.
            skip_pseudo -= 1;
            continue;
        }
        let op = Instruction::get_opcode(i);
        let a = Instruction::get_a(i);
        match op.mode() {
            OpMode::IABC => {
                // Register-writing instructions stay inside the frame.
                assert!(
                    a < proto.max_stack_size as u32 || op == OpCode::Close,
                    "{:?} writes register {} beyond max_stack {} at pc {}",
                    op,
                    a,
                    proto.max_stack_size,
                    pc
                );
            }
            OpMode::IABx => {
                let bx = Instruction::get_bx(i) as usize;
                match op {
                    OpCode::LoadK | OpCode::GetGlobal | OpCode::SetGlobal => {
                        assert!(
                            bx < proto.constants.len(),
                            "{:?} constant index {} out of range at pc {}",
                            op,
                            bx,
                            pc
                        );
                    }
                    OpCode::Closure => {
                        assert!(bx < proto.protos.len(), "CLOSURE index out of range");
                        skip_pseudo = proto.protos[bx].upvalue_descs.len();
                    }
                    _ => {}
                }
            }
            OpMode::IAsBx => {
                let target = pc as i64 + 1 + Instruction::get_sbx(i) as i64;
                assert!(
                    (0..=code_len).contains(&target),
                    "{:?} jumps to {} (code length {}) at pc {}",
                    op,
                    target,
                    code_len,
                    pc
                );
            }
        }
        // RK operands index existing constants.
        if matches!(
            op,
            OpCode::Add
                | OpCode::Sub
                | OpCode::Mul
                | OpCode::Div
                | OpCode::Mod
                | OpCode::Pow
                | OpCode::Eq
                | OpCode::Lt
                | OpCode::Le
                | OpCode::GetTable
                | OpCode::SetTable
                | OpCode::Self_
        ) {
            for field in [Instruction::get_b(i), Instruction::get_c(i)] {
                if Instruction::is_k(field) {
                    assert!(
                        (Instruction::index_k(field) as usize) < proto.constants.len(),
                        "RK constant out of range at pc {}",
                        pc
                    );
                }
            }
        }
    }
    for sub in &proto.protos {
        check_proto(sub);
    }
}

const SAMPLES: &[&str] = &[
    "return 1 + 2 * 3",
    "local t = {10, 20, 30}; return t[1] + t[2] + t[3]",
    "local function f(x) return x * x end; return f(5)",
    r#"
    local function mk()
        local x = 0
        return function() x = x + 1; return x end
    end
    local c = mk(); c(); c(); return c()
    "#,
    r#"
    local function fib(n)
        if n < 2 then return n else return fib(n-1) + fib(n-2) end
    end
    return fib(10)
    "#,
    r#"
    local sum = 0
    for i = 1, 10 do
        for k, v in pairs({a = 1}) do sum = sum + i end
    end
    while sum > 10 do sum = sum - 1 break end
    repeat local x = sum until x == sum
    return sum
    "#,
    r#"
    local a, b, c = 1, "two", {3}
    a, b = b, a
    t = {f = function(...) return select('#', ...) end}
    return t.f(a, b, c)
    "#,
];

#[test]
fn test_proto_invariants_hold() {
    for src in SAMPLES {
        let (_vm, proto) = compile(src);
        check_proto(&proto);
    }
}

#[test]
fn test_chunk_is_vararg_toplevel() {
    let (_vm, proto) = compile("return ...");
    assert!(proto.is_vararg);
}

#[test]
fn test_constant_pool_dedup() {
    // The literal 7 appears three times, the string twice; each lands in
    // the pool once.
    let (_vm, proto) = compile("local x = 7 local y = 7 local z = 7 return 'dup' .. 'dup'");
    let sevens = proto
        .constants
        .iter()
        .filter(|k| k.as_number() == Some(7.0))
        .count();
    assert_eq!(sevens, 1, "duplicate numeric constants not pooled");
    let dups = proto.constants.iter().filter(|k| k.is_string()).count();
    assert_eq!(dups, 1, "duplicate string constants not pooled");
}

#[test]
fn test_concat_emits_single_spanning_instruction() {
    let (_vm, proto) = compile("local a, b, c = 'a', 'b', 'c' return a .. b .. c");
    let concats: Vec<u32> = proto
        .code
        .iter()
        .copied()
        .filter(|&i| Instruction::get_opcode(i) == OpCode::Concat)
        .collect();
    assert_eq!(concats.len(), 1, "expected one CONCAT");
    let i = concats[0];
    assert_eq!(
        Instruction::get_c(i) - Instruction::get_b(i),
        2,
        "CONCAT must span all three operands"
    );
}

#[test]
fn test_folding_collapses_constant_arith() {
    let (_vm, proto) = compile("return 2 + 3 * 4");
    // With folding the expression loads a single constant.
    assert!(proto
        .constants
        .iter()
        .any(|k| k.as_number() == Some(14.0)));
    assert!(!proto
        .code
        .iter()
        .any(|&i| Instruction::get_opcode(i) == OpCode::Add));
}

#[test]
fn test_folding_preserved_semantics_when_disabled() {
    let sources = [
        "return 2 + 3 * 4",
        "return 2 ^ 10 - 1",
        "return -(5 % 3)",
        "return 1 / 4",
        "return (2 + 3) .. ''",
    ];
    for src in &sources {
        let mut folded = LuaVM::new();
        folded.open_libs();
        let mut plain = LuaVM::with_options(
            CompileOptions {
                constant_folding: false,
            },
            GcParams::default(),
        );
        plain.open_libs();
        let a = folded.execute_string(src).expect("folded run");
        let b = plain.execute_string(src).expect("plain run");
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => assert_eq!(x, y, "mismatch for {}", src),
            _ => {
                let sa = folded.display_value(&a);
                let sb = plain.display_value(&b);
                assert_eq!(sa, sb, "mismatch for {}", src);
            }
        }
    }
}

#[test]
fn test_folding_never_divides_by_zero() {
    // 1/0 must stay a runtime operation (yielding inf), not a fold error.
    let (_vm, proto) = compile("return 1 / 0");
    assert!(proto
        .code
        .iter()
        .any(|&i| Instruction::get_opcode(i) == OpCode::Div));
    let mut vm = LuaVM::new();
    let v = vm.execute_string("return 1 / 0").expect("run");
    assert_eq!(v.as_number(), Some(f64::INFINITY));
}

#[test]
fn test_tailcall_opcode_emitted() {
    let (_vm, proto) = compile("local function f() end local function g() return f() end return g");
    let has_tailcall = proto.protos.iter().any(|p| {
        p.code
            .iter()
            .any(|&i| Instruction::get_opcode(i) == OpCode::TailCall)
    });
    assert!(has_tailcall, "lone return call must compile to TAILCALL");
}

#[test]
fn test_loadnil_merges() {
    let (_vm, proto) = compile("local a, b, c return a");
    // One LOADNIL covers all three (or none at function entry).
    let nils = proto
        .code
        .iter()
        .filter(|&&i| Instruction::get_opcode(i) == OpCode::LoadNil)
        .count();
    assert!(nils <= 1);
}

#[test]
fn test_closure_pseudo_instructions() {
    let (_vm, proto) = compile(
        r#"
        local up = 1
        return function() return up end
    "#,
    );
    let closure_pc = proto
        .code
        .iter()
        .position(|&i| Instruction::get_opcode(i) == OpCode::Closure)
        .expect("CLOSURE emitted");
    let child = &proto.protos[0];
    assert_eq!(child.upvalue_descs.len(), 1);
    assert!(child.upvalue_descs[0].in_stack);
    // The binding word follows immediately and is a MOVE.
    let pseudo = proto.code[closure_pc + 1];
    assert_eq!(Instruction::get_opcode(pseudo), OpCode::Move);
}

#[test]
fn test_max_stack_is_sane() {
    for src in SAMPLES {
        let (_vm, proto) = compile(src);
        assert!(proto.max_stack_size >= 2);
    }
}

#[test]
fn test_disassemble_smoke() {
    let (_vm, proto) = compile("local x = 1 return x + 2");
    let listing = proto.disassemble();
    assert!(listing.contains("LOADK"));
    assert!(listing.contains("RETURN"));
    assert!(listing.contains("chunk"));
}

#[test]
fn test_line_info_tracks_statements() {
    let (_vm, proto) = compile("local a = 1\nlocal b = 2\nreturn a + b");
    assert_eq!(proto.code.len(), proto.line_info.len());
    assert!(proto.line_info.iter().any(|&l| l == 1));
    assert!(proto.line_info.iter().any(|&l| l == 3));
}
