/// Garbage collector behavior through the public VM surface: interning,
/// full collection, reachability, incremental stepping.
use crate::gc::GcParams;
use crate::compiler::CompileOptions;
use crate::lua_vm::LuaVM;

fn vm() -> LuaVM {
    let mut vm = LuaVM::new();
    vm.open_libs();
    vm
}

#[test]
fn test_interning_identity() {
    let mut vm = LuaVM::new();
    let a = vm.intern(b"interned string");
    let b = vm.intern(b"interned string");
    let c = vm.intern(b"another");
    assert_eq!(a, b);
    assert_ne!(a, c);
    // Strings built at runtime intern to the same handle.
    let v = vm
        .execute_string("return 'inter' .. 'ned string'")
        .expect("run");
    assert_eq!(v.as_string_id(), Some(a));
}

#[test]
fn test_full_collection_reclaims_garbage() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        for i = 1, 200 do
            local t = {i, i + 1, i + 2}   -- dies immediately
        end
        keep = {1, 2, 3}
    "#,
    )
    .expect("run");
    let before = vm.live_objects();
    vm.collect_garbage();
    let after = vm.live_objects();
    assert!(after < before, "collection freed nothing: {} -> {}", before, after);
    assert!(vm.gc_stats().objects_collected > 0);
    // The survivor is intact.
    let v = vm.execute_string("return keep[1] + keep[2] + keep[3]").expect("run");
    assert_eq!(v.as_number(), Some(6.0));
}

#[test]
fn test_reachable_objects_survive() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        root = {level1 = {level2 = {payload = "deep"}}}
        cycle_a = {}
        cycle_b = {back = cycle_a}
        cycle_a.fwd = cycle_b
    "#,
    )
    .expect("run");
    vm.collect_garbage();
    vm.collect_garbage();
    let v = vm
        .execute_string("return root.level1.level2.payload")
        .expect("run");
    let id = v.as_string_id().expect("string");
    assert_eq!(vm.string_bytes(id), b"deep");
    // The cycle is still reachable and intact.
    let v = vm
        .execute_string("return cycle_a.fwd.back == cycle_a")
        .expect("run");
    assert_eq!(v.as_boolean(), Some(true));
}

#[test]
fn test_cycles_are_collected_when_unreachable() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        local a, b = {}, {}
        a.next = b
        b.prev = a                         -- reference cycle
    "#,
    )
    .expect("run");
    vm.collect_garbage();
    let live_after_first = vm.live_objects();
    vm.collect_garbage();
    // Nothing more to free the second time around.
    assert_eq!(vm.live_objects(), live_after_first);
}

#[test]
fn test_closed_upvalues_survive_collection() {
    let mut vm = vm();
    vm.execute_string(
        r#"
        do
            local hidden = {"treasure"}
            fetch = function() return hidden[1] end
        end
    "#,
    )
    .expect("run");
    vm.collect_garbage();
    vm.collect_garbage();
    let v = vm.execute_string("return fetch()").expect("run");
    let id = v.as_string_id().expect("string");
    assert_eq!(vm.string_bytes(id), b"treasure");
}

#[test]
fn test_incremental_pressure() {
    // A tiny threshold forces incremental steps during execution.
    let mut vm = LuaVM::with_options(
        CompileOptions::default(),
        GcParams {
            pause_multiplier: 150,
            step_work: 32,
            initial_threshold: 2 * 1024,
        },
    );
    vm.open_libs();
    vm.execute_string(
        r#"
        live = {}
        for i = 1, 500 do
            live[(i % 10) + 1] = {tag = "s" .. i}
            local garbage = {i, "temp" .. i}
        end
        for i = 1, 10 do assert(live[i].tag ~= nil) end
    "#,
    )
    .expect("run under GC pressure");
    // Whatever phase we stopped in, a full cycle still settles cleanly.
    vm.collect_garbage();
    let v = vm.execute_string("return live[5].tag").expect("run");
    assert!(v.is_string());
}

#[test]
fn test_collection_updates_stats_and_threshold() {
    let mut vm = vm();
    vm.execute_string("for i = 1, 100 do local _ = {i} end").expect("run");
    let collections_before = vm.gc_stats().collection_count;
    vm.collect_garbage();
    let stats = vm.gc_stats();
    assert_eq!(stats.collection_count, collections_before + 1);
    assert!(stats.live_bytes > 0);
    assert!(vm.heap_bytes() > 0);
}

#[test]
fn test_string_constants_survive() {
    let mut vm = vm();
    vm.execute_string("greet = function() return 'constant text' end").expect("run");
    vm.collect_garbage();
    vm.collect_garbage();
    let v = vm.execute_string("return greet()").expect("run");
    let id = v.as_string_id().expect("string");
    assert_eq!(vm.string_bytes(id), b"constant text");
}
