// Base host functions, registered through the public host-function
// convention: read arguments from the frame window, push results, return
// the count. This is the collaborator surface the core needs for its own
// tests; the full standard library lives with the host.

use crate::lua_value::{str_to_number, LuaValue};
use crate::lua_vm::state::LuaVM;
use crate::lua_vm::{LuaError, LuaResult};

impl LuaVM {
    /// Register the base functions into the globals table.
    pub fn open_libs(&mut self) {
        self.register_function("print", lua_print);
        self.register_function("type", lua_type);
        self.register_function("tostring", lua_tostring);
        self.register_function("tonumber", lua_tonumber);
        self.register_function("assert", lua_assert);
        self.register_function("error", lua_error);
        self.register_function("pcall", lua_pcall);
        self.register_function("rawget", lua_rawget);
        self.register_function("rawset", lua_rawset);
        self.register_function("rawequal", lua_rawequal);
        self.register_function("setmetatable", lua_setmetatable);
        self.register_function("getmetatable", lua_getmetatable);
        self.register_function("next", lua_next);
        self.register_function("pairs", lua_pairs);
        self.register_function("ipairs", lua_ipairs);
        self.register_function("select", lua_select);
        self.register_function("unpack", lua_unpack);
        self.register_function("collectgarbage", lua_collectgarbage);
    }

    /// `tostring` semantics: __tostring wins, otherwise the raw rendering.
    pub fn tostring_value(&mut self, v: LuaValue) -> LuaResult<LuaValue> {
        let mm = self.get_metamethod(&v, self.meta_keys.tostring);
        if !mm.is_nil() {
            return self.call_metamethod(mm, &[v]);
        }
        let s = self.display_value(&v);
        Ok(self.new_string_value(&s))
    }
}

fn arg_error(vm: &mut LuaVM, n: usize, func: &str, expected: &str) -> LuaError {
    let got = vm.host_arg(n);
    let t = if vm.host_arg_count() < n {
        "no value"
    } else {
        got.type_name()
    };
    vm.rt_error(format!(
        "bad argument #{} to '{}' ({} expected, got {})",
        n, func, expected, t
    ))
}

fn lua_print(vm: &mut LuaVM) -> LuaResult<usize> {
    let n = vm.host_arg_count();
    let mut line = String::new();
    for i in 1..=n {
        let v = vm.host_arg(i);
        let s = vm.tostring_value(v)?;
        if i > 1 {
            line.push('\t');
        }
        match s.as_string_id() {
            Some(id) => line.push_str(&String::from_utf8_lossy(vm.string_bytes(id))),
            None => line.push_str(&vm.display_value(&s)),
        }
    }
    println!("{}", line);
    Ok(0)
}

fn lua_type(vm: &mut LuaVM) -> LuaResult<usize> {
    if vm.host_arg_count() < 1 {
        return Err(arg_error(vm, 1, "type", "value"));
    }
    let v = vm.host_arg(1);
    let name = v.type_name();
    let s = vm.new_string_value(name);
    vm.push_value(s);
    Ok(1)
}

fn lua_tostring(vm: &mut LuaVM) -> LuaResult<usize> {
    let v = vm.host_arg(1);
    let s = vm.tostring_value(v)?;
    vm.push_value(s);
    Ok(1)
}

fn lua_tonumber(vm: &mut LuaVM) -> LuaResult<usize> {
    let v = vm.host_arg(1);
    let base = match vm.host_arg(2) {
        LuaValue::Nil => 10u32,
        b => match b.as_number() {
            Some(n) if (2.0..=36.0).contains(&n) => n as u32,
            _ => return Err(vm.rt_error("bad argument #2 to 'tonumber' (base out of range)")),
        },
    };
    let result = if base == 10 {
        match v {
            LuaValue::Number(n) => Some(n),
            LuaValue::Str(id) => str_to_number(vm.string_bytes(id)),
            _ => None,
        }
    } else {
        match v {
            LuaValue::Str(id) => {
                let text = String::from_utf8_lossy(vm.string_bytes(id)).trim().to_string();
                i64::from_str_radix(&text, base).ok().map(|n| n as f64)
            }
            _ => None,
        }
    };
    match result {
        Some(n) => vm.push_value(LuaValue::Number(n)),
        None => vm.push_value(LuaValue::Nil),
    }
    Ok(1)
}

fn lua_assert(vm: &mut LuaVM) -> LuaResult<usize> {
    let v = vm.host_arg(1);
    if v.is_falsy() {
        let msg = vm.host_arg(2);
        if msg.is_nil() {
            return Err(vm.rt_error("assertion failed!"));
        }
        return Err(vm.throw_value(msg));
    }
    // assert passes all its arguments through.
    let n = vm.host_arg_count();
    for i in 1..=n {
        let v = vm.host_arg(i);
        vm.push_value(v);
    }
    Ok(n)
}

fn lua_error(vm: &mut LuaVM) -> LuaResult<usize> {
    let msg = vm.host_arg(1);
    let level = vm.host_arg(2).as_number().unwrap_or(1.0);
    match msg {
        LuaValue::Str(id) if level > 0.0 => {
            // String errors get the position prefix, like the reference.
            let text = String::from_utf8_lossy(vm.string_bytes(id)).into_owned();
            Err(vm.rt_error(text))
        }
        other => Err(vm.throw_value(other)),
    }
}

fn lua_pcall(vm: &mut LuaVM) -> LuaResult<usize> {
    if vm.host_arg_count() < 1 {
        return Err(arg_error(vm, 1, "pcall", "value"));
    }
    let func = vm.host_arg(1);
    let args: Vec<LuaValue> = (2..=vm.host_arg_count()).map(|i| vm.host_arg(i)).collect();
    match vm.pcall(func, &args)? {
        Ok(results) => {
            vm.push_value(LuaValue::Boolean(true));
            let n = results.len();
            for r in results {
                vm.push_value(r);
            }
            Ok(n + 1)
        }
        Err(err) => {
            vm.push_value(LuaValue::Boolean(false));
            vm.push_value(err);
            Ok(2)
        }
    }
}

fn lua_rawget(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = match vm.host_arg(1).as_table_id() {
        Some(t) => t,
        None => return Err(arg_error(vm, 1, "rawget", "table")),
    };
    let k = vm.host_arg(2);
    let v = vm.pool.table(t).get(&k);
    vm.push_value(v);
    Ok(1)
}

fn lua_rawset(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = match vm.host_arg(1).as_table_id() {
        Some(t) => t,
        None => return Err(arg_error(vm, 1, "rawset", "table")),
    };
    let k = vm.host_arg(2);
    let v = vm.host_arg(3);
    vm.check_table_key(&k)?;
    vm.raw_table_set(t, k, v);
    let tv = vm.host_arg(1);
    vm.push_value(tv);
    Ok(1)
}

fn lua_rawequal(vm: &mut LuaVM) -> LuaResult<usize> {
    let a = vm.host_arg(1);
    let b = vm.host_arg(2);
    vm.push_value(LuaValue::Boolean(a.raw_equal(&b)));
    Ok(1)
}

fn lua_setmetatable(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = match vm.host_arg(1).as_table_id() {
        Some(t) => t,
        None => return Err(arg_error(vm, 1, "setmetatable", "table")),
    };
    let meta = match vm.host_arg(2) {
        LuaValue::Nil => None,
        LuaValue::Table(m) => Some(m),
        _ => return Err(arg_error(vm, 2, "setmetatable", "nil or table")),
    };
    let tv = vm.host_arg(1);
    let protected = vm.get_metamethod(&tv, vm.meta_keys.metatable);
    if !protected.is_nil() {
        return Err(vm.rt_error("cannot change a protected metatable"));
    }
    vm.set_table_metatable(t, meta);
    vm.push_value(tv);
    Ok(1)
}

fn lua_getmetatable(vm: &mut LuaVM) -> LuaResult<usize> {
    let v = vm.host_arg(1);
    match vm.get_metatable(&v) {
        Some(mt) => {
            let shield = vm.pool.table(mt).get(&LuaValue::Str(vm.meta_keys.metatable));
            if !shield.is_nil() {
                vm.push_value(shield);
            } else {
                vm.push_value(LuaValue::Table(mt));
            }
        }
        None => vm.push_value(LuaValue::Nil),
    }
    Ok(1)
}

fn lua_next(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = match vm.host_arg(1).as_table_id() {
        Some(t) => t,
        None => return Err(arg_error(vm, 1, "next", "table")),
    };
    let k = vm.host_arg(2);
    match vm.pool.table(t).next(&k) {
        Ok(Some((nk, nv))) => {
            vm.push_value(nk);
            vm.push_value(nv);
            Ok(2)
        }
        Ok(None) => {
            vm.push_value(LuaValue::Nil);
            Ok(1)
        }
        Err(()) => Err(vm.rt_error("invalid key to 'next'")),
    }
}

fn lua_pairs(vm: &mut LuaVM) -> LuaResult<usize> {
    if vm.host_arg(1).as_table_id().is_none() {
        return Err(arg_error(vm, 1, "pairs", "table"));
    }
    let next_fn = vm.get_global("next");
    let t = vm.host_arg(1);
    vm.push_value(next_fn);
    vm.push_value(t);
    vm.push_value(LuaValue::Nil);
    Ok(3)
}

fn ipairs_iter(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = match vm.host_arg(1).as_table_id() {
        Some(t) => t,
        None => return Err(arg_error(vm, 1, "ipairs", "table")),
    };
    let i = vm.host_arg(2).as_number().unwrap_or(0.0) as usize + 1;
    let v = vm.pool.table(t).get_int(i);
    if v.is_nil() {
        vm.push_value(LuaValue::Nil);
        Ok(1)
    } else {
        vm.push_value(LuaValue::Number(i as f64));
        vm.push_value(v);
        Ok(2)
    }
}

fn lua_ipairs(vm: &mut LuaVM) -> LuaResult<usize> {
    if vm.host_arg(1).as_table_id().is_none() {
        return Err(arg_error(vm, 1, "ipairs", "table"));
    }
    let env = vm.globals();
    let iter = vm
        .pool
        .alloc_host_function(ipairs_iter, Vec::new(), env, vm.gc.current_white);
    let t = vm.host_arg(1);
    vm.push_value(LuaValue::Function(iter));
    vm.push_value(t);
    vm.push_value(LuaValue::Number(0.0));
    Ok(3)
}

fn lua_select(vm: &mut LuaVM) -> LuaResult<usize> {
    let n = vm.host_arg_count();
    let first = vm.host_arg(1);
    if let Some(id) = first.as_string_id() {
        if vm.string_bytes(id) == b"#" {
            vm.push_value(LuaValue::Number((n - 1) as f64));
            return Ok(1);
        }
    }
    let mut idx = match first.as_number() {
        Some(k) => k as i64,
        None => return Err(arg_error(vm, 1, "select", "number")),
    };
    // Negative selectors count back from the last argument.
    if idx < 0 {
        idx += n as i64;
    } else if idx > n as i64 {
        idx = n as i64;
    }
    if idx < 1 {
        return Err(vm.rt_error("bad argument #1 to 'select' (index out of range)"));
    }
    let mut pushed = 0;
    for i in (idx as usize + 1)..=n {
        let v = vm.host_arg(i);
        vm.push_value(v);
        pushed += 1;
    }
    Ok(pushed)
}

fn lua_unpack(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = match vm.host_arg(1).as_table_id() {
        Some(t) => t,
        None => return Err(arg_error(vm, 1, "unpack", "table")),
    };
    let from = vm.host_arg(2).as_number().unwrap_or(1.0) as usize;
    let to = match vm.host_arg(3) {
        LuaValue::Nil => vm.pool.table(t).length(),
        v => v.as_number().unwrap_or(0.0) as usize,
    };
    let mut pushed = 0;
    if to >= from {
        for i in from..=to {
            let v = vm.pool.table(t).get_int(i);
            vm.push_value(v);
            pushed += 1;
        }
    }
    Ok(pushed)
}

fn lua_collectgarbage(vm: &mut LuaVM) -> LuaResult<usize> {
    let opt = match vm.host_arg(1) {
        LuaValue::Nil => "collect".to_string(),
        LuaValue::Str(id) => String::from_utf8_lossy(vm.string_bytes(id)).into_owned(),
        _ => return Err(arg_error(vm, 1, "collectgarbage", "string")),
    };
    match opt.as_str() {
        "collect" => {
            vm.collect_garbage();
            vm.push_value(LuaValue::Number(0.0));
        }
        "count" => {
            let kb = vm.heap_bytes() as f64 / 1024.0;
            vm.push_value(LuaValue::Number(kb));
        }
        "step" => {
            vm.check_gc();
            vm.push_value(LuaValue::Boolean(false));
        }
        _ => return Err(vm.rt_error(format!("invalid option '{}'", opt))),
    }
    Ok(1)
}
