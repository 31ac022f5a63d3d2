// Garbage collector - tri-color mark-and-sweep over the object pool.
//
// Supports both a stop-the-world full collection and an incremental
// `step` driven from allocation sites. Phases:
//
//   Pause -> (mark roots) -> Propagate -> (atomic re-mark + white flip)
//         -> Sweep -> Pause
//
// Invariant: once propagation finishes, no black object references a
// white object. The mutator preserves this with a forward write barrier
// (white target of a write into a black object is marked gray); stack
// slots are not barriered and are covered by the atomic root re-mark.
//
// Objects never move; identity is the arena slot. Dead strings are also
// purged from the interner as they are freed.

mod gc_object;
mod object_pool;
mod string_interner;

pub use gc_object::*;
pub use object_pool::{Arena, ObjectPool};
pub use string_interner::StringInterner;

/// Collector tuning knobs. `pause_multiplier` is a percentage: after a
/// cycle the next trigger threshold becomes live_bytes * pause / 100.
#[derive(Debug, Clone)]
pub struct GcParams {
    pub pause_multiplier: usize,
    /// Objects processed per incremental step (marking or sweeping).
    pub step_work: usize,
    pub initial_threshold: usize,
}

impl Default for GcParams {
    fn default() -> Self {
        GcParams {
            pause_multiplier: 200,
            step_work: 256,
            initial_threshold: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GcStats {
    pub collection_count: usize,
    pub objects_collected: usize,
    pub bytes_freed: usize,
    pub live_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcPhase {
    Pause,
    Propagate,
    Sweep,
}

/// Cursor over the five arenas during an incremental sweep.
#[derive(Debug, Clone, Copy)]
struct SweepCursor {
    arena: u8,
    index: u32,
}

pub struct GC {
    pub current_white: u8,
    pub phase: GcPhase,
    gray: Vec<GcId>,
    sweep: SweepCursor,
    sweep_live_bytes: usize,
    pub threshold: usize,
    pub params: GcParams,
    pub stats: GcStats,
    pub enabled: bool,
}

impl GC {
    pub fn new(params: GcParams) -> Self {
        let threshold = params.initial_threshold;
        GC {
            current_white: 0,
            phase: GcPhase::Pause,
            gray: Vec::with_capacity(128),
            sweep: SweepCursor { arena: 0, index: 0 },
            sweep_live_bytes: 0,
            threshold,
            params,
            stats: GcStats::default(),
            enabled: true,
        }
    }

    /// Should the mutator spend a step here? (Checked at allocation sites.)
    #[inline(always)]
    pub fn should_step(&self, pool: &ObjectPool) -> bool {
        self.enabled && (pool.total_bytes > self.threshold || self.phase != GcPhase::Pause)
    }

    // ============ Write barrier ============

    /// Forward barrier: a black parent was just written a reference to
    /// `child`. Re-gray the child so the invariant holds. Only needed
    /// while the mark phase is running.
    pub fn barrier_forward(&mut self, parent: GcId, child: &crate::lua_value::LuaValue, pool: &mut ObjectPool) {
        if self.phase != GcPhase::Propagate {
            return;
        }
        let child_id = match GcId::of(child) {
            Some(id) => id,
            None => return,
        };
        let parent_black = matches!(self.header(pool, parent), Some(h) if h.is_black());
        if !parent_black {
            return;
        }
        if matches!(self.header(pool, child_id), Some(h) if h.is_white()) {
            self.set_gray(pool, child_id);
            self.gray.push(child_id);
        }
    }

    // ============ Incremental stepping ============

    /// Advance the collector by one bounded unit of work.
    pub fn step(&mut self, roots: &[GcId], pool: &mut ObjectPool, interner: &mut StringInterner) {
        if !self.enabled {
            return;
        }
        match self.phase {
            GcPhase::Pause => {
                self.mark_roots(roots, pool);
                self.phase = GcPhase::Propagate;
            }
            GcPhase::Propagate => {
                let mut work = self.params.step_work;
                while work > 0 {
                    match self.gray.pop() {
                        Some(id) => self.propagate_one(id, pool),
                        None => break,
                    }
                    work -= 1;
                }
                if self.gray.is_empty() {
                    self.atomic(roots, pool);
                }
            }
            GcPhase::Sweep => {
                let finished = self.sweep_some(self.params.step_work, pool, interner);
                if finished {
                    self.finish_cycle();
                }
            }
        }
    }

    /// Stop-the-world full collection: every unreachable object is freed
    /// before this returns.
    pub fn collect_full(
        &mut self,
        roots: &[GcId],
        pool: &mut ObjectPool,
        interner: &mut StringInterner,
    ) {
        // Abandon any partial cycle: colors may be stale, start clean.
        self.gray.clear();
        self.whiten_all(pool);
        self.phase = GcPhase::Pause;

        self.mark_roots(roots, pool);
        // Drains the worklist, flips the white generation and opens the
        // sweep, so everything still carrying the old white is garbage.
        self.atomic(roots, pool);
        while !self.sweep_some(usize::MAX, pool, interner) {}
        self.finish_cycle();
    }

    // ============ Mark phase ============

    fn mark_roots(&mut self, roots: &[GcId], pool: &mut ObjectPool) {
        for &id in roots {
            self.mark_id(pool, id);
        }
    }

    /// Mark one object gray (if currently white) and enqueue it.
    fn mark_id(&mut self, pool: &mut ObjectPool, id: GcId) {
        if matches!(self.header(pool, id), Some(h) if h.is_white()) {
            self.set_gray(pool, id);
            self.gray.push(id);
        }
    }

    fn mark_value(&mut self, pool: &mut ObjectPool, v: &crate::lua_value::LuaValue) {
        if let Some(id) = GcId::of(v) {
            self.mark_id(pool, id);
        }
    }

    /// Pop-side of the worklist: blacken `id` and gray its children.
    fn propagate_one(&mut self, id: GcId, pool: &mut ObjectPool) {
        if let Some(h) = self.header_mut(pool, id) {
            h.make_black();
        }
        match id {
            GcId::Str(_) => {}
            GcId::Table(tid) => {
                let (meta, pairs) = match pool.tables.get(tid.0) {
                    Some(t) => (t.data.metatable(), t.data.iter_pairs().collect::<Vec<_>>()),
                    None => return,
                };
                if let Some(m) = meta {
                    self.mark_id(pool, GcId::Table(m));
                }
                for (k, v) in pairs {
                    self.mark_value(pool, &k);
                    self.mark_value(pool, &v);
                }
            }
            GcId::Function(fid) => {
                enum Parts {
                    Lua(std::rc::Rc<crate::lua_value::Proto>, Vec<UpvalueId>, TableId),
                    Host(Vec<crate::lua_value::LuaValue>, TableId),
                }
                let parts = match pool.functions.get(fid.0) {
                    Some(f) => match &f.data {
                        LuaFunction::Lua {
                            proto,
                            upvalues,
                            env,
                        } => Parts::Lua(proto.clone(), upvalues.clone(), *env),
                        LuaFunction::Host { upvalues, env, .. } => {
                            Parts::Host(upvalues.clone(), *env)
                        }
                    },
                    None => return,
                };
                match parts {
                    Parts::Lua(proto, upvalues, env) => {
                        self.mark_id(pool, GcId::Table(env));
                        for u in upvalues {
                            self.mark_id(pool, GcId::Upvalue(u));
                        }
                        // Constants of the whole proto tree reference
                        // interned strings; keep them alive.
                        let mut strs = Vec::new();
                        proto.for_each_constant(&mut |k| {
                            if let crate::lua_value::LuaValue::Str(s) = k {
                                strs.push(*s);
                            }
                        });
                        for s in strs {
                            self.mark_id(pool, GcId::Str(s));
                        }
                    }
                    Parts::Host(upvalues, env) => {
                        self.mark_id(pool, GcId::Table(env));
                        for v in &upvalues {
                            self.mark_value(pool, v);
                        }
                    }
                }
            }
            GcId::Upvalue(uid) => {
                let closed = match pool.upvalues.get(uid.0) {
                    Some(u) => match &u.state {
                        UpvalueState::Closed(v) => Some(*v),
                        UpvalueState::Open { .. } => None,
                    },
                    None => return,
                };
                if let Some(v) = closed {
                    self.mark_value(pool, &v);
                }
            }
            GcId::Userdata(uid) => {
                let meta = pool.userdata.get(uid.0).and_then(|u| u.data.meta);
                if let Some(m) = meta {
                    self.mark_id(pool, GcId::Table(m));
                }
            }
        }
    }

    /// Atomic phase: the roots are walked once more (stack writes are not
    /// barriered), remaining gray objects are drained, and the white
    /// generation flips so freshly allocated objects survive the sweep.
    fn atomic(&mut self, roots: &[GcId], pool: &mut ObjectPool) {
        self.mark_roots(roots, pool);
        while let Some(id) = self.gray.pop() {
            self.propagate_one(id, pool);
        }
        self.current_white = 1 - self.current_white;
        self.begin_sweep();
    }

    // ============ Sweep phase ============

    fn begin_sweep(&mut self) {
        self.phase = GcPhase::Sweep;
        self.sweep = SweepCursor { arena: 0, index: 0 };
        self.sweep_live_bytes = 0;
    }

    /// Sweep up to `budget` slots; returns true when the walk is done.
    fn sweep_some(
        &mut self,
        budget: usize,
        pool: &mut ObjectPool,
        interner: &mut StringInterner,
    ) -> bool {
        let other_white = 1 - self.current_white;
        let mut budget = budget;
        while budget > 0 {
            let arena = self.sweep.arena;
            let idx = self.sweep.index;
            let done_with_arena = match arena {
                0 => idx as usize >= pool.strings.slot_count(),
                1 => idx as usize >= pool.tables.slot_count(),
                2 => idx as usize >= pool.functions.slot_count(),
                3 => idx as usize >= pool.upvalues.slot_count(),
                _ => idx as usize >= pool.userdata.slot_count(),
            };
            if done_with_arena {
                if arena >= 4 {
                    return true;
                }
                self.sweep.arena += 1;
                self.sweep.index = 0;
                continue;
            }
            self.sweep_slot(arena, idx, other_white, pool, interner);
            self.sweep.index += 1;
            budget -= 1;
        }
        false
    }

    fn sweep_slot(
        &mut self,
        arena: u8,
        idx: u32,
        other_white: u8,
        pool: &mut ObjectPool,
        interner: &mut StringInterner,
    ) {
        let white = self.current_white;
        match arena {
            0 => {
                let dead = matches!(pool.strings.get(idx), Some(o) if o.header.is_dead(other_white));
                if dead {
                    if let Some(data) = pool.release_string(StringId(idx)) {
                        interner.remove_dead(data.hash, StringId(idx));
                        self.stats.objects_collected += 1;
                    }
                } else if let Some(o) = pool.strings.get_mut(idx) {
                    o.header.make_white(white);
                    self.sweep_live_bytes += o.header.size as usize;
                }
            }
            1 => {
                let dead = matches!(pool.tables.get(idx), Some(o) if o.header.is_dead(other_white));
                if dead {
                    pool.release_table(TableId(idx));
                    self.stats.objects_collected += 1;
                } else if let Some(o) = pool.tables.get_mut(idx) {
                    // Refresh the size estimate while we are here.
                    let new_size = o.data.size_estimate();
                    let old_size = o.header.size as usize;
                    o.header.size = new_size as u32;
                    o.header.make_white(white);
                    self.sweep_live_bytes += new_size;
                    if new_size >= old_size {
                        pool.total_bytes += new_size - old_size;
                    } else {
                        pool.total_bytes = pool.total_bytes.saturating_sub(old_size - new_size);
                    }
                }
            }
            2 => {
                let dead =
                    matches!(pool.functions.get(idx), Some(o) if o.header.is_dead(other_white));
                if dead {
                    pool.release_function(FunctionId(idx));
                    self.stats.objects_collected += 1;
                } else if let Some(o) = pool.functions.get_mut(idx) {
                    o.header.make_white(white);
                    self.sweep_live_bytes += o.header.size as usize;
                }
            }
            3 => {
                let dead =
                    matches!(pool.upvalues.get(idx), Some(o) if o.header.is_dead(other_white));
                if dead {
                    pool.release_upvalue(UpvalueId(idx));
                    self.stats.objects_collected += 1;
                } else if let Some(o) = pool.upvalues.get_mut(idx) {
                    o.header.make_white(white);
                    self.sweep_live_bytes += o.header.size as usize;
                }
            }
            _ => {
                let dead =
                    matches!(pool.userdata.get(idx), Some(o) if o.header.is_dead(other_white));
                if dead {
                    pool.release_userdata(UserdataId(idx));
                    self.stats.objects_collected += 1;
                } else if let Some(o) = pool.userdata.get_mut(idx) {
                    o.header.make_white(white);
                    self.sweep_live_bytes += o.header.size as usize;
                }
            }
        }
    }

    fn finish_cycle(&mut self) {
        self.phase = GcPhase::Pause;
        self.stats.collection_count += 1;
        self.stats.live_bytes = self.sweep_live_bytes;
        let next = self.sweep_live_bytes * self.params.pause_multiplier / 100;
        self.threshold = next.max(self.params.initial_threshold);
    }

    // ============ Helpers ============

    fn whiten_all(&mut self, pool: &mut ObjectPool) {
        let white = self.current_white;
        for i in 0..pool.strings.slot_count() as u32 {
            if let Some(o) = pool.strings.get_mut(i) {
                o.header.make_white(white);
            }
        }
        for i in 0..pool.tables.slot_count() as u32 {
            if let Some(o) = pool.tables.get_mut(i) {
                o.header.make_white(white);
            }
        }
        for i in 0..pool.functions.slot_count() as u32 {
            if let Some(o) = pool.functions.get_mut(i) {
                o.header.make_white(white);
            }
        }
        for i in 0..pool.upvalues.slot_count() as u32 {
            if let Some(o) = pool.upvalues.get_mut(i) {
                o.header.make_white(white);
            }
        }
        for i in 0..pool.userdata.slot_count() as u32 {
            if let Some(o) = pool.userdata.get_mut(i) {
                o.header.make_white(white);
            }
        }
    }

    fn header<'p>(&self, pool: &'p ObjectPool, id: GcId) -> Option<&'p GcHeader> {
        match id {
            GcId::Str(i) => pool.strings.get(i.0).map(|o| &o.header),
            GcId::Table(i) => pool.tables.get(i.0).map(|o| &o.header),
            GcId::Function(i) => pool.functions.get(i.0).map(|o| &o.header),
            GcId::Upvalue(i) => pool.upvalues.get(i.0).map(|o| &o.header),
            GcId::Userdata(i) => pool.userdata.get(i.0).map(|o| &o.header),
        }
    }

    fn header_mut<'p>(&self, pool: &'p mut ObjectPool, id: GcId) -> Option<&'p mut GcHeader> {
        match id {
            GcId::Str(i) => pool.strings.get_mut(i.0).map(|o| &mut o.header),
            GcId::Table(i) => pool.tables.get_mut(i.0).map(|o| &mut o.header),
            GcId::Function(i) => pool.functions.get_mut(i.0).map(|o| &mut o.header),
            GcId::Upvalue(i) => pool.upvalues.get_mut(i.0).map(|o| &mut o.header),
            GcId::Userdata(i) => pool.userdata.get_mut(i.0).map(|o| &mut o.header),
        }
    }

    fn set_gray(&self, pool: &mut ObjectPool, id: GcId) {
        if let Some(h) = self.header_mut(pool, id) {
            h.make_gray();
        }
    }
}
