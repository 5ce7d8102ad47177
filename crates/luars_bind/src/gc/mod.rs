// Stop-the-world mark and sweep collector for the host heap
//
// One cycle:
// 1. mark everything reachable from the roots, weak values excluded
// 2. userdata that became unreachable and carry `__gc` are queued for
//    finalization and resurrected for this cycle
// 3. weak values pointing at unmarked objects are cleared
// 4. everything still unmarked is freed, interned strings included
//
// A finalized userdata is freed by the first cycle that finds it unreachable
// again.

mod gc_id;
mod object_pool;

pub use gc_id::*;
pub use object_pool::ObjectPool;

use crate::lua_value::LuaValue;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    pub freed_strings: usize,
    pub freed_tables: usize,
    pub freed_functions: usize,
    pub freed_userdata: usize,
    pub finalized: usize,
}

struct Marks {
    strings: Vec<bool>,
    tables: Vec<bool>,
    functions: Vec<bool>,
    userdata: Vec<bool>,
    gray: Vec<GcId>,
}

impl Marks {
    fn new(pool: &ObjectPool) -> Self {
        Marks {
            strings: vec![false; pool.strings.capacity()],
            tables: vec![false; pool.tables.capacity()],
            functions: vec![false; pool.functions.capacity()],
            userdata: vec![false; pool.userdata.capacity()],
            gray: Vec::new(),
        }
    }

    fn mark_value(&mut self, value: LuaValue) {
        let (slot, id) = match value {
            // strings hold no references
            LuaValue::String(id) => {
                self.strings[id.0 as usize] = true;
                return;
            }
            LuaValue::Table(id) => (&mut self.tables[id.0 as usize], GcId::TableId(id)),
            LuaValue::Function(id) => (&mut self.functions[id.0 as usize], GcId::FunctionId(id)),
            LuaValue::Userdata(id) => (&mut self.userdata[id.0 as usize], GcId::UserdataId(id)),
            _ => return,
        };
        if !*slot {
            *slot = true;
            self.gray.push(id);
        }
    }

    fn is_marked(&self, value: LuaValue) -> bool {
        match value {
            LuaValue::String(id) => self.strings[id.0 as usize],
            LuaValue::Table(id) => self.tables[id.0 as usize],
            LuaValue::Function(id) => self.functions[id.0 as usize],
            LuaValue::Userdata(id) => self.userdata[id.0 as usize],
            _ => true,
        }
    }

    fn propagate(&mut self, pool: &ObjectPool) {
        while let Some(id) = self.gray.pop() {
            match id {
                GcId::TableId(id) => {
                    let Some(table) = pool.get_table(id) else {
                        continue;
                    };
                    if let Some(mt) = table.metatable {
                        self.mark_value(LuaValue::Table(mt));
                    }
                    for (key, value) in table.entries() {
                        self.mark_value(key.to_value());
                        // strings are values, never cleared from weak tables
                        if !table.weak_values || matches!(value, LuaValue::String(_)) {
                            self.mark_value(value);
                        }
                    }
                }
                GcId::UserdataId(id) => {
                    let Some(ud) = pool.get_userdata(id) else {
                        continue;
                    };
                    if let Some(mt) = ud.metatable {
                        self.mark_value(LuaValue::Table(mt));
                    }
                    self.mark_value(ud.user_value);
                }
                // native functions carry no traced references
                GcId::FunctionId(_) => {}
            }
        }
    }
}

/// Run one full cycle. Returns the userdata whose `__gc` must now be called,
/// in allocation order.
pub(crate) fn collect(
    pool: &mut ObjectPool,
    roots: impl IntoIterator<Item = LuaValue>,
    has_finalizer: impl Fn(&ObjectPool, UserdataId) -> bool,
    stats: &mut GcStats,
) -> Vec<UserdataId> {
    let mut marks = Marks::new(pool);
    for root in roots {
        marks.mark_value(root);
    }
    marks.propagate(pool);

    let mut to_finalize = Vec::new();
    for id in pool.userdata.ids() {
        let ud_id = UserdataId(id);
        if marks.userdata[id as usize] {
            continue;
        }
        let pending = pool
            .get_userdata(ud_id)
            .is_some_and(|ud| !ud.finalized);
        if pending && has_finalizer(pool, ud_id) {
            to_finalize.push(ud_id);
        }
    }

    // weak values are cleared before the finalized objects are resurrected
    let weak_tables: Vec<u32> = pool
        .tables
        .ids()
        .filter(|id| marks.tables[*id as usize])
        .filter(|id| pool.tables.get(*id).is_some_and(|t| t.weak_values))
        .collect();
    for id in weak_tables {
        if let Some(table) = pool.tables.get_mut(id) {
            table.retain(|_, value| marks.is_marked(*value));
        }
    }

    for ud_id in &to_finalize {
        if let Some(ud) = pool.get_userdata_mut(*ud_id) {
            ud.finalized = true;
        }
        marks.mark_value(LuaValue::Userdata(*ud_id));
    }
    marks.propagate(pool);

    let dead_strings: Vec<u32> = pool.strings.ids().filter(|id| !marks.strings[*id as usize]).collect();
    for id in dead_strings {
        pool.strings.remove(StringId(id));
        stats.freed_strings += 1;
    }
    let dead_tables: Vec<u32> = pool.tables.ids().filter(|id| !marks.tables[*id as usize]).collect();
    for id in dead_tables {
        pool.tables.remove(id);
        stats.freed_tables += 1;
    }
    let dead_functions: Vec<u32> = pool
        .functions
        .ids()
        .filter(|id| !marks.functions[*id as usize])
        .collect();
    for id in dead_functions {
        pool.functions.remove(id);
        stats.freed_functions += 1;
    }
    let dead_userdata: Vec<u32> = pool
        .userdata
        .ids()
        .filter(|id| !marks.userdata[*id as usize])
        .collect();
    for id in dead_userdata {
        pool.userdata.remove(id);
        stats.freed_userdata += 1;
    }

    stats.finalized += to_finalize.len();
    to_finalize
}
