// Calls, protected calls and metamethod aware table access

use std::panic::{AssertUnwindSafe, catch_unwind};

use smol_str::SmolStr;

use super::State;
use crate::lua_convert::{FromLua, FromLuaMulti, IntoLuaMulti};
use crate::lua_value::{LuaValue, NativeCallable};
use crate::lua_vm::{CallFrame, LuaError, LuaResult, StackGuard};

/// Bound on `__index` / `__newindex` chains.
const MAX_TAG_LOOP: usize = 2000;

impl State {
    /// Call the value below the top `nargs` values. Function and arguments
    /// are replaced by the results; `nresults` of `None` keeps all of them.
    /// Returns the number of results left on the stack.
    pub fn call(&mut self, nargs: usize, nresults: Option<usize>) -> LuaResult<usize> {
        self.flush_refs();
        let len = self.vm.stack.len();
        if nargs + 1 > self.get_top() {
            return Err(LuaError::runtime("call: not enough values on the stack"));
        }
        let func_pos = len - nargs - 1;
        let callable = self.resolve_callable(func_pos)?;

        if self.vm.frames.len() >= self.option.max_call_depth {
            self.vm.stack.truncate(func_pos);
            return Err(LuaError::StackOverflow);
        }
        self.vm.frames.push(CallFrame { base: func_pos + 1 });
        let result = callable.invoke(self);
        self.vm.frames.pop();

        let n = match result {
            Ok(n) => n,
            Err(e) => {
                self.vm.stack.truncate(func_pos);
                return Err(e);
            }
        };
        // results are the top `n` values of the callee frame
        let len = self.vm.stack.len();
        let n = n.min(len.saturating_sub(func_pos + 1));
        let results: Vec<LuaValue> = self.vm.stack.drain(len - n..).collect();
        self.vm.stack.truncate(func_pos);
        let wanted = nresults.unwrap_or(n);
        self.vm.stack.extend(results.into_iter().take(wanted));
        self.vm.stack.resize(func_pos + wanted, LuaValue::Nil);
        Ok(wanted)
    }

    /// Callable at `pos`, following `__call` (the called value becomes the
    /// first argument).
    fn resolve_callable(&mut self, pos: usize) -> LuaResult<NativeCallable> {
        let func = self.vm.stack[pos];
        if let LuaValue::Function(id) = func {
            if let Some(f) = self.vm.pool.get_function(id) {
                return Ok(f.callable.clone());
            }
        }
        let handler = self.vm.get_metafield(func, "__call");
        if let LuaValue::Function(id) = handler {
            if let Some(f) = self.vm.pool.get_function(id) {
                let callable = f.callable.clone();
                self.vm.stack.insert(pos, handler);
                return Ok(callable);
            }
        }
        self.vm.stack.truncate(pos);
        Err(LuaError::BadOperand {
            op: "call",
            type_name: SmolStr::new_static(func.type_name()),
        })
    }

    /// Protected `call`: on failure, native panics included, frames and
    /// stack are unwound to below the called value and the error returned.
    pub fn try_call(&mut self, nargs: usize, nresults: Option<usize>) -> LuaResult<usize> {
        let frames = self.vm.frames.len();
        let func_pos = self.vm.stack.len() - (nargs + 1).min(self.get_top());
        let result = catch_unwind(AssertUnwindSafe(|| self.call(nargs, nresults)));
        let err = match result {
            Ok(Ok(n)) => return Ok(n),
            Ok(Err(e)) => e,
            Err(panic) => LuaError::NativePanic(panic_message(panic.as_ref())),
        };
        log::debug!("protected call failed: {}", err);
        self.vm.frames.truncate(frames);
        self.vm.stack.truncate(func_pos);
        Err(err)
    }

    /// Protected call of `func` with `args`.
    ///
    /// Returns `(true, results)` on success and `(false, [message])` when
    /// the call raised an error. The returned values are off the stack and
    /// not rooted: they stay valid until the next collection cycle.
    pub fn pcall(&mut self, func: LuaValue, args: Vec<LuaValue>) -> LuaResult<(bool, Vec<LuaValue>)> {
        let mut state = StackGuard::new(self);
        let nargs = args.len();
        state.push_value(func);
        for arg in args {
            state.push_value(arg);
        }
        match state.try_call(nargs, None) {
            Ok(n) => Ok((true, state.take_results(n))),
            Err(e) => {
                let msg = state.vm.create_string(&e.to_string());
                Ok((false, vec![msg]))
            }
        }
    }

    /// Unprotected call of `func` with `args`, returning every result.
    /// Results are not rooted, as with `pcall`.
    pub fn call_function(&mut self, func: LuaValue, args: &[LuaValue]) -> LuaResult<Vec<LuaValue>> {
        let mut state = StackGuard::new(self);
        state.push_value(func);
        for arg in args {
            state.push_value(*arg);
        }
        let n = state.call(args.len(), None)?;
        Ok(state.take_results(n))
    }

    /// Protected call with typed arguments and results. Results are
    /// converted while still on the stack; missing ones read as nil.
    pub fn call_with<A, R>(&mut self, func: LuaValue, args: A) -> LuaResult<R>
    where
        A: IntoLuaMulti,
        R: FromLuaMulti,
    {
        let mut state = StackGuard::new(self);
        state.push_value(func);
        let first = state.get_top() as i32;
        let nargs = args.push_multi(&mut state)?;
        state.try_call(nargs, Some(R::COUNT))?;
        R::from_multi(&state, first)
    }

    /// `call_with` on the value at a dotted global path.
    pub fn call_global<A, R>(&mut self, path: &str, args: A) -> LuaResult<R>
    where
        A: IntoLuaMulti,
        R: FromLuaMulti,
    {
        let mut state = StackGuard::new(self);
        state.load_global(path)?;
        let func = state.pop_value();
        state.call_with(func, args)
    }

    /// Typed value at a dotted global path.
    pub fn get_global<T: FromLua>(&mut self, path: &str) -> LuaResult<T> {
        let mut state = StackGuard::new(self);
        state.load_global(path)?;
        T::from_lua(state.value_at(-1), &state)
            .map_err(|msg| LuaError::Runtime(format!("global '{}': {}", path, msg)))
    }

    fn take_results(&mut self, n: usize) -> Vec<LuaValue> {
        let len = self.vm.stack.len();
        self.vm.stack[len - n..].to_vec()
    }

    fn call_meta(&mut self, handler: LuaValue, args: &[LuaValue]) -> LuaResult<LuaValue> {
        let results = self.call_function(handler, args)?;
        Ok(results.first().copied().unwrap_or_default())
    }

    // ===== Table access =====

    /// `obj[key]` with `__index`.
    pub fn index_value(&mut self, obj: LuaValue, key: LuaValue) -> LuaResult<LuaValue> {
        let mut obj = obj;
        for _ in 0..MAX_TAG_LOOP {
            let handler = match obj {
                LuaValue::Table(id) => {
                    let value = self.vm.raw_get(id, key);
                    if !value.is_nil() {
                        return Ok(value);
                    }
                    let handler = self.vm.get_metafield(obj, "__index");
                    if handler.is_nil() {
                        return Ok(LuaValue::Nil);
                    }
                    handler
                }
                _ => {
                    let handler = self.vm.get_metafield(obj, "__index");
                    if handler.is_nil() {
                        return Err(LuaError::BadOperand {
                            op: "index",
                            type_name: SmolStr::new_static(obj.type_name()),
                        });
                    }
                    handler
                }
            };
            if let LuaValue::Function(_) = handler {
                return self.call_meta(handler, &[obj, key]);
            }
            obj = handler;
        }
        Err(LuaError::runtime("'__index' chain too long; possible loop"))
    }

    /// `obj[key] = value` with `__newindex`.
    pub fn new_index_value(&mut self, obj: LuaValue, key: LuaValue, value: LuaValue) -> LuaResult<()> {
        let mut obj = obj;
        for _ in 0..MAX_TAG_LOOP {
            let handler = self.vm.get_metafield(obj, "__newindex");
            if let LuaValue::Table(id) = obj {
                if handler.is_nil() || !self.vm.raw_get(id, key).is_nil() {
                    return self.vm.raw_set(id, key, value);
                }
            } else if handler.is_nil() {
                return Err(LuaError::BadOperand {
                    op: "index",
                    type_name: SmolStr::new_static(obj.type_name()),
                });
            }
            if let LuaValue::Function(_) = handler {
                self.call_function(handler, &[obj, key, value])?;
                return Ok(());
            }
            obj = handler;
        }
        Err(LuaError::runtime("'__newindex' chain too long; possible loop"))
    }

    /// `#obj` with `__len`.
    pub fn len_value(&mut self, obj: LuaValue) -> LuaResult<LuaValue> {
        let handler = self.vm.get_metafield(obj, "__len");
        if !handler.is_nil() {
            return self.call_meta(handler, &[obj]);
        }
        match obj {
            LuaValue::Table(id) => Ok(LuaValue::Integer(self.vm.table_len(id) as i64)),
            LuaValue::String(_) => {
                let len = self.vm.get_str(obj).map_or(0, |s| s.len());
                Ok(LuaValue::Integer(len as i64))
            }
            _ => Err(LuaError::BadOperand {
                op: "get length of",
                type_name: SmolStr::new_static(obj.type_name()),
            }),
        }
    }

    /// Iteration triple `(next, state, initial)` of a value with `__pairs`.
    pub fn pairs_value(&mut self, obj: LuaValue) -> LuaResult<(LuaValue, LuaValue, LuaValue)> {
        let handler = self.vm.get_metafield(obj, "__pairs");
        if handler.is_nil() {
            return Err(LuaError::BadOperand {
                op: "iterate over",
                type_name: SmolStr::new_static(obj.type_name()),
            });
        }
        let results = self.call_function(handler, &[obj])?;
        let mut it = results.into_iter();
        Ok((
            it.next().unwrap_or_default(),
            it.next().unwrap_or_default(),
            it.next().unwrap_or_default(),
        ))
    }

    // ===== Stack forms =====

    /// Pop a key and push `t[key]` where `t` is the value at `idx`.
    pub fn get_table(&mut self, idx: i32) -> LuaResult<()> {
        let obj = self.value_at(idx);
        let key = self.pop_value();
        let value = self.index_value(obj, key)?;
        self.push_value(value);
        Ok(())
    }

    /// Pop a value and a key into `t[key]` where `t` is the value at `idx`.
    pub fn set_table(&mut self, idx: i32) -> LuaResult<()> {
        let obj = self.value_at(idx);
        let value = self.pop_value();
        let key = self.pop_value();
        self.new_index_value(obj, key, value)
    }

    /// Push `t[name]` where `t` is the value at `idx`.
    pub fn get_field(&mut self, idx: i32, name: &str) -> LuaResult<()> {
        let obj = self.value_at(idx);
        let key = self.vm.create_string(name);
        let value = self.index_value(obj, key)?;
        self.push_value(value);
        Ok(())
    }

    /// Pop a value into `t[name]` where `t` is the value at `idx`.
    pub fn set_field(&mut self, idx: i32, name: &str) -> LuaResult<()> {
        let obj = self.value_at(idx);
        let value = self.pop_value();
        let key = self.vm.create_string(name);
        self.new_index_value(obj, key, value)
    }

    /// Push the length of the value at `idx`.
    pub fn length(&mut self, idx: i32) -> LuaResult<()> {
        let obj = self.value_at(idx);
        let len = self.len_value(obj)?;
        self.push_value(len);
        Ok(())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
