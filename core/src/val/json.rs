use std::ffi::c_int;

use mlua_sys as ffi;
use serde_json::{Map, Number, Value};

use super::{FromStack, IntoStack, SlotType};
use crate::{
    error::{DecodeError, EncodeError},
    vm::{StackGuard, State},
};

/// Tables nested deeper than this are rejected; it also stops reference cycles.
const MAX_DEPTH: usize = 128;

impl IntoStack for Value {
    fn push_into_stack(self, state: &State) {
        push_json(state, &self);
    }

    fn encodable(&self) -> Result<(), EncodeError> {
        json_encodable(self)
    }
}

impl IntoStack for &Value {
    fn push_into_stack(self, state: &State) {
        push_json(state, self);
    }

    fn encodable(&self) -> Result<(), EncodeError> {
        json_encodable(self)
    }
}

/// Integers in a document are held to the same exactness rule as Rust integers.
fn json_encodable(value: &Value) -> Result<(), EncodeError> {
    match value {
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => i.encodable(),
            (None, Some(u)) => u.encodable(),
            _ => Ok(()),
        },
        Value::Array(items) => items.iter().try_for_each(json_encodable),
        Value::Object(fields) => fields.values().try_for_each(json_encodable),
        _ => Ok(()),
    }
}

fn push_json(state: &State, value: &Value) {
    let l = state.as_ptr();
    match value {
        Value::Null => unsafe { ffi::lua_pushnil(l) },
        Value::Bool(b) => b.push_into_stack(state),
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN).push_into_stack(state),
        Value::String(s) => s.as_str().push_into_stack(state),
        Value::Array(items) => {
            state.ensure_stack(2);
            unsafe { ffi::lua_createtable(l, items.len().min(c_int::MAX as usize) as c_int, 0) };
            for (i, item) in items.iter().enumerate() {
                push_json(state, item);
                unsafe { ffi::lua_rawseti(l, -2, (i + 1) as c_int) };
            }
        }
        Value::Object(fields) => {
            state.ensure_stack(3);
            unsafe { ffi::lua_createtable(l, 0, fields.len().min(c_int::MAX as usize) as c_int) };
            for (key, item) in fields {
                key.as_str().push_into_stack(state);
                push_json(state, item);
                unsafe { ffi::lua_rawset(l, -3) };
            }
        }
    }
}

impl FromStack for Value {
    const EXPECTED: &'static str = "JSON-compatible value";

    fn from_stack(state: &State, index: c_int) -> Result<Self, DecodeError> {
        read_json(state, state.abs_index(index), 0)
    }
}

fn read_json(state: &State, index: c_int, depth: usize) -> Result<Value, DecodeError> {
    let expected = <Value as FromStack>::EXPECTED;
    match state.slot_type(index) {
        SlotType::None | SlotType::Nil => Ok(Value::Null),
        SlotType::Boolean => bool::from_stack(state, index).map(Value::Bool),
        SlotType::Number => {
            let n = f64::from_stack(state, index)?;
            if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
                Ok(Value::Number(Number::from(n as i64)))
            } else {
                Number::from_f64(n)
                    .map(Value::Number)
                    .ok_or_else(|| DecodeError::invalid(expected, SlotType::Number, format!("{n} is not representable")))
            }
        }
        SlotType::String => String::from_stack(state, index).map(Value::String),
        SlotType::Table => {
            if depth >= MAX_DEPTH {
                return Err(DecodeError::invalid(expected, SlotType::Table, "nested too deeply"));
            }
            read_table(state, index, depth + 1)
        }
        other => Err(DecodeError::mismatch(expected, other)),
    }
}

fn read_table(state: &State, table: c_int, depth: usize) -> Result<Value, DecodeError> {
    let l = state.as_ptr();
    let _guard = StackGuard::new(state);
    state.ensure_stack(3);

    let len = unsafe { ffi::lua_objlen(l, table) };
    let mut count = 0usize;
    let mut fields = Map::new();
    let mut items = Vec::with_capacity(len);
    unsafe { ffi::lua_pushnil(l) };
    while unsafe { ffi::lua_next(l, table) } != 0 {
        count += 1;
        let value = read_json(state, state.abs_index(-1), depth)?;
        match state.slot_type(-2) {
            SlotType::String => {
                fields.insert(String::from_stack(state, -2)?, value);
            }
            SlotType::Number if len > 0 => items.push((i64::from_stack(state, -2)?, value)),
            other => {
                return Err(DecodeError::invalid("JSON-compatible value", other, "unsupported table key"));
            }
        }
        unsafe { ffi::lua_settop(l, -2) };
    }

    // A table is an array only when its keys are exactly 1..=len.
    if len > 0 && fields.is_empty() && count == len {
        items.sort_by_key(|(key, _)| *key);
        if items.iter().enumerate().all(|(i, (key, _))| *key == i as i64 + 1) {
            return Ok(Value::Array(items.into_iter().map(|(_, value)| value).collect()));
        }
    }
    if !items.is_empty() {
        return Err(DecodeError::invalid("JSON-compatible value", SlotType::Table, "sparse or mixed table keys"));
    }
    Ok(Value::Object(fields))
}
