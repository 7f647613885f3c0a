use std::ffi::c_int;

use mlua_sys as ffi;

use super::Reference;
use crate::{
    error::{DecodeError, Error, Result},
    val::{DecodePolicy, FromStack, FromStackMulti, IntoStack, IntoStackMulti, SlotType, is_valid_key},
    vm::{StackGuard, State},
};

/// A rooted table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableHandle(Reference);

/// A rooted callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionHandle(Reference);

impl TableHandle {
    /// The global table. Always valid.
    pub const GLOBALS: TableHandle = TableHandle(Reference::GLOBALS);

    #[inline]
    pub fn reference(&self) -> Reference {
        self.0
    }

    fn push_self(&self, state: &State) -> Result<()> {
        if state.push_reference(self.0) {
            Ok(())
        } else {
            Err(Error::InvalidHandle)
        }
    }

    /// Raw read of `table[key]`. Missing keys and type mismatches read as `None`.
    pub fn get<K: IntoStack, V: FromStack>(&self, state: &State, key: K) -> Result<Option<V>> {
        key.encodable()?;
        let _guard = StackGuard::new(state);
        state.ensure_stack(2);
        self.push_self(state)?;
        key.push_into_stack(state);
        unsafe { ffi::lua_rawget(state.as_ptr(), -2) };
        Ok(state.decode(-1, DecodePolicy::BestEffort)?)
    }

    /// Raw write of `table[key] = value`. A nil or NaN key is rejected with
    /// [`Error::InvalidKey`].
    pub fn set<K: IntoStack, V: IntoStack>(&self, state: &State, key: K, value: V) -> Result<()> {
        key.encodable()?;
        value.encodable()?;
        let _guard = StackGuard::new(state);
        state.ensure_stack(3);
        self.push_self(state)?;
        key.push_into_stack(state);
        if !is_valid_key(state, -1) {
            return Err(Error::InvalidKey(state.slot_type(-1)));
        }
        value.push_into_stack(state);
        unsafe { ffi::lua_rawset(state.as_ptr(), -3) };
        Ok(())
    }

    /// Length of the table's array part (the `#` operator without metamethods).
    pub fn len(&self, state: &State) -> Result<usize> {
        let _guard = StackGuard::new(state);
        self.push_self(state)?;
        Ok(unsafe { ffi::lua_objlen(state.as_ptr(), -1) })
    }

    pub fn is_empty(&self, state: &State) -> Result<bool> {
        Ok(self.len(state)? == 0)
    }

    pub fn release(self, state: &State) -> bool {
        state.release(self.0)
    }
}

impl FunctionHandle {
    #[inline]
    pub(crate) fn from_reference(reference: Reference) -> Self {
        Self(reference)
    }

    #[inline]
    pub fn reference(&self) -> Reference {
        self.0
    }

    /// Call the function with `args` in protected mode and decode its results.
    pub fn call<A, R>(&self, state: &State, args: A) -> Result<R>
    where
        A: IntoStackMulti,
        R: FromStackMulti,
    {
        args.encodable_multi()?;
        let _guard = StackGuard::new(state);
        let base = state.top();
        if !state.push_reference(self.0) {
            return Err(Error::InvalidHandle);
        }
        let nargs = args.push_multi(state);
        state.protected_call(nargs, ffi::LUA_MULTRET)?;
        Ok(R::from_stack_multi(state, base + 1)?)
    }

    pub fn release(self, state: &State) -> bool {
        state.release(self.0)
    }
}

impl State {
    /// Create an empty table and root it.
    pub fn new_table(&self) -> TableHandle {
        let _guard = StackGuard::new(self);
        self.ensure_stack(1);
        unsafe { ffi::lua_createtable(self.as_ptr(), 0, 0) };
        TableHandle(self.register(-1))
    }
}

macro_rules! impl_handle_codec {
    ($handle:ident, $expected:literal, $($slot:ident)|+) => {
        impl IntoStack for $handle {
            #[inline]
            fn push_into_stack(self, state: &State) {
                state.push_reference(self.0);
            }
        }

        impl IntoStack for &$handle {
            #[inline]
            fn push_into_stack(self, state: &State) {
                state.push_reference(self.0);
            }
        }

        impl FromStack for $handle {
            const EXPECTED: &'static str = $expected;
            const ROOTS: bool = true;

            fn from_stack(state: &State, index: c_int) -> std::result::Result<Self, DecodeError> {
                match state.slot_type(index) {
                    $(SlotType::$slot)|+ => Ok($handle(state.register(index))),
                    other => Err(DecodeError::mismatch(Self::EXPECTED, other)),
                }
            }
        }
    };
}

impl_handle_codec!(TableHandle, "table", Table);
impl_handle_codec!(FunctionHandle, "function", Function);
