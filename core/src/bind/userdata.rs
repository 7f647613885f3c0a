use std::{any::TypeId, cell::RefCell, ffi::c_int};

use mlua_sys as ffi;

use super::UserType;
use crate::{
    error::DecodeError,
    trampoline::push_userdata,
    val::{FromStack, IntoStack, SlotType},
    vm::{StackGuard, State},
};

/// Push `T`'s metatable, nil if `T` was never bound.
///
/// Metatables are looked up by `TypeId`; type names are not unique and would let two types
/// share one.
pub(super) fn push_metatable<T: 'static>(state: &State) {
    let l = state.as_ptr();
    state.ensure_stack(1);
    let registry_id = state.extra().metatables.borrow().get(&TypeId::of::<T>()).copied();
    match registry_id {
        Some(registry_id) => unsafe {
            ffi::lua_rawgeti(l, ffi::LUA_REGISTRYINDEX, registry_id);
        },
        None => unsafe { ffi::lua_pushnil(l) },
    }
}

/// Allocate a new object holding `value` and attach `T`'s metatable.
fn push_object<T: UserType>(state: &State, value: T) {
    push_userdata(state, RefCell::new(value));
    push_metatable::<T>(state);
    unsafe { ffi::lua_setmetatable(state.as_ptr(), -2) };
}

/// The object in slot `index`, if it is a `T` created by this crate.
///
/// Identity is decided by the object's metatable, so only objects carrying `T`'s metatable
/// pass; foreign userdata and objects of other bound types are rejected.
pub(super) fn receiver<T: UserType>(state: &State, index: c_int) -> Result<&RefCell<T>, DecodeError> {
    let l = state.as_ptr();
    let found = state.slot_type(index);
    if found != SlotType::Userdata {
        return Err(DecodeError::mismatch(T::NAME, found));
    }
    let index = state.abs_index(index);
    let _guard = StackGuard::new(state);
    state.ensure_stack(2);
    if unsafe { ffi::lua_getmetatable(l, index) } == 0 {
        return Err(DecodeError::mismatch(T::NAME, found));
    }
    push_metatable::<T>(state);
    if unsafe { ffi::lua_rawequal(l, -1, -2) } == 0 {
        return Err(DecodeError::mismatch(T::NAME, found));
    }
    // SAFETY: userdata with T's metatable is only ever created by `push_object::<T>`, and the
    // slot keeps the object alive for the duration of the borrow.
    Ok(unsafe { &*(state.userdata_ptr(index) as *const RefCell<T>) })
}

/// A bound object passed by value between Rust and script.
///
/// Pushing allocates a new script object with `T`'s metatable. Decoding clones the object out
/// of the script-side cell, so it needs `T: Clone`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Object<T>(pub T);

impl<T: UserType> IntoStack for Object<T> {
    #[inline]
    fn push_into_stack(self, state: &State) {
        push_object(state, self.0);
    }
}

impl<T: UserType + Clone> FromStack for Object<T> {
    const EXPECTED: &'static str = T::NAME;

    fn from_stack(state: &State, index: c_int) -> Result<Self, DecodeError> {
        let cell = receiver::<T>(state, index)?;
        let object = cell
            .try_borrow()
            .map_err(|_| DecodeError::invalid(T::NAME, SlotType::Userdata, "object is mutably borrowed"))?;
        Ok(Object(object.clone()))
    }
}
