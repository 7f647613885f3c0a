use std::{
    collections::HashMap,
    ffi::c_int,
    hash::{BuildHasher, Hash},
};

use mlua_sys as ffi;

use super::{FromStack, IntoStack, SlotType};
use crate::{
    error::{DecodeError, EncodeError},
    vm::{State, StackGuard},
};

/// Lane count of the VM's native vector type, fixed when the VM is built.
#[cfg(not(feature = "vector4"))]
pub const VECTOR_SIZE: usize = 3;
#[cfg(feature = "vector4")]
pub const VECTOR_SIZE: usize = 4;

/// The native vector slot. Arrays of any other arity have no codec impl, so an arity mismatch
/// fails to compile instead of failing at run time.
pub type Vector = [f32; VECTOR_SIZE];

impl IntoStack for Vector {
    #[inline]
    fn push_into_stack(self, state: &State) {
        #[cfg(not(feature = "vector4"))]
        unsafe {
            ffi::lua_pushvector(state.as_ptr(), self[0], self[1], self[2]);
        }
        #[cfg(feature = "vector4")]
        unsafe {
            ffi::lua_pushvector(state.as_ptr(), self[0], self[1], self[2], self[3]);
        }
    }
}

impl FromStack for Vector {
    const EXPECTED: &'static str = "vector";

    fn from_stack(state: &State, index: c_int) -> Result<Self, DecodeError> {
        match state.slot_type(index) {
            SlotType::Vector => {
                let lanes = unsafe { ffi::lua_tovector(state.as_ptr(), index) };
                if lanes.is_null() {
                    return Err(DecodeError::mismatch(Self::EXPECTED, SlotType::Vector));
                }
                let mut out = [0.0f32; VECTOR_SIZE];
                // SAFETY: a vector slot always exposes VECTOR_SIZE contiguous lanes.
                unsafe { std::ptr::copy_nonoverlapping(lanes, out.as_mut_ptr(), VECTOR_SIZE) };
                Ok(out)
            }
            other => Err(DecodeError::mismatch(Self::EXPECTED, other)),
        }
    }
}

/// A tuple-like aggregate stored as a table with 1-based positional keys.
///
/// Bare tuples are reserved for multiple return values (see
/// [`IntoStackMulti`](super::IntoStackMulti)), so the single-slot table form needs this
/// wrapper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Tuple<T>(pub T);

fn expect_table(state: &State, index: c_int, expected: &'static str) -> Result<c_int, DecodeError> {
    match state.slot_type(index) {
        SlotType::Table => Ok(state.abs_index(index)),
        other => Err(DecodeError::mismatch(expected, other)),
    }
}

/// Decode `table[key]` for a positive integer key, leaving the stack as it was.
fn decode_element<T: FromStack>(state: &State, table: c_int, key: c_int) -> Result<T, DecodeError> {
    let _guard = StackGuard::new(state);
    unsafe { ffi::lua_rawgeti(state.as_ptr(), table, key) };
    T::from_stack(state, -1).map_err(|err| DecodeError {
        detail: Some(match err.detail {
            Some(detail) => format!("element {key}: {detail}"),
            None => format!("element {key}"),
        }),
        ..err
    })
}

macro_rules! impl_tuple_table {
    ($len:expr; $($name:ident $idx:tt),+) => {
        impl<$($name: IntoStack),+> IntoStack for Tuple<($($name,)+)> {
            fn push_into_stack(self, state: &State) {
                let l = state.as_ptr();
                state.ensure_stack(2);
                unsafe { ffi::lua_createtable(l, $len, 0) };
                $(
                    (self.0).$idx.push_into_stack(state);
                    unsafe { ffi::lua_rawseti(l, -2, $idx + 1) };
                )+
            }

            fn encodable(&self) -> Result<(), EncodeError> {
                $( (self.0).$idx.encodable()?; )+
                Ok(())
            }
        }

        impl<$($name: FromStack),+> FromStack for Tuple<($($name,)+)> {
            const EXPECTED: &'static str = "table";
            const ROOTS: bool = $($name::ROOTS)||+;

            fn from_stack(state: &State, index: c_int) -> Result<Self, DecodeError> {
                let table = expect_table(state, index, Self::EXPECTED)?;
                state.ensure_stack(1);
                state.decode_rooted(Self::ROOTS, || {
                    Ok(Tuple(($(decode_element::<$name>(state, table, $idx + 1)?,)+)))
                })
            }
        }
    };
}

impl_tuple_table!(1; A 0);
impl_tuple_table!(2; A 0, B 1);
impl_tuple_table!(3; A 0, B 1, C 2);
impl_tuple_table!(4; A 0, B 1, C 2, D 3);
impl_tuple_table!(5; A 0, B 1, C 2, D 3, E 4);
impl_tuple_table!(6; A 0, B 1, C 2, D 3, E 4, F 5);
impl_tuple_table!(7; A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_tuple_table!(8; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

impl<T: IntoStack> IntoStack for Vec<T> {
    fn push_into_stack(self, state: &State) {
        let l = state.as_ptr();
        state.ensure_stack(2);
        unsafe { ffi::lua_createtable(l, self.len().min(c_int::MAX as usize) as c_int, 0) };
        for (i, value) in self.into_iter().enumerate() {
            value.push_into_stack(state);
            unsafe { ffi::lua_rawseti(l, -2, (i + 1) as c_int) };
        }
    }

    fn encodable(&self) -> Result<(), EncodeError> {
        self.iter().try_for_each(T::encodable)
    }
}

impl<T: FromStack> FromStack for Vec<T> {
    const EXPECTED: &'static str = "table";
    const ROOTS: bool = T::ROOTS;

    fn from_stack(state: &State, index: c_int) -> Result<Self, DecodeError> {
        let table = expect_table(state, index, Self::EXPECTED)?;
        state.ensure_stack(1);
        let len = unsafe { ffi::lua_objlen(state.as_ptr(), table) };
        let len = c_int::try_from(len).unwrap_or(c_int::MAX);
        state.decode_rooted(Self::ROOTS, || (1..=len).map(|i| decode_element::<T>(state, table, i)).collect())
    }
}

/// Whether the slot at `index` may be used as a table key; nil and NaN may not.
pub(crate) fn is_valid_key(state: &State, index: c_int) -> bool {
    match state.slot_type(index) {
        SlotType::Nil | SlotType::None => false,
        SlotType::Number => !unsafe { ffi::lua_tonumberx(state.as_ptr(), index, std::ptr::null_mut()) }.is_nan(),
        _ => true,
    }
}

impl<K, V, S> IntoStack for HashMap<K, V, S>
where
    K: IntoStack,
    V: IntoStack,
{
    fn push_into_stack(self, state: &State) {
        let l = state.as_ptr();
        state.ensure_stack(3);
        unsafe { ffi::lua_createtable(l, 0, self.len().min(c_int::MAX as usize) as c_int) };
        for (key, value) in self {
            key.push_into_stack(state);
            if !is_valid_key(state, -1) {
                tracing::trace!(key = ?state.slot_type(-1), "skipping map entry with a nil or NaN key");
                unsafe { ffi::lua_settop(l, -2) };
                continue;
            }
            value.push_into_stack(state);
            unsafe { ffi::lua_rawset(l, -3) };
        }
    }

    fn encodable(&self) -> Result<(), EncodeError> {
        self.iter().try_for_each(|(key, value)| {
            key.encodable()?;
            value.encodable()
        })
    }
}

impl<K, V, S> FromStack for HashMap<K, V, S>
where
    K: FromStack + Eq + Hash,
    V: FromStack,
    S: BuildHasher + Default,
{
    const EXPECTED: &'static str = "table";
    const ROOTS: bool = K::ROOTS || V::ROOTS;

    fn from_stack(state: &State, index: c_int) -> Result<Self, DecodeError> {
        let table = expect_table(state, index, Self::EXPECTED)?;
        let l = state.as_ptr();
        let _guard = StackGuard::new(state);
        state.ensure_stack(3);
        state.decode_rooted(Self::ROOTS, || {
            let mut out = HashMap::with_hasher(S::default());
            unsafe { ffi::lua_pushnil(l) };
            while unsafe { ffi::lua_next(l, table) } != 0 {
                let key = K::from_stack(state, -2)?;
                let value = V::from_stack(state, -1)?;
                out.insert(key, value);
                unsafe { ffi::lua_settop(l, -2) };
            }
            Ok(out)
        })
    }
}
