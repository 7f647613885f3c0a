use std::{
    borrow::Cow,
    ffi::{CStr, CString, c_char, c_int},
    slice,
};

use mlua_sys as ffi;

use super::{FromStack, IntoStack, SlotType};
use crate::{
    error::{DecodeError, EncodeError},
    vm::State,
};

impl IntoStack for bool {
    #[inline]
    fn push_into_stack(self, state: &State) {
        unsafe { ffi::lua_pushboolean(state.as_ptr(), self as c_int) }
    }
}

impl FromStack for bool {
    const EXPECTED: &'static str = "boolean";

    fn from_stack(state: &State, index: c_int) -> Result<Self, DecodeError> {
        match state.slot_type(index) {
            SlotType::Boolean => Ok(unsafe { ffi::lua_toboolean(state.as_ptr(), index) } != 0),
            other => Err(DecodeError::mismatch(Self::EXPECTED, other)),
        }
    }
}

/// Read a number slot without the string coercion `lua_tonumber` would apply.
#[inline]
fn number_at(state: &State, index: c_int, expected: &'static str) -> Result<f64, DecodeError> {
    match state.slot_type(index) {
        SlotType::Number => Ok(unsafe { ffi::lua_tonumberx(state.as_ptr(), index, std::ptr::null_mut()) }),
        other => Err(DecodeError::mismatch(expected, other)),
    }
}

// Integers share the VM's double-precision number slot. Encoding rejects values a double cannot
// hold exactly (only reachable for 64-bit types); decoding rejects fractional values and anything
// outside the target range instead of truncating or wrapping.
macro_rules! impl_integer {
    ($($ty:ty),* $(,)?) => {$(
        impl IntoStack for $ty {
            #[inline]
            fn push_into_stack(self, state: &State) {
                unsafe { ffi::lua_pushnumber(state.as_ptr(), self as f64) }
            }

            #[inline]
            fn encodable(&self) -> Result<(), EncodeError> {
                if (*self as f64) as i128 == *self as i128 {
                    Ok(())
                } else {
                    Err(EncodeError { value: self.to_string() })
                }
            }
        }

        impl FromStack for $ty {
            const EXPECTED: &'static str = "integer";

            fn from_stack(state: &State, index: c_int) -> Result<Self, DecodeError> {
                let n = number_at(state, index, Self::EXPECTED)?;
                if !n.is_finite() || n.fract() != 0.0 {
                    return Err(DecodeError::invalid(Self::EXPECTED, SlotType::Number, format!("{n} has no integer representation")));
                }
                // MAX + 1 is a power of two, so the exclusive upper bound is exact even for 64-bit types.
                if n < <$ty>::MIN as f64 || n >= (<$ty>::MAX as f64) + 1.0 {
                    return Err(DecodeError::invalid(Self::EXPECTED, SlotType::Number, format!("{n} out of range for {}", stringify!($ty))));
                }
                Ok(n as $ty)
            }
        }
    )*};
}

impl_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! impl_float {
    ($($ty:ty),* $(,)?) => {$(
        impl IntoStack for $ty {
            #[inline]
            fn push_into_stack(self, state: &State) {
                unsafe { ffi::lua_pushnumber(state.as_ptr(), self as f64) }
            }
        }

        impl FromStack for $ty {
            const EXPECTED: &'static str = "number";

            #[inline]
            fn from_stack(state: &State, index: c_int) -> Result<Self, DecodeError> {
                // Narrowing to f32 is lossy by definition and never an error.
                number_at(state, index, Self::EXPECTED).map(|n| n as $ty)
            }
        }
    )*};
}

impl_float!(f32, f64);

impl<T: IntoStack> IntoStack for Option<T> {
    #[inline]
    fn push_into_stack(self, state: &State) {
        match self {
            Some(value) => value.push_into_stack(state),
            None => unsafe { ffi::lua_pushnil(state.as_ptr()) },
        }
    }

    #[inline]
    fn encodable(&self) -> Result<(), EncodeError> {
        self.as_ref().map_or(Ok(()), T::encodable)
    }
}

impl<T: FromStack> FromStack for Option<T> {
    const EXPECTED: &'static str = T::EXPECTED;
    const ROOTS: bool = T::ROOTS;

    #[inline]
    fn from_stack(state: &State, index: c_int) -> Result<Self, DecodeError> {
        if state.slot_type(index).is_absent() {
            Ok(None)
        } else {
            T::from_stack(state, index).map(Some)
        }
    }
}

// Strings. Slices carry their length, so they go through `lua_pushlstring`; C strings are
// zero-terminated by type and go through `lua_pushstring`.

#[inline]
fn push_bytes(state: &State, bytes: &[u8]) {
    unsafe { ffi::lua_pushlstring(state.as_ptr(), bytes.as_ptr() as *const c_char, bytes.len()) };
}

impl IntoStack for &str {
    #[inline]
    fn push_into_stack(self, state: &State) {
        push_bytes(state, self.as_bytes());
    }
}

impl IntoStack for &String {
    #[inline]
    fn push_into_stack(self, state: &State) {
        push_bytes(state, self.as_bytes());
    }
}

impl IntoStack for String {
    #[inline]
    fn push_into_stack(self, state: &State) {
        push_bytes(state, self.as_bytes());
    }
}

impl IntoStack for Box<str> {
    #[inline]
    fn push_into_stack(self, state: &State) {
        push_bytes(state, self.as_bytes());
    }
}

impl IntoStack for Cow<'_, str> {
    #[inline]
    fn push_into_stack(self, state: &State) {
        push_bytes(state, self.as_bytes());
    }
}

impl IntoStack for &[u8] {
    #[inline]
    fn push_into_stack(self, state: &State) {
        push_bytes(state, self);
    }
}

impl IntoStack for &CStr {
    #[inline]
    fn push_into_stack(self, state: &State) {
        unsafe { ffi::lua_pushstring(state.as_ptr(), self.as_ptr()) };
    }
}

impl IntoStack for CString {
    #[inline]
    fn push_into_stack(self, state: &State) {
        self.as_c_str().push_into_stack(state);
    }
}

/// Borrow the bytes of a string slot. Valid until the slot is popped.
fn string_bytes<'a>(state: &'a State, index: c_int, expected: &'static str) -> Result<&'a [u8], DecodeError> {
    match state.slot_type(index) {
        SlotType::String => unsafe {
            let mut len = 0usize;
            let ptr = ffi::lua_tolstring(state.as_ptr(), index, &mut len);
            if ptr.is_null() {
                return Err(DecodeError::mismatch(expected, SlotType::String));
            }
            Ok(slice::from_raw_parts(ptr as *const u8, len))
        },
        other => Err(DecodeError::mismatch(expected, other)),
    }
}

impl FromStack for String {
    const EXPECTED: &'static str = "string";

    fn from_stack(state: &State, index: c_int) -> Result<Self, DecodeError> {
        let bytes = string_bytes(state, index, Self::EXPECTED)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|err| DecodeError::invalid(Self::EXPECTED, SlotType::String, format!("invalid UTF-8: {err}")))
    }
}

impl FromStack for CString {
    const EXPECTED: &'static str = "string";

    fn from_stack(state: &State, index: c_int) -> Result<Self, DecodeError> {
        let bytes = string_bytes(state, index, Self::EXPECTED)?;
        CString::new(bytes).map_err(|_| DecodeError::invalid(Self::EXPECTED, SlotType::String, "interior NUL byte"))
    }
}

/// Arbitrary bytes carried in a string slot.
///
/// `Vec<u8>` encodes as a table of numbers like any other `Vec<T>`; this wrapper selects the
/// string representation instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteString(pub Vec<u8>);

impl From<&[u8]> for ByteString {
    fn from(bytes: &[u8]) -> Self {
        ByteString(bytes.to_vec())
    }
}

impl IntoStack for ByteString {
    #[inline]
    fn push_into_stack(self, state: &State) {
        push_bytes(state, &self.0);
    }
}

impl IntoStack for &ByteString {
    #[inline]
    fn push_into_stack(self, state: &State) {
        push_bytes(state, &self.0);
    }
}

impl FromStack for ByteString {
    const EXPECTED: &'static str = "string";

    fn from_stack(state: &State, index: c_int) -> Result<Self, DecodeError> {
        string_bytes(state, index, Self::EXPECTED).map(|bytes| ByteString(bytes.to_vec()))
    }
}
