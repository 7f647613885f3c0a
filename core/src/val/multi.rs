use std::ffi::c_int;

use super::{FromStack, IntoStack};
use crate::{
    error::{DecodeError, EncodeError},
    vm::State,
};

/// Push zero or more values; used for call arguments and host return values.
///
/// `()` pushes nothing, a bare tuple pushes one slot per element in order, and every other
/// encodable value pushes exactly one slot.
pub trait IntoStackMulti {
    /// Returns the number of slots pushed.
    fn push_multi(self, state: &State) -> c_int;

    /// See [`IntoStack::encodable`].
    fn encodable_multi(&self) -> Result<(), EncodeError>;
}

/// Decode the run of slots that starts at absolute index `first` and ends at the top of the
/// stack. Slots past the top read as "no value".
pub trait FromStackMulti: Sized {
    fn from_stack_multi(state: &State, first: c_int) -> Result<Self, DecodeError>;
}

impl<T: IntoStack> IntoStackMulti for T {
    #[inline]
    fn push_multi(self, state: &State) -> c_int {
        state.ensure_stack(1);
        self.push_into_stack(state);
        1
    }

    #[inline]
    fn encodable_multi(&self) -> Result<(), EncodeError> {
        self.encodable()
    }
}

impl IntoStackMulti for () {
    #[inline]
    fn push_multi(self, _state: &State) -> c_int {
        0
    }

    #[inline]
    fn encodable_multi(&self) -> Result<(), EncodeError> {
        Ok(())
    }
}

impl<T: FromStack> FromStackMulti for T {
    #[inline]
    fn from_stack_multi(state: &State, first: c_int) -> Result<Self, DecodeError> {
        T::from_stack(state, first)
    }
}

impl FromStackMulti for () {
    #[inline]
    fn from_stack_multi(_state: &State, _first: c_int) -> Result<Self, DecodeError> {
        Ok(())
    }
}

fn tag_position(err: DecodeError, position: c_int) -> DecodeError {
    DecodeError {
        detail: Some(match err.detail {
            Some(detail) => format!("value #{position}: {detail}"),
            None => format!("value #{position}"),
        }),
        ..err
    }
}

macro_rules! impl_multi_tuple {
    ($len:expr; $($name:ident $idx:tt),+) => {
        impl<$($name: IntoStack),+> IntoStackMulti for ($($name,)+) {
            #[inline]
            fn push_multi(self, state: &State) -> c_int {
                state.ensure_stack($len);
                $( self.$idx.push_into_stack(state); )+
                $len
            }

            fn encodable_multi(&self) -> Result<(), EncodeError> {
                $( self.$idx.encodable()?; )+
                Ok(())
            }
        }

        impl<$($name: FromStack),+> FromStackMulti for ($($name,)+) {
            fn from_stack_multi(state: &State, first: c_int) -> Result<Self, DecodeError> {
                state.decode_rooted($($name::ROOTS)||+, || {
                    Ok(($(
                        $name::from_stack(state, first + $idx).map_err(|err| tag_position(err, $idx + 1))?,
                    )+))
                })
            }
        }
    };
}

impl_multi_tuple!(1; A 0);
impl_multi_tuple!(2; A 0, B 1);
impl_multi_tuple!(3; A 0, B 1, C 2);
impl_multi_tuple!(4; A 0, B 1, C 2, D 3);
impl_multi_tuple!(5; A 0, B 1, C 2, D 3, E 4);
impl_multi_tuple!(6; A 0, B 1, C 2, D 3, E 4, F 5);
impl_multi_tuple!(7; A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_multi_tuple!(8; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);
