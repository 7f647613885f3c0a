use std::{ffi::c_int, fmt};

use crate::{error::DecodeError, val::FromStack, vm::State};

/// An argument list that failed to decode. Rendered into the script error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgError {
    BadArgument { position: c_int, source: DecodeError },
    TooMany { expected: c_int, got: c_int },
}

impl fmt::Display for ArgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgError::BadArgument { position, source } => write!(f, "bad argument #{position} ({source})"),
            ArgError::TooMany { expected, got } => {
                write!(f, "too many arguments (expected at most {expected}, got {got})")
            }
        }
    }
}

impl std::error::Error for ArgError {}

/// A parameter list decoded from consecutive stack slots.
///
/// Implemented for tuples of [`FromStack`] types up to eight elements. Slots `first..` hold the
/// parameters; argument positions in diagnostics are `slot - shift`, so a hidden leading slot
/// (like the type table of a `T(...)` constructor call) does not skew what the script sees.
pub trait FromArgs: Sized {
    const COUNT: c_int;

    fn from_args(state: &State, first: c_int, shift: c_int) -> Result<Self, ArgError>;
}

fn check_arity(state: &State, first: c_int, shift: c_int, count: c_int) -> Result<(), ArgError> {
    let got = state.top() - shift;
    let expected = count + first - 1 - shift;
    if got > expected {
        return Err(ArgError::TooMany { expected, got });
    }
    Ok(())
}

#[inline]
fn arg<T: FromStack>(state: &State, slot: c_int, shift: c_int) -> Result<T, ArgError> {
    T::from_stack(state, slot).map_err(|source| ArgError::BadArgument {
        position: slot - shift,
        source,
    })
}

impl FromArgs for () {
    const COUNT: c_int = 0;

    #[inline]
    fn from_args(state: &State, first: c_int, shift: c_int) -> Result<Self, ArgError> {
        check_arity(state, first, shift, 0)
    }
}

macro_rules! impl_from_args {
    ($len:expr; $($name:ident $idx:tt),+) => {
        impl<$($name: FromStack),+> FromArgs for ($($name,)+) {
            const COUNT: c_int = $len;

            #[inline]
            fn from_args(state: &State, first: c_int, shift: c_int) -> Result<Self, ArgError> {
                check_arity(state, first, shift, $len)?;
                // Handles decoded before a failing argument are released again.
                state.decode_rooted($($name::ROOTS)||+, || Ok(($(arg::<$name>(state, first + $idx, shift)?,)+)))
            }
        }
    };
}

impl_from_args!(1; A 0);
impl_from_args!(2; A 0, B 1);
impl_from_args!(3; A 0, B 1, C 2);
impl_from_args!(4; A 0, B 1, C 2, D 3);
impl_from_args!(5; A 0, B 1, C 2, D 3, E 4);
impl_from_args!(6; A 0, B 1, C 2, D 3, E 4, F 5);
impl_from_args!(7; A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_from_args!(8; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);
