//! Stack value codec.
//!
//! [`IntoStack`] pushes one Rust value as one VM slot and [`FromStack`] reads one slot back
//! into a Rust value. The multi-slot forms in [`multi`] build on these for argument lists and
//! return values. The set of supported types is closed: a type without an impl here simply
//! does not satisfy the trait bounds, so unsupported values are rejected by the compiler
//! rather than at run time.

use std::ffi::c_int;

use crate::{
    error::{DecodeError, EncodeError},
    vm::State,
};

mod aggregate;
mod convert;
mod json;
mod multi;
mod types;

pub(crate) use aggregate::is_valid_key;
pub use aggregate::{Tuple, VECTOR_SIZE, Vector};
pub use convert::ByteString;
pub use multi::{FromStackMulti, IntoStackMulti};
pub use types::SlotType;

/// Push a Rust value onto the VM stack as exactly one slot.
pub trait IntoStack {
    fn push_into_stack(self, state: &State);

    /// Reject values the VM cannot hold exactly, such as 64-bit integers beyond the range of a
    /// double. Checked before anything is pushed; `push_into_stack` itself never fails.
    #[inline]
    fn encodable(&self) -> Result<(), EncodeError> {
        Ok(())
    }
}

/// Read one VM stack slot as a Rust value.
pub trait FromStack: Sized {
    /// Type name used in argument diagnostics.
    const EXPECTED: &'static str;

    /// Whether decoding may root a value. Composite decoders use it to release what they
    /// rooted when a later element fails.
    const ROOTS: bool = false;

    /// Decode the slot at `index` without modifying the stack.
    ///
    /// Absent slots (past the top) are reported as [`SlotType::None`], so implementations
    /// that accept "no value" (like `Option<T>`) can decode missing trailing arguments.
    fn from_stack(state: &State, index: c_int) -> Result<Self, DecodeError>;
}

/// How a decode mismatch is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodePolicy {
    /// A mismatch is an error. Used for trampoline arguments and call results.
    #[default]
    Checked,
    /// A mismatch yields `None`. Used for opportunistic lookups such as globals and table
    /// fields.
    BestEffort,
}

impl State {
    /// Decode the slot at `index` according to `policy`.
    ///
    /// `Ok(Some(_))` is a successful decode. With [`DecodePolicy::BestEffort`] a mismatch is
    /// `Ok(None)`; with [`DecodePolicy::Checked`] it is the underlying [`DecodeError`].
    pub fn decode<T: FromStack>(&self, index: c_int, policy: DecodePolicy) -> Result<Option<T>, DecodeError> {
        match T::from_stack(self, index) {
            Ok(value) => Ok(Some(value)),
            Err(err) => match policy {
                DecodePolicy::Checked => Err(err),
                DecodePolicy::BestEffort => {
                    tracing::trace!(index, %err, "best-effort decode miss");
                    Ok(None)
                }
            },
        }
    }

    /// Push any encodable value. Nothing is pushed if the value has no exact representation.
    #[inline]
    pub fn push<T: IntoStack>(&self, value: T) -> crate::Result<()> {
        value.encodable()?;
        value.push_into_stack(self);
        Ok(())
    }
}
