use std::fmt;

use thiserror::Error;

use crate::{val::SlotType, vm::ThreadStatus};

pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported to the host caller.
///
/// Argument errors raised inside a trampoline never show up here directly; they are raised
/// through the VM so the calling script can catch them, and only surface as
/// [`Error::Runtime`] if the script lets them escape.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to create VM state")]
    StateCreation,
    #[error("VM out of memory")]
    OutOfMemory,
    #[error("compile error: {0}")]
    Compile(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error("invalid or released handle")]
    InvalidHandle,
    #[error("{} is not a valid table key", .0.name())]
    InvalidKey(SlotType),
    #[error("break rejected: {depth} host call frame(s) active")]
    BreakRejected { depth: usize },
    #[error("execution interrupted")]
    Interrupted,
    #[error("thread cannot be resumed ({0:?})")]
    ThreadNotResumable(ThreadStatus),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A stack slot did not hold a value of the requested type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub expected: &'static str,
    pub found: SlotType,
    pub detail: Option<String>,
}

impl DecodeError {
    pub fn mismatch(expected: &'static str, found: SlotType) -> Self {
        Self {
            expected,
            found,
            detail: None,
        }
    }

    pub fn invalid(expected: &'static str, found: SlotType, detail: impl Into<String>) -> Self {
        Self {
            expected,
            found,
            detail: Some(detail.into()),
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} expected, got {}", self.expected, self.found.name())?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

impl std::error::Error for DecodeError {}

/// A host value has no exact VM representation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{value} cannot be represented exactly as a number")]
pub struct EncodeError {
    pub value: String,
}

/// A type binding was rejected before any script could reach it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("`init` on {ty} must be registered as the constructor, not as {found}")]
    InitNotConstructor { ty: &'static str, found: &'static str },
    #[error("{ty} declares more than one constructor")]
    DuplicateConstructor { ty: &'static str },
    #[error("operation name `{name}` on {ty} is reserved")]
    ReservedName { ty: &'static str, name: String },
    #[error("global `{name}` already holds a non-table value")]
    GlobalOccupied { name: &'static str },
}
