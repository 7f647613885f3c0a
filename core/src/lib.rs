//! Statically typed bridge between Rust and an embedded Luau VM.
//!
//! The crate is split the same way values flow through it:
//!
//! - [`val`] maps Rust values to and from VM stack slots,
//! - [`trampoline`] turns Rust functions into VM-callable C functions,
//! - [`bind`] exposes a Rust type's constructor, methods and functions as a
//!   script-visible object surface,
//! - [`registry`] hands out rooted handles so host code can keep VM values
//!   alive across calls,
//! - [`vm`] owns the VM instance and the host-facing entry points.

pub mod bind;
pub mod error;
pub mod registry;
pub mod trampoline;
pub mod util;
pub mod val;
pub mod vm;

pub use bind::{
    Binding, ByMut, ByRef, ByValue, Classification, InstanceFunction, Methods, Object, Receiver, UserType,
};
pub use error::{BindError, DecodeError, EncodeError, Error, Result};
pub use registry::{FunctionHandle, Reference, TableHandle};
pub use trampoline::{ArgError, CapturedFunction, FromArgs, HostFunction, IntoResults, Trampoline};
pub use val::{
    ByteString, DecodePolicy, FromStack, FromStackMulti, IntoStack, IntoStackMulti, SlotType, Tuple,
    VECTOR_SIZE, Vector,
};
pub use vm::{
    Allocator, BreakSignal, DebugInfo, State, SystemAllocator, Thread, ThreadStatus, Vm, VmOptions,
    with_current_state,
};
