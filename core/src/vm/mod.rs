//! VM ownership and the host-facing entry points.
//!
//! [`Vm`] creates and closes one VM instance; [`State`] is the borrowed view every other layer
//! works through. Per-VM host data (reference table, break state, interrupt callback) hangs off
//! the VM's callback userdata slot, so a bare `lua_State` pointer inside a trampoline is enough
//! to reach it.

mod alloc;
mod debug;
mod extra;
mod interrupt;
mod state;
mod thread;
#[allow(clippy::module_inception)]
mod vm;

pub use alloc::{Allocator, SystemAllocator};
pub use debug::DebugInfo;
pub use interrupt::BreakSignal;
pub use state::State;
pub use thread::{Thread, ThreadStatus};
pub(crate) use vm::{HostFrameGuard, LimitScope, StackGuard};
pub use vm::{Vm, VmOptions, with_current_state};

#[cfg(test)]
mod vm_test;
