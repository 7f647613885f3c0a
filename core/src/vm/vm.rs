mod guards;

use std::{
    ffi::{c_int, c_void},
    fmt,
    ops::Deref,
    ptr::NonNull,
    sync::atomic::{AtomicU64, Ordering},
};

use mlua_sys as ffi;
use tracing::{debug, trace};

use super::{
    alloc::{AllocState, Allocator, SystemAllocator, alloc_proc},
    extra::ExtraData,
    interrupt::interrupt_proc,
    state::State,
};
use crate::error::{Error, Result};

pub(crate) use guards::{HostFrameGuard, LimitScope, StackGuard};
pub use guards::with_current_state;

static NEXT_VM_ID: AtomicU64 = AtomicU64::new(1);

/// Construction options for [`Vm`].
pub struct VmOptions {
    /// Open the standard libraries (`math`, `string`, `table`, `coroutine`, ...).
    pub open_libs: bool,
    /// Upper bound on VM heap usage in bytes. Script allocations past it fail with
    /// [`Error::OutOfMemory`]; host-side pushes are not held to it.
    pub memory_limit: Option<usize>,
    /// Memory source; defaults to [`SystemAllocator`]. The VM owns it, so it is dropped only
    /// after the VM is closed.
    pub allocator: Option<Box<dyn Allocator>>,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            open_libs: true,
            memory_limit: None,
            allocator: None,
        }
    }
}

impl VmOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_libs(mut self, open: bool) -> Self {
        self.open_libs = open;
        self
    }

    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn allocator(mut self, allocator: impl Allocator) -> Self {
        self.allocator = Some(Box::new(allocator));
        self
    }
}

impl fmt::Debug for VmOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmOptions")
            .field("open_libs", &self.open_libs)
            .field("memory_limit", &self.memory_limit)
            .field("custom_allocator", &self.allocator.is_some())
            .finish()
    }
}

/// An owned VM instance.
///
/// All stack, registry and binding operations are available through [`State`], which `Vm`
/// dereferences to. Dropping the `Vm` closes the VM, running the destructor of every object
/// still alive in it.
pub struct Vm {
    state: State,
    extra: NonNull<ExtraData>,
    alloc: NonNull<AllocState>,
}

impl Vm {
    pub fn new() -> Result<Self> {
        Self::with_options(VmOptions::default())
    }

    pub fn with_options(options: VmOptions) -> Result<Self> {
        let allocator = options.allocator.unwrap_or_else(|| Box::new(SystemAllocator));
        let alloc = NonNull::from(Box::leak(Box::new(AllocState::new(allocator, options.memory_limit))));

        let raw = unsafe { ffi::lua_newstate(alloc_proc, alloc.as_ptr() as *mut c_void) };
        if raw.is_null() {
            // SAFETY: no VM was created, so nothing else references the allocation state.
            drop(unsafe { Box::from_raw(alloc.as_ptr()) });
            return Err(Error::StateCreation);
        }

        let id = NEXT_VM_ID.fetch_add(1, Ordering::Relaxed);
        let extra = NonNull::from(Box::leak(Box::new(ExtraData::new(id, alloc.as_ptr()))));
        unsafe {
            let callbacks = ffi::lua_callbacks(raw);
            (*callbacks).userdata = extra.as_ptr() as *mut c_void;
            (*callbacks).interrupt = Some(interrupt_proc);
        }

        let vm = Self {
            state: unsafe { State::from_raw(raw) },
            extra,
            alloc,
        };
        if options.open_libs {
            vm.open_libs()?;
        }
        debug!(id, limit = ?options.memory_limit, "vm created");
        Ok(vm)
    }

    fn open_libs(&self) -> Result<()> {
        unsafe extern "C-unwind" fn open(l: *mut ffi::lua_State) -> c_int {
            unsafe { ffi::luaL_openlibs(l) };
            0
        }
        let l = self.state.as_ptr();
        let _guard = StackGuard::new(&self.state);
        unsafe { ffi::lua_pushcclosurek(l, open, c"openlibs".as_ptr(), 0, None) };
        self.state.protected_call(0, 0)
    }

    /// Unique id of this VM; handles remember it so they cannot be used with another VM.
    pub fn id(&self) -> u64 {
        unsafe { self.extra.as_ref() }.id
    }
}

impl Deref for Vm {
    type Target = State;

    #[inline]
    fn deref(&self) -> &State {
        &self.state
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        let id = self.id();
        unsafe {
            ffi::lua_close(self.state.as_ptr());
            // SAFETY: both boxes were leaked in `with_options` and the VM that used them is gone.
            drop(Box::from_raw(self.extra.as_ptr()));
            let alloc = Box::from_raw(self.alloc.as_ptr());
            trace!(id, peak = alloc.peak(), leaked = alloc.used(), "vm closed");
        }
    }
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm").field("id", &self.id()).finish_non_exhaustive()
    }
}
